//! Note modifiers applied by ornaments.
//!
//! Every diacritic the compiler is currently inside pushes a [`Modifier`].
//! When a key or chord is committed, its staged drafts run through the
//! stack innermost-first, so the outermost ornament has the final word.

use crate::dsl::note::trill_neighbor;

pub const GRACE_LENGTH: u32 = 8;
pub const STACCATO_LENGTH: u32 = 16;
pub const TRILL_LENGTH: u32 = 16;
pub const SFORZANDO_VELOCITY: u8 = 100;
pub const ARPEGGIO_INTERVAL: u32 = 8;
pub const STACCATO_ARPEGGIO_INTERVAL: u32 = 4;
pub const DEFAULT_FERMATA: f64 = 2.0;

/// A note about to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteDraft {
    pub pitches: Vec<u8>,
    pub duration: u32,
    pub velocity: u8,
    pub grace: bool,
}

/// The drafts of one notation plus the silence that trails them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Staged {
    pub notes: Vec<NoteDraft>,
    pub rest: u32,
}

impl Staged {
    pub fn ticks(&self) -> u32 {
        self.notes.iter().map(|n| n.duration).sum::<u32>() + self.rest
    }

    /// Onset of each draft, given the onset of the first one.
    pub fn onsets(&self, start: u32) -> Vec<u32> {
        let mut at = start;
        self.notes
            .iter()
            .map(|n| {
                let onset = at;
                at += n.duration;
                onset
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Modifier {
    Fermata { factor: f64 },
    Staccato,
    Sforzando,
    Trill,
    /// Linear velocity ramp from `from` at tick `first` to `to` at tick `last`.
    Dynamics { from: u8, to: u8, first: u32, last: u32 },
    /// Placeholder keys resolve against `base`, the invoking key's pitch.
    /// `octave` is the timeline octave at the invocation.
    Substitute { base: u8, octave: i32 },
}

impl Modifier {
    pub fn apply(&self, staged: &mut Staged, onset: u32) {
        match *self {
            Modifier::Fermata { factor } => {
                for note in staged.notes.iter_mut().filter(|n| !n.grace) {
                    note.duration = (note.duration as f64 * factor).round() as u32;
                }
            }
            Modifier::Staccato => {
                if let Some(note) = staged.notes.iter_mut().rev().find(|n| !n.grace) {
                    if note.duration > STACCATO_LENGTH {
                        staged.rest += note.duration - STACCATO_LENGTH;
                        note.duration = STACCATO_LENGTH;
                    }
                }
            }
            Modifier::Sforzando => {
                for note in &mut staged.notes {
                    note.velocity = SFORZANDO_VELOCITY;
                }
            }
            Modifier::Trill => trill(staged),
            Modifier::Dynamics {
                from,
                to,
                first,
                last,
            } => {
                let onsets = staged.onsets(onset);
                for (note, at) in staged.notes.iter_mut().zip(onsets) {
                    note.velocity = interpolate(from, to, first, last, at);
                }
            }
            Modifier::Substitute { .. } => {}
        }
    }
}

fn trill(staged: &mut Staged) {
    let mut notes = Vec::with_capacity(staged.notes.len());
    let mut leftover = 0;

    for note in staged.notes.drain(..) {
        if note.grace {
            notes.push(note);
            continue;
        }
        let neighbor: Vec<u8> = note
            .pitches
            .iter()
            .map(|&p| trill_neighbor(p).unwrap_or(p))
            .collect();
        let mut left = note.duration;
        let mut upper = false;
        while left >= TRILL_LENGTH {
            notes.push(NoteDraft {
                pitches: if upper {
                    neighbor.clone()
                } else {
                    note.pitches.clone()
                },
                duration: TRILL_LENGTH,
                velocity: note.velocity,
                grace: false,
            });
            left -= TRILL_LENGTH;
            upper = !upper;
        }
        leftover += left;
    }
    staged.notes = notes;
    staged.rest += leftover;
}

/// Velocity at tick `at` on a ramp. A zero-length ramp lands on `to`.
pub fn interpolate(from: u8, to: u8, first: u32, last: u32, at: u32) -> u8 {
    if last <= first {
        return to;
    }
    let t = (at.clamp(first, last) - first) as f64 / (last - first) as f64;
    let velocity = from as f64 + t * (to as f64 - from as f64);
    velocity.round().clamp(0.0, 127.0) as u8
}

/// The innermost substitution on the stack.
pub fn substitution(stack: &[Modifier]) -> Option<(u8, i32)> {
    stack.iter().rev().find_map(|m| match *m {
        Modifier::Substitute { base, octave } => Some((base, octave)),
        _ => None,
    })
}

/// Onset spacing for arpeggio voices.
pub fn arpeggio_interval(stack: &[Modifier]) -> u32 {
    if stack.contains(&Modifier::Staccato) {
        STACCATO_ARPEGGIO_INTERVAL
    } else {
        ARPEGGIO_INTERVAL
    }
}
