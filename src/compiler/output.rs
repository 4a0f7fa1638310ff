//! Track assembly.
//!
//! Flattens the global timeline and the timeline tree into the ordered track
//! list handed to the SMF writer.

use super::channel::{ChannelEvent, GlobalEvent, GlobalTimeline, TimelineId, Timelines};

/// A sequential track event. `wait` and `duration` advance the track cursor;
/// everything else happens at the cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    Note {
        pitches: Vec<u8>,
        wait: u32,
        duration: u32,
        velocity: u8,
    },
    Program {
        program: u8,
        bank: Option<u8>,
    },
    Controller {
        controller: u8,
        value: u8,
    },
    /// Silence on the global track.
    Filler {
        wait: u32,
    },
    Tempo {
        bpm: f64,
    },
    TimeSignature {
        numerator: u8,
        denominator: u8,
    },
    /// Bend in `-1.0..=1.0`.
    PitchBend {
        wait: u32,
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// MIDI channel 1-16; `None` for the global track.
    pub channel: Option<u8>,
    pub events: Vec<TrackEvent>,
}

impl Track {
    pub fn notes(&self) -> impl Iterator<Item = &TrackEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e, TrackEvent::Note { .. }))
    }
}

/// The global track first, then every top-level timeline in creation order.
///
/// Each timeline contributes its pitch-bend track (if any), its own events
/// and then its children, depth first. Empty tracks are skipped.
pub fn assemble(global: &GlobalTimeline, timelines: &Timelines, channels: &[TimelineId]) -> Vec<Track> {
    let mut tracks = vec![Track {
        channel: None,
        events: global.events().iter().map(global_event).collect(),
    }];
    for &at in channels {
        flatten(timelines, at, &mut tracks);
    }
    tracks
}

fn global_event(event: &GlobalEvent) -> TrackEvent {
    match *event {
        GlobalEvent::Filler { wait } => TrackEvent::Filler { wait },
        GlobalEvent::Tempo { bpm } => TrackEvent::Tempo { bpm },
        GlobalEvent::TimeSignature {
            numerator,
            denominator,
        } => TrackEvent::TimeSignature {
            numerator,
            denominator,
        },
    }
}

fn flatten(timelines: &Timelines, at: TimelineId, out: &mut Vec<Track>) {
    let timeline = &timelines[at];
    let channel = Some(timeline.channel());

    if !timeline.pitch_bends().is_empty() {
        let mut bends = timeline.pitch_bends().to_vec();
        bends.sort_by_key(|&(position, _)| position);
        let mut cursor = 0;
        let events = bends
            .into_iter()
            .map(|(position, value)| {
                let wait = position - cursor;
                cursor = position;
                TrackEvent::PitchBend { wait, value }
            })
            .collect();
        out.push(Track { channel, events });
    }

    if !timeline.events().is_empty() {
        let events = timeline
            .events()
            .iter()
            .map(|event| match event {
                ChannelEvent::Note(note) => TrackEvent::Note {
                    pitches: note.pitches.clone(),
                    wait: note.wait,
                    duration: note.duration,
                    velocity: note.velocity,
                },
                ChannelEvent::Program { program, bank } => TrackEvent::Program {
                    program: *program,
                    bank: *bank,
                },
                ChannelEvent::Controller { controller, value } => TrackEvent::Controller {
                    controller: *controller,
                    value: *value,
                },
            })
            .collect();
        out.push(Track { channel, events });
    }

    for &child in timeline.children().iter().chain(timeline.voices()) {
        flatten(timelines, child, out);
    }
}
