//! Standard MIDI File writer.
//!
//! Serializes assembled tracks as a format 1 file at 128 ticks per quarter
//! note. Sequential waits and durations become absolute times first; at
//! equal times note-offs go before everything else.

use std::io;

use midly::num::{u14, u15, u24, u28, u4, u7};
use midly::{
    Format, Header, MetaMessage, MidiMessage, PitchBend, Smf, Timing,
    TrackEvent as SmfEvent, TrackEventKind,
};

use crate::compiler::{Track, TrackEvent};
use crate::dsl::note::TICKS_PER_BEAT;

const BANK_SELECT: u8 = 0;

pub fn write(tracks: &[Track]) -> io::Result<Vec<u8>> {
    let header = Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_BEAT as u16)),
    );
    let mut smf = Smf::new(header);
    for track in tracks {
        smf.tracks.push(encode(track));
    }

    let mut out = Vec::new();
    smf.write_std(&mut out)?;
    Ok(out)
}

fn encode(track: &Track) -> Vec<SmfEvent<'static>> {
    let channel = u4::new(track.channel.map_or(0, |c| c.saturating_sub(1)));
    let midi = |message| TrackEventKind::Midi { channel, message };
    // (tick, note-off first, event)
    let mut timed: Vec<(u32, bool, TrackEventKind<'static>)> = Vec::new();
    let mut cursor = 0;

    for event in &track.events {
        match event {
            TrackEvent::Note {
                pitches,
                wait,
                duration,
                velocity,
            } => {
                let on = cursor + wait;
                let off = on + duration;
                for &pitch in pitches {
                    let key = u7::new(pitch);
                    timed.push((
                        on,
                        false,
                        midi(MidiMessage::NoteOn {
                            key,
                            vel: u7::new(*velocity),
                        }),
                    ));
                    timed.push((
                        off,
                        true,
                        midi(MidiMessage::NoteOff {
                            key,
                            vel: u7::new(0),
                        }),
                    ));
                }
                cursor = off;
            }
            TrackEvent::Program { program, bank } => {
                if let Some(bank) = bank {
                    timed.push((
                        cursor,
                        false,
                        midi(MidiMessage::Controller {
                            controller: u7::new(BANK_SELECT),
                            value: u7::new(*bank),
                        }),
                    ));
                }
                timed.push((
                    cursor,
                    false,
                    midi(MidiMessage::ProgramChange {
                        program: u7::new(*program),
                    }),
                ));
            }
            TrackEvent::Controller { controller, value } => timed.push((
                cursor,
                false,
                midi(MidiMessage::Controller {
                    controller: u7::new(*controller),
                    value: u7::new(*value),
                }),
            )),
            TrackEvent::Filler { wait } => cursor += wait,
            TrackEvent::Tempo { bpm } => {
                let micros = (60_000_000.0 / bpm).round().clamp(1.0, 16_777_215.0) as u32;
                timed.push((
                    cursor,
                    false,
                    TrackEventKind::Meta(MetaMessage::Tempo(u24::new(micros))),
                ));
            }
            TrackEvent::TimeSignature {
                numerator,
                denominator,
            } => timed.push((
                cursor,
                false,
                TrackEventKind::Meta(MetaMessage::TimeSignature(
                    *numerator,
                    denominator.trailing_zeros() as u8,
                    24,
                    8,
                )),
            )),
            TrackEvent::PitchBend { wait, value } => {
                cursor += wait;
                timed.push((
                    cursor,
                    false,
                    midi(MidiMessage::PitchBend {
                        bend: PitchBend(u14::new(bend_value(*value))),
                    }),
                ));
            }
        }
    }

    // Stable: events at the same tick keep their log order.
    timed.sort_by_key(|&(tick, off, _)| (tick, !off));

    let mut previous = 0;
    let mut events: Vec<SmfEvent<'static>> = timed
        .into_iter()
        .map(|(tick, _, kind)| {
            let delta = u28::new(tick - previous);
            previous = tick;
            SmfEvent { delta, kind }
        })
        .collect();
    events.push(SmfEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    events
}

/// Map `-1.0..=1.0` onto the 14-bit range centered at 8192.
fn bend_value(value: f64) -> u16 {
    (8192.0 + value.clamp(-1.0, 1.0) * 8191.0).round() as u16
}
