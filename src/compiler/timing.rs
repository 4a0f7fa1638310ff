//! Millisecond timing for playback highlighting.

use serde::Serialize;

use crate::dsl::note::TICKS_PER_BEAT;

use super::channel::Timelines;

/// Tempo assumed before the first `((bpm=…))`.
pub const DEFAULT_BPM: f64 = 120.0;

/// When the note produced by the notation at `offset` sounds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Highlight {
    pub offset: usize,
    pub start_ms: f64,
    pub end_ms: f64,
}

/// Tick to millisecond conversion across tempo changes.
#[derive(Debug, Clone)]
pub struct TempoMap<'a> {
    changes: &'a [(u32, f64)],
}

impl<'a> TempoMap<'a> {
    /// `changes` are `(tick, bpm)` pairs in tick order.
    pub fn new(changes: &'a [(u32, f64)]) -> Self {
        Self { changes }
    }

    pub fn ms(&self, tick: u32) -> f64 {
        let ms_per_tick = |bpm: f64| 60_000.0 / TICKS_PER_BEAT as f64 / bpm;
        let mut ms = 0.0;
        let mut from = 0;
        let mut bpm = DEFAULT_BPM;

        for &(position, next) in self.changes {
            if position >= tick {
                break;
            }
            ms += (position - from) as f64 * ms_per_tick(bpm);
            from = position;
            bpm = next;
        }
        ms + (tick - from) as f64 * ms_per_tick(bpm)
    }
}

/// One highlight per committed note across every timeline, ordered by
/// start time. Offsets are as recorded on the notes.
pub fn highlights(timelines: &Timelines, tempo: &TempoMap) -> Vec<Highlight> {
    let mut out: Vec<Highlight> = timelines
        .iter()
        .flat_map(|timeline| timeline.notes())
        .map(|note| Highlight {
            offset: note.offset,
            start_ms: tempo.ms(note.start),
            end_ms: tempo.ms(note.start + note.duration),
        })
        .collect();
    out.sort_by(|a, b| {
        a.start_ms
            .total_cmp(&b.start_ms)
            .then(a.offset.cmp(&b.offset))
    });
    out
}
