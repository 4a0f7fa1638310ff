//! Channel timelines.
//!
//! A [`ChannelTimeline`] owns the performance state of one voice (octave,
//! quantization, transpose, velocity), its event log and its tick cursor.
//! Timelines live in a [`Timelines`] arena and refer to their children by
//! [`TimelineId`]; parallel branches and arpeggio voices each get their own
//! list of children.

use std::ops::{Index, IndexMut};

use crate::dsl::ast::{Node, NodeKind, Stackable, StackableKind};
use crate::dsl::error::CompileError;

use super::diacritic::{NoteDraft, Staged};

pub const DEFAULT_OCTAVE: i32 = 4;
/// A sixteenth note.
pub const DEFAULT_QUANTIZATION: u32 = 32;
pub const DEFAULT_VELOCITY: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimelineId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct Performance {
    pub octave: i32,
    /// Default note length in ticks.
    pub quantization: u32,
    pub transpose: i32,
    pub velocity: u8,
}

impl Default for Performance {
    fn default() -> Self {
        Self {
            octave: DEFAULT_OCTAVE,
            quantization: DEFAULT_QUANTIZATION,
            transpose: 0,
            velocity: DEFAULT_VELOCITY,
        }
    }
}

/// A committed note.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    /// Source offset of the notation that produced it.
    pub offset: usize,
    pub pitches: Vec<u8>,
    /// Silence before the note.
    pub wait: u32,
    /// Absolute tick of the onset.
    pub start: u32,
    pub duration: u32,
    pub velocity: u8,
    pub grace: bool,
    pub arpeggio: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Note(NoteEvent),
    Program { program: u8, bank: Option<u8> },
    Controller { controller: u8, value: u8 },
}

/// Rational quantization compensation inside a tuplet.
///
/// The ideal unit is `2q / N` ticks; `remainder` is `2q mod N`, and every
/// `N` units of accumulated remainder pay out one extra tick.
#[derive(Debug, Clone, PartialEq)]
struct Tuplet {
    divisor: u32,
    remainder: u32,
    error: u32,
}

/// What a tie extends.
#[derive(Debug, Clone, Copy, PartialEq)]
enum LastUnit {
    None,
    Note(usize),
    Rest,
    Arpeggio(usize),
}

#[derive(Debug, Clone)]
struct RepeatCapture {
    offset: usize,
    nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct ChannelTimeline {
    channel: u8,
    pub state: Performance,
    events: Vec<ChannelEvent>,
    pitch_bends: Vec<(u32, f64)>,
    children: Vec<TimelineId>,
    voices: Vec<TimelineId>,
    /// Silence not yet attached to a note.
    rests: u32,
    position: u32,
    tuplet: Option<Tuplet>,
    last_unit: LastUnit,
    /// First branch slot free for a new parallelization.
    branch_base: usize,
    snapshot: Vec<Node>,
    repeat: Option<RepeatCapture>,
    second_volta_allowed: bool,
}

impl ChannelTimeline {
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            state: Performance::default(),
            events: Vec::new(),
            pitch_bends: Vec::new(),
            children: Vec::new(),
            voices: Vec::new(),
            rests: 0,
            position: 0,
            tuplet: None,
            last_unit: LastUnit::None,
            branch_base: 0,
            snapshot: Vec::new(),
            repeat: None,
            second_volta_allowed: false,
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Tick cursor, including pending rests.
    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn events(&self) -> &[ChannelEvent] {
        &self.events
    }

    pub fn pitch_bends(&self) -> &[(u32, f64)] {
        &self.pitch_bends
    }

    pub fn children(&self) -> &[TimelineId] {
        &self.children
    }

    pub fn voices(&self) -> &[TimelineId] {
        &self.voices
    }

    pub fn in_tuplet(&self) -> bool {
        self.tuplet.is_some()
    }

    pub fn notes(&self) -> impl Iterator<Item = &NoteEvent> {
        self.events.iter().filter_map(|e| match e {
            ChannelEvent::Note(note) => Some(note),
            _ => None,
        })
    }

    /// Extra ticks owed for `ticks` of material inside a tuplet.
    fn check_tuplet(&mut self, ticks: u32) -> u32 {
        let quantization = self.state.quantization.max(1);
        let Some(tuplet) = self.tuplet.as_mut() else {
            return 0;
        };
        let units = (2 * ticks + quantization) / (2 * quantization);
        tuplet.error += units * tuplet.remainder;
        let extra = tuplet.error / tuplet.divisor;
        tuplet.error %= tuplet.divisor;
        extra
    }

    /// Rest for `length` ticks, or one quantization unit.
    pub fn rest(&mut self, length: Option<u32>, ignore_tuplet: bool) -> u32 {
        let mut ticks = length.unwrap_or(self.state.quantization);
        if ticks == 0 {
            return 0;
        }
        if !ignore_tuplet {
            ticks += self.check_tuplet(ticks);
        }
        self.rests += ticks;
        self.position += ticks;
        self.last_unit = LastUnit::Rest;
        ticks
    }

    fn push_note(&mut self, offset: usize, draft: NoteDraft, arpeggio: bool) -> u32 {
        let wait = std::mem::take(&mut self.rests);
        self.events.push(ChannelEvent::Note(NoteEvent {
            offset,
            pitches: draft.pitches,
            wait,
            start: self.position,
            duration: draft.duration,
            velocity: draft.velocity,
            grace: draft.grace,
            arpeggio,
        }));
        self.last_unit = LastUnit::Note(self.events.len() - 1);
        self.position += draft.duration;
        draft.duration
    }

    fn trail(&mut self, ticks: u32) {
        self.rests += ticks;
        self.position += ticks;
    }

    /// Commit staged drafts and their trailing rest.
    ///
    /// Tuplet calibration lands on the trailing rest when there is one,
    /// otherwise on the last note.
    pub fn commit(&mut self, offset: usize, mut staged: Staged) -> u32 {
        let calibration = self.check_tuplet(staged.ticks());
        if calibration > 0 {
            match staged.notes.last_mut() {
                Some(last) if staged.rest == 0 => last.duration += calibration,
                _ => staged.rest += calibration,
            }
        }

        let mut advanced = 0;
        for draft in staged.notes {
            if draft.duration > 0 {
                advanced += self.push_note(offset, draft, false);
            }
        }
        self.trail(staged.rest);
        advanced + staged.rest
    }

    /// Claim `count` branch slots for a parallelization. Parallelizations
    /// nested in its first branch get the slots after them.
    pub fn reserve_branches(&mut self, count: usize) -> usize {
        let base = self.branch_base;
        self.branch_base += count;
        base
    }

    pub fn release_branches(&mut self, base: usize) {
        self.branch_base = base;
    }

    pub fn set_instrument(&mut self, program: u8, bank: Option<u8>) {
        self.events.push(ChannelEvent::Program { program, bank });
    }

    pub fn set_controller(&mut self, controller: u8, value: u8) {
        self.events.push(ChannelEvent::Controller { controller, value });
    }

    pub fn add_pitch_bend(&mut self, position: u32, value: f64) {
        self.pitch_bends.push((position, value.clamp(-1.0, 1.0)));
    }

    /// Enter an `size`-tuplet. Returns the quantization to restore.
    pub fn begin_tuplet(&mut self, offset: usize, size: u32) -> Result<u32, CompileError> {
        if self.tuplet.is_some() {
            return Err(CompileError::semantic("Tuplets can not be folded", offset));
        }
        let original = self.state.quantization;
        let span = 2 * original;
        let quantization = span / size;
        if quantization == 0 {
            return Err(CompileError::semantic(
                format!("Quantization is too short for a {size}-tuplet"),
                offset,
            ));
        }
        self.state.quantization = quantization;
        self.tuplet = Some(Tuplet {
            divisor: size,
            remainder: span % size,
            error: 0,
        });
        Ok(original)
    }

    pub fn end_tuplet(&mut self, original: u32) {
        self.state.quantization = original;
        self.tuplet = None;
    }

    /// Emit global events at this timeline's position.
    pub fn wrap_global_configuration(
        &self,
        offset: usize,
        global: &mut GlobalTimeline,
        emit: impl FnOnce(&mut GlobalTimeline),
    ) -> Result<(), CompileError> {
        global.wrap(offset, self.position, emit)
    }

    /// Record a processed top-level node for later replay.
    pub fn add_snapshot(&mut self, node: &Node) {
        let captured = match &node.kind {
            NodeKind::GlobalConfiguration { .. } | NodeKind::Volta(1) => node.clone(),
            NodeKind::Stackable(Stackable {
                offset,
                kind: StackableKind::GroupDeclaration { key, .. },
            }) => Node::stackable(Stackable {
                offset: *offset,
                kind: StackableKind::GroupReference(*key),
            }),
            NodeKind::Stackable(_) => node.clone(),
            _ => return,
        };
        if let Some(repeat) = &mut self.repeat {
            repeat.nodes.push(captured.clone());
        }
        self.snapshot.push(captured);
    }

    pub fn repeat_open(&mut self, offset: usize) -> Result<(), CompileError> {
        if self.repeat.is_some() {
            return Err(CompileError::semantic("Already opened repeat", offset));
        }
        self.repeat = Some(RepeatCapture {
            offset,
            nodes: Vec::new(),
        });
        self.second_volta_allowed = false;
        Ok(())
    }

    /// Close a repeat and return the nodes to replay.
    ///
    /// `count` is the total number of passes (default 2). Without an open
    /// repeat, everything since the channel start or the previous close is
    /// replayed.
    ///
    /// Every replayed node burns at least one unit of gas, so a replay larger
    /// than `budget` is rejected before it is built.
    pub fn repeat_close(
        &mut self,
        offset: usize,
        count: Option<u32>,
        budget: u64,
    ) -> Result<Vec<Node>, CompileError> {
        let passes = count.unwrap_or(2);
        if passes == 0 {
            return Err(CompileError::semantic("Malformed repeat: 0", offset));
        }
        let captured = match self.repeat.take() {
            Some(repeat) => repeat.nodes,
            None => self.snapshot.clone(),
        };
        self.snapshot.clear();

        if let Some(volta) = captured.iter().position(|n| n.kind == NodeKind::Volta(1)) {
            if passes != 2 {
                return Err(CompileError::semantic(
                    "Prima volta can exist only if the repeat is played twice",
                    offset,
                ));
            }
            self.second_volta_allowed = true;
            return Ok(captured[..volta].to_vec());
        }
        let replayed = u64::from(passes - 1).saturating_mul(captured.len() as u64);
        if replayed >= budget {
            return Err(CompileError::exhausted(offset));
        }
        Ok((1..passes).flat_map(|_| captured.iter().cloned()).collect())
    }

    pub fn volta(&mut self, offset: usize, ordinal: u8) -> Result<(), CompileError> {
        if ordinal == 1 {
            let repeat = self
                .repeat
                .as_ref()
                .ok_or_else(|| CompileError::semantic("Unexpected prima volta", offset))?;
            if repeat.nodes.iter().any(|n| n.kind == NodeKind::Volta(1)) {
                return Err(CompileError::semantic("Duplicated prima volta", offset));
            }
            return Ok(());
        }
        if !std::mem::take(&mut self.second_volta_allowed) {
            return Err(CompileError::semantic("Unexpected seconda volta", offset));
        }
        Ok(())
    }

    /// A seconda volta must directly follow the close it belongs to.
    pub fn expire_seconda_volta(&mut self) {
        self.second_volta_allowed = false;
    }

    pub fn ensure_repeat_closed(&self) -> Result<(), CompileError> {
        match &self.repeat {
            Some(repeat) => Err(CompileError::semantic("Incomplete repeat", repeat.offset)),
            None => Ok(()),
        }
    }
}

/// Which child list a child timeline belongs to.
#[derive(Debug, Clone, Copy)]
pub enum Slot {
    Branch(usize),
    Voice(usize),
}

/// Arena of every timeline in a compilation.
#[derive(Debug, Clone, Default)]
pub struct Timelines {
    items: Vec<ChannelTimeline>,
}

impl Index<TimelineId> for Timelines {
    type Output = ChannelTimeline;

    fn index(&self, id: TimelineId) -> &ChannelTimeline {
        &self.items[id.0]
    }
}

impl IndexMut<TimelineId> for Timelines {
    fn index_mut(&mut self, id: TimelineId) -> &mut ChannelTimeline {
        &mut self.items[id.0]
    }
}

impl Timelines {
    pub fn create(&mut self, channel: u8) -> TimelineId {
        self.items.push(ChannelTimeline::new(channel));
        TimelineId(self.items.len() - 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelTimeline> {
        self.items.iter()
    }

    /// Activate a child of `parent`, creating it on first use.
    ///
    /// The child takes over the parent's performance state and is padded
    /// with rest up to the parent's position.
    pub fn child_at(
        &mut self,
        parent: TimelineId,
        offset: usize,
        slot: Slot,
    ) -> Result<TimelineId, CompileError> {
        let channel = self[parent].channel;
        let index = match slot {
            Slot::Branch(i) | Slot::Voice(i) => i,
        };
        loop {
            let len = match slot {
                Slot::Branch(_) => self[parent].children.len(),
                Slot::Voice(_) => self[parent].voices.len(),
            };
            if len > index {
                break;
            }
            let id = self.create(channel);
            match slot {
                Slot::Branch(_) => self[parent].children.push(id),
                Slot::Voice(_) => self[parent].voices.push(id),
            }
        }
        let id = match slot {
            Slot::Branch(i) => self[parent].children[i],
            Slot::Voice(i) => self[parent].voices[i],
        };

        let state = self[parent].state.clone();
        let tuplet = self[parent].tuplet.clone();
        let position = self[parent].position;
        let child = &mut self[id];
        child.state = state;
        child.tuplet = tuplet;
        if child.position > position {
            return Err(CompileError::semantic(
                "Child can not be longer than its parent",
                offset,
            ));
        }
        child.rest(Some(position - child.position), true);
        Ok(id)
    }

    /// Extend whatever was played last by one quantization unit.
    pub fn tie(&mut self, at: TimelineId, offset: usize) -> Result<u32, CompileError> {
        let timeline = &mut self[at];
        let length = timeline.state.quantization;
        let ticks = length + timeline.check_tuplet(length);

        match timeline.last_unit {
            LastUnit::Note(index) => {
                if let Some(ChannelEvent::Note(note)) = timeline.events.get_mut(index) {
                    note.duration += ticks;
                }
                timeline.position += ticks;
            }
            LastUnit::Rest => timeline.trail(ticks),
            LastUnit::Arpeggio(count) => {
                let voices: Vec<TimelineId> = timeline.voices.iter().take(count).copied().collect();
                timeline.trail(ticks);
                for voice in voices {
                    let voice = &mut self[voice];
                    if let LastUnit::Note(index) = voice.last_unit {
                        if let Some(ChannelEvent::Note(note)) = voice.events.get_mut(index) {
                            note.duration += ticks;
                        }
                    }
                    voice.position += ticks;
                }
            }
            LastUnit::None => return Err(CompileError::semantic("Malformed tie", offset)),
        }
        Ok(ticks)
    }

    /// Commit a chord as an arpeggio.
    ///
    /// Voice `i` starts `i * interval` ticks late on its own child timeline
    /// and releases with the others; the parent rests for the whole chord.
    pub fn commit_arpeggio(
        &mut self,
        at: TimelineId,
        offset: usize,
        staged: Staged,
        interval: u32,
    ) -> Result<u32, CompileError> {
        let calibration = self[at].check_tuplet(staged.ticks());
        let (graces, mains): (Vec<NoteDraft>, Vec<NoteDraft>) =
            staged.notes.into_iter().partition(|n| n.grace);

        let mut advanced = 0;
        for grace in graces {
            advanced += self[at].push_note(offset, grace, false);
        }

        let Some(chord) = mains.first() else {
            let rest = staged.rest + calibration;
            self[at].trail(rest);
            return Ok(advanced + rest);
        };
        let pitches = chord.pitches.clone();
        let velocity = chord.velocity;
        let mut held: u32 = mains.iter().map(|n| n.duration).sum();
        let mut rest = staged.rest;
        if rest > 0 {
            rest += calibration;
        } else {
            held += calibration;
        }

        let spread = interval * (pitches.len() as u32).saturating_sub(1);
        if spread >= held {
            return Err(CompileError::semantic(
                "Arpeggio is longer than its chord",
                offset,
            ));
        }

        let voices = (0..pitches.len())
            .map(|i| self.child_at(at, offset, Slot::Voice(i)))
            .collect::<Result<Vec<_>, _>>()?;

        let parent = &mut self[at];
        parent.trail(held + rest);
        parent.last_unit = LastUnit::Arpeggio(pitches.len());

        for (i, (voice, pitch)) in voices.into_iter().zip(pitches).enumerate() {
            let delay = interval * i as u32;
            let voice = &mut self[voice];
            voice.rest(Some(delay), true);
            voice.push_note(
                offset,
                NoteDraft {
                    pitches: vec![pitch],
                    duration: held - delay,
                    velocity,
                    grace: false,
                },
                true,
            );
            voice.trail(rest);
        }
        Ok(advanced + held + rest)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalEvent {
    Filler { wait: u32 },
    Tempo { bpm: f64 },
    TimeSignature { numerator: u8, denominator: u8 },
}

/// Tempo and meter, shared by every channel.
#[derive(Debug, Clone, Default)]
pub struct GlobalTimeline {
    events: Vec<GlobalEvent>,
    tempo_changes: Vec<(u32, f64)>,
    position: u32,
}

impl GlobalTimeline {
    pub fn events(&self) -> &[GlobalEvent] {
        &self.events
    }

    /// `(tick, bpm)` pairs in order.
    pub fn tempo_changes(&self) -> &[(u32, f64)] {
        &self.tempo_changes
    }

    /// Move to `position`, padding with a filler, then emit.
    pub fn wrap(
        &mut self,
        offset: usize,
        position: u32,
        emit: impl FnOnce(&mut GlobalTimeline),
    ) -> Result<(), CompileError> {
        if position < self.position {
            return Err(CompileError::semantic(
                "Global variables can not intersect each other",
                offset,
            ));
        }
        if position > self.position {
            self.events.push(GlobalEvent::Filler {
                wait: position - self.position,
            });
            self.position = position;
        }
        emit(self);
        Ok(())
    }

    pub fn set_tempo(&mut self, bpm: f64) {
        self.events.push(GlobalEvent::Tempo { bpm });
        self.tempo_changes.push((self.position, bpm));
    }

    pub fn set_time_signature(&mut self, numerator: u8, denominator: u8) {
        self.events.push(GlobalEvent::TimeSignature {
            numerator,
            denominator,
        });
    }
}
