//! Semantic evaluation of a parsed program.
//!
//! Top-level nodes are drained from a work queue; repeat replays are pushed
//! back onto its front. Groups, user-defined ranges and emoji shortcuts are
//! expanded by evaluating their bodies recursively, with the nesting depth
//! passed down as `refs`.

use std::collections::VecDeque;
use std::ops::RangeInclusive;

use tracing::{debug, trace};

use crate::dsl::ast::*;
use crate::dsl::error::CompileError;
use crate::dsl::note::{midi_pitch, parse_duration, TICKS_PER_BEAT};

use super::channel::{GlobalTimeline, Slot, TimelineId, Timelines};
use super::diacritic::{
    arpeggio_interval, substitution, Modifier, NoteDraft, Staged, DEFAULT_FERMATA, GRACE_LENGTH,
};
use super::registry::{Gas, Registry};

pub const MAX_NESTED_REFERENCES: u32 = 64;
pub const PITCH_BEND_RESOLUTION: u32 = 8;
/// Longest quantization unit, 64 beats.
pub const MAX_QUANTIZATION: u32 = TICKS_PER_BEAT * 64;
/// Timelines stop accepting material past this tick.
pub const MAX_TICKS: u32 = 1 << 27;
const MAX_FERMATA: f64 = 16.0;
const MAX_TRANSPOSE: i32 = 127;
const OCTAVES: RangeInclusive<i32> = -1..=9;
const SUSTAIN_CONTROLLER: u8 = 64;
const MAX_CHANNEL: u32 = 16;

/// Mutable state of one compilation run.
#[derive(Debug, Clone)]
pub struct Session {
    registry: Registry,
    gas: Gas,
    timelines: Timelines,
    /// Top-level timelines in creation order.
    channels: Vec<TimelineId>,
    global: GlobalTimeline,
    fermata: f64,
    modifiers: Vec<Modifier>,
    pending_grace: Option<(usize, Vec<Vec<u8>>)>,
    /// Earliest and latest note onset committed so far.
    onsets: Option<(u32, u32)>,
    /// Set on the throwaway copy that measures a dynamics span.
    measuring: bool,
}

impl Session {
    pub fn new(gas: u64) -> Self {
        Self {
            registry: Registry::default(),
            gas: Gas::new(gas),
            timelines: Timelines::default(),
            channels: Vec::new(),
            global: GlobalTimeline::default(),
            fermata: DEFAULT_FERMATA,
            modifiers: Vec::new(),
            pending_grace: None,
            onsets: None,
            measuring: false,
        }
    }

    pub fn timelines(&self) -> &Timelines {
        &self.timelines
    }

    pub fn channels(&self) -> &[TimelineId] {
        &self.channels
    }

    pub fn global(&self) -> &GlobalTimeline {
        &self.global
    }

    pub fn gas(&self) -> u64 {
        self.gas.remaining()
    }

    pub fn run(&mut self, program: &[Node]) -> Result<(), CompileError> {
        let mut queue: VecDeque<(Node, bool)> =
            program.iter().cloned().map(|node| (node, false)).collect();
        let mut active: Option<TimelineId> = None;

        while let Some((node, replayed)) = queue.pop_front() {
            if !matches!(node.kind, NodeKind::Stackable(_)) {
                self.burn(node.offset)?;
            }
            if !replayed && node.kind != NodeKind::Volta(2) {
                if let Some(at) = active {
                    self.timelines[at].expire_seconda_volta();
                }
            }
            match &node.kind {
                NodeKind::Stackable(stackable) => {
                    let at = self.activate(&mut active);
                    self.evaluate(at, stackable, 0)?;
                }
                NodeKind::ChannelDeclaration { id, resume } => {
                    if let Some(previous) = active {
                        self.timelines[previous].ensure_repeat_closed()?;
                    }
                    active = Some(self.declare_channel(node.offset, *id, *resume)?);
                }
                NodeKind::GlobalConfiguration { key, value } => {
                    self.global_configuration(active, node.offset, key, value)?;
                }
                NodeKind::UdrDefinition { name, body } => {
                    self.registry.define_udr(name, body, node.offset)?;
                    debug!(name = name.as_str(), "defined user range");
                }
                NodeKind::EmojiDeclaration { symbol, value } => {
                    self.registry.declare_emoji(symbol, value, node.offset)?;
                    debug!(symbol = symbol.as_str(), "declared emoji");
                }
                NodeKind::RepeatOpen => {
                    let at = self.activate(&mut active);
                    self.timelines[at].repeat_open(node.offset)?;
                }
                NodeKind::RepeatClose { count } => {
                    let at = self.activate(&mut active);
                    let budget = self.gas.remaining();
                    let replay = self.timelines[at].repeat_close(node.offset, *count, budget)?;
                    debug!(nodes = replay.len(), "replaying repeat");
                    for replayed in replay.into_iter().rev() {
                        queue.push_front((replayed, true));
                    }
                }
                NodeKind::Volta(ordinal) => {
                    let at = self.activate(&mut active);
                    self.timelines[at].volta(node.offset, *ordinal)?;
                }
            }
            if !replayed {
                if let Some(at) = active {
                    self.timelines[at].add_snapshot(&node);
                }
            }
        }

        if let Some(at) = active {
            self.timelines[at].ensure_repeat_closed()?;
        }
        Ok(())
    }

    fn burn(&mut self, offset: usize) -> Result<(), CompileError> {
        let burnt = self.gas.consume(offset);
        if burnt.is_err() {
            debug!(offset, "gas exhausted");
        }
        burnt
    }

    fn activate(&mut self, active: &mut Option<TimelineId>) -> TimelineId {
        *active.get_or_insert_with(|| {
            debug!("no channel declared, starting channel 1");
            let at = self.timelines.create(1);
            self.channels.push(at);
            at
        })
    }

    fn declare_channel(
        &mut self,
        offset: usize,
        id: u32,
        resume: bool,
    ) -> Result<TimelineId, CompileError> {
        if !(1..=MAX_CHANNEL).contains(&id) {
            return Err(CompileError::semantic(
                format!("Invalid channel ID: {id}"),
                offset,
            ));
        }
        let channel = id as u8;
        if resume {
            let at = self
                .channels
                .iter()
                .rev()
                .copied()
                .find(|&at| self.timelines[at].channel() == channel)
                .ok_or_else(|| CompileError::semantic(format!("No such channel: {id}"), offset))?;
            debug!(channel, "resuming channel");
            return Ok(at);
        }
        let at = self.timelines.create(channel);
        self.channels.push(at);
        debug!(channel, track = self.channels.len(), "starting channel");
        Ok(at)
    }

    fn global_configuration(
        &mut self,
        active: Option<TimelineId>,
        offset: usize,
        key: &str,
        value: &str,
    ) -> Result<(), CompileError> {
        let malformed = || {
            CompileError::semantic(
                format!("Malformed global configuration: (({key}={value}))"),
                offset,
            )
        };
        match key {
            "bpm" => {
                let bpm = value
                    .parse::<f64>()
                    .ok()
                    .filter(|b| b.is_finite() && *b > 0.0)
                    .ok_or_else(malformed)?;
                self.emit_global(active, offset, |global| global.set_tempo(bpm))
            }
            "time-sig" => {
                let (numerator, denominator) = value.split_once('/').ok_or_else(malformed)?;
                let numerator = numerator
                    .parse::<u8>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(malformed)?;
                let denominator = denominator
                    .parse::<u8>()
                    .ok()
                    .filter(|d| d.is_power_of_two())
                    .ok_or_else(malformed)?;
                self.emit_global(active, offset, |global| {
                    global.set_time_signature(numerator, denominator)
                })
            }
            "fermata" => {
                self.fermata = value
                    .parse::<f64>()
                    .ok()
                    .filter(|f| *f > 0.0 && *f <= MAX_FERMATA)
                    .ok_or_else(malformed)?;
                Ok(())
            }
            other => Err(CompileError::semantic(
                format!("Unknown global configuration: {other}"),
                offset,
            )),
        }
    }

    fn emit_global(
        &mut self,
        active: Option<TimelineId>,
        offset: usize,
        emit: impl FnOnce(&mut GlobalTimeline),
    ) -> Result<(), CompileError> {
        match active {
            Some(at) => self.timelines[at].wrap_global_configuration(offset, &mut self.global, emit),
            None => self.global.wrap(offset, 0, emit),
        }
    }

    fn evaluate_all(
        &mut self,
        at: TimelineId,
        items: &[Stackable],
        refs: u32,
    ) -> Result<u32, CompileError> {
        let mut ticks = 0;
        for item in items {
            ticks += self.evaluate(at, item, refs)?;
        }
        Ok(ticks)
    }

    /// Evaluate one stackable and return the ticks it advanced.
    fn evaluate(&mut self, at: TimelineId, item: &Stackable, refs: u32) -> Result<u32, CompileError> {
        self.burn(item.offset)?;
        if self.timelines[at].position() > MAX_TICKS {
            return Err(CompileError::semantic("Song is too long", item.offset));
        }
        match &item.kind {
            StackableKind::LocalConfiguration(configuration) => {
                self.local_configuration(at, configuration, item.offset)?;
                Ok(0)
            }
            StackableKind::Range(range) => self.range(at, range, refs),
            StackableKind::Notation { grace, value } => {
                self.notation(at, grace.as_ref(), value, refs)
            }
            StackableKind::GroupDeclaration { key, body } => {
                self.registry.declare_group(*key, body, item.offset)?;
                debug!(key, "declared group");
                self.evaluate_all(at, body, refs)
            }
            StackableKind::GroupReference(key) => {
                let refs = nested(refs, item.offset)?;
                let body = self.registry.group(*key, item.offset)?.to_vec();
                self.evaluate_all(at, &body, refs)
            }
            StackableKind::Parallelization(branches) => {
                self.parallelize(at, item.offset, branches, refs)
            }
            StackableKind::EmojiReference(symbol) => {
                let configuration = self.registry.emoji(symbol, item.offset)?.clone();
                self.local_configuration(at, &configuration, item.offset)?;
                Ok(0)
            }
            StackableKind::Rest => Ok(self.timelines[at].rest(None, false)),
        }
    }

    fn local_configuration(
        &mut self,
        at: TimelineId,
        configuration: &LocalConfiguration,
        offset: usize,
    ) -> Result<(), CompileError> {
        let LocalConfiguration { key, value, .. } = configuration;
        let malformed = || {
            CompileError::semantic(
                format!("Malformed local configuration: ({key}={value})"),
                offset,
            )
        };
        let timeline = &mut self.timelines[at];

        match key.as_str() {
            "o" => {
                timeline.state.octave = value
                    .parse()
                    .ok()
                    .filter(|o| OCTAVES.contains(o))
                    .ok_or_else(malformed)?
            }
            "p" => {
                let (program, bank) = match value.split_once('/') {
                    Some((program, bank)) => (program, Some(bank)),
                    None => (value.as_str(), None),
                };
                let program = parse_u7(program).ok_or_else(malformed)?;
                let bank = bank
                    .map(|b| parse_u7(b).ok_or_else(malformed))
                    .transpose()?;
                timeline.set_instrument(program, bank);
            }
            "q" => {
                if timeline.in_tuplet() {
                    return Err(CompileError::semantic(
                        "Quantization can not change inside a tuplet",
                        offset,
                    ));
                }
                timeline.state.quantization = parse_duration(value)
                    .filter(|q| (1..=MAX_QUANTIZATION).contains(q))
                    .ok_or_else(malformed)?;
            }
            "s" => {
                let pedal = parse_u7(value).ok_or_else(malformed)?;
                timeline.set_controller(SUSTAIN_CONTROLLER, pedal);
            }
            "t" => {
                timeline.state.transpose = value
                    .parse::<i32>()
                    .ok()
                    .filter(|t| t.abs() <= MAX_TRANSPOSE)
                    .ok_or_else(malformed)?
            }
            "v" => timeline.state.velocity = parse_u7(value).ok_or_else(malformed)?,
            other => {
                return Err(CompileError::semantic(
                    format!("Unknown local configuration: {other}"),
                    offset,
                ))
            }
        }
        Ok(())
    }

    fn range(&mut self, at: TimelineId, range: &Range, refs: u32) -> Result<u32, CompileError> {
        match &range.kind {
            RangeKind::OctaveUp | RangeKind::OctaveDown => {
                let shift = if range.kind == RangeKind::OctaveUp { 1 } else { -1 };
                self.timelines[at].state.octave += shift;
                let ticks = self.evaluate_all(at, &range.body, refs)?;
                self.timelines[at].state.octave -= shift;
                Ok(ticks)
            }
            RangeKind::Tuplet(size) => {
                let original = self.timelines[at].begin_tuplet(range.offset, *size)?;
                let ticks = self.evaluate_all(at, &range.body, refs)?;
                self.timelines[at].end_tuplet(original);
                Ok(ticks)
            }
            RangeKind::Sustain => {
                self.timelines[at].set_controller(SUSTAIN_CONTROLLER, 127);
                let ticks = self.evaluate_all(at, &range.body, refs)?;
                self.timelines[at].set_controller(SUSTAIN_CONTROLLER, 0);
                Ok(ticks)
            }
            RangeKind::Udr(name) => self.invoke(at, range, name, refs),
        }
    }

    /// Play a user-defined range once per invoking key.
    fn invoke(
        &mut self,
        at: TimelineId,
        range: &Range,
        name: &str,
        refs: u32,
    ) -> Result<u32, CompileError> {
        let template = self.registry.udr(name, range.offset)?.to_vec();
        let refs = nested(refs, range.offset)?;
        let mut ticks = 0;

        for item in &range.body {
            match &item.kind {
                StackableKind::Notation {
                    grace: None,
                    value: RestrictedNotation::Key(key),
                } => {
                    self.burn(item.offset)?;
                    let base = self.key_pitch(at, key)?;
                    let octave = self.timelines[at].state.octave;
                    self.modifiers.push(Modifier::Substitute { base, octave });
                    ticks += self.evaluate_all(at, &template, refs)?;
                    self.modifiers.pop();
                }
                StackableKind::LocalConfiguration(_) | StackableKind::Rest => {
                    ticks += self.evaluate(at, item, refs)?;
                }
                _ => {
                    return Err(CompileError::semantic(
                        format!("User range {name} can only be invoked with single keys"),
                        item.offset,
                    ))
                }
            }
        }
        Ok(ticks)
    }

    fn key_pitch(&self, at: TimelineId, key: &KeySet) -> Result<u8, CompileError> {
        let state = &self.timelines[at].state;
        let pitch = match key.key {
            Key::Pitch(class) => midi_pitch(
                state.octave + key.octave,
                class,
                state.transpose + key.semitones,
            ),
            Key::Placeholder => {
                let (base, octave) = substitution(&self.modifiers).ok_or_else(|| {
                    CompileError::structural("Unresolved placeholder pitch", key.offset)
                })?;
                let shift = 12 * (key.octave + state.octave - octave) + key.semitones;
                u8::try_from(base as i32 + shift).ok().filter(|p| *p <= 127)
            }
        };
        pitch.ok_or_else(|| CompileError::semantic("Pitch out of range", key.offset))
    }

    fn chord_pitches(
        &self,
        at: TimelineId,
        chord: &ChordSet,
        octave: i32,
    ) -> Result<Vec<u8>, CompileError> {
        if chord.keys.is_empty() {
            return Err(CompileError::semantic("Empty chord", chord.offset));
        }
        chord
            .keys
            .iter()
            .map(|key| self.key_pitch(at, &shifted(key, octave)))
            .collect()
    }

    fn notation(
        &mut self,
        at: TimelineId,
        grace: Option<&Grace>,
        value: &RestrictedNotation,
        refs: u32,
    ) -> Result<u32, CompileError> {
        if let Some(grace) = grace {
            if matches!(value, RestrictedNotation::Tie { .. }) {
                return Err(CompileError::semantic(
                    "Grace notes can not decorate a tie",
                    grace.offset,
                ));
            }
            let pitches = self.grace_pitches(at, grace)?;
            self.pending_grace = Some((grace.offset, pitches));
        }

        let ticks = match value {
            RestrictedNotation::Key(key) => {
                let pitch = self.key_pitch(at, key)?;
                self.commit(at, key.offset, vec![pitch], false)?
            }
            RestrictedNotation::Chord(chord) => {
                let pitches = self.chord_pitches(at, chord, 0)?;
                self.commit(at, chord.offset, pitches, chord.arpeggio)?
            }
            RestrictedNotation::Diacritic(diacritic) => self.diacritic(at, diacritic, refs)?,
            RestrictedNotation::Tie { offset } => self.timelines.tie(at, *offset)?,
        };

        if let Some((offset, _)) = self.pending_grace.take() {
            return Err(CompileError::semantic(
                "Grace notes have nothing to decorate",
                offset,
            ));
        }
        Ok(ticks)
    }

    fn grace_pitches(&self, at: TimelineId, grace: &Grace) -> Result<Vec<Vec<u8>>, CompileError> {
        let mut out = Vec::new();
        for item in &grace.items {
            match item {
                GraceItem::Key(key) => out.push(vec![self.key_pitch(at, key)?]),
                GraceItem::Chord(chord) => out.push(self.chord_pitches(at, chord, 0)?),
                GraceItem::Range(range) => self.grace_range(at, range, 0, &mut out)?,
            }
        }
        if out.is_empty() {
            return Err(CompileError::semantic("Empty grace", grace.offset));
        }
        Ok(out)
    }

    /// Graces accept octave ranges only.
    fn grace_range(
        &self,
        at: TimelineId,
        range: &Range,
        octave: i32,
        out: &mut Vec<Vec<u8>>,
    ) -> Result<(), CompileError> {
        let octave = match range.kind {
            RangeKind::OctaveUp => octave + 1,
            RangeKind::OctaveDown => octave - 1,
            _ => {
                return Err(CompileError::semantic(
                    "Only octave ranges can appear in grace notes",
                    range.offset,
                ))
            }
        };
        for item in &range.body {
            match &item.kind {
                StackableKind::Notation {
                    grace: None,
                    value: RestrictedNotation::Key(key),
                } => out.push(vec![self.key_pitch(at, &shifted(key, octave))?]),
                StackableKind::Notation {
                    grace: None,
                    value: RestrictedNotation::Chord(chord),
                } => out.push(self.chord_pitches(at, chord, octave)?),
                StackableKind::Range(inner) => self.grace_range(at, inner, octave, out)?,
                _ => {
                    return Err(CompileError::semantic(
                        "Grace notes can only contain keys and chords",
                        item.offset,
                    ))
                }
            }
        }
        Ok(())
    }

    /// Stage a key or chord, run it through the modifier stack and commit.
    fn commit(
        &mut self,
        at: TimelineId,
        offset: usize,
        pitches: Vec<u8>,
        arpeggio: bool,
    ) -> Result<u32, CompileError> {
        let timeline = &self.timelines[at];
        let velocity = timeline.state.velocity;
        let onset = timeline.position();
        let mut duration = timeline.state.quantization;
        let mut staged = Staged::default();

        if let Some((grace_offset, graces)) = self.pending_grace.take() {
            let length = GRACE_LENGTH * graces.len() as u32;
            if length >= duration {
                return Err(CompileError::semantic(
                    "Grace notes are longer than the note",
                    grace_offset,
                ));
            }
            duration -= length;
            staged
                .notes
                .extend(graces.into_iter().map(|pitches| NoteDraft {
                    pitches,
                    duration: GRACE_LENGTH,
                    velocity,
                    grace: true,
                }));
        }
        staged.notes.push(NoteDraft {
            pitches,
            duration,
            velocity,
            grace: false,
        });

        for modifier in self.modifiers.iter().rev() {
            modifier.apply(&mut staged, onset);
        }
        for tick in staged.onsets(onset) {
            self.onsets = Some(match self.onsets {
                Some((first, last)) => (first.min(tick), last.max(tick)),
                None => (tick, tick),
            });
        }

        if arpeggio {
            let interval = arpeggio_interval(&self.modifiers);
            self.timelines.commit_arpeggio(at, offset, staged, interval)
        } else {
            Ok(self.timelines[at].commit(offset, staged))
        }
    }

    fn diacritic(
        &mut self,
        at: TimelineId,
        diacritic: &Diacritic,
        refs: u32,
    ) -> Result<u32, CompileError> {
        let modifier = match diacritic.kind {
            DiacriticKind::Staccato => Modifier::Staccato,
            DiacriticKind::Fermata => Modifier::Fermata {
                factor: self.fermata,
            },
            DiacriticKind::Sforzando => Modifier::Sforzando,
            DiacriticKind::Trill => Modifier::Trill,
            DiacriticKind::Crescendo(target) | DiacriticKind::Decrescendo(target) => {
                return self.dynamics(at, diacritic, target, refs)
            }
            DiacriticKind::PitchBend => return self.pitch_bend(at, diacritic, refs),
        };
        self.modifiers.push(modifier);
        let ticks = self.evaluate_components(at, &diacritic.body, refs)?;
        self.modifiers.pop();
        Ok(ticks)
    }

    fn evaluate_components(
        &mut self,
        at: TimelineId,
        body: &[Component],
        refs: u32,
    ) -> Result<u32, CompileError> {
        let mut ticks = 0;
        for component in body {
            match component {
                Component::Item(item) => ticks += self.evaluate(at, item, refs)?,
                Component::Breakpoint { offset, .. } => {
                    return Err(CompileError::structural(
                        "Breakpoint outside of a pitch bend",
                        *offset,
                    ))
                }
            }
        }
        Ok(ticks)
    }

    /// Crescendo or decrescendo.
    ///
    /// The body is first played on a throwaway copy of the session to find
    /// where its notes start; the real pass then ramps velocity across that
    /// span. The copy's gas is discarded, so the body is paid for once.
    fn dynamics(
        &mut self,
        at: TimelineId,
        diacritic: &Diacritic,
        target: u8,
        refs: u32,
    ) -> Result<u32, CompileError> {
        let from = self.timelines[at].state.velocity;
        let crescendo = matches!(diacritic.kind, DiacriticKind::Crescendo(_));
        let useless = if crescendo {
            target <= from
        } else {
            target >= from
        };
        if useless {
            let what = if crescendo { "crescendo" } else { "decrescendo" };
            return Err(CompileError::semantic(
                format!("Useless {what}: {from} to {target}"),
                diacritic.offset,
            ));
        }

        if self.measuring {
            // Only onsets matter here, and velocity does not move them.
            let ticks = self.evaluate_components(at, &diacritic.body, refs)?;
            self.timelines[at].state.velocity = target;
            return Ok(ticks);
        }

        let mut measure = self.clone();
        measure.onsets = None;
        measure.measuring = true;
        measure.evaluate_components(at, &diacritic.body, refs)?;
        let Some((first, last)) = measure.onsets else {
            return Err(CompileError::semantic(
                "Dynamics without any note",
                diacritic.offset,
            ));
        };
        trace!(from, target, first, last, "velocity ramp");

        self.modifiers.push(Modifier::Dynamics {
            from,
            to: target,
            first,
            last,
        });
        let ticks = self.evaluate_components(at, &diacritic.body, refs)?;
        self.modifiers.pop();
        self.timelines[at].state.velocity = target;
        Ok(ticks)
    }

    /// Piecewise-linear pitch bend between breakpoints, sampled every
    /// [`PITCH_BEND_RESOLUTION`] ticks and reset to neutral at the end.
    fn pitch_bend(
        &mut self,
        at: TimelineId,
        diacritic: &Diacritic,
        refs: u32,
    ) -> Result<u32, CompileError> {
        let mut ticks = 0;
        let mut value = 0.0;
        let mut segment_start = self.timelines[at].position();

        for component in &diacritic.body {
            match component {
                Component::Item(item) => ticks += self.evaluate(at, item, refs)?,
                Component::Breakpoint { value: target, .. } => {
                    let target = target.clamp(-1.0, 1.0);
                    let timeline = &mut self.timelines[at];
                    let segment_end = timeline.position();
                    let span = segment_end - segment_start;
                    for tick in (0..span).step_by(PITCH_BEND_RESOLUTION as usize) {
                        let bend = value + (target - value) * tick as f64 / span as f64;
                        timeline.add_pitch_bend(segment_start + tick, bend);
                    }
                    timeline.add_pitch_bend(segment_end, target);
                    value = target;
                    segment_start = segment_end;
                }
            }
        }
        let timeline = &mut self.timelines[at];
        let end = timeline.position();
        timeline.add_pitch_bend(end, 0.0);
        Ok(ticks)
    }

    /// Branch 0 plays on `at`, every other branch on a child timeline. All
    /// branches must last exactly as long.
    fn parallelize(
        &mut self,
        at: TimelineId,
        offset: usize,
        branches: &[Vec<Stackable>],
        refs: u32,
    ) -> Result<u32, CompileError> {
        let Some((first, rest)) = branches.split_first() else {
            return Ok(0);
        };
        let base = self.timelines[at].reserve_branches(rest.len());
        let children = (0..rest.len())
            .map(|i| self.timelines.child_at(at, offset, Slot::Branch(base + i)))
            .collect::<Result<Vec<_>, _>>()?;

        let expected = self.evaluate_all(at, first, refs)?;
        self.timelines[at].release_branches(base);

        for (branch, child) in rest.iter().zip(children) {
            let registry = self.registry.clone();
            let fermata = self.fermata;
            let ticks = self.evaluate_all(child, branch, refs)?;
            self.registry = registry;
            self.fermata = fermata;
            if ticks != expected {
                return Err(CompileError::semantic(
                    format!("Parallel branches differ in length: {expected} and {ticks} ticks"),
                    offset,
                ));
            }
        }
        Ok(expected)
    }
}

fn nested(refs: u32, offset: usize) -> Result<u32, CompileError> {
    if refs >= MAX_NESTED_REFERENCES {
        return Err(CompileError::semantic("Too many nested references", offset));
    }
    Ok(refs + 1)
}

fn shifted(key: &KeySet, octave: i32) -> KeySet {
    KeySet {
        octave: key.octave + octave,
        ..key.clone()
    }
}

fn parse_u7(value: &str) -> Option<u8> {
    value.parse::<u8>().ok().filter(|v| *v <= 127)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::channel::ChannelEvent;
    use crate::dsl::parse_source;

    fn run(source: &str) -> Result<Session, CompileError> {
        let (program, _) = parse_source(source)?;
        let mut session = Session::new(100_000);
        session.run(&program)?;
        Ok(session)
    }

    fn notes(session: &Session, track: usize) -> Vec<(Vec<u8>, u32, u32)> {
        let at = session.channels()[track];
        session.timelines()[at]
            .notes()
            .map(|n| (n.pitches.clone(), n.start, n.duration))
            .collect()
    }

    #[test]
    fn quantized_notes_are_contiguous() {
        let s = run("#1 (q=8) cdef").unwrap();
        let n = notes(&s, 0);
        assert_eq!(
            n,
            vec![
                (vec![60], 0, 64),
                (vec![62], 64, 64),
                (vec![64], 128, 64),
                (vec![65], 192, 64)
            ]
        );
    }

    #[test]
    fn stackables_without_channel_use_channel_one() {
        let s = run("cd").unwrap();
        let at = s.channels()[0];
        assert_eq!(s.timelines()[at].channel(), 1);
    }

    #[test]
    fn invalid_channel() {
        assert!(run("#17 c").is_err());
        assert!(run("#0 c").is_err());
    }

    #[test]
    fn resume_unknown_channel() {
        let err = run("#1 c #~2 d").unwrap_err();
        assert_eq!(err.message, "No such channel: 2");
    }

    #[test]
    fn resume_continues_latest_timeline() {
        let s = run("#1 c #2 d #~1 e").unwrap();
        assert_eq!(s.channels().len(), 2);
        assert_eq!(notes(&s, 0).len(), 2);
        assert_eq!(notes(&s, 0)[1].1, 32);
    }

    #[test]
    fn octave_range_restores() {
        let s = run("(^c)c").unwrap();
        let pitches: Vec<u8> = notes(&s, 0).iter().map(|n| n.0[0]).collect();
        assert_eq!(pitches, vec![72, 60]);
    }

    #[test]
    fn group_reference_replays_body() {
        let s = run("{1 cd} {=1}").unwrap();
        assert_eq!(notes(&s, 0).len(), 4);
    }

    #[test]
    fn unknown_group_reports_reference_offset() {
        let err = run("cd {=4}").unwrap_err();
        assert_eq!(err.message, "No such group: 4");
        assert_eq!(err.offset, 3);
    }

    #[test]
    fn self_reference_is_bounded() {
        let err = run("{1 c {=1}}").unwrap_err();
        assert_eq!(err.message, "Too many nested references");
    }

    #[test]
    fn udr_substitutes_placeholder() {
        let s = run("{{up}} {x ^x} {{up}} (c e)").unwrap();
        let pitches: Vec<u8> = notes(&s, 0).iter().map(|n| n.0[0]).collect();
        assert_eq!(pitches, vec![60, 72, 64, 76]);
    }

    #[test]
    fn placeholder_outside_udr_is_structural() {
        let err = run("x").unwrap_err();
        assert_eq!(err.kind, crate::dsl::ErrorKind::Structural);
    }

    #[test]
    fn emoji_sets_program() {
        let s = run("(🎻)c").unwrap();
        let at = s.channels()[0];
        assert!(s.timelines()[at].events().iter().any(|e| matches!(
            e,
            ChannelEvent::Program {
                program: 40,
                bank: None
            }
        )));
    }

    #[test]
    fn grace_takes_from_main_note() {
        let s = run("(q=4) [>d]c").unwrap();
        assert_eq!(notes(&s, 0), vec![(vec![62], 0, 8), (vec![60], 8, 120)]);
    }

    #[test]
    fn grace_longer_than_note() {
        let err = run("(q=T16) [>de]c").unwrap_err();
        assert_eq!(err.message, "Grace notes are longer than the note");
    }

    #[test]
    fn arpeggio_onsets() {
        let s = run("(q=4) [|ceg]").unwrap();
        let at = s.channels()[0];
        let voices = s.timelines()[at].voices();
        let onsets: Vec<u32> = voices
            .iter()
            .map(|&v| s.timelines()[v].notes().next().unwrap().start)
            .collect();
        assert_eq!(onsets, vec![0, 8, 16]);
        assert_eq!(s.timelines()[at].position(), 128);
    }

    #[test]
    fn staccato_arpeggio_uses_short_interval() {
        let s = run("(q=4) <. [|ceg]>").unwrap();
        let at = s.channels()[0];
        let onsets: Vec<u32> = s.timelines()[at]
            .voices()
            .iter()
            .map(|&v| s.timelines()[v].notes().next().unwrap().start)
            .collect();
        assert_eq!(onsets, vec![0, 4, 8]);
    }

    #[test]
    fn parallel_branches_must_match() {
        let err = run("[[cd|e]]").unwrap_err();
        assert!(err.message.starts_with("Parallel branches differ"));
        assert!(run("[[cd|e_]]").is_ok());
    }

    #[test]
    fn nested_parallel_uses_separate_children() {
        let s = run("[[ [[c|d]] | e ]] f").unwrap();
        let at = s.channels()[0];
        let children = s.timelines()[at].children();
        assert_eq!(children.len(), 2);
        let starts: Vec<u32> = children
            .iter()
            .map(|&c| s.timelines()[c].notes().next().unwrap().start)
            .collect();
        assert_eq!(starts, vec![0, 0]);
    }

    #[test]
    fn crescendo_ramps_to_target() {
        let s = run("(v=40) <+ cdef 100> g").unwrap();
        let at = s.channels()[0];
        let velocities: Vec<u8> = s.timelines()[at].notes().map(|n| n.velocity).collect();
        assert_eq!(velocities, vec![40, 60, 80, 100, 100]);
    }

    #[test]
    fn useless_decrescendo() {
        let err = run("(v=40) <- cd 60>").unwrap_err();
        assert!(err.message.starts_with("Useless decrescendo"));
    }

    #[test]
    fn pitch_bend_resets() {
        let s = run("<p c (1) >").unwrap();
        let at = s.channels()[0];
        let bends = s.timelines()[at].pitch_bends();
        assert_eq!(bends.first(), Some(&(0, 0.0)));
        assert_eq!(bends.last(), Some(&(32, 0.0)));
        assert!(bends.contains(&(16, 0.5)));
    }

    #[test]
    fn repeat_plays_twice() {
        let s = run("|: cd :|").unwrap();
        assert_eq!(notes(&s, 0).len(), 4);
    }

    #[test]
    fn volta_endings() {
        let s = run("|: c /1 d :| /2 e").unwrap();
        let pitches: Vec<u8> = notes(&s, 0).iter().map(|n| n.0[0]).collect();
        assert_eq!(pitches, vec![60, 62, 60, 64]);
    }

    #[test]
    fn seconda_volta_must_follow_its_close() {
        let err = run("|: c /1 d :| e f g /2 a").unwrap_err();
        assert_eq!(err.message, "Unexpected seconda volta");
        assert_eq!(err.offset, 19);
    }

    #[test]
    fn unclosed_repeat() {
        let err = run("c |: d").unwrap_err();
        assert_eq!(err.message, "Incomplete repeat");
        assert_eq!(err.offset, 2);
    }

    #[test]
    fn tuplet_rejects_quantization_change() {
        assert!(run("(3 c (q=8) d)").is_err());
    }

    #[test]
    fn gas_exhaustion() {
        let (program, _) = parse_source("{1 c {=1}}").unwrap();
        let mut session = Session::new(50);
        let err = session.run(&program).unwrap_err();
        assert_eq!(err.kind, crate::dsl::ErrorKind::Resource);
    }

    #[test]
    fn huge_repeat_fails_on_gas_before_replaying() {
        let (program, _) = parse_source("|: c :|4000000000").unwrap();
        let mut session = Session::new(50);
        let err = session.run(&program).unwrap_err();
        assert_eq!(err.kind, crate::dsl::ErrorKind::Resource);
        assert_eq!(err.offset, 5);
    }

    #[test]
    fn dynamics_body_is_paid_for_once() {
        let budget = |source: &str, gas: u64| {
            let (program, _) = parse_source(source).unwrap();
            Session::new(gas).run(&program).is_ok()
        };
        // One unit each for the configuration, the diacritic and four keys.
        assert!(budget("(v=40) <+ cdef 100>", 7));
        assert!(!budget("(v=40) <+ cdef 100>", 6));
        assert!(budget("(v=40) <! cdef>", 7));
    }

    #[test]
    fn nested_dynamics_still_ramp() {
        let s = run("(q=8) <+ c <- de 60> f 100>").unwrap();
        let velocities: Vec<u8> = s.timelines()[s.channels()[0]]
            .notes()
            .map(|n| n.velocity)
            .collect();
        assert_eq!(velocities[0], 80);
        assert_eq!(velocities[3], 100);
    }

    #[test]
    fn out_of_range_configuration_is_malformed() {
        for source in [
            "(o=2147483647) (^c)",
            "(o=10) c",
            "(t=200) c",
            "(q=T3000000000) (3 c)",
            "((fermata=1000)) <~c>",
        ] {
            let err = run(source).unwrap_err();
            assert!(err.message.starts_with("Malformed"), "{source}: {err}");
        }
        assert!(run("(o=-1) (t=127) (q=T8192) c").is_ok());
        assert_eq!(
            run("(o=9) (t=-127) c").unwrap_err().message,
            "Pitch out of range"
        );
    }

    #[test]
    fn overlong_song_is_rejected() {
        let err = run("((fermata=16)) (q=T8192) |: <~c> :|1100").unwrap_err();
        assert_eq!(err.message, "Song is too long");
    }

    #[test]
    fn global_configuration_behind_timeline() {
        assert!(run("#1 cdef #2 c ((bpm=90))").is_ok());
        let err = run("#1 cdef ((bpm=90)) #2 c ((bpm=100))").unwrap_err();
        assert_eq!(err.message, "Global variables can not intersect each other");
    }
}
