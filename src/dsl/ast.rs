//! Abstract Syntax Tree for the notation language.
//!
//! Every node carries the character offset where it starts so that semantic
//! errors can point back into the source.

/// A complete program: the ordered top-level node sequence.
pub type Program = Vec<Node>;

/// A top-level node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub offset: usize,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// `((key=value))`: tempo, time signature or fermata length.
    GlobalConfiguration { key: String, value: String },
    /// `#N` starts a fresh timeline, `#~N` resumes the latest one.
    ChannelDeclaration { id: u32, resume: bool },
    /// `{{name}} {…}`: a template containing placeholder keys.
    UdrDefinition { name: String, body: Vec<Stackable> },
    RepeatOpen,
    /// `:|` with an optional total number of passes.
    RepeatClose { count: Option<u32> },
    /// `/1` or `/2`.
    Volta(u8),
    /// `((emoji= (k=v) ))`.
    EmojiDeclaration {
        symbol: String,
        value: LocalConfiguration,
    },
    Stackable(Stackable),
}

impl Node {
    pub fn stackable(stackable: Stackable) -> Self {
        Self {
            offset: stackable.offset,
            kind: NodeKind::Stackable(stackable),
        }
    }
}

/// Anything that may appear inside groups, ranges and parallel branches.
#[derive(Debug, Clone, PartialEq)]
pub struct Stackable {
    pub offset: usize,
    pub kind: StackableKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StackableKind {
    LocalConfiguration(LocalConfiguration),
    Range(Range),
    Notation {
        grace: Option<Grace>,
        value: RestrictedNotation,
    },
    GroupDeclaration {
        key: u32,
        body: Vec<Stackable>,
    },
    GroupReference(u32),
    /// Branch 0 plays on the current timeline, the rest on child timelines.
    Parallelization(Vec<Vec<Stackable>>),
    EmojiReference(String),
    Rest,
}

/// `(key=value)`: octave, program, quantization, sustain, transpose, velocity.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalConfiguration {
    pub offset: usize,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub offset: usize,
    pub kind: RangeKind,
    pub body: Vec<Stackable>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeKind {
    OctaveUp,
    OctaveDown,
    /// N notes in the time of two.
    Tuplet(u32),
    Sustain,
    /// Invocation of a user-defined range by name.
    Udr(String),
}

/// `[>…]`: grace notes played before the main notation.
#[derive(Debug, Clone, PartialEq)]
pub struct Grace {
    pub offset: usize,
    pub items: Vec<GraceItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraceItem {
    Key(KeySet),
    Chord(ChordSet),
    Range(Range),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RestrictedNotation {
    Key(KeySet),
    Chord(ChordSet),
    Diacritic(Diacritic),
    Tie { offset: usize },
}

impl RestrictedNotation {
    pub fn offset(&self) -> usize {
        match self {
            Self::Key(k) => k.offset,
            Self::Chord(c) => c.offset,
            Self::Diacritic(d) => d.offset,
            Self::Tie { offset } => *offset,
        }
    }
}

/// A single key with its `^`/`v` prefixes and `+`/`-` suffixes folded in.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySet {
    pub offset: usize,
    pub key: Key,
    /// Net octave shift from the prefix.
    pub octave: i32,
    /// Net semitone shift from the suffix.
    pub semitones: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// A pitch class, 0 = C.
    Pitch(u8),
    /// `x`: substituted by a user-defined range invocation.
    Placeholder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChordSet {
    pub offset: usize,
    pub arpeggio: bool,
    pub keys: Vec<KeySet>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diacritic {
    pub offset: usize,
    pub kind: DiacriticKind,
    pub body: Vec<Component>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiacriticKind {
    Staccato,
    Fermata,
    Sforzando,
    Trill,
    Crescendo(u8),
    Decrescendo(u8),
    PitchBend,
}

/// An item inside a diacritic body.
#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    Item(Stackable),
    /// `(0.5)`: a pitch-bend breakpoint, only inside `<p …>`.
    Breakpoint { offset: usize, value: f64 },
}
