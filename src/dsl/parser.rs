//! Parser for the notation language.
//!
//! A character-level recursive-descent parser. The grammar has no separate
//! token layer: most constructs are a single punctuation character followed
//! by notes, so the parser reads characters directly and records each
//! node's character offset.

use super::ast::*;
use super::error::CompileError;
use super::note::pitch_class;

pub struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    pub fn parse(&mut self) -> Result<Program, CompileError> {
        let mut nodes = Vec::new();

        loop {
            self.skip_whitespace();
            if self.is_at_end() {
                break;
            }
            nodes.push(self.parse_node()?);
        }
        Ok(nodes)
    }

    fn parse_node(&mut self) -> Result<Node, CompileError> {
        let offset = self.pos;

        if self.check_str("((") {
            return if self.peek_at(2).is_some_and(is_emoji) {
                self.parse_emoji_declaration()
            } else {
                self.parse_global_configuration()
            };
        }
        if self.check_str("{{") {
            let name = self.parse_udr_name()?;
            self.skip_whitespace();
            if self.check('{') {
                self.advance();
                let body = self.parse_stackables_until('}', "user-defined range")?;
                return Ok(Node {
                    offset,
                    kind: NodeKind::UdrDefinition { name, body },
                });
            }
            // Not a definition: re-read it as an invocation.
            self.pos = offset;
            return Ok(Node::stackable(self.parse_stackable()?));
        }
        if self.check_str("|:") {
            self.pos += 2;
            return Ok(Node {
                offset,
                kind: NodeKind::RepeatOpen,
            });
        }
        if self.check_str(":|") {
            self.pos += 2;
            let count = if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                Some(self.parse_digits()?)
            } else {
                None
            };
            return Ok(Node {
                offset,
                kind: NodeKind::RepeatClose { count },
            });
        }
        if self.check_str("/1") || self.check_str("/2") {
            let ordinal = if self.peek_at(1) == Some('1') { 1 } else { 2 };
            self.pos += 2;
            return Ok(Node {
                offset,
                kind: NodeKind::Volta(ordinal),
            });
        }
        if self.check('#') {
            self.advance();
            let resume = self.check('~');
            if resume {
                self.advance();
            }
            let id = self.parse_digits()?;
            return Ok(Node {
                offset,
                kind: NodeKind::ChannelDeclaration { id, resume },
            });
        }
        Ok(Node::stackable(self.parse_stackable()?))
    }

    fn parse_global_configuration(&mut self) -> Result<Node, CompileError> {
        let offset = self.pos;
        self.expect_str("((")?;
        let key = self.parse_words()?;
        self.expect('=')?;
        let value = self.parse_words()?;
        self.expect_str("))")?;
        Ok(Node {
            offset,
            kind: NodeKind::GlobalConfiguration { key, value },
        })
    }

    fn parse_emoji_declaration(&mut self) -> Result<Node, CompileError> {
        let offset = self.pos;
        self.expect_str("((")?;
        let symbol = self.parse_emoji()?;
        self.expect('=')?;
        self.skip_whitespace();
        let value = self.parse_local_configuration()?;
        self.skip_whitespace();
        self.expect_str("))")?;
        Ok(Node {
            offset,
            kind: NodeKind::EmojiDeclaration { symbol, value },
        })
    }

    fn parse_stackable(&mut self) -> Result<Stackable, CompileError> {
        let offset = self.pos;
        let Some(ch) = self.peek() else {
            return Err(CompileError::parse("Unexpected end of input", offset));
        };

        let kind = match ch {
            '(' if self.peek_at(1).is_some_and(is_emoji) => {
                self.advance();
                let symbol = self.parse_emoji()?;
                self.expect(')')?;
                StackableKind::EmojiReference(symbol)
            }
            '(' if self.is_local_configuration() => {
                StackableKind::LocalConfiguration(self.parse_local_configuration()?)
            }
            '(' => StackableKind::Range(self.parse_range()?),
            '{' if self.check_str("{{") => StackableKind::Range(self.parse_udr_invocation()?),
            '{' if self.peek_at(1) == Some('=') => {
                self.pos += 2;
                let key = self.parse_digits()?;
                self.expect('}')?;
                StackableKind::GroupReference(key)
            }
            '{' => {
                self.advance();
                let key = self.parse_digits()?;
                let body = self.parse_stackables_until('}', "group")?;
                StackableKind::GroupDeclaration { key, body }
            }
            '[' if self.peek_at(1) == Some('[') => self.parse_parallelization()?,
            '_' | 'ㅇ' => {
                self.advance();
                StackableKind::Rest
            }
            _ => {
                let grace = if self.check_str("[>") {
                    Some(self.parse_grace()?)
                } else {
                    None
                };
                let value = self.parse_restricted_notation()?;
                StackableKind::Notation { grace, value }
            }
        };
        Ok(Stackable { offset, kind })
    }

    /// Parse stackables up to and including `close`. At least one is required.
    fn parse_stackables_until(
        &mut self,
        close: char,
        what: &str,
    ) -> Result<Vec<Stackable>, CompileError> {
        let start = self.pos;
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(c) if c == close => {
                    self.advance();
                    break;
                }
                Some(_) => items.push(self.parse_stackable()?),
                None => {
                    return Err(CompileError::parse(
                        format!("Unclosed {what}: expected '{close}'"),
                        start,
                    ))
                }
            }
        }
        if items.is_empty() {
            return Err(CompileError::parse(format!("Empty {what}"), start));
        }
        Ok(items)
    }

    fn parse_local_configuration(&mut self) -> Result<LocalConfiguration, CompileError> {
        let offset = self.pos;
        self.expect('(')?;
        let key = self.parse_words()?;
        self.expect('=')?;
        let value = self.parse_words()?;
        self.expect(')')?;
        Ok(LocalConfiguration { offset, key, value })
    }

    /// `(` followed by a word and `=`.
    fn is_local_configuration(&self) -> bool {
        let mut i = 1;
        while self.peek_at(i).is_some_and(is_word_char) {
            i += 1;
        }
        i > 1 && self.peek_at(i) == Some('=')
    }

    fn parse_range(&mut self) -> Result<Range, CompileError> {
        let offset = self.pos;
        self.expect('(')?;
        let kind = match self.peek() {
            Some('^') => RangeKind::OctaveUp,
            Some('v') => RangeKind::OctaveDown,
            Some('3') => RangeKind::Tuplet(3),
            Some('5') => RangeKind::Tuplet(5),
            Some('7') => RangeKind::Tuplet(7),
            Some('s') => RangeKind::Sustain,
            other => {
                return Err(CompileError::parse(
                    format!("Unknown range type: {}", describe(other)),
                    self.pos,
                ))
            }
        };
        self.advance();
        let body = self.parse_stackables_until(')', "range")?;
        Ok(Range { offset, kind, body })
    }

    fn parse_udr_name(&mut self) -> Result<String, CompileError> {
        self.expect_str("{{")?;
        let name = self.parse_words()?;
        self.expect_str("}}")?;
        Ok(name)
    }

    fn parse_udr_invocation(&mut self) -> Result<Range, CompileError> {
        let offset = self.pos;
        let name = self.parse_udr_name()?;
        self.skip_whitespace();
        self.expect('(')?;
        let body = self.parse_stackables_until(')', "user-defined range invocation")?;
        Ok(Range {
            offset,
            kind: RangeKind::Udr(name),
            body,
        })
    }

    fn parse_parallelization(&mut self) -> Result<StackableKind, CompileError> {
        let start = self.pos;
        self.expect_str("[[")?;
        let mut branches = Vec::new();
        let mut current = Vec::new();

        loop {
            self.skip_whitespace();
            if self.check_str("]]") {
                self.pos += 2;
                break;
            }
            match self.peek() {
                Some('|') => {
                    self.advance();
                    branches.push(std::mem::take(&mut current));
                }
                Some(_) => current.push(self.parse_stackable()?),
                None => return Err(CompileError::parse("Unclosed parallelization", start)),
            }
        }
        branches.push(current);

        if branches.len() < 2 {
            return Err(CompileError::parse("Useless parallel", start));
        }
        if branches.iter().any(Vec::is_empty) {
            return Err(CompileError::parse("Empty parallel branch", start));
        }
        Ok(StackableKind::Parallelization(branches))
    }

    fn parse_grace(&mut self) -> Result<Grace, CompileError> {
        let offset = self.pos;
        self.expect_str("[>")?;
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(']') => {
                    self.advance();
                    break;
                }
                Some('[') => items.push(GraceItem::Chord(self.parse_chord()?)),
                Some('(') => items.push(GraceItem::Range(self.parse_range()?)),
                Some('{') if self.check_str("{{") => {
                    items.push(GraceItem::Range(self.parse_udr_invocation()?))
                }
                Some(_) => items.push(GraceItem::Key(self.parse_key()?)),
                None => return Err(CompileError::parse("Unclosed grace", offset)),
            }
        }
        Ok(Grace { offset, items })
    }

    fn parse_restricted_notation(&mut self) -> Result<RestrictedNotation, CompileError> {
        let offset = self.pos;
        match self.peek() {
            Some('<') => Ok(RestrictedNotation::Diacritic(self.parse_diacritic()?)),
            Some('[') => Ok(RestrictedNotation::Chord(self.parse_chord()?)),
            Some('~') | Some('ㅡ') => {
                self.advance();
                Ok(RestrictedNotation::Tie { offset })
            }
            _ => Ok(RestrictedNotation::Key(self.parse_key()?)),
        }
    }

    fn parse_chord(&mut self) -> Result<ChordSet, CompileError> {
        let offset = self.pos;
        self.expect('[')?;
        let arpeggio = self.check('|');
        if arpeggio {
            self.advance();
        }
        let mut keys = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(']') => break,
                Some(_) => keys.push(self.parse_key()?),
                None => return Err(CompileError::parse("Unclosed chord", offset)),
            }
        }
        self.advance();
        Ok(ChordSet {
            offset,
            arpeggio,
            keys,
        })
    }

    fn parse_key(&mut self) -> Result<KeySet, CompileError> {
        let offset = self.pos;
        let mut octave = 0;
        let mut semitones = 0;

        loop {
            match self.peek() {
                Some('^') => octave += 1,
                Some('v') => octave -= 1,
                _ => break,
            }
            self.advance();
        }
        let key = match self.peek() {
            Some('x') => Key::Placeholder,
            Some(c) => match pitch_class(c) {
                Some(class) => Key::Pitch(class),
                None => {
                    return Err(CompileError::parse(
                        format!("Unexpected character: {c}"),
                        self.pos,
                    ))
                }
            },
            None => return Err(CompileError::parse("Unexpected end of input", self.pos)),
        };
        self.advance();
        loop {
            match self.peek() {
                Some('+') => semitones += 1,
                Some('-') => semitones -= 1,
                _ => break,
            }
            self.advance();
        }
        Ok(KeySet {
            offset,
            key,
            octave,
            semitones,
        })
    }

    fn parse_diacritic(&mut self) -> Result<Diacritic, CompileError> {
        let offset = self.pos;
        self.expect('<')?;
        let marker = self.peek();
        self.advance_if_some();

        let kind = match marker {
            Some('.') => DiacriticKind::Staccato,
            Some('~') => DiacriticKind::Fermata,
            Some('!') => DiacriticKind::Sforzando,
            Some('t') => DiacriticKind::Trill,
            Some('p') => DiacriticKind::PitchBend,
            Some('+') | Some('-') => {
                let (body, target) = self.parse_dynamics_body(offset)?;
                let kind = if marker == Some('+') {
                    DiacriticKind::Crescendo(target)
                } else {
                    DiacriticKind::Decrescendo(target)
                };
                return Ok(Diacritic { offset, kind, body });
            }
            other => {
                return Err(CompileError::parse(
                    format!("Unknown diacritic: {}", describe(other)),
                    offset + 1,
                ))
            }
        };
        let breakpoints = kind == DiacriticKind::PitchBend;
        let mut body = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('>') => {
                    self.advance();
                    break;
                }
                Some('(') if breakpoints && self.is_breakpoint() => {
                    body.push(self.parse_breakpoint()?)
                }
                Some(_) => body.push(Component::Item(self.parse_component()?)),
                None => return Err(CompileError::parse("Unclosed diacritic", offset)),
            }
        }
        if body.is_empty() {
            return Err(CompileError::parse("Empty diacritic", offset));
        }
        Ok(Diacritic { offset, kind, body })
    }

    /// Components followed by the target velocity, e.g. `<+ cdef 120>`.
    fn parse_dynamics_body(&mut self, offset: usize) -> Result<(Vec<Component>, u8), CompileError> {
        let mut body = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(c) if c.is_ascii_digit() => {
                    let at = self.pos;
                    let target = self.parse_digits()?;
                    self.expect('>')?;
                    let target = u8::try_from(target)
                        .ok()
                        .filter(|v| *v <= 127)
                        .ok_or_else(|| CompileError::parse("Velocity out of range", at))?;
                    if body.is_empty() {
                        return Err(CompileError::parse("Empty diacritic", offset));
                    }
                    return Ok((body, target));
                }
                Some(_) => body.push(Component::Item(self.parse_component()?)),
                None => return Err(CompileError::parse("Unclosed diacritic", offset)),
            }
        }
    }

    fn parse_component(&mut self) -> Result<Stackable, CompileError> {
        let offset = self.pos;
        let kind = match self.peek() {
            Some('{') if self.check_str("{{") => StackableKind::Range(self.parse_udr_invocation()?),
            Some('{') => {
                self.expect_str("{=")?;
                let key = self.parse_digits()?;
                self.expect('}')?;
                StackableKind::GroupReference(key)
            }
            Some('(') if self.is_local_configuration() => {
                StackableKind::LocalConfiguration(self.parse_local_configuration()?)
            }
            Some('(') => StackableKind::Range(self.parse_range()?),
            Some('_') | Some('ㅇ') => {
                self.advance();
                StackableKind::Rest
            }
            _ => StackableKind::Notation {
                grace: None,
                value: self.parse_restricted_notation()?,
            },
        };
        Ok(Stackable { offset, kind })
    }

    /// `(` followed by decimal characters and `)`.
    fn is_breakpoint(&self) -> bool {
        let mut i = 1;
        while self
            .peek_at(i)
            .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '.')
        {
            i += 1;
        }
        i > 1 && self.peek_at(i) == Some(')')
    }

    fn parse_breakpoint(&mut self) -> Result<Component, CompileError> {
        let offset = self.pos;
        self.expect('(')?;
        let mut text = String::new();
        while let Some(c) = self.peek().filter(|c| *c != ')') {
            text.push(c);
            self.advance();
        }
        self.expect(')')?;
        let value = text
            .parse::<f64>()
            .map_err(|_| CompileError::parse(format!("Malformed decimal: {text}"), offset))?;
        Ok(Component::Breakpoint { offset, value })
    }

    fn parse_words(&mut self) -> Result<String, CompileError> {
        let start = self.pos;
        let mut s = String::new();
        while let Some(c) = self.peek().filter(|c| is_word_char(*c)) {
            s.push(c);
            self.advance();
        }
        if s.is_empty() {
            return Err(CompileError::parse(
                format!("Expected a word, got {}", describe(self.peek())),
                start,
            ));
        }
        Ok(s)
    }

    fn parse_emoji(&mut self) -> Result<String, CompileError> {
        let start = self.pos;
        let mut s = String::new();
        while let Some(c) = self.peek().filter(|c| is_emoji(*c)) {
            s.push(c);
            self.advance();
        }
        if s.is_empty() {
            return Err(CompileError::parse("Expected an emoji", start));
        }
        Ok(s)
    }

    fn parse_digits(&mut self) -> Result<u32, CompileError> {
        let start = self.pos;
        let mut s = String::new();
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            s.push(c);
            self.advance();
        }
        if s.is_empty() {
            return Err(CompileError::parse(
                format!("Expected digits, got {}", describe(self.peek())),
                start,
            ));
        }
        s.parse()
            .map_err(|_| CompileError::parse(format!("Number too large: {s}"), start))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn advance_if_some(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn check(&self, c: char) -> bool {
        self.peek() == Some(c)
    }

    fn check_str(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn expect(&mut self, c: char) -> Result<(), CompileError> {
        if self.check(c) {
            self.advance();
            Ok(())
        } else {
            Err(CompileError::parse(
                format!("Expected '{c}', got {}", describe(self.peek())),
                self.pos,
            ))
        }
    }

    fn expect_str(&mut self, s: &str) -> Result<(), CompileError> {
        for c in s.chars() {
            self.expect(c)?;
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')
}

fn is_emoji(c: char) -> bool {
    c as u32 > 0xFF
}

fn describe(c: Option<char>) -> String {
    match c {
        Some(c) => format!("'{c}'"),
        None => "end of input".into(),
    }
}
