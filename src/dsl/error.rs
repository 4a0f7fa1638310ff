//! Error types for the notation compiler.

use std::fmt;

/// An error that occurred while parsing or compiling notation.
///
/// `offset` is a character offset. Inside the compiler it points into the
/// comment-stripped text; the public entry points remap it to the original
/// source before handing the error back.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub message: String,
    pub offset: usize,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The source text does not match the grammar.
    Parse,
    /// Well-formed notation that breaks a compilation rule.
    Semantic,
    /// An internal invariant was violated.
    Structural,
    /// The gas budget ran out.
    Resource,
}

impl CompileError {
    pub fn parse(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
            kind: ErrorKind::Parse,
        }
    }

    pub fn semantic(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
            kind: ErrorKind::Semantic,
        }
    }

    pub fn structural(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
            kind: ErrorKind::Structural,
        }
    }

    pub fn exhausted(offset: usize) -> Self {
        Self {
            message: "Not enough gas".into(),
            offset,
            kind: ErrorKind::Resource,
        }
    }

    /// Rewrite the offset through a stripped-to-original map.
    pub fn remap(mut self, map: &[usize]) -> Self {
        if let Some(&original) = map.get(self.offset).or(map.last()) {
            self.offset = original;
        }
        self
    }

    /// Render a short excerpt of `source` around the error offset.
    ///
    /// ```text
    ///           ↓ here
    /// #1 cde {=9} fga
    /// ```
    pub fn excerpt(&self, source: &str) -> String {
        let chars: Vec<char> = source.chars().collect();
        let from = self.offset.saturating_sub(10);
        let to = (from + 30).min(chars.len());
        let text: String = chars[from.min(to)..to]
            .iter()
            .map(|&c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        let arrow = " ".repeat(self.offset - from);

        format!("{arrow}↓ here\n{text}")
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {:?}: {}", self.offset, self.kind, self.message)
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_offset_and_kind() {
        let e = CompileError::semantic("No such group: 3", 12);
        assert_eq!(e.to_string(), "#12 Semantic: No such group: 3");
    }

    #[test]
    fn remap_uses_map_entry() {
        let e = CompileError::parse("bad", 2).remap(&[0, 5, 9, 10]);
        assert_eq!(e.offset, 9);
    }

    #[test]
    fn remap_past_end_uses_sentinel() {
        let e = CompileError::parse("bad", 40).remap(&[0, 1, 2]);
        assert_eq!(e.offset, 2);
    }

    #[test]
    fn excerpt_points_at_offset() {
        let e = CompileError::semantic("x", 3);
        let out = e.excerpt("#1 cdef");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "   ↓ here");
        assert_eq!(lines[1], "#1 cdef");
    }

    #[test]
    fn exhausted_kind() {
        assert_eq!(CompileError::exhausted(0).kind, ErrorKind::Resource);
    }
}
