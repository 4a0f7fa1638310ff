//! Comment stripping.
//!
//! `/=` comments out the rest of its line; `=/` comments out everything on
//! its line before it. The stripped text comes with a map from every
//! stripped character back to its offset in the original source.

/// Source text with comments removed.
#[derive(Debug, Clone)]
pub struct Stripped {
    pub text: String,
    /// `map[i]` is the original offset of stripped char `i`. One trailing
    /// entry maps end-of-input.
    pub map: Vec<usize>,
}

impl Stripped {
    /// Translate a stripped offset into an original offset.
    pub fn original_offset(&self, offset: usize) -> usize {
        self.map
            .get(offset)
            .or(self.map.last())
            .copied()
            .unwrap_or(offset)
    }
}

pub fn strip_comments(source: &str) -> Stripped {
    let chars: Vec<char> = source.chars().collect();
    let mut text = String::with_capacity(source.len());
    let mut map = Vec::with_capacity(chars.len() + 1);
    let mut line_start = 0;

    while line_start < chars.len() {
        let line_end = chars[line_start..]
            .iter()
            .position(|&c| c == '\n')
            .map_or(chars.len(), |p| line_start + p);
        let line = &chars[line_start..line_end];

        let mut from = 0;
        if let Some(close) = rfind_pair(line, '=', '/') {
            from = close + 2;
        }
        let to = find_pair(&line[from..], '/', '=').map_or(line.len(), |p| from + p);

        for (i, &c) in line.iter().enumerate().take(to).skip(from) {
            text.push(c);
            map.push(line_start + i);
        }
        if line_end < chars.len() {
            text.push('\n');
            map.push(line_end);
        }
        line_start = line_end + 1;
    }
    map.push(chars.len());

    Stripped { text, map }
}

fn find_pair(line: &[char], a: char, b: char) -> Option<usize> {
    line.windows(2).position(|w| w[0] == a && w[1] == b)
}

fn rfind_pair(line: &[char], a: char, b: char) -> Option<usize> {
    line.windows(2).rposition(|w| w[0] == a && w[1] == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_comments_is_identity() {
        let s = strip_comments("#1 cdef");
        assert_eq!(s.text, "#1 cdef");
        assert_eq!(s.map, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn line_comment_removed() {
        let s = strip_comments("cd /= melody\nef");
        assert_eq!(s.text, "cd \nef");
        assert_eq!(s.original_offset(4), 13);
    }

    #[test]
    fn leading_comment_removed() {
        let s = strip_comments("intro =/ga");
        assert_eq!(s.text, "ga");
        assert_eq!(s.original_offset(0), 8);
    }

    #[test]
    fn end_sentinel() {
        let s = strip_comments("c /= x");
        assert_eq!(s.original_offset(s.text.chars().count()), 6);
    }

    #[test]
    fn multibyte_offsets_are_char_based() {
        let s = strip_comments("도레 /= 미");
        assert_eq!(s.text, "도레 ");
        assert_eq!(s.original_offset(1), 1);
    }
}
