//! Raw SQL text with line bookkeeping and a literal/comment-aware bracket scanner.
//!
//! Detectors work on unparsed text. This type gives them 1-based line numbers for
//! byte offsets and tells them which bytes are real code, so that parentheses inside
//! `'string literals'`, `"quoted identifiers"`, `-- line comments` and `/* block comments */`
//! never move a depth counter.

use std::ops::Range;

pub struct SqlText<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
    non_code: Vec<Range<usize>>,
}

impl<'a> SqlText<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(idx, _)| idx + 1));

        Self { text, line_starts, non_code: scan_non_code(text.as_bytes()) }
    }

    pub fn as_str(&self) -> &'a str {
        self.text
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// 1-based line containing byte offset `offset`
    pub fn line_of(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }

    /// Byte offset where 1-based line `number` begins
    pub fn line_start(&self, number: usize) -> Option<usize> {
        self.line_starts.get(number.checked_sub(1)?).copied()
    }

    /// Text of 1-based line `number` without its terminator.
    pub fn line(&self, number: usize) -> Option<&'a str> {
        let start = *self.line_starts.get(number.checked_sub(1)?)?;
        let end = self.line_starts.get(number).map(|next| next - 1).unwrap_or(self.text.len());
        Some(self.text[start..end].trim_end_matches('\r'))
    }

    /// Lines paired with their 1-based numbers.
    pub fn lines(&self) -> impl Iterator<Item = (usize, &'a str)> + '_ {
        (1..=self.line_count()).filter_map(move |n| self.line(n).map(|line| (n, line)))
    }

    /// False for bytes inside string literals, quoted identifiers and comments.
    pub fn is_code(&self, offset: usize) -> bool {
        let idx = self.non_code.partition_point(|span| span.end <= offset);
        self.non_code.get(idx).is_none_or(|span| !span.contains(&offset))
    }

    /// Byte offset of the `)` balancing the `(` at `open`.
    ///
    /// Returns `None` when `open` is not a code `(` or the text ends before depth returns to zero.
    pub fn matching_paren(&self, open: usize) -> Option<usize> {
        let bytes = self.text.as_bytes();
        if bytes.get(open) != Some(&b'(') || !self.is_code(open) {
            return None;
        }

        let mut depth = 0usize;
        for (idx, byte) in bytes.iter().enumerate().skip(open) {
            if !self.is_code(idx) {
                continue;
            }
            match byte {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(idx);
                    }
                },
                _ => {},
            }
        }
        None
    }
}

/// A line that holds nothing but a `--` comment
pub fn is_comment_line(line: &str) -> bool {
    line.trim_start().starts_with("--")
}

fn scan_non_code(bytes: &[u8]) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let next = bytes.get(i + 1).copied();
        let end = match (bytes[i], next) {
            (b'\'', _) => skip_quoted(bytes, i, b'\''),
            (b'"', _) => skip_quoted(bytes, i, b'"'),
            (b'-', Some(b'-')) => bytes[i..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|pos| i + pos)
                .unwrap_or(bytes.len()),
            (b'/', Some(b'*')) => bytes[i + 2..]
                .windows(2)
                .position(|w| w == b"*/")
                .map(|pos| i + 2 + pos + 2)
                .unwrap_or(bytes.len()),
            _ => {
                i += 1;
                continue;
            },
        };
        spans.push(i..end);
        i = end;
    }

    spans
}

// Doubled quotes ('' or "") escape the quote character.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}
