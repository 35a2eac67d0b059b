//! Fragment extraction strategies.
//!
//! A token source yields raw deltas. Before they reach the segmenter they go
//! through one of two strategies:
//!
//! - **plain**: deltas are dialogue text, minus any `<think>…</think>`
//!   reasoning blocks;
//! - **structured**: deltas build a JSON object and only the string value of
//!   one field (e.g. `response`) is dialogue.

use crate::config::{ExtractionMode, SourceConfig};

/// Turns raw deltas into dialogue text.
#[derive(Debug, Clone)]
pub enum FragmentExtractor {
    Plain(ThinkTagStripper),
    Structured(StructuredFieldExtractor),
}

impl FragmentExtractor {
    pub fn new(config: &SourceConfig) -> Self {
        match config.extraction {
            ExtractionMode::Plain => Self::Plain(ThinkTagStripper::default()),
            ExtractionMode::Structured => {
                Self::Structured(StructuredFieldExtractor::new(&config.structured_field))
            }
        }
    }

    /// Feed one delta and return newly visible dialogue text.
    pub fn push(&mut self, delta: &str) -> String {
        match self {
            Self::Plain(stripper) => stripper.push(delta),
            Self::Structured(extractor) => extractor.push(delta),
        }
    }

    /// Flush held-back text at end of stream.
    pub fn finish(&mut self) -> String {
        match self {
            Self::Plain(stripper) => stripper.finish(),
            Self::Structured(_) => String::new(),
        }
    }
}

/// Largest char boundary at or below `index`.
fn floor_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Removes `<think>…</think>` blocks from a delta stream.
#[derive(Debug, Clone, Default)]
pub struct ThinkTagStripper {
    in_think_block: bool,
    carry: String,
}

impl ThinkTagStripper {
    const OPEN: &'static str = "<think>";
    const CLOSE: &'static str = "</think>";

    /// Feed one delta and return newly visible text.
    pub fn push(&mut self, delta: &str) -> String {
        if delta.is_empty() {
            return String::new();
        }
        self.carry.push_str(delta);

        let mut visible = String::new();
        loop {
            if self.in_think_block {
                if let Some(end) = self.carry.find(Self::CLOSE) {
                    self.carry.drain(..end + Self::CLOSE.len());
                    self.in_think_block = false;
                    continue;
                }
                // Keep just enough to spot a `</think>` split across deltas.
                let keep = Self::CLOSE.len() - 1;
                if self.carry.len() > keep {
                    let cut = floor_boundary(&self.carry, self.carry.len() - keep);
                    self.carry.drain(..cut);
                }
                break;
            }

            if let Some(start) = self.carry.find(Self::OPEN) {
                visible.push_str(&self.carry[..start]);
                self.carry.drain(..start + Self::OPEN.len());
                self.in_think_block = true;
                continue;
            }

            // Hold back a possible partial `<think>` only.
            let hold = self
                .carry
                .rfind('<')
                .filter(|&at| Self::OPEN.starts_with(&self.carry[at..]))
                .unwrap_or(self.carry.len());
            visible.push_str(&self.carry[..hold]);
            self.carry.drain(..hold);
            break;
        }

        visible
    }

    /// Flush any remaining visible tail.
    pub fn finish(&mut self) -> String {
        if self.in_think_block {
            self.carry.clear();
            return String::new();
        }
        std::mem::take(&mut self.carry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldState {
    /// Looking for `"field"` `:` `"`.
    Seeking,
    /// Inside the string value.
    Value,
    /// Collecting one escape sequence, backslash included.
    Escape(String),
    /// The closing quote was seen.
    Done,
}

/// How far an escape sequence has been collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeProgress {
    Partial,
    Complete,
    /// The first `n` bytes are a complete escape; the rest starts over.
    CompleteAt(usize),
}

/// `\uXXXX` code unit at `chars[at..at + 4]`, if all four are hex digits.
fn code_unit(chars: &[char], at: usize) -> Option<u32> {
    let digits: String = chars.get(at..at + 4)?.iter().collect();
    u32::from_str_radix(&digits, 16).ok()
}

/// Escapes are complete after one character, after `\uXXXX`, or after a
/// `\uXXXX\uXXXX` surrogate pair.
fn escape_progress(seq: &str) -> EscapeProgress {
    let chars: Vec<char> = seq.chars().collect();
    if chars.len() < 2 {
        return EscapeProgress::Partial;
    }
    if chars[1] != 'u' {
        return EscapeProgress::Complete;
    }
    if chars.len() < 6 {
        return EscapeProgress::Partial;
    }
    if !code_unit(&chars, 2).is_some_and(|high| (0xD800..=0xDBFF).contains(&high)) {
        return EscapeProgress::Complete;
    }
    match chars.len() {
        6 => EscapeProgress::Partial,
        7 if chars[6] != '\\' => EscapeProgress::CompleteAt(6),
        8 if chars[7] != 'u' => EscapeProgress::CompleteAt(6),
        n if n < 12 => EscapeProgress::Partial,
        _ if code_unit(&chars, 8).is_some_and(|low| (0xDC00..=0xDFFF).contains(&low)) => {
            EscapeProgress::Complete
        }
        _ => EscapeProgress::CompleteAt(6),
    }
}

/// Decode one complete JSON escape sequence.
fn unescape(seq: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{seq}\""))
        .unwrap_or_else(|_| char::REPLACEMENT_CHARACTER.to_string())
}

/// Streams the string value of one field out of a JSON object that arrives
/// in arbitrary pieces, un-escaping as it goes.
#[derive(Debug, Clone)]
pub struct StructuredFieldExtractor {
    key: String,
    carry: String,
    state: FieldState,
}

impl StructuredFieldExtractor {
    pub fn new(field: &str) -> Self {
        Self {
            key: format!("\"{field}\""),
            carry: String::new(),
            state: FieldState::Seeking,
        }
    }

    /// Whether the field's closing quote has been seen.
    pub fn is_done(&self) -> bool {
        self.state == FieldState::Done
    }

    /// Feed one delta and return newly decoded field text.
    pub fn push(&mut self, delta: &str) -> String {
        let mut out = String::new();
        match self.state {
            FieldState::Done => return out,
            FieldState::Seeking => {
                self.carry.push_str(delta);
                let Some(rest) = self.seek_value() else {
                    return out;
                };
                self.decode(&rest, &mut out);
            }
            _ => self.decode(delta, &mut out),
        }
        out
    }

    /// Find the opening quote of the value; returns the text after it.
    fn seek_value(&mut self) -> Option<String> {
        loop {
            let Some(at) = self.carry.find(&self.key) else {
                // Keep a tail long enough to hold a split key.
                let keep = self.key.len();
                if self.carry.len() > keep {
                    let cut = floor_boundary(&self.carry, self.carry.len() - keep);
                    self.carry.drain(..cut);
                }
                return None;
            };
            let after = self.carry[at + self.key.len()..].trim_start();
            let Some(after_colon) = after.strip_prefix(':') else {
                if after.is_empty() {
                    return None;
                }
                // The key text appeared somewhere else (e.g. as a value).
                self.carry.drain(..at + self.key.len());
                continue;
            };
            let value = after_colon.trim_start();
            if value.is_empty() {
                return None;
            }
            let Some(rest) = value.strip_prefix('"') else {
                // Not a string value; nothing to stream.
                self.state = FieldState::Done;
                self.carry.clear();
                return None;
            };
            let rest = rest.to_owned();
            self.carry.clear();
            self.state = FieldState::Value;
            return Some(rest);
        }
    }

    fn decode(&mut self, input: &str, out: &mut String) {
        for c in input.chars() {
            match &mut self.state {
                FieldState::Value => match c {
                    '"' => {
                        self.state = FieldState::Done;
                        return;
                    }
                    '\\' => self.state = FieldState::Escape(String::from('\\')),
                    _ => out.push(c),
                },
                FieldState::Escape(seq) => {
                    seq.push(c);
                    match escape_progress(seq) {
                        EscapeProgress::Partial => {}
                        EscapeProgress::Complete => {
                            out.push_str(&unescape(seq));
                            self.state = FieldState::Value;
                        }
                        EscapeProgress::CompleteAt(at) => {
                            let seq = std::mem::take(seq);
                            out.push_str(&unescape(&seq[..at]));
                            self.state = FieldState::Value;
                            self.decode(&seq[at..], out);
                            if self.state == FieldState::Done {
                                return;
                            }
                        }
                    }
                }
                FieldState::Seeking | FieldState::Done => return,
            }
        }
    }
}
