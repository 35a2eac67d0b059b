//! Cleanup applied to every completed sentence before it is voiced.

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::error::{Result, TroupeError};

/// Opening/closing quote pairs stripped when they wrap a whole sentence.
const QUOTE_PAIRS: &[(char, char)] = &[
    ('"', '"'),
    ('\'', '\''),
    ('“', '”'),
    ('‘', '’'),
    ('«', '»'),
    ('「', '」'),
];

/// Doubled emphasis markers collapsed to a single marker.
const DOUBLED_EMPHASIS: &[(&str, &str)] = &[("**", "*"), ("__", "_"), ("~~", "~")];

/// Sentence text normalizer.
#[derive(Debug, Clone)]
pub struct SentenceCleaner {
    disclaimer: Option<Regex>,
}

impl SentenceCleaner {
    /// Build a cleaner, optionally stripping "As an AI, ..." prefixes.
    ///
    /// # Errors
    ///
    /// Returns [`TroupeError::Config`] if the disclaimer pattern fails to
    /// compile.
    pub fn new(strip_disclaimers: bool) -> Result<Self> {
        let disclaimer = if strip_disclaimers {
            Some(
                Regex::new(r"(?i)^as an? [^,.!?;]{1,40},\s*")
                    .map_err(|e| TroupeError::Config(e.to_string()))?,
            )
        } else {
            None
        };
        Ok(Self { disclaimer })
    }

    /// Clean one sentence.
    pub fn clean(&self, raw: &str) -> String {
        let mut text: String = raw.nfkc().collect();

        for (doubled, single) in DOUBLED_EMPHASIS {
            while text.contains(doubled) {
                text = text.replace(doubled, single);
            }
        }

        let mut text = collapse_whitespace(&text);
        loop {
            let stripped = strip_wrapping_quotes(&text);
            if stripped.len() == text.len() {
                break;
            }
            text = stripped.trim().to_owned();
        }

        if let Some(re) = &self.disclaimer {
            if let Some(m) = re.find(&text) {
                text = capitalize_first(&text[m.end()..]);
            }
        }

        text
    }
}

/// Whether the text has anything to pronounce.
///
/// Text made only of punctuation, emphasis markers and whitespace is empty.
pub fn is_speakable(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_wrapping_quotes(text: &str) -> &str {
    let mut chars = text.chars();
    let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
        return text;
    };
    let wrapped = QUOTE_PAIRS
        .iter()
        .any(|&(open, close)| first == open && last == close);
    if !wrapped {
        return text;
    }
    // Only strip when the quotes are not also used inside the sentence.
    let inner = &text[first.len_utf8()..text.len() - last.len_utf8()];
    if inner.contains(first) || inner.contains(last) {
        return text;
    }
    inner
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
