//! Batches utterances into voice-lines.

use super::cleanup::is_speakable;
use crate::pipeline::messages::{LineVoice, VoiceLine};
use tracing::debug;

/// Accumulates sentences for one voice until a batching boundary.
#[derive(Debug, Clone)]
pub struct VoiceLineBatcher {
    max_sentences: u32,
    current: Option<VoiceLine>,
}

impl VoiceLineBatcher {
    pub fn new(max_sentences: u32) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
            current: None,
        }
    }

    /// Append a sentence. Returns any line completed by it.
    ///
    /// A change of voice or narration flag flushes the previous line first.
    pub fn push(&mut self, voice: LineVoice, text: &str, is_narration: bool) -> Vec<VoiceLine> {
        let mut flushed = Vec::new();
        let switched = self
            .current
            .as_ref()
            .is_some_and(|line| line.voice != voice || line.is_narration != is_narration);
        if switched {
            flushed.extend(self.flush());
        }

        let line = self.current.get_or_insert_with(|| VoiceLine {
            voice,
            text: String::new(),
            sentence_count: 0,
            is_narration,
        });
        if !line.text.is_empty() {
            line.text.push(' ');
        }
        line.text.push_str(text.trim());
        line.sentence_count += 1;

        if line.sentence_count >= self.max_sentences {
            flushed.extend(self.flush());
        }
        flushed
    }

    /// Emit the in-progress line, if it has anything to say.
    pub fn flush(&mut self) -> Option<VoiceLine> {
        let line = self.current.take()?;
        if !is_speakable(&line.text) {
            debug!(text = %line.text, "discarding unspeakable voice-line");
            return None;
        }
        Some(line)
    }

    /// Sentences waiting in the in-progress line.
    pub fn pending_sentences(&self) -> u32 {
        self.current.as_ref().map_or(0, |line| line.sentence_count)
    }
}
