//! Message types passed between pipeline stages.

use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::dialogue::speaker::SpeakerIdentity;

/// A completed, cleaned sentence attributed to a speaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Who said it.
    pub speaker: SpeakerIdentity,
    /// Cleaned sentence text with behavior triggers removed.
    pub text: String,
    /// Whether the sentence was inside a narration passage.
    pub is_narration: bool,
}

/// Voice a line is synthesized with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LineVoice {
    /// A named character.
    Character(String),
    /// The dedicated narrator voice.
    Narrator(String),
}

impl LineVoice {
    /// Name of the voice.
    pub fn name(&self) -> &str {
        match self {
            Self::Character(name) | Self::Narrator(name) => name,
        }
    }

    pub fn is_narrator(&self) -> bool {
        matches!(self, Self::Narrator(_))
    }
}

impl fmt::Display for LineVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The unit of text submitted to speech synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceLine {
    /// Voice the line is spoken in.
    pub voice: LineVoice,
    /// Sentences joined with single spaces.
    pub text: String,
    /// Number of sentences batched into `text`.
    pub sentence_count: u32,
    /// Whether the line is narration (even when voiced by the speaker).
    pub is_narration: bool,
}

/// Synthesized audio for one voice-line.
#[derive(Debug, Clone)]
pub struct AudioHandle {
    /// Unique handle identifier.
    pub id: Uuid,
    /// Voice the audio was rendered in.
    pub voice: String,
    /// f32 audio samples, mono.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioHandle {
    pub fn new(voice: impl Into<String>, samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            voice: voice.into(),
            samples,
            sample_rate,
        }
    }

    /// Playback length of the samples.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Item on the single-slot delivery queue.
#[derive(Debug, Clone)]
pub enum QueueItem {
    /// A synthesized line and its caption.
    Line { audio: AudioHandle, caption: String },
    /// End of the response; the consumer stops after this.
    End,
}

/// Playback acknowledgment reported by a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackAck {
    /// Real or estimated time the line took to play.
    pub duration: Duration,
}

/// A voice-line that reached the delivery queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredLine {
    pub voice: LineVoice,
    pub text: String,
    /// Carried over from [`VoiceLine::is_narration`].
    pub is_narration: bool,
}
