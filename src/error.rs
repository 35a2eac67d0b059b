//! Error types for the troupe dialogue interpreter.
//!
//! Two layers are kept apart:
//!
//! - [`TroupeError`] is the crate-level error returned by public entry points
//!   (config loading, opening sources, running the delivery pipeline).
//! - [`AttemptError`] is what a single generation attempt can fail with. The
//!   coordinator matches on it to decide between retrying, aborting, and
//!   surfacing the failure. Components never catch these themselves.

/// Stable error codes for programmatic handling of attempt failures.
///
/// These codes never change and are included in log lines and runtime events.
pub mod error_codes {
    /// The announced speaker could not be resolved.
    pub const INVALID_SPEAKER: &str = "INVALID_SPEAKER";

    /// The token source kept emitting the same fragment.
    pub const STREAM_STALL: &str = "STREAM_STALL";

    /// The first utterance of the attempt had no speakable content.
    pub const EMPTY_GENERATION: &str = "EMPTY_GENERATION";

    /// Speech synthesis failed for a voice-line.
    pub const SYNTHESIS_FAILED: &str = "SYNTHESIS_FAILED";

    /// The token source failed (transport, HTTP status, malformed payload).
    pub const SOURCE_FAILED: &str = "SOURCE_FAILED";

    /// The playback side of the delivery pipeline went away.
    pub const DELIVERY_CLOSED: &str = "DELIVERY_CLOSED";
}

/// Top-level error type for the dialogue interpreter.
#[derive(Debug, thiserror::Error)]
pub enum TroupeError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Token source error.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Speech synthesis error.
    #[error("synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Pipeline coordination error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TroupeError>;

/// Failure raised by a token source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// The request could not be sent or the connection dropped.
    #[error("transport failed: {0}")]
    Transport(String),

    /// The provider answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// A streamed chunk could not be decoded.
    #[error("malformed stream payload: {0}")]
    Malformed(String),

    /// A scripted source ran out of scripts.
    #[error("source exhausted: {0}")]
    Exhausted(String),
}

/// Failure raised by a speech synthesis backend.
#[derive(Debug, Clone, thiserror::Error)]
#[error("could not synthesize {voice:?}: {message}")]
pub struct SynthesisError {
    /// Voice the line was requested in.
    pub voice: String,
    /// Backend-provided reason.
    pub message: String,
}

impl SynthesisError {
    /// Create a synthesis error for the given voice.
    pub fn new(voice: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            message: message.into(),
        }
    }
}

/// Everything that can end one generation attempt early.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AttemptError {
    /// The announced name matched no player alias, active character or
    /// partial name.
    #[error("[{}] invalid speaker {:?}", error_codes::INVALID_SPEAKER, .candidate)]
    InvalidSpeaker { candidate: String },

    /// The same fragment was observed too many times in a row.
    #[error(
        "[{}] fragment {:?} repeated {} times",
        error_codes::STREAM_STALL,
        .fragment,
        .repeats
    )]
    StreamStall { fragment: String, repeats: u32 },

    /// The first utterance of the attempt was empty after cleanup.
    #[error("[{}] generation produced an empty first utterance", error_codes::EMPTY_GENERATION)]
    EmptyGeneration,

    /// Synthesis failed and no apology substitution is configured.
    #[error("[{}] {}", error_codes::SYNTHESIS_FAILED, .0)]
    Synthesis(SynthesisError),

    /// The token source failed.
    #[error("[{}] {}", error_codes::SOURCE_FAILED, .0)]
    Source(SourceError),

    /// The consumer side of the delivery pipeline is gone.
    #[error("[{}] delivery pipeline closed", error_codes::DELIVERY_CLOSED)]
    DeliveryClosed,
}

impl AttemptError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSpeaker { .. } => error_codes::INVALID_SPEAKER,
            Self::StreamStall { .. } => error_codes::STREAM_STALL,
            Self::EmptyGeneration => error_codes::EMPTY_GENERATION,
            Self::Synthesis(_) => error_codes::SYNTHESIS_FAILED,
            Self::Source(_) => error_codes::SOURCE_FAILED,
            Self::DeliveryClosed => error_codes::DELIVERY_CLOSED,
        }
    }

    /// Whether the coordinator may retry the attempt after this error.
    ///
    /// Synthesis failures and a closed delivery pipeline are fatal to the
    /// response; everything the token source can cause is retryable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidSpeaker { .. }
                | Self::StreamStall { .. }
                | Self::EmptyGeneration
                | Self::Source(_)
        )
    }
}

impl From<SourceError> for AttemptError {
    fn from(e: SourceError) -> Self {
        Self::Source(e)
    }
}

impl From<SynthesisError> for AttemptError {
    fn from(e: SynthesisError) -> Self {
        Self::Synthesis(e)
    }
}
