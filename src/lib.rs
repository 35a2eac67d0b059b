//! Troupe: streaming interpreter for multi-character LLM dialogue.
//!
//! One model generation is read fragment by fragment and turned into
//! attributed, paced voice-lines:
//! Token source → Speaker resolution → Sentences → Behaviors → Batching →
//! Synthesis → Playback
//!
//! # Architecture
//!
//! - **Context**: builds the role-tagged messages each attempt is opened with
//! - **Source**: streams text fragments (OpenAI-compatible API or scripted)
//! - **Dialogue**: resolves announced speakers, segments sentences, tracks
//!   narration and batches sentences into voice-lines
//! - **Behavior**: strips trigger tokens and dispatches them to handlers
//! - **Pipeline**: drives attempts, retries them within budgets, and hands
//!   voice-lines to synthesis and playback through a single-slot queue

pub mod behavior;
pub mod config;
pub mod context;
pub mod dialogue;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod source;
pub mod test_utils;

pub use behavior::{Behavior, BehaviorDispatcher, BehaviorRegistry, TriggeredBehavior};
pub use config::DialogueConfig;
pub use context::{CharacterMemory, ChatMessage, Role, TranscriptEntry};
pub use dialogue::speaker::{Roster, SpeakerIdentity};
pub use dialogue::{ConversationMode, ConversationState};
pub use error::{AttemptError, Result, TroupeError};
pub use pipeline::coordinator::{DialogueCoordinator, ResponseOutcome, ResponseReport};
pub use pipeline::delivery::{PlaybackSink, Synthesizer};
pub use pipeline::messages::{AudioHandle, LineVoice, PlaybackAck, Utterance, VoiceLine};
pub use runtime::RuntimeEvent;
pub use source::{ApiTokenSource, ScriptedSource, TokenSource};
