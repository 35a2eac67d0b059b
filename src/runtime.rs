//! Runtime events emitted while a response is interpreted.
//!
//! Lightweight and clonable so the pipeline can broadcast them without
//! waiting on subscribers.

use tokio::sync::broadcast;

use crate::behavior::TriggeredBehavior;
use crate::pipeline::messages::Utterance;

/// Events that describe what the interpreter is doing "right now".
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// An announced name was resolved to an active character.
    SpeakerResolved {
        speaker: String,
        /// Matched on a single word of the full name.
        partial: bool,
        /// Chosen at random after the bad-speaker budget ran out.
        forced: bool,
    },
    /// A cleaned, attributed sentence.
    Utterance(Utterance),
    /// A trigger token fired a behavior.
    BehaviorTriggered(TriggeredBehavior),
    /// A voice-line was synthesized and handed to playback.
    VoiceLineQueued { voice: String, caption: String },
    /// An attempt failed and is being retried.
    AttemptRetrying {
        attempt: u32,
        /// Stable error code of the failure.
        code: &'static str,
        reason: String,
    },
    /// The response is over.
    ResponseFinished {
        attempts: u32,
        completed: bool,
        lines_delivered: usize,
    },
}

/// Optional broadcast sender.
#[derive(Debug, Clone, Default)]
pub struct EventSender {
    tx: Option<broadcast::Sender<RuntimeEvent>>,
}

impl EventSender {
    pub fn new(tx: Option<broadcast::Sender<RuntimeEvent>>) -> Self {
        Self { tx }
    }

    /// Send an event; no subscribers is not an error.
    pub fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
