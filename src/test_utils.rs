//! Shared test utilities used by unit tests, integration tests and the
//! replay harness.
//!
//! Provides a synthesizer that records what it was asked to say, a playback
//! sink that acknowledges either automatically or on demand, and helpers for
//! building scripted coordinators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::DialogueConfig;
use crate::dialogue::speaker::Roster;
use crate::dialogue::{ConversationMode, ConversationState};
use crate::error::{Result, SynthesisError};
use crate::pipeline::coordinator::DialogueCoordinator;
use crate::pipeline::delivery::{PlaybackSink, Synthesizer};
use crate::pipeline::messages::{AudioHandle, LineVoice, PlaybackAck};
use crate::source::ScriptedSource;

/// Sample rate of the silent audio produced by [`RecordingSynthesizer`].
pub const TEST_SAMPLE_RATE: u32 = 16_000;

/// Samples of silence per spoken word (100 ms).
const SAMPLES_PER_WORD: usize = 1_600;

/// Synthesizer that renders silence and records every request.
#[derive(Debug, Default)]
pub struct RecordingSynthesizer {
    fail_on: Vec<String>,
    requests: Mutex<Vec<(String, String)>>,
}

impl RecordingSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail whenever asked to synthesize exactly `text`.
    pub fn failing_on(text: impl Into<String>) -> Self {
        Self {
            fail_on: vec![text.into()],
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `(voice, text)` pairs in request order.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str, voice: &LineVoice) -> std::result::Result<AudioHandle, SynthesisError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((voice.name().to_owned(), text.to_owned()));
        if self.fail_on.iter().any(|f| f == text) {
            return Err(SynthesisError::new(voice.name(), "scripted failure"));
        }
        let words = text.split_whitespace().count().max(1);
        Ok(AudioHandle::new(
            voice.name(),
            vec![0.0; words * SAMPLES_PER_WORD],
            TEST_SAMPLE_RATE,
        ))
    }
}

/// What a [`ManualAckSink`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Dispatched(String),
    Acked,
}

/// Shared view of a sink's event log.
#[derive(Debug, Clone, Default)]
pub struct SinkLog(Arc<Mutex<Vec<SinkEvent>>>);

impl SinkLog {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Captions dispatched so far.
    pub fn dispatched(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Dispatched(caption) => Some(caption),
                SinkEvent::Acked => None,
            })
            .collect()
    }

    fn push(&self, event: SinkEvent) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

/// Playback sink that records dispatches and acknowledges on demand.
#[derive(Debug)]
pub struct ManualAckSink {
    log: SinkLog,
    acks: Option<mpsc::UnboundedReceiver<Duration>>,
    last_duration: Duration,
}

impl ManualAckSink {
    /// A sink that acknowledges each line only when a duration is sent on
    /// the returned channel.
    pub fn manual() -> (Self, mpsc::UnboundedSender<Duration>, SinkLog) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = SinkLog::default();
        let sink = Self {
            log: log.clone(),
            acks: Some(rx),
            last_duration: Duration::ZERO,
        };
        (sink, tx, log)
    }

    /// A sink that acknowledges immediately with the audio's own duration.
    pub fn auto_ack() -> (Self, SinkLog) {
        let log = SinkLog::default();
        let sink = Self {
            log: log.clone(),
            acks: None,
            last_duration: Duration::ZERO,
        };
        (sink, log)
    }
}

#[async_trait]
impl PlaybackSink for ManualAckSink {
    async fn dispatch(&mut self, audio: AudioHandle, caption: &str) -> anyhow::Result<()> {
        self.last_duration = audio.duration();
        self.log.push(SinkEvent::Dispatched(caption.to_owned()));
        Ok(())
    }

    async fn playback_finished(&mut self) -> anyhow::Result<PlaybackAck> {
        let duration = match &mut self.acks {
            Some(rx) => rx
                .recv()
                .await
                .ok_or_else(|| anyhow::anyhow!("acknowledgment channel closed"))?,
            None => self.last_duration,
        };
        self.log.push(SinkEvent::Acked);
        Ok(PlaybackAck { duration })
    }
}

/// Everything a scripted conversation needs.
pub struct ScriptedConversation {
    pub coordinator: DialogueCoordinator,
    pub source: Arc<ScriptedSource>,
    pub synthesizer: Arc<RecordingSynthesizer>,
}

/// Build a seeded coordinator over a scripted source.
///
/// # Errors
///
/// Returns [`TroupeError::Config`](crate::TroupeError::Config) if `config`
/// does not validate.
pub fn scripted_conversation<I, S, F>(
    config: DialogueConfig,
    characters: &[&str],
    mode: ConversationMode,
    scripts: I,
) -> Result<ScriptedConversation>
where
    I: IntoIterator<Item = S>,
    S: IntoIterator<Item = F>,
    F: Into<String>,
{
    let roster: Roster = characters.iter().copied().collect();
    let source = Arc::new(ScriptedSource::new(scripts));
    let synthesizer = Arc::new(RecordingSynthesizer::new());
    let coordinator = DialogueCoordinator::new(
        config,
        ConversationState::new(roster, mode),
        Arc::clone(&source) as Arc<dyn crate::source::TokenSource>,
        Arc::clone(&synthesizer) as Arc<dyn Synthesizer>,
    )?
    .with_rng_seed(0x7e57);
    Ok(ScriptedConversation {
        coordinator,
        source,
        synthesizer,
    })
}
