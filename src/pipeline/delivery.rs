//! Producer/consumer delivery of voice-lines to synthesis and playback.
//!
//! The producer synthesizes a line, pushes it onto a single-slot queue and
//! then waits until the consumer has dispatched it. The consumer dispatches
//! each line to the playback sink, signals readiness straight away and then
//! waits for the sink's playback acknowledgment before taking the next one.
//! Line *n + 1* is synthesized while line *n* is audible, and the sink never
//! receives lines out of order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::messages::{AudioHandle, DeliveredLine, LineVoice, PlaybackAck, QueueItem, VoiceLine};
use crate::config::DeliveryConfig;
use crate::error::{AttemptError, SynthesisError};
use crate::runtime::{EventSender, RuntimeEvent};

/// Speech synthesis backend.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Render `text` in `voice`.
    ///
    /// # Errors
    ///
    /// Returns a [`SynthesisError`] if the backend cannot render the line.
    async fn synthesize(&self, text: &str, voice: &LineVoice) -> Result<AudioHandle, SynthesisError>;
}

/// Playback side: plays audio and reports when it is done.
#[async_trait]
pub trait PlaybackSink: Send {
    /// Start playing `audio`, showing `caption`.
    async fn dispatch(&mut self, audio: AudioHandle, caption: &str) -> anyhow::Result<()>;

    /// Wait until the last dispatched line finished playing.
    async fn playback_finished(&mut self) -> anyhow::Result<PlaybackAck>;
}

/// What the consumer did during one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Captions dispatched to the sink, in order.
    pub dispatched: Vec<String>,
    /// Sum of acknowledged playback durations.
    pub played: Duration,
    /// Dispatches or acknowledgments that failed.
    pub sink_errors: u32,
}

/// Create the two ends of the delivery pipeline.
pub fn delivery_channel(
    synthesizer: Arc<dyn Synthesizer>,
    config: &DeliveryConfig,
    events: EventSender,
) -> (VoiceLineProducer, DeliveryConsumer) {
    let (queue_tx, queue_rx) = mpsc::channel(1);
    let (ready_tx, ready_rx) = mpsc::channel(1);
    let apology = config
        .substitute_apology_on_synthesis_failure
        .then(|| config.apology_line.clone());
    (
        VoiceLineProducer {
            queue: queue_tx,
            ready: ready_rx,
            synthesizer,
            apology,
            delivered: Vec::new(),
            events,
        },
        DeliveryConsumer {
            queue: queue_rx,
            ready: ready_tx,
        },
    )
}

/// Generation side of the pipeline.
pub struct VoiceLineProducer {
    queue: mpsc::Sender<QueueItem>,
    ready: mpsc::Receiver<()>,
    synthesizer: Arc<dyn Synthesizer>,
    apology: Option<String>,
    delivered: Vec<DeliveredLine>,
    events: EventSender,
}

impl VoiceLineProducer {
    /// Synthesize `line` and hand it to the consumer.
    ///
    /// Returns once the consumer has dispatched the line.
    ///
    /// # Errors
    ///
    /// [`AttemptError::Synthesis`] when synthesis fails without an apology
    /// substitute, [`AttemptError::DeliveryClosed`] when the consumer is gone.
    pub async fn deliver(&mut self, line: VoiceLine) -> Result<(), AttemptError> {
        let (audio, caption) = match self.synthesizer.synthesize(&line.text, &line.voice).await {
            Ok(audio) => (audio, line.text),
            Err(e) => {
                let Some(apology) = self.apology.clone() else {
                    error!(voice = %line.voice, error = %e, "synthesis failed");
                    return Err(e.into());
                };
                warn!(voice = %line.voice, error = %e, "synthesis failed, substituting apology");
                let audio = self.synthesizer.synthesize(&apology, &line.voice).await?;
                (audio, apology)
            }
        };
        self.push(line.voice, audio, caption, line.is_narration).await
    }

    async fn push(
        &mut self,
        voice: LineVoice,
        audio: AudioHandle,
        caption: String,
        is_narration: bool,
    ) -> Result<(), AttemptError> {
        debug!(voice = %voice, id = %audio.id, "queueing voice-line");
        self.queue
            .send(QueueItem::Line {
                audio,
                caption: caption.clone(),
            })
            .await
            .map_err(|_| AttemptError::DeliveryClosed)?;
        self.ready
            .recv()
            .await
            .ok_or(AttemptError::DeliveryClosed)?;

        self.events.emit(RuntimeEvent::VoiceLineQueued {
            voice: voice.name().to_owned(),
            caption: caption.clone(),
        });
        self.delivered.push(DeliveredLine {
            voice,
            text: caption,
            is_narration,
        });
        Ok(())
    }

    /// Lines dispatched so far in this response.
    pub fn delivered(&self) -> &[DeliveredLine] {
        &self.delivered
    }

    /// Push the end-of-response sentinel and return the delivered lines.
    pub async fn finish(self) -> Vec<DeliveredLine> {
        if self.queue.send(QueueItem::End).await.is_err() {
            debug!("delivery consumer already gone");
        }
        self.delivered
    }
}

/// Playback side of the pipeline.
pub struct DeliveryConsumer {
    queue: mpsc::Receiver<QueueItem>,
    ready: mpsc::Sender<()>,
}

impl DeliveryConsumer {
    /// Drive `sink` until the end-of-response sentinel.
    pub async fn run<S: PlaybackSink + ?Sized>(mut self, sink: &mut S) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        while let Some(item) = self.queue.recv().await {
            let (audio, caption) = match item {
                QueueItem::Line { audio, caption } => (audio, caption),
                QueueItem::End => break,
            };

            let dispatched = match sink.dispatch(audio, &caption).await {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, "playback dispatch failed");
                    report.sink_errors += 1;
                    false
                }
            };
            report.dispatched.push(caption);

            if self.ready.send(()).await.is_err() {
                debug!("delivery producer gone");
                break;
            }

            if dispatched {
                match sink.playback_finished().await {
                    Ok(ack) => report.played += ack.duration,
                    Err(e) => {
                        warn!(error = %e, "playback acknowledgment failed");
                        report.sink_errors += 1;
                    }
                }
            }
        }
        info!(
            lines = report.dispatched.len(),
            played_ms = report.played.as_millis() as u64,
            "delivery finished"
        );
        report
    }
}
