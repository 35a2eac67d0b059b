//! Response coordinator: runs attempts, retries them and drives delivery.
//!
//! One call to [`DialogueCoordinator::respond`] interprets one model
//! response. Generation (attempts plus the voice-line producer) and playback
//! (the delivery consumer) run concurrently; the single-slot queue between
//! them is the only synchronization point.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use super::attempt::{AttemptContext, AttemptDriver, AttemptEnd, AttemptState};
use super::delivery::{DeliveryReport, PlaybackSink, Synthesizer, delivery_channel};
use super::messages::{DeliveredLine, LineVoice, VoiceLine};
use super::retry::RetryBudget;
use crate::behavior::{BehaviorDispatcher, BehaviorRegistry};
use crate::config::DialogueConfig;
use crate::context::{CharacterMemory, ContextAssembler, TranscriptEntry};
use crate::dialogue::ConversationState;
use crate::dialogue::speaker::SpeakerResolver;
use crate::error::{AttemptError, Result, TroupeError};
use crate::runtime::{EventSender, RuntimeEvent};
use crate::source::TokenSource;

/// How a response ended.
#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    /// An attempt finished cleanly.
    Completed(AttemptEnd),
    /// The generic retry budget ran out; the fallback line was spoken.
    Aborted(AttemptError),
    /// A non-recoverable error ended the response.
    Failed(AttemptError),
}

impl ResponseOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Summary of one response.
#[derive(Debug, Clone)]
pub struct ResponseReport {
    pub outcome: ResponseOutcome,
    /// Attempts started, including the successful one.
    pub attempts: u32,
    /// Lines handed to playback, across all attempts.
    pub delivered: Vec<DeliveredLine>,
    pub playback: DeliveryReport,
}

/// Interprets model responses for one conversation.
pub struct DialogueCoordinator {
    config: DialogueConfig,
    conversation: ConversationState,
    resolver: SpeakerResolver,
    dispatcher: Arc<dyn BehaviorDispatcher>,
    source: Arc<dyn TokenSource>,
    synthesizer: Arc<dyn Synthesizer>,
    assembler: ContextAssembler,
    events: EventSender,
    cancel: CancellationToken,
    rng: StdRng,
}

impl DialogueCoordinator {
    /// Create a coordinator using the configured built-in behaviors.
    ///
    /// # Errors
    ///
    /// Returns [`TroupeError::Config`] if `config` does not validate.
    pub fn new(
        config: DialogueConfig,
        conversation: ConversationState,
        source: Arc<dyn TokenSource>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = BehaviorRegistry::from_names(&config.behaviors.enabled);
        let assembler = ContextAssembler::new(&config).with_behavior_prompt(
            registry.prompt_fragment(&config.behaviors.trigger_prefix, &config.behaviors.trigger_suffix),
        );
        Ok(Self {
            resolver: SpeakerResolver::new(&config.speakers),
            dispatcher: Arc::new(registry),
            assembler,
            config,
            conversation,
            source,
            synthesizer,
            events: EventSender::default(),
            cancel: CancellationToken::new(),
            rng: StdRng::from_entropy(),
        })
    }

    /// Replace the behavior registry (and the behavior listing in the prompt).
    pub fn with_behaviors(mut self, registry: BehaviorRegistry) -> Self {
        let behaviors = &self.config.behaviors;
        self.assembler = ContextAssembler::new(&self.config).with_behavior_prompt(
            registry.prompt_fragment(&behaviors.trigger_prefix, &behaviors.trigger_suffix),
        );
        self.dispatcher = Arc::new(registry);
        self
    }

    /// Use a custom dispatcher; the prompt lists no behaviors.
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn BehaviorDispatcher>) -> Self {
        self.assembler = ContextAssembler::new(&self.config);
        self.dispatcher = dispatcher;
        self
    }

    /// Attach a runtime event sender for observers.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.events = EventSender::new(Some(tx));
        self
    }

    /// Use an external cancellation token ("conversation ended").
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Seed the fallback-speaker RNG for reproducible runs.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Get a clone of the cancellation token for external use.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    /// Mutable access for roster changes between responses.
    pub fn conversation_mut(&mut self) -> &mut ConversationState {
        &mut self.conversation
    }

    pub fn config(&self) -> &DialogueConfig {
        &self.config
    }

    /// Interpret one model response, delivering voice-lines to `sink`.
    ///
    /// Retries recoverable attempt failures until the budgets run out. A
    /// response that ends in [`ResponseOutcome::Aborted`] or
    /// [`ResponseOutcome::Failed`] is still reported as `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`TroupeError::Pipeline`] if no characters are active and
    /// [`TroupeError::Config`] if the segmentation settings are unusable.
    pub async fn respond<S: PlaybackSink + ?Sized>(
        &mut self,
        transcript: &[TranscriptEntry],
        memories: &[CharacterMemory],
        sink: &mut S,
    ) -> Result<ResponseReport> {
        if self.conversation.roster.is_empty() {
            return Err(TroupeError::Pipeline(
                "cannot respond without active characters".to_owned(),
            ));
        }
        let template = AttemptState::new(&self.config, &self.conversation)?;

        let Self {
            ref config,
            ref conversation,
            ref resolver,
            ref dispatcher,
            ref source,
            ref synthesizer,
            ref assembler,
            ref events,
            ref cancel,
            ref mut rng,
        } = *self;

        let (mut producer, consumer) =
            delivery_channel(Arc::clone(synthesizer), &config.delivery, events.clone());
        let ctx = AttemptContext {
            config,
            resolver,
            dispatcher: dispatcher.as_ref(),
            events,
            cancel,
        };
        let retry = &config.retry;
        let mut budget = RetryBudget::new(retry);
        // Each budget bounds its own retries; this bounds them all together.
        let max_attempts = 1
            + retry.max_generic_retries
            + retry.max_bad_speaker_retries
            + retry.max_system_loop_retries;
        info!(
            source = source.name(),
            characters = conversation.roster.len(),
            "responding"
        );

        let generation = async move {
            let mut attempts = 0u32;
            let outcome = loop {
                attempts += 1;
                let messages = assembler.assemble(
                    &conversation.roster,
                    memories,
                    transcript,
                    producer.delivered(),
                );
                let state = template.clone();
                let result = async {
                    let stream = source.open(&messages).await?;
                    AttemptDriver::new(&ctx, state, &mut budget, &mut *rng, &mut producer)
                        .run(stream)
                        .await
                }
                .instrument(info_span!("attempt", n = attempts))
                .await;

                let err = match result {
                    Ok(end) => break ResponseOutcome::Completed(end),
                    Err(e) if !e.is_recoverable() => {
                        error!(attempt = attempts, code = e.code(), error = %e, "attempt failed");
                        break ResponseOutcome::Failed(e);
                    }
                    Err(e) => e,
                };
                if cancel.is_cancelled() {
                    info!(attempt = attempts, "conversation ended during retry");
                    break ResponseOutcome::Completed(AttemptEnd::Cancelled);
                }
                let charged = !matches!(err, AttemptError::InvalidSpeaker { .. });
                if (charged && !budget.consume_generic()) || attempts >= max_attempts {
                    warn!(attempt = attempts, code = err.code(), error = %err, "retries exhausted, aborting response");
                    break ResponseOutcome::Aborted(err);
                }
                warn!(attempt = attempts, code = err.code(), reason = %err, "retrying attempt");
                events.emit(RuntimeEvent::AttemptRetrying {
                    attempt: attempts,
                    code: err.code(),
                    reason: err.to_string(),
                });
            };

            if matches!(outcome, ResponseOutcome::Aborted(_))
                && let Some(line) = fallback_line(config, conversation)
                && let Err(e) = producer.deliver(line).await
            {
                error!(error = %e, "could not deliver fallback line");
            }
            let delivered = producer.finish().await;
            (outcome, attempts, delivered)
        };

        let ((outcome, attempts, delivered), playback) =
            tokio::join!(generation, consumer.run(sink));

        events.emit(RuntimeEvent::ResponseFinished {
            attempts,
            completed: outcome.is_completed(),
            lines_delivered: delivered.len(),
        });
        info!(
            attempts,
            lines = delivered.len(),
            completed = outcome.is_completed(),
            "response finished"
        );
        Ok(ResponseReport {
            outcome,
            attempts,
            delivered,
            playback,
        })
    }
}

/// The configured fallback line in the forced (or first) character's voice.
fn fallback_line(config: &DialogueConfig, conversation: &ConversationState) -> Option<VoiceLine> {
    let text = config.retry.fallback_line.trim();
    if text.is_empty() {
        return None;
    }
    let speaker = conversation
        .forced_speaker
        .clone()
        .or_else(|| conversation.roster.names().first().cloned())?;
    Some(VoiceLine {
        voice: LineVoice::Character(speaker),
        text: text.to_owned(),
        sentence_count: 1,
        is_narration: false,
    })
}
