//! One generation attempt: fragments in, voice-lines out.
//!
//! All transient interpretation state lives in [`AttemptState`]. The
//! coordinator builds a template once and clones it for every attempt, so a
//! retry never sees a half-reset speaker, sentence buffer or pending line.

use futures_util::StreamExt;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::delivery::VoiceLineProducer;
use super::messages::{LineVoice, Utterance, VoiceLine};
use super::retry::{RetryBudget, StallDetector};
use crate::behavior::{BehaviorDispatcher, scan_sentence};
use crate::config::{DialogueConfig, NarrationHandling};
use crate::dialogue::ConversationState;
use crate::dialogue::batcher::VoiceLineBatcher;
use crate::dialogue::cleanup::is_speakable;
use crate::dialogue::segmenter::{AnnouncementGate, SegmentEvent, SentenceSegmenter};
use crate::dialogue::speaker::{Resolution, SpeakerIdentity, SpeakerResolver};
use crate::error::{AttemptError, Result};
use crate::runtime::{EventSender, RuntimeEvent};
use crate::source::{FragmentExtractor, FragmentStream};

/// How an attempt ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptEnd {
    /// The stream ran out or hit a stop token.
    StreamEnded,
    /// The model announced the player as the next speaker.
    PlayerTurn,
    /// The per-response sentence limit was reached.
    MaxSentences,
    /// The model kept speaking as the system after its budget ran out.
    SystemHalt,
    /// The conversation was ended from outside.
    Cancelled,
}

impl AttemptEnd {
    pub fn label(self) -> &'static str {
        match self {
            Self::StreamEnded => "stream_ended",
            Self::PlayerTurn => "player_turn",
            Self::MaxSentences => "max_sentences",
            Self::SystemHalt => "system_halt",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Everything an attempt mutates.
#[derive(Debug, Clone)]
pub struct AttemptState {
    pub conversation: ConversationState,
    segmenter: SentenceSegmenter,
    batcher: VoiceLineBatcher,
    stall: StallDetector,
    extractor: FragmentExtractor,
    utterances: u32,
    sentences: u32,
}

impl AttemptState {
    /// Attempt-start state for `conversation`.
    ///
    /// # Errors
    ///
    /// Returns [`TroupeError::Config`](crate::TroupeError::Config) if the
    /// segmentation settings are unusable.
    pub fn new(config: &DialogueConfig, conversation: &ConversationState) -> Result<Self> {
        Ok(Self {
            conversation: conversation.fresh_attempt(),
            segmenter: SentenceSegmenter::new(&config.segmentation, &config.speakers)?.with_gate(
                AnnouncementGate::new(
                    SpeakerResolver::new(&config.speakers),
                    conversation.roster.clone(),
                    conversation.default_speaker().is_some(),
                ),
            ),
            batcher: VoiceLineBatcher::new(config.segmentation.sentences_per_voiceline),
            stall: StallDetector::new(config.retry.stall_repeat_limit),
            extractor: FragmentExtractor::new(&config.source),
            utterances: 0,
            sentences: 0,
        })
    }
}

/// Collaborators shared by every attempt of one response.
pub struct AttemptContext<'a> {
    pub config: &'a DialogueConfig,
    pub resolver: &'a SpeakerResolver,
    pub dispatcher: &'a dyn BehaviorDispatcher,
    pub events: &'a EventSender,
    pub cancel: &'a CancellationToken,
}

/// Drives one attempt to completion.
pub struct AttemptDriver<'a> {
    ctx: &'a AttemptContext<'a>,
    state: AttemptState,
    budget: &'a mut RetryBudget,
    rng: &'a mut StdRng,
    producer: &'a mut VoiceLineProducer,
}

impl<'a> AttemptDriver<'a> {
    pub fn new(
        ctx: &'a AttemptContext<'a>,
        state: AttemptState,
        budget: &'a mut RetryBudget,
        rng: &'a mut StdRng,
        producer: &'a mut VoiceLineProducer,
    ) -> Self {
        Self {
            ctx,
            state,
            budget,
            rng,
            producer,
        }
    }

    /// Consume `stream` until the attempt ends.
    ///
    /// # Errors
    ///
    /// Returns the [`AttemptError`] that ended the attempt early; the
    /// coordinator decides whether it is retried.
    pub async fn run(mut self, mut stream: FragmentStream) -> std::result::Result<AttemptEnd, AttemptError> {
        loop {
            let next = tokio::select! {
                biased;
                () = self.ctx.cancel.cancelled() => {
                    info!("conversation ended, stopping attempt");
                    return self.close(AttemptEnd::Cancelled).await;
                }
                next = stream.next() => next,
            };
            let Some(fragment) = next else {
                break;
            };
            let fragment = fragment?;
            trace!(fragment = %fragment, "fragment");
            self.state.stall.observe(&fragment)?;

            let text = self.state.extractor.push(&fragment);
            if text.is_empty() {
                continue;
            }
            let events = self.state.segmenter.push(&text);
            if let Some(end) = self.handle(events).await? {
                return self.close(end).await;
            }
        }

        let tail = self.state.extractor.finish();
        let mut events = if tail.is_empty() {
            Vec::new()
        } else {
            self.state.segmenter.push(&tail)
        };
        events.extend(self.state.segmenter.finish());
        let end = self.handle(events).await?.unwrap_or(AttemptEnd::StreamEnded);
        self.close(end).await
    }

    async fn handle(
        &mut self,
        events: Vec<SegmentEvent>,
    ) -> std::result::Result<Option<AttemptEnd>, AttemptError> {
        for event in events {
            let end = match event {
                SegmentEvent::SpeakerAnnounced(candidate) => self.announce(&candidate)?,
                SegmentEvent::NarrationToggled { narrated } => {
                    debug!(narrated, "narration toggled");
                    self.flush().await?;
                    None
                }
                SegmentEvent::Sentence { text, narrated } => self.sentence(&text, narrated).await?,
                SegmentEvent::Stopped => {
                    debug!("stop token reached");
                    Some(AttemptEnd::StreamEnded)
                }
            };
            if end.is_some() {
                return Ok(end);
            }
        }
        Ok(None)
    }

    fn announce(&mut self, candidate: &str) -> std::result::Result<Option<AttemptEnd>, AttemptError> {
        let conversation = &self.state.conversation;
        let resolution = self.ctx.resolver.resolve(
            candidate,
            &conversation.roster,
            conversation.mode,
            &mut *self.budget,
            &mut *self.rng,
        )?;
        match resolution {
            Resolution::Character { name, partial } => self.set_speaker(name, partial, false),
            Resolution::Fallback { name } => self.set_speaker(name, false, true),
            Resolution::Player => {
                info!("model handed the turn to the player");
                return Ok(Some(AttemptEnd::PlayerTurn));
            }
            Resolution::SystemHalt => return Ok(Some(AttemptEnd::SystemHalt)),
        }
        Ok(None)
    }

    fn set_speaker(&mut self, name: String, partial: bool, forced: bool) {
        debug!(speaker = %name, partial, forced, "speaker resolved");
        self.ctx.events.emit(RuntimeEvent::SpeakerResolved {
            speaker: name.clone(),
            partial,
            forced,
        });
        self.state.conversation.current_speaker = SpeakerIdentity::Character(name);
    }

    /// Current speaker, falling back to the conversation default.
    fn speaker(&mut self) -> std::result::Result<String, AttemptError> {
        if let Some(name) = self.state.conversation.current_speaker.character_name() {
            return Ok(name.to_owned());
        }
        if let Some(name) = self.state.conversation.default_speaker() {
            let name = name.to_owned();
            self.set_speaker(name.clone(), false, false);
            return Ok(name);
        }
        // Text arrived before any announcement.
        match self.announce("")? {
            None => self
                .state
                .conversation
                .current_speaker
                .character_name()
                .map(str::to_owned)
                .ok_or_else(|| AttemptError::InvalidSpeaker {
                    candidate: String::new(),
                }),
            Some(_) => Err(AttemptError::InvalidSpeaker {
                candidate: String::new(),
            }),
        }
    }

    async fn sentence(
        &mut self,
        text: &str,
        narrated: bool,
    ) -> std::result::Result<Option<AttemptEnd>, AttemptError> {
        if self.ctx.cancel.is_cancelled() {
            return Ok(Some(AttemptEnd::Cancelled));
        }
        let speaker = self.speaker()?;
        let behaviors = &self.ctx.config.behaviors;
        let scan = scan_sentence(
            text,
            &speaker,
            self.ctx.dispatcher,
            &behaviors.trigger_prefix,
            &behaviors.trigger_suffix,
        );
        for triggered in scan.triggered {
            self.ctx.events.emit(RuntimeEvent::BehaviorTriggered(triggered));
        }

        if !is_speakable(&scan.text) {
            if self.state.utterances == 0 {
                return Err(AttemptError::EmptyGeneration);
            }
            debug!(speaker = %speaker, "dropping empty sentence");
            return Ok(None);
        }
        self.state.utterances += 1;
        self.ctx.events.emit(RuntimeEvent::Utterance(Utterance {
            speaker: SpeakerIdentity::Character(speaker.clone()),
            text: scan.text.clone(),
            is_narration: narrated,
        }));

        let segmentation = &self.ctx.config.segmentation;
        let voice = match (narrated, segmentation.narration_handling) {
            (false, _) | (true, NarrationHandling::Speaker) => LineVoice::Character(speaker),
            (true, NarrationHandling::Narrator) => {
                LineVoice::Narrator(segmentation.narrator_name.clone())
            }
            (true, NarrationHandling::Skip) => {
                debug!("skipping narration");
                return Ok(None);
            }
        };
        for line in self.state.batcher.push(voice, &scan.text, narrated) {
            self.deliver(line).await?;
        }

        self.state.sentences += 1;
        let max = segmentation.max_sentences_per_response;
        if max > 0 && self.state.sentences >= max {
            info!(sentences = self.state.sentences, "sentence limit reached");
            return Ok(Some(AttemptEnd::MaxSentences));
        }
        Ok(None)
    }

    async fn flush(&mut self) -> std::result::Result<(), AttemptError> {
        if let Some(line) = self.state.batcher.flush() {
            self.deliver(line).await?;
        }
        Ok(())
    }

    async fn deliver(&mut self, line: VoiceLine) -> std::result::Result<(), AttemptError> {
        debug!(
            voice = %line.voice,
            sentences = line.sentence_count,
            narration = line.is_narration,
            "voice-line ready"
        );
        self.producer.deliver(line).await
    }

    async fn close(mut self, end: AttemptEnd) -> std::result::Result<AttemptEnd, AttemptError> {
        self.flush().await?;
        if self.state.utterances == 0
            && matches!(end, AttemptEnd::StreamEnded | AttemptEnd::PlayerTurn)
        {
            return Err(AttemptError::EmptyGeneration);
        }
        info!(
            end = end.label(),
            utterances = self.state.utterances,
            "attempt finished"
        );
        Ok(end)
    }
}
