//! Replay a dialogue script through the interpreter.
//!
//! Reads a JSON script describing the characters and, optionally, the raw
//! fragments of each attempt. Without scripted attempts the configured
//! OpenAI-compatible endpoint is used instead. No speech engine is attached:
//! each line is rendered as silence paced at the speaking rate, so the output
//! is captions only, written to stdout as `[voice] text`. All diagnostics go
//! to stderr.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::info;
use troupe::error::SynthesisError;
use troupe::{
    ApiTokenSource, AudioHandle, ConversationMode, ConversationState, DialogueConfig,
    DialogueCoordinator, LineVoice, PlaybackAck, PlaybackSink, Roster, RuntimeEvent,
    ScriptedSource, Synthesizer, TokenSource, TranscriptEntry, TroupeError,
};

const SAMPLE_RATE: u32 = 16_000;

/// Silence per spoken word, about 150 words per minute.
const SAMPLES_PER_WORD: usize = 6_400;

#[derive(Debug, Deserialize)]
struct Script {
    characters: Vec<String>,
    #[serde(default)]
    mode: ConversationMode,
    #[serde(default)]
    forced_speaker: Option<String>,
    /// What the player said before the response.
    #[serde(default)]
    player_line: Option<String>,
    /// Raw fragments, one list per attempt.
    #[serde(default)]
    attempts: Vec<Vec<String>>,
}

/// Renders every line as silence long enough to read its caption.
struct SilentSynthesizer;

#[async_trait]
impl Synthesizer for SilentSynthesizer {
    async fn synthesize(&self, text: &str, voice: &LineVoice) -> Result<AudioHandle, SynthesisError> {
        let words = text.split_whitespace().count().max(1);
        Ok(AudioHandle::new(
            voice.name(),
            vec![0.0; words * SAMPLES_PER_WORD],
            SAMPLE_RATE,
        ))
    }
}

/// Prints each caption and acknowledges with the audio's length.
struct StdoutSink {
    last: Option<AudioHandle>,
}

#[async_trait]
impl PlaybackSink for StdoutSink {
    async fn dispatch(&mut self, audio: AudioHandle, caption: &str) -> anyhow::Result<()> {
        println!("[{}] {caption}", audio.voice);
        self.last = Some(audio);
        Ok(())
    }

    async fn playback_finished(&mut self) -> anyhow::Result<PlaybackAck> {
        let duration = self
            .last
            .take()
            .map(|audio| audio.duration())
            .unwrap_or_default();
        Ok(PlaybackAck { duration })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries captions only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("troupe=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(script_path) = args.get(1) else {
        eprintln!("usage: troupe-replay <script.json> [config.toml]");
        eprintln!("  config defaults to {}", DialogueConfig::default_config_path().display());
        std::process::exit(2);
    };
    let config = match args.get(2) {
        Some(path) => DialogueConfig::from_file(Path::new(path))?,
        None => {
            let path = DialogueConfig::default_config_path();
            if path.exists() {
                info!(path = %path.display(), "using default config");
                DialogueConfig::from_file(&path)?
            } else {
                DialogueConfig::default()
            }
        }
    };

    run(Path::new(script_path), config).await?;
    Ok(())
}

async fn run(script_path: &Path, config: DialogueConfig) -> troupe::Result<()> {
    let raw = std::fs::read_to_string(script_path)?;
    let script: Script = serde_json::from_str(&raw)
        .map_err(|e| TroupeError::Config(format!("invalid script {}: {e}", script_path.display())))?;

    let roster: Roster = script.characters.iter().map(String::as_str).collect();
    let mut conversation = ConversationState::new(roster, script.mode);
    if let Some(name) = script.forced_speaker {
        conversation = conversation.with_forced_speaker(name);
    }

    let source: Arc<dyn TokenSource> = if script.attempts.is_empty() {
        info!(url = %config.source.api_url, "no scripted attempts, using live endpoint");
        Arc::new(ApiTokenSource::new(config.source.clone()))
    } else {
        Arc::new(ScriptedSource::new(script.attempts))
    };

    let (events_tx, mut events_rx) = broadcast::channel(64);
    let mut coordinator = DialogueCoordinator::new(
        config,
        conversation,
        source,
        Arc::new(SilentSynthesizer),
    )?
    .with_runtime_events(events_tx);

    let cancel = coordinator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, ending conversation");
            cancel.cancel();
        }
    });
    tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            match event {
                RuntimeEvent::BehaviorTriggered(b) => {
                    info!(behavior = %b.behavior, speaker = %b.speaker, "behavior triggered");
                }
                RuntimeEvent::AttemptRetrying { attempt, code, .. } => {
                    info!(attempt, code, "retrying");
                }
                _ => {}
            }
        }
    });

    let transcript: Vec<TranscriptEntry> = script
        .player_line
        .into_iter()
        .map(TranscriptEntry::Player)
        .collect();
    let mut sink = StdoutSink { last: None };
    let report = coordinator.respond(&transcript, &[], &mut sink).await?;
    info!(
        attempts = report.attempts,
        lines = report.delivered.len(),
        outcome = ?report.outcome,
        "replay finished"
    );
    Ok(())
}
