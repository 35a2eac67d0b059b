//! Configuration types for the dialogue interpreter.
//!
//! Everything the streaming interpreter needs (delimiters, batch sizes,
//! retry ceilings, prompt template) lives here. Each section carries its own
//! defaults so a partial TOML file fills in the rest.

use crate::error::{Result, TroupeError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the dialogue interpreter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Speaker announcement and player identity settings.
    pub speakers: SpeakerConfig,
    /// Sentence segmentation and voice-line batching.
    pub segmentation: SegmentationConfig,
    /// Bracket-style behavior triggers.
    pub behaviors: BehaviorConfig,
    /// Retry budgets and stall detection.
    pub retry: RetryConfig,
    /// Synthesis failure handling.
    pub delivery: DeliveryConfig,
    /// Prompt/context assembly.
    pub context: ContextConfig,
    /// Token source (OpenAI-compatible API) settings.
    pub source: SourceConfig,
}

/// Speaker announcement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    /// Marker separating an announced speaker name from their line.
    pub message_signifier: String,
    /// The player's configured name.
    pub player_name: String,
    /// Extra names the model may use for the player.
    pub player_aliases: Vec<String>,
    /// Name of the "system" pseudo-speaker the model sometimes imitates.
    pub system_name: String,
    /// Longest announced name (in words) still treated as an announcement.
    ///
    /// Text before the signifier with more words than this is dialogue that
    /// happens to contain the signifier, not a speaker switch.
    pub max_name_words: usize,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            message_signifier: ": ".to_owned(),
            player_name: "Player".to_owned(),
            player_aliases: vec!["you".to_owned()],
            system_name: "System".to_owned(),
            max_name_words: 5,
        }
    }
}

/// How narrated (roleplay) passages are voiced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NarrationHandling {
    /// Voice narration with the dedicated narrator voice.
    #[default]
    Narrator,
    /// Voice narration with whoever is currently speaking.
    Speaker,
    /// Drop narration entirely.
    Skip,
}

/// Sentence segmentation and batching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Characters that end a sentence.
    pub end_of_sentence_chars: Vec<char>,
    /// Marker that opens a narrated passage.
    pub narration_start: char,
    /// Marker that closes a narrated passage (may equal `narration_start`).
    pub narration_end: char,
    /// Tokens that end the response wherever they appear.
    pub stop_tokens: Vec<String>,
    /// Strip "As an AI, ..." style disclaimer prefixes from sentences.
    pub strip_disclaimers: bool,
    /// Sentences batched into one voice-line before it is synthesized.
    pub sentences_per_voiceline: u32,
    /// Hard cap on sentences per response (0 disables the cap).
    pub max_sentences_per_response: u32,
    /// Narrated passage handling.
    pub narration_handling: NarrationHandling,
    /// Voice name used for narration when handling is `narrator`.
    pub narrator_name: String,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            end_of_sentence_chars: vec!['.', '?', '!', ';', '。', '？', '！', '；'],
            narration_start: '*',
            narration_end: '*',
            stop_tokens: vec!["<|im_end|>".to_owned(), "</s>".to_owned()],
            strip_disclaimers: true,
            sentences_per_voiceline: 2,
            max_sentences_per_response: 999,
            narration_handling: NarrationHandling::default(),
            narrator_name: "Narrator".to_owned(),
        }
    }
}

/// Behavior trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Marker that opens a trigger token.
    pub trigger_prefix: String,
    /// Marker that closes a trigger token.
    pub trigger_suffix: String,
    /// Identifiers of the built-in behaviors to register at startup.
    pub enabled: Vec<String>,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            trigger_prefix: "[".to_owned(),
            trigger_suffix: "]".to_owned(),
            enabled: crate::behavior::BUILTIN_BEHAVIORS
                .iter()
                .map(|(id, _)| (*id).to_owned())
                .collect(),
        }
    }
}

/// Retry budgets for one response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed for stalls, empty generations and source failures.
    pub max_generic_retries: u32,
    /// Invalid speaker announcements tolerated before a random active
    /// character is forced.
    pub max_bad_speaker_retries: u32,
    /// Times the model may speak as the system before the response is
    /// ended.
    pub max_system_loop_retries: u32,
    /// Consecutive identical fragments tolerated before a stall is raised.
    pub stall_repeat_limit: u32,
    /// Line spoken when the response is aborted (empty disables it).
    pub fallback_line: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_generic_retries: 5,
            max_bad_speaker_retries: 5,
            max_system_loop_retries: 3,
            stall_repeat_limit: 5,
            fallback_line: "I'm sorry, I lost my train of thought.".to_owned(),
        }
    }
}

/// Synthesis failure handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Replace a line that fails to synthesize with `apology_line` and keep
    /// going, instead of failing the response.
    pub substitute_apology_on_synthesis_failure: bool,
    /// Line synthesized in place of one that failed.
    pub apology_line: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            substitute_apology_on_synthesis_failure: false,
            apology_line: "Sorry, I can't find the words.".to_owned(),
        }
    }
}

/// Prompt/context assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// System prompt template.
    ///
    /// Placeholders: `{player}`, `{characters}`, `{signifier}`,
    /// `{narration_start}`, `{narration_end}`.
    pub system_prompt: String,
    /// Maximum transcript messages retained (0 disables trimming).
    pub max_history_messages: usize,
    /// Estimated token budget for the whole context (0 disables trimming).
    pub max_context_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_history_messages: 40,
            max_context_tokens: 8_192,
        }
    }
}

/// Default system prompt template.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are voicing the characters {characters} in a conversation with {player}.\n\
Start every line with the speaking character's name followed by \"{signifier}\".\n\
Wrap narrated actions in {narration_start} and {narration_end}.\n\
Keep each line to a few short spoken sentences and never speak for {player}.";

/// How streamed deltas are turned into dialogue text.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Deltas are dialogue text.
    #[default]
    Plain,
    /// Deltas build a JSON object; one string field carries the dialogue.
    Structured,
}

/// OpenAI-compatible token source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the API server.
    pub api_url: String,
    /// Model name to request.
    pub api_model: String,
    /// API key (empty for local servers).
    pub api_key: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens to generate per response.
    pub max_tokens: usize,
    /// Delta extraction strategy.
    pub extraction: ExtractionMode,
    /// JSON field carrying dialogue when `extraction` is `structured`.
    pub structured_field: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            // Ollama default endpoint.
            api_url: "http://localhost:11434".to_owned(),
            api_model: "llama3.1:8b".to_owned(),
            api_key: String::new(),
            temperature: 0.8,
            max_tokens: 250,
            extraction: ExtractionMode::default(),
            structured_field: "response".to_owned(),
        }
    }
}

impl DialogueConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| TroupeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TroupeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/troupe/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp/troupe-config"))
            .join("troupe")
            .join("config.toml")
    }

    /// Reject settings the interpreter cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`TroupeError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.speakers.message_signifier.trim().is_empty() {
            return Err(TroupeError::Config(
                "speakers.message_signifier must not be blank".to_owned(),
            ));
        }
        if self.segmentation.sentences_per_voiceline == 0 {
            return Err(TroupeError::Config(
                "segmentation.sentences_per_voiceline must be at least 1".to_owned(),
            ));
        }
        if self.segmentation.end_of_sentence_chars.is_empty() {
            return Err(TroupeError::Config(
                "segmentation.end_of_sentence_chars must not be empty".to_owned(),
            ));
        }
        let narration = [
            self.segmentation.narration_start,
            self.segmentation.narration_end,
        ];
        if narration
            .iter()
            .any(|c| self.segmentation.end_of_sentence_chars.contains(c))
        {
            return Err(TroupeError::Config(
                "narration delimiters must not double as end-of-sentence characters".to_owned(),
            ));
        }
        if self.behaviors.trigger_prefix.is_empty() || self.behaviors.trigger_suffix.is_empty() {
            return Err(TroupeError::Config(
                "behavior trigger markers must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}
