//! Context assembly: the role-tagged messages a token source is opened with.
//!
//! The context is rebuilt from scratch for every attempt. When an earlier
//! attempt already delivered lines, they are appended as a partial turn so
//! the model continues instead of starting over.

use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::{ContextConfig, DialogueConfig};
use crate::dialogue::speaker::Roster;
use crate::pipeline::messages::{DeliveredLine, LineVoice};

/// Message role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    /// A line spoken by one of the model's characters.
    Character(String),
}

impl Role {
    /// Role name on the OpenAI-compatible wire format.
    pub fn wire_role(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant | Self::Character(_) => "assistant",
        }
    }
}

/// One context message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One entry of the conversation so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEntry {
    /// Something the player said.
    Player(String),
    /// Something a character said.
    Character { name: String, text: String },
    /// An in-world event described to the model.
    Event(String),
}

/// What a character remembers from earlier conversations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterMemory {
    pub character: String,
    pub summary: String,
}

/// Rough token estimate: a quarter of the grapheme count, at least one for
/// any non-empty text.
pub fn estimate_tokens(content: &str) -> usize {
    match content.graphemes(true).count() {
        0 => 0,
        count => (count / 4).max(1),
    }
}

/// Builds the context for each attempt.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    config: ContextConfig,
    player_name: String,
    signifier: String,
    narration_start: char,
    narration_end: char,
    behavior_prompt: Option<String>,
}

impl ContextAssembler {
    pub fn new(config: &DialogueConfig) -> Self {
        Self {
            config: config.context.clone(),
            player_name: config.speakers.player_name.clone(),
            signifier: config.speakers.message_signifier.clone(),
            narration_start: config.segmentation.narration_start,
            narration_end: config.segmentation.narration_end,
            behavior_prompt: None,
        }
    }

    /// Append a behavior listing to the system prompt.
    pub fn with_behavior_prompt(mut self, fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        self.behavior_prompt = (!fragment.trim().is_empty()).then_some(fragment);
        self
    }

    /// Fill the system prompt template for `roster`.
    pub fn system_prompt(&self, roster: &Roster) -> String {
        let mut prompt = self
            .config
            .system_prompt
            .replace("{characters}", &join_names(roster.names()))
            .replace("{player}", &self.player_name)
            .replace("{signifier}", self.signifier.trim_end())
            .replace("{narration_start}", &self.narration_start.to_string())
            .replace("{narration_end}", &self.narration_end.to_string());
        if let Some(behaviors) = &self.behavior_prompt {
            prompt.push_str("\n\nActions you can take by writing them at the end of a line:\n");
            prompt.push_str(behaviors);
        }
        prompt
    }

    /// Assemble the full context for one attempt.
    pub fn assemble(
        &self,
        roster: &Roster,
        memories: &[CharacterMemory],
        transcript: &[TranscriptEntry],
        delivered: &[DeliveredLine],
    ) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::new(Role::System, self.system_prompt(roster))];
        messages.extend(
            memories
                .iter()
                .filter(|m| roster.contains(&m.character) && !m.summary.trim().is_empty())
                .map(|m| {
                    ChatMessage::new(
                        Role::System,
                        format!("What {} remembers: {}", m.character, m.summary.trim()),
                    )
                }),
        );

        let mut history: Vec<ChatMessage> =
            transcript.iter().map(|e| self.entry_message(e)).collect();
        if self.config.max_history_messages > 0 && history.len() > self.config.max_history_messages
        {
            let excess = history.len() - self.config.max_history_messages;
            history.drain(..excess);
        }
        messages.extend(history);

        if !delivered.is_empty() {
            let partial = delivered
                .iter()
                .map(|line| self.delivered_text(line))
                .collect::<Vec<_>>()
                .join("\n");
            messages.push(ChatMessage::new(Role::Assistant, partial));
        }

        if self.config.max_context_tokens > 0 {
            messages = trim_to_budget(messages, self.config.max_context_tokens);
        }
        messages
    }

    fn entry_message(&self, entry: &TranscriptEntry) -> ChatMessage {
        match entry {
            TranscriptEntry::Player(text) => ChatMessage::new(
                Role::User,
                format!("{}{}{}", self.player_name, self.signifier, text),
            ),
            TranscriptEntry::Character { name, text } => ChatMessage::new(
                Role::Character(name.clone()),
                format!("{name}{}{text}", self.signifier),
            ),
            TranscriptEntry::Event(text) => ChatMessage::new(
                Role::User,
                format!("{}{text}{}", self.narration_start, self.narration_end),
            ),
        }
    }

    fn delivered_text(&self, line: &DeliveredLine) -> String {
        match &line.voice {
            LineVoice::Character(name) if !line.is_narration => {
                format!("{name}{}{}", self.signifier, line.text)
            }
            _ => format!("{}{}{}", self.narration_start, line.text, self.narration_end),
        }
    }
}

/// "A", "A and B", "A, B and C".
fn join_names(names: &[String]) -> String {
    match names {
        [] => String::new(),
        [only] => only.clone(),
        [rest @ .., last] => format!("{} and {last}", rest.join(", ")),
    }
}

/// Keep every system message and as many of the most recent others as fit.
fn trim_to_budget(messages: Vec<ChatMessage>, max_tokens: usize) -> Vec<ChatMessage> {
    let total: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    if total <= max_tokens {
        return messages;
    }

    let (system, conversation): (Vec<_>, Vec<_>) = messages
        .into_iter()
        .partition(|m| m.role == Role::System);
    let system_tokens: usize = system.iter().map(|m| estimate_tokens(&m.content)).sum();
    let available = max_tokens.saturating_sub(system_tokens);

    let mut kept = Vec::new();
    let mut used = 0;
    for message in conversation.into_iter().rev() {
        let tokens = estimate_tokens(&message.content);
        if used + tokens > available {
            break;
        }
        used += tokens;
        kept.push(message);
    }
    kept.reverse();

    debug!(
        before = total,
        after = system_tokens + used,
        kept = kept.len(),
        "context trimmed to token budget"
    );
    let mut result = system;
    result.extend(kept);
    result
}
