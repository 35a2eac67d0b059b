//! Streaming dialogue interpretation: speakers, sentences, narration and
//! voice-line batching.

pub mod batcher;
pub mod cleanup;
pub mod narration;
pub mod segmenter;
pub mod speaker;

use serde::{Deserialize, Serialize};

use self::speaker::{Roster, SpeakerIdentity};

/// Who may take part in the conversation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    /// The player and a single character.
    OneOnOne,
    /// The player and several characters.
    #[default]
    Group,
    /// Characters talking among themselves; the player may not speak.
    Radiant,
}

/// Per-attempt conversation state.
///
/// The coordinator keeps a template and clones it at the start of every
/// attempt, so a retry always starts from the same defaults. Narration mode
/// lives in the attempt's segmenter and is rebuilt alongside it.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub roster: Roster,
    pub mode: ConversationMode,
    /// Speaker assumed until the model announces someone else.
    pub forced_speaker: Option<String>,
    pub current_speaker: SpeakerIdentity,
}

impl ConversationState {
    pub fn new(roster: Roster, mode: ConversationMode) -> Self {
        Self {
            roster,
            mode,
            forced_speaker: None,
            current_speaker: SpeakerIdentity::Unresolved,
        }
    }

    /// Force a speaker until the model announces another.
    pub fn with_forced_speaker(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.current_speaker = SpeakerIdentity::Character(name.clone());
        self.forced_speaker = Some(name);
        self
    }

    /// Speaker to use for text that arrives before any announcement.
    pub fn default_speaker(&self) -> Option<&str> {
        if let Some(forced) = &self.forced_speaker {
            return Some(forced.as_str());
        }
        match (self.mode, self.roster.names()) {
            (ConversationMode::OneOnOne, [only]) => Some(only.as_str()),
            _ => None,
        }
    }

    /// Attempt-start copy with the forced speaker restored.
    pub fn fresh_attempt(&self) -> Self {
        let mut state = self.clone();
        state.current_speaker = match &self.forced_speaker {
            Some(name) => SpeakerIdentity::Character(name.clone()),
            None => SpeakerIdentity::Unresolved,
        };
        state
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn one_on_one_defaults_to_only_character() {
        let state = ConversationState::new(
            ["Lydia"].into_iter().collect(),
            ConversationMode::OneOnOne,
        );
        assert_eq!(state.default_speaker(), Some("Lydia"));
    }

    #[test]
    fn group_has_no_default_speaker() {
        let state = ConversationState::new(
            ["Lydia", "Bob"].into_iter().collect(),
            ConversationMode::Group,
        );
        assert_eq!(state.default_speaker(), None);
    }

    #[test]
    fn fresh_attempt_restores_forced_speaker() {
        let template = ConversationState::new(
            ["Lydia", "Bob"].into_iter().collect(),
            ConversationMode::Group,
        )
        .with_forced_speaker("Bob");
        let mut state = template.fresh_attempt();
        state.current_speaker = SpeakerIdentity::Character("Lydia".to_owned());

        let reset = template.fresh_attempt();
        assert_eq!(reset.current_speaker, SpeakerIdentity::Character("Bob".to_owned()));
        assert_ne!(state.current_speaker, reset.current_speaker);
    }
}
