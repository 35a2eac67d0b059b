//! Speaker identities, the active roster and announcement resolution.
//!
//! The model announces who is talking with `Name: line`. The text before the
//! message signifier is normalized and classified against the player's
//! aliases, the system pseudo-speaker and the active roster.

use std::collections::HashSet;
use std::fmt;

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use super::ConversationMode;
use crate::config::SpeakerConfig;
use crate::error::AttemptError;
use crate::pipeline::retry::{BadSpeakerVerdict, RetryBudget};

/// Lowercased inside names ("Balgruuf the Greater").
const NAME_PARTICLES: &[&str] = &[
    "the", "of", "and", "a", "an", "in", "on", "at", "to", "for", "from", "with",
];

/// Who is talking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SpeakerIdentity {
    /// A named active character.
    Character(String),
    /// The human player.
    Player,
    /// The "system" pseudo-speaker.
    System,
    /// Not known yet.
    Unresolved,
}

impl SpeakerIdentity {
    /// Character name, if this is a character.
    pub fn character_name(&self) -> Option<&str> {
        match self {
            Self::Character(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for SpeakerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Character(name) => f.write_str(name),
            Self::Player => f.write_str("player"),
            Self::System => f.write_str("system"),
            Self::Unresolved => f.write_str("unresolved"),
        }
    }
}

/// Normalize capitalization per word, lowercasing particles after the first
/// word.
///
/// Idempotent: `normalize_name(&normalize_name(x)) == normalize_name(x)`.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if i > 0 && NAME_PARTICLES.contains(&lower.as_str()) {
                return lower;
            }
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip formatting the model wraps around names (`**Bob**`, `"Bob"`,
/// leading list markers) and keep only the last line.
pub fn clean_candidate(raw: &str) -> &str {
    let last_line = raw.rsplit('\n').next().unwrap_or(raw);
    last_line
        .trim()
        .trim_matches(|c: char| {
            matches!(c, '*' | '_' | '"' | '\'' | '#' | '-' | '“' | '”' | '[' | ']')
        })
        .trim()
}

/// Active characters in the conversation, insertion-ordered and unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    names: Vec<String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a character. Returns `false` if an equivalent name is present.
    pub fn add(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if name.trim().is_empty() || self.contains(&name) {
            return false;
        }
        self.names.push(name);
        true
    }

    /// Remove a character. Returns `false` if it was not present.
    pub fn remove(&mut self, name: &str) -> bool {
        let key = normalize_name(name);
        let before = self.names.len();
        self.names.retain(|n| normalize_name(n) != key);
        self.names.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Roster spelling of `name`, compared after normalization.
    pub fn find(&self, name: &str) -> Option<&str> {
        let key = normalize_name(name);
        self.names
            .iter()
            .find(|n| normalize_name(n) == key)
            .map(String::as_str)
    }

    /// Uniformly random active character.
    pub fn pick_random<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        self.names.choose(rng).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Roster {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut roster = Self::new();
        for name in iter {
            roster.add(name);
        }
        roster
    }
}

/// Outcome of resolving an announced name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// An active character is speaking.
    Character { name: String, partial: bool },
    /// The model handed the turn back to the player.
    Player,
    /// The model keeps speaking as the system; end the response.
    SystemHalt,
    /// The bad-speaker budget ran out and a random character was forced.
    Fallback { name: String },
}

/// Classifies announced speaker names.
#[derive(Debug, Clone)]
pub struct SpeakerResolver {
    player_aliases: HashSet<String>,
    system_name: String,
}

impl SpeakerResolver {
    pub fn new(config: &SpeakerConfig) -> Self {
        let mut player_aliases = HashSet::new();
        let player = normalize_name(&config.player_name);
        for word in player.split_whitespace() {
            if !NAME_PARTICLES.contains(&word.to_lowercase().as_str()) {
                player_aliases.insert(word.to_owned());
            }
        }
        player_aliases.insert(player);
        player_aliases.extend(config.player_aliases.iter().map(|a| normalize_name(a)));
        player_aliases.remove("");

        Self {
            player_aliases,
            system_name: normalize_name(&config.system_name),
        }
    }

    /// Whether `name` refers to the player.
    pub fn is_player(&self, name: &str) -> bool {
        self.player_aliases.contains(&normalize_name(name))
    }

    /// Whether `candidate` names someone the resolver knows: a player alias,
    /// the system, or an active character (exactly or by one word).
    ///
    /// Spends no budget.
    pub fn recognizes(&self, candidate: &str, roster: &Roster) -> bool {
        let name = normalize_name(clean_candidate(candidate));
        if name.is_empty() {
            return false;
        }
        self.player_aliases.contains(&name)
            || name == self.system_name
            || roster.find(&name).is_some()
            || partial_match(&name, roster).is_some()
    }

    /// Resolve one announced name.
    ///
    /// Budgets are charged here: invalid names spend the bad-speaker budget
    /// (falling back to a random active character once it is exhausted) and
    /// system announcements spend the system-loop budget.
    ///
    /// # Errors
    ///
    /// Returns [`AttemptError::InvalidSpeaker`] when the attempt should be
    /// retried.
    pub fn resolve<R: Rng + ?Sized>(
        &self,
        candidate: &str,
        roster: &Roster,
        mode: ConversationMode,
        budget: &mut RetryBudget,
        rng: &mut R,
    ) -> Result<Resolution, AttemptError> {
        let cleaned = clean_candidate(candidate);
        let name = normalize_name(cleaned);

        if !name.is_empty() && self.player_aliases.contains(&name) {
            if mode == ConversationMode::Radiant {
                warn!(candidate = %cleaned, "player announced in radiant conversation");
                return self.reject(cleaned, roster, budget, rng);
            }
            return Ok(Resolution::Player);
        }

        if !name.is_empty() && name == self.system_name {
            if budget.consume_system_loop() {
                warn!(
                    remaining = budget.system_loop_remaining(),
                    "model spoke as the system, retrying"
                );
                return Err(AttemptError::InvalidSpeaker {
                    candidate: cleaned.to_owned(),
                });
            }
            warn!("system-loop budget exhausted, ending response");
            return Ok(Resolution::SystemHalt);
        }

        if let Some(found) = roster.find(&name) {
            budget.reset_bad_speaker();
            return Ok(Resolution::Character {
                name: found.to_owned(),
                partial: false,
            });
        }

        if let Some(found) = partial_match(&name, roster) {
            info!(candidate = %cleaned, speaker = %found, "resolved speaker by partial match");
            return Ok(Resolution::Character {
                name: found.to_owned(),
                partial: true,
            });
        }

        self.reject(cleaned, roster, budget, rng)
    }

    fn reject<R: Rng + ?Sized>(
        &self,
        candidate: &str,
        roster: &Roster,
        budget: &mut RetryBudget,
        rng: &mut R,
    ) -> Result<Resolution, AttemptError> {
        let invalid = || AttemptError::InvalidSpeaker {
            candidate: candidate.to_owned(),
        };
        match budget.record_bad_speaker() {
            BadSpeakerVerdict::Retry => {
                warn!(
                    candidate,
                    remaining = budget.bad_speaker_remaining(),
                    "invalid speaker"
                );
                Err(invalid())
            }
            BadSpeakerVerdict::Exhausted => {
                let name = roster.pick_random(rng).ok_or_else(invalid)?;
                warn!(candidate, speaker = %name, "bad-speaker budget exhausted, forcing speaker");
                Ok(Resolution::Fallback {
                    name: name.to_owned(),
                })
            }
        }
    }
}

/// First roster name containing `name` as one of its words.
fn partial_match<'a>(name: &str, roster: &'a Roster) -> Option<&'a str> {
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    roster
        .names()
        .iter()
        .find(|full| {
            normalize_name(full)
                .split_whitespace()
                .filter(|w| !NAME_PARTICLES.contains(w))
                .any(|w| w == name)
        })
        .map(String::as_str)
}
