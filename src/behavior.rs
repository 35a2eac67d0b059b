//! Bracket-style behavior triggers embedded in generated dialogue.
//!
//! The model can append tokens such as `[follow]` or `[attack]` to a line.
//! Completed sentences are scanned word by word; recognized triggers are
//! removed before the text is voiced and forwarded to the embedding
//! application through a hook.
//!
//! Behaviors are registered through a static identifier → constructor table
//! ([`BUILTIN_BEHAVIORS`]) resolved at startup.

use std::sync::Arc;

use tracing::{debug, info, warn};

/// A behavior that fired for a sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredBehavior {
    /// Identifier of the behavior (e.g. `"follow"`).
    pub behavior: String,
    /// Character whose line contained the trigger.
    pub speaker: String,
    /// Full sentence the trigger appeared in, before stripping.
    pub sentence: String,
}

/// A registered behavior.
pub trait Behavior: Send + Sync {
    /// Unique machine-readable identifier.
    fn id(&self) -> &str;

    /// Keyword the model writes between the trigger markers.
    fn keyword(&self) -> &str;

    /// Short description, used when listing behaviors in the prompt.
    fn description(&self) -> &str;

    /// Fire the behavior for `speaker`.
    ///
    /// # Errors
    ///
    /// An error means the behavior refused to activate; the trigger word is
    /// then left in the sentence.
    fn activate(&self, speaker: &str, sentence: &str) -> anyhow::Result<TriggeredBehavior> {
        Ok(TriggeredBehavior {
            behavior: self.id().to_owned(),
            speaker: speaker.to_owned(),
            sentence: sentence.to_owned(),
        })
    }
}

/// Evaluates one candidate trigger token.
pub trait BehaviorDispatcher: Send + Sync {
    /// Evaluate `token` (the text between the trigger markers).
    ///
    /// An empty result means the token is not a trigger.
    ///
    /// # Errors
    ///
    /// Failures are treated as "not recognized" by the caller.
    fn evaluate(
        &self,
        token: &str,
        speaker: &str,
        sentence: &str,
    ) -> anyhow::Result<Vec<TriggeredBehavior>>;
}

/// Callback invoked for every triggered behavior.
pub type BehaviorHook = Arc<dyn Fn(&TriggeredBehavior) -> anyhow::Result<()> + Send + Sync>;

/// Behavior keyed by a fixed trigger keyword.
struct KeywordBehavior {
    id: &'static str,
    description: &'static str,
}

impl Behavior for KeywordBehavior {
    fn id(&self) -> &str {
        self.id
    }

    fn keyword(&self) -> &str {
        self.id
    }

    fn description(&self) -> &str {
        self.description
    }
}

/// Constructor for a registered behavior.
pub type BehaviorConstructor = fn() -> Box<dyn Behavior>;

fn keyword(id: &'static str, description: &'static str) -> Box<dyn Behavior> {
    Box::new(KeywordBehavior { id, description })
}

fn follow() -> Box<dyn Behavior> {
    keyword("follow", "The character starts following the player.")
}

fn inventory() -> Box<dyn Behavior> {
    keyword("inventory", "The character opens their inventory to trade or share.")
}

fn offended() -> Box<dyn Behavior> {
    keyword("offended", "The character is insulted and turns hostile.")
}

fn forgiven() -> Box<dyn Behavior> {
    keyword("forgiven", "The character forgives the player and calms down.")
}

fn attack() -> Box<dyn Behavior> {
    keyword("attack", "The character attacks whoever they are talking to.")
}

fn wait() -> Box<dyn Behavior> {
    keyword("wait", "The character stops following and waits here.")
}

/// Built-in behaviors, by identifier.
pub const BUILTIN_BEHAVIORS: &[(&str, BehaviorConstructor)] = &[
    ("follow", follow),
    ("inventory", inventory),
    ("offended", offended),
    ("forgiven", forgiven),
    ("attack", attack),
    ("wait", wait),
];

/// A collection of registered behaviors with an optional hook.
#[derive(Default)]
pub struct BehaviorRegistry {
    behaviors: Vec<Box<dyn Behavior>>,
    hook: Option<BehaviorHook>,
}

impl BehaviorRegistry {
    /// Create a registry from a list of behaviors.
    pub fn new(behaviors: Vec<Box<dyn Behavior>>) -> Self {
        Self {
            behaviors,
            hook: None,
        }
    }

    /// Build a registry from built-in identifiers. Unknown identifiers are
    /// skipped with a warning.
    pub fn from_names(names: &[String]) -> Self {
        let behaviors = names
            .iter()
            .filter_map(|name| {
                let found = BUILTIN_BEHAVIORS
                    .iter()
                    .find(|(id, _)| id.eq_ignore_ascii_case(name));
                if found.is_none() {
                    warn!(behavior = %name, "unknown behavior in config, skipping");
                }
                found.map(|(_, construct)| construct())
            })
            .collect();
        Self::new(behaviors)
    }

    /// Attach a hook invoked for every triggered behavior.
    pub fn with_hook(mut self, hook: BehaviorHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Register an additional behavior.
    pub fn register(&mut self, behavior: Box<dyn Behavior>) {
        self.behaviors.push(behavior);
    }

    /// Look up a behavior by identifier.
    pub fn get(&self, id: &str) -> Option<&dyn Behavior> {
        self.behaviors
            .iter()
            .find(|b| b.id() == id)
            .map(|b| b.as_ref())
    }

    /// Prompt fragment listing the registered triggers.
    pub fn prompt_fragment(&self, prefix: &str, suffix: &str) -> String {
        self.behaviors
            .iter()
            .map(|b| format!("{prefix}{}{suffix}: {}", b.keyword(), b.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of registered behaviors.
    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    /// Whether no behaviors are registered.
    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}

impl BehaviorDispatcher for BehaviorRegistry {
    fn evaluate(
        &self,
        token: &str,
        speaker: &str,
        sentence: &str,
    ) -> anyhow::Result<Vec<TriggeredBehavior>> {
        let mut triggered = Vec::new();
        for behavior in self
            .behaviors
            .iter()
            .filter(|b| b.keyword().eq_ignore_ascii_case(token))
        {
            let fired = behavior.activate(speaker, sentence)?;
            if let Some(hook) = &self.hook {
                hook(&fired)?;
            }
            info!(behavior = %fired.behavior, speaker = %speaker, "behavior triggered");
            triggered.push(fired);
        }
        Ok(triggered)
    }
}

/// Result of scanning one sentence for triggers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerScan {
    /// Sentence text with recognized triggers removed.
    pub text: String,
    /// Behaviors that fired, in sentence order.
    pub triggered: Vec<TriggeredBehavior>,
    /// An unterminated trigger cut the sentence short.
    pub formatting_break: bool,
}

/// Scan a completed sentence for trigger tokens.
///
/// Words containing both markers are evaluated on the text between them.
/// Recognized words are removed (keeping anything outside the markers, such
/// as trailing punctuation); unrecognized words are kept verbatim. A word
/// holding only the prefix ends the sentence there.
pub fn scan_sentence(
    sentence: &str,
    speaker: &str,
    dispatcher: &dyn BehaviorDispatcher,
    prefix: &str,
    suffix: &str,
) -> TriggerScan {
    let mut words: Vec<String> = Vec::new();
    let mut triggered = Vec::new();
    let mut formatting_break = false;

    for word in sentence.split_whitespace() {
        let Some(start) = word.find(prefix) else {
            words.push(word.to_owned());
            continue;
        };
        let inner_start = start + prefix.len();
        let Some(len) = word[inner_start..].find(suffix) else {
            debug!(word, "unterminated trigger, truncating sentence");
            formatting_break = true;
            break;
        };
        let token = &word[inner_start..inner_start + len];
        let recognized = match dispatcher.evaluate(token, speaker, sentence) {
            Ok(fired) => fired,
            Err(e) => {
                warn!(token, error = %e, "behavior dispatch failed, keeping word");
                Vec::new()
            }
        };
        if recognized.is_empty() {
            words.push(word.to_owned());
            continue;
        }
        triggered.extend(recognized);
        let outside = format!(
            "{}{}",
            &word[..start],
            &word[inner_start + len + suffix.len()..]
        );
        if outside.is_empty() {
            continue;
        }
        // Glue leftover punctuation onto the previous word.
        match words.last_mut() {
            Some(last) if !outside.chars().any(char::is_alphanumeric) => last.push_str(&outside),
            _ => words.push(outside),
        }
    }

    TriggerScan {
        text: words.join(" "),
        triggered,
        formatting_break,
    }
}
