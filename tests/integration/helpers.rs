//! Shared helpers for integration tests.

use tokio::sync::broadcast;
use troupe::test_utils::{ScriptedConversation, scripted_conversation};
use troupe::{ConversationMode, DialogueConfig, RuntimeEvent};

/// Group conversation over one scripted fragment list per attempt.
pub(crate) fn group(
    config: DialogueConfig,
    characters: &[&str],
    scripts: Vec<Vec<&str>>,
) -> ScriptedConversation {
    scripted_conversation(config, characters, ConversationMode::Group, scripts)
        .expect("build scripted conversation")
}

/// Let every ready task run.
pub(crate) async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Everything currently buffered on an event receiver.
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<RuntimeEvent>) -> Vec<RuntimeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// `n` copies of the same fragment.
pub(crate) fn repeated(fragment: &str, n: usize) -> Vec<&str> {
    std::iter::repeat_n(fragment, n).collect()
}
