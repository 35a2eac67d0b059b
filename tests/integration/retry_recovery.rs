//! Retry budgets and state reset across attempts.

use tokio::sync::broadcast;
use troupe::pipeline::attempt::AttemptEnd;
use troupe::test_utils::{ManualAckSink, scripted_conversation};
use troupe::{
    AttemptError, ConversationMode, DialogueConfig, ResponseOutcome, Role, RuntimeEvent,
};

use crate::helpers::{drain_events, group, repeated};

#[tokio::test]
async fn stall_retry_restores_forced_speaker() {
    let mut stalled = vec!["Bob: Hi there"];
    stalled.extend(repeated("Hmm", 6));
    let mut convo = group(
        DialogueConfig::default(),
        &["Bob", "Lydia"],
        vec![stalled, vec!["Hello again."]],
    );
    let conversation = convo.coordinator.conversation().clone().with_forced_speaker("Lydia");
    *convo.coordinator.conversation_mut() = conversation;
    let (mut sink, log) = ManualAckSink::auto_ack();
    let report = convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert!(report.outcome.is_completed());
    assert_eq!(report.attempts, 2);
    assert_eq!(log.dispatched(), ["Hello again."]);
    assert_eq!(convo.synthesizer.requests()[0].0, "Lydia");
}

#[tokio::test]
async fn retry_context_includes_delivered_lines() {
    let mut config = DialogueConfig::default();
    config.segmentation.sentences_per_voiceline = 1;
    let mut stalled = vec!["Bob: First line. "];
    stalled.extend(repeated("Hmm", 6));
    let mut convo = group(config, &["Bob"], vec![stalled, vec!["Bob: Second line."]]);
    let (mut sink, log) = ManualAckSink::auto_ack();
    let report = convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert!(report.outcome.is_completed());
    assert_eq!(log.dispatched(), ["First line.", "Second line."]);
    let requests = convo.source.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].iter().all(|m| m.role != Role::Assistant));
    let partial = requests[1].last().unwrap();
    assert_eq!(partial.role, Role::Assistant);
    assert_eq!(partial.content, "Bob: First line.");
}

#[tokio::test]
async fn bad_speaker_budget_forces_random_character() {
    let (tx, mut rx) = broadcast::channel(128);
    let scripts: Vec<Vec<&str>> = (0..6).map(|_| vec!["Stranger: Hello."]).collect();
    let mut convo = group(DialogueConfig::default(), &["Bob", "Lydia"], scripts);
    convo.coordinator = convo.coordinator.with_runtime_events(tx);
    let (mut sink, log) = ManualAckSink::auto_ack();
    let report = convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert!(report.outcome.is_completed());
    assert_eq!(report.attempts, 6);
    assert_eq!(log.dispatched(), ["Hello."]);
    let voice = &convo.synthesizer.requests()[0].0;
    assert!(voice == "Bob" || voice == "Lydia");

    let events = drain_events(&mut rx);
    let retries = events
        .iter()
        .filter(|e| matches!(e, RuntimeEvent::AttemptRetrying { code: "INVALID_SPEAKER", .. }))
        .count();
    assert_eq!(retries, 5);
    assert!(events.iter().any(|e| matches!(
        e,
        RuntimeEvent::SpeakerResolved { forced: true, .. }
    )));
}

#[tokio::test]
async fn system_speaker_loop_ends_response() {
    let scripts: Vec<Vec<&str>> = (0..4).map(|_| vec!["System: Continue the scene."]).collect();
    let mut convo = group(DialogueConfig::default(), &["Bob"], scripts);
    let (mut sink, log) = ManualAckSink::auto_ack();
    let report = convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert!(matches!(
        report.outcome,
        ResponseOutcome::Completed(AttemptEnd::SystemHalt)
    ));
    assert_eq!(report.attempts, 4);
    assert!(log.dispatched().is_empty());
}

#[tokio::test]
async fn player_may_not_speak_in_radiant_conversation() {
    let mut convo = scripted_conversation(
        DialogueConfig::default(),
        &["Bob", "Lydia"],
        ConversationMode::Radiant,
        vec![vec!["Player: Hi."], vec!["Bob: Nice weather."]],
    )
    .unwrap();
    let (mut sink, log) = ManualAckSink::auto_ack();
    let report = convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert_eq!(report.attempts, 2);
    assert_eq!(log.dispatched(), ["Nice weather."]);
}

#[tokio::test]
async fn repeated_stalls_abort_with_fallback_line() {
    let mut config = DialogueConfig::default();
    config.retry.max_generic_retries = 2;
    config.retry.fallback_line = "Let us talk later.".to_owned();
    let scripts: Vec<Vec<&str>> = (0..3).map(|_| repeated("Hmm", 6)).collect();
    let mut convo = group(config, &["Bob", "Lydia"], scripts);
    let (mut sink, log) = ManualAckSink::auto_ack();
    let report = convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert!(matches!(
        report.outcome,
        ResponseOutcome::Aborted(AttemptError::StreamStall { .. })
    ));
    assert_eq!(report.attempts, 3);
    assert_eq!(log.dispatched(), ["Let us talk later."]);
    assert_eq!(convo.synthesizer.requests()[0].0, "Bob");
}

#[tokio::test]
async fn empty_first_utterance_is_retried() {
    let mut convo = group(
        DialogueConfig::default(),
        &["Bob"],
        vec![vec!["Bob: ", "*", "*"], vec!["Bob: Sorry, where was I?"]],
    );
    let (mut sink, log) = ManualAckSink::auto_ack();
    let report = convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert!(report.outcome.is_completed());
    assert_eq!(report.attempts, 2);
    assert_eq!(log.dispatched(), ["Sorry, where was I?"]);
}
