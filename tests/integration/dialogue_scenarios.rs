//! End-to-end interpretation of single responses.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use troupe::config::{ExtractionMode, NarrationHandling};
use troupe::test_utils::ManualAckSink;
use troupe::{
    BehaviorRegistry, DialogueConfig, ResponseOutcome, RuntimeEvent,
    SpeakerIdentity, TriggeredBehavior,
};

use crate::helpers::{drain_events, group};

#[tokio::test]
async fn announced_speakers_get_their_own_lines() {
    let mut convo = group(
        DialogueConfig::default(),
        &["Bob", "Lydia"],
        vec![vec!["Bob", ": Hello", " there.", "\nLydia: Well met", ". Shall we go?"]],
    );
    let (mut sink, log) = ManualAckSink::auto_ack();
    let report = convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert!(report.outcome.is_completed());
    assert_eq!(log.dispatched(), ["Hello there.", "Well met. Shall we go?"]);
    let voices: Vec<String> = convo
        .synthesizer
        .requests()
        .into_iter()
        .map(|(voice, _)| voice)
        .collect();
    assert_eq!(voices, ["Bob", "Lydia"]);
}

#[tokio::test]
async fn narration_is_voiced_by_narrator() {
    let mut convo = group(
        DialogueConfig::default(),
        &["Bob"],
        vec![vec!["Bob", ": Hello", " there.", " *waves*", " Bye now."]],
    );
    let (mut sink, log) = ManualAckSink::auto_ack();
    convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert_eq!(log.dispatched(), ["Hello there.", "waves", "Bye now."]);
    let requests = convo.synthesizer.requests();
    assert_eq!(requests[1], ("Narrator".to_owned(), "waves".to_owned()));
}

#[tokio::test]
async fn narration_voiced_by_speaker_when_configured() {
    let mut config = DialogueConfig::default();
    config.segmentation.narration_handling = NarrationHandling::Speaker;
    let mut convo = group(config, &["Bob"], vec![vec!["Bob: *sighs* Fine."]]);
    let (mut sink, _log) = ManualAckSink::auto_ack();
    convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    let requests = convo.synthesizer.requests();
    assert!(requests.iter().all(|(voice, _)| voice == "Bob"));
    assert_eq!(requests[0].1, "sighs");
}

#[tokio::test]
async fn partial_name_resolves_to_full_character() {
    let (tx, mut rx) = broadcast::channel(64);
    let mut convo = group(
        DialogueConfig::default(),
        &["City Guard", "Lydia"],
        vec![vec!["Guard: Halt!", " Who goes there?"]],
    );
    convo.coordinator = convo.coordinator.with_runtime_events(tx);
    let (mut sink, log) = ManualAckSink::auto_ack();
    convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert_eq!(log.dispatched(), ["Halt! Who goes there?"]);
    assert_eq!(convo.synthesizer.requests()[0].0, "City Guard");
    let resolved = drain_events(&mut rx).into_iter().find_map(|e| match e {
        RuntimeEvent::SpeakerResolved { speaker, partial, .. } => Some((speaker, partial)),
        _ => None,
    });
    assert_eq!(resolved, Some(("City Guard".to_owned(), true)));
}

#[tokio::test]
async fn normalized_names_resolve_identically() {
    let (tx, mut rx) = broadcast::channel(64);
    let mut convo = group(
        DialogueConfig::default(),
        &["The Dark Brotherhood Assassin"],
        vec![vec!["the dark brotherhood assassin: You. ", "\nThe Dark Brotherhood Assassin: Yes, you."]],
    );
    convo.coordinator = convo.coordinator.with_runtime_events(tx);
    let (mut sink, _log) = ManualAckSink::auto_ack();
    convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    let speakers: Vec<SpeakerIdentity> = drain_events(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            RuntimeEvent::Utterance(u) => Some(u.speaker),
            _ => None,
        })
        .collect();
    assert_eq!(speakers.len(), 2);
    assert_eq!(speakers[0], speakers[1]);
    assert_eq!(
        speakers[0],
        SpeakerIdentity::Character("The Dark Brotherhood Assassin".to_owned())
    );
}

#[tokio::test]
async fn behavior_triggers_are_stripped_and_dispatched() {
    let seen: Arc<Mutex<Vec<TriggeredBehavior>>> = Arc::default();
    let hook_seen = Arc::clone(&seen);
    let registry = BehaviorRegistry::from_names(&["follow".to_owned()]).with_hook(Arc::new(
        move |b: &TriggeredBehavior| {
            hook_seen.lock().unwrap().push(b.clone());
            Ok(())
        },
    ));
    let mut convo = group(
        DialogueConfig::default(),
        &["Lydia"],
        vec![vec!["Lydia: Right behind you. [follow]", "\nLydia: Let us [dance] now."]],
    );
    convo.coordinator = convo.coordinator.with_behaviors(registry);
    let (mut sink, log) = ManualAckSink::auto_ack();
    convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert_eq!(log.dispatched(), ["Right behind you. Let us [dance] now."]);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].behavior, "follow");
    assert_eq!(seen[0].speaker, "Lydia");
}

#[tokio::test]
async fn structured_response_field_is_interpreted() {
    let mut config = DialogueConfig::default();
    config.source.extraction = ExtractionMode::Structured;
    let mut convo = group(
        config,
        &["Lydia"],
        vec![vec![
            r#"{"thought": "Greet them. Smile.", "resp"#,
            r#"onse": "Lydia: Hello, \"friend\"."#,
            r#" *smiles*"}"#,
        ]],
    );
    let (mut sink, log) = ManualAckSink::auto_ack();
    convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert_eq!(log.dispatched(), ["Hello, \"friend\".", "smiles"]);
}

#[tokio::test]
async fn player_hand_off_ends_response() {
    let mut convo = group(
        DialogueConfig::default(),
        &["Bob"],
        vec![vec!["Bob: What say you?", "\nPlayer: I say", " yes."]],
    );
    let (mut sink, log) = ManualAckSink::auto_ack();
    let report = convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert!(matches!(
        report.outcome,
        ResponseOutcome::Completed(troupe::pipeline::attempt::AttemptEnd::PlayerTurn)
    ));
    assert_eq!(log.dispatched(), ["What say you?"]);
}

#[tokio::test]
async fn sentence_limit_caps_response() {
    let mut config = DialogueConfig::default();
    config.segmentation.max_sentences_per_response = 3;
    let mut convo = group(config, &["Bob"], vec![vec!["Bob: One. Two. Three. Four. Five."]]);
    let (mut sink, log) = ManualAckSink::auto_ack();
    convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert_eq!(log.dispatched(), ["One. Two.", "Three."]);
}

#[tokio::test]
async fn synthesis_failure_can_substitute_apology() {
    let mut config = DialogueConfig::default();
    config.delivery.substitute_apology_on_synthesis_failure = true;
    config.delivery.apology_line = "Forgive me.".to_owned();
    let roster: troupe::Roster = ["Bob"].into_iter().collect();
    let source = Arc::new(troupe::ScriptedSource::new([vec!["Bob: Unsayable. Fine."]]));
    let mut coordinator = troupe::DialogueCoordinator::new(
        config,
        troupe::ConversationState::new(roster, troupe::ConversationMode::Group),
        source,
        Arc::new(troupe::test_utils::RecordingSynthesizer::failing_on("Unsayable. Fine.")),
    )
    .unwrap();
    let (mut sink, log) = ManualAckSink::auto_ack();
    let report = coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert!(report.outcome.is_completed());
    assert_eq!(log.dispatched(), ["Forgive me."]);
}

#[tokio::test]
async fn colon_in_group_speech_keeps_the_line() {
    let mut convo = group(
        DialogueConfig::default(),
        &["Bob", "Lydia"],
        vec![vec!["Bob: Listen to me: we leave now."], vec!["Bob: ok."]],
    );
    let (mut sink, log) = ManualAckSink::auto_ack();
    let report = convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert!(report.outcome.is_completed());
    assert_eq!(report.attempts, 1);
    assert_eq!(log.dispatched(), ["Listen to me: we leave now."]);
}

#[tokio::test]
async fn colon_in_one_on_one_speech_keeps_the_line() {
    let mut convo = troupe::test_utils::scripted_conversation(
        DialogueConfig::default(),
        &["Lydia"],
        troupe::ConversationMode::OneOnOne,
        vec![vec!["Here is the deal: you pay me."], vec!["Fine."]],
    )
    .unwrap();
    let (mut sink, log) = ManualAckSink::auto_ack();
    let report = convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert_eq!(report.attempts, 1);
    assert_eq!(log.dispatched(), ["Here is the deal: you pay me."]);
    assert_eq!(convo.synthesizer.requests()[0].0, "Lydia");
}
