//! Pacing between generation and playback.

use std::time::Duration;

use troupe::DialogueConfig;
use troupe::pipeline::attempt::AttemptEnd;
use troupe::test_utils::{ManualAckSink, SinkEvent};
use troupe::ResponseOutcome;

use crate::helpers::{group, settle};

fn one_sentence_per_line() -> DialogueConfig {
    let mut config = DialogueConfig::default();
    config.segmentation.sentences_per_voiceline = 1;
    config
}

#[tokio::test]
async fn playback_order_matches_batch_order() {
    let mut convo = group(
        one_sentence_per_line(),
        &["Bob", "Lydia"],
        vec![vec!["Bob: One.", " Two.", "\nLydia: Three.", " *nods*", " Four."]],
    );
    let (mut sink, log) = ManualAckSink::auto_ack();
    convo.coordinator.respond(&[], &[], &mut sink).await.unwrap();

    assert_eq!(log.dispatched(), ["One.", "Two.", "Three.", "nods", "Four."]);
    // Every dispatch is acknowledged before the next one.
    let events = log.events();
    for pair in events.chunks(2) {
        assert!(matches!(pair[0], SinkEvent::Dispatched(_)));
        assert_eq!(pair[1], SinkEvent::Acked);
    }
}

#[tokio::test]
async fn synthesis_runs_at_most_one_line_ahead() {
    let mut convo = group(
        one_sentence_per_line(),
        &["Bob"],
        vec![vec!["Bob: One.", " Two.", " Three.", " Four."]],
    );
    let synth = std::sync::Arc::clone(&convo.synthesizer);
    let (mut sink, acks, log) = ManualAckSink::manual();

    let playback = async {
        for _ in 0..4 {
            settle().await;
            let dispatched = log.dispatched().len();
            let synthesized = synth.requests().len();
            assert!(
                synthesized <= dispatched + 1,
                "synthesized {synthesized} lines with {dispatched} dispatched"
            );
            acks.send(Duration::from_millis(100)).unwrap();
        }
    };
    let (report, ()) = tokio::join!(convo.coordinator.respond(&[], &[], &mut sink), playback);
    let report = report.unwrap();

    assert_eq!(report.playback.dispatched, ["One.", "Two.", "Three.", "Four."]);
    assert_eq!(report.playback.played, Duration::from_millis(400));
}

#[tokio::test]
async fn cancellation_stops_at_line_boundary() {
    let mut convo = group(
        one_sentence_per_line(),
        &["Bob"],
        vec![vec!["Bob: One.", " Two.", " Three.", " Four."]],
    );
    let cancel = convo.coordinator.cancel_token();
    let (mut sink, acks, log) = ManualAckSink::manual();

    let playback = async {
        while log.dispatched().is_empty() {
            tokio::task::yield_now().await;
        }
        cancel.cancel();
        for _ in 0..4 {
            acks.send(Duration::from_millis(10)).unwrap();
        }
    };
    let (report, ()) = tokio::join!(convo.coordinator.respond(&[], &[], &mut sink), playback);
    let report = report.unwrap();

    assert!(matches!(
        report.outcome,
        ResponseOutcome::Completed(AttemptEnd::Cancelled)
    ));
    let dispatched = log.dispatched();
    assert_eq!(dispatched[0], "One.");
    assert!(dispatched.len() < 4);
    // Whole lines only.
    assert!(dispatched.iter().all(|line| line.ends_with('.')));
}
