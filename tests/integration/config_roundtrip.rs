//! Config persistence.

use troupe::config::{ExtractionMode, NarrationHandling};
use troupe::{DialogueConfig, TroupeError};

#[test]
fn save_and_load_roundtrip() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("nested").join("config.toml");

    let mut config = DialogueConfig::default();
    config.speakers.player_name = "Dragonborn".to_owned();
    config.segmentation.sentences_per_voiceline = 3;
    config.segmentation.narration_handling = NarrationHandling::Skip;
    config.source.extraction = ExtractionMode::Structured;
    config.behaviors.enabled = vec!["follow".to_owned(), "wait".to_owned()];
    config.save_to_file(&path).expect("save config");

    let loaded = DialogueConfig::from_file(&path).expect("load config");
    assert_eq!(loaded.speakers.player_name, "Dragonborn");
    assert_eq!(loaded.segmentation.sentences_per_voiceline, 3);
    assert_eq!(loaded.segmentation.narration_handling, NarrationHandling::Skip);
    assert_eq!(loaded.source.extraction, ExtractionMode::Structured);
    assert_eq!(loaded.behaviors.enabled, ["follow", "wait"]);
}

#[test]
fn partial_file_fills_defaults() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[retry]\nmax_generic_retries = 2\n\n[segmentation]\nnarration_handling = \"speaker\"\n",
    )
    .expect("write config");

    let loaded = DialogueConfig::from_file(&path).expect("load config");
    let defaults = DialogueConfig::default();
    assert_eq!(loaded.retry.max_generic_retries, 2);
    assert_eq!(
        loaded.retry.max_bad_speaker_retries,
        defaults.retry.max_bad_speaker_retries
    );
    assert_eq!(loaded.segmentation.narration_handling, NarrationHandling::Speaker);
    assert_eq!(loaded.speakers.message_signifier, ": ");
}

#[test]
fn invalid_file_is_rejected() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[segmentation]\nsentences_per_voiceline = 0\n").expect("write config");

    let err = DialogueConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, TroupeError::Config(_)));
}
