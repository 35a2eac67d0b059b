//! Incremental sentence segmentation.
//!
//! Fragments are appended to an in-progress buffer holding only the text not
//! yet turned into events. After each fragment the buffer is cut at, in
//! stream order:
//!
//! - stop tokens (truncate and end the stream),
//! - speaker announcements (`Name: ` at the start of a sentence),
//! - narration markers (split point plus mode toggle),
//! - sentence ends (terminator followed by whitespace or end of text, or a
//!   newline).
//!
//! A narration marker that is the last character received so far is held
//! back until the next fragment, so a doubled marker split over two fragments
//! still counts once.
//!
//! With an [`AnnouncementGate`] attached, a `Words: ` prefix is only an
//! announcement when it names someone known, when no speaker is known yet,
//! or when it opens a line of a conversation that relies on announcements.
//! Otherwise it stays part of the spoken sentence.

use tracing::trace;

use super::cleanup::SentenceCleaner;
use super::narration::NarrationTracker;
use super::speaker::{Roster, SpeakerResolver};
use crate::config::{SegmentationConfig, SpeakerConfig};
use crate::error::Result;

/// Closing characters kept with the sentence they end.
const CLOSING_CHARS: &[char] = &['"', '\'', '”', '’', ')', ']', '」', '»'];

/// Terminators that end a sentence even without following whitespace.
const FULLWIDTH_TERMINATORS: &[char] = &['。', '？', '！', '；'];

/// Something the segmenter recognized in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    /// Raw text announced as the next speaker.
    SpeakerAnnounced(String),
    /// A completed, cleaned sentence.
    Sentence { text: String, narrated: bool },
    /// The narration mode flipped.
    NarrationToggled { narrated: bool },
    /// A stop token ended the stream.
    Stopped,
}

#[derive(Debug, Clone, Copy)]
enum Cut {
    Stop { at: usize },
    Announcement { at: usize },
    Marker { at: usize, width: usize, marker: char },
    Hold { at: usize, marker: char },
    Boundary { end: usize, resume: usize },
}

/// Decides whether a `Name: ` prefix announces a speaker.
#[derive(Debug, Clone)]
pub struct AnnouncementGate {
    resolver: SpeakerResolver,
    roster: Roster,
    /// A speaker is assumed without any announcement (forced or one-on-one).
    has_default: bool,
}

impl AnnouncementGate {
    pub fn new(resolver: SpeakerResolver, roster: Roster, has_default: bool) -> Self {
        Self {
            resolver,
            roster,
            has_default,
        }
    }
}

/// Turns a fragment stream into sentences, announcements and narration
/// toggles.
#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    buffer: String,
    held: Option<char>,
    gate: Option<AnnouncementGate>,
    speaker_known: bool,
    /// The buffer starts a line (stream start or after a newline).
    line_start: bool,
    /// The buffer start was already rejected as an announcement.
    in_speech: bool,
    narration: NarrationTracker,
    cleaner: SentenceCleaner,
    end_chars: Vec<char>,
    stop_tokens: Vec<String>,
    signifier: String,
    max_name_words: usize,
    ended: bool,
}

impl SentenceSegmenter {
    /// Create a segmenter.
    ///
    /// # Errors
    ///
    /// Returns an error if the sentence cleaner cannot be built.
    pub fn new(segmentation: &SegmentationConfig, speakers: &SpeakerConfig) -> Result<Self> {
        Ok(Self {
            buffer: String::new(),
            held: None,
            gate: None,
            speaker_known: false,
            line_start: true,
            in_speech: false,
            narration: NarrationTracker::new(
                segmentation.narration_start,
                segmentation.narration_end,
            ),
            cleaner: SentenceCleaner::new(segmentation.strip_disclaimers)?,
            end_chars: segmentation.end_of_sentence_chars.clone(),
            stop_tokens: segmentation
                .stop_tokens
                .iter()
                .filter(|t| !t.is_empty())
                .cloned()
                .collect(),
            signifier: speakers.message_signifier.clone(),
            max_name_words: speakers.max_name_words,
            ended: false,
        })
    }

    /// Filter announcements through `gate`.
    pub fn with_gate(mut self, gate: AnnouncementGate) -> Self {
        self.speaker_known = gate.has_default;
        self.gate = Some(gate);
        self
    }

    /// Append one fragment and return everything it completed.
    pub fn push(&mut self, fragment: &str) -> Vec<SegmentEvent> {
        let mut events = Vec::new();
        if self.ended {
            return events;
        }
        let mut incoming = fragment;
        if let Some(marker) = self.held.take() {
            // `*` + `*...` is one doubled marker.
            if let Some(rest) = incoming.strip_prefix(marker) {
                incoming = rest;
            }
            self.buffer.push(marker);
        }
        self.buffer.push_str(incoming);
        self.drain(false, &mut events);
        events
    }

    /// End of stream: resolve held markers and flush the remainder.
    pub fn finish(&mut self) -> Vec<SegmentEvent> {
        let mut events = Vec::new();
        if self.ended {
            return events;
        }
        if let Some(marker) = self.held.take() {
            self.buffer.push(marker);
        }
        self.drain(true, &mut events);
        if !self.ended {
            let rest = std::mem::take(&mut self.buffer);
            self.emit_sentence(&rest, &mut events);
            self.ended = true;
        }
        events
    }

    /// Text received but not yet part of any event.
    pub fn pending_text(&self) -> &str {
        &self.buffer
    }

    pub fn is_narrated(&self) -> bool {
        self.narration.is_narrated()
    }

    /// Whether a stop token or end of stream was reached.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn drain(&mut self, at_end: bool, events: &mut Vec<SegmentEvent>) {
        while !self.ended {
            let Some(cut) = self.next_cut(at_end) else {
                break;
            };
            trace!(?cut, "segment cut");
            match cut {
                Cut::Stop { at } => {
                    self.buffer.truncate(at);
                    let rest = std::mem::take(&mut self.buffer);
                    self.emit_sentence(&rest, events);
                    self.held = None;
                    self.ended = true;
                    events.push(SegmentEvent::Stopped);
                }
                Cut::Announcement { at } => {
                    let candidate = self.buffer[..at].to_owned();
                    if !self.accepts_announcement(&candidate) {
                        trace!(candidate = %candidate, "name-like prefix kept as speech");
                        self.in_speech = true;
                        continue;
                    }
                    self.buffer.drain(..at + self.signifier.len());
                    self.speaker_known = true;
                    self.line_start = false;
                    events.push(SegmentEvent::SpeakerAnnounced(candidate));
                }
                Cut::Marker { at, width, marker } => {
                    let before = self.buffer[..at].to_owned();
                    self.emit_sentence(&before, events);
                    self.buffer.drain(..at + width);
                    self.line_start = false;
                    self.in_speech = false;
                    if self.narration.observe(marker) {
                        events.push(SegmentEvent::NarrationToggled {
                            narrated: self.narration.is_narrated(),
                        });
                    }
                }
                Cut::Hold { at, marker } => {
                    self.buffer.truncate(at);
                    self.held = Some(marker);
                    break;
                }
                Cut::Boundary { end, resume } => {
                    let sentence = self.buffer[..end].to_owned();
                    self.line_start = self.buffer[end..resume].contains('\n');
                    self.in_speech = false;
                    self.buffer.drain(..resume);
                    self.emit_sentence(&sentence, events);
                }
            }
        }
    }

    fn next_cut(&self, at_end: bool) -> Option<Cut> {
        let mut best: Option<(usize, Cut)> = None;
        let mut consider = |pos: usize, cut: Cut| {
            if best.is_none_or(|(p, _)| pos < p) {
                best = Some((pos, cut));
            }
        };

        if let Some(at) = self
            .stop_tokens
            .iter()
            .filter_map(|t| self.buffer.find(t.as_str()))
            .min()
        {
            consider(at, Cut::Stop { at });
        }
        if let Some(at) = self.announcement_at() {
            consider(at, Cut::Announcement { at });
        }
        if let Some((pos, cut)) = self.scan_chars(at_end) {
            consider(pos, cut);
        }

        best.map(|(_, cut)| cut)
    }

    /// Position of a speaker announcement at the start of the buffer.
    fn announcement_at(&self) -> Option<usize> {
        if self.in_speech || self.narration.is_narrated() {
            return None;
        }
        let at = self.buffer.find(self.signifier.as_str())?;
        let words = self.buffer[..at].split_whitespace().count();
        (words > 0 && words <= self.max_name_words).then_some(at)
    }

    fn accepts_announcement(&self, candidate: &str) -> bool {
        let Some(gate) = &self.gate else {
            return true;
        };
        !self.speaker_known
            || gate.resolver.recognizes(candidate, &gate.roster)
            || (self.line_start && !gate.has_default)
    }

    /// First narration marker or sentence end in the buffer.
    fn scan_chars(&self, at_end: bool) -> Option<(usize, Cut)> {
        let chars: Vec<(usize, char)> = self.buffer.char_indices().collect();
        for (idx, &(pos, c)) in chars.iter().enumerate() {
            if self.narration.is_delimiter(c) {
                let next = chars.get(idx + 1).map(|&(_, n)| n);
                return Some(match next {
                    Some(n) if n == c => (
                        pos,
                        Cut::Marker {
                            at: pos,
                            width: c.len_utf8() * 2,
                            marker: c,
                        },
                    ),
                    None if !at_end => (pos, Cut::Hold { at: pos, marker: c }),
                    _ => (
                        pos,
                        Cut::Marker {
                            at: pos,
                            width: c.len_utf8(),
                            marker: c,
                        },
                    ),
                });
            }
            if c == '\n' {
                return Some((
                    pos,
                    Cut::Boundary {
                        end: pos,
                        resume: pos + 1,
                    },
                ));
            }
            if !self.end_chars.contains(&c) {
                continue;
            }
            if FULLWIDTH_TERMINATORS.contains(&c) {
                let end = pos + c.len_utf8();
                return Some((pos, Cut::Boundary { end, resume: end }));
            }
            // Swallow runs like `?!` or `...` and closing quotes.
            let mut j = idx + 1;
            while j < chars.len() && self.end_chars.contains(&chars[j].1) {
                j += 1;
            }
            while j < chars.len() && CLOSING_CHARS.contains(&chars[j].1) {
                j += 1;
            }
            match chars.get(j) {
                None => {
                    let end = self.buffer.len();
                    return Some((pos, Cut::Boundary { end, resume: end }));
                }
                Some(&(end, next)) if next.is_whitespace() => {
                    return Some((pos, Cut::Boundary { end, resume: end }));
                }
                Some(_) => {}
            }
        }
        None
    }

    fn emit_sentence(&self, raw: &str, events: &mut Vec<SegmentEvent>) {
        if raw.trim().is_empty() {
            return;
        }
        events.push(SegmentEvent::Sentence {
            text: self.cleaner.clean(raw),
            narrated: self.narration.is_narrated(),
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn segmenter() -> SentenceSegmenter {
        SentenceSegmenter::new(&SegmentationConfig::default(), &SpeakerConfig::default()).unwrap()
    }

    fn feed(seg: &mut SentenceSegmenter, fragments: &[&str]) -> Vec<SegmentEvent> {
        fragments.iter().flat_map(|f| seg.push(f)).collect()
    }

    fn sentence(text: &str, narrated: bool) -> SegmentEvent {
        SegmentEvent::Sentence {
            text: text.to_owned(),
            narrated,
        }
    }

    #[test]
    fn announcement_then_sentence_then_narration() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["Bob", ": Hello", " there.", " *waves*"]);
        assert_eq!(
            events,
            vec![
                SegmentEvent::SpeakerAnnounced("Bob".to_owned()),
                sentence("Hello there.", false),
                SegmentEvent::NarrationToggled { narrated: true },
            ]
        );
        assert!(seg.is_narrated());
        assert_eq!(seg.pending_text(), "waves");
    }

    fn gated(names: &[&str], has_default: bool) -> SentenceSegmenter {
        let gate = AnnouncementGate::new(
            SpeakerResolver::new(&SpeakerConfig::default()),
            names.iter().copied().collect(),
            has_default,
        );
        segmenter().with_gate(gate)
    }

    #[test]
    fn unknown_prefix_mid_speech_stays_in_sentence() {
        let mut seg = gated(&["Bob", "Lydia"], false);
        let events = feed(&mut seg, &["Bob: Listen to me", ": we leave now.", " Lydia: Go."]);
        assert_eq!(
            events,
            vec![
                SegmentEvent::SpeakerAnnounced("Bob".to_owned()),
                sentence("Listen to me: we leave now.", false),
                SegmentEvent::SpeakerAnnounced(" Lydia".to_owned()),
                sentence("Go.", false),
            ]
        );
    }

    #[test]
    fn unknown_name_opening_a_line_is_announced() {
        let mut seg = gated(&["Bob"], false);
        let events = feed(&mut seg, &["Bob: Hi.\nStranger: Hello."]);
        assert!(events.contains(&SegmentEvent::SpeakerAnnounced("Stranger".to_owned())));
    }

    #[test]
    fn first_prefix_is_announced_while_no_speaker_is_known() {
        let mut seg = gated(&["Bob"], false);
        let events = feed(&mut seg, &["Stranger: Hello."]);
        assert_eq!(events[0], SegmentEvent::SpeakerAnnounced("Stranger".to_owned()));
    }

    #[test]
    fn default_speaker_keeps_unknown_prefix_as_speech() {
        let mut seg = gated(&["Lydia"], true);
        let events = feed(&mut seg, &["Here is the deal: you pay me.\nLydia: Fine."]);
        assert_eq!(
            events,
            vec![
                sentence("Here is the deal: you pay me.", false),
                SegmentEvent::SpeakerAnnounced("Lydia".to_owned()),
                sentence("Fine.", false),
            ]
        );
    }

    #[test]
    fn single_terminator_yields_one_sentence_and_empty_buffer() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["I ", "will", " go now", "."]);
        assert_eq!(events, vec![sentence("I will go now.", false)]);
        assert_eq!(seg.pending_text(), "");
    }

    #[test]
    fn multiple_sentences_in_one_fragment() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["Yes. No? Maybe! Then"]);
        assert_eq!(
            events,
            vec![
                sentence("Yes.", false),
                sentence("No?", false),
                sentence("Maybe!", false),
            ]
        );
        assert_eq!(seg.pending_text(), " Then");
    }

    #[test]
    fn decimal_point_is_not_a_sentence_end() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["It costs 3.5 gold."]);
        assert_eq!(events, vec![sentence("It costs 3.5 gold.", false)]);
    }

    #[test]
    fn closing_quote_stays_with_sentence() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["He said \"run.\" Then left"]);
        assert_eq!(events[0], sentence("He said \"run.\"", false));
    }

    #[test]
    fn ellipsis_is_one_boundary() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["Well... fine."]);
        assert_eq!(
            events,
            vec![sentence("Well...", false), sentence("fine.", false)]
        );
    }

    #[test]
    fn narration_pair_toggles_twice() {
        let mut seg = segmenter();
        let mut events = feed(&mut seg, &["*draws her sword*", " Stand back."]);
        events.extend(seg.finish());
        assert_eq!(
            events,
            vec![
                SegmentEvent::NarrationToggled { narrated: true },
                sentence("draws her sword", true),
                SegmentEvent::NarrationToggled { narrated: false },
                sentence("Stand back.", false),
            ]
        );
    }

    #[test]
    fn close_and_reopen_in_one_fragment_is_two_splits() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["*nods* Yes. *smiles* ok"]);
        let toggles = events
            .iter()
            .filter(|e| matches!(e, SegmentEvent::NarrationToggled { .. }))
            .count();
        assert_eq!(toggles, 4);
        assert!(!seg.is_narrated());
        assert!(events.contains(&sentence("nods", true)));
        assert!(events.contains(&sentence("Yes.", false)));
        assert!(events.contains(&sentence("smiles", true)));
    }

    #[test]
    fn doubled_marker_split_over_fragments_counts_once() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["*", "*grins**", " Fine."]);
        assert_eq!(
            events,
            vec![
                SegmentEvent::NarrationToggled { narrated: true },
                sentence("grins", true),
                SegmentEvent::NarrationToggled { narrated: false },
                sentence("Fine.", false),
            ]
        );
    }

    #[test]
    fn held_marker_resolves_at_end_of_stream() {
        let mut seg = segmenter();
        let mut events = feed(&mut seg, &["Hi.", " *bows*"]);
        assert_eq!(seg.pending_text(), "bows");
        events.extend(seg.finish());
        assert_eq!(
            events.last(),
            Some(&SegmentEvent::NarrationToggled { narrated: false })
        );
        assert!(events.contains(&sentence("bows", true)));
    }

    #[test]
    fn whitespace_between_markers_is_not_a_sentence() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["Hello. * * Bye."]);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SegmentEvent::Sentence { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn stop_token_truncates_and_ends() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["Goodbye<|im_", "end|> Bob: more."]);
        assert_eq!(events, vec![sentence("Goodbye", false), SegmentEvent::Stopped]);
        assert!(seg.is_ended());
        assert!(seg.push("ignored.").is_empty());
        assert!(seg.finish().is_empty());
    }

    #[test]
    fn long_prefix_is_not_an_announcement() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["There is one thing I know for sure: nothing."]);
        assert_eq!(
            events,
            vec![sentence("There is one thing I know for sure: nothing.", false)]
        );
    }

    #[test]
    fn announcement_after_newline() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["Lydia: As you wish\nBob: Fine."]);
        assert_eq!(
            events,
            vec![
                SegmentEvent::SpeakerAnnounced("Lydia".to_owned()),
                sentence("As you wish", false),
                SegmentEvent::SpeakerAnnounced("Bob".to_owned()),
                sentence("Fine.", false),
            ]
        );
    }

    #[test]
    fn no_announcement_inside_narration() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["*Note: quiet* ok."]);
        assert!(!events.iter().any(|e| matches!(e, SegmentEvent::SpeakerAnnounced(_))));
        assert!(events.contains(&sentence("Note: quiet", true)));
    }

    #[test]
    fn fullwidth_terminator_splits_without_space() {
        let mut seg = segmenter();
        let events = feed(&mut seg, &["はい。いいえ"]);
        assert_eq!(events, vec![sentence("はい。", false)]);
        assert_eq!(seg.pending_text(), "いいえ");
    }

    #[test]
    fn finish_flushes_unterminated_remainder() {
        let mut seg = segmenter();
        let mut events = feed(&mut seg, &["Follow me"]);
        events.extend(seg.finish());
        assert_eq!(events, vec![sentence("Follow me", false)]);
    }

    #[test]
    fn distinct_markers_ignore_strays() {
        let config = SegmentationConfig {
            narration_start: '(',
            narration_end: ')',
            ..Default::default()
        };
        let mut seg = SentenceSegmenter::new(&config, &SpeakerConfig::default()).unwrap();
        let mut events = feed(&mut seg, &["Hi) there. (", "sighs) Go."]);
        events.extend(seg.finish());
        assert_eq!(
            events,
            vec![
                sentence("Hi", false),
                sentence("there.", false),
                SegmentEvent::NarrationToggled { narrated: true },
                sentence("sighs", true),
                SegmentEvent::NarrationToggled { narrated: false },
                sentence("Go.", false),
            ]
        );
    }
}
