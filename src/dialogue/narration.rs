//! Narration (roleplay) mode tracking.

use tracing::debug;

/// Tracks whether the stream is inside a narrated passage.
///
/// With identical open and close markers every occurrence toggles. With a
/// distinct pair, an opener only counts while spoken and a closer only while
/// narrated; stray markers are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NarrationTracker {
    start: char,
    end: char,
    narrated: bool,
}

impl NarrationTracker {
    pub fn new(start: char, end: char) -> Self {
        Self {
            start,
            end,
            narrated: false,
        }
    }

    /// Whether `c` is one of the narration markers.
    pub fn is_delimiter(&self, c: char) -> bool {
        c == self.start || c == self.end
    }

    pub fn is_narrated(&self) -> bool {
        self.narrated
    }

    /// Apply one marker occurrence. Returns `true` if the mode flipped.
    pub fn observe(&mut self, c: char) -> bool {
        let flips = if self.start == self.end {
            c == self.start
        } else if self.narrated {
            c == self.end
        } else {
            c == self.start
        };
        if flips {
            self.narrated = !self.narrated;
        } else if self.is_delimiter(c) {
            debug!(marker = %c, narrated = self.narrated, "ignoring unbalanced narration marker");
        }
        flips
    }

    /// Back to spoken mode.
    pub fn reset(&mut self) {
        self.narrated = false;
    }
}
