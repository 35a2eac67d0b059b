//! Retry budgets and stall detection for one response.
//!
//! A response may take several generation attempts. The budgets here live
//! for the whole response; everything else is rebuilt per attempt.

use crate::config::RetryConfig;
use crate::error::AttemptError;

/// Independent retry counters for one response.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    generic_used: u32,
    generic_ceiling: u32,
    bad_speaker_remaining: u32,
    bad_speaker_ceiling: u32,
    system_loop_remaining: u32,
}

/// What to do after an invalid speaker announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadSpeakerVerdict {
    /// Budget remained; the attempt should be retried.
    Retry,
    /// Budget is spent; a fallback speaker must be chosen instead.
    Exhausted,
}

impl RetryBudget {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            generic_used: 0,
            generic_ceiling: config.max_generic_retries,
            bad_speaker_remaining: config.max_bad_speaker_retries,
            bad_speaker_ceiling: config.max_bad_speaker_retries,
            system_loop_remaining: config.max_system_loop_retries,
        }
    }

    /// Spend one generic retry. Returns `false` once the ceiling is reached.
    pub fn consume_generic(&mut self) -> bool {
        if self.generic_used >= self.generic_ceiling {
            return false;
        }
        self.generic_used += 1;
        true
    }

    /// Record an invalid speaker announcement.
    pub fn record_bad_speaker(&mut self) -> BadSpeakerVerdict {
        if self.bad_speaker_remaining == 0 {
            return BadSpeakerVerdict::Exhausted;
        }
        self.bad_speaker_remaining -= 1;
        BadSpeakerVerdict::Retry
    }

    /// Restore the bad-speaker budget after a clean resolution.
    pub fn reset_bad_speaker(&mut self) {
        self.bad_speaker_remaining = self.bad_speaker_ceiling;
    }

    /// Spend one system-loop retry. Returns `false` once none remain.
    pub fn consume_system_loop(&mut self) -> bool {
        if self.system_loop_remaining == 0 {
            return false;
        }
        self.system_loop_remaining -= 1;
        true
    }

    pub fn generic_used(&self) -> u32 {
        self.generic_used
    }

    pub fn bad_speaker_remaining(&self) -> u32 {
        self.bad_speaker_remaining
    }

    pub fn system_loop_remaining(&self) -> u32 {
        self.system_loop_remaining
    }
}

/// Detects a token source that keeps emitting the same fragment.
#[derive(Debug, Clone)]
pub struct StallDetector {
    limit: u32,
    last: String,
    seen: u32,
}

impl StallDetector {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            last: String::new(),
            seen: 0,
        }
    }

    /// Observe one raw fragment.
    ///
    /// # Errors
    ///
    /// Returns [`AttemptError::StreamStall`] once the same non-empty fragment
    /// has been seen more than `limit` times in a row.
    pub fn observe(&mut self, fragment: &str) -> Result<(), AttemptError> {
        if fragment.trim().is_empty() {
            return Ok(());
        }
        if fragment == self.last {
            self.seen += 1;
        } else {
            fragment.clone_into(&mut self.last);
            self.seen = 1;
        }
        if self.limit > 0 && self.seen > self.limit {
            return Err(AttemptError::StreamStall {
                fragment: self.last.clone(),
                repeats: self.seen,
            });
        }
        Ok(())
    }
}
