//! Token sources: where raw generation fragments come from.
//!
//! A [`TokenSource`] is opened once per attempt with freshly assembled
//! context and yields a finite, non-restartable stream of text deltas.

pub mod api;
pub mod extract;
pub mod sse;

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::Stream;

use crate::context::ChatMessage;
use crate::error::SourceError;

pub use self::api::ApiTokenSource;
pub use self::extract::FragmentExtractor;

/// Stream of raw text deltas for one attempt.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, SourceError>> + Send>>;

/// Produces one generation stream per attempt.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Start a generation for `messages`.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the generation cannot be started.
    async fn open(&self, messages: &[ChatMessage]) -> Result<FragmentStream, SourceError>;
}

/// One scripted attempt.
type Script = Vec<Result<String, SourceError>>;

/// Replays pre-recorded fragment lists, one per attempt.
///
/// Every context it was opened with is recorded for inspection.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedSource {
    /// Create a source from fragment lists, one per attempt.
    pub fn new<I, S, F>(scripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: IntoIterator<Item = F>,
        F: Into<String>,
    {
        let source = Self::default();
        for script in scripts {
            source.push_script(script);
        }
        source
    }

    /// Queue another attempt.
    pub fn push_script<S, F>(&self, fragments: S)
    where
        S: IntoIterator<Item = F>,
        F: Into<String>,
    {
        let script = fragments.into_iter().map(|f| Ok(f.into())).collect();
        self.lock_scripts().push_back(script);
    }

    /// Queue an attempt that fails with `error` after `fragments`.
    pub fn push_failing_script<S, F>(&self, fragments: S, error: SourceError)
    where
        S: IntoIterator<Item = F>,
        F: Into<String>,
    {
        let mut script: Script = fragments.into_iter().map(|f| Ok(f.into())).collect();
        script.push(Err(error));
        self.lock_scripts().push_back(script);
    }

    /// Contexts the source was opened with, in order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Scripts not yet consumed.
    pub fn remaining(&self) -> usize {
        self.lock_scripts().len()
    }

    fn lock_scripts(&self) -> std::sync::MutexGuard<'_, VecDeque<Script>> {
        self.scripts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TokenSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, messages: &[ChatMessage]) -> Result<FragmentStream, SourceError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        let script = self
            .lock_scripts()
            .pop_front()
            .ok_or_else(|| SourceError::Exhausted("no scripted attempts left".to_owned()))?;
        Ok(Box::pin(futures_util::stream::iter(script)))
    }
}
