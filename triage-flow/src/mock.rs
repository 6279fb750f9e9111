//! Scripted collaborators for tests and offline demos.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{
    engine::{Enricher, ReasoningEngine},
    error::TransportError,
};

/// Engine that replays a queue of canned replies and records every prompt.
///
/// Stage and judge calls happen strictly one after the other, so a single
/// FIFO queue is enough to script a whole pipeline run.
pub struct ScriptedEngine {
    replies: Mutex<VecDeque<Result<String, TransportError>>>,
    prompts: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push_text(&self, reply: impl Into<String>) {
        lock(&self.replies).push_back(Ok(reply.into()));
    }

    pub fn push_texts<I, S>(&self, replies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut queue = lock(&self.replies);
        for reply in replies {
            queue.push_back(Ok(reply.into()));
        }
    }

    pub fn push_error(&self, message: impl Into<String>) {
        lock(&self.replies).push_back(Err(TransportError::Backend(message.into())));
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReasoningEngine for ScriptedEngine {
    async fn generate(&self, prompt: &str) -> Result<String, TransportError> {
        lock(&self.prompts).push(prompt.to_string());
        lock(&self.replies).pop_front().unwrap_or_else(|| {
            Err(TransportError::Backend(
                "ScriptedEngine: no more replies in queue".to_string(),
            ))
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Enricher that returns a fixed passage, or fails when built with [`StaticEnricher::failing`].
pub struct StaticEnricher {
    reply: Result<String, TransportError>,
    calls: Mutex<Vec<String>>,
}

impl StaticEnricher {
    pub fn new(passage: impl Into<String>) -> Self {
        Self {
            reply: Ok(passage.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Err(TransportError::Backend(message.into())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Enricher for StaticEnricher {
    async fn enrich(&self, text: &str) -> Result<String, TransportError> {
        lock(&self.calls).push(text.to_string());
        self.reply.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_errors() {
        let engine = ScriptedEngine::new();
        engine.push_texts(["one", "two"]);

        assert_eq!(engine.generate("a").await.unwrap(), "one");
        assert_eq!(engine.generate("b").await.unwrap(), "two");
        assert!(engine.generate("c").await.is_err());
        assert_eq!(engine.prompts(), vec!["a", "b", "c"]);
    }
}
