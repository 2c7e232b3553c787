//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley_gateway::models::{ModelCatalog, ModelInfo, ModelSource, SystemClock};
use parley_gateway::{CompletionOptions, CompletionProvider, DbPool, Error, Result, Turn, db};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Provider with scripted replies that records every request
#[derive(Default)]
pub struct StubProvider {
    replies: Mutex<VecDeque<Result<String>>>,
    calls: Mutex<Vec<(Vec<Turn>, CompletionOptions)>>,
    /// Fixed per-turn token cost; `None` uses the real tokenizer
    tokens_per_turn: Option<usize>,
}

impl StubProvider {
    /// Reply with each entry in order, then "ok"
    pub fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| Ok((*r).to_string())).collect()),
            ..Self::default()
        }
    }

    /// Fail every call with a provider error
    pub fn failing() -> Self {
        let failures = (0..8)
            .map(|_| Err(Error::Provider("503 Service Unavailable".to_string())))
            .collect();
        Self {
            replies: Mutex::new(failures),
            ..Self::default()
        }
    }

    /// Charge a flat token cost per turn instead of tokenizing
    #[must_use]
    pub fn with_tokens_per_turn(mut self, tokens: usize) -> Self {
        self.tokens_per_turn = Some(tokens);
        self
    }

    pub fn calls(&self) -> Vec<(Vec<Turn>, CompletionOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for StubProvider {
    async fn complete(&self, turns: &[Turn], options: &CompletionOptions) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((turns.to_vec(), options.clone()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }

    fn count_tokens(&self, turns: &[Turn], model: &str) -> Result<usize> {
        match self.tokens_per_turn {
            Some(per_turn) => Ok(per_turn * turns.len()),
            None => parley_gateway::providers::tokens::count_tokens(turns, model),
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

#[async_trait]
impl ModelSource for StubProvider {
    async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo::new("gpt-3.5-turbo"), ModelInfo::new("gpt-4")])
    }
}

/// Catalog backed by `source`, caching under `dir`
pub fn test_catalog(source: Arc<dyn ModelSource>, dir: &Path) -> Arc<ModelCatalog> {
    Arc::new(ModelCatalog::new(
        source,
        Arc::new(SystemClock),
        dir.join("models.json"),
        Duration::from_secs(14 * 24 * 60 * 60),
    ))
}
