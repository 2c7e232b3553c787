//! Token-budget history compaction
//!
//! Decides, for each outgoing request, which turns are sent to the model.
//! When the conversation plus the new message crosses the token threshold,
//! the whole working set is summarized and replaced by the new message
//! followed by the summary as an assistant turn.

use std::sync::Arc;

use serde::Deserialize;

use super::{Role, Turn};
use crate::providers::{CompletionOptions, CompletionProvider};
use crate::{Error, Result};

/// Compaction triggers when the working set exceeds this many tokens
pub const DEFAULT_THRESHOLD_TOKENS: usize = 1000;

/// System turn prepended when the working set has none
pub const MARKDOWN_INSTRUCTION: &str = "Output format: Markdown";

/// System instruction for the summarization call
pub const SUMMARY_INSTRUCTION: &str = "Summarize the following messages clearly and concisely";

/// Model used for summaries regardless of the conversation's model
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-3.5-turbo";

/// Output cap for the summarization call
pub const DEFAULT_SUMMARY_MAX_TOKENS: u32 = 500;

/// Configuration for history compaction
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Compact when the counted working set is strictly above this
    pub threshold_tokens: usize,
    /// Model that produces summaries
    pub summary_model: String,
    /// Provider-side cap on summary length
    pub summary_max_tokens: u32,
    /// Sampling temperature for summaries
    pub summary_temperature: f32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold_tokens: DEFAULT_THRESHOLD_TOKENS,
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            summary_max_tokens: DEFAULT_SUMMARY_MAX_TOKENS,
            summary_temperature: 0.7,
        }
    }
}

/// Builds the turn list for a completion request
#[derive(Clone)]
pub struct HistoryCompactor {
    config: CompactionConfig,
    provider: Arc<dyn CompletionProvider>,
}

impl HistoryCompactor {
    /// Create a new compactor
    #[must_use]
    pub fn new(config: CompactionConfig, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { config, provider }
    }

    #[must_use]
    pub const fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Check if a counted working set must be compacted
    #[must_use]
    pub const fn needs_compaction(&self, token_count: usize) -> bool {
        token_count > self.config.threshold_tokens
    }

    /// Produce the exact turns to submit for `new_message`
    ///
    /// With context disabled, `history` is ignored and only the new message
    /// is sent. Otherwise the history plus new message is sent as is, or,
    /// above the threshold, `[User(new_message), Assistant(summary)]`.
    /// A markdown system turn is prepended unless one is already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownModel`] if `model` has no tokenizer, or
    /// [`Error::Summarization`] if the summary call fails
    pub async fn build_request(
        &self,
        history: Vec<Turn>,
        context_enabled: bool,
        new_message: &str,
        model: &str,
    ) -> Result<Vec<Turn>> {
        let mut working_set = if context_enabled {
            let mut turns = history;
            turns.push(Turn::user(new_message));

            let token_count = self.provider.count_tokens(&turns, model)?;

            if self.needs_compaction(token_count) {
                tracing::info!(
                    model,
                    tokens = token_count,
                    threshold = self.config.threshold_tokens,
                    turns = turns.len(),
                    "compacting history"
                );
                let summary = self.summarize(&turns).await?;
                vec![Turn::user(new_message), Turn::assistant(summary)]
            } else {
                tracing::debug!(model, tokens = token_count, "history within budget");
                turns
            }
        } else {
            vec![Turn::user(new_message)]
        };

        ensure_markdown_instruction(&mut working_set);
        Ok(working_set)
    }

    /// Summarize `turns` with the fixed summarization instruction and model
    ///
    /// # Errors
    ///
    /// Returns [`Error::Summarization`] if the provider call fails
    pub async fn summarize(&self, turns: &[Turn]) -> Result<String> {
        let mut request = Vec::with_capacity(turns.len() + 1);
        request.push(Turn::system(SUMMARY_INSTRUCTION));
        request.extend_from_slice(turns);

        let options = CompletionOptions::new(&self.config.summary_model)
            .max_tokens(self.config.summary_max_tokens)
            .temperature(self.config.summary_temperature);

        self.provider
            .complete(&request, &options)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "summarization failed");
                Error::Summarization(e.to_string())
            })
    }
}

/// Prepend the markdown system turn unless a system turn already exists
pub fn ensure_markdown_instruction(turns: &mut Vec<Turn>) {
    if !turns.iter().any(|t| t.role == Role::System) {
        turns.insert(0, Turn::system(MARKDOWN_INSTRUCTION));
    }
}
