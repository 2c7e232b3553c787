//! Language-model provider abstraction
//!
//! A [`CompletionProvider`] turns an ordered list of turns into generated
//! text and knows how to count tokens for a model. Failures are returned
//! as tagged errors ([`Error::Provider`], [`Error::UnknownModel`]) rather
//! than in-band marker text.
//!
//! [`Error::Provider`]: crate::Error::Provider
//! [`Error::UnknownModel`]: crate::Error::UnknownModel

pub mod openai;
pub mod tokens;

use async_trait::async_trait;

use crate::context::Turn;
use crate::Result;

pub use openai::OpenAiProvider;

/// Parameters for a single completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    /// Model identifier (e.g. "gpt-4")
    pub model: String,
    /// Provider-side cap on generated tokens
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

impl CompletionOptions {
    /// Options for `model` with no output cap or temperature override
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Stateless chat completion backend
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate a reply for `turns`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Provider`] on transport or API failure
    async fn complete(&self, turns: &[Turn], options: &CompletionOptions) -> Result<String>;

    /// Count tokens of `turns` with the tokenizer of `model`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownModel`] if no tokenizer maps to `model`
    fn count_tokens(&self, turns: &[Turn], model: &str) -> Result<usize> {
        tokens::count_tokens(turns, model)
    }

    /// Provider name for logs
    fn name(&self) -> &'static str;
}
