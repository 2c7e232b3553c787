//! Message exchange: compaction, completion, and persistence of one turn pair

use std::sync::Arc;

use crate::context::HistoryCompactor;
use crate::db::{ConversationRepo, MessageStore};
use crate::providers::{CompletionOptions, CompletionProvider};
use crate::{Error, Result};

/// Default provider-side cap on reply length
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1550;

/// Default sampling temperature for replies
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Parameters for the final completion call
///
/// Independent of the compaction threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplySettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ReplySettings {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Sends user messages to the model and records the exchange
#[derive(Clone)]
pub struct ChatService {
    conversations: ConversationRepo,
    messages: Arc<dyn MessageStore>,
    provider: Arc<dyn CompletionProvider>,
    compactor: HistoryCompactor,
    reply: ReplySettings,
}

impl ChatService {
    #[must_use]
    pub fn new(
        conversations: ConversationRepo,
        messages: Arc<dyn MessageStore>,
        provider: Arc<dyn CompletionProvider>,
        compactor: HistoryCompactor,
        reply: ReplySettings,
    ) -> Self {
        Self {
            conversations,
            messages,
            provider,
            compactor,
            reply,
        }
    }

    /// Send `message` in a conversation and return the model's reply
    ///
    /// Stored history is only read when the conversation has context
    /// enabled. The user message and reply are persisted together, and only
    /// after the completion succeeds.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if `message` is blank
    /// - [`Error::NotFound`] if the conversation does not exist
    /// - [`Error::UnknownModel`] if the conversation's model has no tokenizer
    /// - [`Error::Summarization`] / [`Error::Provider`] on upstream failure
    pub async fn send_message(&self, conversation_id: i64, message: &str) -> Result<String> {
        if message.trim().is_empty() {
            return Err(Error::Validation("message must not be empty".to_string()));
        }

        let conversation = self.conversations.require(conversation_id)?;

        let history = if conversation.context_enabled {
            self.messages.list_turns(conversation_id)?
        } else {
            Vec::new()
        };

        let turns = self
            .compactor
            .build_request(
                history,
                conversation.context_enabled,
                message,
                &conversation.model,
            )
            .await?;

        tracing::info!(
            conversation = conversation_id,
            model = %conversation.model,
            provider = self.provider.name(),
            turns = turns.len(),
            "sending message to model"
        );

        let options = CompletionOptions::new(&conversation.model)
            .max_tokens(self.reply.max_tokens)
            .temperature(self.reply.temperature);

        let reply = self
            .provider
            .complete(&turns, &options)
            .await
            .inspect_err(|e| {
                tracing::error!(conversation = conversation_id, error = %e, "completion failed");
            })?;

        self.messages
            .append_exchange(conversation_id, message, &reply)?;

        Ok(reply)
    }
}
