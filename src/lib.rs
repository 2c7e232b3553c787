//! Parley Gateway - chat conversation persistence and LLM proxy
//!
//! This library provides the core functionality for the Parley gateway:
//! - Conversation and message persistence (`SQLite`)
//! - Token-budget history compaction before each completion
//! - `OpenAI` chat completions and a cached model catalog
//! - An HTTP API over all of the above
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    HTTP API                          │
//! │   Conversations  │  Messages  │  Models  │  Health   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Chat Service                         │
//! │   History Compactor  │  Token Counting  │  Store    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              OpenAI-compatible API                   │
//! │   Chat Completions  │  Model Listing                │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod chat;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod models;
pub mod providers;

pub use chat::{ChatService, ReplySettings};
pub use config::Config;
pub use context::{CompactionConfig, HistoryCompactor, Role, Turn};
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use models::{ModelCatalog, ModelInfo, ModelSnapshot};
pub use providers::{CompletionOptions, CompletionProvider, OpenAiProvider};
