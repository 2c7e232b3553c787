//! Request context assembly for conversations
//!
//! Combines:
//! - Stored conversation turns
//! - The incoming user message
//! - Token-budget compaction into a summary turn

pub mod compaction;
mod turn;

pub use compaction::{CompactionConfig, HistoryCompactor, MARKDOWN_INSTRUCTION};
pub use turn::{Role, Turn};
