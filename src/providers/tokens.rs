//! Token accounting for chat requests
//!
//! The count is a fixed approximation rather than the exact number the
//! API bills: every turn costs its encoded content plus
//! [`TOKENS_PER_TURN`], and the request as a whole adds
//! [`TOKENS_PER_REQUEST`]. Roles are not encoded. The compaction
//! threshold is calibrated against this formula, so it must not be
//! swapped for a more precise count.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use tiktoken_rs::CoreBPE;
use tiktoken_rs::tokenizer::{Tokenizer, get_tokenizer};

use crate::context::Turn;
use crate::{Error, Result};

/// Role and delimiter overhead charged for each turn
pub const TOKENS_PER_TURN: usize = 4;

/// Start and end overhead charged once per request
pub const TOKENS_PER_REQUEST: usize = 2;

/// Encodings built so far, one per tokenizer
static ENCODINGS: LazyLock<Mutex<HashMap<Tokenizer, Arc<CoreBPE>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Resolve the BPE encoding used by `model`
///
/// Each encoding is built once per process and shared by all models
/// that map to it.
///
/// # Errors
///
/// Returns [`Error::UnknownModel`] if no encoding is mapped to the model
pub fn encoding_for_model(model: &str) -> Result<Arc<CoreBPE>> {
    let tokenizer = get_tokenizer(model).ok_or_else(|| Error::UnknownModel(model.to_string()))?;

    let mut encodings = ENCODINGS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(bpe) = encodings.get(&tokenizer) {
        return Ok(bpe.clone());
    }

    let bpe = tiktoken_rs::get_bpe_from_tokenizer(tokenizer)
        .map(Arc::new)
        .map_err(|e| Error::UnknownModel(format!("{model}: {e}")))?;
    tracing::debug!(model, ?tokenizer, "built token encoding");
    encodings.insert(tokenizer, bpe.clone());

    Ok(bpe)
}

/// Count the tokens of `turns` for `model` using the fixed overhead formula
///
/// # Errors
///
/// Returns [`Error::UnknownModel`] if no encoding is mapped to the model
pub fn count_tokens(turns: &[Turn], model: &str) -> Result<usize> {
    let bpe = encoding_for_model(model)?;
    Ok(count_with(&bpe, turns))
}

/// Apply the overhead formula with an already resolved encoding
#[must_use]
pub fn count_with(bpe: &CoreBPE, turns: &[Turn]) -> usize {
    turns
        .iter()
        .map(|turn| TOKENS_PER_TURN + bpe.encode_ordinary(&turn.content).len())
        .sum::<usize>()
        + TOKENS_PER_REQUEST
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_turn_uses_overhead_formula() {
        let bpe = encoding_for_model("gpt-3.5-turbo").unwrap();
        let encoded = bpe.encode_ordinary("hello").len();

        let count = count_tokens(&[Turn::user("hello")], "gpt-3.5-turbo").unwrap();

        assert_eq!(count, 4 + encoded + 2);
    }

    #[test]
    fn empty_request_costs_request_overhead_only() {
        assert_eq!(count_tokens(&[], "gpt-4").unwrap(), TOKENS_PER_REQUEST);
    }

    #[test]
    fn role_does_not_affect_count() {
        let as_user = count_tokens(&[Turn::user("same text")], "gpt-4").unwrap();
        let as_system = count_tokens(&[Turn::system("same text")], "gpt-4").unwrap();
        assert_eq!(as_user, as_system);
    }

    #[test]
    fn empty_content_still_pays_turn_overhead() {
        let count = count_tokens(&[Turn::user(""), Turn::assistant("")], "gpt-4").unwrap();
        assert_eq!(count, 2 * TOKENS_PER_TURN + TOKENS_PER_REQUEST);
    }

    #[test]
    fn encoding_is_built_once_and_shared() {
        let first = encoding_for_model("gpt-3.5-turbo").unwrap();
        let again = encoding_for_model("gpt-3.5-turbo").unwrap();
        // gpt-4 maps to the same cl100k encoding
        let sibling = encoding_for_model("gpt-4").unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(Arc::ptr_eq(&first, &sibling));
    }

    #[test]
    fn repeated_counts_stay_fast() {
        count_tokens(&[Turn::user("warm up")], "gpt-3.5-turbo").unwrap();

        let started = std::time::Instant::now();
        for _ in 0..20 {
            count_tokens(&[Turn::user("hi")], "gpt-3.5-turbo").unwrap();
        }

        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn unknown_model_fails_fast() {
        let err = count_tokens(&[Turn::user("hi")], "definitely-not-a-model").unwrap_err();
        assert!(matches!(err, Error::UnknownModel(ref m) if m == "definitely-not-a-model"));
    }
}
