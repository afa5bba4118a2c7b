//! Model-aware token counting.

use crate::error::ConversationError;
use crate::types::Turn;
use std::fmt;
use std::sync::Arc;
use tiktoken_rs::tokenizer::get_tokenizer;
use tiktoken_rs::{get_bpe_from_tokenizer, CoreBPE};

/// Counts tokens of conversation turns using the BPE encoding of one model.
///
/// Only turn content is counted. The count of a sequence is the sum of the
/// counts of its turns, so callers may maintain it incrementally.
#[derive(Clone)]
pub struct TokenCounter {
    model: String,
    bpe: Arc<CoreBPE>,
}

impl TokenCounter {
    /// Build a counter for `model`.
    ///
    /// Fails with [`ConversationError::UnsupportedModel`] when the model has
    /// no known encoding. There is no fallback encoding.
    pub fn for_model(model: &str) -> Result<Self, ConversationError> {
        let tokenizer = get_tokenizer(model)
            .ok_or_else(|| ConversationError::UnsupportedModel(model.to_string()))?;
        let bpe = get_bpe_from_tokenizer(tokenizer)
            .map_err(|e| ConversationError::Tokenizer(e.to_string()))?;

        Ok(Self {
            model: model.to_string(),
            bpe: Arc::new(bpe),
        })
    }

    /// Whether `model` has a known token encoding.
    pub fn supports(model: &str) -> bool {
        get_tokenizer(model).is_some()
    }

    /// Model this counter encodes for.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Token count of a single piece of text.
    pub fn count_text(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Token count of an ordered sequence of turns.
    pub fn count(&self, turns: &[Turn]) -> usize {
        turns.iter().map(|turn| self.count_text(&turn.content)).sum()
    }
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
