//! Conversation storage errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The model has no known token encoding.
    #[error("Unsupported model for token counting: {0}")]
    UnsupportedModel(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// The transcript backend could not read or write.
    #[error("Storage error: {0}")]
    Storage(String),
}
