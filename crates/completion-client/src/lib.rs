//! Chat completion client with an OpenAI-compatible API.

mod client;
mod error;
mod types;

pub use client::CompletionClient;
pub use error::CompletionError;
pub use types::*;
