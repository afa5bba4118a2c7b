//! Token-bounded transcript storage.

use crate::error::ConversationError;
use crate::tokens::TokenCounter;
use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Raw storage for serialized transcripts, keyed by conversation id.
///
/// Implementations only move opaque text. Decoding, trimming and corruption
/// recovery live in [`HistoryStore`].
#[async_trait]
pub trait TranscriptBackend: Send + Sync {
    /// Load the stored blob, if any.
    async fn load(&self, conversation_id: &str) -> Result<Option<String>, ConversationError>;

    /// Replace the stored blob.
    async fn save(&self, conversation_id: &str, blob: String) -> Result<(), ConversationError>;

    /// Remove the stored blob. Returns whether one existed.
    async fn remove(&self, conversation_id: &str) -> Result<bool, ConversationError>;
}

/// In-memory transcript backend.
#[derive(Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored transcripts.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl TranscriptBackend for MemoryBackend {
    async fn load(&self, conversation_id: &str) -> Result<Option<String>, ConversationError> {
        Ok(self.blobs.read().await.get(conversation_id).cloned())
    }

    async fn save(&self, conversation_id: &str, blob: String) -> Result<(), ConversationError> {
        self.blobs
            .write()
            .await
            .insert(conversation_id.to_string(), blob);
        Ok(())
    }

    async fn remove(&self, conversation_id: &str) -> Result<bool, ConversationError> {
        Ok(self.blobs.write().await.remove(conversation_id).is_some())
    }
}

/// Ordered, token-bounded transcript per conversation.
///
/// Each `append` is load, push, trim, save. Concurrent appends to the same
/// conversation are not serialized: the last save wins.
#[derive(Clone)]
pub struct HistoryStore {
    backend: Arc<dyn TranscriptBackend>,
    counter: TokenCounter,
    budget: usize,
}

impl HistoryStore {
    pub fn new(backend: Arc<dyn TranscriptBackend>, counter: TokenCounter, budget: usize) -> Self {
        info!(
            "Conversation store initialized (model={}, token_budget={})",
            counter.model(),
            budget
        );

        Self {
            backend,
            counter,
            budget,
        }
    }

    /// Store backed by process memory.
    pub fn in_memory(counter: TokenCounter, budget: usize) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), counter, budget)
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Load and decode a transcript. A corrupt blob resets to empty.
    async fn load(&self, conversation_id: &str) -> Result<Transcript, ConversationError> {
        let Some(blob) = self.backend.load(conversation_id).await? else {
            return Ok(Transcript::empty());
        };

        match Transcript::from_blob(&blob, &self.counter) {
            Ok(transcript) => Ok(transcript),
            Err(e) => {
                warn!(
                    "Discarding malformed history for {}: {}",
                    conversation_id, e
                );
                Ok(Transcript::empty())
            }
        }
    }

    /// Current turns of a conversation, oldest first. Never writes.
    pub async fn get(&self, conversation_id: &str) -> Result<Vec<Turn>, ConversationError> {
        Ok(self.load(conversation_id).await?.into_turns())
    }

    /// Append a turn, trim to budget and persist.
    #[instrument(skip(self, content), fields(content_len = content.len()))]
    pub async fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Transcript, ConversationError> {
        let mut transcript = self.load(conversation_id).await?;

        transcript.push(Turn::new(role, content), &self.counter);

        let evicted = transcript.trim(self.budget, &self.counter);
        if evicted > 0 {
            debug!(
                "Evicted {} oldest turns from {} (tokens now {})",
                evicted,
                conversation_id,
                transcript.token_count()
            );
        }
        if !transcript.within(self.budget) {
            warn!(
                "Single turn in {} exceeds token budget ({} > {})",
                conversation_id,
                transcript.token_count(),
                self.budget
            );
        }

        self.backend
            .save(conversation_id, transcript.to_blob()?)
            .await?;

        debug!(
            "Added {} turn for {} (total: {})",
            role,
            conversation_id,
            transcript.len()
        );

        Ok(transcript)
    }

    /// Remove a conversation's transcript.
    #[instrument(skip(self))]
    pub async fn clear(&self, conversation_id: &str) -> Result<bool, ConversationError> {
        let removed = self.backend.remove(conversation_id).await?;

        if removed {
            info!("Cleared history for {}", conversation_id);
        }

        Ok(removed)
    }

    /// Token count of a conversation's current transcript.
    pub async fn token_count(&self, conversation_id: &str) -> Result<usize, ConversationError> {
        Ok(self.load(conversation_id).await?.token_count())
    }
}
