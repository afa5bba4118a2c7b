//! Token-bounded conversation history.
//!
//! Each conversation keeps an ordered transcript of turns. After every
//! append the oldest turns are evicted until the transcript fits the
//! configured token budget. Transcripts are persisted as opaque JSON blobs
//! through a [`TranscriptBackend`]; a blob that fails to decode resets the
//! conversation to an empty history instead of failing the request.

mod error;
mod store;
mod tokens;
mod types;

pub use error::ConversationError;
pub use store::{HistoryStore, MemoryBackend, TranscriptBackend};
pub use tokens::TokenCounter;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn counter() -> TokenCounter {
        TokenCounter::for_model("gpt-4").unwrap()
    }

    fn store_with_budget(budget: usize) -> (HistoryStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = HistoryStore::new(backend.clone(), counter(), budget);
        (store, backend)
    }

    #[test]
    fn test_token_counter_known_models() {
        assert!(TokenCounter::supports("gpt-4"));
        assert!(TokenCounter::supports("gpt-3.5-turbo"));
        assert_eq!(counter().model(), "gpt-4");
    }

    #[test]
    fn test_token_counter_unknown_model_is_error() {
        assert!(!TokenCounter::supports("not-a-model"));
        let result = TokenCounter::for_model("not-a-model");
        assert!(matches!(result, Err(ConversationError::UnsupportedModel(m)) if m == "not-a-model"));
    }

    #[test]
    fn test_token_counter_is_deterministic_and_additive() {
        let counter = counter();
        let turns = vec![
            Turn::user("The quick brown fox"),
            Turn::assistant("jumps over the lazy dog"),
        ];

        let total = counter.count(&turns);
        assert_eq!(total, counter.count(&turns));
        assert_eq!(
            total,
            counter.count_text("The quick brown fox") + counter.count_text("jumps over the lazy dog")
        );
        assert!(total > 0);
        assert_eq!(counter.count(&[]), 0);
    }

    #[test]
    fn test_turn_serialization() {
        let turn = Turn::assistant("Hi there!");
        let json = serde_json::to_string(&turn).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"Hi there!"}"#);
    }

    #[test]
    fn test_transcript_blob_layout() {
        let counter = counter();
        let mut transcript = Transcript::empty();
        transcript.push(Turn::user("Hello"), &counter);
        transcript.push(Turn::assistant("Hi!"), &counter);

        let blob = transcript.to_blob().unwrap();
        assert_eq!(
            blob,
            r#"[{"role":"user","content":"Hello"},{"role":"assistant","content":"Hi!"}]"#
        );

        let decoded = Transcript::from_blob(&blob, &counter).unwrap();
        assert_eq!(decoded, transcript);
        assert_eq!(decoded.token_count(), counter.count(transcript.turns()));
    }

    #[test]
    fn test_transcript_blank_blob_is_empty() {
        let transcript = Transcript::from_blob("  ", &counter()).unwrap();
        assert!(transcript.is_empty());
        assert_eq!(transcript.token_count(), 0);
    }

    #[test]
    fn test_transcript_rejects_non_list_and_unknown_role() {
        let counter = counter();
        assert!(Transcript::from_blob(r#"{"role":"user"}"#, &counter).is_err());
        assert!(Transcript::from_blob(r#"[{"role":"tool","content":"x"}]"#, &counter).is_err());
        assert!(Transcript::from_blob("not json", &counter).is_err());
    }

    #[test]
    fn test_trim_under_budget_keeps_everything() {
        let counter = counter();
        let mut transcript = Transcript::empty();
        transcript.push(Turn::user("Message 1"), &counter);
        transcript.push(Turn::assistant("Reply 1"), &counter);

        let evicted = transcript.trim(1000, &counter);

        assert_eq!(evicted, 0);
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_trim_evicts_strictly_oldest_first() {
        let counter = counter();
        let turns = [
            Turn::user("alpha"),
            Turn::assistant("bravo"),
            Turn::user("charlie"),
            Turn::assistant("delta"),
        ];
        let budget = counter.count(&turns[2..]);

        let mut transcript = Transcript::empty();
        for turn in turns.iter().cloned() {
            transcript.push(turn, &counter);
        }

        let evicted = transcript.trim(budget, &counter);

        assert_eq!(evicted, 2);
        assert_eq!(transcript.turns(), &turns[2..]);
        assert_eq!(transcript.token_count(), budget);
    }

    #[test]
    fn test_trim_keeps_single_oversized_turn() {
        let counter = counter();
        let mut transcript = Transcript::empty();
        transcript.push(Turn::user("short"), &counter);
        transcript.push(
            Turn::assistant("this reply is far longer than the tiny budget allows"),
            &counter,
        );

        transcript.trim(2, &counter);

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.turns()[0].role, Role::Assistant);
        assert!(!transcript.within(2));
    }

    // Store tests

    #[tokio::test]
    async fn test_store_append_and_get() {
        let (store, _) = store_with_budget(3000);

        store.append("room-1", Role::User, "Hello").await.unwrap();
        store.append("room-1", Role::Assistant, "Hi there!").await.unwrap();

        let turns = store.get("room-1").await.unwrap();
        assert_eq!(turns, vec![Turn::user("Hello"), Turn::assistant("Hi there!")]);
    }

    #[tokio::test]
    async fn test_store_get_unknown_is_empty_and_does_not_write() {
        let (store, backend) = store_with_budget(3000);

        assert!(store.get("nobody").await.unwrap().is_empty());
        assert_eq!(backend.len().await, 0);
    }

    #[tokio::test]
    async fn test_store_conversations_are_independent() {
        let (store, _) = store_with_budget(3000);

        store.append("room-1", Role::User, "one").await.unwrap();
        store.append("room-2", Role::User, "two").await.unwrap();

        assert_eq!(store.get("room-1").await.unwrap(), vec![Turn::user("one")]);
        assert_eq!(store.get("room-2").await.unwrap(), vec![Turn::user("two")]);
    }

    #[tokio::test]
    async fn test_store_stays_within_budget() {
        let budget = 20;
        let (store, _) = store_with_budget(budget);

        for i in 1..=30 {
            store
                .append("room-1", Role::User, &format!("Message number {}", i))
                .await
                .unwrap();
            let turns = store.get("room-1").await.unwrap();
            assert!(store.counter().count(&turns) <= budget);
        }

        let turns = store.get("room-1").await.unwrap();
        assert_eq!(turns.last().unwrap().content, "Message number 30");
        assert_eq!(store.token_count("room-1").await.unwrap(), store.counter().count(&turns));
    }

    #[tokio::test]
    async fn test_store_eviction_oldest_first() {
        let counter = counter();
        let budget = counter.count(&[Turn::user("charlie"), Turn::assistant("delta")]);
        let (store, _) = store_with_budget(budget);

        store.append("room-1", Role::User, "alpha").await.unwrap();
        store.append("room-1", Role::Assistant, "bravo").await.unwrap();
        store.append("room-1", Role::User, "charlie").await.unwrap();
        store.append("room-1", Role::Assistant, "delta").await.unwrap();

        let turns = store.get("room-1").await.unwrap();
        assert_eq!(turns, vec![Turn::user("charlie"), Turn::assistant("delta")]);
    }

    #[tokio::test]
    async fn test_store_oversized_turn_kept_alone() {
        let (store, _) = store_with_budget(3);

        store.append("room-1", Role::User, "hi").await.unwrap();
        let transcript = store
            .append(
                "room-1",
                Role::Assistant,
                "a reply that is definitely longer than three tokens",
            )
            .await
            .unwrap();

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.turns()[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_store_malformed_blob_resets_history() {
        let (store, backend) = store_with_budget(3000);
        backend
            .save("room-1", "{this is not a transcript".into())
            .await
            .unwrap();

        assert!(store.get("room-1").await.unwrap().is_empty());

        store.append("room-1", Role::User, "fresh start").await.unwrap();

        assert_eq!(store.get("room-1").await.unwrap(), vec![Turn::user("fresh start")]);
        let blob = backend.load("room-1").await.unwrap().unwrap();
        assert_eq!(blob, r#"[{"role":"user","content":"fresh start"}]"#);
    }

    #[test]
    fn test_store_token_count_of_unknown_conversation() {
        let (store, _) = store_with_budget(3000);
        let count = tokio_test::block_on(store.token_count("nobody"));
        assert_eq!(tokio_test::assert_ok!(count), 0);
    }

    #[tokio::test]
    async fn test_store_clear() {
        let (store, _) = store_with_budget(3000);

        store.append("room-1", Role::User, "Hello").await.unwrap();
        assert!(store.clear("room-1").await.unwrap());
        assert!(store.get("room-1").await.unwrap().is_empty());
        assert!(!store.clear("room-1").await.unwrap());
    }
}
