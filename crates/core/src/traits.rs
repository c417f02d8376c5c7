use crate::models::{
    CollectionInfo, CollectionKey, IndexedChunk, QuizAttempt, ScoredChunk, WeaknessRecord,
};
use crate::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replaces the whole collection for `key`. Readers observe either the
    /// previous collection or the complete new one, never a mix.
    async fn replace_collection(
        &self,
        key: &CollectionKey,
        embedder_id: &str,
        entries: Vec<IndexedChunk>,
    ) -> Result<(), EngineError>;

    /// Up to `k` chunks of the collection by cosine similarity to `vector`.
    async fn query(
        &self,
        key: &CollectionKey,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, EngineError>;

    async fn collection_info(&self, key: &CollectionKey)
        -> Result<Option<CollectionInfo>, EngineError>;

    /// Returns whether a collection existed.
    async fn delete_collection(&self, key: &CollectionKey) -> Result<bool, EngineError>;
}

#[async_trait]
pub trait WeaknessStore: Send + Sync {
    /// Applies one miss per tag. All increments of a call land together.
    async fn record_misses(
        &self,
        owner: &str,
        concepts: &[String],
        occurred_at: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    async fn list(&self, owner: &str) -> Result<Vec<WeaknessRecord>, EngineError>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, attempt: &QuizAttempt) -> Result<(), EngineError>;

    /// Every attempt of `owner`, in no particular order.
    async fn list(&self, owner: &str) -> Result<Vec<QuizAttempt>, EngineError>;
}
