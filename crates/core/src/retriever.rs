use crate::embeddings::Embedder;
use crate::models::{CollectionKey, RetrievalResult, ScoredChunk};
use crate::traits::VectorIndex;
use crate::EngineError;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let (mut dot, mut left_norm, mut right_norm) = (0f32, 0f32, 0f32);
    for (a, b) in left.iter().zip(right.iter()) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

/// Descending score, ties broken by ascending chunk index. NaN scores sort last.
pub fn compare_matches(left: &ScoredChunk, right: &ScoredChunk) -> Ordering {
    let by_score = match (left.score.is_nan(), right.score.is_nan()) {
        (false, false) => right.score.total_cmp(&left.score),
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
    };
    by_score.then_with(|| left.chunk.chunk_index.cmp(&right.chunk.chunk_index))
}

pub fn rank_matches(mut matches: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    matches.sort_by(compare_matches);
    matches.truncate(k);
    matches
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub async fn retrieve(
        &self,
        key: &CollectionKey,
        query: &str,
        k: usize,
    ) -> Result<RetrievalResult, EngineError> {
        if query.trim().is_empty() {
            return Err(EngineError::InvalidArgument("query is empty".to_string()));
        }

        let info = self
            .index
            .collection_info(key)
            .await?
            .ok_or_else(|| EngineError::CollectionNotFound {
                owner: key.owner.clone(),
                document_id: key.document_id.clone(),
            })?;

        if info.embedder_id != self.embedder.model_id() {
            return Err(EngineError::EmbedderMismatch {
                indexed_with: info.embedder_id,
                querying_with: self.embedder.model_id().to_string(),
            });
        }

        let query_vector = self.embedder.embed(query).await?;
        if query_vector.len() != info.dimensions {
            return Err(EngineError::DimensionMismatch {
                expected: info.dimensions,
                actual: query_vector.len(),
            });
        }

        // The index truncates to the size of the collection it actually read,
        // which may be newer than `info` if a re-index landed in between.
        let k = k.max(1);
        let matches = self.index.query(key, &query_vector, k).await?;
        let matches = rank_matches(matches, k);

        debug!(collection = %key, k, returned = matches.len(), "retrieved chunks");

        Ok(RetrievalResult {
            key: key.clone(),
            query: query.to_string(),
            matches,
        })
    }
}
