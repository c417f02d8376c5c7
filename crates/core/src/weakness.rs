use crate::models::WeaknessRecord;
use crate::traits::WeaknessStore;
use crate::EngineError;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::info;

pub struct WeaknessAggregator {
    store: Arc<dyn WeaknessStore>,
}

impl WeaknessAggregator {
    pub fn new(store: Arc<dyn WeaknessStore>) -> Self {
        Self { store }
    }

    /// One miss per tag, duplicates included. Blank tags are dropped.
    pub async fn record_misses(
        &self,
        owner: &str,
        concept_tags: &[String],
        occurred_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let tags: Vec<String> = concept_tags
            .iter()
            .map(|tag| tag.trim())
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();

        if tags.is_empty() {
            return Ok(());
        }

        self.store.record_misses(owner, &tags, occurred_at).await?;
        info!(owner, misses = tags.len(), "recorded concept misses");
        Ok(())
    }

    /// Highest miss count first, ties by most recent miss, then by concept.
    pub async fn list_weaknesses(&self, owner: &str) -> Result<Vec<WeaknessRecord>, EngineError> {
        let mut records = self.store.list(owner).await?;
        records.sort_by(compare_weakness);
        Ok(records)
    }

    pub async fn top_weaknesses(
        &self,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<WeaknessRecord>, EngineError> {
        let mut records = self.list_weaknesses(owner).await?;
        records.truncate(limit);
        Ok(records)
    }
}

fn compare_weakness(left: &WeaknessRecord, right: &WeaknessRecord) -> Ordering {
    right
        .miss_count
        .cmp(&left.miss_count)
        .then_with(|| right.last_miss_at.cmp(&left.last_miss_at))
        .then_with(|| left.concept.cmp(&right.concept))
}
