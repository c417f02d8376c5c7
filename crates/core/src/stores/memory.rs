use crate::models::{
    CollectionInfo, CollectionKey, IndexedChunk, QuizAttempt, ScoredChunk, WeaknessRecord,
};
use crate::retriever::{cosine_similarity, rank_matches};
use crate::stores::journal::{append_line, read_lines, remove_if_present, write_atomically};
use crate::traits::{HistoryStore, VectorIndex, WeaknessStore};
use crate::EngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Collection {
    embedder_id: String,
    dimensions: usize,
    entries: Vec<IndexedChunk>,
}

#[derive(Serialize)]
struct CollectionFileRef<'a> {
    key: &'a CollectionKey,
    collection: &'a Collection,
}

#[derive(Deserialize)]
struct CollectionFile {
    key: CollectionKey,
    collection: Collection,
}

/// Process-local vector store. Collections are immutable once published and
/// replaced by swapping the `Arc` under the write lock.
///
/// When opened on a directory, every collection also lives in its own file
/// named after the key digest, so processes sharing the directory only ever
/// replace the keys they index.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<CollectionKey, Arc<Collection>>>,
    directory: Option<PathBuf>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every collection file under `directory` and persists later
    /// changes there. A missing directory yields an empty store.
    pub fn open(directory: &Path) -> Result<Self, EngineError> {
        fs::create_dir_all(directory)?;

        let mut collections = HashMap::new();
        for entry in fs::read_dir(directory)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let file: CollectionFile = serde_json::from_slice(&fs::read(&path)?)?;
            collections.insert(file.key, Arc::new(file.collection));
        }

        Ok(Self {
            collections: RwLock::new(collections),
            directory: Some(directory.to_path_buf()),
        })
    }

    fn collection_path(&self, key: &CollectionKey) -> Option<PathBuf> {
        self.directory
            .as_ref()
            .map(|directory| directory.join(format!("{}.json", key.digest())))
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorStore {
    async fn replace_collection(
        &self,
        key: &CollectionKey,
        embedder_id: &str,
        entries: Vec<IndexedChunk>,
    ) -> Result<(), EngineError> {
        let dimensions = entries.first().map(|entry| entry.vector.len()).ok_or_else(|| {
            EngineError::InvalidArgument(format!("refusing to publish empty collection {key}"))
        })?;

        if let Some(bad) = entries.iter().find(|entry| entry.vector.len() != dimensions) {
            return Err(EngineError::DimensionMismatch {
                expected: dimensions,
                actual: bad.vector.len(),
            });
        }

        let collection = Arc::new(Collection {
            embedder_id: embedder_id.to_string(),
            dimensions,
            entries,
        });

        let mut collections = self.collections.write().await;
        if let Some(path) = self.collection_path(key) {
            write_atomically(
                &path,
                &CollectionFileRef {
                    key,
                    collection: &collection,
                },
            )?;
        }
        collections.insert(key.clone(), collection);
        Ok(())
    }

    async fn query(
        &self,
        key: &CollectionKey,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, EngineError> {
        let collection = self
            .collections
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::CollectionNotFound {
                owner: key.owner.clone(),
                document_id: key.document_id.clone(),
            })?;

        if vector.len() != collection.dimensions {
            return Err(EngineError::DimensionMismatch {
                expected: collection.dimensions,
                actual: vector.len(),
            });
        }

        let scored = collection
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(vector, &entry.vector),
            })
            .collect();

        Ok(rank_matches(scored, k))
    }

    async fn collection_info(
        &self,
        key: &CollectionKey,
    ) -> Result<Option<CollectionInfo>, EngineError> {
        Ok(self
            .collections
            .read()
            .await
            .get(key)
            .map(|collection| CollectionInfo {
                size: collection.entries.len(),
                dimensions: collection.dimensions,
                embedder_id: collection.embedder_id.clone(),
            }))
    }

    async fn delete_collection(&self, key: &CollectionKey) -> Result<bool, EngineError> {
        let mut collections = self.collections.write().await;
        let file_removed = match self.collection_path(key) {
            Some(path) => remove_if_present(&path)?,
            None => false,
        };
        Ok(collections.remove(key).is_some() || file_removed)
    }
}

/// Journal entry for one `record_misses` call.
#[derive(Debug, Serialize, Deserialize)]
struct MissEvent {
    owner: String,
    concepts: Vec<String>,
    occurred_at: DateTime<Utc>,
}

type WeaknessLedger = BTreeMap<String, BTreeMap<String, WeaknessRecord>>;

fn apply_misses(ledger: &mut WeaknessLedger, owner: &str, concepts: &[String], at: DateTime<Utc>) {
    let by_concept = ledger.entry(owner.to_string()).or_default();
    for concept in concepts {
        let record = by_concept
            .entry(concept.clone())
            .or_insert_with(|| WeaknessRecord {
                owner: owner.to_string(),
                concept: concept.clone(),
                miss_count: 0,
                last_miss_at: at,
            });
        record.miss_count = record.miss_count.saturating_add(1);
        record.last_miss_at = record.last_miss_at.max(at);
    }
}

/// Weakness ledger keyed by owner, then concept. Opened on a journal, every
/// call is appended before it is applied, so counts from several processes
/// add up instead of overwriting each other.
#[derive(Debug, Default)]
pub struct MemoryWeaknessStore {
    records: Mutex<WeaknessLedger>,
    journal: Option<PathBuf>,
}

impl MemoryWeaknessStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(journal: &Path) -> Result<Self, EngineError> {
        let mut records = WeaknessLedger::new();
        for event in read_lines::<MissEvent>(journal)? {
            apply_misses(&mut records, &event.owner, &event.concepts, event.occurred_at);
        }
        Ok(Self {
            records: Mutex::new(records),
            journal: Some(journal.to_path_buf()),
        })
    }
}

#[async_trait]
impl WeaknessStore for MemoryWeaknessStore {
    async fn record_misses(
        &self,
        owner: &str,
        concepts: &[String],
        occurred_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let mut records = self.records.lock().await;
        if let Some(journal) = &self.journal {
            append_line(
                journal,
                &MissEvent {
                    owner: owner.to_string(),
                    concepts: concepts.to_vec(),
                    occurred_at,
                },
            )?;
        }
        apply_misses(&mut records, owner, concepts, occurred_at);
        Ok(())
    }

    async fn list(&self, owner: &str) -> Result<Vec<WeaknessRecord>, EngineError> {
        Ok(self
            .records
            .lock()
            .await
            .get(owner)
            .map(|by_concept| by_concept.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// Quiz attempts per owner, optionally journaled like the weakness ledger.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    attempts: Mutex<BTreeMap<String, Vec<QuizAttempt>>>,
    journal: Option<PathBuf>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(journal: &Path) -> Result<Self, EngineError> {
        let mut attempts: BTreeMap<String, Vec<QuizAttempt>> = BTreeMap::new();
        for attempt in read_lines::<QuizAttempt>(journal)? {
            attempts.entry(attempt.owner.clone()).or_default().push(attempt);
        }
        Ok(Self {
            attempts: Mutex::new(attempts),
            journal: Some(journal.to_path_buf()),
        })
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, attempt: &QuizAttempt) -> Result<(), EngineError> {
        let mut attempts = self.attempts.lock().await;
        if let Some(journal) = &self.journal {
            append_line(journal, attempt)?;
        }
        attempts
            .entry(attempt.owner.clone())
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn list(&self, owner: &str) -> Result<Vec<QuizAttempt>, EngineError> {
        Ok(self
            .attempts
            .lock()
            .await
            .get(owner)
            .cloned()
            .unwrap_or_default())
    }
}
