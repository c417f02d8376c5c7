use crate::models::{Chunk, CollectionInfo, CollectionKey, IndexedChunk, ScoredChunk, TokenSpan};
use crate::traits::VectorIndex;
use crate::EngineError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

const BACKEND: &str = "qdrant";
const UPSERT_BATCH: usize = 256;

/// Qdrant-backed collections. Each (owner, document) key is an alias that
/// points at one physical collection; re-indexing fills a fresh physical
/// collection and then moves the alias in a single alias-actions request.
pub struct QdrantStore {
    endpoint: String,
    client: Client,
    prefix: String,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            prefix: prefix.into(),
        }
    }

    /// Alias for `key`. Hashed so arbitrary ids become valid collection names.
    pub fn alias_name(&self, key: &CollectionKey) -> String {
        format!("{}_{}", self.prefix, &key.digest()[..40])
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<String>, EngineError> {
        let response = self.send(self.client.get(self.url("aliases"))).await?;
        let parsed: Value = ensure_success(response).await?.json().await.map_err(http_error)?;
        Ok(parsed
            .pointer("/result/aliases")
            .and_then(Value::as_array)
            .and_then(|aliases| {
                aliases.iter().find_map(|entry| {
                    let name = entry.pointer("/alias_name").and_then(Value::as_str)?;
                    if name == alias {
                        entry
                            .pointer("/collection_name")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    } else {
                        None
                    }
                })
            }))
    }

    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<(), EngineError> {
        let response = self
            .send(
                self.client
                    .put(self.url(&format!("collections/{name}")))
                    .json(&json!({
                        "vectors": { "size": dimensions, "distance": "Cosine" }
                    })),
            )
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), EngineError> {
        let response = self
            .send(self.client.delete(self.url(&format!("collections/{name}"))))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    async fn upsert_points(
        &self,
        name: &str,
        key: &CollectionKey,
        embedder_id: &str,
        entries: &[IndexedChunk],
    ) -> Result<(), EngineError> {
        for batch in entries.chunks(UPSERT_BATCH) {
            let points: Vec<Value> = batch
                .iter()
                .map(|entry| {
                    json!({
                        "id": entry.chunk.chunk_index,
                        "vector": entry.vector,
                        "payload": {
                            "owner": key.owner,
                            "document_id": key.document_id,
                            "embedder_id": embedder_id,
                            "chunk_id": entry.chunk.chunk_id,
                            "chunk_index": entry.chunk.chunk_index,
                            "span_start": entry.chunk.span.start,
                            "span_end": entry.chunk.span.end,
                            "page_start": entry.chunk.page_start,
                            "page_end": entry.chunk.page_end,
                            "text": entry.chunk.text,
                        },
                    })
                })
                .collect();

            let response = self
                .send(
                    self.client
                        .put(self.url(&format!("collections/{name}/points?wait=true")))
                        .json(&json!({ "points": points })),
                )
                .await?;
            ensure_success(response).await?;
        }
        Ok(())
    }

    async fn switch_alias(&self, alias: &str, target: &str, had_previous: bool) -> Result<(), EngineError> {
        let mut actions = Vec::new();
        if had_previous {
            actions.push(json!({ "delete_alias": { "alias_name": alias } }));
        }
        actions.push(json!({
            "create_alias": { "collection_name": target, "alias_name": alias }
        }));

        let response = self
            .send(
                self.client
                    .post(self.url("collections/aliases"))
                    .json(&json!({ "actions": actions })),
            )
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, EngineError> {
        request.send().await.map_err(http_error)
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
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

        let alias = self.alias_name(key);
        let previous = self.resolve_alias(&alias).await?;
        let staging = format!("{alias}_{}", Uuid::new_v4().simple());

        self.create_collection(&staging, dimensions).await?;
        let published = async {
            self.upsert_points(&staging, key, embedder_id, &entries).await?;
            self.switch_alias(&alias, &staging, previous.is_some()).await
        }
        .await;

        if let Err(error) = published {
            if let Err(cleanup) = self.drop_collection(&staging).await {
                warn!(collection = %staging, error = %cleanup, "failed to drop staging collection");
            }
            return Err(error);
        }

        if let Some(old) = previous {
            if let Err(cleanup) = self.drop_collection(&old).await {
                warn!(collection = %old, error = %cleanup, "failed to drop replaced collection");
            }
        }

        debug!(collection = %key, physical = %staging, points = entries.len(), "qdrant collection published");
        Ok(())
    }

    async fn query(
        &self,
        key: &CollectionKey,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, EngineError> {
        let alias = self.alias_name(key);
        let response = self
            .send(
                self.client
                    .post(self.url(&format!("collections/{alias}/points/search")))
                    .json(&json!({
                        "vector": vector,
                        "limit": k,
                        "with_payload": true,
                    })),
            )
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::CollectionNotFound {
                owner: key.owner.clone(),
                document_id: key.document_id.clone(),
            });
        }

        let parsed: Value = ensure_success(response).await?.json().await.map_err(http_error)?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::with_capacity(hits.len());
        for hit in hits {
            let payload = hit.pointer("/payload").cloned().unwrap_or(Value::Null);
            let same_scope = payload.pointer("/owner").and_then(Value::as_str) == Some(key.owner.as_str())
                && payload.pointer("/document_id").and_then(Value::as_str)
                    == Some(key.document_id.as_str());
            if !same_scope {
                continue;
            }

            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            result.push(ScoredChunk {
                chunk: chunk_from_payload(&payload)?,
                score,
            });
        }

        Ok(result)
    }

    async fn collection_info(
        &self,
        key: &CollectionKey,
    ) -> Result<Option<CollectionInfo>, EngineError> {
        let alias = self.alias_name(key);
        let response = self
            .send(self.client.get(self.url(&format!("collections/{alias}"))))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let info: Value = ensure_success(response).await?.json().await.map_err(http_error)?;

        let size = info
            .pointer("/result/points_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let dimensions = info
            .pointer("/result/config/params/vectors/size")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        let response = self
            .send(
                self.client
                    .post(self.url(&format!("collections/{alias}/points/scroll")))
                    .json(&json!({
                        "limit": 1,
                        "with_payload": ["embedder_id"],
                        "with_vector": false,
                    })),
            )
            .await?;
        let scroll: Value = ensure_success(response).await?.json().await.map_err(http_error)?;
        let embedder_id = scroll
            .pointer("/result/points/0/payload/embedder_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Some(CollectionInfo {
            size,
            dimensions,
            embedder_id,
        }))
    }

    async fn delete_collection(&self, key: &CollectionKey) -> Result<bool, EngineError> {
        let alias = self.alias_name(key);
        let Some(physical) = self.resolve_alias(&alias).await? else {
            return Ok(false);
        };

        let response = self
            .send(
                self.client
                    .post(self.url("collections/aliases"))
                    .json(&json!({
                        "actions": [{ "delete_alias": { "alias_name": alias } }]
                    })),
            )
            .await?;
        ensure_success(response).await?;
        self.drop_collection(&physical).await?;
        Ok(true)
    }
}

fn chunk_from_payload(payload: &Value) -> Result<Chunk, EngineError> {
    let text_field = |name: &str| -> Result<String, EngineError> {
        payload
            .pointer(&format!("/{name}"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EngineError::storage(BACKEND, format!("point payload lacks {name}")))
    };
    let number_field = |name: &str| -> Result<u64, EngineError> {
        payload
            .pointer(&format!("/{name}"))
            .and_then(Value::as_u64)
            .ok_or_else(|| EngineError::storage(BACKEND, format!("point payload lacks {name}")))
    };

    Ok(Chunk {
        chunk_id: text_field("chunk_id")?,
        chunk_index: number_field("chunk_index")? as u32,
        span: TokenSpan {
            start: number_field("span_start")? as usize,
            end: number_field("span_end")? as usize,
        },
        page_start: number_field("page_start")? as u32,
        page_end: number_field("page_end")? as u32,
        text: text_field("text")?,
    })
}

async fn ensure_success(response: Response) -> Result<Response, EngineError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(EngineError::storage(
        BACKEND,
        format!("{status}: {}", body.chars().take(300).collect::<String>()),
    ))
}

fn http_error(error: reqwest::Error) -> EngineError {
    EngineError::storage(BACKEND, error.to_string())
}
