//! Cloud store (C5) — HTTP client over a remote vector index, relational DB,
//! and optional blob store, all addressed by account-scoped URLs under one
//! bearer token.
//!
//! Three remote services, one client: the vector index is keyed by
//! `content_hash` (≤ 64 bytes — the raw hash, never `"mem_" + hash`, which
//! was rejected by a past index generation and must never regress per the
//! backward-compatibility note). Retryable failures (network errors, 429,
//! 5xx) get exponential backoff with jitter; permanent failures (4xx other
//! than 429, 413, 507) are never retried.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::embeddings::EmbeddingProvider;
use crate::error::{is_retryable, MemoryError, Result};
use crate::model::{now_unix, ChunkPolicy, Memory, MemoryType};

use super::{MemoryQueryResult, MemoryStore, Stats};

/// Cloud embedding model token limit translated to a character budget (§4.5).
pub const MAX_CONTENT_LENGTH: usize = 800;
/// Published per-vector metadata size limit, checked before submission.
const MAX_METADATA_BYTES: usize = 10 * 1024;
const MAX_RETRIES: u32 = 5;
const CAPACITY_WARNING_RATIO: f64 = 0.80;
const CAPACITY_CRITICAL_RATIO: f64 = 0.95;

#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub base_url: String,
    pub api_key: String,
    pub vector_index_limit: u64,
    pub request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct UpsertVectorRequest<'a> {
    id: &'a str,
    values: &'a [f32],
}

#[derive(Debug, Serialize)]
struct DeleteByIdsRequest<'a> {
    ids: &'a [&'a str],
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct RemoteMemoryRecord {
    content_hash: String,
    content: String,
    memory_type: String,
    created_at: f64,
    updated_at: f64,
    metadata: serde_json::Map<String, Json>,
    quality_score: Option<f32>,
    tags: Vec<String>,
}

/// HTTP client over the cloud backend. Holds its own in-memory capacity
/// estimate so callers can be warned before the remote index rejects writes.
pub struct CloudStore {
    client: reqwest::Client,
    config: CloudConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    chunk_policy: ChunkPolicy,
    vector_count: Mutex<u64>,
}

impl CloudStore {
    pub fn new(config: CloudConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| MemoryError::Network(e.to_string()))?;

        Ok(Self {
            client,
            config,
            embedder,
            chunk_policy: ChunkPolicy::cloud(),
            vector_count: Mutex::new(0),
        })
    }

    pub fn chunk_policy(&self) -> ChunkPolicy {
        self.chunk_policy
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.bearer_auth(&self.config.api_key)
    }

    /// Enforce the 800-char limit; callers that need to store longer content
    /// must split it first via `model::chunk::split_content` (B4).
    fn enforce_content_length(content: &str) -> Result<()> {
        if content.chars().count() > MAX_CONTENT_LENGTH {
            return Err(MemoryError::Limit(format!(
                "content length {} exceeds cloud limit of {MAX_CONTENT_LENGTH} chars",
                content.chars().count()
            )));
        }
        Ok(())
    }

    fn enforce_metadata_size(metadata: &serde_json::Map<String, Json>) -> Result<()> {
        let size = serde_json::to_vec(metadata).map(|b| b.len()).unwrap_or(0);
        if size > MAX_METADATA_BYTES {
            return Err(MemoryError::Limit(format!(
                "metadata size {size} bytes exceeds {MAX_METADATA_BYTES} byte limit"
            )));
        }
        Ok(())
    }

    fn capacity_status(&self) -> Option<&'static str> {
        let count = *self.vector_count.lock().expect("vector count lock poisoned");
        if self.config.vector_index_limit == 0 {
            return None;
        }
        let ratio = count as f64 / self.config.vector_index_limit as f64;
        if ratio >= CAPACITY_CRITICAL_RATIO {
            Some("critical")
        } else if ratio >= CAPACITY_WARNING_RATIO {
            Some("warning")
        } else {
            None
        }
    }

    /// Execute `f` with exponential backoff + jitter on retryable errors.
    async fn with_retry<T, F, Fut>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if is_retryable(&e) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let base_ms = 200u64 * 2u64.pow(attempt);
                    let jitter_ms = rand::thread_rng().gen_range(0..100);
                    tracing::warn!(attempt, error = %e, "cloud request failed, retrying");
                    tokio::time::sleep(Duration::from_millis(base_ms + jitter_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn upsert_vector(&self, content_hash: &str, values: &[f32]) -> Result<()> {
        let body = UpsertVectorRequest { id: content_hash, values };
        self.with_retry(|| async {
            let resp = self
                .authed(self.client.post(self.url("/vectors/upsert")).json(&body))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }
            Ok(())
        })
        .await?;

        let mut count = self.vector_count.lock().expect("vector count lock poisoned");
        *count += 1;
        Ok(())
    }

    async fn delete_vectors(&self, ids: &[&str]) -> Result<()> {
        let body = DeleteByIdsRequest { ids };
        self.with_retry(|| async {
            let resp = self
                .authed(self.client.post(self.url("/delete_by_ids")).json(&body))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }
            Ok(())
        })
        .await
    }

    async fn fetch_record(&self, content_hash: &str) -> Result<Option<RemoteMemoryRecord>> {
        self.with_retry(|| async {
            let resp = self
                .authed(self.client.get(self.url(&format!("/memories/{content_hash}"))))
                .send()
                .await?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }
            let record: RemoteMemoryRecord = resp.json().await.map_err(|e| MemoryError::Network(e.to_string()))?;
            Ok(Some(record))
        })
        .await
    }

    /// Loads memories in pages without N+1 tag lookups — each page response
    /// already inlines tags (§4.5).
    pub async fn get_all_memories_bulk(&self, page_size: u64) -> Result<Vec<Memory>> {
        let mut out = Vec::new();
        let mut offset = 0u64;
        loop {
            let page: Vec<RemoteMemoryRecord> = self
                .with_retry(|| async {
                    let resp = self
                        .authed(
                            self.client
                                .get(self.url("/memories"))
                                .query(&[("limit", page_size), ("offset", offset)]),
                        )
                        .send()
                        .await?;
                    if !resp.status().is_success() {
                        return Err(classify_status(resp.status()));
                    }
                    resp.json().await.map_err(|e| MemoryError::Network(e.to_string()))
                })
                .await?;

            if page.is_empty() {
                break;
            }
            let page_len = page.len() as u64;
            out.extend(page.into_iter().map(record_to_memory));
            offset += page_len;
            if page_len < page_size {
                break;
            }
        }
        Ok(out)
    }
}

fn record_to_memory(r: RemoteMemoryRecord) -> Memory {
    Memory {
        content: r.content,
        content_hash: r.content_hash,
        tags: r.tags,
        memory_type: MemoryType::parse(&r.memory_type),
        metadata: r.metadata.into_iter().collect(),
        created_at: r.created_at,
        updated_at: r.updated_at,
        embedding: None,
        quality_score: r.quality_score,
    }
}

fn classify_status(status: reqwest::StatusCode) -> MemoryError {
    if status.as_u16() == 429 || status.is_server_error() {
        MemoryError::Network(format!("cloud returned {status}"))
    } else if status.as_u16() == 413 || status.as_u16() == 507 {
        MemoryError::Limit(format!("cloud returned {status}"))
    } else {
        MemoryError::Validation(format!("cloud returned {status}"))
    }
}

#[async_trait]
impl MemoryStore for CloudStore {
    async fn store(&self, mut memory: Memory) -> Result<(bool, String)> {
        Self::enforce_content_length(&memory.content)?;
        let metadata_map: serde_json::Map<String, Json> = memory.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Self::enforce_metadata_size(&metadata_map)?;

        if self.fetch_record(&memory.content_hash).await?.is_some() {
            return Ok((false, "duplicate".to_string()));
        }

        if memory.embedding.is_none() {
            let vector = self.embedder.embed(&memory.content).await?;
            Memory::validate_embedding(&vector)?;
            memory.embedding = Some(vector);
        }

        let record = RemoteMemoryRecord {
            content_hash: memory.content_hash.clone(),
            content: memory.content.clone(),
            memory_type: memory.memory_type.as_str().to_string(),
            created_at: memory.created_at,
            updated_at: memory.updated_at,
            metadata: metadata_map,
            quality_score: memory.quality_score,
            tags: memory.tags.clone(),
        };

        self.with_retry(|| async {
            let resp = self
                .authed(self.client.post(self.url("/memories")).json(&record))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }
            Ok(())
        })
        .await?;

        if let Some(embedding) = &memory.embedding {
            self.upsert_vector(&memory.content_hash, embedding).await?;
        }

        if let Some(level) = self.capacity_status() {
            tracing::warn!(level, "cloud vector index approaching capacity");
        }

        Ok((true, memory.content_hash))
    }

    async fn update_memory_metadata(&self, content_hash: &str, patch: serde_json::Map<String, Json>) -> Result<(bool, String)> {
        let Some(mut record) = self.fetch_record(content_hash).await? else {
            return Ok((false, "not found".to_string()));
        };
        for (k, v) in patch {
            record.metadata.insert(k, v);
        }
        record.updated_at = now_unix();

        self.with_retry(|| async {
            let resp = self
                .authed(self.client.put(self.url(&format!("/memories/{content_hash}"))).json(&record))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }
            Ok(())
        })
        .await?;

        Ok((true, "updated".to_string()))
    }

    async fn update_memories_batch(&self, memories: Vec<Memory>) -> Result<(u64, u64)> {
        let mut ok = 0u64;
        let mut failed = 0u64;
        for memory in memories {
            let Some(mut record) = self.fetch_record(&memory.content_hash).await? else {
                failed += 1;
                continue;
            };
            record.metadata = memory.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            record.memory_type = memory.memory_type.as_str().to_string();
            record.tags = memory.tags.clone();
            record.quality_score = memory.quality_score;
            record.updated_at = memory.updated_at;

            let result = self
                .with_retry(|| async {
                    let resp = self
                        .authed(self.client.put(self.url(&format!("/memories/{}", memory.content_hash))).json(&record))
                        .send()
                        .await?;
                    if !resp.status().is_success() {
                        return Err(classify_status(resp.status()));
                    }
                    Ok(())
                })
                .await;

            match result {
                Ok(()) => ok += 1,
                Err(e) => {
                    tracing::warn!(hash = %memory.content_hash, error = %e, "batch update failed for one memory");
                    failed += 1;
                }
            }
        }
        Ok((ok, failed))
    }

    async fn delete(&self, content_hash: &str) -> Result<(bool, String)> {
        if self.fetch_record(content_hash).await?.is_none() {
            return Ok((false, "not found".to_string()));
        }
        self.with_retry(|| async {
            let resp = self
                .authed(self.client.delete(self.url(&format!("/memories/{content_hash}"))))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(classify_status(resp.status()));
            }
            Ok(())
        })
        .await?;
        self.delete_vectors(&[content_hash]).await?;
        Ok((true, "deleted".to_string()))
    }

    async fn delete_by_tags(&self, tags: Vec<String>) -> Result<(u64, Vec<String>)> {
        let all = self.get_all_memories_bulk(200).await?;
        let matching: Vec<String> = all
            .into_iter()
            .filter(|m| m.tags.iter().any(|t| tags.contains(t)))
            .map(|m| m.content_hash)
            .collect();

        let mut deleted = 0u64;
        let mut errors = Vec::new();
        for hash in matching {
            match self.delete(&hash).await {
                Ok((true, _)) => deleted += 1,
                Ok((false, reason)) => errors.push(format!("{hash}: {reason}")),
                Err(e) => errors.push(format!("{hash}: {e}")),
            }
        }
        Ok((deleted, errors))
    }

    async fn delete_by_timeframe(&self, start: f64, end: f64) -> Result<(u64, Vec<String>)> {
        let all = self.get_all_memories_bulk(200).await?;
        let matching: Vec<String> = all
            .into_iter()
            .filter(|m| m.created_at >= start && m.created_at <= end)
            .map(|m| m.content_hash)
            .collect();

        let mut deleted = 0u64;
        let mut errors = Vec::new();
        for hash in matching {
            match self.delete(&hash).await {
                Ok((true, _)) => deleted += 1,
                Ok((false, reason)) => errors.push(format!("{hash}: {reason}")),
                Err(e) => errors.push(format!("{hash}: {e}")),
            }
        }
        Ok((deleted, errors))
    }

    async fn delete_before_date(&self, ts: f64) -> Result<(u64, Vec<String>)> {
        self.delete_by_timeframe(0.0, ts).await
    }

    async fn get_by_hash(&self, content_hash: &str) -> Result<Option<Memory>> {
        Ok(self.fetch_record(content_hash).await?.map(record_to_memory))
    }

    async fn get_all_memories(&self, limit: u64, offset: u64, memory_type: Option<&str>, tags: Option<&[String]>) -> Result<Vec<Memory>> {
        let all = self.get_all_memories_bulk(200).await?;
        let filtered: Vec<Memory> = all
            .into_iter()
            .filter(|m| memory_type.is_none_or(|t| m.memory_type.as_str() == t))
            .filter(|m| tags.is_none_or(|ts| ts.is_empty() || m.tags.iter().any(|t| ts.contains(t))))
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(filtered)
    }

    async fn get_recent_memories(&self, n: u64) -> Result<Vec<Memory>> {
        let mut all = self.get_all_memories_bulk(200).await?;
        all.sort_by(|a, b| b.created_at.partial_cmp(&a.created_at).unwrap_or(std::cmp::Ordering::Equal));
        all.truncate(n as usize);
        Ok(all)
    }

    async fn get_memory_timestamps(&self) -> Result<Vec<(String, f64)>> {
        let all = self.get_all_memories_bulk(200).await?;
        Ok(all.into_iter().map(|m| (m.content_hash, m.created_at)).collect())
    }

    async fn get_largest_memories(&self, n: u64) -> Result<Vec<Memory>> {
        let mut all = self.get_all_memories_bulk(200).await?;
        all.sort_by_key(|m| std::cmp::Reverse(m.content.chars().count()));
        all.truncate(n as usize);
        Ok(all)
    }

    async fn count_all_memories(&self, memory_type: Option<&str>, tags: Option<&[String]>) -> Result<u64> {
        Ok(self.get_all_memories(u64::MAX, 0, memory_type, tags).await?.len() as u64)
    }

    async fn retrieve(
        &self,
        query: &str,
        n: u64,
        similarity_threshold: Option<f32>,
        time_start: Option<f64>,
        time_end: Option<f64>,
    ) -> Result<Vec<MemoryQueryResult>> {
        let query_vector = self.embedder.embed(query).await?;
        let threshold = similarity_threshold.unwrap_or(0.0);

        #[derive(Deserialize)]
        struct SearchHit {
            id: String,
            score: f32,
        }

        let hits: Vec<SearchHit> = self
            .with_retry(|| async {
                let resp = self
                    .authed(
                        self.client
                            .post(self.url("/vectors/search"))
                            .json(&serde_json::json!({ "values": query_vector, "top_k": n * 4 })),
                    )
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    return Err(classify_status(resp.status()));
                }
                resp.json().await.map_err(|e| MemoryError::Network(e.to_string()))
            })
            .await?;

        let mut results = Vec::new();
        for hit in hits {
            if hit.score < threshold {
                continue;
            }
            let Some(memory) = self.get_by_hash(&hit.id).await? else {
                continue;
            };
            if memory.memory_type == MemoryType::Archived {
                continue;
            }
            if time_start.is_some_and(|s| memory.created_at < s) || time_end.is_some_and(|e| memory.created_at > e) {
                continue;
            }
            results.push(MemoryQueryResult {
                memory,
                similarity_score: hit.score,
                distance: 1.0 - hit.score,
            });
        }
        results.sort_by(|a, b| b.similarity_score.partial_cmp(&a.similarity_score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(n as usize);
        Ok(results)
    }

    async fn search_by_tag(&self, tags: &[String], match_all: bool, time_start: Option<f64>) -> Result<Vec<Memory>> {
        let all = self.get_all_memories_bulk(200).await?;
        Ok(all
            .into_iter()
            .filter(|m| {
                if match_all {
                    tags.iter().all(|t| m.tags.contains(t))
                } else {
                    tags.iter().any(|t| m.tags.contains(t))
                }
            })
            .filter(|m| time_start.is_none_or(|s| m.created_at >= s))
            .collect())
    }

    async fn get_all_tags(&self) -> Result<Vec<String>> {
        let all = self.get_all_memories_bulk(200).await?;
        let mut tags: Vec<String> = all.into_iter().flat_map(|m| m.tags).collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    async fn get_stats(&self) -> Result<Stats> {
        let all = self.get_all_memories_bulk(200).await?;
        let week_ago = now_unix() - 7.0 * 86400.0;
        let memories_this_week = all.iter().filter(|m| m.created_at >= week_ago).count();
        let unique_tags = {
            let mut tags: Vec<&str> = all.iter().flat_map(|m| m.tags.iter().map(String::as_str)).collect();
            tags.sort();
            tags.dedup();
            tags.len()
        };

        Ok(Stats {
            backend: "cloud".to_string(),
            memory_count: all.len() as u64,
            unique_tags: unique_tags as u64,
            memories_this_week: memories_this_week as u64,
            database_size_bytes: 0,
            database_size_mb: 0.0,
            embedding_model: "cloud-remote".to_string(),
            embedding_dimension: self.embedder.dimensions(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_over_800_chars_is_rejected() {
        let content = "a".repeat(801);
        let err = CloudStore::enforce_content_length(&content).unwrap_err();
        assert!(matches!(err, MemoryError::Limit(_)));
    }

    #[test]
    fn content_exactly_800_chars_is_accepted() {
        let content = "a".repeat(800);
        assert!(CloudStore::enforce_content_length(&content).is_ok());
    }

    #[test]
    fn classify_status_retries_429_and_5xx() {
        assert!(matches!(classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS), MemoryError::Network(_)));
        assert!(matches!(classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR), MemoryError::Network(_)));
    }

    #[test]
    fn classify_status_treats_413_507_as_limit() {
        assert!(matches!(classify_status(reqwest::StatusCode::PAYLOAD_TOO_LARGE), MemoryError::Limit(_)));
        assert!(matches!(classify_status(reqwest::StatusCode::INSUFFICIENT_STORAGE), MemoryError::Limit(_)));
    }

    #[test]
    fn classify_status_treats_other_4xx_as_validation() {
        assert!(matches!(classify_status(reqwest::StatusCode::BAD_REQUEST), MemoryError::Validation(_)));
    }
}
