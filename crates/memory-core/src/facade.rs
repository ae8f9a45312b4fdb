//! Service facade (C11) — one class, no transport code, held by both the
//! stdio and HTTP adapters. Everything it returns is a structured,
//! `success`-tagged response; business logic never formats a user-visible
//! string.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as Json;

use crate::model::{reserved_keys, split_content, ChunkPolicy, Memory, MemoryType};
use crate::quality::QualityScorer;
use crate::store::{MemoryQueryResult, MemoryStore, Stats, SyncStatus};

/// `normalize_tags` input (§4.11.1): absent, a single (possibly
/// comma-joined) string, or an explicit list.
pub enum TagsInput {
    None,
    Single(String),
    Many(Vec<String>),
}

/// DRY tag normalization used by every tag-accepting operation (§4.11.1).
pub fn normalize_tags(input: TagsInput) -> Vec<String> {
    match input {
        TagsInput::None => vec![],
        TagsInput::Single(s) => {
            if s.contains(',') {
                dedup_preserve_order(s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()))
            } else {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    vec![]
                } else {
                    vec![trimmed.to_string()]
                }
            }
        }
        TagsInput::Many(list) => dedup_preserve_order(list.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())),
    }
}

fn dedup_preserve_order(iter: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in iter {
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreResult {
    pub success: bool,
    pub content_hash: Option<String>,
    pub chunks_created: Option<u32>,
    pub chunk_hashes: Option<Vec<String>>,
    pub error: Option<String>,
}

impl StoreResult {
    fn single(hash: String) -> Self {
        Self {
            success: true,
            content_hash: Some(hash),
            chunks_created: None,
            chunk_hashes: None,
            error: None,
        }
    }

    fn chunked(hashes: Vec<String>) -> Self {
        Self {
            success: true,
            content_hash: None,
            chunks_created: Some(hashes.len() as u32),
            chunk_hashes: Some(hashes),
            error: None,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content_hash: None,
            chunks_created: None,
            chunk_hashes: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeResult {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResult {
    pub success: bool,
    pub backend: String,
    pub memory_count: u64,
}

/// One class exposed to both transports; holds the active backend and a
/// best-effort quality scorer. Contains no transport-specific code.
pub struct MemoryFacade {
    store: Arc<dyn MemoryStore>,
    scorer: Arc<dyn QualityScorer>,
    chunk_policy: ChunkPolicy,
    include_hostname: bool,
}

impl MemoryFacade {
    pub fn new(store: Arc<dyn MemoryStore>, scorer: Arc<dyn QualityScorer>, chunk_policy: ChunkPolicy, include_hostname: bool) -> Self {
        Self {
            store,
            scorer,
            chunk_policy,
            include_hostname,
        }
    }

    /// §4.11.2
    pub async fn store_memory(
        &self,
        content: String,
        tags: TagsInput,
        memory_type: MemoryType,
        metadata: BTreeMap<String, Json>,
        client_hostname: Option<String>,
    ) -> StoreResult {
        let mut tags = normalize_tags(tags);
        if let Some(meta_tags) = metadata.get("tags") {
            let from_metadata = match meta_tags {
                Json::String(s) => normalize_tags(TagsInput::Single(s.clone())),
                Json::Array(arr) => normalize_tags(TagsInput::Many(
                    arr.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
                )),
                _ => vec![],
            };
            tags = dedup_preserve_order(tags.into_iter().chain(from_metadata));
        }

        if self.include_hostname {
            if let Some(hostname) = client_hostname.filter(|h| !h.is_empty()) {
                if !tags.contains(&hostname) {
                    tags.push(hostname.clone());
                }
            }
        }

        if !self.chunk_policy.needs_split(&content) {
            return self.store_single(content, tags, memory_type, metadata).await;
        }

        let chunks = split_content(&content, &self.chunk_policy);
        let mut hashes = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let mut chunk_metadata = metadata.clone();
            chunk_metadata.insert(reserved_keys::IS_CHUNK.to_string(), Json::Bool(true));
            chunk_metadata.insert(reserved_keys::CHUNK_INDEX.to_string(), Json::from(chunk.chunk_index));
            chunk_metadata.insert(reserved_keys::TOTAL_CHUNKS.to_string(), Json::from(chunk.total_chunks));
            chunk_metadata.insert(reserved_keys::ORIGINAL_LENGTH.to_string(), Json::from(chunk.original_length));

            let mut chunk_tags = tags.clone();
            chunk_tags.push(format!("chunk:{}/{}", chunk.chunk_index, chunk.total_chunks));

            match self.store_single(chunk.content, chunk_tags, memory_type, chunk_metadata).await {
                result if result.success => {
                    if let Some(hash) = result.content_hash {
                        hashes.push(hash);
                    }
                }
                result => return result,
            }
        }
        StoreResult::chunked(hashes)
    }

    async fn store_single(&self, content: String, tags: Vec<String>, memory_type: MemoryType, metadata: BTreeMap<String, Json>) -> StoreResult {
        let memory = match Memory::new(content, tags, memory_type, metadata) {
            Ok(m) => m,
            Err(e) => return StoreResult::failure(e.to_string()),
        };

        let hash = memory.content_hash.clone();
        let content_for_scoring = memory.content.clone();

        match self.store.store(memory).await {
            Ok((true, _)) => {
                if let Ok(score) = self.scorer.score(&content_for_scoring).await {
                    let mut patch = serde_json::Map::new();
                    patch.insert(reserved_keys::QUALITY_SCORE.to_string(), serde_json::json!(score));
                    let _ = self.store.update_memory_metadata(&hash, patch).await;
                }
                StoreResult::single(hash)
            }
            Ok((false, reason)) => StoreResult::failure(reason),
            Err(e) => StoreResult::failure(e.to_string()),
        }
    }

    /// §4.11.3
    pub async fn retrieve_memories(
        &self,
        query: Option<&str>,
        n: u64,
        similarity_threshold: Option<f32>,
        tags: Option<&[String]>,
        memory_type: Option<&str>,
        time_start: Option<f64>,
        time_end: Option<f64>,
    ) -> Vec<MemoryQueryResult> {
        let results = match query.filter(|q| !q.trim().is_empty()) {
            Some(q) => self.store.retrieve(q, n, similarity_threshold, time_start, time_end).await,
            None => self.store.recall(None, n, time_start, time_end).await,
        };

        let Ok(results) = results else { return vec![] };

        results
            .into_iter()
            .filter(|r| tags.is_none_or(|ts| ts.is_empty() || r.memory.tags.iter().any(|t| ts.contains(t))))
            .filter(|r| memory_type.is_none_or(|mt| r.memory.memory_type.as_str() == mt))
            .collect()
    }

    /// §4.11.4
    pub async fn search_by_tag(&self, tags: &[String], match_all: bool, time_start: Option<f64>) -> Vec<Memory> {
        self.store.search_by_tag(tags, match_all, time_start).await.unwrap_or_default()
    }

    pub async fn recall(&self, query: Option<&str>, n: u64, time_start: Option<f64>, time_end: Option<f64>) -> Vec<MemoryQueryResult> {
        self.store.recall(query, n, time_start, time_end).await.unwrap_or_default()
    }

    pub async fn delete(&self, content_hash: &str) -> OutcomeResult {
        match self.store.delete(content_hash).await {
            Ok((true, message)) => OutcomeResult { success: true, message },
            Ok((false, message)) => OutcomeResult { success: false, message },
            Err(e) => OutcomeResult { success: false, message: e.to_string() },
        }
    }

    pub async fn delete_by_tags(&self, tags: Vec<String>) -> (u64, Vec<String>) {
        self.store.delete_by_tags(tags).await.unwrap_or_default()
    }

    pub async fn delete_by_timeframe(&self, start: f64, end: f64) -> (u64, Vec<String>) {
        self.store.delete_by_timeframe(start, end).await.unwrap_or_default()
    }

    pub async fn delete_before_date(&self, ts: f64) -> (u64, Vec<String>) {
        self.store.delete_before_date(ts).await.unwrap_or_default()
    }

    pub async fn get_by_hash(&self, content_hash: &str) -> Option<Memory> {
        self.store.get_by_hash(content_hash).await.ok().flatten()
    }

    pub async fn stats(&self) -> Option<Stats> {
        self.store.get_stats().await.ok()
    }

    pub async fn sync_status(&self) -> SyncStatus {
        self.store.get_sync_status().await.unwrap_or_default()
    }

    pub async fn health(&self) -> HealthResult {
        match self.store.get_stats().await {
            Ok(stats) => HealthResult {
                success: true,
                backend: stats.backend,
                memory_count: stats.memory_count,
            },
            Err(_) => HealthResult {
                success: false,
                backend: "unknown".to_string(),
                memory_count: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_tags_splits_on_comma_and_trims() {
        let tags = normalize_tags(TagsInput::Single(" a, b ,c".to_string()));
        assert_eq!(tags, vec!["a", "b", "c"]);
    }

    #[test]
    fn normalize_tags_single_string_without_comma() {
        let tags = normalize_tags(TagsInput::Single("  solo  ".to_string()));
        assert_eq!(tags, vec!["solo"]);
    }

    #[test]
    fn normalize_tags_none_is_empty() {
        assert!(normalize_tags(TagsInput::None).is_empty());
    }

    #[test]
    fn normalize_tags_many_dedups_preserving_order() {
        let tags = normalize_tags(TagsInput::Many(vec!["b".into(), "a".into(), "b".into(), " ".into()]));
        assert_eq!(tags, vec!["b", "a"]);
    }
}
