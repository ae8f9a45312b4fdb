//! The storage contract (C4/C5/C6 all implement [`MemoryStore`]).
//!
//! The consolidation pipeline and the service facade depend only on this
//! trait — never on a concrete backend — so swapping `local` for `hybrid` is
//! a one-line change in `config.rs`.

pub mod cloud;
pub mod hybrid;
pub mod local;
pub mod sync;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::Memory;

/// One result from a semantic search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQueryResult {
    pub memory: Memory,
    pub similarity_score: f32,
    pub distance: f32,
}

/// Aggregate stats returned by every backend (§6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub backend: String,
    pub memory_count: u64,
    pub unique_tags: u64,
    pub memories_this_week: u64,
    pub database_size_bytes: u64,
    pub database_size_mb: f64,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub version: String,
}

/// Sync worker status, as returned by the hybrid store's `get_sync_status`.
/// Non-hybrid backends return the all-zero/idle default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_running: bool,
    pub actively_syncing: bool,
    pub pending: u64,
    pub last_sync_at: Option<f64>,
    pub failed: u64,
}

/// The kind of a queued sync operation (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncOpKind {
    Store(Box<Memory>),
    Delete(String),
    UpdateMetadata {
        content_hash: String,
        patch: serde_json::Map<String, serde_json::Value>,
    },
    UpdateContent(Box<Memory>),
    RenameTag { from: String, to: String },
    MergeTags { into: String, from: Vec<String> },
    LinkRelated { hash_a: String, hash_b: String, similarity: f32 },
}

/// A unit of work queued by the hybrid store for the sync worker (§3.2, I5/I6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
    pub op_id: uuid::Uuid,
    pub kind: SyncOpKind,
    pub enqueued_at: f64,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl SyncOperation {
    pub fn new(kind: SyncOpKind) -> Self {
        Self {
            op_id: uuid::Uuid::new_v4(),
            kind,
            enqueued_at: crate::model::now_unix(),
            attempts: 0,
            last_error: None,
        }
    }

    /// The content_hash this operation pertains to, used for ordering/coalescing.
    pub fn content_hash(&self) -> &str {
        match &self.kind {
            SyncOpKind::Store(m) => &m.content_hash,
            SyncOpKind::Delete(h) => h,
            SyncOpKind::UpdateMetadata { content_hash, .. } => content_hash,
            SyncOpKind::UpdateContent(m) => &m.content_hash,
            SyncOpKind::RenameTag { .. } => "",
            SyncOpKind::MergeTags { .. } => "",
            SyncOpKind::LinkRelated { hash_a, .. } => hash_a,
        }
    }

    /// Whether `self` supersedes `other` when both target the same hash (I6).
    /// Delete dominates everything; a later op otherwise wins (last-writer-wins).
    pub fn supersedes(&self, other: &SyncOperation) -> bool {
        matches!(self.kind, SyncOpKind::Delete(_)) || self.enqueued_at >= other.enqueued_at
    }
}

/// The storage contract every backend implements (§6.1).
///
/// `store::local`'s implementations never yield internally — rusqlite is
/// synchronous and fast. `store::cloud` awaits `reqwest` calls throughout.
/// `store::hybrid` awaits its queue and, on overflow, an inline fallback call
/// into the secondary.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert `memory`. Returns `(false, "duplicate")` if `content_hash` already
    /// exists — a validated business outcome, not an error (I1).
    async fn store(&self, memory: Memory) -> Result<(bool, String)>;

    async fn update_memory_metadata(
        &self,
        content_hash: &str,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(bool, String)>;

    /// Convenience wrapper that delegates to `update_memory_metadata`.
    async fn update_memory(&self, memory: Memory) -> Result<(bool, String)> {
        let mut patch = serde_json::Map::new();
        for (k, v) in memory.metadata {
            patch.insert(k, v);
        }
        self.update_memory_metadata(&memory.content_hash, patch).await
    }

    /// Apply all updates in a single primary-side transaction (§4.6.5).
    /// Returns `(ok_count, failed_count)`.
    async fn update_memories_batch(&self, memories: Vec<Memory>) -> Result<(u64, u64)>;

    /// Returns `(false, "not found")` for a non-existent hash (L3), not an error.
    async fn delete(&self, content_hash: &str) -> Result<(bool, String)>;

    async fn delete_by_tags(&self, tags: Vec<String>) -> Result<(u64, Vec<String>)>;

    async fn delete_by_timeframe(&self, start: f64, end: f64) -> Result<(u64, Vec<String>)>;

    async fn delete_before_date(&self, ts: f64) -> Result<(u64, Vec<String>)>;

    async fn get_by_hash(&self, content_hash: &str) -> Result<Option<Memory>>;

    async fn get_all_memories(
        &self,
        limit: u64,
        offset: u64,
        memory_type: Option<&str>,
        tags: Option<&[String]>,
    ) -> Result<Vec<Memory>>;

    async fn get_recent_memories(&self, n: u64) -> Result<Vec<Memory>>;

    async fn get_memory_timestamps(&self) -> Result<Vec<(String, f64)>>;

    async fn get_largest_memories(&self, n: u64) -> Result<Vec<Memory>>;

    async fn count_all_memories(&self, memory_type: Option<&str>, tags: Option<&[String]>) -> Result<u64>;

    async fn retrieve(
        &self,
        query: &str,
        n: u64,
        similarity_threshold: Option<f32>,
        time_start: Option<f64>,
        time_end: Option<f64>,
    ) -> Result<Vec<MemoryQueryResult>>;

    /// Empty query delegates to `get_recent_memories` filtered by time window —
    /// the fix for the empty-semantic-query bug (§4.4).
    async fn recall(
        &self,
        query: Option<&str>,
        n: u64,
        time_start: Option<f64>,
        time_end: Option<f64>,
    ) -> Result<Vec<MemoryQueryResult>> {
        match query {
            Some(q) if !q.trim().is_empty() => self.retrieve(q, n, None, time_start, time_end).await,
            _ => {
                let recent = self.get_recent_memories(n).await?;
                let filtered: Vec<MemoryQueryResult> = recent
                    .into_iter()
                    .filter(|m| {
                        time_start.is_none_or(|s| m.created_at >= s)
                            && time_end.is_none_or(|e| m.created_at <= e)
                    })
                    .map(|memory| MemoryQueryResult {
                        memory,
                        similarity_score: 0.0,
                        distance: 0.0,
                    })
                    .collect();
                Ok(filtered)
            }
        }
    }

    async fn search_by_tag(
        &self,
        tags: &[String],
        match_all: bool,
        time_start: Option<f64>,
    ) -> Result<Vec<Memory>>;

    async fn get_all_tags(&self) -> Result<Vec<String>>;

    async fn get_stats(&self) -> Result<Stats>;

    /// Hybrid-only; no-op default for local/cloud.
    async fn get_sync_status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus::default())
    }

    /// Hybrid-only; no-op default for local/cloud.
    async fn pause_sync(&self) {}

    /// Hybrid-only; no-op default for local/cloud.
    async fn resume_sync(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_supersedes_any_update() {
        let update = SyncOperation::new(SyncOpKind::UpdateMetadata {
            content_hash: "a".into(),
            patch: serde_json::Map::new(),
        });
        let delete = SyncOperation::new(SyncOpKind::Delete("a".into()));
        assert!(delete.supersedes(&update));
    }

    #[test]
    fn later_enqueued_update_supersedes_earlier() {
        let mut earlier = SyncOperation::new(SyncOpKind::UpdateMetadata {
            content_hash: "a".into(),
            patch: serde_json::Map::new(),
        });
        earlier.enqueued_at = 100.0;
        let mut later = SyncOperation::new(SyncOpKind::UpdateMetadata {
            content_hash: "a".into(),
            patch: serde_json::Map::new(),
        });
        later.enqueued_at = 200.0;
        assert!(later.supersedes(&earlier));
        assert!(!earlier.supersedes(&later));
    }
}
