//! Hybrid store (C6) — local SQLite as the synchronous primary, cloud as an
//! asynchronously-synced secondary.
//!
//! All reads and the synchronous half of every write go to [`LocalStore`].
//! Writes additionally enqueue a [`SyncOperation`] for the background
//! [`SyncWorker`] (C7) to ship to [`CloudStore`], unless sync is paused (the
//! consolidation pipeline pauses it for the duration of a run) or the queue
//! is full, in which case the write falls through to a bounded inline
//! synchronous call into the cloud store so nothing is silently dropped
//! (I5).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::error::Result;
use crate::model::Memory;

use super::cloud::CloudStore;
use super::local::LocalStore;
use super::sync::{SyncQueue, SyncWorker};
use super::{MemoryQueryResult, MemoryStore, Stats, SyncOpKind, SyncOperation, SyncStatus};

const QUEUE_FULL_WAIT: Duration = Duration::from_secs(5);
const MAX_EMPTY_BATCHES: u32 = 20;
const MIN_CHECK_COUNT: u64 = 1000;
const DRIFT_BATCH_SIZE: u64 = 200;

pub struct HybridConfig {
    pub queue_capacity: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self { queue_capacity: 1000 }
    }
}

/// Composes a local primary and cloud secondary behind one [`MemoryStore`].
pub struct HybridStore {
    local: Arc<LocalStore>,
    cloud: Arc<CloudStore>,
    queue: Arc<SyncQueue>,
    worker: Arc<SyncWorker>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl HybridStore {
    pub fn new(local: Arc<LocalStore>, cloud: Arc<CloudStore>, config: HybridConfig) -> Self {
        let queue = Arc::new(SyncQueue::new(config.queue_capacity));
        let worker = Arc::new(SyncWorker::new(queue.clone(), cloud.clone(), local.clone()));
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let spawned = worker.clone();
        tokio::spawn(async move {
            spawned.run(shutdown_rx).await;
        });

        Self {
            local,
            cloud,
            queue,
            worker,
            shutdown_tx,
        }
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Enqueue `kind` for async delivery to the cloud, falling back to an
    /// inline synchronous call if the queue stays full past `QUEUE_FULL_WAIT`
    /// (I5: a write must never be silently lost). While paused, the op is
    /// dropped from the sync path entirely rather than applied inline — the
    /// whole point of pausing is to let consolidation's bulk writes land on
    /// the primary without driving cloud round-trips; any drift this leaves
    /// behind is caught by the next `reconcile_drift` pass (§4.6.4).
    async fn dispatch(&self, kind: SyncOpKind) -> Result<()> {
        if self.queue.paused.load(std::sync::atomic::Ordering::Relaxed) {
            return Ok(());
        }

        let op = SyncOperation::new(kind);
        let deadline = tokio::time::Instant::now() + QUEUE_FULL_WAIT;
        loop {
            if self.queue.enqueue(op.clone()).await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(op_id = %op.op_id, "sync queue full past deadline, applying inline");
                return self.apply_inline(op.kind).await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn apply_inline(&self, kind: SyncOpKind) -> Result<()> {
        match kind {
            SyncOpKind::Store(memory) => {
                self.cloud.store(*memory).await?;
            }
            SyncOpKind::Delete(hash) => {
                self.cloud.delete(&hash).await?;
            }
            SyncOpKind::UpdateMetadata { content_hash, patch } => {
                self.cloud.update_memory_metadata(&content_hash, patch).await?;
            }
            SyncOpKind::UpdateContent(memory) => {
                self.cloud.update_memory(*memory).await?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Bidirectional drift scan: compares local and cloud hash sets in pages
    /// and reconciles missing records either way. Bounded by
    /// `max_empty_batches` consecutive no-drift pages once at least
    /// `min_check_count` records have been examined, so a large, healthy
    /// store doesn't pay for a full scan every time (§4.6.6).
    pub async fn reconcile_drift(&self) -> Result<(u64, u64)> {
        let local_timestamps = self.local.get_memory_timestamps().await?;
        let mut pushed_to_cloud = 0u64;
        let mut pulled_to_local = 0u64;
        let mut checked = 0u64;
        let mut empty_batches = 0u32;

        for chunk in local_timestamps.chunks(DRIFT_BATCH_SIZE as usize) {
            let mut drift_in_batch = false;
            for (hash, _) in chunk {
                checked += 1;
                if self.cloud.get_by_hash(hash).await?.is_none() {
                    if let Some(memory) = self.local.get_by_hash(hash).await? {
                        if let Err(e) = self.cloud.store(memory).await {
                            tracing::warn!(hash = %hash, error = %e, "drift reconciliation push failed");
                        } else {
                            pushed_to_cloud += 1;
                            drift_in_batch = true;
                        }
                    }
                }
            }

            if drift_in_batch {
                empty_batches = 0;
            } else {
                empty_batches += 1;
            }
            if checked >= MIN_CHECK_COUNT && empty_batches >= MAX_EMPTY_BATCHES {
                break;
            }
        }

        let cloud_memories = self.cloud.get_all_memories_bulk(DRIFT_BATCH_SIZE).await?;
        for memory in cloud_memories {
            if self.local.get_by_hash(&memory.content_hash).await?.is_none() {
                match self.local.store(memory).await {
                    Ok(_) => pulled_to_local += 1,
                    Err(e) => tracing::warn!(error = %e, "drift reconciliation pull failed"),
                }
            }
        }

        tracing::info!(pushed_to_cloud, pulled_to_local, checked, "drift reconciliation complete");
        Ok((pushed_to_cloud, pulled_to_local))
    }
}

#[async_trait]
impl MemoryStore for HybridStore {
    async fn store(&self, memory: Memory) -> Result<(bool, String)> {
        let result = self.local.store(memory.clone()).await?;
        if result.0 {
            self.dispatch(SyncOpKind::Store(Box::new(memory))).await?;
        }
        Ok(result)
    }

    async fn update_memory_metadata(&self, content_hash: &str, patch: serde_json::Map<String, Json>) -> Result<(bool, String)> {
        let result = self.local.update_memory_metadata(content_hash, patch.clone()).await?;
        if result.0 {
            self.dispatch(SyncOpKind::UpdateMetadata {
                content_hash: content_hash.to_string(),
                patch,
            })
            .await?;
        }
        Ok(result)
    }

    async fn update_memories_batch(&self, memories: Vec<Memory>) -> Result<(u64, u64)> {
        let result = self.local.update_memories_batch(memories.clone()).await?;
        for memory in memories {
            self.dispatch(SyncOpKind::UpdateContent(Box::new(memory))).await?;
        }
        Ok(result)
    }

    async fn delete(&self, content_hash: &str) -> Result<(bool, String)> {
        let result = self.local.delete(content_hash).await?;
        if result.0 {
            self.dispatch(SyncOpKind::Delete(content_hash.to_string())).await?;
        }
        Ok(result)
    }

    async fn delete_by_tags(&self, tags: Vec<String>) -> Result<(u64, Vec<String>)> {
        let hashes = self.local.search_by_tag(&tags, false, None).await?;
        let (deleted, errors) = self.local.delete_by_tags(tags).await?;
        for memory in hashes {
            self.dispatch(SyncOpKind::Delete(memory.content_hash)).await?;
        }
        Ok((deleted, errors))
    }

    async fn delete_by_timeframe(&self, start: f64, end: f64) -> Result<(u64, Vec<String>)> {
        let hashes = self.local.get_memory_timestamps().await?;
        let matching: Vec<String> = hashes
            .into_iter()
            .filter(|(_, ts)| *ts >= start && *ts <= end)
            .map(|(h, _)| h)
            .collect();
        let result = self.local.delete_by_timeframe(start, end).await?;
        for hash in matching {
            self.dispatch(SyncOpKind::Delete(hash)).await?;
        }
        Ok(result)
    }

    async fn delete_before_date(&self, ts: f64) -> Result<(u64, Vec<String>)> {
        self.delete_by_timeframe(0.0, ts).await
    }

    async fn get_by_hash(&self, content_hash: &str) -> Result<Option<Memory>> {
        self.local.get_by_hash(content_hash).await
    }

    async fn get_all_memories(&self, limit: u64, offset: u64, memory_type: Option<&str>, tags: Option<&[String]>) -> Result<Vec<Memory>> {
        self.local.get_all_memories(limit, offset, memory_type, tags).await
    }

    async fn get_recent_memories(&self, n: u64) -> Result<Vec<Memory>> {
        self.local.get_recent_memories(n).await
    }

    async fn get_memory_timestamps(&self) -> Result<Vec<(String, f64)>> {
        self.local.get_memory_timestamps().await
    }

    async fn get_largest_memories(&self, n: u64) -> Result<Vec<Memory>> {
        self.local.get_largest_memories(n).await
    }

    async fn count_all_memories(&self, memory_type: Option<&str>, tags: Option<&[String]>) -> Result<u64> {
        self.local.count_all_memories(memory_type, tags).await
    }

    async fn retrieve(
        &self,
        query: &str,
        n: u64,
        similarity_threshold: Option<f32>,
        time_start: Option<f64>,
        time_end: Option<f64>,
    ) -> Result<Vec<MemoryQueryResult>> {
        self.local.retrieve(query, n, similarity_threshold, time_start, time_end).await
    }

    async fn search_by_tag(&self, tags: &[String], match_all: bool, time_start: Option<f64>) -> Result<Vec<Memory>> {
        self.local.search_by_tag(tags, match_all, time_start).await
    }

    async fn get_all_tags(&self) -> Result<Vec<String>> {
        self.local.get_all_tags().await
    }

    async fn get_stats(&self) -> Result<Stats> {
        let mut stats = self.local.get_stats().await?;
        stats.backend = "hybrid".to_string();
        Ok(stats)
    }

    async fn get_sync_status(&self) -> Result<SyncStatus> {
        Ok(self.queue.status(self.worker.is_running()))
    }

    async fn pause_sync(&self) {
        self.queue.paused.store(true, std::sync::atomic::Ordering::Relaxed);
        tracing::info!("hybrid sync paused");
    }

    async fn resume_sync(&self) {
        self.queue.paused.store(false, std::sync::atomic::Ordering::Relaxed);
        tracing::info!("hybrid sync resumed");
    }
}
