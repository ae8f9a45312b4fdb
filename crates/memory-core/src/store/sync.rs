//! The hybrid store's background sync worker (C7).
//!
//! Drains a bounded queue of [`SyncOperation`]s into the secondary (cloud)
//! store. Applies coalescing per [`SyncOperation::supersedes`] so that a
//! burst of updates to the same `content_hash` only ships the final state,
//! retries transient failures up to `max_attempts`, and records permanent
//! failures to the local `sync_failures` table rather than dropping them
//! silently.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::error::is_retryable;
use crate::model::now_unix;

use super::cloud::CloudStore;
use super::local::LocalStore;
use super::{MemoryStore, SyncOpKind, SyncOperation, SyncStatus};

const MAX_ATTEMPTS: u32 = 5;
const BACKPRESSURE_WARN_RATIO: f64 = 0.80;

/// Shared state the worker and the hybrid store both touch.
pub struct SyncQueue {
    queue: Mutex<VecDeque<SyncOperation>>,
    capacity: usize,
    notify: Notify,
    pub(super) paused: AtomicBool,
    pending: AtomicU64,
    failed: AtomicU64,
    actively_syncing: AtomicBool,
    last_sync_at: std::sync::Mutex<Option<f64>>,
}

impl SyncQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity,
            notify: Notify::new(),
            paused: AtomicBool::new(false),
            pending: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            actively_syncing: AtomicBool::new(false),
            last_sync_at: std::sync::Mutex::new(None),
        }
    }

    /// Enqueue `op`, coalescing against any pending op for the same hash.
    /// Returns `true` if the op was queued, `false` if the queue was full and
    /// the caller must fall back to a synchronous write.
    pub async fn enqueue(&self, op: SyncOperation) -> bool {
        let mut queue = self.queue.lock().await;

        if let Some(existing) = queue.iter_mut().find(|q| q.content_hash() == op.content_hash() && !op.content_hash().is_empty()) {
            if op.supersedes(existing) {
                *existing = op;
            }
            self.notify.notify_one();
            return true;
        }

        if queue.len() >= self.capacity {
            return false;
        }

        queue.push_back(op);
        self.pending.store(queue.len() as u64, Ordering::Relaxed);
        if queue.len() as f64 / self.capacity as f64 >= BACKPRESSURE_WARN_RATIO {
            tracing::warn!(depth = queue.len(), capacity = self.capacity, "sync queue approaching capacity");
        }
        self.notify.notify_one();
        true
    }

    pub fn status(&self, is_running: bool) -> SyncStatus {
        SyncStatus {
            is_running,
            actively_syncing: self.actively_syncing.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            last_sync_at: *self.last_sync_at.lock().expect("sync queue last_sync_at lock poisoned"),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Background worker owning the queue's consumption loop.
pub struct SyncWorker {
    queue: Arc<SyncQueue>,
    cloud: Arc<CloudStore>,
    local: Arc<LocalStore>,
    running: Arc<AtomicBool>,
}

impl SyncWorker {
    pub fn new(queue: Arc<SyncQueue>, cloud: Arc<CloudStore>, local: Arc<LocalStore>) -> Self {
        Self {
            queue,
            cloud,
            local,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Runs until `shutdown` is signalled; meant to be spawned on a
    /// `tokio::task`. Drains remaining items up to `drain_deadline` on exit.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.queue.paused.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(200)).await;
                continue;
            }

            let next = {
                let mut queue = self.queue.queue.lock().await;
                queue.pop_front()
            };

            let Some(op) = next else {
                tokio::select! {
                    _ = self.queue.notify.notified() => {},
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {},
                    _ = shutdown.changed() => {},
                }
                continue;
            };

            self.queue.pending.store(
                self.queue.queue.lock().await.len() as u64,
                Ordering::Relaxed,
            );
            self.apply(op).await;
        }

        self.drain_remaining(Duration::from_secs(10)).await;
        self.running.store(false, Ordering::Relaxed);
    }

    async fn drain_remaining(&self, deadline: Duration) {
        let start = tokio::time::Instant::now();
        loop {
            let next = {
                let mut queue = self.queue.queue.lock().await;
                queue.pop_front()
            };
            let Some(op) = next else { break };
            if start.elapsed() > deadline {
                tracing::warn!(op_id = %op.op_id, "sync queue drain deadline exceeded, recording as failed");
                self.record_failure(&op, "shutdown drain deadline exceeded").await;
                continue;
            }
            self.apply(op).await;
        }
    }

    async fn apply(&self, mut op: SyncOperation) {
        self.queue.actively_syncing.store(true, Ordering::Relaxed);
        let result = self.apply_once(&op.kind).await;
        self.queue.actively_syncing.store(false, Ordering::Relaxed);

        match result {
            Ok(()) => {
                *self.queue.last_sync_at.lock().expect("sync queue last_sync_at lock poisoned") = Some(now_unix());
            }
            Err(e) if is_retryable(&e) && op.attempts < MAX_ATTEMPTS => {
                op.attempts += 1;
                op.last_error = Some(e.to_string());
                tracing::warn!(op_id = %op.op_id, attempts = op.attempts, error = %e, "sync op failed, requeueing");
                let mut queue = self.queue.queue.lock().await;
                queue.push_back(op);
                self.queue.pending.store(queue.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                op.last_error = Some(e.to_string());
                tracing::error!(op_id = %op.op_id, error = %e, "sync op permanently failed");
                self.record_failure(&op, &e.to_string()).await;
            }
        }
    }

    async fn record_failure(&self, op: &SyncOperation, reason: &str) {
        self.queue.failed.fetch_add(1, Ordering::Relaxed);
        let kind = match &op.kind {
            SyncOpKind::Store(_) => "store",
            SyncOpKind::Delete(_) => "delete",
            SyncOpKind::UpdateMetadata { .. } => "update_metadata",
            SyncOpKind::UpdateContent(_) => "update_content",
            SyncOpKind::RenameTag { .. } => "rename_tag",
            SyncOpKind::MergeTags { .. } => "merge_tags",
            SyncOpKind::LinkRelated { .. } => "link_related",
        };
        if let Err(e) = self
            .local
            .record_sync_failure(&op.op_id.to_string(), op.content_hash(), kind, reason)
        {
            tracing::error!(error = %e, "failed to record sync failure locally");
        }
    }

    async fn apply_once(&self, kind: &SyncOpKind) -> crate::error::Result<()> {
        match kind {
            SyncOpKind::Store(memory) => {
                self.cloud.store((**memory).clone()).await?;
            }
            SyncOpKind::Delete(hash) => {
                self.cloud.delete(hash).await?;
            }
            SyncOpKind::UpdateMetadata { content_hash, patch } => {
                self.cloud.update_memory_metadata(content_hash, patch.clone()).await?;
            }
            SyncOpKind::UpdateContent(memory) => {
                self.cloud.update_memory((**memory).clone()).await?;
            }
            SyncOpKind::RenameTag { from, to } => {
                // Cloud has no rename-tag endpoint; emulate via per-memory metadata merge.
                let memories = self.cloud.search_by_tag(std::slice::from_ref(from), false, None).await?;
                for mut memory in memories {
                    memory.tags.retain(|t| t != from);
                    if !memory.tags.contains(to) {
                        memory.tags.push(to.clone());
                    }
                    self.cloud.update_memory(memory).await?;
                }
            }
            SyncOpKind::MergeTags { into, from } => {
                for tag in from {
                    let memories = self.cloud.search_by_tag(std::slice::from_ref(tag), false, None).await?;
                    for mut memory in memories {
                        memory.tags.retain(|t| t != tag);
                        if !memory.tags.contains(into) {
                            memory.tags.push(into.clone());
                        }
                        self.cloud.update_memory(memory).await?;
                    }
                }
            }
            SyncOpKind::LinkRelated { hash_a, hash_b, similarity } => {
                let mut patch = serde_json::Map::new();
                patch.insert(
                    crate::model::reserved_keys::RELATED_MEMORIES.to_string(),
                    serde_json::json!([hash_b]),
                );
                patch.insert(
                    crate::model::reserved_keys::RELATED_SIMILARITIES.to_string(),
                    serde_json::json!([similarity]),
                );
                self.cloud.update_memory_metadata(hash_a, patch).await?;
            }
        }
        Ok(())
    }
}
