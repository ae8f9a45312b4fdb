//! Isolated [`LocalStore`] instances for tests, backed by a temp file or
//! purely in-memory, with a deterministic stub embedder so tests never pull
//! in the fastembed model.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use memvault_core::embeddings::{matryoshka_truncate, EmbeddingError, EmbeddingProvider};
use memvault_core::{LocalStore, MemoryStore};
use tempfile::TempDir;

/// A cheap, deterministic embedding stand-in: the vector is a function of
/// the input bytes, so identical content always embeds identically and
/// distinct content reliably embeds differently enough for cosine-distance
/// assertions, without touching the network or loading an ONNX model.
pub struct StubEmbedder {
    dims: usize,
}

impl StubEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let bytes: Vec<f32> = text.bytes().map(|b| b as f32).collect();
        let mut values = vec![0.0f32; self.dims];
        for (i, b) in bytes.iter().enumerate() {
            values[i % self.dims] += b / 17.0;
        }
        Ok(matryoshka_truncate(values, self.dims))
    }
}

/// Owns a [`LocalStore`] in an isolated temp directory. Dropping this drops
/// the temp directory too.
pub struct TestDatabaseManager {
    pub store: Arc<LocalStore>,
    _temp_dir: Option<TempDir>,
    db_path: Option<PathBuf>,
}

impl TestDatabaseManager {
    /// A purely in-memory store — fastest option, use when the test doesn't
    /// care about on-disk persistence across restarts.
    pub fn new_in_memory() -> Self {
        let store = LocalStore::in_memory(Arc::new(StubEmbedder::default())).expect("open in-memory store");
        Self {
            store: Arc::new(store),
            _temp_dir: None,
            db_path: None,
        }
    }

    /// A file-backed store in a fresh temp directory, for tests that reopen
    /// the same path (migrations, persistence-across-restart checks).
    pub fn new_temp() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let db_path = temp_dir.path().join("test_memvault.db");
        let store = LocalStore::open(Some(db_path.clone()), Arc::new(StubEmbedder::default())).expect("open file-backed store");
        Self {
            store: Arc::new(store),
            _temp_dir: Some(temp_dir),
            db_path: Some(db_path),
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Reopen the same file path with a fresh `LocalStore`, simulating a
    /// process restart. Only valid for `new_temp()`-created managers.
    pub fn reopen(&mut self) {
        let path = self.db_path.clone().expect("reopen requires a file-backed store");
        self.store = Arc::new(LocalStore::open(Some(path), Arc::new(StubEmbedder::default())).expect("reopen store"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memvault_core::model::{Memory, MemoryType};

    #[tokio::test]
    async fn in_memory_store_starts_empty() {
        let db = TestDatabaseManager::new_in_memory();
        assert_eq!(db.store.count_all_memories(None, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn temp_store_persists_across_reopen() {
        let mut db = TestDatabaseManager::new_temp();
        let memory = Memory::new("persisted".into(), vec![], MemoryType::Note, Default::default()).unwrap();
        db.store.store(memory).await.unwrap();

        db.reopen();
        assert_eq!(db.store.count_all_memories(None, None).await.unwrap(), 1);
    }
}
