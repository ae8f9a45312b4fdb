//! memvault-core: semantic memory storage and consolidation engine.
//!
//! Exposes a single [`MemoryStore`] trait with three interchangeable
//! backends (local SQLite + vector index, cloud HTTP, and a hybrid of the
//! two), a [`MemoryFacade`] that both transport adapters hold, and a
//! background [`consolidation`] pipeline that runs against whichever
//! backend is active.
//!
//! Everything downstream of [`MemoryConfig::from_env`] is built once at
//! startup by [`build_store`]; no component reads the environment itself.

pub mod config;
pub mod consolidation;
pub mod embeddings;
pub mod error;
pub mod facade;
pub mod model;
pub mod quality;
pub mod store;
pub mod time;

use std::sync::Arc;
use std::time::Duration;

pub use config::{MemoryConfig, StorageBackend};
pub use error::{MemoryError, Result};
pub use facade::MemoryFacade;
pub use model::{ChunkPolicy, Memory, MemoryType};
pub use quality::{HybridScorer, QualityScorer};
pub use store::cloud::{CloudConfig, CloudStore};
pub use store::hybrid::{HybridConfig, HybridStore};
pub use store::local::LocalStore;
pub use store::MemoryStore;

const DEFAULT_CLOUD_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the embedding provider appropriate for `backend`: local (384d,
/// in-process ONNX) for anything that touches the local store, remote
/// (768d, cloud-hosted) for a cloud-only deployment.
#[cfg(feature = "embeddings")]
fn build_embedder(backend: StorageBackend, config: &MemoryConfig) -> Arc<dyn embeddings::EmbeddingProvider> {
    match backend {
        StorageBackend::Cloud => {
            let client = reqwest::Client::builder()
                .timeout(DEFAULT_CLOUD_REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default();
            let endpoint = config.cloud_base_url.clone().unwrap_or_default();
            Arc::new(embeddings::RemoteEmbeddingProvider::new(client, endpoint, config.cloud_api_key.clone()))
        }
        StorageBackend::SqliteVec | StorageBackend::Hybrid => Arc::new(embeddings::LocalEmbeddingProvider::new()),
    }
}

#[cfg(not(feature = "embeddings"))]
fn build_embedder(_backend: StorageBackend, _config: &MemoryConfig) -> Arc<dyn embeddings::EmbeddingProvider> {
    panic!("memvault-core built without the `embeddings` feature; no EmbeddingProvider is available")
}

fn cloud_config(config: &MemoryConfig) -> CloudConfig {
    CloudConfig {
        base_url: config.cloud_base_url.clone().unwrap_or_default(),
        api_key: config.cloud_api_key.clone().unwrap_or_default(),
        vector_index_limit: config.cloud_vector_index_limit,
        request_timeout: DEFAULT_CLOUD_REQUEST_TIMEOUT,
    }
}

/// Construct the active [`MemoryStore`] backend from `config` (§6).
///
/// The embedding provider is chosen once here, per backend, and shared by
/// every store that needs one: the hybrid backend's local and cloud halves
/// intentionally use different providers (local/384d, remote/768d) since
/// they never compare each other's vectors directly.
pub fn build_store(config: &MemoryConfig) -> Result<Arc<dyn MemoryStore>> {
    match config.storage_backend {
        StorageBackend::SqliteVec => {
            let embedder = build_embedder(StorageBackend::SqliteVec, config);
            let store = LocalStore::open(config.sqlite_path.clone(), embedder)?;
            Ok(Arc::new(store))
        }
        StorageBackend::Cloud => {
            let embedder = build_embedder(StorageBackend::Cloud, config);
            let store = CloudStore::new(cloud_config(config), embedder)?;
            Ok(Arc::new(store))
        }
        StorageBackend::Hybrid => {
            let local_embedder = build_embedder(StorageBackend::SqliteVec, config);
            let local = Arc::new(LocalStore::open(config.sqlite_path.clone(), local_embedder)?);

            let cloud_embedder = build_embedder(StorageBackend::Cloud, config);
            let cloud = Arc::new(CloudStore::new(cloud_config(config), cloud_embedder)?);

            let hybrid_config = HybridConfig {
                queue_capacity: config.hybrid_max_queue_size,
            };
            Ok(Arc::new(HybridStore::new(local, cloud, hybrid_config)))
        }
    }
}

/// Build the default [`QualityScorer`] used by [`MemoryFacade`]. The hybrid
/// heuristic/technical-content scorer is always available and needs no
/// network or model dependency.
pub fn build_scorer() -> Arc<dyn QualityScorer> {
    Arc::new(HybridScorer::new())
}

/// Build the chunk policy matching `backend`'s content-length limits (§4.3).
pub fn chunk_policy_for(backend: StorageBackend) -> ChunkPolicy {
    match backend {
        StorageBackend::SqliteVec => ChunkPolicy::local(),
        StorageBackend::Cloud | StorageBackend::Hybrid => ChunkPolicy::cloud(),
    }
}

/// Build a ready-to-use [`MemoryFacade`] from `config`: the canonical
/// one-call startup path used by every transport adapter.
pub fn build_facade(config: &MemoryConfig) -> Result<MemoryFacade> {
    let store = build_store(config)?;
    let scorer = build_scorer();
    let chunk_policy = chunk_policy_for(config.storage_backend).with_overlap(config.content_split_overlap);
    Ok(MemoryFacade::new(store, scorer, chunk_policy, config.include_hostname))
}
