//! Cloud HTTP contract (§4.5, §8 B4) and hybrid local/cloud sync (§4.6, §8
//! P4/P5/S6), exercised against a mocked cloud endpoint with `wiremock` so no
//! real network call is ever made.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use memvault_core::embeddings::{EmbeddingError, EmbeddingProvider};
use memvault_core::model::{Memory, MemoryType};
use memvault_core::store::cloud::{CloudConfig, CloudStore};
use memvault_core::store::hybrid::{HybridConfig, HybridStore};
use memvault_core::MemoryStore;
use memvault_e2e_tests::harness::db_manager::TestDatabaseManager;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FixedEmbedder(Vec<f32>);

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    fn dimensions(&self) -> usize {
        self.0.len()
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.0.clone())
    }
}

fn cloud_config(base_url: String) -> CloudConfig {
    CloudConfig {
        base_url,
        api_key: "test-key".to_string(),
        vector_index_limit: 0,
        request_timeout: Duration::from_secs(5),
    }
}

/// B4: content over the cloud model's 800-char budget is rejected before any
/// HTTP call is made, so no mock needs to be armed for the rejecting request.
#[tokio::test]
async fn cloud_store_rejects_oversized_content_without_a_network_call() {
    let server = MockServer::start().await;
    let embedder = Arc::new(FixedEmbedder(vec![0.1; 384]));
    let store = CloudStore::new(cloud_config(server.uri()), embedder).unwrap();

    let memory = Memory::new("a".repeat(801), vec![], MemoryType::Note, Default::default()).unwrap();
    let err = store.store(memory).await.unwrap_err();
    assert!(matches!(err, memvault_core::MemoryError::Limit(_)));
}

/// P4: a successful store round-trips through the mocked vector/record
/// endpoints and get_by_hash reflects it back.
#[tokio::test]
async fn cloud_store_store_and_get_round_trip_through_mocked_endpoints() {
    let server = MockServer::start().await;

    let memory = Memory::new("store me in the cloud".into(), vec!["cloud".into()], MemoryType::Note, Default::default()).unwrap();
    let hash = memory.content_hash.clone();

    // The duplicate check (fetch_record) runs before the write; answer 404
    // exactly once with high priority, then fall through to the lower
    // priority mock that serves the now-stored record for every call after.
    Mock::given(method("GET"))
        .and(path(format!("/memories/{hash}")))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    let stored = serde_json::json!({
        "content_hash": hash,
        "content": "store me in the cloud",
        "memory_type": "note",
        "created_at": memory.created_at,
        "updated_at": memory.updated_at,
        "metadata": {},
        "quality_score": null,
        "tags": ["cloud"],
    });

    Mock::given(method("GET"))
        .and(path(format!("/memories/{hash}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(stored))
        .with_priority(2)
        .mount(&server)
        .await;

    Mock::given(method("POST")).and(path("/memories")).respond_with(ResponseTemplate::new(200)).mount(&server).await;
    Mock::given(method("POST"))
        .and(path("/vectors/upsert"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let embedder = Arc::new(FixedEmbedder(vec![0.1; 384]));
    let store = CloudStore::new(cloud_config(server.uri()), embedder).unwrap();

    let (ok, returned_hash) = store.store(memory).await.unwrap();
    assert!(ok);
    assert_eq!(returned_hash, hash);

    let fetched = store.get_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(fetched.content, "store me in the cloud");
}

/// P5: a local write under the hybrid store is durable immediately, whether
/// or not the background sync to the cloud secondary has run yet.
#[tokio::test]
async fn hybrid_store_serves_reads_from_local_immediately_after_write() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path_regex(r"^/memories/.*$")).respond_with(ResponseTemplate::new(404)).mount(&server).await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let db = TestDatabaseManager::new_in_memory();
    let cloud = Arc::new(CloudStore::new(cloud_config(server.uri()), Arc::new(FixedEmbedder(vec![0.1; 384]))).unwrap());
    let hybrid = HybridStore::new(db.store.clone(), cloud, HybridConfig { queue_capacity: 10 });

    let memory = Memory::new("hybrid durability check".into(), vec![], MemoryType::Note, Default::default()).unwrap();
    let hash = memory.content_hash.clone();
    let (ok, _) = hybrid.store(memory).await.unwrap();
    assert!(ok);

    let fetched = hybrid.get_by_hash(&hash).await.unwrap();
    assert!(fetched.is_some());
}

/// B3: when the sync queue is saturated the hybrid store must not drop the
/// write — it falls through to an inline synchronous cloud call (I5).
#[tokio::test]
async fn hybrid_store_falls_back_to_inline_sync_when_queue_is_full() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).and(path_regex(r"^/memories/.*$")).respond_with(ResponseTemplate::new(404)).mount(&server).await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

    let db = TestDatabaseManager::new_in_memory();
    let cloud = Arc::new(CloudStore::new(cloud_config(server.uri()), Arc::new(FixedEmbedder(vec![0.1; 384]))).unwrap());
    // Capacity 0 means every enqueue attempt immediately reports full, forcing
    // the inline fallback path on the very first write.
    let hybrid = HybridStore::new(db.store.clone(), cloud, HybridConfig { queue_capacity: 0 });

    let memory = Memory::new("forced inline sync".into(), vec![], MemoryType::Note, Default::default()).unwrap();
    let (ok, _) = tokio::time::timeout(Duration::from_secs(10), hybrid.store(memory)).await.expect("store should not hang").unwrap();
    assert!(ok);
}

/// §4.6.4: while paused, writes must land on the primary only — no sync op
/// is enqueued *and* none is applied inline. Applying inline during a pause
/// would reproduce the exact cloud-round-trip storm pausing exists to avoid
/// during consolidation's bulk `update_memories_batch` calls.
#[tokio::test]
async fn hybrid_store_drops_sync_entirely_while_paused() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/memories/.*$"))
        .respond_with(ResponseTemplate::new(404))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let db = TestDatabaseManager::new_in_memory();
    let cloud = Arc::new(CloudStore::new(cloud_config(server.uri()), Arc::new(FixedEmbedder(vec![0.1; 384]))).unwrap());
    let hybrid = HybridStore::new(db.store.clone(), cloud, HybridConfig { queue_capacity: 10 });

    hybrid.pause_sync().await;

    let memory = Memory::new("paused write stays local only".into(), vec![], MemoryType::Note, Default::default()).unwrap();
    let hash = memory.content_hash.clone();
    let (ok, _) = tokio::time::timeout(Duration::from_secs(10), hybrid.store(memory)).await.expect("store should not hang").unwrap();
    assert!(ok);

    let fetched = hybrid.get_by_hash(&hash).await.unwrap();
    assert!(fetched.is_some(), "paused write must still be durable on the primary");

    hybrid.resume_sync().await;
    server.verify().await;
}
