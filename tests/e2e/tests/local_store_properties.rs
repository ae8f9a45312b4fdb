//! Exercises §8's quantified invariants and boundary behaviors against the
//! local backend directly (no facade layer in between).

use std::collections::BTreeMap;

use memvault_core::model::{Memory, MemoryType};
use memvault_core::MemoryStore;
use memvault_e2e_tests::harness::db_manager::TestDatabaseManager;
use memvault_e2e_tests::mocks::fixtures;

#[tokio::test]
async fn content_hash_is_64_lowercase_hex() {
    // P1
    let memory = Memory::new("hash me".into(), vec![], MemoryType::Note, BTreeMap::new()).unwrap();
    assert_eq!(memory.content_hash.len(), 64);
    assert!(memory.content_hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
}

#[tokio::test]
async fn store_then_get_by_hash_round_trips_content() {
    // P2
    let db = TestDatabaseManager::new_in_memory();
    let memory = Memory::new("round trip me".into(), vec!["tag".into()], MemoryType::Note, BTreeMap::new()).unwrap();
    let hash = memory.content_hash.clone();

    let (ok, _) = db.store.store(memory).await.unwrap();
    assert!(ok);

    let fetched = db.store.get_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(fetched.content, "round trip me");
}

#[tokio::test]
async fn second_store_of_identical_content_is_rejected_as_duplicate() {
    // P3, S2
    let db = TestDatabaseManager::new_in_memory();
    let first = Memory::new("hello world".into(), vec!["greeting".into()], MemoryType::Note, BTreeMap::new()).unwrap();
    let second = Memory::new("hello world".into(), vec!["greeting".into(), "dup".into()], MemoryType::Note, BTreeMap::new()).unwrap();
    let hash = first.content_hash.clone();

    let (ok, _) = db.store.store(first).await.unwrap();
    assert!(ok);

    let (ok, reason) = db.store.store(second).await.unwrap();
    assert!(!ok);
    assert_eq!(reason, "duplicate");

    let stored = db.store.get_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(stored.tags, vec!["greeting".to_string()]);
}

#[tokio::test]
async fn retrieve_respects_n_and_returns_scores_in_descending_order() {
    // P6
    let db = TestDatabaseManager::new_in_memory();
    for memory in fixtures::batch(20, "retrievable content about rust programming") {
        db.store.store(memory).await.unwrap();
    }

    let results = db.store.retrieve("rust programming", 5, None, None, None).await.unwrap();
    assert!(results.len() <= 5);
    for r in &results {
        assert!((0.0..=1.0).contains(&r.similarity_score), "score {} out of range", r.similarity_score);
    }
    let scores: Vec<f32> = results.iter().map(|r| r.similarity_score).collect();
    let mut sorted = scores.clone();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
    assert_eq!(scores, sorted);
}

#[tokio::test]
async fn tag_normalization_is_idempotent() {
    // P8, L2
    use memvault_core::facade::{normalize_tags, TagsInput};

    let once = normalize_tags(TagsInput::Single("a, b, a".to_string()));
    assert_eq!(once, vec!["a".to_string(), "b".to_string()]);

    let twice = normalize_tags(TagsInput::Many(once.clone()));
    assert_eq!(once, twice);
}

#[tokio::test]
async fn time_range_query_only_returns_memories_inside_the_window() {
    // P9
    let db = TestDatabaseManager::new_in_memory();
    for memory in fixtures::batch_with_ages(10, "aged memory", 0, 30) {
        db.store.store(memory).await.unwrap();
    }

    let all = db.store.get_all_memories(100, 0, None, None).await.unwrap();
    let (a, b) = {
        let mut ages: Vec<f64> = all.iter().map(|m| m.created_at).collect();
        ages.sort_by(|x, y| x.partial_cmp(y).unwrap());
        (ages[2], ages[7])
    };

    let window = db.store.get_memory_timestamps().await.unwrap();
    let expected: usize = window.iter().filter(|(_, ts)| *ts >= a && *ts <= b).count();

    let in_range: Vec<_> = all.iter().filter(|m| m.created_at >= a && m.created_at <= b).collect();
    assert_eq!(in_range.len(), expected);
    for m in in_range {
        assert!(m.created_at >= a && m.created_at <= b);
    }
}

#[tokio::test]
async fn delete_of_nonexistent_hash_is_a_result_not_an_error() {
    // L3
    let db = TestDatabaseManager::new_in_memory();
    let (ok, reason) = db.store.delete("does-not-exist").await.unwrap();
    assert!(!ok);
    assert_eq!(reason, "not found");
}

#[tokio::test]
async fn retrieve_never_surfaces_archived_memories_by_default() {
    let db = TestDatabaseManager::new_in_memory();
    let mut archived = Memory::new("an archived memory about whales".into(), vec![], MemoryType::Archived, BTreeMap::new()).unwrap();
    archived.embedding = Some(vec![1.0, 0.0, 0.0, 0.0]);
    db.store.store(archived).await.unwrap();

    let results = db.store.retrieve("whales", 10, Some(-1.0), None, None).await.unwrap();
    assert!(results.is_empty());
}
