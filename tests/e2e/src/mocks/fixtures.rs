//! Builders for `Memory` batches and timed scenarios used across the
//! integration tests.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use memvault_core::model::{Memory, MemoryType};

/// A batch of distinct, storable memories sharing a content prefix.
pub fn batch(count: usize, prefix: &str) -> Vec<Memory> {
    (0..count)
        .map(|i| Memory::new(format!("{prefix} {i}"), vec![], MemoryType::Note, BTreeMap::new()).expect("valid memory"))
        .collect()
}

/// A batch tagged with one of `tags`, round-robin.
pub fn batch_with_tags(count: usize, prefix: &str, tags: &[&str]) -> Vec<Memory> {
    (0..count)
        .map(|i| {
            let tag = vec![tags[i % tags.len()].to_string()];
            Memory::new(format!("{prefix} {i}"), tag, MemoryType::Note, BTreeMap::new()).expect("valid memory")
        })
        .collect()
}

/// Memories stamped across a time range, oldest first: `count` memories
/// evenly spaced between `days_ago_start` and `days_ago_end` (inclusive).
pub fn batch_with_ages(count: usize, prefix: &str, days_ago_start: i64, days_ago_end: i64) -> Vec<Memory> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let frac = if count <= 1 { 0.0 } else { i as f64 / (count - 1) as f64 };
            let days_ago = days_ago_start as f64 + frac * (days_ago_end - days_ago_start) as f64;
            let mut memory = Memory::new(format!("{prefix} {i}"), vec![], MemoryType::Note, BTreeMap::new()).expect("valid memory");
            let stamp = (now - Duration::milliseconds((days_ago * 86_400_000.0) as i64)).timestamp_millis() as f64 / 1000.0;
            memory.created_at = stamp;
            memory.updated_at = stamp;
            memory
        })
        .collect()
}

/// Lorem-ipsum-like content of `words` tokens, deterministic in `seed`.
pub fn lorem_content(words: usize, seed: usize) -> String {
    const WORDS: [&str; 20] = [
        "the", "memory", "learning", "knowledge", "algorithm", "data", "system", "process", "function", "method", "class",
        "object", "variable", "constant", "type", "structure", "pattern", "design", "architecture", "code",
    ];
    (0..words).map(|i| WORDS[(seed + i * 7) % WORDS.len()]).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_produces_distinct_hashes() {
        let memories = batch(10, "distinct content");
        let hashes: std::collections::HashSet<_> = memories.iter().map(|m| m.content_hash.clone()).collect();
        assert_eq!(hashes.len(), 10);
    }

    #[test]
    fn batch_with_ages_spans_the_requested_range() {
        let memories = batch_with_ages(5, "aged", 0, 14);
        let oldest = memories.iter().map(|m| m.created_at).fold(f64::MAX, f64::min);
        let newest = memories.iter().map(|m| m.created_at).fold(f64::MIN, f64::max);
        assert!(newest - oldest > 13.0 * 86_400.0);
    }

    #[test]
    fn lorem_content_has_requested_word_count() {
        assert_eq!(lorem_content(10, 42).split_whitespace().count(), 10);
    }
}
