//! The six consolidation phases (§4.8.1-4.8.6) as pure functions over
//! `Memory` slices. Kept free of any storage dependency — [`super::ConsolidationEngine`]
//! is the only thing that calls a store, these just compute.

use std::collections::{HashMap, HashSet};

use crate::embeddings::cosine_similarity;
use crate::model::{now_unix, reserved_keys, Memory, MemoryType};

use super::tag_frequency;

/// Which of the six phases a failed consolidation run stopped at (§4.8.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationPhase {
    DecayScore,
    Cluster,
    Associate,
    Compress,
    ForgetArchive,
    Quality,
}

#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    pub half_life_days: HashMap<&'static str, f64>,
    pub archive_min_idle_days: f64,
    pub max_new_edges_per_run: usize,
    pub min_cluster_size_for_summary: usize,
    pub max_summary_chars: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        let mut half_life_days = HashMap::new();
        half_life_days.insert("critical", 365.0);
        half_life_days.insert("reference", 180.0);
        half_life_days.insert("standard", 30.0);
        half_life_days.insert("temporary", 7.0);
        Self {
            half_life_days,
            archive_min_idle_days: 90.0,
            max_new_edges_per_run: 500,
            min_cluster_size_for_summary: 5,
            max_summary_chars: 500,
        }
    }
}

/// Report returned by [`super::ConsolidationEngine::consolidate`] (§8 S5).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ConsolidationReport {
    pub run_id: String,
    pub time_horizon: String,
    pub phase_1_scored: u64,
    pub phase_2_clusters: u64,
    pub phase_3_new_edges: u64,
    pub phase_4_summaries: u64,
    pub phase_5_archived: u64,
    pub phase_6_scored: u64,
    pub failed_phase: Option<ConsolidationPhase>,
    pub error: Option<String>,
}

impl serde::Serialize for ConsolidationPhase {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            ConsolidationPhase::DecayScore => "decay_score",
            ConsolidationPhase::Cluster => "cluster",
            ConsolidationPhase::Associate => "associate",
            ConsolidationPhase::Compress => "compress",
            ConsolidationPhase::ForgetArchive => "forget_archive",
            ConsolidationPhase::Quality => "quality",
        };
        serializer.serialize_str(s)
    }
}

impl ConsolidationReport {
    pub fn new(run_id: &str, time_horizon: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            time_horizon: time_horizon.to_string(),
            ..Default::default()
        }
    }
}

fn half_life_for(config: &ConsolidationConfig, memory_type: MemoryType) -> f64 {
    let key = match memory_type {
        MemoryType::Reference | MemoryType::Documentation | MemoryType::Guide => "reference",
        MemoryType::Session | MemoryType::Status => "temporary",
        MemoryType::Security | MemoryType::Architecture | MemoryType::Milestone | MemoryType::Achievement => "critical",
        _ => "standard",
    };
    *config.half_life_days.get(key).unwrap_or(&30.0)
}

/// Phase 1 (§4.8.1): decay-score every candidate, writing `relevance_score`
/// into metadata. Returns clones carrying the updated field, ready for
/// `update_memories_batch`.
pub fn decay_score(candidates: &[Memory], config: &ConsolidationConfig) -> Vec<Memory> {
    let now = now_unix();
    candidates
        .iter()
        .cloned()
        .map(|mut memory| {
            let age_days = (now - memory.created_at) / 86400.0;
            let half_life = half_life_for(config, memory.memory_type);
            let base_decay = (-age_days / half_life).exp();

            let access_count = memory
                .metadata
                .get(reserved_keys::ACCESS_COUNT)
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            let last_accessed = memory
                .metadata
                .get(reserved_keys::LAST_ACCESSED)
                .and_then(|v| v.as_f64());
            let recently_accessed = last_accessed.is_some_and(|ts| (now - ts) / 86400.0 <= 30.0);
            let access_boost = if recently_accessed {
                (0.5_f64).min(((1.0 + access_count as f64).ln()) * 0.1)
            } else {
                0.0
            };

            let relevance = (base_decay + access_boost).clamp(0.0, 1.0) as f32;
            memory
                .metadata
                .insert(reserved_keys::RELEVANCE_SCORE.to_string(), serde_json::json!(relevance));
            memory.updated_at = now;
            memory
        })
        .collect()
}

/// Phase 3 (§4.8.3): sample cross-cluster pairs plus all intra-cluster pairs,
/// keep those in the "novel but not duplicate" similarity band, dedup by
/// unordered pair, cap the count.
pub fn discover_associations(clusters: &[Vec<String>], memories: &[&Memory], max_edges: usize) -> Vec<(String, String)> {
    let by_hash: HashMap<&str, &Memory> = memories.iter().map(|m| (m.content_hash.as_str(), *m)).collect();
    let mut seen = HashSet::new();
    let mut edges = Vec::new();

    let mut candidate_pairs: Vec<(String, String)> = Vec::new();
    for cluster in clusters {
        for i in 0..cluster.len() {
            for j in (i + 1)..cluster.len() {
                candidate_pairs.push((cluster[i].clone(), cluster[j].clone()));
            }
        }
    }
    // A bounded cross-cluster sample: pair each cluster's first member against
    // the next cluster's first member, rather than the full cross product.
    for pair in clusters.windows(2) {
        if let (Some(a), Some(b)) = (pair[0].first(), pair[1].first()) {
            candidate_pairs.push((a.clone(), b.clone()));
        }
    }

    for (a, b) in candidate_pairs {
        if edges.len() >= max_edges {
            break;
        }
        let key = if a < b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
        if seen.contains(&key) {
            continue;
        }
        let (Some(ma), Some(mb)) = (by_hash.get(a.as_str()), by_hash.get(b.as_str())) else {
            continue;
        };
        let (Some(ea), Some(eb)) = (&ma.embedding, &mb.embedding) else {
            continue;
        };
        let sim = cosine_similarity(ea, eb);
        if (0.3..=0.7).contains(&sim) {
            seen.insert(key);
            edges.push((a, b));
        }
    }

    edges
}

/// Patch `related_memories`/`related_similarities`/`connection_count` onto
/// both endpoints of every new edge, symmetrically (P10).
pub fn apply_associations(memories: &[Memory], edges: &[(String, String)]) -> Vec<Memory> {
    let mut by_hash: HashMap<String, Memory> = memories.iter().map(|m| (m.content_hash.clone(), m.clone())).collect();

    for (a, b) in edges {
        link(&mut by_hash, a, b);
        link(&mut by_hash, b, a);
    }

    by_hash.into_values().collect()
}

fn link(by_hash: &mut HashMap<String, Memory>, from: &str, to: &str) {
    let Some(memory) = by_hash.get_mut(from) else { return };

    let mut related: Vec<String> = memory
        .metadata
        .get(reserved_keys::RELATED_MEMORIES)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    if !related.contains(&to.to_string()) {
        related.push(to.to_string());
    }
    memory
        .metadata
        .insert(reserved_keys::RELATED_MEMORIES.to_string(), serde_json::json!(related));

    let count = memory
        .metadata
        .get(reserved_keys::CONNECTION_COUNT)
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    memory
        .metadata
        .insert(reserved_keys::CONNECTION_COUNT.to_string(), serde_json::json!(count + 1));
}

/// Phase 4 (§4.8.4): a ≤500-char summary of shared tags and the most common
/// words across a cluster's members, stored as a `consolidation_summary`.
pub fn summarize_cluster(members: &[&Memory], run_id: &str) -> Option<Memory> {
    if members.is_empty() {
        return None;
    }

    let freq = tag_frequency(members);
    let mut shared_tags: Vec<&str> = freq
        .into_iter()
        .filter(|(_, count)| *count * 2 >= members.len())
        .map(|(tag, _)| tag)
        .collect();
    shared_tags.sort();

    let top_ngrams = top_words(members, 8);

    let theme = if !shared_tags.is_empty() {
        shared_tags.join(", ")
    } else {
        top_ngrams.join(", ")
    };

    let mut content = format!(
        "Consolidated cluster of {} memories around: {}. Common terms: {}.",
        members.len(),
        theme,
        top_ngrams.join(", ")
    );
    content.truncate(500);

    let mut tags: Vec<String> = shared_tags.iter().map(|s| s.to_string()).collect();
    tags.push(format!("consolidated:{run_id}"));

    Memory::new(content, tags, MemoryType::ConsolidationSummary, Default::default()).ok()
}

fn top_words<'a>(members: &[&'a Memory], limit: usize) -> Vec<String> {
    const STOPWORDS: &[&str] = &["the", "a", "an", "and", "or", "to", "of", "in", "is", "it", "for", "on", "this", "that"];
    let mut freq: HashMap<String, usize> = HashMap::new();
    for memory in members {
        for word in memory.content.split_whitespace() {
            let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase();
            if cleaned.len() < 3 || STOPWORDS.contains(&cleaned.as_str()) {
                continue;
            }
            *freq.entry(cleaned).or_insert(0) += 1;
        }
    }
    let mut words: Vec<(String, usize)> = freq.into_iter().collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    words.into_iter().take(limit).map(|(w, _)| w).collect()
}

/// Phase 5 (§4.8.5): archive memories that are stale, unvisited, and
/// unprotected.
pub fn select_for_archival(memories: &[Memory], min_idle_days: f64) -> Vec<Memory> {
    let now = now_unix();
    memories
        .iter()
        .filter(|m| {
            let relevance = m
                .metadata
                .get(reserved_keys::RELEVANCE_SCORE)
                .and_then(|v| v.as_f64())
                .unwrap_or(1.0);
            if relevance >= 0.1 {
                return false;
            }
            let last_accessed = m
                .metadata
                .get(reserved_keys::LAST_ACCESSED)
                .and_then(|v| v.as_f64())
                .unwrap_or(m.updated_at);
            let idle_days = (now - last_accessed) / 86400.0;
            if idle_days <= min_idle_days {
                return false;
            }
            !m.tags.iter().any(|t| t == "pinned" || t == "critical")
        })
        .cloned()
        .collect()
}

/// Mark `memories` archived and tag them with the run id (§4.8.5).
pub fn archive(memories: &[Memory], run_id: &str) -> Vec<Memory> {
    memories
        .iter()
        .cloned()
        .map(|mut m| {
            m.memory_type = MemoryType::Archived;
            m.tags.push(format!("archived:{run_id}"));
            m.updated_at = now_unix();
            m
        })
        .collect()
}
