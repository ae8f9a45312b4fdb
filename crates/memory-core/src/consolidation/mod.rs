//! Dream-inspired consolidation pipeline (C8).
//!
//! Six phases run in sequence against whatever [`MemoryStore`] backend is
//! active: decay-score, cluster, associate, compress, forget-archive,
//! quality. Each phase runs in its own `try`; a failure stops the pipeline
//! at that phase but always resumes sync on the way out — the same
//! pause-then-`finally`-resume shape the teacher's sleep engine uses around
//! a consolidation run, generalized from one flat procedure into six
//! independently-failable phases.

mod cluster;
mod phases;

pub use phases::{ConsolidationConfig, ConsolidationPhase, ConsolidationReport};

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{now_unix, reserved_keys, Memory};
use crate::quality::QualityScorer;
use crate::store::MemoryStore;

/// Coordinates one run of the pipeline against a store and an optional
/// quality scorer (Phase 6 is skipped without one).
pub struct ConsolidationEngine {
    store: Arc<dyn MemoryStore>,
    scorer: Option<Arc<dyn QualityScorer>>,
    config: ConsolidationConfig,
}

impl ConsolidationEngine {
    pub fn new(store: Arc<dyn MemoryStore>, scorer: Option<Arc<dyn QualityScorer>>) -> Self {
        Self {
            store,
            scorer,
            config: ConsolidationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConsolidationConfig) -> Self {
        self.config = config;
        self
    }

    /// Run all six phases for `time_horizon` ("daily" | "weekly" | "monthly"
    /// | arbitrary free text forwarded to the report). Always resumes sync
    /// before returning, success or failure (§4.8.8).
    pub async fn consolidate(&self, time_horizon: &str) -> ConsolidationReport {
        let run_id = format!("{time_horizon}-{}", now_unix() as i64);
        let mut report = ConsolidationReport::new(&run_id, time_horizon);

        self.store.pause_sync().await;
        let outcome = self.run_phases(&run_id, &mut report).await;
        self.store.resume_sync().await;

        if let Err((phase, error)) = outcome {
            report.failed_phase = Some(phase);
            report.error = Some(error.to_string());
            tracing::error!(run_id = %run_id, phase = ?phase, error = %error, "consolidation aborted");
        } else {
            tracing::info!(run_id = %run_id, "consolidation complete");
        }

        report
    }

    async fn run_phases(
        &self,
        run_id: &str,
        report: &mut ConsolidationReport,
    ) -> std::result::Result<(), (ConsolidationPhase, crate::error::MemoryError)> {
        let candidates = self
            .store
            .get_all_memories(u64::MAX, 0, None, None)
            .await
            .map_err(|e| (ConsolidationPhase::DecayScore, e))?;

        let scored = phases::decay_score(&candidates, &self.config);
        self.store
            .update_memories_batch(scored.clone())
            .await
            .map_err(|e| (ConsolidationPhase::DecayScore, e))?;
        report.phase_1_scored = scored.len() as u64;

        let embedded: Vec<&Memory> = scored.iter().filter(|m| m.embedding.is_some()).collect();
        if embedded.len() < 50 {
            tracing::warn!(count = embedded.len(), "too few embedded memories for clustering, skipping phase 2");
            return Ok(());
        }

        let clusters = cluster::dbscan(&embedded, 0.3, 5);
        report.phase_2_clusters = clusters.len() as u64;

        let new_edges = phases::discover_associations(&clusters, &embedded, self.config.max_new_edges_per_run);
        if !new_edges.is_empty() {
            let patched = phases::apply_associations(&scored, &new_edges);
            self.store
                .update_memories_batch(patched)
                .await
                .map_err(|e| (ConsolidationPhase::Associate, e))?;
        }
        report.phase_3_new_edges = new_edges.len() as u64;

        let mut summaries = Vec::new();
        for cluster in &clusters {
            if cluster.len() < self.config.min_cluster_size_for_summary {
                continue;
            }
            let members: Vec<&Memory> = cluster
                .iter()
                .filter_map(|hash| embedded.iter().find(|m| &m.content_hash == hash).copied())
                .collect();
            if let Some(summary) = phases::summarize_cluster(&members, run_id) {
                summaries.push(summary);
            }
        }
        for summary in &summaries {
            if let Err(e) = self.store.store(summary.clone()).await {
                tracing::warn!(error = %e, "failed to store consolidation summary");
            }
        }
        report.phase_4_summaries = summaries.len() as u64;

        let to_archive = phases::select_for_archival(&scored, self.config.archive_min_idle_days);
        if !to_archive.is_empty() {
            let archived = phases::archive(&to_archive, run_id);
            self.store
                .update_memories_batch(archived)
                .await
                .map_err(|e| (ConsolidationPhase::ForgetArchive, e))?;
        }
        report.phase_5_archived = to_archive.len() as u64;

        if let Some(scorer) = &self.scorer {
            let needs_score: Vec<Memory> = scored
                .iter()
                .filter(|m| m.quality_score.is_none() || new_edges.iter().any(|(a, b)| a == &m.content_hash || b == &m.content_hash))
                .cloned()
                .collect();
            let mut rescored = Vec::with_capacity(needs_score.len());
            for mut memory in needs_score {
                match scorer.score(&memory.content).await {
                    Ok(score) => {
                        memory.quality_score = Some(score);
                        memory
                            .metadata
                            .insert(reserved_keys::QUALITY_SCORE.to_string(), serde_json::json!(score));
                        rescored.push(memory);
                    }
                    Err(e) => tracing::warn!(hash = %memory.content_hash, error = %e, "quality scoring failed, skipping"),
                }
            }
            report.phase_6_scored = rescored.len() as u64;
            if !rescored.is_empty() {
                let _ = self.store.update_memories_batch(rescored).await;
            }
        }

        Ok(())
    }
}

/// Groups memories by shared tag, used by Phase 4's theme extraction.
pub(crate) fn tag_frequency<'a>(memories: &[&'a Memory]) -> HashMap<&'a str, usize> {
    let mut freq = HashMap::new();
    for memory in memories {
        for tag in &memory.tags {
            *freq.entry(tag.as_str()).or_insert(0) += 1;
        }
    }
    freq
}
