//! Quality scorer (C9) — a pluggable `[0, 1]` content classifier.
//!
//! Never derives its score from retrieval similarity to the memory's own
//! content (that would trivially self-match); scores come from absolute,
//! content-only heuristics instead. Runs best-effort during `store` and in
//! bulk during consolidation's Phase 6 — a scoring failure never blocks a
//! store.

use async_trait::async_trait;

/// Error from a quality scorer. Never propagated to the caller of `store` —
/// callers log and continue.
#[derive(Debug, thiserror::Error)]
pub enum QualityError {
    #[error("quality scoring failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait QualityScorer: Send + Sync {
    /// Score `content` in `[0, 1]`. Higher means more substantive/useful.
    async fn score(&self, content: &str) -> Result<f32, QualityError>;
}

/// Length, structure, and vocabulary heuristics. No ML dependency, no
/// network call — always available, always fast.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn new() -> Self {
        Self
    }

    fn length_score(content: &str) -> f32 {
        let len = content.chars().count();
        match len {
            0..=20 => 0.1,
            21..=80 => 0.4,
            81..=2000 => 1.0,
            2001..=6000 => 0.8,
            _ => 0.5,
        }
    }

    fn structure_score(content: &str) -> f32 {
        let has_punctuation = content.chars().any(|c| matches!(c, '.' | '!' | '?' | ':'));
        let has_multiple_sentences = content.matches(['.', '!', '?']).count() >= 2;
        let word_count = content.split_whitespace().count();

        let mut score = 0.3;
        if has_punctuation {
            score += 0.3;
        }
        if has_multiple_sentences {
            score += 0.2;
        }
        if word_count >= 5 {
            score += 0.2;
        }
        score.min(1.0)
    }

    fn vocabulary_score(content: &str) -> f32 {
        let words: Vec<&str> = content.split_whitespace().collect();
        if words.is_empty() {
            return 0.0;
        }
        let unique: std::collections::HashSet<String> = words.iter().map(|w| w.to_lowercase()).collect();
        (unique.len() as f32 / words.len() as f32).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl QualityScorer for HeuristicScorer {
    async fn score(&self, content: &str) -> Result<f32, QualityError> {
        if content.trim().is_empty() {
            return Ok(0.0);
        }
        let length = Self::length_score(content);
        let structure = Self::structure_score(content);
        let vocabulary = Self::vocabulary_score(content);
        let score = length * 0.4 + structure * 0.35 + vocabulary * 0.25;
        Ok(score.clamp(0.0, 1.0))
    }
}

/// Markers recognizable even when the heuristic scorer's prose-oriented
/// structure checks undercount dense technical content (code fences, stack
/// traces, config blocks — few sentences, lots of signal).
const TECHNICAL_MARKERS: &[&str] = &[
    "```", "fn ", "def ", "class ", "SELECT ", "error:", "Exception", "Traceback", "{", "import ", "#include",
];

/// Falls back to a technical-content-aware score when the content looks like
/// code or logs rather than prose (§4.9: "a fallback hybrid scorer exists
/// for technical content that confuses the primary classifier").
pub struct HybridScorer {
    primary: HeuristicScorer,
}

impl Default for HybridScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridScorer {
    pub fn new() -> Self {
        Self { primary: HeuristicScorer::new() }
    }

    fn looks_technical(content: &str) -> bool {
        TECHNICAL_MARKERS.iter().filter(|m| content.contains(**m)).count() >= 2
    }

    fn technical_score(content: &str) -> f32 {
        let len = content.chars().count();
        let has_fence = content.contains("```");
        let line_count = content.lines().count();
        let mut score = 0.5;
        if has_fence {
            score += 0.2;
        }
        if line_count >= 3 {
            score += 0.2;
        }
        if len > 50 {
            score += 0.1;
        }
        score.min(1.0)
    }
}

#[async_trait]
impl QualityScorer for HybridScorer {
    async fn score(&self, content: &str) -> Result<f32, QualityError> {
        if Self::looks_technical(content) {
            Ok(Self::technical_score(content))
        } else {
            self.primary.score(content).await
        }
    }
}
