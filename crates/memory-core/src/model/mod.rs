//! Memory model — the canonical record and its invariants
//!
//! A `Memory` is identified by `content_hash`, a 64-character lowercase hex
//! SHA-256 digest of its (unmodified) `content`. This is the only identity
//! that survives across backends; the single hashing helper here is the sole
//! producer used by every backend and by migrations.

mod chunk;

pub use chunk::{split_content, ChunkPolicy, SplitChunk};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sha2::{Digest, Sha256};

use crate::error::{MemoryError, Result};

/// Metadata reserved keys set/read by the engine itself.
pub mod reserved_keys {
    pub const IS_CHUNK: &str = "is_chunk";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const TOTAL_CHUNKS: &str = "total_chunks";
    pub const ORIGINAL_LENGTH: &str = "original_length";
    pub const CREATED_AT_ISO: &str = "created_at_iso";
    pub const UPDATED_AT_ISO: &str = "updated_at_iso";
    pub const QUALITY_SCORE: &str = "quality_score";
    pub const CONNECTION_COUNT: &str = "connection_count";
    pub const HOSTNAME: &str = "hostname";
    pub const RELEVANCE_SCORE: &str = "relevance_score";
    pub const RELATED_MEMORIES: &str = "related_memories";
    pub const RELATED_SIMILARITIES: &str = "related_similarities";
    pub const LAST_ACCESSED: &str = "last_accessed";
    pub const ACCESS_COUNT: &str = "access_count";
}

/// Controlled vocabulary for `memory_type` (see GLOSSARY).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Note,
    Reference,
    Document,
    Guide,
    Session,
    Implementation,
    Analysis,
    Troubleshooting,
    Test,
    Fix,
    Feature,
    Release,
    Deployment,
    Milestone,
    Status,
    Configuration,
    Infrastructure,
    Process,
    Security,
    Architecture,
    Documentation,
    Solution,
    Achievement,
    Technical,
    ConsolidationSummary,
    Archived,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Note => "note",
            MemoryType::Reference => "reference",
            MemoryType::Document => "document",
            MemoryType::Guide => "guide",
            MemoryType::Session => "session",
            MemoryType::Implementation => "implementation",
            MemoryType::Analysis => "analysis",
            MemoryType::Troubleshooting => "troubleshooting",
            MemoryType::Test => "test",
            MemoryType::Fix => "fix",
            MemoryType::Feature => "feature",
            MemoryType::Release => "release",
            MemoryType::Deployment => "deployment",
            MemoryType::Milestone => "milestone",
            MemoryType::Status => "status",
            MemoryType::Configuration => "configuration",
            MemoryType::Infrastructure => "infrastructure",
            MemoryType::Process => "process",
            MemoryType::Security => "security",
            MemoryType::Architecture => "architecture",
            MemoryType::Documentation => "documentation",
            MemoryType::Solution => "solution",
            MemoryType::Achievement => "achievement",
            MemoryType::Technical => "technical",
            MemoryType::ConsolidationSummary => "consolidation_summary",
            MemoryType::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "reference" => MemoryType::Reference,
            "document" => MemoryType::Document,
            "guide" => MemoryType::Guide,
            "session" => MemoryType::Session,
            "implementation" => MemoryType::Implementation,
            "analysis" => MemoryType::Analysis,
            "troubleshooting" => MemoryType::Troubleshooting,
            "test" => MemoryType::Test,
            "fix" => MemoryType::Fix,
            "feature" => MemoryType::Feature,
            "release" => MemoryType::Release,
            "deployment" => MemoryType::Deployment,
            "milestone" => MemoryType::Milestone,
            "status" => MemoryType::Status,
            "configuration" => MemoryType::Configuration,
            "infrastructure" => MemoryType::Infrastructure,
            "process" => MemoryType::Process,
            "security" => MemoryType::Security,
            "architecture" => MemoryType::Architecture,
            "documentation" => MemoryType::Documentation,
            "solution" => MemoryType::Solution,
            "achievement" => MemoryType::Achievement,
            "technical" => MemoryType::Technical,
            "consolidation_summary" => MemoryType::ConsolidationSummary,
            "archived" => MemoryType::Archived,
            _ => MemoryType::Note,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for MemoryType {
    fn default() -> Self {
        MemoryType::Note
    }
}

/// Embedding dimensionality produced by the local provider (§C2).
pub const LOCAL_EMBEDDING_DIMENSIONS: usize = 384;

/// A stored memory record.
///
/// `content_hash` is the primary identity across all backends (I1). `tags`
/// are always the deduplicated, trimmed normalization of caller input (I2).
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub content: String,
    pub content_hash: String,
    pub tags: Vec<String>,
    pub memory_type: MemoryType,
    pub metadata: BTreeMap<String, Json>,
    pub created_at: f64,
    pub updated_at: f64,
    pub embedding: Option<Vec<f32>>,
    pub quality_score: Option<f32>,
}

impl Memory {
    /// Compute the canonical content hash: SHA-256 hex of `content`, no
    /// metadata mixed in. This is the one producer used everywhere.
    pub fn hash_content(content: &str) -> String {
        let digest = Sha256::digest(content.as_bytes());
        hex_lower(&digest)
    }

    /// Build a new memory from validated inputs, stamping both timestamps to `now`.
    pub fn new(
        content: String,
        tags: Vec<String>,
        memory_type: MemoryType,
        metadata: BTreeMap<String, Json>,
    ) -> Result<Self> {
        validate_content(&content)?;
        for tag in &tags {
            validate_tag(tag)?;
        }
        let now = now_unix();
        let content_hash = Self::hash_content(&content);
        let mut metadata = metadata;
        sync_iso_timestamps(&mut metadata, now, now);
        Ok(Self {
            content,
            content_hash,
            tags,
            memory_type,
            metadata,
            created_at: now,
            updated_at: now,
            embedding: None,
            quality_score: None,
        })
    }

    /// Validate an embedding before it is accepted: must be 384-dim and finite.
    pub fn validate_embedding(embedding: &[f32]) -> Result<()> {
        if embedding.len() != LOCAL_EMBEDDING_DIMENSIONS && embedding.len() != 768 {
            return Err(MemoryError::Validation(format!(
                "embedding must be {} or 768 dimensions, got {}",
                LOCAL_EMBEDDING_DIMENSIONS,
                embedding.len()
            )));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(MemoryError::Validation(
                "embedding contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }

    /// Reconcile `created_at_iso`/`updated_at_iso` against the authoritative
    /// numeric timestamps. Numeric always wins on disagreement > 1s (§3.1).
    pub fn reconcile_iso_timestamps(&mut self) {
        sync_iso_timestamps(&mut self.metadata, self.created_at, self.updated_at);
    }

    pub fn touch_updated(&mut self) {
        self.updated_at = now_unix();
        self.reconcile_iso_timestamps();
    }
}

fn sync_iso_timestamps(metadata: &mut BTreeMap<String, Json>, created_at: f64, updated_at: f64) {
    let created_iso = unix_to_iso(created_at);
    let updated_iso = unix_to_iso(updated_at);

    let needs_created = match metadata.get(reserved_keys::CREATED_AT_ISO).and_then(|v| v.as_str()) {
        Some(existing) => iso_disagrees(existing, created_at),
        None => true,
    };
    if needs_created {
        metadata.insert(
            reserved_keys::CREATED_AT_ISO.to_string(),
            Json::String(created_iso),
        );
    }

    let needs_updated = match metadata.get(reserved_keys::UPDATED_AT_ISO).and_then(|v| v.as_str()) {
        Some(existing) => iso_disagrees(existing, updated_at),
        None => true,
    };
    if needs_updated {
        metadata.insert(
            reserved_keys::UPDATED_AT_ISO.to_string(),
            Json::String(updated_iso),
        );
    }
}

/// True if a (possibly timezone-naive) ISO string disagrees with `numeric`
/// by more than one second. Naive strings are interpreted as UTC (§4.8.1).
fn iso_disagrees(iso: &str, numeric: f64) -> bool {
    match parse_iso_as_utc(iso) {
        Some(parsed) => (parsed.timestamp() as f64 - numeric).abs() > 1.0,
        None => true,
    }
}

/// Parse an ISO-8601 string, treating a naive (no offset) value as UTC.
pub fn parse_iso_as_utc(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive datetime (no trailing Z / offset) — interpret as UTC.
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

pub fn unix_to_iso(ts: f64) -> String {
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub fn now_unix() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Content must be non-empty after trimming.
pub fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(MemoryError::Validation(
            "content must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Tags must be non-whitespace-only and at most 100 characters.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.trim().is_empty() {
        return Err(MemoryError::Validation(
            "tag must not be whitespace-only".to_string(),
        ));
    }
    if tag.len() > 100 {
        return Err(MemoryError::Validation(format!(
            "tag '{tag}' exceeds 100 characters"
        )));
    }
    Ok(())
}

/// A 64-char lowercase hex content hash.
pub fn validate_content_hash(hash: &str) -> Result<()> {
    if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        return Err(MemoryError::Validation(format!(
            "content_hash must be 64 lowercase hex chars, got '{hash}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_64_lowercase_hex() {
        let h = Memory::hash_content("hello world");
        assert_eq!(h.len(), 64);
        assert!(h.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(h, h.to_lowercase());
    }

    #[test]
    fn hash_is_deterministic_and_ignores_metadata() {
        let a = Memory::hash_content("same content");
        let b = Memory::hash_content("same content");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_content_rejected() {
        let err = validate_content("   ").unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[test]
    fn tag_too_long_rejected() {
        let tag = "x".repeat(101);
        assert!(validate_tag(&tag).is_err());
    }

    #[test]
    fn whitespace_only_tag_rejected() {
        assert!(validate_tag("   ").is_err());
    }

    #[test]
    fn embedding_wrong_dims_rejected() {
        let v = vec![0.0f32; 10];
        assert!(Memory::validate_embedding(&v).is_err());
    }

    #[test]
    fn embedding_non_finite_rejected() {
        let mut v = vec![0.0f32; LOCAL_EMBEDDING_DIMENSIONS];
        v[0] = f32::NAN;
        assert!(Memory::validate_embedding(&v).is_err());
    }

    #[test]
    fn content_hash_validation() {
        assert!(validate_content_hash(&"a".repeat(64)).is_ok());
        assert!(validate_content_hash(&"A".repeat(64)).is_err());
        assert!(validate_content_hash("short").is_err());
    }

    #[test]
    fn naive_iso_interpreted_as_utc() {
        let dt = parse_iso_as_utc("2023-11-14T22:13:20").unwrap();
        assert_eq!(dt.to_rfc3339(), "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn iso_regenerated_on_disagreement() {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            reserved_keys::CREATED_AT_ISO.to_string(),
            Json::String("2020-01-01T00:00:00Z".to_string()),
        );
        let now = now_unix();
        sync_iso_timestamps(&mut metadata, now, now);
        let iso = metadata[reserved_keys::CREATED_AT_ISO].as_str().unwrap();
        let parsed = parse_iso_as_utc(iso).unwrap();
        assert!((parsed.timestamp() as f64 - now).abs() < 2.0);
    }
}
