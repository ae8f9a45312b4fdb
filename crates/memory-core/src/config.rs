//! Configuration (C12) — every environment variable is read exactly once,
//! here, at startup. No other module calls `std::env` directly.

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    SqliteVec,
    Cloud,
    Hybrid,
}

impl StorageBackend {
    fn parse(s: &str) -> Self {
        match s {
            "cloud" => StorageBackend::Cloud,
            "hybrid" => StorageBackend::Hybrid,
            _ => StorageBackend::SqliteVec,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub storage_backend: StorageBackend,
    pub sqlite_path: Option<PathBuf>,
    pub sqlite_pragmas: String,

    pub hybrid_sync_interval_secs: u64,
    pub hybrid_batch_size: usize,
    pub hybrid_max_queue_size: usize,
    pub hybrid_max_empty_batches: u32,
    pub hybrid_min_check_count: u64,

    pub enable_auto_split: bool,
    pub content_split_overlap: usize,
    pub include_hostname: bool,

    pub consolidation_enabled: bool,
    pub schedule_daily: String,
    pub schedule_weekly: String,
    pub schedule_monthly: String,

    pub cloud_base_url: Option<String>,
    pub cloud_api_key: Option<String>,
    pub cloud_vector_index_limit: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::Hybrid,
            sqlite_path: None,
            sqlite_pragmas: "busy_timeout=15000,cache_size=20000".to_string(),
            hybrid_sync_interval_secs: 300,
            hybrid_batch_size: 50,
            hybrid_max_queue_size: 1000,
            hybrid_max_empty_batches: 20,
            hybrid_min_check_count: 1000,
            enable_auto_split: true,
            content_split_overlap: 50,
            include_hostname: false,
            consolidation_enabled: true,
            schedule_daily: "02:00".to_string(),
            schedule_weekly: "sun-03:00".to_string(),
            schedule_monthly: "1-04:00".to_string(),
            cloud_base_url: None,
            cloud_api_key: None,
            cloud_vector_index_limit: 0,
        }
    }
}

impl MemoryConfig {
    /// Read every recognized `MCP_*` variable once (§6.3). Unset variables
    /// fall back to their published default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env("MCP_MEMORY_STORAGE_BACKEND") {
            config.storage_backend = StorageBackend::parse(&v);
        }
        if let Some(v) = env("MCP_MEMORY_SQLITE_PATH") {
            config.sqlite_path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("MCP_MEMORY_SQLITE_PRAGMAS") {
            config.sqlite_pragmas = v;
        }
        if let Some(v) = env_u64("MCP_HYBRID_SYNC_INTERVAL") {
            config.hybrid_sync_interval_secs = v;
        }
        if let Some(v) = env_u64("MCP_HYBRID_BATCH_SIZE") {
            config.hybrid_batch_size = v as usize;
        }
        if let Some(v) = env_u64("MCP_HYBRID_MAX_QUEUE_SIZE") {
            config.hybrid_max_queue_size = v as usize;
        }
        if let Some(v) = env_u64("MCP_HYBRID_MAX_EMPTY_BATCHES") {
            config.hybrid_max_empty_batches = v as u32;
        }
        if let Some(v) = env_u64("MCP_HYBRID_MIN_CHECK_COUNT") {
            config.hybrid_min_check_count = v;
        }
        if let Some(v) = env_bool("MCP_ENABLE_AUTO_SPLIT") {
            config.enable_auto_split = v;
        }
        if let Some(v) = env_u64("MCP_CONTENT_SPLIT_OVERLAP") {
            config.content_split_overlap = v as usize;
        }
        if let Some(v) = env_bool("MCP_MEMORY_INCLUDE_HOSTNAME") {
            config.include_hostname = v;
        }
        if let Some(v) = env_bool("MCP_CONSOLIDATION_ENABLED") {
            config.consolidation_enabled = v;
        }
        if let Some(v) = env("MCP_SCHEDULE_DAILY") {
            config.schedule_daily = v;
        }
        if let Some(v) = env("MCP_SCHEDULE_WEEKLY") {
            config.schedule_weekly = v;
        }
        if let Some(v) = env("MCP_SCHEDULE_MONTHLY") {
            config.schedule_monthly = v;
        }
        config.cloud_base_url = env("MCP_CLOUD_BASE_URL");
        config.cloud_api_key = env("MCP_CLOUD_API_KEY");
        if let Some(v) = env_u64("MCP_CLOUD_VECTOR_INDEX_LIMIT") {
            config.cloud_vector_index_limit = v;
        }

        config
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env(key).and_then(|v| v.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backend_is_hybrid() {
        assert_eq!(MemoryConfig::default().storage_backend, StorageBackend::Hybrid);
    }

    #[test]
    fn parse_unknown_backend_falls_back_to_sqlite_vec() {
        assert_eq!(StorageBackend::parse("nonsense"), StorageBackend::SqliteVec);
    }

    #[test]
    fn env_bool_accepts_common_truthy_spellings() {
        std::env::set_var("MEMVAULT_TEST_BOOL_FLAG", "Yes");
        assert_eq!(env_bool("MEMVAULT_TEST_BOOL_FLAG"), Some(true));
        std::env::remove_var("MEMVAULT_TEST_BOOL_FLAG");
    }
}
