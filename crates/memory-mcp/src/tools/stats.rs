//! `memory_stats` tool — aggregate counts and backend identity (§6.1).

use std::sync::Arc;

use memvault_core::facade::MemoryFacade;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

pub async fn execute(facade: &Arc<MemoryFacade>, _args: Option<Value>) -> Result<Value, String> {
    match facade.stats().await {
        Some(stats) => serde_json::to_value(stats).map_err(|e| e.to_string()),
        None => Err("failed to read stats from the active backend".to_string()),
    }
}
