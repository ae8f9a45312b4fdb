//! `memory_sync_status` tool — sync-worker state for the hybrid backend
//! (an idle, all-zero status on the other two backends).

use std::sync::Arc;

use memvault_core::facade::MemoryFacade;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

pub async fn execute(facade: &Arc<MemoryFacade>, _args: Option<Value>) -> Result<Value, String> {
    let status = facade.sync_status().await;
    serde_json::to_value(status).map_err(|e| e.to_string())
}
