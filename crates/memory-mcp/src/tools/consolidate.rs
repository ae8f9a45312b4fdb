//! `consolidate` tool — runs the six-phase consolidation pipeline once,
//! synchronously, for the requested time horizon (§4.8).

use std::sync::Arc;

use memvault_core::consolidation::ConsolidationEngine;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "time_horizon": {
                "type": "string",
                "description": "Free-form label echoed back in the report, e.g. 'daily', 'weekly', 'monthly'",
                "default": "manual"
            }
        }
    })
}

pub async fn execute(engine: &Arc<ConsolidationEngine>, args: Option<Value>) -> Result<Value, String> {
    let time_horizon = args
        .as_ref()
        .and_then(|a| a.get("time_horizon"))
        .and_then(|v| v.as_str())
        .unwrap_or("manual")
        .to_string();

    let report = engine.consolidate(&time_horizon).await;
    serde_json::to_value(report).map_err(|e| e.to_string())
}
