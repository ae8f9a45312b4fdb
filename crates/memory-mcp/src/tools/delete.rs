//! `memory_delete` tool — deletes by hash, by tag set, or by timeframe,
//! whichever selector is present in the arguments (§4.11.5-7).

use std::sync::Arc;

use memvault_core::facade::MemoryFacade;
use memvault_core::time::parse_time_range;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content_hash": {"type": "string", "description": "Delete a single memory by its content hash"},
            "tags": {"type": "array", "items": {"type": "string"}, "description": "Delete every memory carrying any of these tags"},
            "time_range": {"type": "string", "description": "Delete every memory created within this relative time expression"},
            "before": {"type": "string", "format": "date-time", "description": "Delete every memory created before this RFC3339 timestamp"}
        }
    })
}

pub async fn execute(facade: &Arc<MemoryFacade>, args: Option<Value>) -> Result<Value, String> {
    let args = args.ok_or("missing arguments")?;

    if let Some(hash) = args.get("content_hash").and_then(|v| v.as_str()) {
        let result = facade.delete(hash).await;
        return serde_json::to_value(result).map_err(|e| e.to_string());
    }

    if let Some(tags) = args.get("tags").and_then(|v| v.as_array()) {
        let tags: Vec<String> = tags.iter().filter_map(|v| v.as_str().map(String::from)).collect();
        let (deleted, errors) = facade.delete_by_tags(tags).await;
        return Ok(serde_json::json!({"deleted": deleted, "errors": errors}));
    }

    if let Some(expr) = args.get("time_range").and_then(|v| v.as_str()) {
        let (start, end) = parse_time_range(expr, chrono::Utc::now()).map_err(|e| e.to_string())?;
        let (deleted, errors) = facade.delete_by_timeframe(start, end).await;
        return Ok(serde_json::json!({"deleted": deleted, "errors": errors}));
    }

    if let Some(before) = args.get("before").and_then(|v| v.as_str()) {
        let ts = chrono::DateTime::parse_from_rfc3339(before)
            .map_err(|e| e.to_string())?
            .timestamp() as f64;
        let (deleted, errors) = facade.delete_before_date(ts).await;
        return Ok(serde_json::json!({"deleted": deleted, "errors": errors}));
    }

    Err("one of 'content_hash', 'tags', 'time_range', or 'before' is required".to_string())
}
