//! `memory_search_by_tag` tool (§4.11.4).

use std::sync::Arc;

use memvault_core::facade::MemoryFacade;
use memvault_core::time::parse_time_range;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "tags": {"type": "array", "items": {"type": "string"}},
            "match_all": {"type": "boolean", "description": "Require every tag to match, default false (any)"},
            "time_range": {"type": "string"}
        },
        "required": ["tags"]
    })
}

pub async fn execute(facade: &Arc<MemoryFacade>, args: Option<Value>) -> Result<Value, String> {
    let args = args.ok_or("missing arguments")?;
    let tags: Vec<String> = args
        .get("tags")
        .and_then(|v| v.as_array())
        .ok_or("missing required field 'tags'")?
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    let match_all = args.get("match_all").and_then(|v| v.as_bool()).unwrap_or(false);

    let time_start = match args.get("time_range").and_then(|v| v.as_str()) {
        Some(expr) => Some(parse_time_range(expr, chrono::Utc::now()).map_err(|e| e.to_string())?.0),
        None => None,
    };

    let results = facade.search_by_tag(&tags, match_all, time_start).await;
    serde_json::to_value(results).map_err(|e| e.to_string())
}
