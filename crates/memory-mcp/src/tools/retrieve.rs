//! `memory_retrieve` tool — semantic search when `query` is set, otherwise
//! a plain chronological recall (§4.11.3, §4.4).

use std::sync::Arc;

use memvault_core::facade::MemoryFacade;
use memvault_core::time::parse_time_range;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": "Semantic search text; omit or leave empty for a plain recent recall"},
            "n": {"type": "integer", "description": "Max results, default 10"},
            "similarity_threshold": {"type": "number", "description": "Minimum cosine similarity, 0..1"},
            "tags": {"type": "array", "items": {"type": "string"}},
            "memory_type": {"type": "string"},
            "time_range": {"type": "string", "description": "A relative time expression, e.g. 'last-week'"}
        }
    })
}

pub async fn execute(facade: &Arc<MemoryFacade>, args: Option<Value>) -> Result<Value, String> {
    let args = args.unwrap_or(Value::Null);

    let query = args.get("query").and_then(|v| v.as_str());
    let n = args.get("n").and_then(|v| v.as_u64()).unwrap_or(10);
    let similarity_threshold = args.get("similarity_threshold").and_then(|v| v.as_f64()).map(|v| v as f32);
    let tags: Option<Vec<String>> = args
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect());
    let memory_type = args.get("memory_type").and_then(|v| v.as_str());

    let (time_start, time_end) = match args.get("time_range").and_then(|v| v.as_str()) {
        Some(expr) => {
            let (start, end) = parse_time_range(expr, chrono::Utc::now()).map_err(|e| e.to_string())?;
            (Some(start), Some(end))
        }
        None => (None, None),
    };

    let results = facade
        .retrieve_memories(query, n, similarity_threshold, tags.as_deref(), memory_type, time_start, time_end)
        .await;

    serde_json::to_value(results).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_an_object_type() {
        assert_eq!(schema()["type"], "object");
    }
}
