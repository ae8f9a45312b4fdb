//! `memory_store` tool — store content as one or more memories (§4.11.2).

use std::collections::BTreeMap;
use std::sync::Arc;

use memvault_core::facade::{MemoryFacade, TagsInput};
use memvault_core::MemoryType;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content": {"type": "string", "description": "The text to remember"},
            "tags": {
                "description": "A comma-separated string or an array of tags",
                "oneOf": [{"type": "string"}, {"type": "array", "items": {"type": "string"}}]
            },
            "memory_type": {"type": "string", "description": "One of the recognized memory types, default 'note'"},
            "metadata": {"type": "object", "description": "Arbitrary extra key/value metadata"}
        },
        "required": ["content"]
    })
}

pub async fn execute(facade: &Arc<MemoryFacade>, args: Option<Value>) -> Result<Value, String> {
    let args = args.ok_or("missing arguments")?;
    let content = args
        .get("content")
        .and_then(|v| v.as_str())
        .ok_or("missing required field 'content'")?
        .to_string();

    let tags = match args.get("tags") {
        Some(Value::String(s)) => TagsInput::Single(s.clone()),
        Some(Value::Array(items)) => TagsInput::Many(items.iter().filter_map(|v| v.as_str().map(String::from)).collect()),
        _ => TagsInput::None,
    };

    let memory_type = args
        .get("memory_type")
        .and_then(|v| v.as_str())
        .map(MemoryType::parse)
        .unwrap_or_default();

    let metadata: BTreeMap<String, Value> = args
        .get("metadata")
        .and_then(|v| v.as_object())
        .map(|obj| obj.clone().into_iter().collect())
        .unwrap_or_default();

    let client_hostname = if cfg!(unix) || cfg!(windows) {
        hostname()
    } else {
        None
    };

    let result = facade.store_memory(content, tags, memory_type, metadata, client_hostname).await;
    serde_json::to_value(result).map_err(|e| e.to_string())
}

fn hostname() -> Option<String> {
    std::env::var("HOSTNAME").ok().or_else(|| std::env::var("COMPUTERNAME").ok())
}
