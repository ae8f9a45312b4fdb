//! `memory_health` tool — a cheap liveness and backend-identity check.

use std::sync::Arc;

use memvault_core::facade::MemoryFacade;
use serde_json::Value;

pub fn schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

pub async fn execute(facade: &Arc<MemoryFacade>, _args: Option<Value>) -> Result<Value, String> {
    let result = facade.health().await;
    serde_json::to_value(result).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_takes_no_arguments() {
        assert_eq!(schema()["properties"], serde_json::json!({}));
    }
}
