//! MCP server core — routes JSON-RPC requests to the tool handlers in
//! [`crate::tools`], all of which operate against a shared
//! [`MemoryFacade`] and [`ConsolidationEngine`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memvault_core::consolidation::ConsolidationEngine;
use memvault_core::facade::MemoryFacade;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_VERSION};
use crate::tools;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct InitializeRequest {
    #[serde(rename = "protocolVersion")]
    protocol_version: String,
}

impl Default for InitializeRequest {
    fn default() -> Self {
        Self {
            protocol_version: MCP_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ServerInfo {
    name: String,
    version: String,
}

#[derive(Debug, Clone, Serialize)]
struct ServerCapabilities {
    tools: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    protocol_version: String,
    #[serde(rename = "serverInfo")]
    server_info: ServerInfo,
    capabilities: ServerCapabilities,
    instructions: String,
}

#[derive(Debug, Clone, Serialize)]
struct ToolDescription {
    name: String,
    description: String,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
struct ListToolsResult {
    tools: Vec<ToolDescription>,
}

#[derive(Debug, Clone, Deserialize)]
struct CallToolRequest {
    name: String,
    arguments: Option<Value>,
}

/// Holds the wiring every transport adapter (stdio, HTTP) needs, without
/// any transport-specific code of its own.
pub struct McpServer {
    facade: Arc<MemoryFacade>,
    consolidation: Arc<ConsolidationEngine>,
    initialized: bool,
    tool_call_count: AtomicU64,
}

impl McpServer {
    pub fn new(facade: Arc<MemoryFacade>, consolidation: Arc<ConsolidationEngine>) -> Self {
        Self {
            facade,
            consolidation,
            initialized: false,
            tool_call_count: AtomicU64::new(0),
        }
    }

    /// Handle one incoming JSON-RPC request. Returns `None` for
    /// notifications, which never get a response.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "handling request");

        if !self.initialized && request.method != "initialize" && request.method != "notifications/initialized" {
            warn!(method = %request.method, "rejecting request before initialize");
            return Some(JsonRpcResponse::error(request.id, JsonRpcError::server_not_initialized()));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            method => {
                warn!(method, "unknown method");
                Err(JsonRpcError::method_not_found())
            }
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(p) => serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => InitializeRequest::default(),
        };

        // Some clients reject a server advertising a newer protocol version
        // than they asked for; fall back to theirs if it's older.
        let negotiated = if request.protocol_version.as_str() < MCP_VERSION {
            info!(requested = %request.protocol_version, "using client's older protocol version");
            request.protocol_version
        } else {
            MCP_VERSION.to_string()
        };

        self.initialized = true;
        info!(protocol_version = %negotiated, "session initialized");

        let mut tools = HashMap::new();
        tools.insert("listChanged".to_string(), Value::Bool(false));

        let result = InitializeResult {
            protocol_version: negotiated,
            server_info: ServerInfo {
                name: "memvault".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities { tools },
            instructions: "A semantic memory store. Use memory_store to remember content, \
                memory_retrieve for semantic search or recent recall, memory_search_by_tag for \
                tag-filtered lookups, and memory_delete to remove entries by hash, tag, or \
                timeframe."
                .to_string(),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let tools = vec![
            ToolDescription {
                name: "memory_store".to_string(),
                description: "Store content as one or more memories, auto-splitting oversized content."
                    .to_string(),
                input_schema: tools::store::schema(),
            },
            ToolDescription {
                name: "memory_retrieve".to_string(),
                description: "Semantic search when a query is given, otherwise a chronological recall."
                    .to_string(),
                input_schema: tools::retrieve::schema(),
            },
            ToolDescription {
                name: "memory_search_by_tag".to_string(),
                description: "Find memories matching any or all of a set of tags.".to_string(),
                input_schema: tools::search_by_tag::schema(),
            },
            ToolDescription {
                name: "memory_delete".to_string(),
                description: "Delete memories by content hash, tag set, or timeframe.".to_string(),
                input_schema: tools::delete::schema(),
            },
            ToolDescription {
                name: "memory_stats".to_string(),
                description: "Aggregate counts and backend identity.".to_string(),
                input_schema: tools::stats::schema(),
            },
            ToolDescription {
                name: "memory_health".to_string(),
                description: "Cheap liveness and backend-identity check.".to_string(),
                input_schema: tools::health::schema(),
            },
            ToolDescription {
                name: "memory_sync_status".to_string(),
                description: "Hybrid backend sync queue status.".to_string(),
                input_schema: tools::sync_status::schema(),
            },
            ToolDescription {
                name: "consolidate".to_string(),
                description: "Run the consolidation pipeline once, synchronously.".to_string(),
                input_schema: tools::consolidate::schema(),
            },
        ];

        serde_json::to_value(ListToolsResult { tools }).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("missing tool call parameters")),
        };

        self.tool_call_count.fetch_add(1, Ordering::Relaxed);

        let result = match request.name.as_str() {
            "memory_store" => tools::store::execute(&self.facade, request.arguments).await,
            "memory_retrieve" => tools::retrieve::execute(&self.facade, request.arguments).await,
            "memory_search_by_tag" => tools::search_by_tag::execute(&self.facade, request.arguments).await,
            "memory_delete" => tools::delete::execute(&self.facade, request.arguments).await,
            "memory_stats" => tools::stats::execute(&self.facade, request.arguments).await,
            "memory_health" => tools::health::execute(&self.facade, request.arguments).await,
            "memory_sync_status" => tools::sync_status::execute(&self.facade, request.arguments).await,
            "consolidate" => tools::consolidate::execute(&self.consolidation, request.arguments).await,
            other => return Err(JsonRpcError::method_not_found_with_message(&format!("unknown tool '{other}'"))),
        };

        match result {
            Ok(value) => Ok(serde_json::json!({
                "content": [{"type": "text", "text": value.to_string()}],
                "isError": false,
            })),
            Err(message) => Ok(serde_json::json!({
                "content": [{"type": "text", "text": message}],
                "isError": true,
            })),
        }
    }
}
