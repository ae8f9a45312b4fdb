//! One module per MCP tool. Each exposes `schema()` (the JSON Schema used
//! by `tools/list`) and `execute()` (the handler invoked by `tools/call`),
//! operating purely against a [`memvault_core::MemoryFacade`] — no tool
//! talks to a storage backend directly.

pub mod consolidate;
pub mod delete;
pub mod health;
pub mod retrieve;
pub mod search_by_tag;
pub mod stats;
pub mod store;
pub mod sync_status;
