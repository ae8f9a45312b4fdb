//! MCP Protocol Implementation
//!
//! JSON-RPC 2.0 over stdio and Streamable HTTP for the Model Context Protocol.

pub mod http;
pub mod stdio;
pub mod types;
