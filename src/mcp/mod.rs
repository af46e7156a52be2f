//! MCP server exposing similar-note queries and index maintenance

mod server;

pub use server::run_mcp_server;
