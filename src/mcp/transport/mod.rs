//! Hosts that carry MCP traffic: a single stdio client, or many sessions
//! over streamable HTTP.

pub mod stdio;
pub mod streamable_http;
