//! perplexity-mcp serves Perplexity's chat completion and search APIs as
//! Model Context Protocol tools.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`api`] defines the Perplexity request/response payloads and validates
//!   tool-supplied conversations.
//! - [`core`] owns configuration, the error taxonomy, the proxy-aware
//!   transport and the completion and search clients built on it.
//! - [`mcp`] provides the protocol side: tool catalog, JSON-RPC dispatch,
//!   the session manager and the stdio and streamable HTTP hosts.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod logging;
pub mod mcp;
pub mod utils;
