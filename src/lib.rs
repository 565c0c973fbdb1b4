#![forbid(unsafe_code)]

//! Model Context Protocol engine.
//!
//! - [`protocol`]: JSON-RPC 2.0 messages and MCP payloads.
//! - [`transport`]: stdio, in-memory, and streamable HTTP client transports.
//! - [`engine`]: request correlation, timeouts, capability gating, dispatch.
//! - [`http`]: the streamable HTTP server and its session table.
//! - [`server`] and [`client`]: the two protocol roles built on the engine.

pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod http;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use config::GlobalConfig;
pub use engine::{Engine, EngineConfig, RequestOptions};
pub use errors::{AppError, Result};
pub use server::McpServer;
