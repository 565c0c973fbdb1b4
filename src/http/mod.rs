//! Server side of the streamable HTTP transport.
//!
//! - [`session`]: the session table, per-session engines, SSE fan-out and keepalive.
//! - [`routes`]: the axum router and the serve loop.

pub mod routes;
pub mod session;

pub use routes::{router, serve_http, serve_listener};
pub use session::{Delivery, SessionManager, SessionStart};
