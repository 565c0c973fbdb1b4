//! Model Context Protocol wire model.
//!
//! - [`message`]: JSON-RPC 2.0 messages, error codes and frames.
//! - [`methods`]: method names and the method → capability map.
//! - [`capabilities`]: the advertised capability tree.
//! - [`lifecycle`]: `initialize` payloads, protocol versions and progress.

pub mod capabilities;
pub mod lifecycle;
pub mod message;
pub mod methods;

pub use capabilities::Capabilities;
pub use lifecycle::{Implementation, InitializeParams, InitializeResult, Progress};
pub use message::{ErrorObject, Frame, Message, Notification, Request, RequestId, Response};
pub use methods::Capability;
