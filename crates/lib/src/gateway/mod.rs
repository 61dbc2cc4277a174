//! Gateway: HTTP + WebSocket front door.
//!
//! Single port serves a health probe and the WebSocket endpoint. Clients open
//! requests with `req` frames and the gateway relays each to the dispatcher.

pub mod protocol;
mod server;

pub use protocol::{Frame, PROTOCOL_VERSION};
pub use server::{run_gateway, GatewayState};
