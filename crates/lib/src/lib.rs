//! Flightdeck core library: records, backend connection, interaction models,
//! dispatcher, and the WebSocket gateway used by the CLI.

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod init;
pub mod interaction;
pub mod model;

pub use error::GatewayError;
