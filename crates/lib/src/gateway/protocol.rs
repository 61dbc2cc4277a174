//! WebSocket frame types (requests, payload elements, completion, cancellation).
//!
//! The same frame set is spoken on both sides of the gateway: clients use it
//! towards the gateway, and the gateway uses it towards the backend.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};

/// Protocol version reported by the health probe.
pub const PROTOCOL_VERSION: u32 = 1;

/// Wire frame: `{ "type": "req" | "next" | "complete" | "error" | "cancel" | "event", ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Open request `id` on `route`, optionally carrying the first inbound payload.
    Req {
        id: String,
        route: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    /// One payload element for request `id` (inbound payload or reply element).
    Next { id: String, data: serde_json::Value },
    /// The sender's sequence for `id` is finished.
    Complete { id: String },
    /// Terminal failure of request `id`.
    Error {
        id: String,
        code: String,
        message: String,
    },
    /// Stop request `id`; no more frames are wanted.
    Cancel { id: String },
    /// Connection-level event (e.g. shutdown), not tied to a request.
    Event { event: String },
}

impl Frame {
    pub fn error(id: impl Into<String>, err: &GatewayError) -> Self {
        Frame::Error {
            id: id.into(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn shutdown() -> Self {
        Frame::Event {
            event: "shutdown".to_string(),
        }
    }

    /// Request id this frame belongs to, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            Frame::Req { id, .. }
            | Frame::Next { id, .. }
            | Frame::Complete { id }
            | Frame::Error { id, .. }
            | Frame::Cancel { id } => Some(id),
            Frame::Event { .. } => None,
        }
    }

    /// True for frames after which no more frames follow for the same id.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Frame::Complete { .. } | Frame::Error { .. } | Frame::Cancel { .. }
        )
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Map an `error` frame received from the backend onto the gateway taxonomy.
pub fn backend_error(code: &str, message: &str) -> GatewayError {
    match code {
        "invalidPayload" => GatewayError::InvalidPayload(message.to_string()),
        _ => GatewayError::BackendUnavailable(message.to_string()),
    }
}
