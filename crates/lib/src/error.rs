//! Gateway error taxonomy shared by the backend link, handlers, and dispatcher.

/// Failure of a single inbound request. Never fatal to the process or to other requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The shared backend connection cannot be reached or a subscription request failed.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    /// The dispatcher has no handler registered under this route name.
    #[error("route not found: {0}")]
    RouteNotFound(String),
    /// An inbound or backend payload did not match the expected record shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// The caller went away. A normal cancellation signal, not a fault.
    #[error("caller disconnected")]
    CallerDisconnected,
}

impl GatewayError {
    /// True for the caller-went-away signal, which is swallowed at the boundary.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, GatewayError::CallerDisconnected)
    }

    /// Stable wire code used in `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BackendUnavailable(_) => "backendUnavailable",
            GatewayError::RouteNotFound(_) => "routeNotFound",
            GatewayError::InvalidPayload(_) => "invalidPayload",
            GatewayError::CallerDisconnected => "callerDisconnected",
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::InvalidPayload(e.to_string())
    }
}
