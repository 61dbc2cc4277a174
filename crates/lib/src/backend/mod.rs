//! Backend connector: the single shared outbound connection and the two fetches
//! the interaction handlers need from it.

mod connection;
mod ws;

pub use connection::{BackendItem, Connection, Subscription, SubscriptionFeed};
pub use ws::WsConnection;

use crate::error::GatewayError;
use crate::model::{AircraftState, Timestamp};
use std::sync::Arc;

/// Default backend route returning the aircraft stream.
pub const DEFAULT_ROUTE: &str = "acstream";

/// Cheap to clone; every clone shares the same connection.
#[derive(Clone)]
pub struct BackendConnector {
    connection: Arc<dyn Connection>,
    route: String,
}

impl BackendConnector {
    pub fn new(connection: Arc<dyn Connection>, route: impl Into<String>) -> Self {
        Self {
            connection,
            route: route.into(),
        }
    }

    /// Open a new aircraft stream, sending the current instant as the request payload.
    pub async fn fetch_stream(&self) -> Result<Subscription<AircraftState>, GatewayError> {
        let now = Timestamp::now();
        let sub = self
            .connection
            .subscribe(&self.route, serde_json::to_value(now)?)
            .await?;
        Ok(sub.typed())
    }

    /// First element of a fresh aircraft stream; the subscription is released right after.
    /// `Ok(None)` when the backend completes without producing anything.
    pub async fn fetch_one(&self) -> Result<Option<AircraftState>, GatewayError> {
        let mut sub = self.fetch_stream().await?;
        let first = sub.next().await.transpose();
        sub.cancel();
        first
    }
}
