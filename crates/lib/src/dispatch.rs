//! Inbound dispatcher: route name → interaction handler, built once at startup.

use crate::backend::BackendConnector;
use crate::error::GatewayError;
use crate::interaction::{
    self, Channel, FireAndForget, Inbound, InteractionHandler, ReplyStream, RequestResponse,
    RequestStream,
};
use std::collections::HashMap;
use std::sync::Arc;

pub const ROUTE_REQUEST_RESPONSE: &str = "reqresp";
pub const ROUTE_REQUEST_STREAM: &str = "reqstream";
pub const ROUTE_FIRE_AND_FORGET: &str = "fireforget";
pub const ROUTE_CHANNEL: &str = "channel";

const DEFAULT_REPLY_BUFFER: usize = 32;

/// Registry of route names to handlers. Read-only once serving starts.
pub struct Dispatcher {
    routes: HashMap<String, Arc<dyn InteractionHandler>>,
    reply_buffer: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_REPLY_BUFFER)
    }
}

impl Dispatcher {
    /// Empty registry; `reply_buffer` bounds undelivered replies per invocation.
    pub fn new(reply_buffer: usize) -> Self {
        Self {
            routes: HashMap::new(),
            reply_buffer,
        }
    }

    /// The four gateway routes, all sharing `backend`.
    pub fn with_default_routes(backend: BackendConnector, reply_buffer: usize) -> Self {
        let mut d = Self::new(reply_buffer);
        d.register(
            ROUTE_REQUEST_RESPONSE,
            Arc::new(RequestResponse::new(backend.clone())),
        );
        d.register(
            ROUTE_REQUEST_STREAM,
            Arc::new(RequestStream::new(backend.clone())),
        );
        d.register(ROUTE_FIRE_AND_FORGET, Arc::new(FireAndForget::default()));
        d.register(ROUTE_CHANNEL, Arc::new(Channel::new(backend)));
        d
    }

    /// Register `handler` under `route`, replacing any previous one.
    pub fn register(&mut self, route: impl Into<String>, handler: Arc<dyn InteractionHandler>) {
        let route = route.into();
        if self.routes.insert(route.clone(), handler).is_some() {
            log::debug!("route {} re-registered", route);
        }
    }

    pub fn get(&self, route: &str) -> Option<Arc<dyn InteractionHandler>> {
        self.routes.get(route).cloned()
    }

    /// Registered route names, sorted.
    pub fn routes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start the handler for `route` on `inbound`. Unknown routes fail before
    /// anything is spawned.
    pub fn dispatch(&self, route: &str, inbound: Inbound) -> Result<ReplyStream, GatewayError> {
        let handler = self
            .get(route)
            .ok_or_else(|| GatewayError::RouteNotFound(route.to_string()))?;
        log::debug!("dispatching {} ({:?})", route, handler.model());
        Ok(interaction::invoke(route, handler, inbound, self.reply_buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::InteractionModel;

    #[tokio::test]
    async fn unknown_route_is_route_not_found() {
        let d = Dispatcher::default();
        let err = d.dispatch("bogus", Inbound::from_values([])).err();
        assert_eq!(err, Some(GatewayError::RouteNotFound("bogus".into())));
    }

    #[tokio::test]
    async fn registered_route_is_listed() {
        let mut d = Dispatcher::default();
        d.register(ROUTE_FIRE_AND_FORGET, Arc::new(FireAndForget::default()));
        assert_eq!(d.routes(), vec!["fireforget".to_string()]);
        assert_eq!(
            d.get("fireforget").map(|h| h.model()),
            Some(InteractionModel::FireAndForget)
        );
    }
}
