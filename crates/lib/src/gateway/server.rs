//! Gateway HTTP + WebSocket server (single port).

use crate::backend::{BackendConnector, Connection, WsConnection};
use crate::config::{self, Config};
use crate::dispatch::Dispatcher;
use crate::gateway::protocol::{Frame, PROTOCOL_VERSION};
use crate::interaction::{Inbound, ReplyEvent, ReplyStream};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Shared state for the gateway (config, dispatcher, backend connection).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    /// The single backend connection every handler subscribes through.
    pub connection: Arc<dyn Connection>,
    /// Backend URL resolved at startup, reported by the health probe.
    pub backend_url: String,
    /// Broadcasts connection-level events (e.g. shutdown) to connected clients.
    pub event_tx: broadcast::Sender<Frame>,
}

impl GatewayState {
    /// Build the state around `connection`: registers the four default routes.
    pub fn new(config: Config, connection: Arc<dyn Connection>, backend_url: String) -> Self {
        let backend = BackendConnector::new(connection.clone(), config.backend.route.clone());
        let dispatcher = Dispatcher::with_default_routes(backend, config.gateway.reply_buffer);
        let (event_tx, _) = broadcast::channel(16);
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            connection,
            backend_url,
            event_tx,
        }
    }
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// The backend connection is created here once and opened on first use.
/// Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        log::warn!("gateway bound to non-loopback address {} without authentication", bind);
    }

    let backend_url = config::resolve_backend_url(&config);
    let connection = Arc::new(WsConnection::new(
        backend_url.clone(),
        config.backend.buffer_size,
        config.backend.connect_timeout(),
        config.backend.max_pending,
    ));
    log::info!(
        "backend {} route {} (connects on first request)",
        connection.url(),
        config.backend.route
    );

    let port = config.gateway.port;
    let state = GatewayState::new(config, connection, backend_url);
    let event_tx = state.event_tx.clone();
    let app = Router::new()
        .route("/", get(health_http))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(event_tx))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Broadcasts a shutdown event so WebSocket sessions close and cancel their requests.
async fn shutdown_signal(event_tx: broadcast::Sender<Frame>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, broadcasting shutdown and draining connections");
    let _ = event_tx.send(Frame::shutdown());
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "protocol": PROTOCOL_VERSION,
        "port": state.config.gateway.port,
        "backend": state.backend_url,
        "backendConnected": state.connection.is_connected(),
        "openSubscriptions": state.connection.open_subscriptions(),
        "routes": state.dispatcher.routes(),
    }))
}

/// GET /ws upgrades to WebSocket; requests are multiplexed by id over the socket.
async fn ws_handler(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One in-flight request on a socket.
struct ActiveRequest {
    /// Feeds the handler's inbound sequence; `None` once the client completed it.
    inbound: Option<mpsc::UnboundedSender<serde_json::Value>>,
    cancel: CancellationToken,
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let client = uuid::Uuid::new_v4();
    log::info!("client {} connected", client);
    let mut event_rx = state.event_tx.subscribe();
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(state.config.gateway.reply_buffer.max(1));
    let mut active: HashMap<String, ActiveRequest> = HashMap::new();

    loop {
        tokio::select! {
            biased;

            event = event_rx.recv() => {
                match event {
                    Ok(frame) => {
                        let _ = socket.send(Message::Text(frame.to_text())).await;
                        if frame == Frame::shutdown() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("ws client lagged {} broadcast events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            Some(frame) = out_rx.recv() => {
                if frame.is_terminal() {
                    if let Some(id) = frame.id() {
                        active.remove(id);
                    }
                }
                if socket.send(Message::Text(frame.to_text())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let frame = match Frame::parse(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        log::debug!("client {} sent unreadable frame: {}", client, e);
                        continue;
                    }
                };
                match frame {
                    Frame::Req { id, route, data } => {
                        if active.contains_key(&id) {
                            let err = crate::GatewayError::InvalidPayload(format!("request id {} already in use", id));
                            let _ = socket.send(Message::Text(Frame::error(&id, &err).to_text())).await;
                            continue;
                        }
                        let (inbound_tx, inbound) = Inbound::channel();
                        if let Some(data) = data {
                            let _ = inbound_tx.send(data);
                        }
                        match state.dispatcher.dispatch(&route, inbound) {
                            Ok(replies) => {
                                active.insert(id.clone(), ActiveRequest {
                                    inbound: Some(inbound_tx),
                                    cancel: replies.cancel_token(),
                                });
                                tokio::spawn(forward_replies(id, replies, out_tx.clone()));
                            }
                            Err(e) => {
                                log::debug!("client {}: {}", client, e);
                                if socket.send(Message::Text(Frame::error(&id, &e).to_text())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Frame::Next { id, data } => {
                        if let Some(tx) = active.get(&id).and_then(|r| r.inbound.as_ref()) {
                            let _ = tx.send(data);
                        }
                    }
                    Frame::Complete { id } => {
                        if let Some(req) = active.get_mut(&id) {
                            req.inbound = None;
                        }
                    }
                    Frame::Cancel { id } => {
                        if let Some(req) = active.remove(&id) {
                            req.cancel.cancel();
                            log::debug!("client {} cancelled request {}", client, id);
                        }
                    }
                    Frame::Error { .. } | Frame::Event { .. } => {}
                }
            }
        }
    }

    for (_, req) in active.drain() {
        req.cancel.cancel();
    }
    log::info!("client {} disconnected, bye for now", client);
}

/// Relay one invocation's replies to the socket as frames for `id`.
async fn forward_replies(id: String, mut replies: ReplyStream, out_tx: mpsc::Sender<Frame>) {
    while let Some(event) = replies.next().await {
        let frame = match event {
            ReplyEvent::Next(data) => Frame::Next {
                id: id.clone(),
                data,
            },
            ReplyEvent::Error(e) => Frame::error(&id, &e),
        };
        let terminal = frame.is_terminal();
        if out_tx.send(frame).await.is_err() || terminal {
            return;
        }
    }
    if !replies.is_cancelled() {
        let _ = out_tx.send(Frame::Complete { id }).await;
    }
}
