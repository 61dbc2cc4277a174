//! In-process aircraft backend speaking the gateway frame protocol over WebSocket.
//!
//! What a request streams depends on its route:
//! - `hang`: one aircraft, then stays open until cancelled.
//! - `endless`: an aircraft every millisecond until cancelled.
//! - `broken`: an `error` frame.
//! - anything else: aircraft A1 and A2, then `complete`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use flightdeck::gateway::Frame;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Recorded {
    connections: AtomicUsize,
    requests: Mutex<Vec<String>>,
    cancels: Mutex<Vec<String>>,
}

struct Shared {
    recorded: Recorded,
    kill: broadcast::Sender<()>,
}

pub struct FakeBackend {
    pub port: u16,
    shared: Arc<Shared>,
}

impl FakeBackend {
    pub async fn start() -> FakeBackend {
        let (kill, _) = broadcast::channel(4);
        let shared = Arc::new(Shared {
            recorded: Recorded::default(),
            kill,
        });
        let app = Router::new()
            .route("/ws", get(upgrade))
            .with_state(shared.clone());
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind fake backend");
        let port = listener.local_addr().expect("local_addr").port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        FakeBackend { port, shared }
    }

    pub fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    /// WebSocket connections accepted so far.
    pub fn connections(&self) -> usize {
        self.shared.recorded.connections.load(Ordering::SeqCst)
    }

    /// Route of every `req` received, in order.
    pub fn requests(&self) -> Vec<String> {
        self.shared.recorded.requests.lock().unwrap().clone()
    }

    /// Id of every `cancel` received, in order.
    pub fn cancels(&self) -> Vec<String> {
        self.shared.recorded.cancels.lock().unwrap().clone()
    }

    /// Drop every socket open right now without a close handshake.
    pub fn kill(&self) {
        let _ = self.shared.kill.send(());
    }
}

/// Aircraft as the backend spells it (short field names).
pub fn aircraft_json(callsign: &str) -> serde_json::Value {
    json!({
        "callsign": callsign, "reg": "N8710M", "flightno": "WN1234", "type": "B38M",
        "altitude": 36000, "heading": 271, "speed": 452, "lat": 38.7, "lon": -90.3
    })
}

fn next(id: &str, callsign: &str) -> Frame {
    Frame::Next {
        id: id.to_string(),
        data: aircraft_json(callsign),
    }
}

async fn upgrade(State(shared): State<Arc<Shared>>, ws: WebSocketUpgrade) -> Response {
    shared.recorded.connections.fetch_add(1, Ordering::SeqCst);
    let kill = shared.kill.subscribe();
    ws.on_upgrade(move |socket| serve(socket, shared, kill))
}

async fn serve(socket: WebSocket, shared: Arc<Shared>, mut kill: broadcast::Receiver<()>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let stop = CancellationToken::new();
    let _stop_guard = stop.clone().drop_guard();
    let mut open: HashMap<String, CancellationToken> = HashMap::new();

    loop {
        tokio::select! {
            _ = kill.recv() => break,
            Some(frame) = out_rx.recv() => {
                if sink.send(Message::Text(frame.to_text())).await.is_err() {
                    break;
                }
            }
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(t))) => t,
                    Some(Ok(_)) => continue,
                    _ => break,
                };
                match Frame::parse(&text) {
                    Ok(Frame::Req { id, route, .. }) => {
                        shared.recorded.requests.lock().unwrap().push(route.clone());
                        let token = stop.child_token();
                        open.insert(id.clone(), token.clone());
                        tokio::spawn(produce(id, route, out_tx.clone(), token));
                    }
                    Ok(Frame::Cancel { id }) => {
                        shared.recorded.cancels.lock().unwrap().push(id.clone());
                        if let Some(token) = open.remove(&id) {
                            token.cancel();
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn produce(
    id: String,
    route: String,
    out: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
) {
    match route.as_str() {
        "hang" => {
            let _ = out.send(next(&id, "H1"));
            cancel.cancelled().await;
        }
        "endless" => {
            for i in 0u64.. {
                if out.send(next(&id, &format!("E-{}", i))).is_err() {
                    return;
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(1)) => {}
                }
            }
        }
        "broken" => {
            let _ = out.send(Frame::Error {
                id,
                code: "backendUnavailable".to_string(),
                message: "feed offline".to_string(),
            });
        }
        _ => {
            for cs in ["A1", "A2"] {
                let _ = out.send(next(&id, cs));
            }
            let _ = out.send(Frame::Complete { id });
        }
    }
}
