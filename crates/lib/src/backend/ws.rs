//! WebSocket link to the backend: one socket, many subscriptions multiplexed by id.
//!
//! The socket is opened on first use and opened again on the next subscribe
//! after it drops. An unreachable backend fails only the subscribe that hit it.
//!
//! The reader task never waits on a subscriber. Each subscription has its own
//! relay task draining an unbounded queue into the subscription's bounded
//! buffer; a subscription that falls `max_pending` elements behind is failed
//! and cancelled upstream on its own.

use crate::backend::connection::{BackendItem, Connection, Subscription, SubscriptionFeed};
use crate::error::GatewayError;
use crate::gateway::protocol::{backend_error, Frame};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Reader-side end of one open subscription.
struct Inflight {
    queue: mpsc::UnboundedSender<BackendItem>,
    /// Elements queued but not yet handed to the subscription buffer.
    pending: Arc<AtomicUsize>,
}

type Streams = Mutex<HashMap<String, Inflight>>;

fn lock(streams: &Streams) -> MutexGuard<'_, HashMap<String, Inflight>> {
    streams.lock().unwrap_or_else(|e| e.into_inner())
}

fn link_closed() -> GatewayError {
    GatewayError::BackendUnavailable("backend connection closed".to_string())
}

/// One live socket plus the demux table of its open subscriptions.
struct Link {
    outbound: mpsc::UnboundedSender<Frame>,
    streams: Streams,
    closed: CancellationToken,
    max_pending: usize,
}

impl Link {
    async fn connect(
        url: &str,
        timeout: Duration,
        max_pending: usize,
    ) -> Result<Arc<Link>, GatewayError> {
        let (ws, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| GatewayError::BackendUnavailable(format!("connect to {} timed out", url)))?
            .map_err(|e| GatewayError::BackendUnavailable(format!("connect to {}: {}", url, e)))?;
        let (mut sink, mut stream) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let link = Arc::new(Link {
            outbound,
            streams: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
            max_pending: max_pending.max(1),
        });
        log::info!("backend link established to {}", url);

        let closed = link.closed.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = closed.cancelled() => break,
                    f = outbound_rx.recv() => f,
                };
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(Message::Text(frame.to_text())).await {
                    log::warn!("backend write failed: {}", e);
                    break;
                }
            }
            closed.cancel();
            let _ = sink.close().await;
        });

        let reader = link.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    biased;
                    _ = reader.closed.cancelled() => break,
                    m = stream.next() => m,
                };
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        log::warn!("backend read failed: {}", e);
                        break;
                    }
                    None => break,
                };
                let text = match msg {
                    Message::Text(t) => t,
                    Message::Close(_) => break,
                    _ => continue,
                };
                match Frame::parse(&text) {
                    Ok(frame) => reader.route(frame),
                    Err(e) => log::debug!("backend sent unreadable frame: {}", e),
                }
            }
            reader.close();
            log::info!("backend link to {} closed", url);
        });

        Ok(link)
    }

    /// Deliver one backend frame to the subscription it belongs to. Never blocks.
    fn route(&self, frame: Frame) {
        match frame {
            Frame::Next { id, data } => {
                let mut streams = lock(&self.streams);
                let Some(inflight) = streams.get(&id) else {
                    return;
                };
                if inflight.pending.fetch_add(1, Ordering::AcqRel) < self.max_pending {
                    let _ = inflight.queue.send(Ok(data));
                    return;
                }
                if let Some(inflight) = streams.remove(&id) {
                    drop(streams);
                    log::warn!(
                        "backend subscription {} fell {} elements behind, cancelling it",
                        id,
                        self.max_pending
                    );
                    let _ = inflight.queue.send(Err(GatewayError::BackendUnavailable(format!(
                        "subscription {} fell behind the backend",
                        id
                    ))));
                    let _ = self.outbound.send(Frame::Cancel { id });
                }
            }
            Frame::Complete { id } | Frame::Cancel { id } => {
                lock(&self.streams).remove(&id);
            }
            Frame::Error { id, code, message } => {
                if let Some(inflight) = lock(&self.streams).remove(&id) {
                    let _ = inflight.queue.send(Err(backend_error(&code, &message)));
                }
            }
            Frame::Event { event } => log::info!("backend event: {}", event),
            Frame::Req { id, .. } => log::debug!("ignoring backend-initiated request {}", id),
        }
    }

    /// Mark the link dead and fail every subscription still open on it.
    fn close(&self) {
        self.closed.cancel();
        let inflight: Vec<Inflight> = lock(&self.streams).drain().map(|(_, f)| f).collect();
        for f in inflight {
            let _ = f.queue.send(Err(link_closed()));
        }
    }
}

/// Move queued backend items into the subscription buffer at the subscriber's pace.
/// Sends `cancel {id}` upstream when the subscriber cancels or drops its handle
/// before the backend finished the sequence.
async fn relay(
    link: Arc<Link>,
    id: String,
    mut queue: mpsc::UnboundedReceiver<BackendItem>,
    pending: Arc<AtomicUsize>,
    feed: SubscriptionFeed,
) {
    loop {
        let item = tokio::select! {
            biased;
            _ = feed.cancel.cancelled() => break,
            item = queue.recv() => item,
        };
        let Some(item) = item else {
            return;
        };
        if item.is_ok() {
            pending.fetch_sub(1, Ordering::AcqRel);
        }
        if !feed.send(item).await {
            break;
        }
    }
    if lock(&link.streams).remove(&id).is_some() {
        let _ = link.outbound.send(Frame::Cancel { id: id.clone() });
        log::debug!("backend subscription {} cancelled", id);
    }
}

/// Shared backend connection over WebSocket.
pub struct WsConnection {
    url: String,
    buffer: usize,
    connect_timeout: Duration,
    max_pending: usize,
    link: Mutex<Option<Arc<Link>>>,
    connecting: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

impl WsConnection {
    /// Create the connection handle; the socket itself opens on first subscribe.
    ///
    /// `buffer` bounds each subscription's undelivered elements; beyond that up
    /// to `max_pending` more are queued before the subscription is failed.
    pub fn new(
        url: impl Into<String>,
        buffer: usize,
        connect_timeout: Duration,
        max_pending: usize,
    ) -> Self {
        Self {
            url: url.into(),
            buffer,
            connect_timeout,
            max_pending,
            link: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn current(&self) -> Option<Arc<Link>> {
        self.link
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|l| !l.closed.is_cancelled())
            .cloned()
    }

    async fn link(&self) -> Result<Arc<Link>, GatewayError> {
        if let Some(link) = self.current() {
            return Ok(link);
        }
        let _gate = self.connecting.lock().await;
        if let Some(link) = self.current() {
            return Ok(link);
        }
        let link = Link::connect(&self.url, self.connect_timeout, self.max_pending).await?;
        *self.link.lock().unwrap_or_else(|e| e.into_inner()) = Some(link.clone());
        Ok(link)
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn subscribe(
        &self,
        route: &str,
        data: serde_json::Value,
    ) -> Result<Subscription, GatewayError> {
        let link = self.link().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (sub, feed) = Subscription::channel(self.buffer);
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        lock(&link.streams).insert(
            id.clone(),
            Inflight {
                queue,
                pending: pending.clone(),
            },
        );

        // A close that started before the insert has already drained the table.
        let req = Frame::Req {
            id: id.clone(),
            route: route.to_string(),
            data: Some(data),
        };
        if link.closed.is_cancelled() || link.outbound.send(req).is_err() {
            lock(&link.streams).remove(&id);
            return Err(link_closed());
        }
        log::debug!("backend subscription {} opened on {}", id, route);

        tokio::spawn(relay(link, id, queue_rx, pending, feed));
        Ok(sub)
    }

    fn open_subscriptions(&self) -> usize {
        self.current().map(|l| lock(&l.streams).len()).unwrap_or(0)
    }

    fn is_connected(&self) -> bool {
        self.current().is_some()
    }
}
