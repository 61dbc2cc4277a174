//! Shared backend connection contract and the per-request subscription handle.

use crate::error::GatewayError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// One element (or terminal failure) of a backend sequence, still undecoded.
pub type BackendItem = Result<serde_json::Value, GatewayError>;

/// Process-wide handle to the backend. Implementations must allow concurrent
/// `subscribe` calls from many handlers without locking in handler code.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open a new lazy sequence on `route` with `data` as the request payload.
    async fn subscribe(
        &self,
        route: &str,
        data: serde_json::Value,
    ) -> Result<Subscription, GatewayError>;

    /// Number of subscriptions currently open on this connection.
    fn open_subscriptions(&self) -> usize;

    /// Whether the underlying link is currently up.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Producer half of a subscription, held by whatever task feeds it.
#[derive(Clone)]
pub struct SubscriptionFeed {
    pub tx: mpsc::Sender<BackendItem>,
    pub cancel: CancellationToken,
}

impl SubscriptionFeed {
    /// Forward one item; false when the subscription was cancelled or its handle dropped.
    pub async fn send(&self, item: BackendItem) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            r = self.tx.send(item) => r.is_ok(),
        }
    }
}

/// Exclusive handle to one active backend sequence.
///
/// Dropping the handle cancels the sequence. `cancel` is idempotent.
pub struct Subscription<T = serde_json::Value> {
    rx: mpsc::Receiver<BackendItem>,
    cancel: CancellationToken,
    _guard: DropGuard,
    _item: PhantomData<fn() -> T>,
}

impl Subscription {
    /// Create a linked handle/feed pair with room for `buffer` undelivered items.
    pub fn channel(buffer: usize) -> (Subscription, SubscriptionFeed) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        let sub = Subscription {
            rx,
            cancel: cancel.clone(),
            _guard: cancel.clone().drop_guard(),
            _item: PhantomData,
        };
        (sub, SubscriptionFeed { tx, cancel })
    }
}

impl<T> Subscription<T> {
    /// Reinterpret elements as `U` (decoded on `next`).
    pub fn typed<U>(self) -> Subscription<U> {
        Subscription {
            rx: self.rx,
            cancel: self.cancel,
            _guard: self._guard,
            _item: PhantomData,
        }
    }

    /// Cancel the sequence. Safe to call any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<T: DeserializeOwned> Subscription<T> {
    /// Next element in backend order. `None` once the backend completed or after cancel.
    pub async fn next(&mut self) -> Option<Result<T, GatewayError>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let item = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            item = self.rx.recv() => item?,
        };
        Some(item.and_then(|v| serde_json::from_value(v).map_err(GatewayError::from)))
    }
}
