//! Interaction models: how one inbound request becomes backend traffic and replies.
//!
//! Every invocation runs as its own task. The task owns whatever backend
//! subscriptions the handler opens, so cancelling the invocation (or dropping
//! its [`ReplyStream`]) drops them too.

mod channel;
mod fire_forget;
mod request_response;
mod request_stream;

pub use channel::Channel;
pub use fire_forget::{FireAndForget, LogObserver, WeatherObserver};
pub use request_response::RequestResponse;
pub use request_stream::RequestStream;

use crate::error::GatewayError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// The four request/reply shapes the gateway supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionModel {
    RequestResponse,
    RequestStream,
    FireAndForget,
    Channel,
}

/// Payload sequence sent by the caller. Ends when the caller completes it.
pub struct Inbound {
    rx: mpsc::UnboundedReceiver<serde_json::Value>,
}

impl Inbound {
    /// Open inbound sequence; drop the sender to complete it.
    pub fn channel() -> (mpsc::UnboundedSender<serde_json::Value>, Inbound) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Inbound { rx })
    }

    /// Already-completed inbound sequence holding `values`.
    pub fn from_values(values: impl IntoIterator<Item = serde_json::Value>) -> Inbound {
        let (tx, inbound) = Self::channel();
        for v in values {
            let _ = tx.send(v);
        }
        inbound
    }

    /// Next payload decoded as `T`; `None` once the caller completed the sequence.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Option<Result<T, GatewayError>> {
        let v = self.rx.recv().await?;
        Some(serde_json::from_value(v).map_err(GatewayError::from))
    }
}

/// One event of a reply sequence. The sequence completes when the stream ends.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyEvent {
    Next(serde_json::Value),
    Error(GatewayError),
}

/// Caller side of an invocation. Dropping it cancels the invocation.
pub struct ReplyStream {
    rx: mpsc::Receiver<ReplyEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl ReplyStream {
    /// Next reply event; `None` when the reply completed or was cancelled.
    pub async fn next(&mut self) -> Option<ReplyEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            ev = self.rx.recv() => ev,
        }
    }

    /// Cancel the invocation and everything it opened. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that cancels this invocation; lets another owner cancel it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Handler side of an invocation. Writes to a caller that is gone count as
/// cancellation, never as failure.
pub struct ReplySink {
    tx: mpsc::Sender<ReplyEvent>,
    cancel: CancellationToken,
}

impl ReplySink {
    /// Emit one reply element, waiting for the caller to make room.
    pub async fn next<T: Serialize>(&self, item: &T) -> Result<(), GatewayError> {
        let value = serde_json::to_value(item)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GatewayError::CallerDisconnected),
            r = self.tx.send(ReplyEvent::Next(value)) => r.map_err(|_| {
                log::debug!("reply dropped: caller disconnected");
                GatewayError::CallerDisconnected
            }),
        }
    }

    /// Terminate the reply with `err`. Swallowed when the caller is already gone.
    pub async fn error(&self, err: GatewayError) {
        if err.is_cancellation() || self.is_cancelled() {
            return;
        }
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            r = self.tx.send(ReplyEvent::Error(err)) => r.is_ok(),
        };
        if !sent {
            log::debug!("reply error dropped: caller disconnected");
        }
    }

    /// Resolves once the caller cancelled or went away.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

/// One interaction model bound to its collaborators.
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    fn model(&self) -> InteractionModel;

    /// Consume `inbound` and write replies to `sink`. Returning ends the reply:
    /// `Ok` completes it, `Err` fails it.
    async fn handle(&self, inbound: Inbound, sink: &ReplySink) -> Result<(), GatewayError>;
}

/// Start `handler` on `inbound` in its own task and return the caller side.
pub fn invoke(
    route: &str,
    handler: Arc<dyn InteractionHandler>,
    inbound: Inbound,
    buffer: usize,
) -> ReplyStream {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let cancel = CancellationToken::new();
    let sink = ReplySink {
        tx,
        cancel: cancel.clone(),
    };
    let route = route.to_string();
    tokio::spawn(async move {
        // Losing this race drops the handler future and every subscription it holds.
        let result = tokio::select! {
            biased;
            _ = sink.cancelled() => Err(GatewayError::CallerDisconnected),
            r = handler.handle(inbound, &sink) => r,
        };
        match result {
            Ok(()) => log::debug!("{}: reply complete", route),
            Err(e) if e.is_cancellation() => log::debug!("{}: caller disconnected", route),
            Err(e) => {
                log::warn!("{}: {}", route, e);
                sink.error(e).await;
            }
        }
    });
    ReplyStream {
        rx,
        cancel: cancel.clone(),
        _guard: cancel.drop_guard(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Fills a one-slot reply buffer, then fails.
    struct FillThenFail;

    #[async_trait]
    impl InteractionHandler for FillThenFail {
        fn model(&self) -> InteractionModel {
            InteractionModel::RequestStream
        }

        async fn handle(&self, _inbound: Inbound, sink: &ReplySink) -> Result<(), GatewayError> {
            sink.next(&1).await?;
            Err(GatewayError::BackendUnavailable("gone".into()))
        }
    }

    #[tokio::test]
    async fn error_follows_replies_already_sent() {
        let mut replies = invoke("test", Arc::new(FillThenFail), Inbound::from_values([]), 1);
        assert_eq!(replies.next().await, Some(ReplyEvent::Next(serde_json::json!(1))));
        assert_eq!(
            replies.next().await,
            Some(ReplyEvent::Error(GatewayError::BackendUnavailable("gone".into())))
        );
        assert_eq!(replies.next().await, None);
    }

    #[tokio::test]
    async fn cancel_releases_invocation_waiting_to_send_error() {
        let handler = Arc::new(FillThenFail);
        let replies = invoke("test", handler.clone(), Inbound::from_values([]), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Still running: the buffer is full and the error cannot be delivered yet.
        assert_eq!(Arc::strong_count(&handler), 2);

        replies.cancel();
        for _ in 0..200 {
            if Arc::strong_count(&handler) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(Arc::strong_count(&handler), 1, "invocation task still parked");
        drop(replies);
    }
}
