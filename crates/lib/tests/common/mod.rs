//! Scripted in-memory backend connection for interaction-model tests.

#![allow(dead_code)]

pub mod fake_backend;

use async_trait::async_trait;
use flightdeck::backend::{BackendConnector, Connection, Subscription};
use flightdeck::dispatch::Dispatcher;
use flightdeck::interaction::{ReplyEvent, ReplyStream};
use flightdeck::model::AircraftState;
use flightdeck::GatewayError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What one backend subscription does.
#[derive(Clone)]
pub enum Script {
    /// Emit these aircraft, then complete.
    Complete(Vec<AircraftState>),
    /// Emit these aircraft, then stay open until cancelled.
    Hang(Vec<AircraftState>),
    /// Emit these aircraft with `delay` before each, then complete.
    Paced(Vec<AircraftState>, Duration),
    /// Refuse the subscription.
    Unavailable,
}

struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockConnection {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
    open: Arc<AtomicUsize>,
    opened: AtomicUsize,
}

impl MockConnection {
    /// Every subscription follows `fallback` once `scripts` run out.
    pub fn new(scripts: Vec<Script>, fallback: Script) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            fallback,
            open: Arc::new(AtomicUsize::new(0)),
            opened: AtomicUsize::new(0),
        })
    }

    pub fn always(script: Script) -> Arc<Self> {
        Self::new(Vec::new(), script)
    }

    /// Subscriptions ever requested (including refused ones).
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Wait (bounded) until no subscription is open; returns the final count.
    pub async fn settle(&self) -> usize {
        for _ in 0..200 {
            if self.open_subscriptions() == 0 {
                return 0;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.open_subscriptions()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn subscribe(
        &self,
        route: &str,
        data: serde_json::Value,
    ) -> Result<Subscription, GatewayError> {
        assert_eq!(route, "acstream");
        assert!(data.is_string(), "timestamp payload expected, got {}", data);
        self.opened.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let (items, delay, hang) = match script {
            Script::Unavailable => {
                return Err(GatewayError::BackendUnavailable("scripted refusal".into()))
            }
            Script::Complete(items) => (items, None, false),
            Script::Hang(items) => (items, None, true),
            Script::Paced(items, d) => (items, Some(d), false),
        };

        let (sub, feed) = Subscription::channel(4);
        self.open.fetch_add(1, Ordering::SeqCst);
        let guard = OpenGuard(self.open.clone());
        tokio::spawn(async move {
            let _guard = guard;
            for ac in items {
                if let Some(d) = delay {
                    tokio::select! {
                        _ = feed.cancel.cancelled() => return,
                        _ = tokio::time::sleep(d) => {}
                    }
                }
                let v = serde_json::to_value(&ac).unwrap();
                if !feed.send(Ok(v)).await {
                    return;
                }
            }
            if hang {
                feed.cancel.cancelled().await;
            }
        });
        Ok(sub)
    }

    fn open_subscriptions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

pub fn aircraft(callsign: &str) -> AircraftState {
    AircraftState {
        callsign: callsign.to_string(),
        registration: format!("N{}", callsign.len()),
        flight_number: format!("FD{}", callsign),
        kind: "B738".to_string(),
        altitude: 35000,
        heading: 90,
        speed: 450,
        latitude: 38.75,
        longitude: -90.37,
    }
}

pub fn fleet(prefix: &str, n: usize) -> Vec<AircraftState> {
    (0..n).map(|i| aircraft(&format!("{}-{}", prefix, i))).collect()
}

pub fn dispatcher(conn: Arc<MockConnection>) -> Dispatcher {
    dispatcher_with_buffer(conn, 8)
}

pub fn dispatcher_with_buffer(conn: Arc<MockConnection>, reply_buffer: usize) -> Dispatcher {
    Dispatcher::with_default_routes(BackendConnector::new(conn, "acstream"), reply_buffer)
}

/// Poll `cond` for up to two seconds; true once it holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Next reply event, failing the test if none arrives within two seconds.
pub async fn next_event(replies: &mut ReplyStream) -> Option<ReplyEvent> {
    tokio::time::timeout(Duration::from_secs(2), replies.next())
        .await
        .expect("reply stream stalled")
}

/// Drain a reply to its end: decoded aircraft and the terminal error, if any.
pub async fn collect(replies: &mut ReplyStream) -> (Vec<AircraftState>, Option<GatewayError>) {
    let mut out = Vec::new();
    while let Some(ev) = next_event(replies).await {
        match ev {
            ReplyEvent::Next(v) => out.push(serde_json::from_value(v).unwrap()),
            ReplyEvent::Error(e) => return (out, Some(e)),
        }
    }
    (out, None)
}

pub fn callsign(ev: ReplyEvent) -> String {
    match ev {
        ReplyEvent::Next(v) => serde_json::from_value::<AircraftState>(v).unwrap().callsign,
        ReplyEvent::Error(e) => panic!("unexpected error: {}", e),
    }
}
