//! Bidirectional channel: every weather report switches the caller onto a
//! fresh backend aircraft stream.
//!
//! The invocation keeps a single slot for the live subscription. A new report
//! cancels and clears the slot before the next stream is installed, and the
//! same task both switches and forwards, so nothing from a superseded stream
//! is forwarded once the new stream is in place.

use super::{Inbound, InteractionHandler, InteractionModel, ReplySink};
use crate::backend::{BackendConnector, Subscription};
use crate::error::GatewayError;
use crate::model::{AircraftState, WeatherReport};
use async_trait::async_trait;

pub struct Channel {
    backend: BackendConnector,
}

impl Channel {
    pub fn new(backend: BackendConnector) -> Self {
        Self { backend }
    }

    /// Cancel the live stream, if any, and install a fresh one for `report`.
    async fn switch(
        &self,
        report: Result<WeatherReport, GatewayError>,
        live: &mut Option<Subscription<AircraftState>>,
    ) -> Result<(), GatewayError> {
        let report = report?;
        log::info!("channel: weather {}", report);
        if let Some(previous) = live.take() {
            previous.cancel();
        }
        *live = Some(self.backend.fetch_stream().await?);
        Ok(())
    }
}

async fn next_aircraft(
    live: &mut Option<Subscription<AircraftState>>,
) -> Option<Result<AircraftState, GatewayError>> {
    match live {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl InteractionHandler for Channel {
    fn model(&self) -> InteractionModel {
        InteractionModel::Channel
    }

    async fn handle(&self, mut inbound: Inbound, sink: &ReplySink) -> Result<(), GatewayError> {
        log::info!("channel: subscribed to weather");
        let mut live: Option<Subscription<AircraftState>> = None;
        let mut inbound_open = true;

        loop {
            tokio::select! {
                biased;

                report = inbound.next::<WeatherReport>(), if inbound_open => match report {
                    Some(report) => self.switch(report, &mut live).await?,
                    None => {
                        inbound_open = false;
                        if live.is_none() {
                            return Ok(());
                        }
                    }
                },

                aircraft = next_aircraft(&mut live), if live.is_some() => match aircraft {
                    Some(aircraft) => {
                        let aircraft = aircraft?;
                        // A report arriving while the caller holds us back supersedes
                        // the element still waiting to be sent.
                        let interrupted = tokio::select! {
                            biased;
                            report = inbound.next::<WeatherReport>(), if inbound_open => Some(report),
                            sent = sink.next(&aircraft) => {
                                sent?;
                                None
                            }
                        };
                        match interrupted {
                            Some(Some(report)) => self.switch(report, &mut live).await?,
                            Some(None) => {
                                inbound_open = false;
                                sink.next(&aircraft).await?;
                            }
                            None => {}
                        }
                    }
                    None => {
                        live = None;
                        if !inbound_open {
                            return Ok(());
                        }
                    }
                },
            }
        }
    }
}
