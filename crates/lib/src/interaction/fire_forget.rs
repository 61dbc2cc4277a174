//! Fire-and-forget: weather reports in, nothing out but the final acknowledgement.

use super::{Inbound, InteractionHandler, InteractionModel, ReplySink};
use crate::error::GatewayError;
use crate::model::WeatherReport;
use async_trait::async_trait;
use std::sync::Arc;

/// Side effect applied to each report. Failures are logged and never fail the request.
pub trait WeatherObserver: Send + Sync {
    fn observe(&self, report: &WeatherReport) -> anyhow::Result<()>;
}

/// Records each report in the log.
pub struct LogObserver;

impl WeatherObserver for LogObserver {
    fn observe(&self, report: &WeatherReport) -> anyhow::Result<()> {
        log::info!("fireforget: weather {}", report);
        Ok(())
    }
}

pub struct FireAndForget {
    observer: Arc<dyn WeatherObserver>,
}

impl FireAndForget {
    pub fn new(observer: Arc<dyn WeatherObserver>) -> Self {
        Self { observer }
    }
}

impl Default for FireAndForget {
    fn default() -> Self {
        Self::new(Arc::new(LogObserver))
    }
}

#[async_trait]
impl InteractionHandler for FireAndForget {
    fn model(&self) -> InteractionModel {
        InteractionModel::FireAndForget
    }

    async fn handle(&self, mut inbound: Inbound, _sink: &ReplySink) -> Result<(), GatewayError> {
        let mut observed = 0usize;
        while let Some(report) = inbound.next::<WeatherReport>().await {
            match report {
                Ok(report) => {
                    observed += 1;
                    if let Err(e) = self.observer.observe(&report) {
                        log::warn!("fireforget: observer failed: {:#}", e);
                    }
                }
                Err(e) => log::warn!("fireforget: skipping report: {}", e),
            }
        }
        log::debug!("fireforget: acknowledged {} report(s)", observed);
        Ok(())
    }
}
