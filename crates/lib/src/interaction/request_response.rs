//! Request-response: one timestamp in, at most one aircraft out.

use super::{Inbound, InteractionHandler, InteractionModel, ReplySink};
use crate::backend::BackendConnector;
use crate::error::GatewayError;
use crate::model::Timestamp;
use async_trait::async_trait;

pub struct RequestResponse {
    backend: BackendConnector,
}

impl RequestResponse {
    pub fn new(backend: BackendConnector) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl InteractionHandler for RequestResponse {
    fn model(&self) -> InteractionModel {
        InteractionModel::RequestResponse
    }

    async fn handle(&self, mut inbound: Inbound, sink: &ReplySink) -> Result<(), GatewayError> {
        let Some(ts) = inbound.next::<Timestamp>().await else {
            log::debug!("reqresp: caller sent no request");
            return Ok(());
        };
        let ts = ts?;
        drop(inbound);
        log::info!("reqresp: request at {}", ts);

        if let Some(aircraft) = self.backend.fetch_one().await? {
            sink.next(&aircraft).await?;
        }
        Ok(())
    }
}
