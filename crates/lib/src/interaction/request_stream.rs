//! Request-stream: one timestamp in, the whole backend aircraft stream out.

use super::{Inbound, InteractionHandler, InteractionModel, ReplySink};
use crate::backend::BackendConnector;
use crate::error::GatewayError;
use crate::model::Timestamp;
use async_trait::async_trait;

pub struct RequestStream {
    backend: BackendConnector,
}

impl RequestStream {
    pub fn new(backend: BackendConnector) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl InteractionHandler for RequestStream {
    fn model(&self) -> InteractionModel {
        InteractionModel::RequestStream
    }

    async fn handle(&self, mut inbound: Inbound, sink: &ReplySink) -> Result<(), GatewayError> {
        let Some(ts) = inbound.next::<Timestamp>().await else {
            log::debug!("reqstream: caller sent no request");
            return Ok(());
        };
        let ts = ts?;
        drop(inbound);
        log::info!("reqstream: request at {}", ts);

        let mut sub = self.backend.fetch_stream().await?;
        let mut forwarded = 0usize;
        while let Some(aircraft) = sub.next().await {
            sink.next(&aircraft?).await?;
            forwarded += 1;
        }
        log::debug!("reqstream: backend completed after {} aircraft", forwarded);
        Ok(())
    }
}
