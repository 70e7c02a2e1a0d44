use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::GatewayEnvelope;
use crate::pipeline::InteractionPipeline;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_event(&self) -> Result<Option<GatewayEnvelope>, TransportError>;
    async fn acknowledge(&self, event_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Stands in for the gateway when no live connection is configured; the
/// stream closes immediately.
#[derive(Default)]
pub struct NoopGatewayTransport;

#[async_trait]
impl GatewayTransport for NoopGatewayTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_event(&self) -> Result<Option<GatewayEnvelope>, TransportError> {
        Ok(None)
    }

    async fn acknowledge(&self, _event_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Pumps gateway events into the interaction pipeline, reconnecting with
/// exponential backoff and never crashing the process on exhaustion.
pub struct GatewayRunner {
    transport: Arc<dyn GatewayTransport>,
    pipeline: Arc<InteractionPipeline>,
    reconnect_policy: ReconnectPolicy,
}

impl GatewayRunner {
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        pipeline: Arc<InteractionPipeline>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, pipeline, reconnect_policy }
    }

    pub async fn start(&self) -> Result<(), TransportError> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump(attempt).await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "gateway transport failed"
                    );

                    if attempt >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "gateway retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening gateway connection");
        self.transport.connect().await?;
        info!(attempt, "gateway connected");

        loop {
            let Some(envelope) = self.transport.next_event().await? else {
                info!(attempt, "gateway stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };

            info!(
                event_name = "ingress.gateway.event_received",
                event_id = envelope.event_id.as_str(),
                guild_id = envelope.guild_id.as_str(),
                category = envelope.event.category().as_str(),
                interaction = envelope.event.name(),
                "received gateway event"
            );

            if let Err(error) = self.transport.acknowledge(envelope.event_id.as_str()).await {
                warn!(
                    event_name = "ingress.gateway.ack_sent",
                    event_id = envelope.event_id.as_str(),
                    error = %error,
                    "failed to acknowledge gateway event"
                );
            } else {
                debug!(
                    event_name = "ingress.gateway.ack_sent",
                    event_id = envelope.event_id.as_str(),
                    "acknowledged gateway event"
                );
            }

            let report = self.pipeline.process(&envelope).await;
            debug!(
                event_name = "ingress.gateway.event_processed",
                event_id = envelope.event_id.as_str(),
                outcome = report.outcome.as_str(),
                responded = report.responded,
                alerts = report.alerts.len(),
                "pipeline finished"
            );
        }
    }
}
