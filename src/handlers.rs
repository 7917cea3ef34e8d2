//! Handlers shipped with the video processing worker.
use crate::consumers::{Completion, DeliveryStream, Handler};
use futures_util::StreamExt;

/// Logs every delivery it receives, numbered from 1.
///
/// When `verbose` is off only the delivery metadata is logged, not the payload.
/// In manual-ack mode every delivery is acknowledged once logged.
pub struct LogDeliveries {
    pub verbose: bool,
}

#[async_trait::async_trait]
impl Handler for LogDeliveries {
    #[tracing::instrument(name = "log_deliveries", skip_all)]
    async fn handle(
        &self,
        mut deliveries: DeliveryStream,
        completion: Completion,
    ) -> Result<(), anyhow::Error> {
        tracing::info!("Waiting for deliveries");

        let mut count: u64 = 0;
        while let Some(delivery) = deliveries.next().await {
            count += 1;
            if self.verbose {
                tracing::info!(
                    delivery_tag = delivery.delivery_tag,
                    routing_key = %delivery.routing_key,
                    "[{count}] {}",
                    String::from_utf8_lossy(&delivery.data)
                );
            } else {
                tracing::info!(
                    delivery_tag = delivery.delivery_tag,
                    routing_key = %delivery.routing_key,
                    size = delivery.data.len(),
                    "[{count}] Received delivery"
                );
            }

            if let Err(e) = delivery.ack().await {
                tracing::error!(
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "Failed to ack delivery"
                );
                // The rest of the stream is left unacked: the broker requeues it once the
                // channel closes.
                completion.fail(e);
                return Ok(());
            }
        }

        tracing::info!(deliveries = count, "Delivery stream closed");
        completion.succeed();
        Ok(())
    }
}
