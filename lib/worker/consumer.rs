use std::fmt::Display;

use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{MessageHandler, QueueDelivery, WorkerError};
use crate::server::monitoring::LOADER_METRICS;
use crate::sync_service::types::Disposition;

/// Per-loop settlement counters, reported when the pool shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acknowledged: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
}

impl ConsumerStats {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Acknowledge => self.acknowledged += 1,
            Disposition::RequeueForRetry => self.requeued += 1,
            Disposition::RejectToDeadLetter => self.dead_lettered += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.acknowledged + self.requeued + self.dead_lettered
    }
}

/// Consumes `deliveries` one at a time until `cancel` fires.
///
/// Cancellation is checked before every receive. A stream that ends or errors before
/// cancellation is reported as a worker failure.
pub async fn run_consumer_loop<St, D, E, H>(
    worker_idx: usize,
    deliveries: St,
    handler: &H,
    cancel: &CancellationToken,
) -> Result<ConsumerStats, WorkerError>
where
    St: Stream<Item = Result<D, E>>,
    D: QueueDelivery,
    E: Display,
    H: MessageHandler + ?Sized,
{
    let mut deliveries = std::pin::pin!(deliveries);
    let mut stats = ConsumerStats::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(
                    event = "consumer_loop_stopping",
                    worker_idx,
                    settled = stats.total(),
                    "cancellation received; consumer loop stopping"
                );
                return Ok(stats);
            }
            next = deliveries.next() => next,
        };

        let delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(err)) => return Err(WorkerError::Consume(err.to_string())),
            None if cancel.is_cancelled() => return Ok(stats),
            None => return Err(WorkerError::StreamClosed),
        };

        let death_count = delivery.death_count();
        let disposition = handler.handle(delivery.body(), death_count, cancel).await;
        delivery.settle(disposition).await?;

        stats.record(disposition);
        if let Some(metrics) = LOADER_METRICS.get() {
            metrics.record_disposition(disposition);
        }
        debug!(
            event = "message_settled",
            worker_idx,
            death_count,
            disposition = disposition.as_str(),
            "settled work message"
        );
    }
}
