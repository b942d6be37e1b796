use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};

use super::consumer::{run_consumer_loop, ConsumerStats};
use super::{MessageHandler, WorkerError};
use crate::{logging, mq};
use crate::server::monitoring::LOADER_METRICS;

#[derive(Error, Debug)]
pub struct ShutdownError {
    errors: Vec<WorkerError>,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} worker(s) failed: {:?}", self.errors.len(), self.errors)
    }
}

pub struct WorkerPool {
    workers: Vec<JoinHandle<Result<ConsumerStats, WorkerError>>>,
}

impl WorkerPool {
    /// Spawns `num_workers` consumer loops. Each opens its own channel on the shared connection.
    pub fn spawn<H>(
        num_workers: usize,
        connection: Arc<lapin::Connection>,
        handler: Arc<H>,
        cancellation_token: CancellationToken,
    ) -> Self
    where
        H: MessageHandler + 'static,
    {
        if let Some(metrics) = LOADER_METRICS.get() {
            metrics.worker_alive_count.set(num_workers as i64);
        }
        let workers = (0..num_workers)
            .map(|worker_idx| {
                let worker_connection = Arc::clone(&connection);
                let worker_handler = Arc::clone(&handler);
                let worker_token = cancellation_token.clone();
                let span = logging::consumer_span(worker_idx);
                tokio::spawn(
                    async move {
                        let consumer_tag = format!("release-loader-{worker_idx}");
                        let result = match mq::open_consumer(&worker_connection, &consumer_tag)
                            .await
                        {
                            Ok(consumer) => {
                                run_consumer_loop(
                                    worker_idx,
                                    consumer,
                                    worker_handler.as_ref(),
                                    &worker_token,
                                )
                                .await
                            }
                            Err(err) => Err(WorkerError::from(err)),
                        };

                        if let Some(metrics) = LOADER_METRICS.get() {
                            metrics.worker_alive_count.dec();
                        }
                        if let Err(err) = &result {
                            error!(
                                event = "consumer_loop_failed",
                                worker_idx,
                                error = %err,
                                "consumer loop exited with an error"
                            );
                        }
                        result
                    }
                    .instrument(span),
                )
            })
            .collect();

        info!(event = "worker_pool_started", num_workers, "spawned consumer loops");
        Self { workers }
    }

    pub async fn wait_for_completion(self) -> Result<ConsumerStats, ShutdownError> {
        let mut errors = vec![];
        let mut totals = ConsumerStats::default();
        for handle in self.workers {
            match handle.await {
                Ok(Ok(stats)) => {
                    totals.acknowledged += stats.acknowledged;
                    totals.requeued += stats.requeued;
                    totals.dead_lettered += stats.dead_lettered;
                }
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(WorkerError::JoinError(e.to_string())),
            }
        }

        if errors.is_empty() {
            Ok(totals)
        } else {
            Err(ShutdownError { errors })
        }
    }
}
