//! Fixed-size pool of independent queue consumers sharing one cancellation token.

mod consumer;
mod pool;

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use consumer::{run_consumer_loop, ConsumerStats};
pub use pool::{ShutdownError, WorkerPool};

use crate::mq::QueueError;
use crate::sync_service::types::Disposition;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker task joined with an error: {0}")]
    JoinError(String),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("consumer stream failed: {0}")]
    Consume(String),
    #[error("consumer stream closed before shutdown")]
    StreamClosed,
}

/// One received message that must be settled exactly once.
pub trait QueueDelivery: Send {
    fn body(&self) -> &[u8];

    /// Number of times the broker has dead-lettered this message so far.
    fn death_count(&self) -> i64;

    fn settle(self, disposition: Disposition) -> BoxFuture<'static, Result<(), QueueError>>;
}

/// Decides the disposition of one message. Runs to completion before the loop reads the next.
pub trait MessageHandler: Send + Sync {
    fn handle<'a>(
        &'a self,
        body: &'a [u8],
        death_count: i64,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Disposition>;
}

impl<T> MessageHandler for Arc<T>
where
    T: MessageHandler + ?Sized,
{
    fn handle<'a>(
        &'a self,
        body: &'a [u8],
        death_count: i64,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Disposition> {
        (**self).handle(body, death_count, cancel)
    }
}
