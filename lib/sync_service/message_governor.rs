use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::logging;
use crate::server::monitoring::LOADER_METRICS;
use crate::worker::MessageHandler;

use super::error::{Error, FailureKind};
use super::release_loader::{ReleaseLoader, ReleaseSource, SyncStateStore};
use super::types::{Disposition, SyncOutcome, WorkMessage};

/// Maps an ingestion failure class onto a queue disposition.
///
/// Only rate limiting is retried with delay and only shutdown is redelivered immediately.
/// Everything else is dropped after logging.
pub fn disposition_for_failure(kind: FailureKind) -> Disposition {
    match kind {
        FailureKind::TransientRemote => Disposition::RejectToDeadLetter,
        FailureKind::Cancelled => Disposition::RequeueForRetry,
        FailureKind::RegistrationMissing | FailureKind::Other => Disposition::Acknowledge,
    }
}

/// Decides the fate of each work message: poison check, decode, ingest, classify.
pub struct MessageGovernor<S, T>
where
    S: ReleaseSource,
    T: SyncStateStore,
{
    loader: ReleaseLoader<S, T>,
}

impl<S, T> MessageGovernor<S, T>
where
    S: ReleaseSource,
    T: SyncStateStore,
{
    pub fn new(loader: ReleaseLoader<S, T>) -> Self {
        Self { loader }
    }

    pub async fn decide(
        &self,
        body: &[u8],
        death_count: i64,
        cancel: &CancellationToken,
    ) -> Disposition {
        let max_deaths = self.loader.config().max_deaths;
        if death_count > max_deaths {
            warn!(
                event = "poison_message_dropped",
                death_count,
                max_deaths,
                body = %String::from_utf8_lossy(body),
                "message exceeded redelivery limit; dropping"
            );
            return Disposition::Acknowledge;
        }

        let message = match WorkMessage::from_json(body) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    event = "malformed_message_dropped",
                    error = %err,
                    body = %String::from_utf8_lossy(body),
                    "could not decode work message; dropping"
                );
                return Disposition::Acknowledge;
            }
        };

        let repo = message.repo_ref();
        let span = logging::message_span(&repo, death_count);
        async {
            match self.loader.sync_repository(&repo, cancel).await {
                Ok(outcome) => {
                    log_success(&outcome);
                    Disposition::Acknowledge
                }
                Err(err) => {
                    let disposition = disposition_for_failure(err.kind());
                    log_failure(&err, disposition);
                    disposition
                }
            }
        }
        .instrument(span)
        .await
    }
}

impl<S, T> MessageHandler for MessageGovernor<S, T>
where
    S: ReleaseSource,
    T: SyncStateStore,
{
    fn handle<'a>(
        &'a self,
        body: &'a [u8],
        death_count: i64,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Disposition> {
        Box::pin(self.decide(body, death_count, cancel))
    }
}

fn log_success(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Committed {
            appended,
            end_cursor,
        } => info!(
            event = "sync_completed",
            appended,
            end_cursor = ?end_cursor,
            "repository sync committed new releases"
        ),
        SyncOutcome::UpToDate => info!(event = "sync_up_to_date", "repository already up to date"),
        SyncOutcome::NothingToFetch => {
            info!(event = "sync_nothing_to_fetch", "repository has nothing to fetch")
        }
        SyncOutcome::LostRace => info!(
            event = "sync_lost_race",
            "concurrent ingestion won the commit; treating as handled"
        ),
    }
}

fn log_failure(err: &Error, disposition: Disposition) {
    match err.kind() {
        FailureKind::TransientRemote => {
            if let Some(metrics) = LOADER_METRICS.get() {
                metrics.rate_limited.inc();
            }
            info!(
                event = "sync_rate_limited",
                error = %err,
                disposition = disposition.as_str(),
                "rate limit reached; routing message to delayed retry"
            );
        }
        FailureKind::Cancelled => info!(
            event = "sync_cancelled",
            disposition = disposition.as_str(),
            "shutdown interrupted ingestion; requeueing message"
        ),
        FailureKind::RegistrationMissing | FailureKind::Other => warn!(
            event = "sync_failed",
            error = %err,
            disposition = disposition.as_str(),
            "ingestion failed; dropping message"
        ),
    }
}
