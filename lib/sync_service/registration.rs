use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use crate::github_client::parse_repo_link;
use crate::mq::QueueError;

use super::error::Error;
use super::release_loader::{ReleaseSource, SyncStateStore};
use super::types::{RepoSyncState, WorkMessage};

/// Outbound side of the work queue.
pub trait WorkPublisher: Send + Sync {
    fn publish<'a>(&'a self, message: &'a WorkMessage) -> BoxFuture<'a, Result<(), QueueError>>;
}

impl<T> WorkPublisher for Arc<T>
where
    T: WorkPublisher + ?Sized,
{
    fn publish<'a>(&'a self, message: &'a WorkMessage) -> BoxFuture<'a, Result<(), QueueError>> {
        (**self).publish(message)
    }
}

/// Registers a repository from its GitHub link and enqueues its first sync.
///
/// The returned state is the row as stored right after the upsert, before any ingestion ran.
pub async fn register_repository<S, T, P>(
    source: &S,
    store: &T,
    publisher: &P,
    link: &str,
) -> Result<RepoSyncState, Error>
where
    S: ReleaseSource + ?Sized,
    T: SyncStateStore + ?Sized,
    P: WorkPublisher + ?Sized,
{
    let repo = parse_repo_link(link).map_err(|err| Error::InvalidLink(err.to_string()))?;
    let probe = source.probe_repository(&repo).await?;
    let state = store.register_source(&probe.registration()).await?;

    let message = WorkMessage {
        owner: repo.owner.clone(),
        repo: repo.name.clone(),
    };
    publisher.publish(&message).await?;

    info!(
        event = "repository_registered",
        owner = %repo.owner,
        repo = %repo.name,
        external_id = %state.external_id,
        known_releases = state.releases.len(),
        end_cursor = ?state.end_cursor,
        "registered repository and enqueued sync"
    );
    Ok(state)
}
