use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::monitoring::LOADER_METRICS;

use super::super::error::Error;
use super::super::types::{
    CommitOutcome, FetchMode, LoaderConfig, ReleaseCommit, RepoRef, SyncCheckpoint, SyncOutcome,
};
use super::pager::{fetch_new_releases, FetchTermination};
use super::source::ReleaseSource;
use super::store::SyncStateStore;

/// Incremental ingestion of one repository's release history.
///
/// Resolve the provider identity, load the stored cursor, page forward from it, then commit the
/// new records with one cursor-guarded update. The in-progress flag is cleared on every exit
/// path once the checkpoint has been loaded.
pub struct ReleaseLoader<S, T>
where
    S: ReleaseSource,
    T: SyncStateStore,
{
    source: S,
    store: T,
    config: LoaderConfig,
}

impl<S, T> ReleaseLoader<S, T>
where
    S: ReleaseSource,
    T: SyncStateStore,
{
    pub fn new(source: S, store: T, config: LoaderConfig) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    pub fn config(&self) -> LoaderConfig {
        self.config
    }

    pub async fn sync_repository(
        &self,
        repo: &RepoRef,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, Error> {
        let probe = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            probed = self.source.probe_repository(repo) => Some(probed),
        };
        let probe = probe.ok_or(Error::Cancelled)??;
        let external_id = probe.external_id();

        let checkpoint = self
            .store
            .load_checkpoint(&external_id)
            .await?
            .ok_or_else(|| Error::RegistrationMissing {
                external_id: external_id.clone(),
            })?;
        if checkpoint.is_fetching {
            debug!(
                event = "sync_state_already_fetching",
                external_id = %external_id,
                "in-progress flag already set; continuing"
            );
        }

        let result = match FetchMode::select(&probe) {
            Some(mode) => {
                self.mark_in_progress(&external_id).await;
                self.fetch_and_commit(repo, mode, &checkpoint, cancel).await
            }
            None => {
                info!(
                    event = "sync_nothing_to_fetch",
                    owner = %repo.owner,
                    repo = %repo.name,
                    external_id = %external_id,
                    "repository has neither releases nor tags"
                );
                Ok(SyncOutcome::NothingToFetch)
            }
        };

        if let Err(err) = self.store.set_in_progress(&external_id, false).await {
            warn!(
                event = "sync_flag_clear_failed",
                external_id = %external_id,
                error = %err,
                "could not clear in-progress flag"
            );
        }

        result
    }

    async fn mark_in_progress(&self, external_id: &str) {
        if let Err(err) = self.store.set_in_progress(external_id, true).await {
            warn!(
                event = "sync_flag_set_failed",
                external_id = %external_id,
                error = %err,
                "could not set in-progress flag; continuing"
            );
        }
    }

    async fn fetch_and_commit(
        &self,
        repo: &RepoRef,
        mode: FetchMode,
        checkpoint: &SyncCheckpoint,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, Error> {
        let progress = fetch_new_releases(
            &self.source,
            repo,
            mode,
            checkpoint.end_cursor.clone(),
            &self.config,
            cancel,
        )
        .await;

        info!(
            event = "release_fetch_finished",
            owner = %repo.owner,
            repo = %repo.name,
            external_id = %checkpoint.external_id,
            mode = mode.as_str(),
            pages_consumed = progress.pages_consumed,
            accumulated = progress.records.len(),
            prereleases_skipped = progress.prereleases_skipped,
            interrupted = matches!(progress.termination, FetchTermination::Interrupted(_)),
            "finished paging remote releases"
        );

        if progress.records.is_empty() {
            return match progress.termination {
                FetchTermination::Exhausted => Ok(SyncOutcome::UpToDate),
                FetchTermination::Interrupted(err) => Err(err),
            };
        }

        let appended = progress.records.len();
        let commit = ReleaseCommit {
            external_id: checkpoint.external_id.clone(),
            expected_cursor: checkpoint.end_cursor.clone(),
            new_cursor: progress.cursor.clone(),
            releases: progress.records,
        };

        let (outcome, committed) = match self.store.commit_releases(&commit).await? {
            CommitOutcome::Applied => {
                if let Some(metrics) = LOADER_METRICS.get() {
                    metrics.releases_committed.inc_by(appended as u64);
                }
                info!(
                    event = "releases_committed",
                    external_id = %commit.external_id,
                    appended,
                    end_cursor = ?commit.new_cursor,
                    "committed new releases"
                );
                (
                    SyncOutcome::Committed {
                        appended,
                        end_cursor: commit.new_cursor.clone(),
                    },
                    appended,
                )
            }
            CommitOutcome::LostRace => {
                if let Some(metrics) = LOADER_METRICS.get() {
                    metrics.lost_races.inc();
                }
                warn!(
                    event = "release_commit_lost_race",
                    external_id = %commit.external_id,
                    expected_cursor = ?commit.expected_cursor,
                    "stored cursor moved during ingestion; discarding this run's records"
                );
                (SyncOutcome::LostRace, 0)
            }
        };

        match progress.termination {
            FetchTermination::Exhausted => Ok(outcome),
            FetchTermination::Interrupted(err) => Err(err.with_committed(committed)),
        }
    }
}
