use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::server::monitoring::LOADER_METRICS;

use super::super::error::Error;
use super::super::types::{FetchMode, LoaderConfig, ReleaseRecord, RepoRef};
use super::source::ReleaseSource;

/// Why the paging loop stopped.
#[derive(Debug)]
pub(crate) enum FetchTermination {
    /// The provider reported the head of the listing.
    Exhausted,
    /// Rate limit, provider failure or shutdown. Records gathered so far are still returned.
    Interrupted(Error),
}

/// Accumulated result of one paging run.
#[derive(Debug)]
pub(crate) struct FetchProgress {
    /// Classified, non-prerelease records in fetch order.
    pub records: Vec<ReleaseRecord>,
    /// End cursor of the last consumed page, or the starting cursor when none was consumed.
    pub cursor: Option<String>,
    pub pages_consumed: usize,
    pub prereleases_skipped: usize,
    pub termination: FetchTermination,
}

/// Pages through `mode` starting after `start_cursor` until the head, a rate-limit signal, a
/// provider error or cancellation.
///
/// A page reporting zero remaining budget is discarded without moving the cursor. Prereleases
/// advance the cursor but are not accumulated. The fixed throttle runs between requests and is
/// cancellable.
pub(crate) async fn fetch_new_releases<S>(
    source: &S,
    repo: &RepoRef,
    mode: FetchMode,
    start_cursor: Option<String>,
    config: &LoaderConfig,
    cancel: &CancellationToken,
) -> FetchProgress
where
    S: ReleaseSource + ?Sized,
{
    let mut progress = FetchProgress {
        records: Vec::new(),
        cursor: start_cursor,
        pages_consumed: 0,
        prereleases_skipped: 0,
        termination: FetchTermination::Exhausted,
    };
    let mut requests = 0usize;

    loop {
        if requests > 0 && !config.page_throttle.is_zero() {
            let throttled = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(config.page_throttle) => true,
            };
            if !throttled {
                progress.termination = FetchTermination::Interrupted(Error::Cancelled);
                return progress;
            }
        }

        let after = progress.cursor.clone();
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            fetched = source.fetch_page(repo, mode, after.as_deref(), config.page_size) => {
                Some(fetched)
            }
        };
        let Some(fetched) = fetched else {
            progress.termination = FetchTermination::Interrupted(Error::Cancelled);
            return progress;
        };
        requests += 1;

        let page = match fetched {
            Ok(page) => page,
            Err(err) => {
                progress.termination = FetchTermination::Interrupted(Error::from(err));
                return progress;
            }
        };
        if let Some(metrics) = LOADER_METRICS.get() {
            metrics.pages_fetched.inc();
        }

        if page.is_rate_limited() {
            info!(
                event = "release_page_rate_limited",
                owner = %repo.owner,
                repo = %repo.name,
                mode = mode.as_str(),
                cursor = ?progress.cursor,
                discarded = page.records.len(),
                "provider reported an exhausted rate-limit budget"
            );
            progress.termination =
                FetchTermination::Interrupted(Error::RateLimited { committed: 0 });
            return progress;
        }

        if page.records.is_empty() {
            return progress;
        }

        let fetched_count = page.records.len();
        for record in page.records {
            let record = record.classified();
            if record.is_prerelease {
                progress.prereleases_skipped += 1;
                continue;
            }
            progress.records.push(record);
        }
        if page.end_cursor.is_some() {
            progress.cursor = page.end_cursor;
        }
        progress.pages_consumed += 1;

        debug!(
            event = "release_page_consumed",
            owner = %repo.owner,
            repo = %repo.name,
            mode = mode.as_str(),
            fetched = fetched_count,
            accumulated = progress.records.len(),
            cursor = ?progress.cursor,
            has_next_page = page.has_next_page,
            rate_limit_remaining = page.rate_limit_remaining,
            "consumed release page"
        );

        if !page.has_next_page {
            return progress;
        }
    }
}
