use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::github_client::queries::{PagedNodes, ReleaseNode, RepositoryProbeNode, TagRefNode};
use crate::github_client::GithubClient;

use super::super::types::{
    FetchMode, GlobalRateLimiter, ReleasePage, ReleaseRecord, RepoRef, RepositoryProbe,
    SourceError,
};
use super::error_mapping::map_github_error;

/// Remote provider seam: a capability probe plus one paged listing call.
///
/// Production talks GraphQL over HTTP; tests script pages keyed by cursor.
pub trait ReleaseSource: Send + Sync {
    fn probe_repository<'a>(
        &'a self,
        repo: &'a RepoRef,
    ) -> BoxFuture<'a, Result<RepositoryProbe, SourceError>>;

    fn fetch_page<'a>(
        &'a self,
        repo: &'a RepoRef,
        mode: FetchMode,
        after: Option<&'a str>,
        page_size: i64,
    ) -> BoxFuture<'a, Result<ReleasePage, SourceError>>;
}

impl<T> ReleaseSource for Arc<T>
where
    T: ReleaseSource + ?Sized,
{
    fn probe_repository<'a>(
        &'a self,
        repo: &'a RepoRef,
    ) -> BoxFuture<'a, Result<RepositoryProbe, SourceError>> {
        (**self).probe_repository(repo)
    }

    fn fetch_page<'a>(
        &'a self,
        repo: &'a RepoRef,
        mode: FetchMode,
        after: Option<&'a str>,
        page_size: i64,
    ) -> BoxFuture<'a, Result<ReleasePage, SourceError>> {
        (**self).fetch_page(repo, mode, after, page_size)
    }
}

/// GitHub-backed source used by the production runtime.
pub struct GithubReleaseSource {
    client: GithubClient,
    global_rate_limiter: GlobalRateLimiter,
}

impl GithubReleaseSource {
    /// Every request, including the probe, waits on the shared limiter before going out.
    pub fn new(client: GithubClient, global_rate_limiter: GlobalRateLimiter) -> Self {
        Self {
            client,
            global_rate_limiter,
        }
    }
}

impl ReleaseSource for GithubReleaseSource {
    fn probe_repository<'a>(
        &'a self,
        repo: &'a RepoRef,
    ) -> BoxFuture<'a, Result<RepositoryProbe, SourceError>> {
        Box::pin(async move {
            self.global_rate_limiter.until_ready().await;
            self.client
                .probe_repository(&repo.owner, &repo.name)
                .await
                .map(probe_from_node)
                .map_err(map_github_error)
        })
    }

    fn fetch_page<'a>(
        &'a self,
        repo: &'a RepoRef,
        mode: FetchMode,
        after: Option<&'a str>,
        page_size: i64,
    ) -> BoxFuture<'a, Result<ReleasePage, SourceError>> {
        Box::pin(async move {
            self.global_rate_limiter.until_ready().await;
            match mode {
                FetchMode::Releases => self
                    .client
                    .releases_page(&repo.owner, &repo.name, after, page_size)
                    .await
                    .map(|paged| page_from_nodes(paged, release_record))
                    .map_err(map_github_error),
                FetchMode::Tags => self
                    .client
                    .tags_page(&repo.owner, &repo.name, after, page_size)
                    .await
                    .map(|paged| page_from_nodes(paged, tag_record))
                    .map_err(map_github_error),
            }
        })
    }
}

fn probe_from_node(node: RepositoryProbeNode) -> RepositoryProbe {
    RepositoryProbe {
        database_id: node.database_id,
        owner: node.owner.login,
        name: node.name,
        description: node.description,
        url: node.url,
        release_count: node.releases.total_count,
        tag_count: node.refs.map(|refs| refs.total_count).unwrap_or(0),
    }
}

fn page_from_nodes<N>(paged: PagedNodes<N>, convert: fn(N) -> ReleaseRecord) -> ReleasePage {
    let PagedNodes {
        connection,
        rate_limit_remaining,
    } = paged;
    ReleasePage {
        records: connection.nodes.into_iter().flatten().map(convert).collect(),
        end_cursor: connection.page_info.end_cursor,
        has_next_page: connection.page_info.has_next_page,
        rate_limit_remaining,
    }
}

fn release_record(node: ReleaseNode) -> ReleaseRecord {
    ReleaseRecord::new(
        node.id,
        node.name.unwrap_or_default(),
        node.tag_name,
        node.url,
        node.published_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    )
}

/// Lightweight tags carry no tag object, so they fall back to an empty URL and the epoch.
fn tag_record(node: TagRefNode) -> ReleaseRecord {
    let target = node.target.unwrap_or_default();
    let published_at = target
        .tagger
        .and_then(|tagger| tagger.date)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    ReleaseRecord::new(
        node.id,
        node.name.clone(),
        node.name,
        target.commit_url.unwrap_or_default(),
        published_at,
    )
}
