pub mod error;
mod message_governor;
pub mod release_loader;
mod registration;
pub mod types;
pub mod version;

use std::num::NonZeroU32;
use std::sync::Arc;

use diesel_async::pooled_connection::deadpool::Pool;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;

use crate::github_client::GithubClient;

pub use message_governor::{disposition_for_failure, MessageGovernor};
pub use registration::{register_repository, WorkPublisher};
pub use release_loader::{
    GithubReleaseSource, PgSyncStateStore, ReleaseLoader, ReleaseSource, SyncStateStore,
};
use types::{GlobalRateLimiter, LoaderConfig};

/// Process-wide GraphQL request budget shared by every worker.
pub const DEFAULT_GLOBAL_RPS: NonZeroU32 = nonzero!(10u32);

/// Governor wired to GitHub and Postgres.
pub type GithubGovernor = MessageGovernor<GithubReleaseSource, PgSyncStateStore>;

pub fn global_rate_limiter(requests_per_second: NonZeroU32) -> GlobalRateLimiter {
    Arc::new(RateLimiter::direct(Quota::per_second(requests_per_second)))
}

pub fn build_github_governor(
    client: GithubClient,
    db_pool: Pool<diesel_async::AsyncPgConnection>,
    rate_limiter: GlobalRateLimiter,
    config: LoaderConfig,
) -> GithubGovernor {
    let source = GithubReleaseSource::new(client, rate_limiter);
    let store = PgSyncStateStore::new(db_pool);
    MessageGovernor::new(ReleaseLoader::new(source, store, config))
}
