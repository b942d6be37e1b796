mod core;
mod error_mapping;
mod pager;
mod source;
mod store;

pub use self::core::ReleaseLoader;
pub use error_mapping::{map_diesel_error, map_github_error};
pub use source::{GithubReleaseSource, ReleaseSource};
pub use store::{PgSyncStateStore, SyncStateStore};

#[cfg(test)]
pub(crate) mod test_support;
