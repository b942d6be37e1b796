use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::RateLimiter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::version::{classify, VersionInfo};

/// Provider prefix used to build stable, provider-qualified repository identifiers.
pub const GITHUB_PROVIDER: &str = "github";

/// Default number of releases/tags requested per remote page.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Messages that have been dead-lettered more often than this are dropped.
pub const DEFAULT_MAX_DEATHS: i64 = 10;

/// Inbound work message published on repository registration or re-sync.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkMessage {
    pub owner: String,
    pub repo: String,
}

impl WorkMessage {
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    pub fn repo_ref(&self) -> RepoRef {
        RepoRef {
            owner: self.owner.clone(),
            name: self.repo.clone(),
        }
    }
}

/// Owner/name pair addressing one repository on the hosting provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// One release (or tag standing in for a release) as persisted in the ordered history.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub id: String,
    pub name: String,
    pub tag_name: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub is_semver: bool,
    #[serde(default)]
    pub major: u64,
    #[serde(default)]
    pub minor: u64,
    #[serde(default)]
    pub patch: u64,
    #[serde(default)]
    pub is_prerelease: bool,
}

impl ReleaseRecord {
    /// Builds an unclassified record; version fields are zeroed until [`Self::classified`].
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        tag_name: impl Into<String>,
        url: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tag_name: tag_name.into(),
            url: url.into(),
            published_at,
            is_semver: false,
            major: 0,
            minor: 0,
            patch: 0,
            is_prerelease: false,
        }
    }

    /// Derives the semantic-version fields from `tag_name`.
    pub fn classified(mut self) -> Self {
        let VersionInfo {
            is_semver,
            major,
            minor,
            patch,
            is_prerelease,
        } = classify(&self.tag_name);
        self.is_semver = is_semver;
        self.major = major;
        self.minor = minor;
        self.patch = patch;
        self.is_prerelease = is_prerelease;
        self
    }
}

/// Persisted per-repository sync state including the embedded release history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSyncState {
    pub external_id: String,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub url: String,
    pub end_cursor: Option<String>,
    pub is_fetching: bool,
    pub releases: Vec<ReleaseRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Narrow projection of [`RepoSyncState`] read at the start of every ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCheckpoint {
    pub external_id: String,
    pub end_cursor: Option<String>,
    pub is_fetching: bool,
}

/// Registration payload used to create or refresh a [`RepoSyncState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRegistration {
    pub external_id: String,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub url: String,
}

/// Capability probe answered by the remote provider before any paging starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryProbe {
    pub database_id: i64,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub url: String,
    pub release_count: i64,
    pub tag_count: i64,
}

impl RepositoryProbe {
    pub fn external_id(&self) -> String {
        format!("{GITHUB_PROVIDER}/{}", self.database_id)
    }

    pub fn registration(&self) -> SourceRegistration {
        SourceRegistration {
            external_id: self.external_id(),
            owner: self.owner.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            url: self.url.clone(),
        }
    }
}

/// Which remote listing is paged for a repository. Chosen once per ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Releases,
    Tags,
}

impl FetchMode {
    /// Prefers releases, falls back to tags, and yields `None` when the repository has neither.
    pub fn select(probe: &RepositoryProbe) -> Option<Self> {
        if probe.release_count > 0 {
            Some(Self::Releases)
        } else if probe.tag_count > 0 {
            Some(Self::Tags)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Releases => "releases",
            Self::Tags => "tags",
        }
    }
}

/// One page of normalized (not yet classified) records from the remote provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePage {
    pub records: Vec<ReleaseRecord>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub rate_limit_remaining: i64,
}

impl ReleasePage {
    pub fn is_rate_limited(&self) -> bool {
        self.rate_limit_remaining <= 0
    }
}

/// Conditional merge-upsert issued once per successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseCommit {
    pub external_id: String,
    /// Cursor read when the ingestion started; the update only applies if it is unchanged.
    pub expected_cursor: Option<String>,
    pub new_cursor: Option<String>,
    pub releases: Vec<ReleaseRecord>,
}

/// Storage-level result of a [`ReleaseCommit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    LostRace,
}

/// Successful terminal states of one repository ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The repository has neither releases nor tags.
    NothingToFetch,
    /// Paging reached the head without any new non-prerelease records.
    UpToDate,
    Committed {
        appended: usize,
        end_cursor: Option<String>,
    },
    /// A concurrent ingestion moved the cursor first; nothing was written.
    LostRace,
}

/// Final queue disposition for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    Acknowledge,
    RequeueForRetry,
    RejectToDeadLetter,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Acknowledge => "ack",
            Self::RequeueForRetry => "requeue",
            Self::RejectToDeadLetter => "dead_letter",
        }
    }
}

/// Tuning for the paged fetch loop and poison-message handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    pub page_size: i64,
    /// Fixed delay enforced between successive page requests of one ingestion.
    pub page_throttle: Duration,
    pub max_deaths: i64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_throttle: Duration::from_secs(1),
            max_deaths: DEFAULT_MAX_DEATHS,
        }
    }
}

/// Shared process-local limiter enforcing one request budget across all workers.
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Normalized remote failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    RateLimited,
    Unauthorized,
    Forbidden,
    NotFound,
    Network,
    UpstreamUnavailable,
    MalformedResponse,
    Other,
}

/// Typed remote failure with human-readable details.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == SourceErrorKind::RateLimited
    }
}

/// Normalized storage failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Connection,
    Query,
    Encoding,
}

/// Typed storage failure with human-readable details.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
