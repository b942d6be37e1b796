use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures::future::BoxFuture;
use tokio::sync::Barrier;

use super::super::types::{
    CommitOutcome, FetchMode, LoaderConfig, ReleaseCommit, ReleasePage, ReleaseRecord, RepoRef,
    RepoSyncState, RepositoryProbe, SourceError, SourceErrorKind, SourceRegistration, StoreError,
    SyncCheckpoint,
};
use super::{ReleaseSource, SyncStateStore};

pub(crate) const DATABASE_ID: i64 = 724712;
pub(crate) const EXTERNAL_ID: &str = "github/724712";

pub(crate) fn test_config() -> LoaderConfig {
    LoaderConfig {
        page_size: 2,
        page_throttle: Duration::ZERO,
        max_deaths: 10,
    }
}

pub(crate) fn repo() -> RepoRef {
    RepoRef {
        owner: "rust-lang".to_string(),
        name: "rust".to_string(),
    }
}

pub(crate) fn probe(release_count: i64, tag_count: i64) -> RepositoryProbe {
    RepositoryProbe {
        database_id: DATABASE_ID,
        owner: "rust-lang".to_string(),
        name: "rust".to_string(),
        description: Some("Empowering everyone to build reliable software.".to_string()),
        url: "https://github.com/rust-lang/rust".to_string(),
        release_count,
        tag_count,
    }
}

pub(crate) fn day(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::days(offset)
}

/// Unclassified record as the remote source would return it.
pub(crate) fn record(tag: &str, published_day: i64) -> ReleaseRecord {
    ReleaseRecord::new(
        format!("RE_{tag}"),
        format!("Release {tag}"),
        tag,
        format!("https://github.com/rust-lang/rust/releases/tag/{tag}"),
        day(published_day),
    )
}

pub(crate) fn page(
    records: Vec<ReleaseRecord>,
    end_cursor: Option<&str>,
    has_next_page: bool,
) -> ReleasePage {
    ReleasePage {
        records,
        end_cursor: end_cursor.map(str::to_string),
        has_next_page,
        rate_limit_remaining: 5000,
    }
}

pub(crate) fn rate_limited_page(
    records: Vec<ReleaseRecord>,
    end_cursor: Option<&str>,
) -> ReleasePage {
    ReleasePage {
        rate_limit_remaining: 0,
        ..page(records, end_cursor, true)
    }
}

pub(crate) fn empty_page() -> ReleasePage {
    page(Vec::new(), None, false)
}

pub(crate) fn tags(records: &[ReleaseRecord]) -> Vec<String> {
    records.iter().map(|record| record.tag_name.clone()).collect()
}

/// Remote source scripted per starting cursor. The last scripted response for a cursor is
/// served again on every later call.
pub(crate) struct ScriptedSource {
    probe: Result<RepositoryProbe, SourceError>,
    pages: Mutex<HashMap<Option<String>, VecDeque<Result<ReleasePage, SourceError>>>>,
    calls: Mutex<Vec<(FetchMode, Option<String>)>>,
    barrier_on_start: Option<Arc<Barrier>>,
}

impl ScriptedSource {
    pub(crate) fn new(probe: RepositoryProbe) -> Self {
        Self {
            probe: Ok(probe),
            pages: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            barrier_on_start: None,
        }
    }

    pub(crate) fn failing_probe(error: SourceError) -> Self {
        Self {
            probe: Err(error),
            ..Self::new(probe(0, 0))
        }
    }

    pub(crate) fn with_page(
        self,
        after: Option<&str>,
        response: Result<ReleasePage, SourceError>,
    ) -> Self {
        self.pages
            .lock()
            .expect("pages mutex poisoned")
            .entry(after.map(str::to_string))
            .or_default()
            .push_back(response);
        self
    }

    /// Every fetch from the unset cursor waits until `barrier` releases it.
    pub(crate) fn with_start_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier_on_start = Some(barrier);
        self
    }

    pub(crate) fn calls(&self) -> Vec<(FetchMode, Option<String>)> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }
}

impl ReleaseSource for ScriptedSource {
    fn probe_repository<'a>(
        &'a self,
        _repo: &'a RepoRef,
    ) -> BoxFuture<'a, Result<RepositoryProbe, SourceError>> {
        Box::pin(async move { self.probe.clone() })
    }

    fn fetch_page<'a>(
        &'a self,
        _repo: &'a RepoRef,
        mode: FetchMode,
        after: Option<&'a str>,
        _page_size: i64,
    ) -> BoxFuture<'a, Result<ReleasePage, SourceError>> {
        Box::pin(async move {
            let key = after.map(str::to_string);
            self.calls
                .lock()
                .expect("calls mutex poisoned")
                .push((mode, key.clone()));

            if key.is_none() {
                if let Some(barrier) = &self.barrier_on_start {
                    barrier.wait().await;
                }
            }

            let mut pages = self.pages.lock().expect("pages mutex poisoned");
            let responses = pages.get_mut(&key).ok_or_else(|| {
                SourceError::new(
                    SourceErrorKind::Other,
                    format!("no scripted page after cursor {key:?}"),
                )
            })?;
            if responses.len() > 1 {
                responses.pop_front().unwrap_or_else(|| Ok(empty_page()))
            } else {
                responses.front().cloned().unwrap_or_else(|| Ok(empty_page()))
            }
        })
    }
}

/// In-memory store with the same conditional-commit semantics as the Postgres statement.
#[derive(Default)]
pub(crate) struct MemoryStore {
    states: Mutex<HashMap<String, RepoSyncState>>,
    flag_writes: Mutex<Vec<bool>>,
    commits: Mutex<Vec<ReleaseCommit>>,
    commit_failure: Mutex<Option<StoreError>>,
}

impl MemoryStore {
    pub(crate) fn seeded(end_cursor: Option<&str>, releases: Vec<ReleaseRecord>) -> Self {
        let store = Self::default();
        store.states.lock().expect("states mutex poisoned").insert(
            EXTERNAL_ID.to_string(),
            RepoSyncState {
                external_id: EXTERNAL_ID.to_string(),
                owner: "rust-lang".to_string(),
                name: "rust".to_string(),
                description: None,
                url: "https://github.com/rust-lang/rust".to_string(),
                end_cursor: end_cursor.map(str::to_string),
                is_fetching: true,
                releases,
                created_at: day(0),
                updated_at: day(0),
            },
        );
        store
    }

    pub(crate) fn fail_next_commit(&self, error: StoreError) {
        *self
            .commit_failure
            .lock()
            .expect("commit_failure mutex poisoned") = Some(error);
    }

    pub(crate) fn state(&self) -> RepoSyncState {
        self.states
            .lock()
            .expect("states mutex poisoned")
            .get(EXTERNAL_ID)
            .cloned()
            .expect("seeded state should exist")
    }

    pub(crate) fn flag_writes(&self) -> Vec<bool> {
        self.flag_writes
            .lock()
            .expect("flag_writes mutex poisoned")
            .clone()
    }

    pub(crate) fn commit_count(&self) -> usize {
        self.commits.lock().expect("commits mutex poisoned").len()
    }
}

impl SyncStateStore for MemoryStore {
    fn load_checkpoint<'a>(
        &'a self,
        external_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<SyncCheckpoint>, StoreError>> {
        Box::pin(async move {
            Ok(self
                .states
                .lock()
                .expect("states mutex poisoned")
                .get(external_id)
                .map(|state| SyncCheckpoint {
                    external_id: state.external_id.clone(),
                    end_cursor: state.end_cursor.clone(),
                    is_fetching: state.is_fetching,
                }))
        })
    }

    fn set_in_progress<'a>(
        &'a self,
        external_id: &'a str,
        in_progress: bool,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.flag_writes
                .lock()
                .expect("flag_writes mutex poisoned")
                .push(in_progress);
            if let Some(state) = self
                .states
                .lock()
                .expect("states mutex poisoned")
                .get_mut(external_id)
            {
                state.is_fetching = in_progress;
            }
            Ok(())
        })
    }

    fn commit_releases<'a>(
        &'a self,
        commit: &'a ReleaseCommit,
    ) -> BoxFuture<'a, Result<CommitOutcome, StoreError>> {
        Box::pin(async move {
            if let Some(error) = self
                .commit_failure
                .lock()
                .expect("commit_failure mutex poisoned")
                .take()
            {
                return Err(error);
            }
            self.commits
                .lock()
                .expect("commits mutex poisoned")
                .push(commit.clone());

            let mut states = self.states.lock().expect("states mutex poisoned");
            let Some(state) = states.get_mut(&commit.external_id) else {
                return Ok(CommitOutcome::LostRace);
            };
            if state.end_cursor != commit.expected_cursor {
                return Ok(CommitOutcome::LostRace);
            }

            state.releases.extend(commit.releases.iter().cloned());
            state.releases.sort_by(|a, b| {
                (a.published_at, &a.tag_name, &a.id).cmp(&(b.published_at, &b.tag_name, &b.id))
            });
            state.end_cursor = commit.new_cursor.clone();
            state.is_fetching = false;
            Ok(CommitOutcome::Applied)
        })
    }

    fn register_source<'a>(
        &'a self,
        registration: &'a SourceRegistration,
    ) -> BoxFuture<'a, Result<RepoSyncState, StoreError>> {
        Box::pin(async move {
            let mut states = self.states.lock().expect("states mutex poisoned");
            let state = states
                .entry(registration.external_id.clone())
                .or_insert_with(|| RepoSyncState {
                    external_id: registration.external_id.clone(),
                    owner: registration.owner.clone(),
                    name: registration.name.clone(),
                    description: registration.description.clone(),
                    url: registration.url.clone(),
                    end_cursor: None,
                    is_fetching: true,
                    releases: Vec::new(),
                    created_at: day(0),
                    updated_at: day(0),
                });
            state.owner = registration.owner.clone();
            state.name = registration.name.clone();
            state.description = registration.description.clone();
            state.url = registration.url.clone();
            state.is_fetching = true;
            Ok(state.clone())
        })
    }
}
