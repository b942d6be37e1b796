use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use release_loader_lib::{
    github_client::GithubClient,
    sync_service::{
        global_rate_limiter,
        types::{
            CommitOutcome, FetchMode, LoaderConfig, ReleaseCommit, RepoRef, RepoSyncState,
            SourceErrorKind, SourceRegistration, StoreError, StoreErrorKind, SyncCheckpoint,
            SyncOutcome,
        },
        GithubReleaseSource, ReleaseLoader, ReleaseSource, SyncStateStore,
    },
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "test-token";

#[derive(Debug, Clone)]
struct RecordedRequest {
    operation: &'static str,
    authorization: Option<String>,
    variables: Value,
}

struct ScriptedFailure {
    status: StatusCode,
    rate_limit_remaining: Option<&'static str>,
}

/// GraphQL endpoint answering the three loader operations from fixtures keyed by `after`.
#[derive(Default)]
struct MockGithub {
    probe: Value,
    release_pages: HashMap<Option<String>, Value>,
    tag_pages: HashMap<Option<String>, Value>,
    failure: Option<ScriptedFailure>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockGithub {
    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests mutex poisoned").clone()
    }
}

fn operation_of(query: &str) -> &'static str {
    if query.contains("RepositoryProbe") {
        "probe"
    } else if query.contains("ReleasesPage") {
        "releases"
    } else if query.contains("TagsPage") {
        "tags"
    } else {
        "unknown"
    }
}

async fn graphql_handler(
    State(state): State<Arc<MockGithub>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let query = body["query"].as_str().unwrap_or_default();
    let operation = operation_of(query);
    let variables = body["variables"].clone();
    state
        .requests
        .lock()
        .expect("requests mutex poisoned")
        .push(RecordedRequest {
            operation,
            authorization: headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            variables: variables.clone(),
        });

    if let Some(failure) = &state.failure {
        let mut response_headers = HeaderMap::new();
        if let Some(remaining) = failure.rate_limit_remaining {
            response_headers.insert("x-ratelimit-remaining", HeaderValue::from_static(remaining));
        }
        return (
            failure.status,
            response_headers,
            Json(json!({ "message": "scripted failure" })),
        )
            .into_response();
    }

    let after = variables["after"].as_str().map(str::to_string);
    let payload = match operation {
        "probe" => state.probe.clone(),
        "releases" => state.release_pages.get(&after).cloned().unwrap_or_else(not_found),
        "tags" => state.tag_pages.get(&after).cloned().unwrap_or_else(not_found),
        _ => not_found(),
    };
    (StatusCode::OK, Json(payload)).into_response()
}

fn not_found() -> Value {
    json!({
        "data": { "repository": null },
        "errors": [{ "type": "NOT_FOUND", "message": "Could not resolve to a Repository" }]
    })
}

async fn spawn_mock(state: MockGithub) -> (String, Arc<MockGithub>) {
    let state = Arc::new(state);
    let app = Router::new()
        .route("/graphql", post(graphql_handler))
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind mock GitHub listener");
    let addr = listener
        .local_addr()
        .expect("mock GitHub listener should expose local addr");
    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock GitHub axum server failed");
    });

    (format!("http://{addr}/graphql"), state)
}

fn source_for(api_url: String) -> GithubReleaseSource {
    let client = GithubClient::new(api_url, TOKEN.to_string(), Duration::from_secs(5))
        .expect("client should build");
    let limiter = global_rate_limiter(NonZeroU32::new(1_000).expect("non-zero rps"));
    GithubReleaseSource::new(client, limiter)
}

fn repo() -> RepoRef {
    RepoRef {
        owner: "tokio-rs".to_string(),
        name: "tokio".to_string(),
    }
}

fn probe_body(release_count: i64, tag_count: i64) -> Value {
    json!({
        "data": {
            "repository": {
                "databaseId": 94498635,
                "name": "tokio",
                "url": "https://github.com/tokio-rs/tokio",
                "description": "A runtime for reliable asynchronous applications.",
                "owner": { "login": "tokio-rs" },
                "releases": { "totalCount": release_count },
                "refs": { "totalCount": tag_count }
            }
        }
    })
}

fn release_node(tag: &str, published_at: &str) -> Value {
    json!({
        "id": format!("RE_{tag}"),
        "name": format!("Tokio {tag}"),
        "tagName": tag,
        "publishedAt": published_at,
        "url": format!("https://github.com/tokio-rs/tokio/releases/tag/{tag}")
    })
}

fn releases_body(
    nodes: Vec<Value>,
    end_cursor: &str,
    has_next_page: bool,
    remaining: i64,
) -> Value {
    json!({
        "data": {
            "rateLimit": { "remaining": remaining },
            "repository": {
                "releases": {
                    "pageInfo": { "endCursor": end_cursor, "hasNextPage": has_next_page },
                    "nodes": nodes
                }
            }
        }
    })
}

fn tags_body(nodes: Vec<Value>, end_cursor: &str, has_next_page: bool) -> Value {
    json!({
        "data": {
            "rateLimit": { "remaining": 4999 },
            "repository": {
                "refs": {
                    "pageInfo": { "endCursor": end_cursor, "hasNextPage": has_next_page },
                    "nodes": nodes
                }
            }
        }
    })
}

fn utc(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .expect("fixture timestamp should parse")
        .with_timezone(&Utc)
}

#[tokio::test]
async fn probe_reports_identity_and_counts() {
    let (url, mock) = spawn_mock(MockGithub {
        probe: probe_body(0, 12),
        ..MockGithub::default()
    })
    .await;
    let source = source_for(url);

    let probe = source
        .probe_repository(&repo())
        .await
        .expect("probe should succeed");

    assert_eq!(probe.external_id(), "github/94498635");
    assert_eq!(probe.release_count, 0);
    assert_eq!(probe.tag_count, 12);
    assert_eq!(FetchMode::select(&probe), Some(FetchMode::Tags));
    assert_eq!(probe.url, "https://github.com/tokio-rs/tokio");

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].operation, "probe");
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer test-token"));
    assert_eq!(requests[0].variables["owner"], "tokio-rs");
    assert_eq!(requests[0].variables["name"], "tokio");
}

#[tokio::test]
async fn releases_page_normalizes_nodes() {
    let mut release_pages = HashMap::new();
    release_pages.insert(
        None,
        releases_body(
            vec![
                release_node("tokio-1.0.0", "2020-12-23T18:00:00Z"),
                Value::Null,
                json!({
                    "id": "RE_draft",
                    "name": null,
                    "tagName": "tokio-1.0.1",
                    "publishedAt": null,
                    "url": "https://github.com/tokio-rs/tokio/releases/tag/tokio-1.0.1"
                }),
            ],
            "Y3Vyc29yOjI=",
            true,
            4321,
        ),
    );
    let (url, mock) = spawn_mock(MockGithub {
        release_pages,
        ..MockGithub::default()
    })
    .await;
    let source = source_for(url);

    let page = source
        .fetch_page(&repo(), FetchMode::Releases, None, 50)
        .await
        .expect("page should load");

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.end_cursor.as_deref(), Some("Y3Vyc29yOjI="));
    assert!(page.has_next_page);
    assert_eq!(page.rate_limit_remaining, 4321);
    assert_eq!(page.records[0].published_at, utc("2020-12-23T18:00:00Z"));
    assert_eq!(page.records[1].name, "");
    assert_eq!(page.records[1].published_at, DateTime::<Utc>::UNIX_EPOCH);

    let requests = mock.requests();
    assert_eq!(requests[0].operation, "releases");
    assert_eq!(requests[0].variables["perPage"], 50);
    assert!(requests[0].variables["after"].is_null());
}

#[tokio::test]
async fn tags_page_falls_back_for_lightweight_tags() {
    let mut tag_pages = HashMap::new();
    tag_pages.insert(
        Some("dGFnOjE=".to_string()),
        tags_body(
            vec![
                json!({
                    "id": "REF_annotated",
                    "name": "v0.2.0",
                    "target": {
                        "commitUrl": "https://github.com/tokio-rs/tokio/commit/abc123",
                        "tagger": { "date": "2019-01-02T03:04:05Z" }
                    }
                }),
                json!({ "id": "REF_lightweight", "name": "v0.1.0", "target": {} }),
            ],
            "dGFnOjM=",
            false,
        ),
    );
    let (url, _mock) = spawn_mock(MockGithub {
        tag_pages,
        ..MockGithub::default()
    })
    .await;
    let source = source_for(url);

    let page = source
        .fetch_page(&repo(), FetchMode::Tags, Some("dGFnOjE="), 50)
        .await
        .expect("tag page should load");

    assert!(!page.has_next_page);
    assert_eq!(page.end_cursor.as_deref(), Some("dGFnOjM="));
    let annotated = &page.records[0];
    assert_eq!(annotated.tag_name, "v0.2.0");
    assert_eq!(annotated.url, "https://github.com/tokio-rs/tokio/commit/abc123");
    assert_eq!(
        annotated.published_at,
        Utc.with_ymd_and_hms(2019, 1, 2, 3, 4, 5).unwrap()
    );
    let lightweight = &page.records[1];
    assert_eq!(lightweight.url, "");
    assert_eq!(lightweight.published_at, DateTime::<Utc>::UNIX_EPOCH);
}

#[tokio::test]
async fn too_many_requests_is_rate_limited() {
    let (url, _mock) = spawn_mock(MockGithub {
        failure: Some(ScriptedFailure {
            status: StatusCode::TOO_MANY_REQUESTS,
            rate_limit_remaining: None,
        }),
        ..MockGithub::default()
    })
    .await;

    let err = source_for(url)
        .fetch_page(&repo(), FetchMode::Releases, None, 50)
        .await
        .expect_err("429 should fail");
    assert_eq!(err.kind, SourceErrorKind::RateLimited);
    assert!(err.is_rate_limited());
}

#[tokio::test]
async fn forbidden_depends_on_remaining_budget() {
    let (exhausted_url, _exhausted) = spawn_mock(MockGithub {
        failure: Some(ScriptedFailure {
            status: StatusCode::FORBIDDEN,
            rate_limit_remaining: Some("0"),
        }),
        ..MockGithub::default()
    })
    .await;
    let (denied_url, _denied) = spawn_mock(MockGithub {
        failure: Some(ScriptedFailure {
            status: StatusCode::FORBIDDEN,
            rate_limit_remaining: Some("4000"),
        }),
        ..MockGithub::default()
    })
    .await;

    let exhausted = source_for(exhausted_url)
        .probe_repository(&repo())
        .await
        .expect_err("403 should fail");
    let denied = source_for(denied_url)
        .probe_repository(&repo())
        .await
        .expect_err("403 should fail");

    assert_eq!(exhausted.kind, SourceErrorKind::RateLimited);
    assert_eq!(denied.kind, SourceErrorKind::Forbidden);
}

#[tokio::test]
async fn unauthorized_is_classified() {
    let (url, _mock) = spawn_mock(MockGithub {
        failure: Some(ScriptedFailure {
            status: StatusCode::UNAUTHORIZED,
            rate_limit_remaining: None,
        }),
        ..MockGithub::default()
    })
    .await;

    let err = source_for(url)
        .probe_repository(&repo())
        .await
        .expect_err("401 should fail");
    assert_eq!(err.kind, SourceErrorKind::Unauthorized);
}

#[tokio::test]
async fn unknown_repository_is_not_found() {
    let (url, _mock) = spawn_mock(MockGithub {
        probe: not_found(),
        ..MockGithub::default()
    })
    .await;

    let err = source_for(url)
        .probe_repository(&repo())
        .await
        .expect_err("missing repository should fail");
    assert_eq!(err.kind, SourceErrorKind::NotFound);
}

#[tokio::test]
async fn graphql_rate_limit_error_is_rate_limited() {
    let mut release_pages = HashMap::new();
    release_pages.insert(
        None,
        json!({
            "data": null,
            "errors": [{ "type": "RATE_LIMITED", "message": "API rate limit exceeded" }]
        }),
    );
    let (url, _mock) = spawn_mock(MockGithub {
        release_pages,
        ..MockGithub::default()
    })
    .await;

    let err = source_for(url)
        .fetch_page(&repo(), FetchMode::Releases, None, 50)
        .await
        .expect_err("rate-limited GraphQL response should fail");
    assert_eq!(err.kind, SourceErrorKind::RateLimited);
}

#[tokio::test]
async fn zero_remaining_budget_is_reported_on_the_page() {
    let mut release_pages = HashMap::new();
    release_pages.insert(
        None,
        releases_body(
            vec![release_node("tokio-1.0.0", "2020-12-23T18:00:00Z")],
            "c1",
            true,
            0,
        ),
    );
    let (url, _mock) = spawn_mock(MockGithub {
        release_pages,
        ..MockGithub::default()
    })
    .await;

    let page = source_for(url)
        .fetch_page(&repo(), FetchMode::Releases, None, 50)
        .await
        .expect("page should load");
    assert!(page.is_rate_limited());
}

/// Single-row store recording the commit it receives.
struct SingleRowStore {
    checkpoint: Mutex<SyncCheckpoint>,
    commits: Mutex<Vec<ReleaseCommit>>,
}

impl SingleRowStore {
    fn new(external_id: &str) -> Self {
        Self {
            checkpoint: Mutex::new(SyncCheckpoint {
                external_id: external_id.to_string(),
                end_cursor: None,
                is_fetching: true,
            }),
            commits: Mutex::new(Vec::new()),
        }
    }
}

impl SyncStateStore for SingleRowStore {
    fn load_checkpoint<'a>(
        &'a self,
        external_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<SyncCheckpoint>, StoreError>> {
        Box::pin(async move {
            let checkpoint = self.checkpoint.lock().expect("checkpoint mutex poisoned");
            Ok((checkpoint.external_id == external_id).then(|| checkpoint.clone()))
        })
    }

    fn set_in_progress<'a>(
        &'a self,
        _external_id: &'a str,
        in_progress: bool,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.checkpoint
                .lock()
                .expect("checkpoint mutex poisoned")
                .is_fetching = in_progress;
            Ok(())
        })
    }

    fn commit_releases<'a>(
        &'a self,
        commit: &'a ReleaseCommit,
    ) -> BoxFuture<'a, Result<CommitOutcome, StoreError>> {
        Box::pin(async move {
            let mut checkpoint = self.checkpoint.lock().expect("checkpoint mutex poisoned");
            if checkpoint.end_cursor != commit.expected_cursor {
                return Ok(CommitOutcome::LostRace);
            }
            checkpoint.end_cursor = commit.new_cursor.clone();
            self.commits
                .lock()
                .expect("commits mutex poisoned")
                .push(commit.clone());
            Ok(CommitOutcome::Applied)
        })
    }

    fn register_source<'a>(
        &'a self,
        _registration: &'a SourceRegistration,
    ) -> BoxFuture<'a, Result<RepoSyncState, StoreError>> {
        Box::pin(async move {
            Err(StoreError::new(
                StoreErrorKind::Query,
                "registration is not exercised here",
            ))
        })
    }
}

#[tokio::test]
async fn loader_pages_over_http_and_commits_once() {
    let mut release_pages = HashMap::new();
    release_pages.insert(
        None,
        releases_body(
            vec![
                release_node("v1.0.0", "2020-12-23T18:00:00Z"),
                release_node("v1.1.0-rc.1", "2021-01-20T18:00:00Z"),
            ],
            "c1",
            true,
            4000,
        ),
    );
    release_pages.insert(
        Some("c1".to_string()),
        releases_body(
            vec![release_node("v1.1.0", "2021-01-22T18:00:00Z")],
            "c2",
            false,
            3999,
        ),
    );
    let (url, mock) = spawn_mock(MockGithub {
        probe: probe_body(3, 40),
        release_pages,
        ..MockGithub::default()
    })
    .await;
    let store = Arc::new(SingleRowStore::new("github/94498635"));
    let loader = ReleaseLoader::new(
        source_for(url),
        Arc::clone(&store),
        LoaderConfig {
            page_size: 2,
            page_throttle: Duration::from_millis(1),
            max_deaths: 10,
        },
    );

    let outcome = loader
        .sync_repository(&repo(), &CancellationToken::new())
        .await
        .expect("sync should succeed");

    assert_eq!(
        outcome,
        SyncOutcome::Committed {
            appended: 2,
            end_cursor: Some("c2".to_string()),
        }
    );
    let operations: Vec<&str> = mock.requests().iter().map(|r| r.operation).collect();
    assert_eq!(operations, vec!["probe", "releases", "releases"]);

    let commits = store.commits.lock().expect("commits mutex poisoned").clone();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].expected_cursor, None);
    let tags: Vec<&str> = commits[0]
        .releases
        .iter()
        .map(|release| release.tag_name.as_str())
        .collect();
    assert_eq!(tags, vec!["v1.0.0", "v1.1.0"]);
    assert!(!store
        .checkpoint
        .lock()
        .expect("checkpoint mutex poisoned")
        .is_fetching);
}
