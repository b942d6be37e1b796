//! GraphQL documents and response shapes for the GitHub v4 API.

use chrono::{DateTime, Utc};
use serde::Deserialize;

pub const REPOSITORY_PROBE_QUERY: &str = r#"
query RepositoryProbe($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    databaseId
    name
    url
    description
    owner { login }
    releases { totalCount }
    refs(refPrefix: "refs/tags/") { totalCount }
  }
}
"#;

pub const RELEASES_PAGE_QUERY: &str = r#"
query ReleasesPage($owner: String!, $name: String!, $perPage: Int!, $after: String) {
  rateLimit { remaining }
  repository(owner: $owner, name: $name) {
    releases(first: $perPage, after: $after, orderBy: {field: CREATED_AT, direction: ASC}) {
      pageInfo { endCursor hasNextPage }
      nodes { id name tagName publishedAt url }
    }
  }
}
"#;

pub const TAGS_PAGE_QUERY: &str = r#"
query TagsPage($owner: String!, $name: String!, $perPage: Int!, $after: String) {
  rateLimit { remaining }
  repository(owner: $owner, name: $name) {
    refs(
      refPrefix: "refs/tags/"
      first: $perPage
      after: $after
      orderBy: {field: TAG_COMMIT_DATE, direction: ASC}
    ) {
      pageInfo { endCursor hasNextPage }
      nodes {
        id
        name
        target {
          ... on Tag {
            commitUrl
            tagger { date }
          }
        }
      }
    }
  }
}
"#;

#[derive(Deserialize, Debug)]
pub(crate) struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct GraphqlError {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TotalCount {
    pub total_count: i64,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OwnerNode {
    pub login: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryProbeNode {
    pub database_id: i64,
    pub name: String,
    pub url: String,
    pub description: Option<String>,
    pub owner: OwnerNode,
    pub releases: TotalCount,
    pub refs: Option<TotalCount>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RepositoryProbeData {
    pub repository: Option<RepositoryProbeNode>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitNode {
    pub remaining: i64,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    #[serde(default)]
    pub has_next_page: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Connection<N> {
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
    #[serde(default = "Vec::new")]
    pub nodes: Vec<Option<N>>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseNode {
    pub id: String,
    pub name: Option<String>,
    pub tag_name: String,
    pub published_at: Option<DateTime<Utc>>,
    pub url: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TaggerNode {
    pub date: Option<DateTime<Utc>>,
}

/// Target of a tag ref. Only annotated tags expose `commitUrl`/`tagger`; lightweight tags
/// deserialize to an empty target.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TagTargetNode {
    #[serde(default)]
    pub commit_url: Option<String>,
    #[serde(default)]
    pub tagger: Option<TaggerNode>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TagRefNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub target: Option<TagTargetNode>,
}

/// One page of a paged listing plus the remaining rate-limit budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedNodes<N> {
    pub connection: Connection<N>,
    pub rate_limit_remaining: i64,
}

#[derive(Deserialize, Debug)]
pub(crate) struct ReleasesRepository {
    pub releases: Connection<ReleaseNode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReleasesPageData {
    pub rate_limit: Option<RateLimitNode>,
    pub repository: Option<ReleasesRepository>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct TagsRepository {
    pub refs: Option<Connection<TagRefNode>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TagsPageData {
    pub rate_limit: Option<RateLimitNode>,
    pub repository: Option<TagsRepository>,
}
