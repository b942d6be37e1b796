pub mod error;
pub mod link;
pub mod queries;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

pub use error::GithubClientError;
pub use link::parse_repo_link;
use queries::{
    GraphqlResponse, PagedNodes, ReleaseNode, ReleasesPageData, RepositoryProbeData,
    RepositoryProbeNode, TagRefNode, TagsPageData, REPOSITORY_PROBE_QUERY, RELEASES_PAGE_QUERY,
    TAGS_PAGE_QUERY,
};

const USER_AGENT: &str = concat!("release_loader/", env!("CARGO_PKG_VERSION"));
const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Thin GitHub GraphQL v4 client. One instance is shared by all workers.
pub struct GithubClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl GithubClient {
    pub fn new(
        api_url: String,
        token: String,
        request_timeout: Duration,
    ) -> Result<Self, GithubClientError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            api_url,
            token,
        })
    }

    pub async fn probe_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<RepositoryProbeNode, GithubClientError> {
        let data: RepositoryProbeData = self
            .execute(
                "repository probe",
                REPOSITORY_PROBE_QUERY,
                json!({ "owner": owner, "name": name }),
            )
            .await?;

        data.repository
            .ok_or_else(|| GithubClientError::RepositoryNotFound {
                owner: owner.to_string(),
                name: name.to_string(),
            })
    }

    pub async fn releases_page(
        &self,
        owner: &str,
        name: &str,
        after: Option<&str>,
        per_page: i64,
    ) -> Result<PagedNodes<ReleaseNode>, GithubClientError> {
        let data: ReleasesPageData = self
            .execute(
                "releases page",
                RELEASES_PAGE_QUERY,
                json!({ "owner": owner, "name": name, "perPage": per_page, "after": after }),
            )
            .await?;

        let repository = data
            .repository
            .ok_or_else(|| GithubClientError::RepositoryNotFound {
                owner: owner.to_string(),
                name: name.to_string(),
            })?;
        let rate_limit = data
            .rate_limit
            .ok_or_else(|| GithubClientError::MissingData("releases page rateLimit".to_string()))?;

        Ok(PagedNodes {
            connection: repository.releases,
            rate_limit_remaining: rate_limit.remaining,
        })
    }

    pub async fn tags_page(
        &self,
        owner: &str,
        name: &str,
        after: Option<&str>,
        per_page: i64,
    ) -> Result<PagedNodes<TagRefNode>, GithubClientError> {
        let data: TagsPageData = self
            .execute(
                "tags page",
                TAGS_PAGE_QUERY,
                json!({ "owner": owner, "name": name, "perPage": per_page, "after": after }),
            )
            .await?;

        let repository = data
            .repository
            .ok_or_else(|| GithubClientError::RepositoryNotFound {
                owner: owner.to_string(),
                name: name.to_string(),
            })?;
        let refs = repository
            .refs
            .ok_or_else(|| GithubClientError::MissingData("tags page refs".to_string()))?;
        let rate_limit = data
            .rate_limit
            .ok_or_else(|| GithubClientError::MissingData("tags page rateLimit".to_string()))?;

        Ok(PagedNodes {
            connection: refs,
            rate_limit_remaining: rate_limit.remaining,
        })
    }

    async fn execute<V, T>(
        &self,
        resource: &str,
        query: &str,
        variables: V,
    ) -> Result<T, GithubClientError>
    where
        V: Serialize,
        T: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(&self.api_url)
            .json(&json!({ "query": query, "variables": variables }));
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let rate_limit_remaining = response
                .headers()
                .get(RATE_LIMIT_REMAINING_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<i64>().ok());
            return Err(GithubClientError::UnexpectedStatus {
                resource: resource.to_string(),
                status: status.as_u16(),
                rate_limit_remaining,
            });
        }

        let body: GraphqlResponse<T> = response.json().await?;
        if let Some(first) = body.errors.first() {
            let message = body
                .errors
                .iter()
                .map(|err| err.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(GithubClientError::Graphql {
                resource: resource.to_string(),
                kind: first.kind.clone(),
                message,
            });
        }

        body.data
            .ok_or_else(|| GithubClientError::MissingData(resource.to_string()))
    }
}
