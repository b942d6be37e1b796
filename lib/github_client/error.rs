use thiserror::Error;

#[derive(Error, Debug)]
pub enum GithubClientError {
    #[error("unexpected HTTP status while querying {resource}: {status}")]
    UnexpectedStatus {
        resource: String,
        status: u16,
        /// Parsed `x-ratelimit-remaining` header, when the response carried one.
        rate_limit_remaining: Option<i64>,
    },
    #[error("GraphQL error while querying {resource} ({}): {message}", .kind.as_deref().unwrap_or("unknown"))]
    Graphql {
        resource: String,
        kind: Option<String>,
        message: String,
    },
    #[error("repository {owner}/{name} not found")]
    RepositoryNotFound { owner: String, name: String },
    #[error("GraphQL response for {0} carried no data")]
    MissingData(String),
    #[error("invalid GitHub repository link: {0}")]
    InvalidLink(String),
    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}
