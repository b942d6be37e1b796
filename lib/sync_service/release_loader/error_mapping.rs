use std::error::Error as StdError;

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::PoolError;

use crate::github_client::GithubClientError;

use super::super::types::{SourceError, SourceErrorKind, StoreError, StoreErrorKind};

const GRAPHQL_RATE_LIMITED: &str = "RATE_LIMITED";
const GRAPHQL_NOT_FOUND: &str = "NOT_FOUND";

pub fn map_github_error(error: GithubClientError) -> SourceError {
    match error {
        GithubClientError::UnexpectedStatus {
            resource,
            status,
            rate_limit_remaining,
        } => map_status_to_source_error(&resource, status, rate_limit_remaining),
        GithubClientError::Graphql {
            resource,
            kind,
            message,
        } => match kind.as_deref() {
            Some(GRAPHQL_RATE_LIMITED) => SourceError::new(
                SourceErrorKind::RateLimited,
                format!("GraphQL rate limit reported while querying {resource}: {message}"),
            ),
            Some(GRAPHQL_NOT_FOUND) => SourceError::new(
                SourceErrorKind::NotFound,
                format!("not found while querying {resource}: {message}"),
            ),
            _ => SourceError::new(
                SourceErrorKind::Other,
                format!("GraphQL error while querying {resource}: {message}"),
            ),
        },
        GithubClientError::RepositoryNotFound { owner, name } => SourceError::new(
            SourceErrorKind::NotFound,
            format!("repository {owner}/{name} not found"),
        ),
        GithubClientError::MissingData(resource) => SourceError::new(
            SourceErrorKind::MalformedResponse,
            format!("GraphQL response for {resource} carried no data"),
        ),
        GithubClientError::InvalidLink(link) => SourceError::new(
            SourceErrorKind::Other,
            format!("invalid repository link: {link}"),
        ),
        GithubClientError::RequestError(req_err) => {
            tracing::debug!(
                event = "github_request_error_diagnostics",
                reqwest_status = ?req_err.status(),
                reqwest_url = ?req_err.url().map(|url| url.as_str()),
                reqwest_is_timeout = req_err.is_timeout(),
                reqwest_is_connect = req_err.is_connect(),
                reqwest_is_decode = req_err.is_decode(),
                reqwest_error_chain = %render_error_chain(&req_err),
                "captured reqwest diagnostics while querying GitHub"
            );

            if let Some(status) = req_err.status() {
                return map_status_to_source_error("GraphQL endpoint", status.as_u16(), None);
            }
            if req_err.is_decode() {
                return SourceError::new(
                    SourceErrorKind::MalformedResponse,
                    format!("undecodable GraphQL response: {req_err}"),
                );
            }
            if req_err.is_timeout()
                || req_err.is_connect()
                || req_err.is_request()
                || req_err.is_body()
            {
                return SourceError::new(
                    SourceErrorKind::Network,
                    format!("network/transport error while querying GitHub: {req_err}"),
                );
            }
            SourceError::new(SourceErrorKind::Other, format!("{req_err:#}"))
        }
    }
}

fn map_status_to_source_error(
    resource: &str,
    status: u16,
    rate_limit_remaining: Option<i64>,
) -> SourceError {
    match status {
        401 => SourceError::new(
            SourceErrorKind::Unauthorized,
            format!("unauthorized while querying {resource}"),
        ),
        403 if rate_limit_remaining == Some(0) => SourceError::new(
            SourceErrorKind::RateLimited,
            format!("rate limit budget exhausted while querying {resource}"),
        ),
        403 => SourceError::new(
            SourceErrorKind::Forbidden,
            format!("forbidden while querying {resource}"),
        ),
        404 => SourceError::new(
            SourceErrorKind::NotFound,
            format!("not found while querying {resource}"),
        ),
        429 => SourceError::new(
            SourceErrorKind::RateLimited,
            format!("rate limited while querying {resource}"),
        ),
        500..=599 => SourceError::new(
            SourceErrorKind::UpstreamUnavailable,
            format!("upstream server error {status} while querying {resource}"),
        ),
        _ => SourceError::new(
            SourceErrorKind::Other,
            format!("unexpected HTTP status {status} while querying {resource}"),
        ),
    }
}

pub fn map_diesel_error(error: DieselError) -> StoreError {
    match error {
        DieselError::DatabaseError(kind, info) => match kind {
            DatabaseErrorKind::ClosedConnection | DatabaseErrorKind::UnableToSendCommand => {
                StoreError::new(
                    StoreErrorKind::Connection,
                    format!("database connection error ({kind:?}): {}", info.message()),
                )
            }
            _ => StoreError::new(
                StoreErrorKind::Query,
                format!("database error ({kind:?}): {}", info.message()),
            ),
        },
        DieselError::DeserializationError(err) | DieselError::SerializationError(err) => {
            StoreError::new(
                StoreErrorKind::Encoding,
                format!("row encoding error: {err}"),
            )
        }
        other => StoreError::new(StoreErrorKind::Query, format!("diesel error: {other}")),
    }
}

pub fn map_pool_error(error: PoolError) -> StoreError {
    StoreError::new(
        StoreErrorKind::Connection,
        format!("could not check out a database connection: {error}"),
    )
}

pub fn map_json_error(error: serde_json::Error) -> StoreError {
    StoreError::new(
        StoreErrorKind::Encoding,
        format!("release list encoding error: {error}"),
    )
}

fn render_error_chain(error: &reqwest::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(next) = source {
        parts.push(next.to_string());
        source = next.source();
    }
    parts.join(" | caused_by: ")
}
