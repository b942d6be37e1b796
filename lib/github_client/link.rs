use std::sync::OnceLock;

use regex::Regex;

use super::GithubClientError;
use crate::sync_service::types::RepoRef;

fn repo_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https://github\.com/([a-zA-Z0-9_.-]+)/([a-zA-Z0-9_.-]+?)(?:\.git)?(?:/.*)?$")
            .expect("repository link pattern must compile")
    })
}

/// Extracts owner and repository name from a `https://github.com/<owner>/<repo>[/...]` link.
pub fn parse_repo_link(link: &str) -> Result<RepoRef, GithubClientError> {
    let captures = repo_link_pattern()
        .captures(link.trim())
        .ok_or_else(|| GithubClientError::InvalidLink(link.to_string()))?;

    Ok(RepoRef {
        owner: captures[1].to_string(),
        name: captures[2].to_string(),
    })
}
