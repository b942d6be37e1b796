use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::sync_service::types::{ReleaseRecord, RepoSyncState, SourceRegistration};

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = super::schema::sources)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Source {
    pub id: i64,
    pub external_id: String,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub url: String,
    pub releases: serde_json::Value,
    pub is_fetching: bool,
    pub end_cursor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<Source> for RepoSyncState {
    type Error = serde_json::Error;

    fn try_from(row: Source) -> Result<Self, Self::Error> {
        let releases: Vec<ReleaseRecord> = serde_json::from_value(row.releases)?;
        Ok(Self {
            external_id: row.external_id,
            owner: row.owner,
            name: row.name,
            description: row.description,
            url: row.url,
            end_cursor: row.end_cursor,
            is_fetching: row.is_fetching,
            releases,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Insert shape for a first-time registration. Releases and cursor take their column defaults.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = super::schema::sources)]
pub struct NewSource<'a> {
    pub external_id: &'a str,
    pub owner: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub url: &'a str,
    pub is_fetching: bool,
}

impl<'a> From<&'a SourceRegistration> for NewSource<'a> {
    fn from(registration: &'a SourceRegistration) -> Self {
        Self {
            external_id: &registration.external_id,
            owner: &registration.owner,
            name: &registration.name,
            description: registration.description.as_deref(),
            url: &registration.url,
            is_fetching: true,
        }
    }
}
