use std::sync::Arc;

use diesel::dsl::now;
use diesel::pg::upsert::excluded;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Jsonb, Nullable, Text};
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::RunQueryDsl;
use futures::future::BoxFuture;

use crate::db::models::{NewSource, Source};
use crate::db::schema::sources;

use super::super::types::{
    CommitOutcome, ReleaseCommit, RepoSyncState, SourceRegistration, StoreError, SyncCheckpoint,
};
use super::error_mapping::{map_diesel_error, map_json_error, map_pool_error};

/// Appends the new records, re-sorts the whole list by publish time (ties by tag, then id) and
/// moves the cursor, but only while the stored cursor still equals the one read at the start of
/// the ingestion.
const COMMIT_RELEASES_SQL: &str = r#"
UPDATE sources
SET end_cursor = $1,
    is_fetching = FALSE,
    updated_at = NOW(),
    releases = (
        SELECT COALESCE(
            jsonb_agg(
                merged.release
                ORDER BY (merged.release ->> 'published_at')::timestamptz ASC,
                         (merged.release ->> 'tag_name') COLLATE "C" ASC,
                         (merged.release ->> 'id') COLLATE "C" ASC
            ),
            '[]'::jsonb
        )
        FROM jsonb_array_elements(sources.releases || $2) AS merged(release)
    )
WHERE external_id = $3
  AND end_cursor IS NOT DISTINCT FROM $4
"#;

/// Durable per-repository sync state.
///
/// Injected into every orchestrator instance so tests can swap in an in-memory store and force
/// commit races deterministically.
pub trait SyncStateStore: Send + Sync {
    /// Narrow read used on the hot path; avoids decoding the embedded release list.
    fn load_checkpoint<'a>(
        &'a self,
        external_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<SyncCheckpoint>, StoreError>>;

    fn set_in_progress<'a>(
        &'a self,
        external_id: &'a str,
        in_progress: bool,
    ) -> BoxFuture<'a, Result<(), StoreError>>;

    fn commit_releases<'a>(
        &'a self,
        commit: &'a ReleaseCommit,
    ) -> BoxFuture<'a, Result<CommitOutcome, StoreError>>;

    /// Creates the state on first registration; on conflict refreshes metadata and marks it in
    /// progress while keeping releases and cursor.
    fn register_source<'a>(
        &'a self,
        registration: &'a SourceRegistration,
    ) -> BoxFuture<'a, Result<RepoSyncState, StoreError>>;
}

impl<T> SyncStateStore for Arc<T>
where
    T: SyncStateStore + ?Sized,
{
    fn load_checkpoint<'a>(
        &'a self,
        external_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<SyncCheckpoint>, StoreError>> {
        (**self).load_checkpoint(external_id)
    }

    fn set_in_progress<'a>(
        &'a self,
        external_id: &'a str,
        in_progress: bool,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        (**self).set_in_progress(external_id, in_progress)
    }

    fn commit_releases<'a>(
        &'a self,
        commit: &'a ReleaseCommit,
    ) -> BoxFuture<'a, Result<CommitOutcome, StoreError>> {
        (**self).commit_releases(commit)
    }

    fn register_source<'a>(
        &'a self,
        registration: &'a SourceRegistration,
    ) -> BoxFuture<'a, Result<RepoSyncState, StoreError>> {
        (**self).register_source(registration)
    }
}

/// Postgres-backed store used by the production runtime.
pub struct PgSyncStateStore {
    pool: Pool<diesel_async::AsyncPgConnection>,
}

impl PgSyncStateStore {
    pub fn new(pool: Pool<diesel_async::AsyncPgConnection>) -> Self {
        Self { pool }
    }
}

impl SyncStateStore for PgSyncStateStore {
    fn load_checkpoint<'a>(
        &'a self,
        external_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<SyncCheckpoint>, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await.map_err(map_pool_error)?;
            let row = sources::table
                .filter(sources::external_id.eq(external_id))
                .select((
                    sources::external_id,
                    sources::end_cursor,
                    sources::is_fetching,
                ))
                .first::<(String, Option<String>, bool)>(&mut conn)
                .await
                .optional()
                .map_err(map_diesel_error)?;

            Ok(row.map(|(external_id, end_cursor, is_fetching)| SyncCheckpoint {
                external_id,
                end_cursor,
                is_fetching,
            }))
        })
    }

    fn set_in_progress<'a>(
        &'a self,
        external_id: &'a str,
        in_progress: bool,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await.map_err(map_pool_error)?;
            diesel::update(sources::table.filter(sources::external_id.eq(external_id)))
                .set((
                    sources::is_fetching.eq(in_progress),
                    sources::updated_at.eq(now),
                ))
                .execute(&mut conn)
                .await
                .map_err(map_diesel_error)?;
            Ok(())
        })
    }

    fn commit_releases<'a>(
        &'a self,
        commit: &'a ReleaseCommit,
    ) -> BoxFuture<'a, Result<CommitOutcome, StoreError>> {
        Box::pin(async move {
            let releases = serde_json::to_value(&commit.releases).map_err(map_json_error)?;
            let mut conn = self.pool.get().await.map_err(map_pool_error)?;
            let updated = sql_query(COMMIT_RELEASES_SQL)
                .bind::<Nullable<Text>, _>(commit.new_cursor.as_deref())
                .bind::<Jsonb, _>(releases)
                .bind::<Text, _>(commit.external_id.as_str())
                .bind::<Nullable<Text>, _>(commit.expected_cursor.as_deref())
                .execute(&mut conn)
                .await
                .map_err(map_diesel_error)?;

            Ok(if updated == 0 {
                CommitOutcome::LostRace
            } else {
                CommitOutcome::Applied
            })
        })
    }

    fn register_source<'a>(
        &'a self,
        registration: &'a SourceRegistration,
    ) -> BoxFuture<'a, Result<RepoSyncState, StoreError>> {
        Box::pin(async move {
            let mut conn = self.pool.get().await.map_err(map_pool_error)?;
            let row = diesel::insert_into(sources::table)
                .values(NewSource::from(registration))
                .on_conflict(sources::external_id)
                .do_update()
                .set((
                    sources::owner.eq(excluded(sources::owner)),
                    sources::name.eq(excluded(sources::name)),
                    sources::description.eq(excluded(sources::description)),
                    sources::url.eq(excluded(sources::url)),
                    sources::is_fetching.eq(true),
                    sources::updated_at.eq(now),
                ))
                .returning(Source::as_returning())
                .get_result::<Source>(&mut conn)
                .await
                .map_err(map_diesel_error)?;

            RepoSyncState::try_from(row).map_err(map_json_error)
        })
    }
}
