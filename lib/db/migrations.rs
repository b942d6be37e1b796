use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use thiserror::Error;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("could not connect to run migrations: {0}")]
    Connect(#[from] diesel::ConnectionError),
    #[error("migration failed: {0}")]
    Run(String),
    #[error("migration task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Applies pending embedded migrations over a short-lived blocking connection.
pub async fn run_pending_migrations(db_url: &str) -> Result<usize, MigrationError> {
    let db_url = db_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut connection = PgConnection::establish(&db_url)?;
        let applied = connection
            .run_pending_migrations(MIGRATIONS)
            .map_err(|err| MigrationError::Run(err.to_string()))?;
        Ok(applied.len())
    })
    .await?
}
