pub mod migrations;
pub mod models;
pub mod schema;

use diesel_async::{
    pg::AsyncPgConnection,
    pooled_connection::{
        deadpool::{BuildError, Pool},
        AsyncDieselConnectionManager,
    },
};

pub use migrations::run_pending_migrations;

/// Builds the shared async pool. `max_size` is clamped to at least one connection.
pub async fn build_db_pool(
    db_url: &str,
    max_size: usize,
) -> Result<Pool<AsyncPgConnection>, BuildError> {
    let pool_config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(db_url);
    let pool = Pool::builder(pool_config).max_size(max_size.max(1)).build()?;

    Ok(pool)
}
