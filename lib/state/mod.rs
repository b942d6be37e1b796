use std::sync::Arc;

use diesel_async::{pg::AsyncPgConnection, pooled_connection::deadpool::Pool};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Process-wide handles shared by the worker pool and the metrics server.
pub struct AppState {
    pub pool: Pool<AsyncPgConnection>,
    /// One broker connection; every consumer loop opens its own channel on it.
    pub broker: Arc<lapin::Connection>,
    pub shutdown_token: CancellationToken,
    pub registry: RwLock<Registry>,
    pub run_id: String,
}

impl AppState {
    pub fn new(
        pool: Pool<AsyncPgConnection>,
        broker: lapin::Connection,
        shutdown_token: CancellationToken,
        run_id: String,
    ) -> Self {
        Self {
            pool,
            broker: Arc::new(broker),
            shutdown_token,
            registry: RwLock::new(<Registry>::default()),
            run_id,
        }
    }
}
