use crate::{
    config::{Config, ConfigOverrides},
    db::{build_db_pool, run_pending_migrations},
    github_client::{parse_repo_link, GithubClient},
    logging::{format_error_report, init_logging, RunMode},
    mq::{self, RepoRequestPublisher},
    server::setup_server_with_addr,
    state::AppState,
    sync_service::{
        build_github_governor, global_rate_limiter, register_repository, types::LoaderConfig,
        GithubReleaseSource, PgSyncStateStore, DEFAULT_GLOBAL_RPS,
    },
    worker::WorkerPool,
};
use clap::Args;
use dotenv::dotenv;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DB_POOL_MAX_SIZE_CAP: usize = 64;
/// GraphQL connections accept at most 100 nodes per page.
const MAX_PAGE_SIZE: i64 = 100;
const AMQP_REPLY_SUCCESS: u16 = 200;

/// Connection settings shared by every subcommand. Unset flags fall back to the environment.
#[derive(Debug, Args, Clone, Default)]
pub struct ConnectionArgs {
    #[arg(long = "database-url")]
    pub database_url: Option<String>,
    #[arg(long = "amqp-url")]
    pub amqp_url: Option<String>,
    #[arg(long = "github-api-url")]
    pub github_api_url: Option<String>,
}

impl ConnectionArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            database_url: self.database_url.clone(),
            amqp_url: self.amqp_url.clone(),
            github_api_url: self.github_api_url.clone(),
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[arg(long = "workers", alias = "num-workers")]
    /// Concurrent consumer loops. Defaults to the available parallelism.
    pub workers: Option<usize>,
    #[arg(long = "page-size", default_value_t = 50)]
    pub page_size: i64,
    #[arg(long = "throttle-ms", default_value_t = 1000)]
    /// Fixed delay between successive page requests of one ingestion.
    pub throttle_ms: u64,
    #[arg(long = "request-timeout-ms", default_value_t = 10_000)]
    pub request_timeout_ms: u64,
    #[arg(long = "global-rps", default_value_t = 10)]
    /// Process-wide cap on GraphQL requests per second across all workers.
    pub global_rps: u32,
    #[arg(long = "max-deaths", default_value_t = 10)]
    /// Messages dead-lettered more often than this are dropped as poison.
    pub max_deaths: i64,

    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
    #[arg(long = "metrics-bind", default_value = "0.0.0.0:3000")]
    pub metrics_bind: String,
}

#[derive(Debug, Args, Clone)]
pub struct RegisterArgs {
    /// Repository link, e.g. https://github.com/rust-lang/rust
    pub link: String,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[arg(long = "request-timeout-ms", default_value_t = 10_000)]
    pub request_timeout_ms: u64,
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}

pub fn resolve_worker_count(args: &ServeArgs) -> usize {
    args.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    })
}

pub fn resolve_db_pool_max_size(resolved_workers: usize) -> usize {
    resolved_workers.min(DB_POOL_MAX_SIZE_CAP).max(1)
}

pub fn loader_config(args: &ServeArgs) -> LoaderConfig {
    LoaderConfig {
        page_size: args.page_size,
        page_throttle: Duration::from_millis(args.throttle_ms),
        max_deaths: args.max_deaths,
    }
}

pub fn validate_serve_args(args: &ServeArgs) -> Result<(), String> {
    if let Some(workers) = args.workers {
        if workers == 0 {
            return Err("--workers/--num-workers must be > 0".to_string());
        }
    }
    if args.page_size <= 0 || args.page_size > MAX_PAGE_SIZE {
        return Err(format!(
            "--page-size must be within 1..={MAX_PAGE_SIZE}, got {}",
            args.page_size
        ));
    }
    if args.request_timeout_ms == 0 {
        return Err("--request-timeout-ms must be > 0".to_string());
    }
    if args.global_rps == 0 {
        return Err("--global-rps must be > 0".to_string());
    }
    if args.max_deaths < 0 {
        return Err(format!(
            "--max-deaths must be >= 0, got {}",
            args.max_deaths
        ));
    }
    args.metrics_bind.parse::<SocketAddr>().map_err(|err| {
        format!(
            "invalid --metrics-bind address `{}`: {err}",
            args.metrics_bind
        )
    })?;

    Ok(())
}

pub fn validate_register_args(args: &RegisterArgs) -> Result<(), String> {
    if args.request_timeout_ms == 0 {
        return Err("--request-timeout-ms must be > 0".to_string());
    }
    parse_repo_link(&args.link).map_err(|err| err.to_string())?;
    Ok(())
}

/// Logs a startup or runtime failure with its full source chain and returns exit code 1.
fn report_failure(event: &'static str, message: &str, err: &(dyn StdError + 'static)) -> i32 {
    let error_report = format_error_report(err);
    error!(
        event = event,
        error = %err,
        error_debug = ?err,
        error_report = %error_report,
        "{message}"
    );
    eprintln!("{message}: {err}");
    eprintln!("{error_report}");
    1
}

/// Waits for SIGTERM or SIGINT and cancels `shutdown_token`. Returns early if the token is
/// cancelled by someone else.
async fn handle_shutdown_signals(shutdown_token: CancellationToken) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            error!(
                event = "signal_handler_failed",
                signal = "SIGTERM",
                error = %err,
                "could not register signal handler"
            );
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(err) => {
            error!(
                event = "signal_handler_failed",
                signal = "SIGINT",
                error = %err,
                "could not register signal handler"
            );
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!(
                event = "shutdown_signal_received",
                signal = "SIGTERM",
                "SIGTERM received, shutting down"
            );
        }
        _ = sigint.recv() => {
            info!(
                event = "shutdown_signal_received",
                signal = "SIGINT",
                "SIGINT received, shutting down"
            );
        }
        _ = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();
}

async fn close_broker(connection: &lapin::Connection) {
    if let Err(err) = connection.close(AMQP_REPLY_SUCCESS, "shutdown").await {
        warn!(
            event = "broker_close_failed",
            error = %err,
            "could not close AMQP connection cleanly"
        );
    }
}

/// Runs the consumer pool until a shutdown signal arrives or every worker has failed.
pub async fn run_serve(args: ServeArgs) -> i32 {
    dotenv().ok();

    let run_context = init_logging(RunMode::Serve, &args.log_level);
    let run_span = run_context.run_span();
    let _run_guard = run_span.enter();

    if let Err(err) = validate_serve_args(&args) {
        eprintln!("{err}");
        return 2;
    }
    let config = match Config::from_env_with_overrides(args.connection.overrides()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };
    let resolved_workers = resolve_worker_count(&args);
    let loader_config = loader_config(&args);
    info!(
        event = "serve_starting",
        workers = resolved_workers,
        page_size = loader_config.page_size,
        throttle_ms = args.throttle_ms,
        global_rps = args.global_rps,
        max_deaths = loader_config.max_deaths,
        github_api_url = %config.github_api_url,
        "starting release loader"
    );

    match run_pending_migrations(&config.db_url).await {
        Ok(applied) => info!(event = "migrations_applied", applied, "database schema is current"),
        Err(err) => return report_failure("migrations_failed", "failed to run migrations", &err),
    }

    let pool = match build_db_pool(&config.db_url, resolve_db_pool_max_size(resolved_workers)).await
    {
        Ok(pool) => pool,
        Err(err) => return report_failure("db_pool_build_failed", "failed to build db pool", &err),
    };
    let broker = match mq::connect(&config.amqp_url).await {
        Ok(connection) => connection,
        Err(err) => {
            return report_failure("broker_connect_failed", "failed to connect to broker", &err)
        }
    };
    let client = match GithubClient::new(
        config.github_api_url.clone(),
        config.github_token.clone(),
        Duration::from_millis(args.request_timeout_ms),
    ) {
        Ok(client) => client,
        Err(err) => {
            return report_failure(
                "github_client_build_failed",
                "failed to build GitHub client",
                &err,
            )
        }
    };

    let state = Arc::new(AppState::new(
        pool.clone(),
        broker,
        CancellationToken::new(),
        run_context.run_id.clone(),
    ));

    let metrics_addr = match args.metrics_bind.parse::<SocketAddr>() {
        Ok(addr) => addr,
        Err(err) => {
            eprintln!("invalid --metrics-bind address `{}`: {err}", args.metrics_bind);
            return 2;
        }
    };
    let metrics_server_handle = match setup_server_with_addr(Arc::clone(&state), metrics_addr).await
    {
        Ok(handle) => handle,
        Err(err) => {
            close_broker(&state.broker).await;
            return report_failure(
                "metrics_server_start_failed",
                "failed to start metrics endpoint",
                &err,
            );
        }
    };
    let signal_handle = tokio::spawn(handle_shutdown_signals(state.shutdown_token.clone()));

    let rate_limiter =
        global_rate_limiter(NonZeroU32::new(args.global_rps).unwrap_or(DEFAULT_GLOBAL_RPS));
    let governor = Arc::new(build_github_governor(client, pool, rate_limiter, loader_config));
    let workers = WorkerPool::spawn(
        resolved_workers,
        Arc::clone(&state.broker),
        governor,
        state.shutdown_token.clone(),
    );

    let result = workers.wait_for_completion().await;

    state.shutdown_token.cancel();
    if let Err(err) = signal_handle.await {
        warn!(event = "signal_task_failed", error = %err, "signal handler task failed");
    }
    if let Err(err) = metrics_server_handle.await {
        warn!(event = "metrics_server_join_failed", error = %err, "metrics server task failed");
    }
    close_broker(&state.broker).await;

    match result {
        Ok(stats) => {
            info!(
                event = "serve_stopped",
                acknowledged = stats.acknowledged,
                requeued = stats.requeued,
                dead_lettered = stats.dead_lettered,
                "release loader stopped"
            );
            0
        }
        Err(err) => report_failure("worker_pool_failed", "worker pool failed", &err),
    }
}

/// Registers one repository and enqueues its first sync.
pub async fn run_register(args: RegisterArgs) -> i32 {
    dotenv().ok();

    let run_context = init_logging(RunMode::Register, &args.log_level);
    let run_span = run_context.run_span();
    let _run_guard = run_span.enter();

    if let Err(err) = validate_register_args(&args) {
        eprintln!("{err}");
        return 2;
    }
    let config = match Config::from_env_with_overrides(args.connection.overrides()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return 2;
        }
    };

    if let Err(err) = run_pending_migrations(&config.db_url).await {
        return report_failure("migrations_failed", "failed to run migrations", &err);
    }
    let pool = match build_db_pool(&config.db_url, 1).await {
        Ok(pool) => pool,
        Err(err) => return report_failure("db_pool_build_failed", "failed to build db pool", &err),
    };
    let client = match GithubClient::new(
        config.github_api_url.clone(),
        config.github_token.clone(),
        Duration::from_millis(args.request_timeout_ms),
    ) {
        Ok(client) => client,
        Err(err) => {
            return report_failure(
                "github_client_build_failed",
                "failed to build GitHub client",
                &err,
            )
        }
    };
    let broker = match mq::connect(&config.amqp_url).await {
        Ok(connection) => connection,
        Err(err) => {
            return report_failure("broker_connect_failed", "failed to connect to broker", &err)
        }
    };
    let publisher = match RepoRequestPublisher::new(&broker).await {
        Ok(publisher) => publisher,
        Err(err) => {
            close_broker(&broker).await;
            return report_failure("publisher_open_failed", "failed to open publish channel", &err);
        }
    };

    let source = GithubReleaseSource::new(client, global_rate_limiter(DEFAULT_GLOBAL_RPS));
    let store = PgSyncStateStore::new(pool);
    let result = register_repository(&source, &store, &publisher, &args.link).await;
    close_broker(&broker).await;

    match result {
        Ok(state) => {
            println!(
                "registered {} ({}/{}), {} known releases",
                state.external_id,
                state.owner,
                state.name,
                state.releases.len()
            );
            0
        }
        Err(err) => report_failure("register_failed", "registration failed", &err),
    }
}
