//! Process logging for the loader: subscriber setup, the per-run context attached to every event,
//! and the spans that scope consumer loops and individual work messages.

use crate::build_info;
use crate::sync_service::types::RepoRef;
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::Span;
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const SERVICE: &str = "release_loader";

/// Dependencies that are chatty at `info`/`debug` while the loader itself is not.
const QUIET_TARGETS: &[&str] = &[
    "lapin=warn",
    "pinky_swear=warn",
    "hyper=warn",
    "reqwest=warn",
    "tokio_postgres=warn",
    "diesel_migrations=info",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    /// `text`/`pretty` select human-readable output; anything else keeps JSON.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Self::Text,
            _ => Self::Json,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

/// Which subcommand the process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    Register,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Serve => "serve",
            Self::Register => "register",
        }
    }
}

/// Identity of one process run, stamped on the root span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub mode: RunMode,
    pub environment: String,
    pub run_id: String,
    pub format: LogFormat,
}

impl RunContext {
    fn detect(mode: RunMode) -> Self {
        Self {
            mode,
            environment: std::env::var("APP_ENV")
                .or_else(|_| std::env::var("ENVIRONMENT"))
                .unwrap_or_else(|_| "dev".to_string()),
            run_id: build_run_id(mode),
            format: LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default()),
        }
    }

    /// Root span for the whole run. Enter it before anything else logs.
    pub fn run_span(&self) -> Span {
        tracing::info_span!(
            "loader_run",
            service = SERVICE,
            mode = self.mode.as_str(),
            environment = %self.environment,
            run_id = %self.run_id,
            build = build_info::VERSION_WITH_COMMIT
        )
    }
}

/// Span wrapping one consumer loop of the worker pool.
pub fn consumer_span(worker_idx: usize) -> Span {
    tracing::info_span!("consumer", worker_idx, queue = crate::mq::WORK_QUEUE)
}

/// Span wrapping the handling of one work message.
pub fn message_span(repo: &RepoRef, death_count: i64) -> Span {
    tracing::info_span!(
        "work_message",
        owner = %repo.owner,
        repo = %repo.name,
        death_count
    )
}

/// Installs the global subscriber and logs one `logging_initialized` event.
///
/// `RUST_LOG` replaces the default filter entirely when set. Otherwise the loader logs at
/// `level` and the noisy broker/HTTP/DB dependencies are held at `warn`. `log` records from
/// those dependencies are bridged into `tracing`.
pub fn init_logging(mode: RunMode, level: &str) -> RunContext {
    let context = RunContext::detect(mode);
    install_subscriber(context.format, level);

    tracing::info!(
        event = "logging_initialized",
        service = SERVICE,
        mode = context.mode.as_str(),
        environment = %context.environment,
        run_id = %context.run_id,
        build = build_info::VERSION_WITH_COMMIT,
        log_format = context.format.as_str(),
        "initialized logging"
    );
    context
}

fn install_subscriber(format: LogFormat, level: &str) {
    let _ = LogTracer::init();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
    };
    // A second init (tests, repeated commands in one process) keeps the first subscriber.
    drop(installed);
}

fn default_filter(level: &str) -> EnvFilter {
    let directives = std::iter::once(level)
        .chain(QUIET_TARGETS.iter().copied())
        .collect::<Vec<_>>()
        .join(",");
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn build_run_id(mode: RunMode) -> String {
    let started_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("{SERVICE}-{}-{}-{started_ms}", mode.as_str(), std::process::id())
}

/// Renders `err`, each of its sources, and a backtrace taken here.
///
/// Startup failures are usually a refused socket buried under the pool or broker error, so the
/// top-level message alone is rarely enough.
pub fn format_error_report(err: &(dyn StdError + 'static)) -> String {
    let mut report = format!("error: {err}");
    let causes = std::iter::successors(err.source(), |&cause| cause.source());
    for (depth, cause) in causes.enumerate() {
        let _ = write!(report, "\ncaused by ({}): {cause}", depth + 1);
    }
    let _ = write!(report, "\nbacktrace:\n{}", Backtrace::force_capture());
    report
}
