use crate::build_info;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

use crate::sync_service::types::Disposition;

/// Registers immutable build metadata for `/metrics` scraping.
///
/// Encoded as a labeled gauge with value `1` so it stays valid text exposition while still
/// carrying stable build labels.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "release_loader",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DispositionLabels {
    pub disposition: &'static str,
}

impl From<Disposition> for DispositionLabels {
    fn from(disposition: Disposition) -> Self {
        Self {
            disposition: disposition.as_str(),
        }
    }
}

#[derive(Clone)]
pub struct LoaderMetrics {
    /// Final queue dispositions, labelled `ack`, `requeue` or `dead_letter`.
    pub messages: Family<DispositionLabels, Counter>,
    /// Non-prerelease records persisted by successful commits.
    pub releases_committed: Counter,
    /// Ingestions that stopped on an exhausted provider budget.
    pub rate_limited: Counter,
    /// Conditional commits that matched no row because another ingestion moved the cursor.
    pub lost_races: Counter,
    pub pages_fetched: Counter,
    pub worker_alive_count: Gauge,
}

impl LoaderMetrics {
    fn init() -> Self {
        Self {
            messages: Family::default(),
            releases_committed: Counter::default(),
            rate_limited: Counter::default(),
            lost_races: Counter::default(),
            pages_fetched: Counter::default(),
            worker_alive_count: Gauge::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "messages",
            "Work messages settled, by final queue disposition",
            metrics.messages.clone(),
        );
        sub_registry.register(
            "releases_committed",
            "Total number of release records committed",
            metrics.releases_committed.clone(),
        );
        sub_registry.register(
            "rate_limited",
            "Total number of ingestions stopped by the provider rate limit",
            metrics.rate_limited.clone(),
        );
        sub_registry.register(
            "lost_races",
            "Total number of commits that lost the cursor race",
            metrics.lost_races.clone(),
        );
        sub_registry.register(
            "pages_fetched",
            "Total number of remote pages fetched",
            metrics.pages_fetched.clone(),
        );
        sub_registry.register(
            "worker_alive_count",
            "Number of live consumer loops",
            metrics.worker_alive_count.clone(),
        );
        metrics
    }

    pub fn record_disposition(&self, disposition: Disposition) {
        self.messages
            .get_or_create(&DispositionLabels::from(disposition))
            .inc();
    }
}

pub static LOADER_METRICS: OnceCell<LoaderMetrics> = OnceCell::const_new();
