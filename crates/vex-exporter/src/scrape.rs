use std::{borrow::Cow, sync::Arc, time::Instant};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use vex_common::{VarnishVersion, VexError};
use vex_metrics::{
    CanonicalIdentity, ConstMetric, DescriptorCache, MetricDescriptor, MetricType, encode_text,
};

use crate::{
    config::ExporterConfig,
    decode::decode_dump,
    kind::{backend_health, classify},
    naming::resolve,
    report::FailureReporter,
    source::DumpSource,
    version::SharedVersion,
};

const UP_HELP: &str = "Was the last scrape of varnish successful.";
const TOTAL_SCRAPES_HELP: &str = "Current total varnish scrapes.";
const FAILED_SCRAPES_HELP: &str = "Number of errors while scraping varnish.";
const VERSION_HELP: &str = "Varnish version information";

/// A failed collection cycle: the error plus whatever varnishstat printed
/// before it failed.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ScrapeFailure {
    pub error: VexError,
    /// Captured stdout followed by stderr; empty when nothing ran.
    pub output: Vec<u8>,
}

impl ScrapeFailure {
    pub fn new(error: VexError) -> Self {
        Self {
            error,
            output: Vec::new(),
        }
    }

    pub fn with_output(error: VexError, output: Vec<u8>) -> Self {
        Self { error, output }
    }

    pub fn output_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }
}

impl From<VexError> for ScrapeFailure {
    fn from(error: VexError) -> Self {
        Self::new(error)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeStats {
    pub total_scrapes: u64,
    pub failed_scrapes: u64,
    pub last_up: bool,
}

/// Result of one collection cycle.
///
/// `metrics` always carries the status metrics; counter metrics only when the
/// cycle succeeded. `outcome` is the number of counters resolved.
#[derive(Debug)]
pub struct Collection {
    pub metrics: Vec<ConstMetric>,
    pub outcome: Result<usize, ScrapeFailure>,
}

impl Collection {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Prometheus text exposition of every metric of the cycle.
    pub fn encode(&self) -> vex_common::Result<String> {
        encode_text(&self.metrics)
    }
}

struct StatusDescriptors {
    up: Arc<MetricDescriptor>,
    total_scrapes: Arc<MetricDescriptor>,
    failed_scrapes: Arc<MetricDescriptor>,
}

impl StatusDescriptors {
    fn new(namespace: &str) -> Self {
        let unlabeled = |name: &str, help: &str| {
            Arc::new(MetricDescriptor::from_identity(
                &CanonicalIdentity::unlabeled(format!("{namespace}_{name}")),
                help,
            ))
        };
        Self {
            up: unlabeled("up", UP_HELP),
            total_scrapes: unlabeled("exporter_total_scrapes", TOTAL_SCRAPES_HELP),
            failed_scrapes: unlabeled("exporter_total_failed_scrapes", FAILED_SCRAPES_HELP),
        }
    }
}

struct CycleState {
    stats: ScrapeStats,
    reporter: FailureReporter,
}

/// Drives collection cycles against a [`DumpSource`].
///
/// Cycles are serialized: a caller arriving while a cycle is in flight waits
/// for it to finish and then runs its own. Failures are accounted and returned,
/// never retried and never fatal.
pub struct ScrapeCoordinator {
    source: Arc<dyn DumpSource>,
    config: ExporterConfig,
    version: Arc<SharedVersion>,
    cache: Arc<DescriptorCache>,
    status: StatusDescriptors,
    state: Mutex<CycleState>,
    resolving: Mutex<()>,
}

impl ScrapeCoordinator {
    pub fn new(
        source: Arc<dyn DumpSource>,
        config: ExporterConfig,
        version: Arc<SharedVersion>,
        cache: Arc<DescriptorCache>,
    ) -> Self {
        let status = StatusDescriptors::new(&config.namespace);
        Self {
            source,
            config,
            version,
            cache,
            status,
            state: Mutex::new(CycleState {
                stats: ScrapeStats::default(),
                reporter: FailureReporter::new(),
            }),
            resolving: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<DescriptorCache> {
        &self.cache
    }

    pub fn version(&self) -> &Arc<SharedVersion> {
        &self.version
    }

    pub async fn stats(&self) -> ScrapeStats {
        self.state.lock().await.stats
    }

    /// Runs one full cycle: dump, decode, resolve and emit.
    pub async fn collect(&self) -> Collection {
        self.refresh_version().await;

        let mut state = self.state.lock().await;
        let started = Instant::now();
        let version = self.version.current();

        state.stats.total_scrapes += 1;
        let (mut metrics, outcome) = match self.scrape_counters(&version).await {
            Ok((metrics, counters)) => {
                state.stats.last_up = true;
                state.reporter.success();
                (metrics, Ok(counters))
            }
            Err(failure) => {
                state.stats.failed_scrapes += 1;
                state.stats.last_up = false;
                state.reporter.failure(&failure);
                (Vec::new(), Err(failure))
            }
        };
        metrics.extend(self.status_metrics(&state.stats, &version));

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            metrics = metrics.len(),
            up = state.stats.last_up,
            "collection cycle finished"
        );
        Collection { metrics, outcome }
    }

    /// Retries version resolution when startup could not do it, since varnish
    /// may have been installed later. Runs outside the cycle lock and only one
    /// caller attempts at a time; the others go on with the current version.
    async fn refresh_version(&self) {
        if self.version.is_resolved() {
            return;
        }
        let Ok(_attempt) = self.resolving.try_lock() else {
            return;
        };
        if self.version.is_resolved() {
            return;
        }
        if let Err(failure) = self.version.resolve_from(self.source.as_ref()).await {
            debug!(error = %failure, "varnish version still unresolved");
        }
    }

    /// Every descriptor a cycle may emit: the status metrics plus each
    /// counter family seen so far.
    pub fn describe(&self) -> Vec<Arc<MetricDescriptor>> {
        let mut descriptors = vec![
            Arc::clone(&self.status.up),
            Arc::clone(&self.status.total_scrapes),
            Arc::clone(&self.status.failed_scrapes),
        ];
        let version = self.version.current();
        if version.is_resolved() {
            descriptors.push(Arc::new(version_descriptor(&self.config.namespace, &version)));
        }
        descriptors.extend(self.cache.descriptors());
        descriptors
    }

    async fn scrape_counters(
        &self,
        version: &VarnishVersion,
    ) -> Result<(Vec<ConstMetric>, usize), ScrapeFailure> {
        let args = self.config.params.dump_args(version);
        let output = self.source.dump(&args).await?;
        // the whole dump is decoded before anything touches the cache
        let counters = match decode_dump(&output, self.config.strict) {
            Ok(counters) => counters,
            Err(error) => return Err(ScrapeFailure::with_output(error, output)),
        };

        let namespace = self.config.namespace.as_str();
        let mut metrics = Vec::with_capacity(counters.len());
        for counter in &counters {
            let resolved = resolve(
                namespace,
                &counter.name,
                &counter.identifier,
                &counter.description,
                version,
            );
            let metric_type = classify(counter.flag, resolved.name(), namespace);
            let descriptor = self
                .cache
                .get_or_create(&resolved.identity, &resolved.description);
            metrics.push(ConstMetric::new(
                descriptor,
                metric_type,
                counter.value,
                resolved.label_values.clone(),
            ));

            if let Some(health) = backend_health(&resolved, counter) {
                let descriptor = self.cache.get_or_create(&health.identity, health.help);
                metrics.push(ConstMetric::new(
                    descriptor,
                    MetricType::Gauge,
                    health.value,
                    resolved.label_values,
                ));
            }
        }
        Ok((metrics, counters.len()))
    }

    fn status_metrics(&self, stats: &ScrapeStats, version: &VarnishVersion) -> Vec<ConstMetric> {
        let mut metrics = vec![
            ConstMetric::new(
                Arc::clone(&self.status.up),
                MetricType::Gauge,
                if stats.last_up { 1.0 } else { 0.0 },
                Vec::new(),
            ),
            ConstMetric::new(
                Arc::clone(&self.status.total_scrapes),
                MetricType::Counter,
                stats.total_scrapes as f64,
                Vec::new(),
            ),
            ConstMetric::new(
                Arc::clone(&self.status.failed_scrapes),
                MetricType::Counter,
                stats.failed_scrapes as f64,
                Vec::new(),
            ),
        ];
        if version.is_resolved() {
            let values = version.labels().into_iter().map(|(_, value)| value).collect();
            metrics.push(ConstMetric::new(
                Arc::new(version_descriptor(&self.config.namespace, version)),
                MetricType::Gauge,
                1.0,
                values,
            ));
        }
        metrics
    }
}

/// The version gauge's label keys follow the resolved version, so its
/// descriptor is built per cycle instead of being cached.
fn version_descriptor(namespace: &str, version: &VarnishVersion) -> MetricDescriptor {
    let keys = version.labels().into_iter().map(|(key, _)| key).collect();
    MetricDescriptor::from_identity(
        &CanonicalIdentity::new(format!("{namespace}_version"), keys),
        VERSION_HELP,
    )
}
