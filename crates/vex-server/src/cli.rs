use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vex_exporter::{
    ExporterConfig, VarnishstatParams,
    config::DEFAULT_NAMESPACE,
    source::DEFAULT_VARNISHSTAT,
};

const LOG_TARGETS: [&str; 4] = ["varnish_exporter", "vex_exporter", "vex_metrics", "tower_http"];

#[derive(Debug, Parser)]
#[command(
    name = "varnish_exporter",
    version,
    about = "Prometheus exporter for varnishstat counters"
)]
pub struct Cli {
    /// Address on which to expose metrics; a leading ':' listens on every
    /// interface.
    #[arg(long = "web.listen-address", default_value = ":9131")]
    pub listen_address: String,

    /// Path under which to expose metrics.
    #[arg(long = "web.telemetry-path", default_value = "/metrics")]
    pub telemetry_path: String,

    /// Path under which to expose a health check. Disabled unless set.
    #[arg(long = "web.health-path")]
    pub health_path: Option<String>,

    /// varnishstat -n value.
    #[arg(short = 'n')]
    pub instance: Option<String>,

    /// varnishstat -N value.
    #[arg(short = 'N')]
    pub vsm: Option<String>,

    #[arg(long = "varnishstat-path", default_value = DEFAULT_VARNISHSTAT)]
    pub varnishstat_path: String,

    /// Seconds varnishstat waits for a running varnishd (4.1 and newer).
    #[arg(long = "varnishstat.wait", default_value_t = 1)]
    pub wait_secs: u64,

    /// Seconds before a varnishstat run is killed; 0 disables the limit.
    #[arg(long = "varnishstat.timeout", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Prefix of every exported metric name.
    #[arg(long = "exporter.namespace", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Stop serving after a failed scrape and exit non-zero.
    #[arg(long = "exit-on-errors", default_value_t = false)]
    pub exit_on_errors: bool,

    /// Verbose logging.
    #[arg(long, default_value_t = false)]
    pub verbose: bool,

    /// Log without timestamps.
    #[arg(long, default_value_t = false)]
    pub raw: bool,

    /// Test varnishstat availability, print the available metrics and exit.
    #[arg(long, default_value_t = false)]
    pub test: bool,
}

impl Cli {
    pub fn validate(&self) -> Result<()> {
        if !self.telemetry_path.starts_with('/') {
            bail!(
                "--web.telemetry-path cannot be empty and must start with a slash '/', given {:?}",
                self.telemetry_path
            );
        }
        if let Some(health_path) = &self.health_path {
            if !health_path.starts_with('/') {
                bail!("--web.health-path must start with a slash '/' if configured, given {health_path:?}");
            }
            if *health_path == self.telemetry_path {
                bail!("--web.telemetry-path and --web.health-path cannot have same value");
            }
        }
        if !is_metric_name(&self.namespace) {
            bail!("--exporter.namespace {:?} is not a valid metric name prefix", self.namespace);
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        match self.listen_address.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.listen_address.clone(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn exporter_config(&self) -> ExporterConfig {
        ExporterConfig {
            namespace: self.namespace.clone(),
            // test runs double as a check for counter properties we do not know
            strict: self.test,
            params: VarnishstatParams {
                instance: self.instance.clone(),
                vsm: self.vsm.clone(),
                wait: Some(Duration::from_secs(self.wait_secs)),
            },
        }
    }

    pub fn init_tracing(&self) -> Result<()> {
        let level = if self.verbose { "debug" } else { "info" };
        let mut env_filter = EnvFilter::from_default_env();
        for target in LOG_TARGETS {
            env_filter = env_filter.add_directive(format!("{target}={level}").parse()?);
        }

        let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter);
        if self.raw {
            subscriber.without_time().init();
        } else {
            subscriber.init();
        }
        Ok(())
    }
}

fn is_metric_name(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
