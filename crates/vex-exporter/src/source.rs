use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use vex_common::VexError;

use crate::scrape::ScrapeFailure;

pub const DEFAULT_VARNISHSTAT: &str = "varnishstat";

/// Produces varnishstat output. Implemented by [`Varnishstat`] and by
/// in-memory fakes in tests.
#[async_trait]
pub trait DumpSource: Send + Sync {
    /// First line of `varnishstat -V`.
    async fn version_line(&self) -> Result<String, ScrapeFailure>;

    /// Raw JSON dump produced with `args`.
    async fn dump(&self, args: &[String]) -> Result<Vec<u8>, ScrapeFailure>;
}

/// Runs the varnishstat executable.
#[derive(Debug, Clone)]
pub struct Varnishstat {
    program: String,
    timeout: Option<Duration>,
}

impl Default for Varnishstat {
    fn default() -> Self {
        Self::new(DEFAULT_VARNISHSTAT)
    }
}

impl Varnishstat {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Kill the process when it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|timeout| !timeout.is_zero());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: &[String]) -> Result<ProcessOutput, ScrapeFailure> {
        debug!(program = %self.program, ?args, "running varnishstat");

        let mut command = Command::new(&self.program);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, command.output())
                .await
                .map_err(|_| {
                    ScrapeFailure::new(VexError::DumpExecution(format!(
                        "{} timed out after {}s",
                        self.program,
                        timeout.as_secs_f64()
                    )))
                })?,
            None => command.output().await,
        }
        .map_err(|err| {
            ScrapeFailure::new(VexError::DumpExecution(format!(
                "failed to run {}: {err}",
                self.program
            )))
        })?;

        let captured = ProcessOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        };
        if !output.status.success() {
            return Err(ScrapeFailure::with_output(
                VexError::DumpExecution(format!("{} {}", self.program, output.status)),
                captured.merged(),
            ));
        }
        Ok(captured)
    }
}

struct ProcessOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl ProcessOutput {
    fn merged(mut self) -> Vec<u8> {
        self.stdout.extend_from_slice(&self.stderr);
        self.stdout
    }
}

#[async_trait]
impl DumpSource for Varnishstat {
    async fn version_line(&self) -> Result<String, ScrapeFailure> {
        // some releases print the banner on stderr
        let output = self.run(&["-V".to_string()]).await?.merged();
        Ok(String::from_utf8_lossy(&output)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string())
    }

    async fn dump(&self, args: &[String]) -> Result<Vec<u8>, ScrapeFailure> {
        let output = self.run(args).await?;
        if !output.stderr.is_empty() {
            debug!(
                program = %self.program,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "varnishstat wrote to stderr"
            );
        }
        Ok(output.stdout)
    }
}
