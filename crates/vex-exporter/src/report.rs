use tracing::{debug, error, info};

use crate::scrape::ScrapeFailure;

/// Keeps a sustained outage from flooding the log: a failure is logged at
/// `error` once, identical repeats go to `debug` until the text changes or a
/// scrape succeeds.
#[derive(Debug, Default)]
pub struct FailureReporter {
    last_failure: Option<String>,
}

impl FailureReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed scrape. Returns `true` when it was logged at `error`.
    pub fn failure(&mut self, failure: &ScrapeFailure) -> bool {
        let text = failure.to_string();
        if self.last_failure.as_deref() == Some(text.as_str()) {
            debug!(error = %text, "scrape still failing");
            return false;
        }

        if failure.output.is_empty() {
            error!(error = %text, kind = failure.error.kind(), "scrape failed");
        } else {
            error!(
                error = %text,
                kind = failure.error.kind(),
                output = %failure.output_text().trim_end(),
                "scrape failed"
            );
        }
        self.last_failure = Some(text);
        true
    }

    /// Records a successful scrape. Returns `true` when it ended a failure
    /// streak.
    pub fn success(&mut self) -> bool {
        if self.last_failure.take().is_some() {
            info!("successful scrape");
            return true;
        }
        false
    }

    pub fn is_failing(&self) -> bool {
        self.last_failure.is_some()
    }
}
