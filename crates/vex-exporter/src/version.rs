use std::sync::{PoisonError, RwLock};

use tracing::info;
use vex_common::VarnishVersion;

use crate::{scrape::ScrapeFailure, source::DumpSource};

/// Process-wide varnish version, resolved at startup and re-resolved lazily
/// while it is still unknown.
#[derive(Debug, Default)]
pub struct SharedVersion {
    inner: RwLock<VarnishVersion>,
}

impl SharedVersion {
    pub fn new(version: VarnishVersion) -> Self {
        Self {
            inner: RwLock::new(version),
        }
    }

    pub fn current(&self) -> VarnishVersion {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, version: VarnishVersion) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = version;
    }

    pub fn is_resolved(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_resolved()
    }

    /// Queries `source` for its version and stores it. The stored version is
    /// left untouched on failure.
    pub async fn resolve_from(
        &self,
        source: &dyn DumpSource,
    ) -> Result<VarnishVersion, ScrapeFailure> {
        let line = source.version_line().await?;
        let version = VarnishVersion::parse(&line).map_err(ScrapeFailure::new)?;
        info!(version = %version, "resolved varnish version");
        self.set(version.clone());
        Ok(version)
    }
}
