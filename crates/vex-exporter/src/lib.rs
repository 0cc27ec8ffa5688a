pub mod config;
pub mod counter;
pub mod decode;
pub mod kind;
pub mod naming;
pub mod report;
pub mod scrape;
pub mod source;
pub mod version;

pub use config::{ExporterConfig, VarnishstatParams};
pub use counter::{CounterFlag, RawCounter};
pub use naming::{Group, ResolvedName, resolve};
pub use scrape::{Collection, ScrapeCoordinator, ScrapeFailure, ScrapeStats};
pub use source::{DumpSource, Varnishstat};
pub use version::SharedVersion;
