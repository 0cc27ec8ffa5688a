pub mod cache;
pub mod exposition;
pub mod types;

pub use cache::DescriptorCache;
pub use exposition::{CONTENT_TYPE, encode_text};
pub use types::{CanonicalIdentity, ConstMetric, MetricDescriptor, MetricType};
