pub mod error;
pub mod version;

pub use error::{Result, VexError};
pub use version::VarnishVersion;
