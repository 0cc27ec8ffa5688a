use thiserror::Error;

#[derive(Debug, Error)]
pub enum VexError {
    #[error("failed to resolve varnish version from {0:?}")]
    VersionResolution(String),
    #[error("varnishstat execution failed: {0}")]
    DumpExecution(String),
    #[error("malformed varnishstat output: {0}")]
    DumpDecode(String),
    #[error("unrecognized property {field:?} on counter {counter:?}")]
    UnrecognizedField { counter: String, field: String },
    #[error("metric family {name} has inconsistent label keys")]
    InconsistentFamily { name: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VexError {
    /// Short machine-friendly name of the error class, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::VersionResolution(_) => "version_resolution",
            Self::DumpExecution(_) => "dump_execution",
            Self::DumpDecode(_) => "dump_decode",
            Self::UnrecognizedField { .. } => "unrecognized_field",
            Self::InconsistentFamily { .. } => "inconsistent_family",
            Self::Io(_) => "dump_execution",
        }
    }
}

pub type Result<T> = std::result::Result<T, VexError>;
