use crate::enforce::EnforceError;
use crate::registry::RegistryError;
use crate::rule::ParseError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum DevicesError {
    #[error("invalid device rule {input:?}: {reason}")]
    InvalidRuleSyntax { input: String, reason: String },
    #[error("unknown device: {0}")]
    UnknownDevice(#[from] RegistryError),
    #[error("failed to enforce device policy of {container}: {source}")]
    EnforcementWriteFailed {
        container: String,
        #[source]
        source: EnforceError,
    },
    #[error("container {0} not found")]
    ContainerNotFound(String),
    #[error("container {0} already exists")]
    ContainerExists(String),
    #[error("invalid container name {0:?}")]
    InvalidName(String),
    #[error("durable store: {0}")]
    Store(#[from] StoreError),
}

impl From<ParseError> for DevicesError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::InvalidRuleSyntax { input, reason } => {
                DevicesError::InvalidRuleSyntax { input, reason }
            }
            ParseError::UnknownDevice(err) => DevicesError::UnknownDevice(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, DevicesError>;
