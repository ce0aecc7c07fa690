use thiserror::Error;

/// Error taxonomy for the provider bootstrap layer.
///
/// Resolution failures (unit not found, provider not accepted) are never
/// errors; the entry points report them as `Ok(None)` so callers can fall
/// through to another provider. Everything below propagates unmodified.
///
/// `Clone` because a single construction failure is shared with every
/// caller that joined the same in-flight construction attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Factory construction failed: {0}")]
    Construction(String),

    #[error("Schema generation failed: {0}")]
    Schema(String),

    #[error("Closed resource: {0}")]
    Closed(String),

    #[error("Descriptor error: {0}")]
    Descriptor(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl<T> From<std::sync::PoisonError<T>> for ProviderError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
