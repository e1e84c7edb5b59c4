use operator_core::Aggregate;
use thiserror::Error;

/// Possible errors of the operator's reconcilers
#[derive(Error, Debug)]
pub enum Error {
    /// A collaborator call or a (de)serialization failed
    #[error(transparent)]
    Core(#[from] operator_core::Error),

    /// Several steps of one cycle failed, messages joined by newlines
    #[error("{0}")]
    Aggregate(#[from] Aggregate),

    /// The operator configuration is unusable
    #[error("invalid operator configuration: {0}")]
    InvalidConfig(String),

    /// An encryption configuration secret could not be decoded
    #[error("invalid encryption configuration in secret {namespace}/{name}: {reason}")]
    InvalidEncryptionConfig {
        /// Namespace of the secret
        namespace: String,
        /// Name of the secret
        name: String,
        /// What is wrong with it
        reason: String,
    },
}

impl Error {
    /// Whether a collaborator reported a write conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Core(err) if err.is_conflict())
    }

    /// Whether a collaborator reported a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Core(err) if err.is_not_found())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Core(err.into())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Core(err.into())
    }
}

/// Convient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
