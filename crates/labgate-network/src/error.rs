use labgate_storage::StorageError;
use thiserror::Error;

/// Failures of a listener session.
///
/// | Variant                | Effect                                       |
/// |------------------------|----------------------------------------------|
/// | `TransportAcquisition` | start attempt fails, status stays `Stopped`  |
/// | `RuntimeTransport`     | session loop ends, status becomes `Stopped`  |
/// | `Persistence`          | logged; the next result is still written     |
/// | `Config`               | start attempt fails                          |
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bind, listen or open failed
    #[error("Cannot acquire {target}: {source}")]
    TransportAcquisition {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Read, write or accept failed on an acquired transport
    #[error("Transport failure: {0}")]
    RuntimeTransport(#[source] labgate_core::Error),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] labgate_core::Error),
}

impl SessionError {
    pub(crate) fn runtime(err: impl Into<labgate_core::Error>) -> Self {
        SessionError::RuntimeTransport(err.into())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
