use thiserror::Error;

/// Errors raised while decoding instrument traffic or normalizing
/// device configuration.
///
/// Every variant is contained at the level where it occurs: a framing or
/// protocol error drops one message, an unmapped code drops one analyte,
/// and a configuration error fails one start attempt.
#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("Unmapped code '{code}' for sample {sample_id}")]
    UnmappedCode { code: String, sample_id: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
