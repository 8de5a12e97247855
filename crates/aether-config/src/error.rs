//! Errors raised while loading, saving or checking `config.ron`.

use aether_scattering::ScatteringError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    ReadError(#[source] std::io::Error),

    #[error("failed to write config: {0}")]
    WriteError(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    #[error("failed to serialize config: {0}")]
    SerializeError(#[source] ron::Error),

    /// The file parsed but describes an atmosphere the precompute rejects.
    #[error("config describes an invalid atmosphere: {0}")]
    Invalid(#[from] ScatteringError),
}
