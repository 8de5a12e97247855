//! Scattering model error types.

/// Errors raised by [`ScatteringModel`](crate::ScatteringModel) and the
/// helpers that validate its configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScatteringError {
    /// Malformed spectral samples, non-monotonic radii, bad profile layers or
    /// an unusable texture layout.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A shared shader handle has not been registered yet.
    #[error("missing resource: {0}")]
    MissingResource(&'static str),

    /// `init` was called on a model that already went through `init`.
    #[error("scattering model is already initialized")]
    AlreadyInitialized,

    /// The model has not been initialized, so it owns no textures to bind.
    #[error("scattering model is not initialized")]
    NotInitialized,

    /// The model's textures were released.
    #[error("scattering model has been released")]
    Released,
}

impl ScatteringError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }
}
