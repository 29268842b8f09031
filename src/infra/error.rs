use thiserror::Error;

use super::manifest::ManifestError;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl InfraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
