use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::repos::RepoError,
    cache::{ReconcileError, WorkerError},
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Chain of messages for an error and all of its sources, outermost first.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    /// Messages joined for a single log field.
    pub fn joined(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Short operator-facing category used in the final log line.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Domain(DomainError::NotFound { .. }) | AppError::NotFound => "not_found",
            AppError::Domain(DomainError::Validation { .. }) | AppError::Validation(_) => {
                "validation"
            }
            AppError::Domain(DomainError::Invariant { .. }) => "invariant",
            AppError::Infra(InfraError::Configuration { .. }) => "configuration",
            AppError::Infra(InfraError::Telemetry(_)) => "telemetry",
            AppError::Infra(InfraError::Database(_)) | AppError::Repo(_) => "persistence",
            AppError::Infra(InfraError::Io(_)) => "io",
            AppError::Infra(InfraError::Manifest(_)) => "manifest",
            AppError::Worker(WorkerError::Fatal { .. }) => "fatal_runtime",
            AppError::Worker(_) => "worker",
            AppError::Reconcile(ReconcileError::ConfigMissing { .. }) => "reconciler_config_missing",
            AppError::Reconcile(_) => "reconcile",
            AppError::Unexpected(_) => "unexpected",
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}
