use serde::Serialize;
use thiserror::Error;

use super::backends::BackendError;
use super::fetcher::FetchError;
use super::params::ParameterError;
use super::resolver::ResolveError;
use super::temp_store::TempStoreError;
use super::validation::ValidationError;
use super::EnhanceStage;
use crate::settings::credentials::CredentialError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Configuration,
    BackendInvocation,
    BackendTimeout,
    MalformedResult,
    Download,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Configuration => "configuration",
            Self::BackendInvocation => "backend_invocation",
            Self::BackendTimeout => "backend_timeout",
            Self::MalformedResult => "malformed_result",
            Self::Download => "download",
            Self::Internal => "internal",
        }
    }
}

/// A classified pipeline failure. `detail` is safe to show to callers;
/// `cause` holds extra context that is only logged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{detail}")]
pub struct EnhanceError {
    pub kind: ErrorKind,
    pub stage: EnhanceStage,
    pub detail: String,
    pub cause: Option<String>,
}

impl EnhanceError {
    pub fn new(kind: ErrorKind, stage: EnhanceStage, detail: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            detail: detail.into(),
            cause: None,
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, EnhanceStage::Validate, detail)
    }

    pub fn unknown_profile(name: &str) -> Self {
        Self::validation(format!("Unknown backend profile '{name}'"))
    }

    pub fn internal(stage: EnhanceStage, cause: impl Into<String>) -> Self {
        Self {
            cause: Some(cause.into()),
            ..Self::new(ErrorKind::Internal, stage, "Internal server error")
        }
    }
}

impl From<ValidationError> for EnhanceError {
    fn from(error: ValidationError) -> Self {
        Self::validation(error.to_string())
    }
}

impl From<ParameterError> for EnhanceError {
    fn from(error: ParameterError) -> Self {
        match error {
            ParameterError::InvalidDefault { .. } => {
                Self::new(ErrorKind::Configuration, EnhanceStage::Configure, error.to_string())
            }
            _ => Self::validation(error.to_string()),
        }
    }
}

impl From<CredentialError> for EnhanceError {
    fn from(error: CredentialError) -> Self {
        Self::new(ErrorKind::Configuration, EnhanceStage::Configure, error.to_string())
    }
}

impl From<TempStoreError> for EnhanceError {
    fn from(error: TempStoreError) -> Self {
        Self::internal(EnhanceStage::Stage, error.to_string())
    }
}

impl From<BackendError> for EnhanceError {
    fn from(error: BackendError) -> Self {
        let kind = match error {
            BackendError::Timeout(_) => ErrorKind::BackendTimeout,
            _ => ErrorKind::BackendInvocation,
        };
        Self::new(kind, EnhanceStage::Invoke, error.to_string())
    }
}

impl From<ResolveError> for EnhanceError {
    fn from(error: ResolveError) -> Self {
        Self::new(ErrorKind::MalformedResult, EnhanceStage::Resolve, error.to_string())
    }
}

impl From<FetchError> for EnhanceError {
    fn from(error: FetchError) -> Self {
        Self::new(ErrorKind::Download, EnhanceStage::Fetch, error.to_string())
    }
}
