use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("canonicalization failed: {0}")]
    Canonicalization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("zip error: {0}")]
    Zip(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ExtractionFailed,
    MissingMarker,
    MarkerMismatch,
    MissingManifest,
    ManifestParseError,
    IntegrityFailed,
    Unsigned,
    SignatureMalformed,
    SignatureUnverifiable,
    SignatureInvalid,
    Cancelled,
    Aborted,
}

/// Stage failures surfaced to callers of `verify`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("package not found: {path}")]
    NotFound { path: String },

    #[error("extraction failed: {reason}")]
    ExtractionFailed { reason: String },

    #[error("invalid package: missing {path}")]
    MissingMarker { path: String },

    #[error("invalid package: marker is {found:?}, expected {expected:?}")]
    MarkerMismatch { expected: String, found: String },

    #[error("invalid package: missing {path}")]
    MissingManifest { path: String },

    #[error("manifest field {field}: {reason}")]
    ManifestParse { field: String, reason: String },

    #[error("integrity check failed: {failed} of {checked} file(s) failed")]
    IntegrityFailed { failed: usize, checked: usize },

    #[error("package is not signed")]
    Unsigned,

    #[error("malformed signature: {reason}")]
    SignatureMalformed { reason: String },

    #[error("signature cannot be verified: {reason}")]
    SignatureUnverifiable { reason: String },

    #[error("signature verification failed: {reason}")]
    SignatureInvalid { reason: String },

    #[error("verification cancelled")]
    Cancelled,

    #[error("verification aborted: {reason}")]
    Aborted { reason: String },
}

impl VerifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ExtractionFailed { .. } => ErrorKind::ExtractionFailed,
            Self::MissingMarker { .. } => ErrorKind::MissingMarker,
            Self::MarkerMismatch { .. } => ErrorKind::MarkerMismatch,
            Self::MissingManifest { .. } => ErrorKind::MissingManifest,
            Self::ManifestParse { .. } => ErrorKind::ManifestParseError,
            Self::IntegrityFailed { .. } => ErrorKind::IntegrityFailed,
            Self::Unsigned => ErrorKind::Unsigned,
            Self::SignatureMalformed { .. } => ErrorKind::SignatureMalformed,
            Self::SignatureUnverifiable { .. } => ErrorKind::SignatureUnverifiable,
            Self::SignatureInvalid { .. } => ErrorKind::SignatureInvalid,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Aborted { .. } => ErrorKind::Aborted,
        }
    }

    pub(crate) fn extraction(reason: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            reason: reason.into(),
        }
    }

    pub(crate) fn manifest_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ManifestParse {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// Unexpected plumbing failures never downgrade to a pass.
impl From<CoreError> for VerifyError {
    fn from(e: CoreError) -> Self {
        Self::Aborted {
            reason: e.to_string(),
        }
    }
}

impl From<std::io::Error> for VerifyError {
    fn from(e: std::io::Error) -> Self {
        CoreError::from(e).into()
    }
}

pub type VerifyResult<T> = Result<T, VerifyError>;
