use crate::error::{ErrorKind, VerifyError};
use crate::integrity::IntegrityReport;
use crate::manifest::PackageManifest;
use crate::scratch::ScratchDir;
use crate::signature::{SignatureOutcome, SignatureStatus};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VerificationState {
    START,
    EXTRACTING,
    STRUCTURE_CHECKED,
    INTEGRITY_CHECKED,
    SIGNATURE_CHECKED,
    DONE,
    ABORTED,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationFailure {
    pub stage: VerificationState, // step that failed
    pub kind: ErrorKind,
    pub message: String,
}

impl VerificationFailure {
    pub fn new(stage: VerificationState, error: &VerifyError) -> Self {
        Self {
            stage,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Root-level markup handed through untouched once everything else verified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifiedMarkup {
    pub path: String,
    pub html: String,
    pub digest_covered: bool, // declared in file_manifest, so its bytes were checked
}

#[derive(Debug, Serialize)]
pub struct VerificationResult {
    pub verification_id: String,
    pub verified_at: String, // RFC3339 UTC
    pub package_path: String,
    pub passed: bool,
    pub state: VerificationState,
    pub failure: Option<VerificationFailure>,
    pub manifest: Option<PackageManifest>,
    pub integrity: Option<IntegrityReport>,
    pub signature: Option<SignatureOutcome>,
    pub trust_tier: Option<SignatureStatus>,
    pub markup: Option<VerifiedMarkup>,
    #[serde(skip)]
    pub(crate) scratch: Option<ScratchDir>,
}

impl VerificationResult {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    /// Extracted payload; only present on a passing result.
    pub fn scratch(&self) -> Option<&ScratchDir> {
        self.scratch.as_ref()
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(ScratchDir::path)
    }

    pub fn take_scratch(&mut self) -> Option<ScratchDir> {
        self.scratch.take()
    }

    /// Idempotent.
    pub fn dispose(&mut self) {
        if let Some(s) = self.scratch.as_mut() {
            s.dispose();
        }
    }
}
