pub mod canonical;
pub mod extract;
pub mod hasher;
pub mod integrity;
pub mod manifest;
pub mod policy;
pub mod scratch;
pub mod signature;
pub mod verify;

pub mod error;

pub use error::{ErrorKind, VerifyError};
pub use policy::{TrustPolicy, VerifierConfig};
pub use scratch::{dispose_scratch, ScratchDir};
pub use verify::{PackageVerifier, VerificationResult, VerificationState};

use std::path::Path;

/// Verifies a package with the default configuration (valid signature required, no key
/// resolution configured).
pub fn verify(package: &Path) -> VerificationResult {
    PackageVerifier::default().verify(package)
}

/// Idempotent scratch cleanup; see [`dispose_scratch`].
pub fn dispose(scratch: &Path) {
    dispose_scratch(scratch)
}
