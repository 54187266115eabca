pub mod result;

use crate::error::{VerifyError, VerifyResult};
use crate::extract::extract_package;
use crate::integrity::{check_integrity, IntegrityReport};
use crate::manifest::{load_package_structure, PackageManifest, MARKUP_PATH};
use crate::policy::{TrustPolicy, VerifierConfig};
use crate::scratch::ScratchDir;
use crate::signature::{
    EmbeddedPublicKey, KeyDirectory, KeyResolver, SignatureEvaluator, SignatureOutcome,
    SignatureStatus,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use ulid::Ulid;

pub use result::{VerificationFailure, VerificationResult, VerificationState, VerifiedMarkup};

// START -> EXTRACTING -> STRUCTURE_CHECKED -> INTEGRITY_CHECKED -> SIGNATURE_CHECKED -> DONE
// Any failure goes straight to ABORTED; only DONE hands the scratch directory out.
pub struct PackageVerifier {
    config: VerifierConfig,
    evaluator: SignatureEvaluator,
}

impl PackageVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        let mut evaluator = SignatureEvaluator::new();
        if let Some(dir) = &config.key_dir {
            evaluator = evaluator.with_resolver(KeyDirectory::new(dir));
        }
        if config.trust_embedded_public_key {
            evaluator = evaluator.with_resolver(EmbeddedPublicKey);
        }
        Self { config, evaluator }
    }

    /// Consulted after the resolvers the config enables.
    pub fn with_key_resolver(mut self, resolver: impl KeyResolver + 'static) -> Self {
        self.evaluator = self.evaluator.with_resolver(resolver);
        self
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn verify(&self, package: &Path) -> VerificationResult {
        self.verify_cancellable(package, &AtomicBool::new(false))
    }

    pub fn verify_cancellable(&self, package: &Path, cancel: &AtomicBool) -> VerificationResult {
        let mut run = Pipeline::new(package);
        let span = tracing::info_span!(
            "verify",
            verification_id = %run.verification_id,
            package = %package.display()
        );
        let _guard = span.enter();

        match self.run(&mut run, package, cancel) {
            Ok(()) => run.finish(),
            Err(e) => run.abort(e),
        }
    }

    fn run(&self, run: &mut Pipeline, package: &Path, cancel: &AtomicBool) -> VerifyResult<()> {
        if !package.is_file() {
            return Err(VerifyError::NotFound {
                path: package.display().to_string(),
            });
        }

        run.attempt(VerificationState::EXTRACTING, cancel)?;
        let scratch = run
            .scratch
            .insert(ScratchDir::create_in(&self.config.scratch_parent())?);
        let root = scratch.path().to_path_buf();
        extract_package(package, &root, self.config.extraction_limits(), cancel)?;
        run.reached();

        run.attempt(VerificationState::STRUCTURE_CHECKED, cancel)?;
        let loaded = load_package_structure(&root, self.config.max_manifest_bytes)?;
        run.manifest = Some(loaded.manifest.clone());
        run.reached();

        run.attempt(VerificationState::INTEGRITY_CHECKED, cancel)?;
        let report = check_integrity(&root, &loaded.manifest.file_manifest, cancel)?;
        let (valid, failed, checked) = (report.valid, report.failures.len(), report.files_checked);
        run.integrity = Some(report);
        if !valid {
            return Err(VerifyError::IntegrityFailed { failed, checked });
        }
        run.reached();

        run.attempt(VerificationState::SIGNATURE_CHECKED, cancel)?;
        let outcome = self.evaluator.evaluate(&loaded);
        run.trust_tier = Some(outcome.status);
        let gate = self.admit(&outcome);
        run.signature = Some(outcome);
        gate?;
        run.reached();

        run.attempt(VerificationState::DONE, cancel)?;
        run.markup = read_markup(&root, &loaded.manifest, &self.config)?;
        Ok(())
    }

    fn admit(&self, outcome: &SignatureOutcome) -> VerifyResult<()> {
        let reason = || outcome.reason.clone().unwrap_or_default();
        match outcome.status {
            SignatureStatus::SIGNED_VALID => Ok(()),
            SignatureStatus::UNSIGNED => match self.config.trust_policy {
                TrustPolicy::ALLOW_UNSIGNED => Ok(()),
                TrustPolicy::REQUIRE_VALID_SIGNATURE => Err(VerifyError::Unsigned),
            },
            SignatureStatus::MALFORMED => Err(VerifyError::SignatureMalformed { reason: reason() }),
            SignatureStatus::SIGNED_UNVERIFIABLE => {
                Err(VerifyError::SignatureUnverifiable { reason: reason() })
            }
            SignatureStatus::SIGNED_INVALID => Err(VerifyError::SignatureInvalid { reason: reason() }),
        }
    }
}

impl Default for PackageVerifier {
    fn default() -> Self {
        Self::new(VerifierConfig::default())
    }
}

// Partial state of one verification; becomes the VerificationResult.
struct Pipeline {
    verification_id: String,
    package_path: String,
    state: VerificationState,
    attempting: VerificationState,
    scratch: Option<ScratchDir>,
    manifest: Option<PackageManifest>,
    integrity: Option<IntegrityReport>,
    signature: Option<SignatureOutcome>,
    trust_tier: Option<SignatureStatus>,
    markup: Option<VerifiedMarkup>,
}

impl Pipeline {
    fn new(package: &Path) -> Self {
        Self {
            verification_id: format!("v_{}", Ulid::new()),
            package_path: package.display().to_string(),
            state: VerificationState::START,
            attempting: VerificationState::START,
            scratch: None,
            manifest: None,
            integrity: None,
            signature: None,
            trust_tier: None,
            markup: None,
        }
    }

    fn attempt(&mut self, next: VerificationState, cancel: &AtomicBool) -> VerifyResult<()> {
        if cancel.load(Ordering::Relaxed) {
            return Err(VerifyError::Cancelled);
        }
        self.attempting = next;
        Ok(())
    }

    fn reached(&mut self) {
        tracing::debug!(from = ?self.state, to = ?self.attempting, "verification state changed");
        self.state = self.attempting;
    }

    fn finish(mut self) -> VerificationResult {
        self.attempting = VerificationState::DONE;
        self.reached();
        tracing::info!(
            passed = true,
            trust_tier = ?self.trust_tier,
            files_checked = self.integrity.as_ref().map(|r| r.files_checked).unwrap_or(0),
            "package verified"
        );
        self.into_result(true, None)
    }

    fn abort(mut self, error: VerifyError) -> VerificationResult {
        let failure = VerificationFailure::new(self.attempting, &error);
        tracing::warn!(
            stage = ?failure.stage,
            kind = ?failure.kind,
            reason = %failure.message,
            "verification aborted"
        );
        // Nothing extracted from a failed package outlives the call.
        if let Some(mut scratch) = self.scratch.take() {
            scratch.dispose();
        }
        self.markup = None;
        self.state = VerificationState::ABORTED;
        self.into_result(false, Some(failure))
    }

    fn into_result(self, passed: bool, failure: Option<VerificationFailure>) -> VerificationResult {
        VerificationResult {
            verification_id: self.verification_id,
            verified_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            package_path: self.package_path,
            passed,
            state: self.state,
            failure,
            manifest: self.manifest,
            integrity: self.integrity,
            signature: self.signature,
            trust_tier: self.trust_tier,
            markup: self.markup,
            scratch: self.scratch,
        }
    }
}

fn read_markup(
    root: &Path,
    manifest: &PackageManifest,
    config: &VerifierConfig,
) -> VerifyResult<Option<VerifiedMarkup>> {
    let path = root.join(MARKUP_PATH);
    if !path.is_file() {
        return Ok(None);
    }
    let digest_covered = manifest.declares(MARKUP_PATH);
    if !digest_covered && !config.release_undeclared_markup {
        tracing::warn!(path = MARKUP_PATH, "markup not declared in file_manifest; withheld");
        return Ok(None);
    }
    let len = fs::metadata(&path)?.len();
    if len > config.max_markup_bytes {
        return Err(VerifyError::Aborted {
            reason: format!(
                "{} is {} bytes (limit {})",
                MARKUP_PATH, len, config.max_markup_bytes
            ),
        });
    }
    let bytes = fs::read(&path)?;
    Ok(Some(VerifiedMarkup {
        path: MARKUP_PATH.to_string(),
        html: String::from_utf8_lossy(&bytes).into_owned(),
        digest_covered,
    }))
}
