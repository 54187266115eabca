use crate::error::{CoreError, CoreResult};
use crate::extract::ExtractionLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which signature trust tiers a package may pass with.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TrustPolicy {
    #[default]
    REQUIRE_VALID_SIGNATURE,
    // Unsigned-but-intact packages pass, labelled UNSIGNED. Never admits a bad signature.
    ALLOW_UNSIGNED,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    pub trust_policy: TrustPolicy,
    pub max_entries: usize,
    pub max_total_bytes: u64,
    pub max_manifest_bytes: u64,
    pub max_markup_bytes: u64,
    // viewer.html not declared in file_manifest was never digest-checked; withheld unless set
    pub release_undeclared_markup: bool,
    pub scratch_parent: Option<PathBuf>,
    pub key_dir: Option<PathBuf>,
    pub trust_embedded_public_key: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            trust_policy: TrustPolicy::default(),
            max_entries: 10_000,
            max_total_bytes: 1 << 30,
            max_manifest_bytes: 16 << 20,
            max_markup_bytes: 32 << 20,
            release_undeclared_markup: false,
            scratch_parent: None,
            key_dir: None,
            trust_embedded_public_key: false,
        }
    }
}

impl VerifierConfig {
    pub fn from_json_file(path: &Path) -> CoreResult<Self> {
        let bytes = std::fs::read(path)?;
        let cfg: Self = serde_json::from_slice(&bytes)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.max_entries == 0 {
            return Err(CoreError::InvalidInput(
                "max_entries must be at least 1".to_string(),
            ));
        }
        if self.max_manifest_bytes == 0 {
            return Err(CoreError::InvalidInput(
                "max_manifest_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn extraction_limits(&self) -> ExtractionLimits {
        ExtractionLimits {
            max_entries: self.max_entries,
            max_total_bytes: self.max_total_bytes,
        }
    }

    pub fn scratch_parent(&self) -> PathBuf {
        self.scratch_parent
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
