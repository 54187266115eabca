use crate::canonical::manifest_signing_bytes;
use crate::error::{CoreError, CoreResult};
use crate::manifest::{LoadedManifest, PackageManifest};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const ED25519: &str = "ed25519";

const MAX_KEY_ID_LEN: usize = 128;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignatureStatus {
    UNSIGNED,
    SIGNED_VALID,
    SIGNED_INVALID,
    SIGNED_UNVERIFIABLE,
    MALFORMED,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureOutcome {
    pub status: SignatureStatus,
    pub algorithm: Option<String>,
    pub key_id: Option<String>,
    pub key_source: Option<String>, // resolver that supplied the key
    pub reason: Option<String>,     // set unless SIGNED_VALID
}

impl SignatureOutcome {
    fn new(status: SignatureStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            algorithm: None,
            key_id: None,
            key_source: None,
            reason: Some(reason.into()),
        }
    }

    fn naming(mut self, algorithm: &str, key_id: Option<&str>) -> Self {
        self.algorithm = Some(algorithm.to_string());
        self.key_id = key_id.map(str::to_string);
        self
    }
}

/// Maps a signature's key identifier to a verifying key.
///
/// `Ok(None)` means "no key known for this identifier"; errors mean the resolver itself
/// could not answer.
pub trait KeyResolver: Send + Sync {
    fn name(&self) -> &str;

    fn resolve(&self, key_id: &str, manifest: &PackageManifest)
        -> CoreResult<Option<VerifyingKey>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticKeys {
    keys: BTreeMap<String, VerifyingKey>,
}

impl StaticKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key_id: impl Into<String>, key: VerifyingKey) -> Self {
        self.keys.insert(key_id.into(), key);
        self
    }
}

impl KeyResolver for StaticKeys {
    fn name(&self) -> &str {
        "static"
    }

    fn resolve(&self, key_id: &str, _: &PackageManifest) -> CoreResult<Option<VerifyingKey>> {
        Ok(self.keys.get(key_id).cloned())
    }
}

/// `<dir>/<key_id>.pub`, each holding a hex or base64 Ed25519 public key.
#[derive(Debug, Clone)]
pub struct KeyDirectory {
    dir: PathBuf,
}

impl KeyDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl KeyResolver for KeyDirectory {
    fn name(&self) -> &str {
        "key_directory"
    }

    fn resolve(&self, key_id: &str, _: &PackageManifest) -> CoreResult<Option<VerifyingKey>> {
        if !is_plain_key_id(key_id) {
            return Ok(None);
        }
        let path = self.dir.join(format!("{}.pub", key_id));
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        decode_public_key(&text).map(Some)
    }
}

/// Trusts the `public_key` the package carries about itself. Opt-in only: it proves the
/// manifest is self-consistent, not who produced it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedPublicKey;

impl KeyResolver for EmbeddedPublicKey {
    fn name(&self) -> &str {
        "embedded_public_key"
    }

    fn resolve(&self, _: &str, manifest: &PackageManifest) -> CoreResult<Option<VerifyingKey>> {
        manifest
            .public_key
            .as_deref()
            .map(decode_public_key)
            .transpose()
    }
}

pub fn decode_public_key(text: &str) -> CoreResult<VerifyingKey> {
    let text = text.trim();
    let bytes = if text.len() == PUBLIC_KEY_LENGTH * 2 && text.chars().all(|c| c.is_ascii_hexdigit())
    {
        hex::decode(text).map_err(|e| CoreError::InvalidInput(format!("public key hex: {}", e)))?
    } else {
        BASE64
            .decode(text)
            .map_err(|e| CoreError::InvalidInput(format!("public key base64: {}", e)))?
    };
    let arr: [u8; PUBLIC_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
        CoreError::InvalidInput(format!(
            "public key must be {} bytes, found {}",
            PUBLIC_KEY_LENGTH,
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&arr)
        .map_err(|e| CoreError::InvalidInput(format!("public key rejected: {}", e)))
}

fn is_plain_key_id(key_id: &str) -> bool {
    !key_id.is_empty()
        && key_id.len() <= MAX_KEY_ID_LEN
        && !key_id.starts_with('.')
        && key_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[derive(Default)]
pub struct SignatureEvaluator {
    resolvers: Vec<Box<dyn KeyResolver>>,
}

impl SignatureEvaluator {
    /// No key resolution: well-formed signatures evaluate to SIGNED_UNVERIFIABLE.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(mut self, resolver: impl KeyResolver + 'static) -> Self {
        self.resolvers.push(Box::new(resolver));
        self
    }

    pub fn has_key_resolution(&self) -> bool {
        !self.resolvers.is_empty()
    }

    pub fn evaluate(&self, loaded: &LoadedManifest) -> SignatureOutcome {
        let raw = match loaded.manifest.signature.as_deref().map(str::trim) {
            None | Some("") => {
                return SignatureOutcome::new(SignatureStatus::UNSIGNED, "no signature present")
            }
            Some(s) => s,
        };

        let parts: Vec<&str> = raw.split(':').collect();
        let [algorithm, key_id, sig_b64] = parts[..] else {
            return SignatureOutcome::new(
                SignatureStatus::MALFORMED,
                format!(
                    "expected algorithm:key_id:signature, found {} component(s)",
                    parts.len()
                ),
            );
        };
        let malformed = |reason: String| {
            SignatureOutcome::new(SignatureStatus::MALFORMED, reason)
                .naming(algorithm, Some(key_id).filter(|k| !k.is_empty()))
        };

        if algorithm != ED25519 {
            return malformed(format!("unsupported algorithm {:?}", algorithm));
        }
        if key_id.is_empty() {
            return malformed("empty key identifier".to_string());
        }
        let sig_bytes = match BASE64.decode(sig_b64) {
            Ok(b) => b,
            Err(e) => return malformed(format!("signature is not valid base64: {}", e)),
        };

        let unverifiable = |reason: String| {
            SignatureOutcome::new(SignatureStatus::SIGNED_UNVERIFIABLE, reason)
                .naming(algorithm, Some(key_id))
        };
        if self.resolvers.is_empty() {
            return unverifiable("no key resolution configured".to_string());
        }

        let mut found = None;
        for r in &self.resolvers {
            match r.resolve(key_id, &loaded.manifest) {
                Ok(Some(key)) => {
                    found = Some((key, r.name().to_string()));
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    return unverifiable(format!("key resolver {} failed: {}", r.name(), e))
                }
            }
        }
        let Some((key, source)) = found else {
            return unverifiable(format!("no public key for key id {:?}", key_id));
        };

        let message = match manifest_signing_bytes(&loaded.document) {
            Ok(m) => m,
            Err(e) => return malformed(format!("manifest cannot be canonicalized: {}", e)),
        };
        let invalid = |reason: String| {
            let mut o = SignatureOutcome::new(SignatureStatus::SIGNED_INVALID, reason)
                .naming(algorithm, Some(key_id));
            o.key_source = Some(source.clone());
            o
        };
        if sig_bytes.len() != SIGNATURE_LENGTH {
            return invalid(format!(
                "signature must be {} bytes, found {}",
                SIGNATURE_LENGTH,
                sig_bytes.len()
            ));
        }
        let signature = match Signature::from_slice(&sig_bytes) {
            Ok(s) => s,
            Err(e) => return invalid(format!("signature rejected: {}", e)),
        };

        match key.verify_strict(&message, &signature) {
            Ok(()) => SignatureOutcome {
                status: SignatureStatus::SIGNED_VALID,
                algorithm: Some(algorithm.to_string()),
                key_id: Some(key_id.to_string()),
                key_source: Some(source.clone()),
                reason: None,
            },
            Err(_) => invalid("ed25519 signature does not match the manifest".to_string()),
        }
    }
}
