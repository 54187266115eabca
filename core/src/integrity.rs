use crate::error::{CoreError, VerifyError, VerifyResult};
use crate::extract::sanitize_entry_name;
use crate::hasher::{normalize_digest, sha256_file};
use crate::manifest::{FileDigest, MANIFEST_PATH, MARKER_PATH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IntegrityStatus {
    MATCH,
    MISMATCH,
    MISSING,
    REJECTED, // declared path escapes the scratch directory
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityOutcome {
    pub path: String,
    pub expected: String,
    pub actual: Option<String>,
    pub status: IntegrityStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub valid: bool,
    pub files_checked: usize,
    pub failures: Vec<IntegrityOutcome>, // manifest declaration order
    pub undeclared_files: Vec<String>,
}

impl IntegrityReport {
    pub fn failure_for(&self, path: &str) -> Option<&IntegrityOutcome> {
        self.failures.iter().find(|o| o.path == path)
    }
}

/// Checks every declared file; never stops at the first failure.
pub fn check_integrity(
    root: &Path,
    declared: &[FileDigest],
    cancel: &AtomicBool,
) -> VerifyResult<IntegrityReport> {
    let root = fs::canonicalize(root)?;
    let mut failures = Vec::new();

    for entry in declared {
        if cancel.load(Ordering::Relaxed) {
            return Err(VerifyError::Cancelled);
        }
        let outcome = check_file(&root, entry)?;
        if outcome.status != IntegrityStatus::MATCH {
            tracing::debug!(path = %outcome.path, status = ?outcome.status, "integrity failure");
            failures.push(outcome);
        }
    }

    Ok(IntegrityReport {
        valid: failures.is_empty(),
        files_checked: declared.len(),
        failures,
        undeclared_files: undeclared_files(&root, declared)?,
    })
}

/// `root` must already be canonical.
pub fn check_file(root: &Path, entry: &FileDigest) -> VerifyResult<IntegrityOutcome> {
    let expected = normalize_digest(&entry.sha256).unwrap_or_else(|| entry.sha256.clone());
    let outcome = |actual: Option<String>, status| IntegrityOutcome {
        path: entry.path.clone(),
        expected: expected.clone(),
        actual,
        status,
    };

    let Ok(rel) = sanitize_entry_name(&entry.path) else {
        return Ok(outcome(None, IntegrityStatus::REJECTED));
    };
    let Some(real) = resolve(&root.join(rel))? else {
        return Ok(outcome(None, IntegrityStatus::MISSING));
    };
    if !real.starts_with(root) {
        return Ok(outcome(None, IntegrityStatus::REJECTED));
    }
    if !real.is_file() {
        return Ok(outcome(None, IntegrityStatus::MISSING));
    }

    let actual = sha256_file(&real)?;
    let status = if actual == expected {
        IntegrityStatus::MATCH
    } else {
        IntegrityStatus::MISMATCH
    };
    Ok(outcome(Some(actual), status))
}

fn resolve(path: &Path) -> VerifyResult<Option<PathBuf>> {
    match fs::canonicalize(path) {
        Ok(p) => Ok(Some(p)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn undeclared_files(root: &Path, declared: &[FileDigest]) -> VerifyResult<Vec<String>> {
    let known: BTreeSet<PathBuf> = declared
        .iter()
        .filter_map(|f| sanitize_entry_name(&f.path).ok())
        .chain([PathBuf::from(MARKER_PATH), PathBuf::from(MANIFEST_PATH)])
        .collect();

    let mut out = Vec::new();
    for e in WalkDir::new(root).follow_links(false) {
        let e = e.map_err(|err| CoreError::Io(std::io::Error::new(ErrorKind::Other, err)))?;
        if !e.file_type().is_file() {
            continue;
        }
        let Ok(rel) = e.path().strip_prefix(root) else {
            continue;
        };
        if !known.contains(rel) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    out.sort();
    Ok(out)
}
