use crate::error::{VerifyError, VerifyResult};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use zip::ZipArchive;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionLimits {
    pub max_entries: usize,
    pub max_total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub entries: usize,
    pub files_written: usize,
    pub bytes_written: u64,
}

/// Unpacks `package` into `target`, failing closed on any entry that could land outside it.
///
/// `target` must already exist and be exclusively owned by the caller. On error the
/// directory may hold a partial tree; the caller disposes of it.
pub fn extract_package(
    package: &Path,
    target: &Path,
    limits: ExtractionLimits,
    cancel: &AtomicBool,
) -> VerifyResult<ExtractionSummary> {
    let root = fs::canonicalize(target)
        .map_err(|e| VerifyError::extraction(format!("scratch directory unusable: {}", e)))?;

    let file = File::open(package)
        .map_err(|e| VerifyError::extraction(format!("cannot open package: {}", e)))?;
    let mut zip = ZipArchive::new(file)
        .map_err(|e| VerifyError::extraction(format!("not a valid zip archive: {}", e)))?;

    if zip.len() > limits.max_entries {
        return Err(VerifyError::extraction(format!(
            "archive has {} entries (limit {})",
            zip.len(),
            limits.max_entries
        )));
    }

    let mut summary = ExtractionSummary {
        entries: zip.len(),
        files_written: 0,
        bytes_written: 0,
    };

    for i in 0..zip.len() {
        if cancel.load(Ordering::Relaxed) {
            return Err(VerifyError::Cancelled);
        }

        let mut entry = zip
            .by_index(i)
            .map_err(|e| VerifyError::extraction(format!("entry {}: {}", i, e)))?;
        let name = entry.name().to_string();

        let rel = sanitize_entry_name(&name)?;
        // Second opinion from the zip library; both must agree the name is enclosed.
        if entry.enclosed_name().is_none() {
            return Err(VerifyError::extraction(format!(
                "entry {:?} escapes the extraction root",
                name
            )));
        }
        if entry
            .unix_mode()
            .map(|m| m & S_IFMT == S_IFLNK)
            .unwrap_or(false)
        {
            return Err(VerifyError::extraction(format!(
                "entry {:?} is a symbolic link",
                name
            )));
        }

        let out_path = root.join(&rel);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| VerifyError::extraction(format!("entry {:?}: {}", name, e)))?;
            ensure_within(&root, &out_path, &name)?;
            continue;
        }

        let parent = out_path.parent().unwrap_or(&root).to_path_buf();
        fs::create_dir_all(&parent)
            .map_err(|e| VerifyError::extraction(format!("entry {:?}: {}", name, e)))?;
        ensure_within(&root, &parent, &name)?;

        // create_new: never follow a pre-existing link, never let a duplicate entry overwrite.
        let mut out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&out_path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => {
                    VerifyError::extraction(format!("duplicate entry {:?}", name))
                }
                _ => VerifyError::extraction(format!("entry {:?}: {}", name, e)),
            })?;

        let remaining = limits.max_total_bytes - summary.bytes_written;
        let copied = io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut out)
            .map_err(|e| VerifyError::extraction(format!("entry {:?}: {}", name, e)))?;
        if copied > remaining {
            return Err(VerifyError::extraction(format!(
                "archive expands beyond {} bytes",
                limits.max_total_bytes
            )));
        }
        summary.bytes_written += copied;
        summary.files_written += 1;
    }

    tracing::debug!(
        entries = summary.entries,
        files = summary.files_written,
        bytes = summary.bytes_written,
        "package extracted"
    );
    Ok(summary)
}

/// Lexical check of an archive entry name. Accepts only plain relative paths.
pub fn sanitize_entry_name(name: &str) -> VerifyResult<PathBuf> {
    let reject = |why: &str| {
        Err(VerifyError::extraction(format!(
            "entry {:?} rejected: {}",
            name, why
        )))
    };

    if name.is_empty() {
        return reject("empty name");
    }
    if name.contains('\0') {
        return reject("NUL in name");
    }
    if name.starts_with('/') || name.starts_with('\\') {
        return reject("absolute path");
    }
    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return reject("drive-prefixed path");
    }

    let mut out = PathBuf::new();
    for part in name.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => return reject("parent directory traversal"),
            p => out.push(p),
        }
    }

    // Whatever std makes of the rebuilt path, it must still be purely relative components.
    if out.as_os_str().is_empty() {
        return reject("no path components");
    }
    if !out.components().all(|c| matches!(c, Component::Normal(_))) {
        return reject("non-normal path component");
    }
    Ok(out)
}

fn ensure_within(root: &Path, dir: &Path, name: &str) -> VerifyResult<()> {
    let real = fs::canonicalize(dir)
        .map_err(|e| VerifyError::extraction(format!("entry {:?}: {}", name, e)))?;
    if real.starts_with(root) {
        Ok(())
    } else {
        Err(VerifyError::extraction(format!(
            "entry {:?} resolves outside the extraction root",
            name
        )))
    }
}
