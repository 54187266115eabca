#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, SigningKey};
use epi_verify_core::canonical::manifest_signing_bytes;
use epi_verify_core::hasher::sha256_hex;
use epi_verify_core::manifest::{parse_manifest_document, LoadedManifest};
use epi_verify_core::policy::VerifierConfig;
use serde_json::{json, Value};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::CompressionMethod;

pub const MARKER: &str = "application/vnd.epi+zip";

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn manifest_for(files: &[(&str, &[u8])]) -> Value {
    let mut file_manifest = serde_json::Map::new();
    for (name, bytes) in files {
        file_manifest.insert(name.to_string(), Value::String(sha256_hex(bytes)));
    }
    json!({
        "spec_version": "1.1-json",
        "workflow_id": "wf-0001",
        "created_at": "2026-01-16T10:00:00Z",
        "file_manifest": file_manifest,
        "environment": {
            "os_name": "Linux",
            "platform": "linux",
            "python_version": "3.11.4"
        }
    })
}

pub fn sign(manifest: &mut Value, key: &SigningKey, key_id: &str) {
    let message = manifest_signing_bytes(manifest).unwrap();
    let sig = key.sign(&message);
    manifest["signature"] = Value::String(format!(
        "ed25519:{}:{}",
        key_id,
        BASE64.encode(sig.to_bytes())
    ));
}

pub fn loaded(document: Value) -> LoadedManifest {
    LoadedManifest {
        manifest: parse_manifest_document(&document).unwrap(),
        document,
    }
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zw = ZipWriter::new(File::create(path).unwrap());
    for (name, bytes) in entries {
        let opts = SimpleFileOptions::default().compression_method(if *name == "mimetype" {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflated
        });
        zw.start_file(*name, opts).unwrap();
        zw.write_all(bytes).unwrap();
    }
    zw.finish().unwrap();
}

/// mimetype + manifest.json + payload files, in the order a producer writes them.
pub fn write_package(
    dir: &Path,
    name: &str,
    marker: &str,
    manifest: &Value,
    files: &[(&str, &[u8])],
) -> PathBuf {
    let path = dir.join(name);
    let manifest_bytes = serde_json::to_vec_pretty(manifest).unwrap();
    let mut entries: Vec<(&str, &[u8])> = vec![
        ("mimetype", marker.as_bytes()),
        ("manifest.json", manifest_bytes.as_slice()),
    ];
    entries.extend_from_slice(files);
    write_zip(&path, &entries);
    path
}

pub fn signed_package(dir: &Path, key: &SigningKey, key_id: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let mut manifest = manifest_for(files);
    sign(&mut manifest, key, key_id);
    write_package(dir, "signed.epi", MARKER, &manifest, files)
}

/// Config whose scratch directories land in `parent`, so tests can see leaks.
pub fn config_in(parent: &Path) -> VerifierConfig {
    VerifierConfig {
        scratch_parent: Some(parent.to_path_buf()),
        ..VerifierConfig::default()
    }
}

pub fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
