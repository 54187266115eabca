use crate::error::{VerifyError, VerifyResult};
use crate::extract::sanitize_entry_name;
use crate::hasher::normalize_digest;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

pub const MARKER_PATH: &str = "mimetype";
pub const MARKER_CONTENT: &str = "application/vnd.epi+zip";
pub const MANIFEST_PATH: &str = "manifest.json";
pub const MARKUP_PATH: &str = "viewer.html";

const MAX_MARKER_BYTES: u64 = 1024;
const DOCUMENT_FIELD: &str = "<document>";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileDigest {
    pub path: String,
    pub sha256: String, // lower-case hex 64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageManifest {
    pub workflow_id: Option<String>,
    pub spec_version: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    pub file_manifest: Vec<FileDigest>, // producer declaration order
    pub signature: Option<String>,
    pub public_key: Option<String>,
    pub environment: Option<Value>,
}

impl PackageManifest {
    pub fn declares(&self, path: &str) -> bool {
        self.file_manifest.iter().any(|f| f.path == path)
    }
}

/// The typed manifest plus the document it was read from; the document is what gets signed.
#[derive(Debug, Clone)]
pub struct LoadedManifest {
    pub manifest: PackageManifest,
    pub document: Value,
}

/// Structure stage: marker first, then the manifest. Nothing else is read.
pub fn load_package_structure(root: &Path, max_manifest_bytes: u64) -> VerifyResult<LoadedManifest> {
    check_marker(root)?;

    let manifest_path = root.join(MANIFEST_PATH);
    if !manifest_path.is_file() {
        return Err(VerifyError::MissingManifest {
            path: MANIFEST_PATH.to_string(),
        });
    }
    let len = fs::metadata(&manifest_path)?.len();
    if len > max_manifest_bytes {
        return Err(VerifyError::manifest_field(
            DOCUMENT_FIELD,
            format!("manifest is {} bytes (limit {})", len, max_manifest_bytes),
        ));
    }
    let bytes = fs::read(&manifest_path)?;
    let document: Value = serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::manifest_field(DOCUMENT_FIELD, e.to_string()))?;
    let manifest = parse_manifest_document(&document)?;
    Ok(LoadedManifest { manifest, document })
}

pub fn check_marker(root: &Path) -> VerifyResult<()> {
    let marker_path = root.join(MARKER_PATH);
    if !marker_path.is_file() {
        return Err(VerifyError::MissingMarker {
            path: MARKER_PATH.to_string(),
        });
    }
    let len = fs::metadata(&marker_path)?.len();
    if len > MAX_MARKER_BYTES {
        return Err(VerifyError::MarkerMismatch {
            expected: MARKER_CONTENT.to_string(),
            found: format!("<{} bytes>", len),
        });
    }
    let bytes = fs::read(&marker_path)?;
    let found = String::from_utf8_lossy(&bytes);
    if found.trim() != MARKER_CONTENT {
        return Err(VerifyError::MarkerMismatch {
            expected: MARKER_CONTENT.to_string(),
            found: found.trim().to_string(),
        });
    }
    Ok(())
}

pub fn parse_manifest_document(document: &Value) -> VerifyResult<PackageManifest> {
    let Value::Object(map) = document else {
        return Err(VerifyError::manifest_field(
            DOCUMENT_FIELD,
            format!("expected object, found {}", type_name(document)),
        ));
    };

    let created_at = match optional_string(map, "created_at")? {
        Some(s) => Some(parse_timestamp(&s).ok_or_else(|| {
            VerifyError::manifest_field("created_at", format!("unparsable timestamp {:?}", s))
        })?),
        None => None,
    };

    Ok(PackageManifest {
        workflow_id: optional_string(map, "workflow_id")?,
        spec_version: optional_string(map, "spec_version")?,
        created_at,
        file_manifest: parse_file_manifest(map)?,
        signature: optional_string(map, "signature")?,
        public_key: optional_string(map, "public_key")?,
        environment: map.get("environment").filter(|v| !v.is_null()).cloned(),
    })
}

// RFC 3339 first; producers that omit the offset are read as UTC. Only values that
// format back to RFC 3339 are accepted (ISO-8601 also admits years outside 0..=9999).
pub fn parse_timestamp(s: &str) -> Option<OffsetDateTime> {
    let s = s.trim();
    OffsetDateTime::parse(s, &Rfc3339)
        .ok()
        .or_else(|| {
            PrimitiveDateTime::parse(s, &Iso8601::DEFAULT)
                .ok()
                .map(PrimitiveDateTime::assume_utc)
        })
        .filter(|t| t.format(&Rfc3339).is_ok())
}

fn parse_file_manifest(map: &Map<String, Value>) -> VerifyResult<Vec<FileDigest>> {
    let entries = match map.get("file_manifest") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(entries)) => entries,
        Some(other) => {
            return Err(VerifyError::manifest_field(
                "file_manifest",
                format!("expected object, found {}", type_name(other)),
            ))
        }
    };

    let mut out = Vec::with_capacity(entries.len());
    for (path, declared) in entries {
        let field = format!("file_manifest[{:?}]", path);
        let Value::String(declared) = declared else {
            return Err(VerifyError::manifest_field(
                field,
                format!("expected digest string, found {}", type_name(declared)),
            ));
        };
        if sanitize_entry_name(path).is_err() {
            return Err(VerifyError::manifest_field(
                field,
                "path is not confined to the package root",
            ));
        }
        let sha256 = normalize_digest(declared).ok_or_else(|| {
            VerifyError::manifest_field(field.clone(), "digest must be 64 hex characters")
        })?;
        out.push(FileDigest {
            path: path.clone(),
            sha256,
        });
    }
    Ok(out)
}

fn optional_string(map: &Map<String, Value>, field: &str) -> VerifyResult<Option<String>> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(VerifyError::manifest_field(
            field,
            format!("expected string, found {}", type_name(other)),
        )),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
