mod common;

use epi_verify_core::hasher::sha256_hex;
use epi_verify_core::integrity::{check_integrity, IntegrityStatus};
use epi_verify_core::manifest::FileDigest;
use epi_verify_core::VerifyError;
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;

fn digest(path: &str, sha256: impl Into<String>) -> FileDigest {
    FileDigest {
        path: path.to_string(),
        sha256: sha256.into(),
    }
}

fn put(root: &Path, rel: &str, bytes: &[u8]) {
    let p = root.join(rel);
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(p, bytes).unwrap();
}

#[test]
fn empty_manifest_is_vacuously_valid() {
    let dir = tempfile::tempdir().unwrap();
    let report = check_integrity(dir.path(), &[], &AtomicBool::new(false)).unwrap();
    assert!(report.valid);
    assert_eq!(report.files_checked, 0);
    assert!(report.failures.is_empty());
}

#[test]
fn matching_files_pass() {
    let dir = tempfile::tempdir().unwrap();
    put(dir.path(), "steps.jsonl", b"{}\n");
    put(dir.path(), "artifacts/out.txt", b"result");
    let declared = [
        digest("steps.jsonl", sha256_hex(b"{}\n")),
        digest("artifacts/out.txt", sha256_hex(b"result").to_uppercase()),
    ];

    let report = check_integrity(dir.path(), &declared, &AtomicBool::new(false)).unwrap();
    assert!(report.valid, "{:?}", report.failures);
    assert_eq!(report.files_checked, 2);
}

#[test]
fn every_failure_is_reported_in_declaration_order() {
    let dir = tempfile::tempdir().unwrap();
    put(dir.path(), "a.txt", b"tampered");
    put(dir.path(), "c.txt", b"fine");
    let declared = [
        digest("a.txt", sha256_hex(b"original")),
        digest("b.txt", sha256_hex(b"never written")),
        digest("c.txt", sha256_hex(b"fine")),
    ];

    let report = check_integrity(dir.path(), &declared, &AtomicBool::new(false)).unwrap();
    assert!(!report.valid);
    assert_eq!(report.files_checked, 3);
    let statuses: Vec<_> = report.failures.iter().map(|f| (f.path.as_str(), f.status)).collect();
    assert_eq!(
        statuses,
        [
            ("a.txt", IntegrityStatus::MISMATCH),
            ("b.txt", IntegrityStatus::MISSING),
        ]
    );

    let a = report.failure_for("a.txt").unwrap();
    assert_eq!(a.expected, sha256_hex(b"original"));
    assert_eq!(a.actual.as_deref(), Some(sha256_hex(b"tampered").as_str()));
    assert!(report.failure_for("b.txt").unwrap().actual.is_none());
}

#[test]
fn declared_directory_counts_as_missing() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("logs")).unwrap();
    let declared = [digest("logs", sha256_hex(b""))];

    let report = check_integrity(dir.path(), &declared, &AtomicBool::new(false)).unwrap();
    assert_eq!(report.failures[0].status, IntegrityStatus::MISSING);
}

#[test]
fn paths_outside_the_root_are_rejected_not_read() {
    let outer = tempfile::tempdir().unwrap();
    let root = outer.path().join("root");
    fs::create_dir(&root).unwrap();
    put(outer.path(), "secret.txt", b"secret");
    let declared = [digest("../secret.txt", sha256_hex(b"secret"))];

    let report = check_integrity(&root, &declared, &AtomicBool::new(false)).unwrap();
    assert!(!report.valid);
    assert_eq!(report.failures[0].status, IntegrityStatus::REJECTED);
    assert!(report.failures[0].actual.is_none());
}

#[cfg(unix)]
#[test]
fn symlink_pointing_outside_the_root_is_rejected() {
    let outer = tempfile::tempdir().unwrap();
    let root = outer.path().join("root");
    fs::create_dir(&root).unwrap();
    put(outer.path(), "secret.txt", b"secret");
    std::os::unix::fs::symlink(outer.path().join("secret.txt"), root.join("link.txt")).unwrap();
    let declared = [digest("link.txt", sha256_hex(b"secret"))];

    let report = check_integrity(&root, &declared, &AtomicBool::new(false)).unwrap();
    assert_eq!(report.failures[0].status, IntegrityStatus::REJECTED);
}

#[test]
fn undeclared_payload_files_are_listed() {
    let dir = tempfile::tempdir().unwrap();
    put(dir.path(), "mimetype", common::MARKER.as_bytes());
    put(dir.path(), "manifest.json", b"{}");
    put(dir.path(), "declared.txt", b"d");
    put(dir.path(), "extra/zz.txt", b"z");
    put(dir.path(), "aa.txt", b"a");
    let declared = [digest("declared.txt", sha256_hex(b"d"))];

    let report = check_integrity(dir.path(), &declared, &AtomicBool::new(false)).unwrap();
    assert!(report.valid);
    assert_eq!(report.undeclared_files, ["aa.txt", "extra/zz.txt"]);
}

#[test]
fn cancellation_stops_the_check() {
    let dir = tempfile::tempdir().unwrap();
    put(dir.path(), "a.txt", b"a");
    let declared = [digest("a.txt", sha256_hex(b"a"))];

    let err = check_integrity(dir.path(), &declared, &AtomicBool::new(true)).unwrap_err();
    assert_eq!(err, VerifyError::Cancelled);
}
