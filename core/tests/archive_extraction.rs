mod common;

use common::*;
use epi_verify_core::error::VerifyError;
use epi_verify_core::extract::{extract_package, ExtractionLimits};
use epi_verify_core::{ErrorKind, PackageVerifier};
use std::fs::{self, File};
use std::io::Write;
use std::sync::atomic::AtomicBool;
use zip::write::{SimpleFileOptions, ZipWriter};

const LIMITS: ExtractionLimits = ExtractionLimits {
    max_entries: 100,
    max_total_bytes: 1 << 20,
};

fn not_cancelled() -> AtomicBool {
    AtomicBool::new(false)
}

fn assert_extraction_failed(err: VerifyError) {
    assert_eq!(err.kind(), ErrorKind::ExtractionFailed, "got {:?}", err);
}

#[test]
fn nested_entries_are_extracted_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("ok.epi");
    write_zip(
        &pkg,
        &[
            ("mimetype", MARKER.as_bytes()),
            ("logs/run/steps.jsonl", b"{\"index\":0}"),
        ],
    );
    let target = dir.path().join("scratch");
    fs::create_dir(&target).unwrap();

    let summary = extract_package(&pkg, &target, LIMITS, &not_cancelled()).unwrap();
    assert_eq!(summary.entries, 2);
    assert_eq!(summary.files_written, 2);
    assert_eq!(
        fs::read(target.join("logs").join("run").join("steps.jsonl")).unwrap(),
        b"{\"index\":0}"
    );
}

#[test]
fn traversal_entry_fails_closed_and_writes_nothing_outside() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("evil.epi");
    write_zip(
        &pkg,
        &[
            ("mimetype", MARKER.as_bytes()),
            ("../escaped.txt", b"owned"),
            ("../../etc/passwd", b"root::0:0::/:/bin/sh"),
        ],
    );
    let target = dir.path().join("scratch");
    fs::create_dir(&target).unwrap();

    let err = extract_package(&pkg, &target, LIMITS, &not_cancelled()).unwrap_err();
    assert_extraction_failed(err);
    assert!(!dir.path().join("escaped.txt").exists());
}

#[test]
fn absolute_entry_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("abs.epi");
    write_zip(&pkg, &[("/tmp/epi-absolute-entry.txt", b"x")]);
    let target = dir.path().join("scratch");
    fs::create_dir(&target).unwrap();

    assert_extraction_failed(extract_package(&pkg, &target, LIMITS, &not_cancelled()).unwrap_err());
}

#[test]
fn symlink_entry_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("link.epi");
    let mut zw = ZipWriter::new(File::create(&pkg).unwrap());
    zw.add_symlink("manifest.json", "/etc/passwd", SimpleFileOptions::default())
        .unwrap();
    zw.finish().unwrap();
    let target = dir.path().join("scratch");
    fs::create_dir(&target).unwrap();

    assert_extraction_failed(extract_package(&pkg, &target, LIMITS, &not_cancelled()).unwrap_err());
    assert!(!target.join("manifest.json").exists());
}

#[test]
fn two_names_for_the_same_path_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("dup.epi");
    write_zip(&pkg, &[("report.txt", b"first"), ("./report.txt", b"second")]);
    let target = dir.path().join("scratch");
    fs::create_dir(&target).unwrap();

    assert_extraction_failed(extract_package(&pkg, &target, LIMITS, &not_cancelled()).unwrap_err());
    assert_eq!(fs::read(target.join("report.txt")).unwrap(), b"first");
}

#[test]
fn corrupt_archive_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("corrupt.epi");
    File::create(&pkg)
        .unwrap()
        .write_all(b"PK\x03\x04 this is not really a zip")
        .unwrap();
    let target = dir.path().join("scratch");
    fs::create_dir(&target).unwrap();

    assert_extraction_failed(extract_package(&pkg, &target, LIMITS, &not_cancelled()).unwrap_err());
}

#[test]
fn expansion_beyond_byte_limit_fails_closed() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("bomb.epi");
    let big = vec![0u8; 64 * 1024];
    write_zip(&pkg, &[("a.bin", big.as_slice()), ("b.bin", big.as_slice())]);
    let target = dir.path().join("scratch");
    fs::create_dir(&target).unwrap();

    let limits = ExtractionLimits {
        max_entries: 10,
        max_total_bytes: 100 * 1024,
    };
    let err = extract_package(&pkg, &target, limits, &not_cancelled()).unwrap_err();
    assert_extraction_failed(err.clone());
    assert!(err.to_string().contains("expands beyond"));
}

#[test]
fn too_many_entries_fail_closed() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("many.epi");
    write_zip(&pkg, &[("a", b"1"), ("b", b"2"), ("c", b"3")]);
    let target = dir.path().join("scratch");
    fs::create_dir(&target).unwrap();

    let limits = ExtractionLimits {
        max_entries: 2,
        max_total_bytes: 1024,
    };
    assert_extraction_failed(extract_package(&pkg, &target, limits, &not_cancelled()).unwrap_err());
    assert_eq!(dir_entries(&target), 0);
}

#[test]
fn cancelled_extraction_stops_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let pkg = dir.path().join("ok.epi");
    write_zip(&pkg, &[("a.txt", b"1")]);
    let target = dir.path().join("scratch");
    fs::create_dir(&target).unwrap();

    let err = extract_package(&pkg, &target, LIMITS, &AtomicBool::new(true)).unwrap_err();
    assert_eq!(err, VerifyError::Cancelled);
    assert_eq!(dir_entries(&target), 0);
}

#[test]
fn verify_reports_traversal_as_extraction_failure_without_leaking_scratch() {
    let dir = tempfile::tempdir().unwrap();
    let scratch_parent = dir.path().join("scratch-parent");
    let pkg = dir.path().join("evil.epi");
    write_zip(
        &pkg,
        &[("mimetype", MARKER.as_bytes()), ("../../etc/passwd", b"x")],
    );

    let result = PackageVerifier::new(config_in(&scratch_parent)).verify(&pkg);
    assert!(!result.passed);
    assert_eq!(result.error_kind(), Some(ErrorKind::ExtractionFailed));
    assert!(result.manifest.is_none());
    assert!(result.scratch().is_none());
    assert_eq!(dir_entries(&scratch_parent), 0);
}
