use crate::error::CoreResult;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

pub const DIGEST_HEX_LEN: usize = 64;

const CHUNK: usize = 64 * 1024;

// Constant memory with respect to input size; a short read is never reported as a digest.
pub fn sha256_reader<R: Read>(mut reader: R) -> CoreResult<String> {
    let mut h = Sha256::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        h.update(&buf[..n]);
    }
    Ok(hex::encode(h.finalize()))
}

pub fn sha256_file(path: &Path) -> CoreResult<String> {
    let f = File::open(path)?;
    sha256_reader(f)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Lower-cases a declared digest, returning `None` unless it is 64 hex characters.
pub fn normalize_digest(declared: &str) -> Option<String> {
    let d = declared.trim();
    if d.len() == DIGEST_HEX_LEN && d.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(d.to_ascii_lowercase())
    } else {
        None
    }
}
