//! MD5 digests in the backup manifest encoding.
//!
//! Manifests carry base64-encoded MD5 digests while some backends
//! report hex. `hashes_match` bridges the two encodings; nothing in
//! here is a security primitive, MD5 is an identity/corruption check
//! only.

use crate::{Result, ErrorEnvelope};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::io::Read;
use std::path::Path;

/// Block size for single-pass file digests.
pub const DIGEST_BLOCK_SIZE: usize = 64 * 1024;

/// Compute the base64-encoded MD5 of a byte slice.
#[must_use]
pub fn md5_base64(bytes: &[u8]) -> String {
    BASE64.encode(md5::compute(bytes).0)
}

/// Compute the base64-encoded MD5 of a file, block-wise in one pass.
pub fn md5_base64_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(ErrorEnvelope::from)?;
    let mut context = md5::Context::new();
    let mut block = vec![0u8; DIGEST_BLOCK_SIZE];
    loop {
        let read = file.read(&mut block).map_err(ErrorEnvelope::from)?;
        if read == 0 {
            break;
        }
        context.consume(&block[..read]);
    }
    Ok(BASE64.encode(context.compute().0))
}

/// Compare two digests across the base64/hex encoding split.
///
/// Two digests match when they are byte-identical strings, or when the
/// hex rendering of the base64-decoded left side equals the right side
/// (in either direction).
#[must_use]
pub fn hashes_match(manifest_hash: &str, object_hash: &str) -> bool {
    if manifest_hash == object_hash {
        return true;
    }
    if let Some(hex) = base64_to_hex(manifest_hash) {
        if hex == object_hash {
            return true;
        }
    }
    if let Some(hex) = base64_to_hex(object_hash) {
        if hex == manifest_hash {
            return true;
        }
    }
    false
}

fn base64_to_hex(value: &str) -> Option<String> {
    let raw = BASE64.decode(value).ok()?;
    Some(to_hex(&raw))
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn digest_of_known_input() {
        // md5("hello") = 5d41402abc4b2a76b9719d911017c592
        let digest = md5_base64(b"hello");
        assert_eq!(digest, "XUFAKrxLKna5cZ2REBfFkg==");
    }

    #[test]
    fn file_digest_matches_byte_digest() -> Result<()> {
        let dir = std::env::temp_dir().join("ringvault_digest_test");
        std::fs::create_dir_all(&dir).map_err(ErrorEnvelope::from)?;
        let path = dir.join("blob.db");
        let payload = vec![42u8; DIGEST_BLOCK_SIZE * 2 + 17];
        std::fs::write(&path, &payload).map_err(ErrorEnvelope::from)?;

        assert_eq!(md5_base64_file(&path)?, md5_base64(&payload));
        Ok(())
    }

    #[test]
    fn base64_and_hex_digests_match() {
        assert!(hashes_match(
            "XUFAKrxLKna5cZ2REBfFkg==",
            "5d41402abc4b2a76b9719d911017c592"
        ));
        assert!(hashes_match(
            "5d41402abc4b2a76b9719d911017c592",
            "XUFAKrxLKna5cZ2REBfFkg=="
        ));
        assert!(hashes_match(
            "XUFAKrxLKna5cZ2REBfFkg==",
            "XUFAKrxLKna5cZ2REBfFkg=="
        ));
        assert!(!hashes_match(
            "XUFAKrxLKna5cZ2REBfFkg==",
            "00000000000000000000000000000000"
        ));
    }

    proptest! {
        #[test]
        fn digests_always_cross_match(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let b64 = md5_base64(&payload);
            let hex = to_hex(&md5::compute(&payload).0);
            prop_assert!(hashes_match(&b64, &hex));
            prop_assert!(hashes_match(&hex, &b64));
            prop_assert!(hashes_match(&b64, &b64));
        }
    }
}
