//! FAT File Integrity Digest
//!
//! Keyed 16-byte checksum protecting the metadata file against partial
//! writes and external corruption.

use sha2::{Digest, Sha256};

/// Size of the digest header at the start of the FAT file.
pub const DIGEST_LEN: usize = 16;

// Fixed key mixed into the hash so a foreign tool writing plain SHA-256
// output cannot masquerade as a valid FAT file.
const DIGEST_KEY: &[u8] = b"kite-httpcache-fat\0";

/// Compute the digest over a FAT payload (everything after the header).
pub fn compute(payload: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(DIGEST_KEY);
    hasher.update(payload);
    let full = hasher.finalize();

    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&full[..DIGEST_LEN]);
    out
}

/// Write the digest of `blob[DIGEST_LEN..]` into the first `DIGEST_LEN` bytes.
pub fn stamp(blob: &mut [u8]) {
    debug_assert!(blob.len() > DIGEST_LEN);
    let digest = compute(&blob[DIGEST_LEN..]);
    blob[..DIGEST_LEN].copy_from_slice(&digest);
}

/// Check a complete FAT blob against its leading digest.
pub fn verify(blob: &[u8]) -> bool {
    if blob.len() <= DIGEST_LEN {
        return false;
    }
    compute(&blob[DIGEST_LEN..]) == blob[..DIGEST_LEN]
}
