//! Content checksums for written objects

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of an in-memory buffer, as reported for every
/// partition file
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
