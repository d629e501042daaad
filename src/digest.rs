//! SHA-256 hex digests.

use sha2::{Digest, Sha256};

/// Length of every digest returned by [`digest`].
pub const DIGEST_LEN: usize = 64;

/// Lowercase hex SHA-256 of `bytes`.
pub fn digest(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}
