//! Identifier and capability-hash generation.

use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Generates a fresh opaque identifier (group id, policy id, webhook id, …).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current capability hash algorithm version. Bumping this lets future
/// deployments rotate the hash scheme without invalidating already-issued
/// webhook URLs, which keep their original version tag.
pub const CAPABILITY_VERSION: u32 = 1;

/// Generates an unguessable bearer token with 256 bits of entropy, encoded
/// as a stable lowercase hex string. SHA-256 over random bytes comfortably
/// clears the 128-bit entropy bar and gives a fixed-width,
/// constant-time-comparable token.
pub fn new_capability_hash() -> String {
    let mut entropy = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut entropy);
    let digest = Sha256::digest(entropy);
    hex::encode(digest)
}
