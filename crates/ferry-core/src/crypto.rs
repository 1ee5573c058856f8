//! Hashing and randomness for Ferry.
//!
//! Provides two things:
//!   1. BLAKE3 digests of transferred content, for logging and verification
//!   2. Random tokens used to mint transfer identifiers
//!
//! There is no unsafe code in this module.

use rand::RngCore;

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Incremental BLAKE3 hasher for content that is produced in pieces.
///
/// The sender feeds each chunk payload as it goes out so the digest of a
/// whole transfer is known without holding the file in memory.
///
/// # Example
/// ```
/// use ferry_core::crypto::Hasher;
/// let mut h = Hasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// let digest = h.finalize();
/// assert_eq!(digest, ferry_core::crypto::hash(b"hello world"));
/// ```
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; 32] {
        *self.0.finalize().as_bytes()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

// ── Randomness ────────────────────────────────────────────────────────────────

/// Generate a cryptographically random 16-byte token.
pub fn random_token() -> [u8; 16] {
    let mut token = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut token);
    token
}
