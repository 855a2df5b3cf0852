/*!
 * Streaming digest calculation for manifests and verification
 */

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Digest algorithm recorded in manifests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// MD5, as reported by cloud object stores
    #[default]
    Md5,

    /// SHA-256
    Sha256,
}

impl DigestAlgorithm {
    /// Length of the lowercase hex representation
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Md5 => 32,
            DigestAlgorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Md5 => write!(f, "md5"),
            DigestAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

enum HasherState {
    Md5(Md5),
    Sha256(Sha256),
}

/// Streaming hasher that calculates a digest incrementally
pub struct StreamingHasher {
    state: HasherState,
}

impl StreamingHasher {
    /// Create a new streaming hasher
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        let state = match algorithm {
            DigestAlgorithm::Md5 => HasherState::Md5(Md5::new()),
            DigestAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
        };
        Self { state }
    }

    /// Update the hash with new data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
        }
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize_hex(self) -> String {
        match self.state {
            HasherState::Md5(h) => hex::encode(h.finalize()),
            HasherState::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new(DigestAlgorithm::default())
    }
}

/// Digest of an in-memory buffer
pub fn digest_hex(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    let mut hasher = StreamingHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}
