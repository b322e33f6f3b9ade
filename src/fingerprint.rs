//! Content identity: a stable SHA-256 fingerprint of an uploaded payload.
//!
//! Two uploads with identical bytes always map to the same [`Fingerprint`],
//! which is what lets the scheduler skip re-converting a document it has
//! already rendered and lets the artifact store use the fingerprint as a
//! collision-free storage key.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Hex-encoded SHA-256 digest of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

/// Compute the fingerprint of `payload`. Pure and deterministic.
pub fn fingerprint(payload: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    Fingerprint(format!("{:x}", hasher.finalize()))
}

impl Fingerprint {
    /// Length of the hex representation.
    pub const HEX_LEN: usize = 64;

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    /// Accepts exactly 64 hex digits; upper case is normalised.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == Self::HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Fingerprint(s.to_ascii_lowercase()))
        } else {
            Err(format!("'{s}' is not a SHA-256 hex digest"))
        }
    }
}
