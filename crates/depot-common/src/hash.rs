//! Algorithm-tagged content hashes
//!
//! A [`Hash`] is the integrity anchor of a registry record: the digest
//! of an artifact's canonical serialized representation, tagged with
//! the algorithm that produced it. The text form is `<algo>:<hex>`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

/// Supported digest algorithms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Canonical lowercase name used in the text form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Digest length in bytes
    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(HashParseError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An algorithm-tagged digest
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl Hash {
    /// Create from a raw digest (validates the length against the algorithm)
    pub fn new(algorithm: HashAlgorithm, digest: Vec<u8>) -> Result<Self, HashParseError> {
        if digest.len() != algorithm.digest_len() {
            return Err(HashParseError::WrongDigestLength {
                algorithm,
                expected: algorithm.digest_len(),
                actual: digest.len(),
            });
        }
        Ok(Self { algorithm, digest })
    }

    /// Compute the digest of `data` with the given algorithm
    #[must_use]
    pub fn compute(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let digest = match algorithm {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        };
        Self { algorithm, digest }
    }

    /// The algorithm tag
    #[must_use]
    pub const fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The raw digest bytes
    #[must_use]
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Recompute the digest of `data` and compare
    #[must_use]
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::compute(self.algorithm, data) == *self
    }
}

impl FromStr for Hash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algo, digest) = s.split_once(':').ok_or(HashParseError::MissingTag)?;
        let algorithm = algo.parse::<HashAlgorithm>()?;
        let digest = hex::decode(digest).map_err(|_| HashParseError::BadHex)?;
        Self::new(algorithm, digest)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, hex::encode(&self.digest))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

/// Errors that can occur when parsing or constructing a hash
#[derive(Debug, Clone, thiserror::Error)]
pub enum HashParseError {
    #[error("hash is missing its algorithm tag")]
    MissingTag,
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("hash digest is not valid hex")]
    BadHex,
    #[error("wrong digest length for {algorithm}: expected {expected} bytes, got {actual}")]
    WrongDigestLength {
        algorithm: HashAlgorithm,
        expected: usize,
        actual: usize,
    },
}
