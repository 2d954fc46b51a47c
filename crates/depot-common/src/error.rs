//! Error types for Depot
//!
//! This module defines the common error taxonomy used throughout the
//! registry. Every verification and edge failure is detected before any
//! mutation, so each variant here describes a rejection reason, never a
//! half-committed state.

use crate::hash::HashParseError;
use crate::signature::SignatureParseError;
use crate::types::ArtifactIdError;
use thiserror::Error;

/// Common result type for Depot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Depot
#[derive(Debug, Error)]
pub enum Error {
    // Integrity errors
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("invalid signature from key: {key_name}")]
    InvalidSignature { key_name: String },

    #[error("insufficient signatures: have {have} valid, need {need}")]
    InsufficientSignatures { have: usize, need: usize },

    // Graph errors
    #[error("dangling reference: {} missing target(s): {}", missing.len(), missing.join(" "))]
    DanglingReference { missing: Vec<String> },

    #[error("reference cycle through: {}", members.join(" "))]
    CycleDetected { members: Vec<String> },

    // Registration errors
    #[error("identity mismatch: {id} already registered with different content")]
    IdentityMismatch { id: String },

    // Lookup errors
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    // Record validation errors
    #[error("invalid artifact id: {0}")]
    InvalidArtifactId(#[from] ArtifactIdError),

    #[error("invalid hash: {0}")]
    InvalidHash(#[from] HashParseError),

    #[error("invalid signature encoding: {0}")]
    InvalidSignatureEncoding(#[from] SignatureParseError),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("bad manifest: {0}")]
    BadManifest(String),

    // Infrastructure errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an invalid record error
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        Self::InvalidRecord(msg.into())
    }

    /// Create a bad manifest error
    pub fn bad_manifest(msg: impl Into<String>) -> Self {
        Self::BadManifest(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ArtifactNotFound(_))
    }

    /// Check if this rejection means the candidate itself was at fault
    /// (as opposed to an infrastructure failure worth retrying).
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::HashMismatch { .. }
                | Self::InvalidSignature { .. }
                | Self::InsufficientSignatures { .. }
                | Self::DanglingReference { .. }
                | Self::CycleDetected { .. }
                | Self::IdentityMismatch { .. }
                | Self::InvalidArtifactId(_)
                | Self::InvalidHash(_)
                | Self::InvalidSignatureEncoding(_)
                | Self::InvalidRecord(_)
                | Self::BadManifest(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_not_found() {
        assert!(Error::ArtifactNotFound("abc".into()).is_not_found());
        assert!(!Error::Storage("disk on fire".into()).is_not_found());
    }

    #[test]
    fn test_error_rejection() {
        assert!(
            Error::HashMismatch {
                expected: "sha256:00".into(),
                actual: "sha256:ff".into()
            }
            .is_rejection()
        );
        assert!(
            Error::DanglingReference {
                missing: vec!["abc".into()]
            }
            .is_rejection()
        );
        assert!(!Error::Storage("txn failed".into()).is_rejection());
        assert!(!Error::ArtifactNotFound("abc".into()).is_rejection());
    }

    #[test]
    fn test_dangling_reference_display() {
        let err = Error::DanglingReference {
            missing: vec!["aaa".into(), "bbb".into()],
        };
        assert_eq!(
            err.to_string(),
            "dangling reference: 2 missing target(s): aaa bbb"
        );
    }
}
