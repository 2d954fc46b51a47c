//! Core type definitions for Depot
//!
//! This module defines the artifact identifier used as the primary key
//! of every registry record. Ids are derived externally from content +
//! name and treated as opaque here; validation only enforces that an id
//! is a single clean token, since references and signatures are
//! serialized as whitespace-joined token lists.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted id length in bytes.
const MAX_ID_LEN: usize = 256;

/// Unique identifier for an artifact (store path)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Create a new artifact id (validates token rules)
    pub fn new(id: impl Into<String>) -> Result<Self, ArtifactIdError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create without validation (internal use only)
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate id token rules
    fn validate(id: &str) -> Result<(), ArtifactIdError> {
        if id.is_empty() {
            return Err(ArtifactIdError::Empty);
        }
        if id.len() > MAX_ID_LEN {
            return Err(ArtifactIdError::TooLong);
        }

        // Ids are embedded in whitespace-joined lists and in `;`- and
        // `,`-delimited fingerprints, so those delimiters are forbidden.
        for c in id.chars() {
            if !c.is_ascii_graphic() {
                return Err(ArtifactIdError::InvalidChar(c));
            }
            if c == ';' || c == ',' || c == '/' {
                return Err(ArtifactIdError::InvalidChar(c));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactId({:?})", self.0)
    }
}

impl std::str::FromStr for ArtifactId {
    type Err = ArtifactIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ArtifactId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when creating an artifact id
#[derive(Debug, Clone, thiserror::Error)]
pub enum ArtifactIdError {
    #[error("artifact id cannot be empty")]
    Empty,
    #[error("artifact id must be at most {MAX_ID_LEN} bytes")]
    TooLong,
    #[error("artifact id contains invalid character: {0:?}")]
    InvalidChar(char),
}
