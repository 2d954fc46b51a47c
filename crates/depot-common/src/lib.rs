//! Depot Common - Shared types and utilities
//!
//! This crate provides the types shared by every Depot component:
//! artifact identifiers, algorithm-tagged hashes, ed25519 signatures,
//! configuration, and the common error taxonomy.

pub mod config;
pub mod error;
pub mod hash;
pub mod signature;
pub mod types;

pub use config::{RegistryConfig, TrustConfig};
pub use error::{Error, Result};
pub use hash::{Hash, HashAlgorithm};
pub use signature::{PublicKey, Signature, TrustedKeys};
pub use types::ArtifactId;
