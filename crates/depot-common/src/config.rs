//! Configuration types for Depot
//!
//! This module defines the registry configuration shared by the
//! library and the CLI. The CLI loads it from a TOML file and merges
//! command-line overrides on top.

use crate::signature::{PublicKey, SignatureParseError, TrustedKeys};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for a Depot registry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Path of the registry database file
    pub database_path: PathBuf,
    /// Filesystem prefix under which artifacts are materialized
    pub store_prefix: String,
    /// Trust configuration
    pub trust: TrustConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("/var/lib/depot/registry.redb"),
            store_prefix: "/depot/store".to_string(),
            trust: TrustConfig::default(),
        }
    }
}

/// Signature trust configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Trusted public keys in `<name>:<base64>` form. An empty list
    /// disables the trust gate at registration time (local builds).
    pub trusted_keys: Vec<String>,
    /// Number of distinct trusted keys that must have signed a record
    pub signature_threshold: usize,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            trusted_keys: Vec::new(),
            signature_threshold: 1,
        }
    }
}

impl TrustConfig {
    /// Parse the configured key strings into a [`TrustedKeys`] set
    pub fn trusted_keys(&self) -> Result<TrustedKeys, SignatureParseError> {
        let keys = self
            .trusted_keys
            .iter()
            .map(|k| k.parse::<PublicKey>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TrustedKeys::new(keys))
    }
}
