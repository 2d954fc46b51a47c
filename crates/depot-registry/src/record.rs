//! Artifact records and registration candidates
//!
//! An [`ArtifactRecord`] is the persisted metadata of one store path.
//! Committed records are immutable except for `last_accessed` and
//! signature appends over unchanged content. A [`Candidate`] is the
//! pre-commit form presented by a producer: the same claimed metadata
//! plus the raw bytes used for hash verification.

use depot_common::{ArtifactId, Error, Hash, Result, Signature};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Compression applied to the remotely-fetched representation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    Xz,
    Bzip2,
    Gzip,
    Zstd,
    None,
}

impl Compression {
    /// Canonical tag used in text serialization
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Xz => "xz",
            Self::Bzip2 => "bzip2",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::None => "none",
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "xz" => Ok(Self::Xz),
            "bzip2" => Ok(Self::Bzip2),
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            "none" => Ok(Self::None),
            other => Err(Error::invalid_record(format!(
                "unknown compression: {other}"
            ))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted metadata for one artifact (store path)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Content-derived identifier, the primary key. Never reused.
    pub id: ArtifactId,
    /// Absolute filesystem location; informational, not identity.
    pub path: String,
    /// Unix seconds at commit. Set exactly once, by the transactor:
    /// a record is visible to readers if and only if it carries this.
    pub registration_time: i64,
    /// Unix seconds of last read/use; advisory, monotonically
    /// non-decreasing.
    pub last_accessed: Option<i64>,
    /// Byte count of the canonical serialized representation.
    pub nar_size: u64,
    /// Digest of that representation; the integrity anchor.
    pub nar_hash: Hash,
    /// Size of the compressed transport representation, if any.
    pub file_size: Option<u64>,
    /// Digest of the compressed transport representation, if any.
    pub file_hash: Option<Hash>,
    /// Remote-fetch provenance: where the compressed form came from.
    pub url: Option<String>,
    /// Remote-fetch provenance: how it was compressed.
    pub compression: Option<Compression>,
    /// Back-reference to the record whose build produced this one.
    /// Informational only: excluded from the reference graph and
    /// allowed to dangle after the deriver is collected.
    pub deriver: Option<ArtifactId>,
    /// Content-addressing descriptor; identity fully determined by
    /// content, which self-certifies without signatures.
    pub ca: Option<String>,
    /// Signatures over the fingerprint, in append order.
    pub sigs: Vec<Signature>,
    /// Outgoing edges of the dependency graph. A self-reference is
    /// permitted; every other element must resolve at commit time.
    pub refs: BTreeSet<ArtifactId>,
}

impl ArtifactRecord {
    /// The signed tuple: `1;<id>;<nar_hash>;<nar_size>;<refs>` with
    /// refs sorted and comma-joined, so signature validity does not
    /// depend on edge enumeration order.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.id, &self.nar_hash, self.nar_size, &self.refs)
    }

    /// Whether `other` claims the same content: identical
    /// `(nar_hash, nar_size, refs)`. Used for idempotent
    /// re-registration.
    #[must_use]
    pub fn same_content(&self, nar_hash: &Hash, nar_size: u64, refs: &BTreeSet<ArtifactId>) -> bool {
        self.nar_hash == *nar_hash && self.nar_size == nar_size && self.refs == *refs
    }

    /// Append a signature unless an identical entry is already present.
    /// Returns true if the set changed.
    pub fn add_signature(&mut self, sig: Signature) -> bool {
        if self.sigs.contains(&sig) {
            return false;
        }
        self.sigs.push(sig);
        true
    }

    /// Validate the record invariants that hold for every committed
    /// record regardless of how it arrived.
    pub fn validate(&self) -> Result<()> {
        validate_fields(
            self.nar_size,
            self.file_size,
            self.file_hash.as_ref(),
            self.ca.as_deref(),
        )
    }
}

/// A registration candidate: claimed metadata plus the raw bytes
/// needed to verify it.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub id: ArtifactId,
    pub path: String,
    pub nar_size: u64,
    pub nar_hash: Hash,
    pub file_size: Option<u64>,
    pub file_hash: Option<Hash>,
    pub url: Option<String>,
    pub compression: Option<Compression>,
    pub deriver: Option<ArtifactId>,
    pub ca: Option<String>,
    pub sigs: Vec<Signature>,
    pub refs: BTreeSet<ArtifactId>,
    /// Canonical serialized representation, checked against `nar_hash`.
    pub nar_bytes: Vec<u8>,
    /// Compressed transport representation, checked against `file_hash`
    /// when both are present.
    pub file_bytes: Option<Vec<u8>>,
}

impl Candidate {
    /// The signed tuple for this candidate; identical to the
    /// fingerprint of the record it would commit as.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.id, &self.nar_hash, self.nar_size, &self.refs)
    }

    /// Validate the claimed metadata before any verification work.
    pub fn validate(&self) -> Result<()> {
        validate_fields(
            self.nar_size,
            self.file_size,
            self.file_hash.as_ref(),
            self.ca.as_deref(),
        )?;
        if self.nar_bytes.len() as u64 != self.nar_size {
            return Err(Error::invalid_record(format!(
                "nar size mismatch for {}: claimed {}, got {} bytes",
                self.id,
                self.nar_size,
                self.nar_bytes.len()
            )));
        }
        Ok(())
    }

    /// Convert into the record that `Committing` writes. Consumes the
    /// verification bytes; `registration_time` is stamped here.
    #[must_use]
    pub fn into_record(self, registration_time: i64) -> ArtifactRecord {
        ArtifactRecord {
            id: self.id,
            path: self.path,
            registration_time,
            last_accessed: None,
            nar_size: self.nar_size,
            nar_hash: self.nar_hash,
            file_size: self.file_size,
            file_hash: self.file_hash,
            url: self.url,
            compression: self.compression,
            deriver: self.deriver,
            ca: self.ca,
            sigs: self.sigs,
            refs: self.refs,
        }
    }
}

fn fingerprint(id: &ArtifactId, nar_hash: &Hash, nar_size: u64, refs: &BTreeSet<ArtifactId>) -> String {
    let refs = refs
        .iter()
        .map(ArtifactId::as_str)
        .collect::<Vec<_>>()
        .join(",");
    format!("1;{id};{nar_hash};{nar_size};{refs}")
}

fn validate_fields(
    nar_size: u64,
    file_size: Option<u64>,
    file_hash: Option<&Hash>,
    ca: Option<&str>,
) -> Result<()> {
    if nar_size == 0 {
        return Err(Error::invalid_record("nar size must be positive"));
    }
    if file_size.is_some() != file_hash.is_some() {
        return Err(Error::invalid_record(
            "file size and file hash must be present together",
        ));
    }
    if let Some(ca) = ca {
        let method = ca.split(':').next().unwrap_or_default();
        if !matches!(method, "text" | "fixed") {
            return Err(Error::invalid_record(format!(
                "unknown content-addressing method: {ca:?}"
            )));
        }
    }
    Ok(())
}

/// Current time as Unix seconds.
#[must_use]
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
