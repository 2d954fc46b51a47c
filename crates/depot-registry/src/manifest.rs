//! Text manifest format for the distribution boundary
//!
//! One record per manifest, one `Key: value` pair per line. This is
//! the storage-engine-agnostic representation a registry exchanges
//! with export/import collaborators: `refs` and `sigs` travel as
//! whitespace-joined tokens, hashes as algorithm-tagged digest
//! strings. Parsing is strict about required fields and tolerant of
//! unknown keys, which are logged and skipped so newer producers stay
//! readable.

use crate::record::{ArtifactRecord, Candidate, Compression};
use depot_common::{ArtifactId, Error, Hash, Result, Signature};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// One artifact record in transportable form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Manifest {
    pub id: ArtifactId,
    pub path: String,
    pub nar_hash: Hash,
    pub nar_size: u64,
    pub file_hash: Option<Hash>,
    pub file_size: Option<u64>,
    pub url: Option<String>,
    pub compression: Option<Compression>,
    pub deriver: Option<ArtifactId>,
    pub ca: Option<String>,
    pub refs: BTreeSet<ArtifactId>,
    pub sigs: Vec<Signature>,
}

impl Manifest {
    /// Attach verification bytes, producing a registration candidate.
    #[must_use]
    pub fn into_candidate(self, nar_bytes: Vec<u8>, file_bytes: Option<Vec<u8>>) -> Candidate {
        Candidate {
            id: self.id,
            path: self.path,
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
            nar_bytes,
            file_bytes,
        }
    }
}

impl From<ArtifactRecord> for Manifest {
    fn from(record: ArtifactRecord) -> Self {
        Self {
            id: record.id,
            path: record.path,
            nar_hash: record.nar_hash,
            nar_size: record.nar_size,
            file_hash: record.file_hash,
            file_size: record.file_size,
            url: record.url,
            compression: record.compression,
            deriver: record.deriver,
            ca: record.ca,
            refs: record.refs,
            sigs: record.sigs,
        }
    }
}

impl FromStr for Manifest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut id = None;
        let mut path = None;
        let mut nar_hash = None;
        let mut nar_size = None;
        let mut file_hash = None;
        let mut file_size = None;
        let mut url = None;
        let mut compression = None;
        let mut deriver = None;
        let mut ca = None;
        let mut refs = BTreeSet::new();
        let mut sigs: Vec<Signature> = Vec::new();

        for line in s.lines() {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(": ")
                .ok_or_else(|| Error::bad_manifest(format!("malformed line: {line:?}")))?;

            match name {
                "Id" => id = Some(ArtifactId::new(value)?),
                "StorePath" => path = Some(value.to_string()),
                "NarHash" => nar_hash = Some(value.parse::<Hash>()?),
                "NarSize" => {
                    nar_size = Some(value.parse().map_err(|_| {
                        Error::bad_manifest(format!("bad NarSize: {value:?}"))
                    })?);
                }
                "FileHash" => file_hash = Some(value.parse::<Hash>()?),
                "FileSize" => {
                    file_size = Some(value.parse().map_err(|_| {
                        Error::bad_manifest(format!("bad FileSize: {value:?}"))
                    })?);
                }
                "URL" => url = Some(value.to_string()),
                "Compression" => compression = Some(value.parse::<Compression>()?),
                "Deriver" => deriver = Some(ArtifactId::new(value)?),
                "References" => {
                    for token in value.split(' ').filter(|t| !t.is_empty()) {
                        refs.insert(ArtifactId::new(token)?);
                    }
                }
                "Sig" => {
                    let sig = value.parse::<Signature>()?;
                    if sigs.iter().any(|s| s.key_name == sig.key_name) {
                        warn!("duplicate signature from key: {}", sig.key_name);
                    } else {
                        sigs.push(sig);
                    }
                }
                "CA" => ca = Some(value.to_string()),
                _ => warn!("unknown manifest key: {}", name),
            }
        }

        Ok(Self {
            id: id.ok_or_else(|| Error::bad_manifest("missing Id"))?,
            path: path.ok_or_else(|| Error::bad_manifest("missing StorePath"))?,
            nar_hash: nar_hash.ok_or_else(|| Error::bad_manifest("missing NarHash"))?,
            nar_size: nar_size.ok_or_else(|| Error::bad_manifest("missing NarSize"))?,
            file_hash,
            file_size,
            url,
            compression,
            deriver,
            ca,
            refs,
            sigs,
        })
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Id: {}", self.id)?;
        writeln!(f, "StorePath: {}", self.path)?;
        writeln!(f, "NarHash: {}", self.nar_hash)?;
        writeln!(f, "NarSize: {}", self.nar_size)?;
        if let Some(file_hash) = &self.file_hash {
            writeln!(f, "FileHash: {file_hash}")?;
        }
        if let Some(file_size) = self.file_size {
            writeln!(f, "FileSize: {file_size}")?;
        }
        if let Some(url) = &self.url {
            writeln!(f, "URL: {url}")?;
        }
        if let Some(compression) = self.compression {
            writeln!(f, "Compression: {compression}")?;
        }
        if let Some(deriver) = &self.deriver {
            writeln!(f, "Deriver: {deriver}")?;
        }
        if !self.refs.is_empty() {
            write!(f, "References:")?;
            for target in &self.refs {
                write!(f, " {target}")?;
            }
            writeln!(f)?;
        }
        for sig in &self.sigs {
            writeln!(f, "Sig: {sig}")?;
        }
        if let Some(ca) = &self.ca {
            writeln!(f, "CA: {ca}")?;
        }
        Ok(())
    }
}
