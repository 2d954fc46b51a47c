//! Depot Registry - Path registry and closure engine
//!
//! This crate records metadata about immutable, content-addressed
//! build artifacts, keeps the reference graph between them consistent,
//! verifies content hashes and signatures, computes closures, and
//! garbage-collects unreachable records. The [`Registry`] facade wires
//! the pieces together and exposes the administrative surface.

pub mod gc;
pub mod graph;
pub mod manifest;
pub mod record;
pub mod store;
mod tables;
pub mod transact;
pub mod verify;

pub use gc::{CollectReport, Collector};
pub use graph::ReferenceGraph;
pub use manifest::Manifest;
pub use record::{ArtifactRecord, Candidate, Compression};
pub use store::{DeleteOutcome, MetadataStore, PutOutcome};
pub use transact::{RegisterOutcome, Transactor};
pub use verify::Verifier;

use depot_common::{ArtifactId, Error, RegistryConfig, Result, Signature};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// An open registry: metadata store, verifier, transactor and
/// collector behind one administrative surface. All state lives in the
/// store; this type is cheap to share by reference.
pub struct Registry {
    store: MetadataStore,
    verifier: Verifier,
}

impl Registry {
    /// Open the registry described by `config`.
    pub fn open(config: &RegistryConfig) -> Result<Self> {
        let keys = config.trust.trusted_keys()?;
        if keys.is_empty() {
            warn!("no trusted keys configured; registration trust gate is disabled");
        }
        let verifier = Verifier::new(keys, config.trust.signature_threshold);
        let store = MetadataStore::open(&config.database_path)?;
        info!("opened registry at {}", config.database_path.display());
        Ok(Self { store, verifier })
    }

    /// The underlying metadata store.
    #[must_use]
    pub const fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Register one candidate artifact.
    pub fn register(&self, candidate: Candidate) -> Result<RegisterOutcome> {
        Transactor::new(&self.store, &self.verifier).register(candidate)
    }

    /// Register a batch of interdependent candidates atomically.
    pub fn register_batch(
        &self,
        candidates: Vec<Candidate>,
    ) -> Result<Vec<(ArtifactId, RegisterOutcome)>> {
        Transactor::new(&self.store, &self.verifier).register_batch(candidates)
    }

    /// Fetch a record and mark it used.
    pub fn info(&self, id: &ArtifactId) -> Result<ArtifactRecord> {
        self.store.touch(id)?;
        self.store
            .get(id)?
            .ok_or_else(|| Error::ArtifactNotFound(id.to_string()))
    }

    /// All committed records.
    pub fn list(&self) -> Result<Vec<ArtifactRecord>> {
        Ok(self.store.list_all()?)
    }

    /// The closure of `ids` under the reference graph.
    pub fn query_closure(&self, ids: &BTreeSet<ArtifactId>) -> Result<BTreeSet<ArtifactId>> {
        Ok(ReferenceGraph::new(&self.store).closure(ids)?)
    }

    /// Run one garbage-collection pass from `roots`.
    pub fn collect(&self, roots: &BTreeSet<ArtifactId>) -> Result<CollectReport> {
        Collector::new(&self.store).collect(roots)
    }

    /// Re-check a committed record: field invariants, edge resolution,
    /// and the signature trust gate.
    pub fn verify(&self, id: &ArtifactId) -> Result<()> {
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| Error::ArtifactNotFound(id.to_string()))?;

        let batch = BTreeSet::from([record.id.clone()]);
        let missing = ReferenceGraph::new(&self.store).missing_targets(&record.refs, &batch)?;
        if !missing.is_empty() {
            return Err(Error::DanglingReference {
                missing: missing.iter().map(ToString::to_string).collect(),
            });
        }

        self.verifier.verify_record(&record)
    }

    /// Export the closure of `ids` as manifests in deterministic order,
    /// a consistent sub-store ready for transfer.
    pub fn export_closure(&self, ids: &BTreeSet<ArtifactId>) -> Result<Vec<Manifest>> {
        let closure = self.query_closure(ids)?;
        let mut manifests = Vec::with_capacity(closure.len());
        for id in closure {
            let record = self
                .store
                .get(&id)?
                .ok_or_else(|| Error::ArtifactNotFound(id.to_string()))?;
            manifests.push(Manifest::from(record));
        }
        Ok(manifests)
    }

    /// Append a signature over unchanged content. When the signing key
    /// is trusted, the signature is verified against the record's
    /// fingerprint first; signatures from unknown keys are stored
    /// as-is for downstream consumers. Returns whether the signature
    /// set changed.
    pub fn add_signature(&self, id: &ArtifactId, sig: Signature) -> Result<bool> {
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| Error::ArtifactNotFound(id.to_string()))?;

        match self.verifier.keys().get(&sig.key_name) {
            Some(key) => {
                if !key.verify(record.fingerprint().as_bytes(), &sig) {
                    return Err(Error::InvalidSignature {
                        key_name: sig.key_name,
                    });
                }
            }
            None => warn!("storing signature from unrecognized key: {}", sig.key_name),
        }

        let appended = self
            .store
            .append_signature(id, &sig)?
            .ok_or_else(|| Error::ArtifactNotFound(id.to_string()))?;
        Ok(appended)
    }
}
