//! Registration transactor
//!
//! Drives a registration attempt through verification, edge checking
//! and commit.
//! All verification runs before any mutation; edge existence is then
//! re-validated inside the same write transaction that commits, so
//! there is no check-then-act gap a concurrent collector could slip
//! through. A batch of interdependent candidates commits as one
//! transaction, with every candidate's id treated as existing for the
//! edge check.

use crate::graph::find_batch_cycle;
use crate::record::{Candidate, now_secs};
use crate::store::{MetadataStore, StoreError, decode, encode};
use crate::tables;
use crate::verify::Verifier;
use depot_common::{ArtifactId, Error, Result};
use redb::ReadableTable;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Result of a successful registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// Record and edges committed
    Committed,
    /// An identical record was already committed; nothing written
    NoOp,
}

/// Atomic multi-step commit of new records and their edges.
pub struct Transactor<'a> {
    store: &'a MetadataStore,
    verifier: &'a Verifier,
}

impl<'a> Transactor<'a> {
    #[must_use]
    pub const fn new(store: &'a MetadataStore, verifier: &'a Verifier) -> Self {
        Self { store, verifier }
    }

    /// Register a single candidate.
    pub fn register(&self, candidate: Candidate) -> Result<RegisterOutcome> {
        let mut outcomes = self.register_batch(vec![candidate])?;
        outcomes
            .pop()
            .map(|(_, outcome)| outcome)
            .ok_or_else(|| Error::storage("batch of one produced no outcome"))
    }

    /// Register a batch of candidates as one transaction.
    ///
    /// Candidates may reference each other; the whole batch commits or
    /// none of it does. Outcomes are returned in input order.
    pub fn register_batch(
        &self,
        candidates: Vec<Candidate>,
    ) -> Result<Vec<(ArtifactId, RegisterOutcome)>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Ids must be unique within the batch.
        let mut batch_ids: BTreeSet<ArtifactId> = BTreeSet::new();
        for candidate in &candidates {
            if !batch_ids.insert(candidate.id.clone()) {
                return Err(Error::invalid_record(format!(
                    "duplicate candidate id in batch: {}",
                    candidate.id
                )));
            }
        }

        // Content hashes and the trust gate, before any mutation.
        for candidate in &candidates {
            self.verifier.verify_candidate(candidate).inspect_err(|e| {
                warn!("rejected candidate {}: {}", candidate.id, e);
            })?;
        }

        // A batch may not introduce a multi-node cycle; closures must
        // terminate without special-casing.
        if let Some(members) = find_batch_cycle(&candidates) {
            warn!("rejected batch: cycle through {} record(s)", members.len());
            return Err(Error::CycleDetected {
                members: members.iter().map(ToString::to_string).collect(),
            });
        }

        // Edge check and commit share one write transaction.
        let now = now_secs();
        let write_txn = self.store.begin_write()?;
        let outcomes = {
            let mut table = write_txn
                .open_table(tables::ARTIFACTS)
                .map_err(StoreError::from)?;

            // Every ref must resolve to a committed record or to a
            // same-batch candidate.
            let mut missing: Vec<String> = Vec::new();
            for candidate in &candidates {
                for target in &candidate.refs {
                    if !batch_ids.contains(target)
                        && table
                            .get(target.as_str())
                            .map_err(StoreError::from)?
                            .is_none()
                    {
                        missing.push(target.to_string());
                    }
                }
            }
            if !missing.is_empty() {
                missing.sort();
                missing.dedup();
                warn!("rejected batch: {} dangling reference(s)", missing.len());
                return Err(Error::DanglingReference { missing });
            }

            let mut outcomes = Vec::with_capacity(candidates.len());
            for candidate in candidates {
                let existing = table
                    .get(candidate.id.as_str())
                    .map_err(StoreError::from)?
                    .map(|v| decode(v.value()))
                    .transpose()
                    .map_err(StoreError::from)?;
                match existing {
                    Some(existing) => {
                        if existing.same_content(
                            &candidate.nar_hash,
                            candidate.nar_size,
                            &candidate.refs,
                        ) {
                            outcomes.push((candidate.id, RegisterOutcome::NoOp));
                        } else {
                            warn!("rejected candidate {}: identity mismatch", candidate.id);
                            return Err(Error::IdentityMismatch {
                                id: candidate.id.to_string(),
                            });
                        }
                    }
                    None => {
                        let id = candidate.id.clone();
                        let record = candidate.into_record(now);
                        let bytes = encode(&record).map_err(StoreError::from)?;
                        table
                            .insert(id.as_str(), bytes.as_slice())
                            .map_err(StoreError::from)?;
                        outcomes.push((id, RegisterOutcome::Committed));
                    }
                }
            }
            outcomes
        };
        write_txn.commit().map_err(StoreError::from)?;

        let committed = outcomes
            .iter()
            .filter(|(_, o)| *o == RegisterOutcome::Committed)
            .count();
        info!(
            "registered batch: {} committed, {} no-op",
            committed,
            outcomes.len() - committed
        );
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{candidate, keypair, sign, store_with};
    use depot_common::TrustedKeys;
    use tempfile::tempdir;

    fn open_trustless(dir: &std::path::Path) -> (MetadataStore, Verifier) {
        let store = store_with(dir, &[]);
        let verifier = Verifier::new(TrustedKeys::default(), 1);
        (store, verifier)
    }

    #[test]
    fn test_register_then_noop() {
        let dir = tempdir().unwrap();
        let (store, verifier) = open_trustless(dir.path());
        let transactor = Transactor::new(&store, &verifier);

        let cand = candidate("aaa", &[]);
        assert_eq!(
            transactor.register(cand.clone()).unwrap(),
            RegisterOutcome::Committed
        );
        assert_eq!(transactor.register(cand).unwrap(), RegisterOutcome::NoOp);
        assert_eq!(store.len().unwrap(), 1);

        let record = store
            .get(&ArtifactId::new_unchecked("aaa"))
            .unwrap()
            .unwrap();
        assert!(record.registration_time > 0);
    }

    #[test]
    fn test_identity_mismatch_keeps_original() {
        let dir = tempdir().unwrap();
        let (store, verifier) = open_trustless(dir.path());
        let transactor = Transactor::new(&store, &verifier);

        let original = candidate("aaa", &[]);
        transactor.register(original.clone()).unwrap();

        let mut tampered = candidate("aaa", &[]);
        tampered.nar_bytes = b"different content".to_vec();
        tampered.nar_size = tampered.nar_bytes.len() as u64;
        tampered.nar_hash =
            depot_common::Hash::compute(depot_common::HashAlgorithm::Sha256, &tampered.nar_bytes);

        assert!(matches!(
            transactor.register(tampered),
            Err(Error::IdentityMismatch { .. })
        ));
        let kept = store
            .get(&ArtifactId::new_unchecked("aaa"))
            .unwrap()
            .unwrap();
        assert_eq!(kept.nar_hash, original.nar_hash);
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let dir = tempdir().unwrap();
        let (store, verifier) = open_trustless(dir.path());
        let transactor = Transactor::new(&store, &verifier);

        let cand = candidate("aaa", &["missing-dep"]);
        assert!(matches!(
            transactor.register(cand),
            Err(Error::DanglingReference { missing }) if missing == vec!["missing-dep"]
        ));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_self_reference_accepted() {
        let dir = tempdir().unwrap();
        let (store, verifier) = open_trustless(dir.path());
        let transactor = Transactor::new(&store, &verifier);

        assert_eq!(
            transactor.register(candidate("selfy", &["selfy"])).unwrap(),
            RegisterOutcome::Committed
        );
        assert!(store.contains(&ArtifactId::new_unchecked("selfy")).unwrap());
    }

    #[test]
    fn test_batch_interdependent_commits() {
        let dir = tempdir().unwrap();
        let (store, verifier) = open_trustless(dir.path());
        let transactor = Transactor::new(&store, &verifier);

        let outcomes = transactor
            .register_batch(vec![
                candidate("app", &["lib"]),
                candidate("lib", &["base"]),
                candidate("base", &[]),
            ])
            .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|(_, o)| *o == RegisterOutcome::Committed));
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn test_batch_is_atomic_on_dangling() {
        let dir = tempdir().unwrap();
        let (store, verifier) = open_trustless(dir.path());
        let transactor = Transactor::new(&store, &verifier);

        let result = transactor.register_batch(vec![
            candidate("good", &[]),
            candidate("bad", &["nowhere"]),
        ]);
        assert!(matches!(result, Err(Error::DanglingReference { .. })));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_cycle_across_transactions_rejected() {
        let dir = tempdir().unwrap();
        let (store, verifier) = open_trustless(dir.path());
        let transactor = Transactor::new(&store, &verifier);

        // B cannot come first: its edge to A dangles.
        assert!(matches!(
            transactor.register(candidate("bbb", &["aaa"])),
            Err(Error::DanglingReference { .. })
        ));
        // A alone is fine; B then resolves.
        transactor.register(candidate("aaa", &[])).unwrap();
        transactor.register(candidate("bbb", &["aaa"])).unwrap();
        // Closing the loop would need an A that references B, but A is
        // already committed without that edge.
        assert!(matches!(
            transactor.register(candidate("aaa", &["bbb"])),
            Err(Error::IdentityMismatch { .. })
        ));
    }

    #[test]
    fn test_cycle_within_batch_rejected() {
        let dir = tempdir().unwrap();
        let (store, verifier) = open_trustless(dir.path());
        let transactor = Transactor::new(&store, &verifier);

        let result = transactor.register_batch(vec![
            candidate("aaa", &["bbb"]),
            candidate("bbb", &["aaa"]),
        ]);
        assert!(matches!(result, Err(Error::CycleDetected { .. })));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_duplicate_ids_in_batch_rejected() {
        let dir = tempdir().unwrap();
        let (store, verifier) = open_trustless(dir.path());
        let transactor = Transactor::new(&store, &verifier);

        let result =
            transactor.register_batch(vec![candidate("aaa", &[]), candidate("aaa", &[])]);
        assert!(matches!(result, Err(Error::InvalidRecord(_))));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_hash_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let (store, verifier) = open_trustless(dir.path());
        let transactor = Transactor::new(&store, &verifier);

        let mut cand = candidate("aaa", &[]);
        cand.nar_hash =
            depot_common::Hash::compute(depot_common::HashAlgorithm::Sha256, b"other bytes");
        assert!(matches!(
            transactor.register(cand),
            Err(Error::HashMismatch { .. })
        ));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_trust_gate_requires_signature() {
        let dir = tempdir().unwrap();
        let store = store_with(dir.path(), &[]);
        let (sk, pk) = keypair("cache-key");
        let verifier = Verifier::new(TrustedKeys::new(vec![pk]), 1);
        let transactor = Transactor::new(&store, &verifier);

        // unsigned, not content-addressed: rejected
        assert!(matches!(
            transactor.register(candidate("aaa", &[])),
            Err(Error::InsufficientSignatures { .. })
        ));

        // signed: accepted
        let mut signed = candidate("aaa", &[]);
        signed
            .sigs
            .push(sign(&signed.fingerprint(), &sk, "cache-key"));
        assert_eq!(
            transactor.register(signed).unwrap(),
            RegisterOutcome::Committed
        );

        // content-addressed: accepted without signatures
        let mut ca = candidate("bbb", &[]);
        ca.ca = Some("text:sha256:abcdef".to_string());
        assert_eq!(transactor.register(ca).unwrap(), RegisterOutcome::Committed);
    }
}
