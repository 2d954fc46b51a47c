//! Integrity verification
//!
//! Two independent checks gate acceptance of an artifact: the content
//! digest must match the claimed hash, and provenance must be
//! established, either by a threshold of distinct trusted-key
//! signatures over the fingerprint, or by a content-addressing
//! descriptor that makes the record self-certifying. A hash mismatch is
//! always fatal: signatures attest provenance, never content.

use crate::record::{ArtifactRecord, Candidate};
use depot_common::{Error, Hash, Result, Signature, TrustedKeys};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Verifies content hashes and signature sets against the configured
/// trusted-key set.
pub struct Verifier {
    keys: TrustedKeys,
    threshold: usize,
}

impl Verifier {
    /// Create a verifier. `threshold` is the number of distinct trusted
    /// keys that must have signed a record; an empty key set disables
    /// the trust gate entirely.
    #[must_use]
    pub fn new(keys: TrustedKeys, threshold: usize) -> Self {
        Self {
            keys,
            threshold: threshold.max(1),
        }
    }

    /// Whether registration requires established provenance.
    #[must_use]
    pub fn trust_enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    /// The configured trusted-key set.
    #[must_use]
    pub const fn keys(&self) -> &TrustedKeys {
        &self.keys
    }

    /// Recompute the digest of `data` with the claimed hash's algorithm
    /// and compare.
    pub fn verify_content(data: &[u8], claimed: &Hash) -> Result<()> {
        let actual = Hash::compute(claimed.algorithm(), data);
        if actual == *claimed {
            Ok(())
        } else {
            Err(Error::HashMismatch {
                expected: claimed.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    /// Check the signature set over `fingerprint`.
    ///
    /// A well-formed `ca` descriptor self-certifies and bypasses the
    /// threshold. Otherwise at least `threshold` distinct recognized
    /// keys must have produced valid signatures. Entries that fail to
    /// verify are logged and skipped, so one stale signature cannot
    /// poison an otherwise trusted record; signatures from
    /// unrecognized keys are ignored. When the threshold is missed and
    /// a trusted key's signature failed to verify, that failure is
    /// reported instead of the bare count.
    pub fn verify_signatures(
        &self,
        fingerprint: &str,
        sigs: &[Signature],
        ca: Option<&str>,
    ) -> Result<()> {
        if ca.is_some() {
            debug!("content-addressed, skipping signature check");
            return Ok(());
        }

        let mut valid_keys: BTreeSet<&str> = BTreeSet::new();
        let mut invalid_key: Option<&str> = None;
        for sig in sigs {
            match self.keys.get(&sig.key_name) {
                Some(key) => {
                    if key.verify(fingerprint.as_bytes(), sig) {
                        valid_keys.insert(&sig.key_name);
                    } else {
                        warn!("signature from trusted key does not verify: {}", sig.key_name);
                        invalid_key.get_or_insert(sig.key_name.as_str());
                    }
                }
                None => warn!("signature from unrecognized key: {}", sig.key_name),
            }
        }

        if valid_keys.len() >= self.threshold {
            return Ok(());
        }
        if let Some(key_name) = invalid_key {
            return Err(Error::InvalidSignature {
                key_name: key_name.to_string(),
            });
        }
        Err(Error::InsufficientSignatures {
            have: valid_keys.len(),
            need: self.threshold,
        })
    }

    /// Full acceptance check for a registration candidate: claimed
    /// metadata, content digests, then the trust gate.
    pub fn verify_candidate(&self, candidate: &Candidate) -> Result<()> {
        candidate.validate()?;

        Self::verify_content(&candidate.nar_bytes, &candidate.nar_hash)?;
        if let (Some(file_hash), Some(file_bytes)) =
            (candidate.file_hash.as_ref(), candidate.file_bytes.as_deref())
        {
            Self::verify_content(file_bytes, file_hash)?;
        }

        if self.trust_enabled() {
            self.verify_signatures(
                &candidate.fingerprint(),
                &candidate.sigs,
                candidate.ca.as_deref(),
            )?;
        }
        Ok(())
    }

    /// Re-check a committed record: field invariants plus the trust
    /// gate. Content bytes are not at hand for stored records; the
    /// filesystem layer re-verifies those on materialization.
    pub fn verify_record(&self, record: &ArtifactRecord) -> Result<()> {
        record.validate()?;
        if self.trust_enabled() {
            self.verify_signatures(&record.fingerprint(), &record.sigs, record.ca.as_deref())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{candidate, keypair, sign};
    use depot_common::HashAlgorithm;

    #[test]
    fn test_verify_content() {
        let data = b"some nar bytes";
        let hash = Hash::compute(HashAlgorithm::Sha256, data);
        assert!(Verifier::verify_content(data, &hash).is_ok());
        assert!(matches!(
            Verifier::verify_content(b"corrupted", &hash),
            Err(Error::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_trust_gate_disabled_without_keys() {
        let verifier = Verifier::new(TrustedKeys::default(), 1);
        assert!(!verifier.trust_enabled());
        assert!(verifier.verify_candidate(&candidate("aaa", &[])).is_ok());
    }

    #[test]
    fn test_signature_threshold() {
        let (sk1, pk1) = keypair("key-1");
        let (sk2, pk2) = keypair("key-2");
        let verifier = Verifier::new(TrustedKeys::new(vec![pk1, pk2]), 2);

        let mut cand = candidate("aaa", &["bbb"]);
        cand.sigs.push(sign(&cand.fingerprint(), &sk1, "key-1"));
        assert!(matches!(
            verifier.verify_candidate(&cand),
            Err(Error::InsufficientSignatures { have: 1, need: 2 })
        ));

        cand.sigs.push(sign(&cand.fingerprint(), &sk2, "key-2"));
        assert!(verifier.verify_candidate(&cand).is_ok());
    }

    #[test]
    fn test_duplicate_key_does_not_reach_threshold() {
        let (sk1, pk1) = keypair("key-1");
        let verifier = Verifier::new(TrustedKeys::new(vec![pk1]), 2);

        let mut cand = candidate("aaa", &[]);
        cand.sigs.push(sign(&cand.fingerprint(), &sk1, "key-1"));
        cand.sigs.push(sign(&cand.fingerprint(), &sk1, "key-1"));
        assert!(matches!(
            verifier.verify_candidate(&cand),
            Err(Error::InsufficientSignatures { have: 1, need: 2 })
        ));
    }

    #[test]
    fn test_bad_signature_reported_when_threshold_unmet() {
        let (sk1, pk1) = keypair("key-1");
        let verifier = Verifier::new(TrustedKeys::new(vec![pk1]), 1);

        let mut cand = candidate("aaa", &[]);
        cand.sigs.push(sign("some other fingerprint", &sk1, "key-1"));
        assert!(matches!(
            verifier.verify_candidate(&cand),
            Err(Error::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_stale_signature_skipped_when_threshold_met() {
        let (sk1, pk1) = keypair("key-1");
        let (sk2, pk2) = keypair("key-2");
        let verifier = Verifier::new(TrustedKeys::new(vec![pk1, pk2]), 1);

        // key-2 signed an older fingerprint; key-1's signature is valid
        let mut cand = candidate("aaa", &[]);
        cand.sigs.push(sign("1;aaa;sha256:00;1;", &sk2, "key-2"));
        cand.sigs.push(sign(&cand.fingerprint(), &sk1, "key-1"));
        assert!(verifier.verify_candidate(&cand).is_ok());
    }

    #[test]
    fn test_unrecognized_key_is_ignored() {
        let (sk1, pk1) = keypair("key-1");
        let (sk2, _) = keypair("stranger");
        let verifier = Verifier::new(TrustedKeys::new(vec![pk1]), 1);

        let mut cand = candidate("aaa", &[]);
        cand.sigs.push(sign(&cand.fingerprint(), &sk2, "stranger"));
        cand.sigs.push(sign(&cand.fingerprint(), &sk1, "key-1"));
        assert!(verifier.verify_candidate(&cand).is_ok());
    }

    #[test]
    fn test_ca_bypasses_signatures() {
        let (_, pk1) = keypair("key-1");
        let verifier = Verifier::new(TrustedKeys::new(vec![pk1]), 1);

        let mut cand = candidate("aaa", &[]);
        cand.ca = Some("fixed:sha256:abcdef".to_string());
        assert!(verifier.verify_candidate(&cand).is_ok());
    }

    #[test]
    fn test_hash_mismatch_fatal_despite_signatures() {
        let (sk1, pk1) = keypair("key-1");
        let verifier = Verifier::new(TrustedKeys::new(vec![pk1]), 1);

        let mut cand = candidate("aaa", &[]);
        cand.sigs.push(sign(&cand.fingerprint(), &sk1, "key-1"));
        cand.ca = Some("fixed:sha256:abcdef".to_string());
        cand.nar_bytes = b"tampered".to_vec();
        cand.nar_size = cand.nar_bytes.len() as u64;
        assert!(matches!(
            verifier.verify_candidate(&cand),
            Err(Error::HashMismatch { .. })
        ));
    }
}
