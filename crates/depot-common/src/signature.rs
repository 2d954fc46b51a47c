//! Ed25519 signatures and trusted keys
//!
//! Signatures attest provenance of a registered artifact: each one is
//! an ed25519 signature over the artifact's fingerprint, made by a
//! named key. The text form of both signatures and public keys is
//! `<key-name>:<base64>`, so they survive any text-based transport.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named signature entry on an artifact record
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Name of the key that produced this signature
    pub key_name: String,
    /// Raw ed25519 signature bytes (64 bytes)
    pub bytes: Vec<u8>,
}

impl Signature {
    /// Create from a key name and raw signature bytes
    pub fn new(key_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, SignatureParseError> {
        let key_name = key_name.into();
        validate_key_name(&key_name)?;
        if bytes.len() != ed25519_dalek::SIGNATURE_LENGTH {
            return Err(SignatureParseError::WrongSignatureLength(bytes.len()));
        }
        Ok(Self { key_name, bytes })
    }
}

impl FromStr for Signature {
    type Err = SignatureParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, sig) = s.split_once(':').ok_or(SignatureParseError::MissingName)?;
        let bytes = BASE64
            .decode(sig)
            .map_err(|_| SignatureParseError::BadBase64)?;
        Self::new(name, bytes)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key_name, BASE64.encode(&self.bytes))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

/// A named ed25519 public key
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Name matching the `key_name` of signatures it can verify
    pub key_name: String,
    key: VerifyingKey,
}

impl PublicKey {
    /// Create from a key name and raw public key bytes (32 bytes)
    pub fn new(key_name: impl Into<String>, bytes: &[u8]) -> Result<Self, SignatureParseError> {
        let key_name = key_name.into();
        validate_key_name(&key_name)?;
        let bytes: &[u8; ed25519_dalek::PUBLIC_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| SignatureParseError::WrongKeyLength(bytes.len()))?;
        let key =
            VerifyingKey::from_bytes(bytes).map_err(|_| SignatureParseError::InvalidPublicKey)?;
        Ok(Self { key_name, key })
    }

    /// Check a signature over `message` against this key.
    ///
    /// Returns false for signatures made by a different key of the same
    /// name as well as for corrupt ones; the caller cannot tell these
    /// apart, and does not need to.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        if signature.key_name != self.key_name {
            return false;
        }
        let Ok(sig) = ed25519_dalek::Signature::from_slice(&signature.bytes) else {
            return false;
        };
        self.key.verify_strict(message, &sig).is_ok()
    }
}

impl FromStr for PublicKey {
    type Err = SignatureParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, key) = s.split_once(':').ok_or(SignatureParseError::MissingName)?;
        let bytes = BASE64
            .decode(key)
            .map_err(|_| SignatureParseError::BadBase64)?;
        Self::new(name, &bytes)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key_name, BASE64.encode(self.key.as_bytes()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

/// The configured set of keys whose signatures establish trust
#[derive(Clone, Debug, Default)]
pub struct TrustedKeys {
    keys: Vec<PublicKey>,
}

impl TrustedKeys {
    /// Build from a list of keys. Later keys with a duplicate name are
    /// dropped so each name maps to exactly one key.
    #[must_use]
    pub fn new(keys: Vec<PublicKey>) -> Self {
        let mut unique: Vec<PublicKey> = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.iter().any(|k| k.key_name == key.key_name) {
                unique.push(key);
            }
        }
        Self { keys: unique }
    }

    /// Look up a key by name
    #[must_use]
    pub fn get(&self, key_name: &str) -> Option<&PublicKey> {
        self.keys.iter().find(|k| k.key_name == key_name)
    }

    /// Number of configured keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are configured (trust gate disabled)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterate over the configured keys
    pub fn iter(&self) -> impl Iterator<Item = &PublicKey> {
        self.keys.iter()
    }
}

fn validate_key_name(name: &str) -> Result<(), SignatureParseError> {
    if name.is_empty() {
        return Err(SignatureParseError::MissingName);
    }
    if name.contains(':') || name.chars().any(char::is_whitespace) {
        return Err(SignatureParseError::InvalidKeyName(name.to_string()));
    }
    Ok(())
}

/// Errors that can occur when parsing signatures or public keys
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignatureParseError {
    #[error("missing key name before ':'")]
    MissingName,
    #[error("invalid key name: {0:?}")]
    InvalidKeyName(String),
    #[error("payload is not valid base64")]
    BadBase64,
    #[error("wrong signature length: expected 64 bytes, got {0}")]
    WrongSignatureLength(usize),
    #[error("wrong public key length: expected 32 bytes, got {0}")]
    WrongKeyLength(usize),
    #[error("bytes do not form a valid ed25519 public key")]
    InvalidPublicKey,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn keypair(name: &str) -> (SigningKey, PublicKey) {
        let signing = SigningKey::generate(&mut OsRng);
        let public = PublicKey::new(name, signing.verifying_key().as_bytes()).unwrap();
        (signing, public)
    }

    #[test]
    fn test_sign_and_verify() {
        let (signing, public) = keypair("cache-1");
        let message = b"1;abc;sha256:00;42;";
        let sig = Signature::new("cache-1", signing.sign(message).to_bytes().to_vec()).unwrap();

        assert!(public.verify(message, &sig));
        assert!(!public.verify(b"different message", &sig));
    }

    #[test]
    fn test_verify_rejects_wrong_key_name() {
        let (signing, _) = keypair("cache-1");
        let (_, other_public) = keypair("cache-2");
        let message = b"payload";
        let sig = Signature::new("cache-1", signing.sign(message).to_bytes().to_vec()).unwrap();

        assert!(!other_public.verify(message, &sig));
    }

    #[test]
    fn test_signature_text_roundtrip() {
        let (signing, _) = keypair("cache-1");
        let sig = Signature::new("cache-1", signing.sign(b"m").to_bytes().to_vec()).unwrap();
        let parsed: Signature = sig.to_string().parse().unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn test_public_key_text_roundtrip() {
        let (_, public) = keypair("cache-1");
        let parsed: PublicKey = public.to_string().parse().unwrap();
        assert_eq!(parsed, public);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            "nocolonhere".parse::<Signature>(),
            Err(SignatureParseError::MissingName)
        ));
        assert!(matches!(
            "k:!!!".parse::<Signature>(),
            Err(SignatureParseError::BadBase64)
        ));
        assert!(matches!(
            "k:YWJj".parse::<Signature>(),
            Err(SignatureParseError::WrongSignatureLength(3))
        ));
        assert!(matches!(
            "k:YWJj".parse::<PublicKey>(),
            Err(SignatureParseError::WrongKeyLength(3))
        ));
    }

    #[test]
    fn test_trusted_keys_dedup() {
        let (_, a) = keypair("dup");
        let (_, b) = keypair("dup");
        let keys = TrustedKeys::new(vec![a.clone(), b]);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys.get("dup"), Some(&a));
        assert!(keys.get("other").is_none());
    }
}
