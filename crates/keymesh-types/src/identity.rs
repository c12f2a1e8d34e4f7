//! Node identities and self-certifying addresses.
//!
//! Every node owns an Ed25519 keypair. Its public key is exchanged in the
//! DER `SubjectPublicKeyInfo` encoding (RFC 8410), and the node's address is
//! the SHA-256 digest of exactly those DER bytes:
//!
//! 1. Encode the verifying key as SPKI DER (44 bytes).
//! 2. Hash the encoding with SHA-256.
//! 3. The 32-byte digest is the [`Address`].
//!
//! Two nodes holding the same public key always compute the same address, and
//! addresses compare byte-for-byte.

use crate::error::{KeymeshError, KeymeshResult};
use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// DER header of an Ed25519 `SubjectPublicKeyInfo`, followed by the 32 raw key bytes.
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Length of an encoded public key.
pub const PUBLIC_KEY_DER_LENGTH: usize = ED25519_SPKI_PREFIX.len() + PUBLIC_KEY_LENGTH;

/// Length of an address in bytes.
pub const ADDRESS_LENGTH: usize = 32;

/// Stable identifier of a node: SHA-256 of its DER-encoded public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Compact human label for log lines: the first four bytes in hex.
    pub fn short_name(&self) -> String {
        format!("{}...", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

/// Derive the address for a DER-encoded public key.
///
/// Pure and infallible: any byte string hashes to an address. Callers that
/// need the bytes to be a real key should run [`decode_public_key`] first.
pub fn derive_address(public_key_der: &[u8]) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(public_key_der);
    Address(hasher.finalize().into())
}

/// Encode a verifying key as Ed25519 SPKI DER.
pub fn encode_public_key(key: &VerifyingKey) -> Vec<u8> {
    let mut der = Vec::with_capacity(PUBLIC_KEY_DER_LENGTH);
    der.extend_from_slice(&ED25519_SPKI_PREFIX);
    der.extend_from_slice(key.as_bytes());
    der
}

/// Parse an Ed25519 SPKI DER encoding back into a verifying key.
pub fn decode_public_key(der: &[u8]) -> KeymeshResult<VerifyingKey> {
    if der.len() != PUBLIC_KEY_DER_LENGTH {
        return Err(KeymeshError::InvalidPublicKey(format!(
            "expected {PUBLIC_KEY_DER_LENGTH} bytes, got {}",
            der.len()
        )));
    }
    let (prefix, raw) = der.split_at(ED25519_SPKI_PREFIX.len());
    if prefix != ED25519_SPKI_PREFIX {
        return Err(KeymeshError::InvalidPublicKey(
            "not an Ed25519 SubjectPublicKeyInfo".to_string(),
        ));
    }
    let raw: [u8; PUBLIC_KEY_LENGTH] = raw
        .try_into()
        .map_err(|_| KeymeshError::InvalidPublicKey("truncated key".to_string()))?;
    VerifyingKey::from_bytes(&raw).map_err(|e| KeymeshError::InvalidPublicKey(e.to_string()))
}

/// A node's keypair together with its derived address.
///
/// Created once at startup and never mutated afterwards.
pub struct Identity {
    signing_key: SigningKey,
    public_key: Vec<u8>,
    address: Address,
}

impl Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Rebuild an identity from a 32-byte Ed25519 secret.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    /// Wrap an existing signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let public_key = encode_public_key(&signing_key.verifying_key());
        let address = derive_address(&public_key);
        Self {
            signing_key,
            public_key,
            address,
        }
    }

    /// This node's address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// DER encoding of the public key, as sent during the handshake.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// The Ed25519 public key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
