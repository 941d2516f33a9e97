//! Ed25519 key material for the Tessera protocol.
//!
//! Wraps ed25519-dalek key handling behind small protocol-level types.
//! Transaction signatures are produced over the sighash (see
//! [`sighash`](crate::sighash)); block producers additionally sign the
//! unsigned block hash with the same key type. Addresses are
//! `HASH160(public key)`.

use ed25519_dalek::{Signer, Verifier};
use std::fmt;

use crate::error::CryptoError;
use crate::hashes::hash160;

/// Raw Ed25519 public key length.
pub const PUBLIC_KEY_LEN: usize = 32;
/// Raw Ed25519 signature length.
pub const SIGNATURE_LEN: usize = 64;

/// Ed25519 keypair for signing transactions and blocks.
pub struct KeyPair {
    signing_key: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self { signing_key: ed25519_dalek::SigningKey::generate(&mut csprng) }
    }

    /// Create a keypair from 32-byte secret key material.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self { signing_key: ed25519_dalek::SigningKey::from_bytes(&bytes) }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey { verifying_key: self.signing_key.verifying_key() }
    }

    /// Get the raw secret key bytes. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a message, returning the raw 64-byte Ed25519 signature.
    ///
    /// Ed25519 signing is deterministic (RFC 8032): the same key and message
    /// always produce the same signature. The VRF construction relies on this.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }

    /// The 20-byte address of this keypair: `HASH160(public key)`.
    pub fn address(&self) -> [u8; 20] {
        self.public_key().address()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key for verifying signatures and deriving addresses.
#[derive(Clone)]
pub struct PublicKey {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    /// Create a public key from raw 32-byte material.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let vk = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { verifying_key: vk })
    }

    /// Create a public key from a byte slice of any length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&arr)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// The 20-byte address of this key: `HASH160(public key)`.
    pub fn address(&self) -> [u8; 20] {
        hash160(&self.to_bytes())
    }

    /// Verify an Ed25519 signature on a message.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(signature);
        self.verifying_key
            .verify(message, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }

    /// Verify a signature supplied as a slice (length-checked).
    pub fn verify_slice(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let arr: [u8; 64] = signature.try_into().map_err(|_| CryptoError::InvalidSignature)?;
        self.verify(message, &arr)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}
