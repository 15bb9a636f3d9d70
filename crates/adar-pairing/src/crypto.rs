//! Key agreement and data-channel encryption.
//!
//! Each peer session owns one [`KeyAgreement`]. Both KEY exchanges of a
//! session (one per direction) use the same secret, so both sides end up
//! with the same [`SharedKey`] whichever exchange completes first.

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Nonce, Tag,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{PairingError, Result};

/// Derivation context for the data-channel key.
const DATA_KEY_CONTEXT: &str = "adar data channel v1";

/// Nonce width of the data-channel cipher.
pub const NONCE_LEN: usize = 12;

/// Authentication tag width of the data-channel cipher.
pub const TAG_LEN: usize = 16;

/// An X25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, as carried in KEY requests and responses.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|e| PairingError::InvalidPublicKey(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// The Diffie-Hellman context of one peer session.
pub struct KeyAgreement(StaticSecret);

impl KeyAgreement {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(rand::thread_rng()))
    }

    /// Create from seed bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.0))
    }

    /// Perform key agreement with a peer's public key.
    pub fn agree(&self, peer_public: &X25519PublicKey) -> SharedKey {
        let shared = self.0.diffie_hellman(&PublicKey::from(peer_public.0));
        SharedKey(*shared.as_bytes())
    }
}

/// A shared secret derived from X25519 key agreement.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive the data-channel key.
    pub fn data_key(&self) -> DataKey {
        DataKey(blake3::derive_key(DATA_KEY_CONTEXT, &self.0))
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameNonce(pub [u8; NONCE_LEN]);

impl FrameNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// Ciphertext with its nonce and detached tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: FrameNonce,
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LEN],
}

/// Symmetric key protecting data-channel payloads.
#[derive(Clone)]
pub struct DataKey([u8; 32]);

impl DataKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn cipher(&self) -> Result<ChaCha20Poly1305> {
        ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PairingError::EncryptionError(e.to_string()))
    }

    /// Encrypt under a fresh random nonce, binding `aad`.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Sealed> {
        let nonce = FrameNonce::generate();
        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher()?
            .encrypt_in_place_detached(Nonce::from_slice(&nonce.0), aad, &mut buffer)
            .map_err(|e| PairingError::EncryptionError(e.to_string()))?;
        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(&tag);
        Ok(Sealed {
            nonce,
            ciphertext: buffer,
            tag: tag_bytes,
        })
    }

    /// Verify and decrypt. Any tampering with ciphertext, tag, nonce or
    /// `aad` fails.
    pub fn open(&self, sealed: &Sealed, aad: &[u8]) -> Result<Vec<u8>> {
        let mut buffer = sealed.ciphertext.clone();
        self.cipher()?
            .decrypt_in_place_detached(
                Nonce::from_slice(&sealed.nonce.0),
                aad,
                &mut buffer,
                Tag::from_slice(&sealed.tag),
            )
            .map_err(|e| PairingError::DecryptionError(e.to_string()))?;
        Ok(buffer)
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DataKey(..)")
    }
}
