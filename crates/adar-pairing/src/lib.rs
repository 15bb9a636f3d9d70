//! # Adar Pairing
//!
//! Trust between adar nodes.
//!
//! ## Overview
//!
//! Two nodes pair once. The accepting side records a fingerprint of what the
//! other declared (identity, friendly name, protocol versions) and from then
//! on rediscovery is accepted silently. Each session then runs an X25519
//! exchange over the control channel and derives the key that protects every
//! data-channel payload.
//!
//! ## Key Types
//!
//! - [`Pairing`] - `check_pairing` / `confirm_pairing` over a trust store
//! - [`PairingPolicy`] - Pluggable acceptance decision
//! - [`PeerIdentity`] - A peer's declared identity and its fingerprint
//! - [`KeyAgreement`] - Per-session Diffie-Hellman context
//! - [`DataKey`] - ChaCha20-Poly1305 key with detached tags
//!
//! ## Usage
//!
//! ```rust
//! use adar_pairing::KeyAgreement;
//!
//! let alice = KeyAgreement::generate();
//! let bob = KeyAgreement::generate();
//!
//! let key = alice.agree(&bob.public_key()).data_key();
//! let sealed = key.seal(b"payload", b"/path").unwrap();
//!
//! let same = bob.agree(&alice.public_key()).data_key();
//! assert_eq!(same.open(&sealed, b"/path").unwrap(), b"payload");
//! ```

pub mod crypto;
pub mod error;
pub mod identity;
pub mod pairing;
pub mod policy;

pub use crypto::{
    DataKey, FrameNonce, KeyAgreement, Sealed, SharedKey, X25519PublicKey, NONCE_LEN, TAG_LEN,
};
pub use error::{PairingError, Result};
pub use identity::{common_version, PeerIdentity};
pub use pairing::Pairing;
pub use policy::{AcceptAll, AllowList, PairingPolicy, PairingRequest, RejectAll};
