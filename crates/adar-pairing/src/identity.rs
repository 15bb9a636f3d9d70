//! Declared peer identities and their fingerprints.

use serde::{Deserialize, Serialize};

use adar_core::{Fingerprint, PeerId, Version};

/// Derivation context for pairing fingerprints.
const FINGERPRINT_CONTEXT: &str = "adar pairing v1";

/// What a peer declares about itself through discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: PeerId,
    /// Friendly name.
    pub name: String,
    /// Advertised protocol versions.
    pub versions: Vec<Version>,
}

impl PeerIdentity {
    pub fn new(id: PeerId, name: impl Into<String>, versions: Vec<Version>) -> Self {
        Self {
            id,
            name: name.into(),
            versions,
        }
    }

    /// Hash of name, identity and version set.
    ///
    /// Any change to what the peer declares yields a different fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new_derive_key(FINGERPRINT_CONTEXT);
        hasher.update(&(self.name.len() as u64).to_be_bytes());
        hasher.update(self.name.as_bytes());
        hasher.update(self.id.to_string().as_bytes());
        for version in &self.versions {
            hasher.update(&version.to_be_bytes());
        }
        Fingerprint(*hasher.finalize().as_bytes())
    }
}

/// The highest version supported by both sides.
pub fn common_version(local: &[Version], remote: &[Version]) -> Option<Version> {
    local.iter().filter(|v| remote.contains(v)).max().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_depends_on_every_field() {
        let id = PeerId::random();
        let base = PeerIdentity::new(id, "laptop", vec![1]);
        assert_eq!(base.fingerprint(), base.clone().fingerprint());

        let renamed = PeerIdentity::new(id, "desktop", vec![1]);
        let other = PeerIdentity::new(PeerId::random(), "laptop", vec![1]);
        let upgraded = PeerIdentity::new(id, "laptop", vec![1, 2]);
        for variant in [renamed, other, upgraded] {
            assert_ne!(variant.fingerprint(), base.fingerprint());
        }
    }

    #[test]
    fn test_common_version() {
        assert_eq!(common_version(&[1, 2, 3], &[2, 3, 4]), Some(3));
        assert_eq!(common_version(&[1], &[2]), None);
        assert_eq!(common_version(&[1], &[]), None);
    }
}
