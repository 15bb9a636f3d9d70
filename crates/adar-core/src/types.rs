//! Strong type definitions for adar.
//!
//! Identifiers and paths are newtypes so they cannot be confused with the
//! raw strings they are carried as on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// A negotiated protocol version.
pub type Version = u32;

/// Protocol versions implemented by this crate.
pub const SUPPORTED_VERSIONS: &[Version] = &[1];

/// Stable identity of a node, advertised through discovery.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Generate a fresh random identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from raw UUID bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get the underlying UUID.
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| CoreError::InvalidPeerId(e.to_string()))
    }
}

impl From<Uuid> for PeerId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Proof of an accepted pairing, persisted per peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|e| CoreError::InvalidFingerprint(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A normalised absolute POSIX path, identical on every peer.
///
/// Backslashes are treated as separators, empty and `.` components are
/// dropped. `..` and the wire delimiters (unit separator, newline) are
/// rejected.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    /// The root directory.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and normalise a path.
    pub fn new(path: &str) -> Result<Self> {
        let mut normalised = String::with_capacity(path.len() + 1);
        for component in path.split(['/', '\\']) {
            match component {
                "" | "." => continue,
                ".." => return Err(CoreError::InvalidPath(path.to_string())),
                c if c.contains(['\x1f', '\n', '\0']) => {
                    return Err(CoreError::InvalidPath(path.to_string()))
                }
                c => {
                    normalised.push('/');
                    normalised.push_str(c);
                }
            }
        }
        if normalised.is_empty() {
            normalised.push('/');
        }
        Ok(Self(normalised))
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Append a single child name.
    pub fn join(&self, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(CoreError::InvalidPath(name.to_string()));
        }
        if self.is_root() {
            Self::new(name)
        } else {
            Self::new(&format!("{}/{}", self.0, name))
        }
    }

    /// The parent directory, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(i) => Some(Self(self.0[..i].to_string())),
        }
    }

    /// The last component, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// True if `self` is `ancestor` or lies below it.
    pub fn starts_with(&self, ancestor: &RemotePath) -> bool {
        ancestor.is_root()
            || self.0 == ancestor.0
            || (self.0.starts_with(&ancestor.0) && self.0.as_bytes()[ancestor.0.len()] == b'/')
    }

    /// Move `self` from below `from` to below `to`.
    ///
    /// Returns `None` if `self` is not below `from`.
    pub fn rebase(&self, from: &RemotePath, to: &RemotePath) -> Option<Self> {
        if !self.starts_with(from) {
            return None;
        }
        let rest = if from.is_root() {
            &self.0[..]
        } else {
            &self.0[from.0.len()..]
        };
        Self::new(&format!("{}{}", to.0, rest)).ok()
    }
}

impl fmt::Debug for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemotePath({})", self.0)
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RemotePath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for RemotePath {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(&s)
    }
}

impl From<RemotePath> for String {
    fn from(path: RemotePath) -> Self {
        path.0
    }
}

impl AsRef<str> for RemotePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_normalisation() {
        assert_eq!(RemotePath::new("").unwrap().as_str(), "/");
        assert_eq!(RemotePath::new("a/b").unwrap().as_str(), "/a/b");
        assert_eq!(RemotePath::new("\\a\\b\\").unwrap().as_str(), "/a/b");
        assert_eq!(RemotePath::new("//a/./b").unwrap().as_str(), "/a/b");
    }

    #[test]
    fn test_path_rejects_parent_and_delimiters() {
        assert!(RemotePath::new("/a/../b").is_err());
        assert!(RemotePath::new("/a\x1fb").is_err());
        assert!(RemotePath::new("/a\nb").is_err());
    }

    #[test]
    fn test_path_parent_and_name() {
        let path = RemotePath::new("/b/c").unwrap();
        assert_eq!(path.file_name(), Some("c"));
        assert_eq!(path.parent().unwrap().as_str(), "/b");
        assert_eq!(RemotePath::new("/b").unwrap().parent(), Some(RemotePath::root()));
        assert_eq!(RemotePath::root().parent(), None);
        assert_eq!(RemotePath::root().join("a").unwrap().as_str(), "/a");
        assert!(RemotePath::root().join("a/b").is_err());
    }

    #[test]
    fn test_path_ancestry() {
        let b = RemotePath::new("/b").unwrap();
        assert!(RemotePath::new("/b/c").unwrap().starts_with(&b));
        assert!(b.starts_with(&b));
        assert!(!RemotePath::new("/bc").unwrap().starts_with(&b));

        let moved = RemotePath::new("/b/c")
            .unwrap()
            .rebase(&b, &RemotePath::new("/x/y").unwrap())
            .unwrap();
        assert_eq!(moved.as_str(), "/x/y/c");
    }

    #[test]
    fn test_fingerprint_hex() {
        let fp = Fingerprint([0xab; 32]);
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()).unwrap(), fp);
        assert!(Fingerprint::from_hex("abcd").is_err());
    }

    #[test]
    fn test_peer_id_roundtrip() {
        let id = PeerId::random();
        let parsed: PeerId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<PeerId>().is_err());
    }
}
