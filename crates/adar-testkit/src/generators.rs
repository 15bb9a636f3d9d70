//! Proptest generators for property-based testing.

use proptest::prelude::*;

use adar_core::{Metadata, PeerId, RemotePath, UNSEEDED};
use adar_pairing::PeerIdentity;

/// Generate a coefficient seed that is never the unseeded marker.
pub fn seed() -> impl Strategy<Value = u64> {
    any::<u64>().prop_filter("seed 0 means unseeded", |s| *s != UNSEEDED)
}

/// Generate a file buffer of up to `max_len` bytes.
pub fn buffer(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a non-empty file buffer of up to `max_len` bytes.
pub fn non_empty_buffer(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..=max_len.max(1))
}

/// Generate a redundancy ratio.
pub fn redundancy() -> impl Strategy<Value = f64> {
    (0u32..=20).prop_map(|tenths| f64::from(tenths) / 10.0)
}

/// Generate one path segment.
pub fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.-]{1,12}".prop_filter("dot segments are not names", |s| s != "." && s != "..")
}

/// Generate an absolute path up to `depth` segments deep.
pub fn remote_path(depth: usize) -> impl Strategy<Value = RemotePath> {
    prop::collection::vec(segment(), 0..=depth).prop_map(|segments| {
        segments
            .iter()
            .try_fold(RemotePath::root(), |path, s| path.join(s))
            .unwrap_or_else(|_| RemotePath::root())
    })
}

/// Generate a nanosecond timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=i64::MAX / 2
}

/// Generate file metadata.
pub fn metadata() -> impl Strategy<Value = Metadata> {
    (any::<u32>(), timestamp(), timestamp(), timestamp(), prop::option::of(seed())).prop_map(
        |(length, ctime_ns, mtime_ns, atime_ns, seed)| Metadata {
            length: u64::from(length),
            ctime_ns,
            mtime_ns,
            atime_ns,
            seed,
        },
    )
}

/// Generate a peer identity.
pub fn peer_identity() -> impl Strategy<Value = PeerIdentity> {
    (
        any::<[u8; 16]>(),
        "[a-z][a-z0-9-]{0,15}",
        prop::collection::vec(1u32..=4, 1..=3),
    )
        .prop_map(|(id, name, versions)| PeerIdentity::new(PeerId::from_bytes(id), name, versions))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_paths_are_normalised(path in remote_path(4)) {
            prop_assert_eq!(RemotePath::new(path.as_str()).unwrap(), path.clone());
            prop_assert!(path.as_str().starts_with('/'));
        }

        #[test]
        fn generated_seeds_are_seeded(seed in seed()) {
            prop_assert_ne!(seed, UNSEEDED);
        }

        #[test]
        fn fingerprint_is_stable(identity in peer_identity()) {
            prop_assert_eq!(identity.fingerprint(), identity.clone().fingerprint());
        }
    }
}
