//! File and directory metadata.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Attributes tracked for every stored entry.
///
/// Times are nanoseconds since the Unix epoch. `seed` is set for files and
/// names the coefficient stream their symbols were generated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub length: u64,
    pub ctime_ns: i64,
    pub mtime_ns: i64,
    pub atime_ns: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Metadata {
    /// Fresh metadata with all three times set to `now`.
    pub fn new(length: u64, now: i64) -> Self {
        Self {
            length,
            ctime_ns: now,
            mtime_ns: now,
            atime_ns: now,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Record a content change.
    pub fn touch_modified(&mut self, now: i64) {
        self.mtime_ns = now;
        self.atime_ns = now;
    }

    pub fn touch_accessed(&mut self, now: i64) {
        self.atime_ns = now;
    }

    pub fn is_newer_than(&self, other: &Metadata) -> bool {
        self.mtime_ns > other.mtime_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sets_all_times() {
        let m = Metadata::new(4, 100);
        assert_eq!((m.ctime_ns, m.mtime_ns, m.atime_ns), (100, 100, 100));
        assert_eq!(m.seed, None);
    }

    #[test]
    fn test_touch_and_compare() {
        let old = Metadata::new(0, 10);
        let mut new = old;
        new.touch_modified(20);
        assert!(new.is_newer_than(&old));
        assert!(!old.is_newer_than(&new));
        assert_eq!(new.ctime_ns, 10);
    }

    #[test]
    fn test_serde_skips_missing_seed() {
        let json = serde_json::to_string(&Metadata::new(1, 2)).unwrap();
        assert!(!json.contains("seed"));
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Metadata::new(1, 2));
    }

    #[test]
    fn test_now_is_positive() {
        assert!(now_nanos() > 0);
    }
}
