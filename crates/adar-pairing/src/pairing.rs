//! Trust-on-first-use pairing.
//!
//! A peer is trusted once its fingerprint has been recorded. Rediscovering a
//! trusted peer with an unchanged declaration skips confirmation entirely.

use std::sync::Arc;

use adar_core::Version;
use adar_store::TrustStore;

use crate::error::Result;
use crate::identity::{common_version, PeerIdentity};
use crate::policy::{PairingPolicy, PairingRequest};

/// Pairing checks and confirmations against a trust store.
pub struct Pairing {
    trust: Arc<dyn TrustStore>,
    policy: Arc<dyn PairingPolicy>,
    versions: Vec<Version>,
}

impl Pairing {
    pub fn new(
        trust: Arc<dyn TrustStore>,
        policy: Arc<dyn PairingPolicy>,
        versions: Vec<Version>,
    ) -> Self {
        Self {
            trust,
            policy,
            versions,
        }
    }

    /// Our supported versions.
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// True iff a trust record with a matching fingerprint exists.
    ///
    /// Never writes to the trust store.
    pub async fn check_pairing(&self, peer: &PeerIdentity) -> Result<bool> {
        let recorded = self.trust.fingerprint(&peer.id).await?;
        Ok(recorded == Some(peer.fingerprint()))
    }

    /// Ask the policy, and persist the peer's fingerprint on acceptance.
    ///
    /// Requests sharing no version with us are declined without asking.
    /// Anonymous requests can be accepted but leave nothing to persist.
    pub async fn confirm_pairing(&self, request: &PairingRequest) -> Result<bool> {
        if common_version(&self.versions, &request.versions).is_none() {
            tracing::debug!("pairing declined: no common version in {:?}", request.versions);
            return Ok(false);
        }
        if !self.policy.accept(request).await {
            tracing::info!("pairing declined by policy");
            return Ok(false);
        }

        if let Some(identity) = &request.identity {
            let fingerprint = identity.fingerprint();
            match self.trust.fingerprint(&identity.id).await? {
                Some(existing) if existing == fingerprint => {}
                Some(_) => {
                    // The peer changed its declaration; the new one replaces it.
                    self.trust.forget(&identity.id).await?;
                    self.trust.record(&identity.id, &fingerprint).await?;
                }
                None => {
                    self.trust.record(&identity.id, &fingerprint).await?;
                }
            }
            tracing::info!("paired with {} ({}) [{}]", identity.name, identity.id, fingerprint);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{AcceptAll, RejectAll};
    use adar_core::{Fingerprint, PeerId};
    use adar_store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts writes reaching the wrapped store.
    struct CountingTrust {
        inner: MemoryStore,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl TrustStore for CountingTrust {
        async fn fingerprint(&self, peer: &PeerId) -> adar_store::Result<Option<Fingerprint>> {
            self.inner.fingerprint(peer).await
        }

        async fn record(&self, peer: &PeerId, fp: &Fingerprint) -> adar_store::Result<bool> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.record(peer, fp).await
        }

        async fn forget(&self, peer: &PeerId) -> adar_store::Result<bool> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.forget(peer).await
        }
    }

    fn counting() -> Arc<CountingTrust> {
        Arc::new(CountingTrust {
            inner: MemoryStore::new(),
            writes: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_check_is_idempotent_and_read_only() {
        let trust = counting();
        let pairing = Pairing::new(trust.clone(), Arc::new(AcceptAll), vec![1]);
        let peer = PeerIdentity::new(PeerId::random(), "phone", vec![1]);

        assert!(!pairing.check_pairing(&peer).await.unwrap());
        assert!(pairing
            .confirm_pairing(&PairingRequest::for_peer(peer.clone()))
            .await
            .unwrap());
        assert_eq!(trust.writes.load(Ordering::SeqCst), 1);

        assert!(pairing.check_pairing(&peer).await.unwrap());
        assert!(pairing.check_pairing(&peer).await.unwrap());
        assert_eq!(trust.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_declined_pairing_has_no_side_effects() {
        let trust = counting();
        let pairing = Pairing::new(trust.clone(), Arc::new(RejectAll), vec![1]);
        let peer = PeerIdentity::new(PeerId::random(), "phone", vec![1]);

        assert!(!pairing
            .confirm_pairing(&PairingRequest::for_peer(peer.clone()))
            .await
            .unwrap());
        assert!(!pairing.check_pairing(&peer).await.unwrap());
        assert_eq!(trust.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_incompatible_versions_declined() {
        let trust = counting();
        let pairing = Pairing::new(trust.clone(), Arc::new(AcceptAll), vec![1]);
        let peer = PeerIdentity::new(PeerId::random(), "old", vec![7]);
        assert!(!pairing
            .confirm_pairing(&PairingRequest::for_peer(peer))
            .await
            .unwrap());
        assert_eq!(trust.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_changed_declaration_needs_confirmation_again() {
        let trust = counting();
        let pairing = Pairing::new(trust.clone(), Arc::new(AcceptAll), vec![1]);
        let id = PeerId::random();
        let before = PeerIdentity::new(id, "phone", vec![1]);
        let after = PeerIdentity::new(id, "renamed", vec![1]);

        pairing
            .confirm_pairing(&PairingRequest::for_peer(before.clone()))
            .await
            .unwrap();
        assert!(!pairing.check_pairing(&after).await.unwrap());

        pairing
            .confirm_pairing(&PairingRequest::for_peer(after.clone()))
            .await
            .unwrap();
        assert!(pairing.check_pairing(&after).await.unwrap());
        assert!(!pairing.check_pairing(&before).await.unwrap());
    }
}
