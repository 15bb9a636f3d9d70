//! Acceptance decisions for pairing requests.
//!
//! Interactive confirmation lives outside this crate; it plugs in by
//! implementing [`PairingPolicy`].

use std::collections::HashSet;
use std::net::SocketAddr;

use async_trait::async_trait;

use adar_core::{PeerId, Version};

use crate::identity::PeerIdentity;

/// A pairing request awaiting a decision.
#[derive(Debug, Clone)]
pub struct PairingRequest {
    /// Where the request came from.
    pub addr: Option<SocketAddr>,
    /// The caller, if discovery already told us who it is.
    pub identity: Option<PeerIdentity>,
    /// Versions the caller claims to support.
    pub versions: Vec<Version>,
}

impl PairingRequest {
    /// A request for a peer we already know.
    pub fn for_peer(identity: PeerIdentity) -> Self {
        Self {
            addr: None,
            versions: identity.versions.clone(),
            identity: Some(identity),
        }
    }
}

/// Decides whether a pairing is accepted.
#[async_trait]
pub trait PairingPolicy: Send + Sync {
    async fn accept(&self, request: &PairingRequest) -> bool;
}

/// Accept every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl PairingPolicy for AcceptAll {
    async fn accept(&self, _request: &PairingRequest) -> bool {
        true
    }
}

/// Decline every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

#[async_trait]
impl PairingPolicy for RejectAll {
    async fn accept(&self, _request: &PairingRequest) -> bool {
        false
    }
}

/// Accept only known identities from a fixed set.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    allowed: HashSet<PeerId>,
}

impl AllowList {
    pub fn new(allowed: impl IntoIterator<Item = PeerId>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn allow(&mut self, peer: PeerId) {
        self.allowed.insert(peer);
    }
}

#[async_trait]
impl PairingPolicy for AllowList {
    async fn accept(&self, request: &PairingRequest) -> bool {
        request
            .identity
            .as_ref()
            .is_some_and(|identity| self.allowed.contains(&identity.id))
    }
}
