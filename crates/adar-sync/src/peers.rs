//! Peer directory and per-peer session state.
//!
//! The directory is the single owner of [`Peer`] handles. Workers look
//! peers up by identity or by source address and never keep a peer's
//! mutable fields outside its lock across a suspension point.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{watch, Notify, RwLock};
use tokio::time::Instant;

use adar_core::{PeerId, Version};
use adar_pairing::{DataKey, KeyAgreement, PeerIdentity};

use crate::control::ControlClient;
use crate::error::{Result, SyncError};

/// Lifecycle of a peer session.
///
/// States only move forward one step at a time, except that any state
/// may drop to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionState {
    Discovered,
    Paired,
    Connected,
    KeyAgreed,
    Syncing,
    Ready,
    Disconnected,
}

impl SessionState {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Discovered => Some(Self::Paired),
            Self::Paired => Some(Self::Connected),
            Self::Connected => Some(Self::KeyAgreed),
            Self::KeyAgreed => Some(Self::Syncing),
            Self::Syncing => Some(Self::Ready),
            Self::Ready | Self::Disconnected => None,
        }
    }

    pub fn can_advance_to(self, to: Self) -> bool {
        (to == Self::Disconnected && self != Self::Disconnected) || self.next() == Some(to)
    }

    /// Paired and not yet gone.
    pub fn is_trusted(self) -> bool {
        self >= Self::Paired && self != Self::Disconnected
    }

    /// Filesystem changes are propagated to peers in these states.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Syncing | Self::Ready)
    }
}

/// A peer record as supplied by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub identity: PeerIdentity,
    pub addresses: Vec<IpAddr>,
    pub control_port: u16,
    pub data_port: u16,
}

/// Mutable fields of a peer, filled in as the session progresses.
#[derive(Default)]
pub struct PeerSession {
    pub addresses: Vec<IpAddr>,
    pub control_port: u16,
    pub data_port: u16,
    pub negotiated: Option<Version>,
    pub control: Option<Arc<ControlClient>>,
    pub data_endpoint: Option<SocketAddr>,
    pub data_key: Option<DataKey>,
    pub we_ready: bool,
    pub peer_ready: bool,
}

impl PeerSession {
    /// Control handle, data endpoint and key are all present.
    pub fn channels_live(&self) -> bool {
        self.control.is_some() && self.data_endpoint.is_some() && self.data_key.is_some()
    }
}

/// One discovered peer.
pub struct Peer {
    identity: PeerIdentity,
    key_agreement: KeyAgreement,
    state: watch::Sender<SessionState>,
    session: Mutex<PeerSession>,
    changed: Notify,
}

impl Peer {
    pub fn new(discovered: DiscoveredPeer) -> Self {
        let (state, _) = watch::channel(SessionState::Discovered);
        Self {
            identity: discovered.identity,
            key_agreement: KeyAgreement::generate(),
            state,
            session: Mutex::new(PeerSession {
                addresses: discovered.addresses.into_iter().map(canonical).collect(),
                control_port: discovered.control_port,
                data_port: discovered.data_port,
                ..PeerSession::default()
            }),
            changed: Notify::new(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.identity.id
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    /// The Diffie-Hellman context used for every KEY exchange with this peer.
    pub fn key_agreement(&self) -> &KeyAgreement {
        &self.key_agreement
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Move to `to` if the state machine allows it.
    pub fn advance(&self, to: SessionState) -> Result<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if state.can_advance_to(to) {
                *state = to;
                true
            } else {
                result = Err(SyncError::InvalidTransition { from: *state, to });
                false
            }
        });
        if result.is_ok() {
            tracing::info!("peer {} ({}) -> {:?}", self.identity.name, self.id(), to);
            self.changed.notify_waiters();
        }
        result
    }

    /// Drop to `Disconnected` and release both channel handles.
    ///
    /// Returns the control handle so the caller can close it.
    pub fn disconnect(&self) -> Option<Arc<ControlClient>> {
        let _ = self.advance(SessionState::Disconnected);
        self.with_session(|s| {
            s.data_endpoint = None;
            s.data_key = None;
            s.control.take()
        })
    }

    fn lock(&self) -> MutexGuard<'_, PeerSession> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mutate the session and wake anyone waiting on it.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut PeerSession) -> R) -> R {
        let result = f(&mut self.lock());
        self.changed.notify_waiters();
        result
    }

    /// Read from the session without waking waiters.
    pub fn inspect<R>(&self, f: impl FnOnce(&PeerSession) -> R) -> R {
        f(&self.lock())
    }

    pub fn has_address(&self, ip: IpAddr) -> bool {
        let ip = canonical(ip);
        self.inspect(|s| s.addresses.contains(&ip))
    }

    pub fn control(&self) -> Option<Arc<ControlClient>> {
        self.inspect(|s| s.control.clone())
    }

    pub fn data_endpoint(&self) -> Option<SocketAddr> {
        self.inspect(|s| s.data_endpoint)
    }

    pub fn data_key(&self) -> Option<DataKey> {
        self.inspect(|s| s.data_key.clone())
    }

    /// Complete the session once both sides have replicated.
    pub fn mark_ready_if_both(&self) -> bool {
        let both = self.inspect(|s| s.we_ready && s.peer_ready);
        both && self.state() == SessionState::Syncing && self.advance(SessionState::Ready).is_ok()
    }

    /// Wait until `cond` holds, bounded by `timeout`.
    ///
    /// Wakes on every session mutation and state transition instead of
    /// polling. Returns whether the condition held before the deadline.
    pub async fn wait_until<F>(&self, timeout: Duration, mut cond: F) -> bool
    where
        F: FnMut(&PeerSession, SessionState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            if cond(&self.lock(), self.state()) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return cond(&self.lock(), self.state());
            }
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.identity.id)
            .field("name", &self.identity.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Treat IPv4-mapped IPv6 addresses as the IPv4 address they carry.
pub fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

/// Registry of known peers, keyed by identity.
pub struct PeerDirectory {
    local: PeerId,
    peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
    changed: Notify,
}

impl PeerDirectory {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            peers: RwLock::new(HashMap::new()),
            changed: Notify::new(),
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    /// Add a discovered peer, or refresh the addresses of a known one.
    ///
    /// Returns the peer and whether it is new. Our own advertisement is
    /// ignored.
    pub async fn upsert(&self, discovered: DiscoveredPeer) -> Option<(Arc<Peer>, bool)> {
        let id = discovered.identity.id;
        if id == self.local {
            return None;
        }

        let mut peers = self.peers.write().await;
        let result = match peers.get(&id) {
            Some(existing) if existing.state() != SessionState::Disconnected => {
                existing.with_session(|s| {
                    for ip in discovered.addresses.iter().copied().map(canonical) {
                        if !s.addresses.contains(&ip) {
                            s.addresses.push(ip);
                        }
                    }
                    s.control_port = discovered.control_port;
                    s.data_port = discovered.data_port;
                });
                (existing.clone(), false)
            }
            _ => {
                let peer = Arc::new(Peer::new(discovered));
                peers.insert(id, peer.clone());
                (peer, true)
            }
        };
        drop(peers);
        self.changed.notify_waiters();
        Some(result)
    }

    pub async fn get(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.read().await.get(id).cloned()
    }

    /// Remove a peer and mark it disconnected.
    pub async fn remove(&self, id: &PeerId) -> Option<Arc<Peer>> {
        let peer = self.peers.write().await.remove(id)?;
        if let Some(control) = peer.disconnect() {
            control.close().await;
        }
        self.changed.notify_waiters();
        Some(peer)
    }

    /// The live peer advertising `ip`, if any.
    pub async fn find_by_addr(&self, ip: IpAddr) -> Option<Arc<Peer>> {
        self.peers
            .read()
            .await
            .values()
            .find(|p| p.state() != SessionState::Disconnected && p.has_address(ip))
            .cloned()
    }

    /// Like [`find_by_addr`](Self::find_by_addr), waiting up to `timeout`
    /// for discovery to catch up.
    pub async fn wait_for_addr(&self, ip: IpAddr, timeout: Duration) -> Option<Arc<Peer>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            if let Some(peer) = self.find_by_addr(ip).await {
                return Some(peer);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.find_by_addr(ip).await;
            }
        }
    }

    /// All peers at the time of the call.
    pub async fn snapshot(&self) -> Vec<Arc<Peer>> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Peers that receive filesystem changes.
    pub async fn live(&self) -> Vec<Arc<Peer>> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|p| p.state().is_live())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}
