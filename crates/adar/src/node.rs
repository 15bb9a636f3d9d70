//! The node: unified API for an adar peer.
//!
//! A node owns local storage, the peer directory and both channel loops.
//! Discovery feeds it peers; the filesystem layer calls its tree and
//! content operations, which are answered locally and then pushed to
//! every peer with a live session.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;

use adar_core::{now_nanos, PeerId, RemotePath, Version};
use adar_pairing::{AcceptAll, Pairing, PairingPolicy, PeerIdentity};
use adar_store::{Entry, Listing, SqliteStore, Storage, TrustStore};
use adar_sync::{
    ChannelContext, ControlServer, DataChannel, DiscoveredPeer, Peer, SessionState, Shutdown,
    SyncConfig,
};

use crate::config::NodeConfig;
use crate::error::Result;
use crate::session::SessionDriver;

/// Point-in-time view of one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub name: String,
    pub state: SessionState,
    pub addresses: Vec<IpAddr>,
    pub negotiated: Option<Version>,
}

impl PeerInfo {
    fn of(peer: &Peer) -> Self {
        let (addresses, negotiated) = peer.inspect(|s| (s.addresses.clone(), s.negotiated));
        Self {
            id: peer.id(),
            name: peer.identity().name.clone(),
            state: peer.state(),
            addresses,
            negotiated,
        }
    }
}

/// A running adar node.
pub struct Node {
    config: NodeConfig,
    identity: PeerIdentity,
    ctx: ChannelContext,
    data: Arc<DataChannel>,
    control_addr: SocketAddr,
    data_addr: SocketAddr,
    shutdown: Shutdown,
    /// Channel loops.
    loops: Mutex<Vec<JoinHandle<()>>>,
    /// Session drivers by peer.
    drivers: Mutex<HashMap<PeerId, JoinHandle<()>>>,
}

impl Node {
    /// Open the configured database and start with a policy accepting
    /// every pairing request.
    pub async fn start(config: NodeConfig) -> anyhow::Result<Self> {
        let store = SqliteStore::open(&config.database)
            .with_context(|| format!("opening database {}", config.database.display()))?
            .with_redundancy(config.redundancy);
        Self::start_with(config, Arc::new(store), Arc::new(AcceptAll)).await
    }

    /// Start over an existing store, binding both channels.
    ///
    /// Binding is the only fatal failure.
    pub async fn start_with<S>(
        config: NodeConfig,
        store: Arc<S>,
        policy: Arc<dyn PairingPolicy>,
    ) -> anyhow::Result<Self>
    where
        S: Storage + TrustStore + 'static,
    {
        let identity = config.local_identity();
        let directory = Arc::new(adar_sync::PeerDirectory::new(identity.id));
        let pairing = Arc::new(Pairing::new(
            store.clone(),
            policy,
            config.supported_versions.clone(),
        ));
        let ctx = ChannelContext::new(directory, store, pairing, config.channel_settings());
        let shutdown = Shutdown::new();

        let control = ControlServer::bind(
            SocketAddr::new(config.bind_ip, config.control_port),
            ctx.clone(),
            shutdown.signal(),
        )
        .await
        .with_context(|| format!("binding control port {} on {}", config.control_port, config.bind_ip))?;
        let control_addr = control.local_addr()?;

        let data = DataChannel::bind(SocketAddr::new(config.bind_ip, config.data_port), ctx.clone())
            .await
            .with_context(|| format!("binding data port {} on {}", config.data_port, config.bind_ip))?;
        let data_addr = data.local_addr()?;

        let loops = vec![
            tokio::spawn(control.run()),
            tokio::spawn(data.clone().run(shutdown.signal())),
        ];
        tracing::info!(
            "node {} ({}) listening: control {}, data {}",
            identity.name,
            identity.id,
            control_addr,
            data_addr
        );

        Ok(Self {
            config,
            identity,
            ctx,
            data,
            control_addr,
            data_addr,
            shutdown,
            loops: Mutex::new(loops),
            drivers: Mutex::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> PeerId {
        self.identity.id
    }

    pub fn identity(&self) -> &PeerIdentity {
        &self.identity
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Bound control address; differs from the configured one for port 0.
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.ctx.storage
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Discovery
    // ─────────────────────────────────────────────────────────────────────────

    /// A peer was advertised.
    ///
    /// New peers get a session driver. A known peer whose driver gave up
    /// before pairing gets another attempt.
    pub async fn on_peer_discovered(&self, discovered: DiscoveredPeer) {
        let Some((peer, fresh)) = self.ctx.directory.upsert(discovered).await else {
            return;
        };

        let mut drivers = lock(&self.drivers);
        let running = drivers.get(&peer.id()).is_some_and(|d| !d.is_finished());
        let retry = !running && peer.state() == SessionState::Discovered;
        if !fresh && !retry {
            return;
        }
        if let Some(old) = drivers.remove(&peer.id()) {
            old.abort();
        }

        tracing::info!("discovered {} ({})", peer.identity().name, peer.id());
        let driver = SessionDriver::new(self.ctx.clone(), self.data.clone(), SyncConfig::default());
        drivers.insert(peer.id(), tokio::spawn(driver.run(peer)));
    }

    /// A peer's advertisement went away.
    pub async fn on_peer_lost(&self, id: PeerId) {
        if let Some(driver) = lock(&self.drivers).remove(&id) {
            driver.abort();
        }
        if let Some(peer) = self.ctx.directory.remove(&id).await {
            tracing::info!("lost {} ({})", peer.identity().name, id);
        }
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.ctx
            .directory
            .snapshot()
            .await
            .iter()
            .map(|p| PeerInfo::of(p))
            .collect()
    }

    pub async fn peer(&self, id: &PeerId) -> Option<PeerInfo> {
        self.ctx.directory.get(id).await.map(|p| PeerInfo::of(&p))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Filesystem Operations
    // ─────────────────────────────────────────────────────────────────────────
    //
    // Each operation succeeds or fails on local storage alone. Propagation
    // to peers is best-effort and only logged.

    pub async fn create(&self, path: &RemotePath, is_dir: bool) -> Result<()> {
        self.ctx.storage.create(path, is_dir, now_nanos()).await?;
        for peer in self.ctx.directory.live().await {
            if let Some(control) = peer.control() {
                if let Err(e) = control.create(path, is_dir).await {
                    tracing::warn!("create {} on {}: {}", path, peer.identity().name, e);
                }
            }
        }
        Ok(())
    }

    pub async fn read(&self, path: &RemotePath, offset: u64, length: u64) -> Result<Vec<u8>> {
        Ok(self.ctx.storage.read(path, offset, length).await?)
    }

    /// Bytes are stored verbatim.
    pub async fn write(&self, path: &RemotePath, offset: u64, data: &[u8]) -> Result<()> {
        self.ctx.storage.write(path, offset, data, now_nanos()).await?;
        for peer in self.ctx.directory.live().await {
            if let Err(e) = self.data.send_write(&peer, path, offset, data).await {
                tracing::warn!("write {} to {}: {}", path, peer.identity().name, e);
            }
        }
        Ok(())
    }

    pub async fn rename(&self, from: &RemotePath, to: &RemotePath) -> Result<()> {
        self.ctx.storage.rename(from, to).await?;
        for peer in self.ctx.directory.live().await {
            if let Some(control) = peer.control() {
                if let Err(e) = control.rename(from, to).await {
                    tracing::warn!("rename {} on {}: {}", from, peer.identity().name, e);
                }
            }
        }
        Ok(())
    }

    pub async fn remove(&self, path: &RemotePath) -> Result<()> {
        self.ctx.storage.remove(path).await?;
        for peer in self.ctx.directory.live().await {
            if let Some(control) = peer.control() {
                if let Err(e) = control.remove(path).await {
                    tracing::warn!("remove {} on {}: {}", path, peer.identity().name, e);
                }
            }
        }
        Ok(())
    }

    pub async fn stat(&self, path: &RemotePath) -> Result<Entry> {
        Ok(self.ctx.storage.stat(path).await?)
    }

    pub async fn list(&self, path: &RemotePath) -> Result<Listing> {
        Ok(self.ctx.storage.list(path).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Shutdown
    // ─────────────────────────────────────────────────────────────────────────

    /// Say goodbye to every ready peer and stop all loops.
    pub async fn shutdown(&self) {
        for peer in self.ctx.directory.snapshot().await {
            if peer.state() != SessionState::Ready {
                continue;
            }
            if let Some(control) = peer.control() {
                if let Err(e) = control.disconnect().await {
                    tracing::debug!("DISCONNECT to {}: {}", peer.identity().name, e);
                }
            }
        }

        self.shutdown.trigger();
        for (_, driver) in lock(&self.drivers).drain() {
            driver.abort();
        }

        // Loops notice the flag within one tick.
        let grace = self.ctx.settings.poll_interval + Duration::from_millis(100);
        let loops: Vec<_> = lock(&self.loops).drain(..).collect();
        for mut handle in loops {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        tracing::info!("node {} stopped", self.identity.name);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown.trigger();
        for (_, driver) in lock(&self.drivers).drain() {
            driver.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
