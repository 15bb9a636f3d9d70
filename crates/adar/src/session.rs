//! Per-peer session driver.
//!
//! One driver runs for each discovered peer and walks it through the
//! session states from our side: pairing, CONNECT, KEY, SYNC, replication
//! and READY. The peer's own driver does the same against our control
//! server, so each side acts as client exactly once.

use std::sync::Arc;

use tokio::time::Instant;

use adar_pairing::{common_version, PairingRequest};
use adar_sync::{
    ChannelContext, ControlClient, DataChannel, Peer, PeerLink, SessionState, SyncConfig,
    SyncError, SyncOrchestrator, SyncReport,
};

use crate::error::{NodeError, Result};

pub(crate) struct SessionDriver {
    ctx: ChannelContext,
    data: Arc<DataChannel>,
    sync: SyncConfig,
}

impl SessionDriver {
    pub(crate) fn new(ctx: ChannelContext, data: Arc<DataChannel>, sync: SyncConfig) -> Self {
        Self { ctx, data, sync }
    }

    /// Drive `peer` to `Ready`.
    ///
    /// A peer that fails before pairing stays `Discovered` so a later
    /// rediscovery can retry; one that fails afterwards is removed.
    pub(crate) async fn run(self, peer: Arc<Peer>) {
        let name = peer.identity().name.clone();
        match self.drive(&peer).await {
            Ok(report) => {
                tracing::info!(
                    "session with {} ready ({} files fetched)",
                    name,
                    report.fetched_files.len()
                );
            }
            Err(e) if peer.state() == SessionState::Discovered => {
                tracing::info!("not pairing with {}: {}", name, e);
            }
            Err(e) => {
                tracing::warn!("session with {} failed: {}", name, e);
                self.drop_peer(&peer).await;
            }
        }
    }

    async fn drive(&self, peer: &Arc<Peer>) -> Result<SyncReport> {
        let settings = &self.ctx.settings;
        let identity = peer.identity();
        if common_version(&settings.versions, &identity.versions).is_none() {
            return Err(NodeError::IncompatibleVersion {
                peer: identity.id,
                offered: identity.versions.clone(),
            });
        }

        let control = self.open_control(peer).await?;
        self.pair(peer, &control).await?;
        peer.advance(SessionState::Paired)?;

        let version = control
            .connect_version(&settings.versions)
            .await?
            .filter(|v| settings.versions.contains(v))
            .ok_or_else(|| NodeError::IncompatibleVersion {
                peer: identity.id,
                offered: identity.versions.clone(),
            })?;
        let control = Arc::new(control);
        peer.with_session(|s| {
            s.negotiated = Some(version);
            s.control = Some(control.clone());
        });
        peer.advance(SessionState::Connected)?;

        let theirs = control.key(peer.key_agreement().public_key()).await?;
        let key = peer.key_agreement().agree(&theirs).data_key();
        peer.with_session(|s| s.data_key = Some(key));
        peer.advance(SessionState::KeyAgreed)?;

        let data_port = peer.inspect(|s| s.data_port);
        let endpoint = std::net::SocketAddr::new(control.remote().ip(), data_port);
        peer.with_session(|s| s.data_endpoint = Some(endpoint));
        peer.advance(SessionState::Syncing)?;

        self.await_remote_sync(&control).await?;

        let link = PeerLink::new(peer.clone(), self.data.clone())?;
        let report = SyncOrchestrator::new(self.ctx.storage.clone(), link, self.sync.clone())
            .sync()
            .await?;
        peer.with_session(|s| s.we_ready = true);

        self.await_remote_ready(peer, &control).await?;
        Ok(report)
    }

    /// First address that accepts a control connection.
    async fn open_control(&self, peer: &Peer) -> Result<ControlClient> {
        let settings = &self.ctx.settings;
        let (addresses, port) = peer.inspect(|s| (s.addresses.clone(), s.control_port));
        for ip in addresses {
            let remote = std::net::SocketAddr::new(ip, port);
            match ControlClient::connect(remote, settings.local_ip, settings.request_timeout).await {
                Ok(client) => return Ok(client),
                Err(e) => tracing::debug!("control connect to {} failed: {}", remote, e),
            }
        }
        Err(NodeError::Unreachable(peer.id()))
    }

    /// Trust-store hit, or PAIR followed by local confirmation.
    async fn pair(&self, peer: &Peer, control: &ControlClient) -> Result<()> {
        let pairing = &self.ctx.pairing;
        let identity = peer.identity();
        if pairing.check_pairing(identity).await? {
            tracing::debug!("{} already trusted", identity.name);
            return Ok(());
        }
        if !control.pair(pairing.versions()).await? {
            return Err(NodeError::PairingDeclined(identity.id));
        }
        if !pairing
            .confirm_pairing(&PairingRequest::for_peer(identity.clone()))
            .await?
        {
            return Err(NodeError::PairingDeclined(identity.id));
        }
        Ok(())
    }

    /// Poll SYNC until the remote reports both channels live.
    async fn await_remote_sync(&self, control: &ControlClient) -> Result<()> {
        let settings = &self.ctx.settings;
        let deadline = Instant::now() + settings.sync_timeout;
        loop {
            if control.sync(settings.sync_timeout).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SyncError::Timeout(format!("SYNC to {}", control.remote())).into());
            }
            tokio::time::sleep(settings.poll_interval).await;
        }
    }

    /// Poll READY until the remote has finished replicating from us.
    async fn await_remote_ready(&self, peer: &Peer, control: &ControlClient) -> Result<()> {
        let settings = &self.ctx.settings;
        let deadline = Instant::now() + settings.ready_timeout;
        loop {
            if control.ready(settings.ready_timeout).await? {
                peer.with_session(|s| s.peer_ready = true);
                peer.mark_ready_if_both();
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SyncError::Timeout(format!("READY to {}", control.remote())).into());
            }
            tokio::time::sleep(settings.poll_interval).await;
        }
    }

    /// Remove the peer unless rediscovery already replaced it.
    async fn drop_peer(&self, peer: &Arc<Peer>) {
        let directory = &self.ctx.directory;
        let current = directory.get(&peer.id()).await;
        if current.is_some_and(|c| Arc::ptr_eq(&c, peer)) {
            directory.remove(&peer.id()).await;
        } else if let Some(control) = peer.disconnect() {
            control.close().await;
        }
    }
}
