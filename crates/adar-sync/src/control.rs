//! Control channel: request/response over TCP.
//!
//! The server runs one task per accepted connection. Requests on a
//! connection are answered strictly in order, one at a time. Every
//! command except PAIR and CONNECT is only served to callers whose source
//! address matches a trusted peer in the directory; anything else is
//! dropped without an answer once the identification wait expires.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Mutex;

use adar_core::{now_nanos, Metadata, RemotePath, Version};
use adar_pairing::{common_version, PairingRequest, X25519PublicKey};
use adar_store::Listing;

use crate::context::ChannelContext;
use crate::error::{Result, SyncError};
use crate::frame::FrameBuffer;
use crate::messages::{CommandCode, Request, Response, SENTINEL};
use crate::peers::{Peer, SessionState};
use crate::shutdown::ShutdownSignal;

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts control connections and serves them until shutdown.
pub struct ControlServer {
    listener: TcpListener,
    ctx: ChannelContext,
    shutdown: ShutdownSignal,
}

/// What to do after handling one frame.
enum Reply {
    Send(Response),
    /// Drop the request without answering.
    Silent,
    /// Half-close and stop serving the connection.
    Close,
}

impl ControlServer {
    pub async fn bind(addr: SocketAddr, ctx: ChannelContext, shutdown: ShutdownSignal) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            ctx,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown is triggered.
    pub async fn run(self) {
        let Self {
            listener,
            ctx,
            mut shutdown,
        } = self;

        loop {
            let accepted = tokio::select! {
                _ = shutdown.wait() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, remote)) => {
                    tracing::debug!("control connection from {}", remote);
                    tokio::spawn(serve_connection(stream, remote, ctx.clone(), shutdown.clone()));
                }
                Err(e) => tracing::warn!("control accept failed: {}", e),
            }
        }
        tracing::debug!("control server stopped");
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    remote: SocketAddr,
    ctx: ChannelContext,
    mut shutdown: ShutdownSignal,
) {
    let mut frames = FrameBuffer::new();
    loop {
        loop {
            let reply = match frames.next_frame() {
                Ok(Some(frame)) => tokio::select! {
                    _ = shutdown.wait() => return,
                    reply = handle_frame(&frame, remote, &ctx) => reply,
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("control frame from {} rejected: {}", remote, e);
                    Reply::Send(Response::ProtocolError)
                }
            };
            match reply {
                Reply::Send(response) => {
                    if let Err(e) = stream.write_all(&response.encode()).await {
                        tracing::debug!("control write to {} failed: {}", remote, e);
                        return;
                    }
                }
                Reply::Silent => {}
                Reply::Close => {
                    let _ = stream.shutdown().await;
                    return;
                }
            }
        }

        let read = tokio::select! {
            _ = shutdown.wait() => return,
            read = stream.read_buf(frames.buffer_mut()) => read,
        };
        match read {
            Ok(0) => {
                if frames.has_partial() {
                    tracing::warn!("unterminated control frame from {}", remote);
                    let _ = stream.write_all(&[SENTINEL]).await;
                }
                let _ = stream.shutdown().await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("control read from {} failed: {}", remote, e);
                return;
            }
        }
    }
}

async fn handle_frame(frame: &[u8], remote: SocketAddr, ctx: &ChannelContext) -> Reply {
    let request = match Request::decode(frame) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("malformed control request from {}: {}", remote, e);
            return Reply::Send(Response::ProtocolError);
        }
    };
    let code = request.code();

    match dispatch(request, remote, ctx).await {
        Ok(reply) => reply,
        Err(SyncError::Unidentified(ip)) => {
            tracing::warn!("dropping {:?} from unidentified {}", code, ip);
            Reply::Silent
        }
        Err(SyncError::StoreError(e)) => {
            tracing::warn!("{:?} from {} failed: {}", code, remote, e);
            Reply::Send(Response::Nak)
        }
        Err(e) => {
            tracing::warn!("{:?} from {} failed: {}", code, remote, e);
            Reply::Send(Response::ProtocolError)
        }
    }
}

async fn dispatch(request: Request, remote: SocketAddr, ctx: &ChannelContext) -> Result<Reply> {
    let ip = remote.ip();
    let settings = &ctx.settings;

    let response = match request {
        Request::Pair { versions } => {
            let identity = ctx
                .directory
                .find_by_addr(ip)
                .await
                .map(|peer| peer.identity().clone());
            let request = PairingRequest {
                addr: Some(remote),
                identity,
                versions,
            };
            Response::Flag(ctx.pairing.confirm_pairing(&request).await?)
        }
        Request::Connect { versions } => {
            let peer = identify(ctx, ip).await?;
            let negotiated = common_version(&settings.versions, &versions);
            if negotiated.is_some() {
                peer.with_session(|s| s.negotiated = s.negotiated.or(negotiated));
            }
            Response::Version(negotiated)
        }
        Request::Key { public } => {
            let peer = trusted(ctx, ip).await?;
            let agreement = peer.key_agreement();
            let key = agreement.agree(&public).data_key();
            peer.with_session(|s| s.data_key = Some(key));
            tracing::debug!("data key agreed with {} on request", peer.id());
            Response::Key(agreement.public_key())
        }
        Request::Sync => {
            let peer = trusted(ctx, ip).await?;
            let live = peer
                .wait_until(settings.sync_timeout, |_, state| {
                    state >= SessionState::Syncing && state != SessionState::Disconnected
                })
                .await;
            Response::Flag(live)
        }
        Request::Ready => {
            let peer = trusted(ctx, ip).await?;
            peer.with_session(|s| s.peer_ready = true);
            let ready = peer
                .wait_until(settings.ready_timeout, |s, _| s.we_ready)
                .await;
            peer.mark_ready_if_both();
            Response::Flag(ready)
        }
        Request::Disconnect => {
            let peer = trusted(ctx, ip).await?;
            tracing::info!("{} disconnected", peer.identity().name);
            ctx.directory.remove(&peer.id()).await;
            return Ok(Reply::Close);
        }
        Request::Create { path, is_dir } => {
            trusted(ctx, ip).await?;
            ctx.storage.create(&path, is_dir, now_nanos()).await?;
            Response::Ack
        }
        Request::Rename { from, to } => {
            trusted(ctx, ip).await?;
            ctx.storage.rename(&from, &to).await?;
            Response::Ack
        }
        Request::Remove { path } => {
            trusted(ctx, ip).await?;
            ctx.storage.remove(&path).await?;
            Response::Ack
        }
        Request::List { path } => {
            trusted(ctx, ip).await?;
            Response::Listing(ctx.storage.list(&path).await?)
        }
        Request::Stats { path } => {
            trusted(ctx, ip).await?;
            Response::Stats(ctx.storage.stat(&path).await?.metadata)
        }
    };
    Ok(Reply::Send(response))
}

/// The directory entry for `ip`, waiting for discovery to catch up.
async fn identify(ctx: &ChannelContext, ip: IpAddr) -> Result<Arc<Peer>> {
    ctx.directory
        .wait_for_addr(ip, ctx.settings.identify_timeout)
        .await
        .ok_or(SyncError::Unidentified(ip))
}

/// Like [`identify`], additionally requiring the peer to be paired.
async fn trusted(ctx: &ChannelContext, ip: IpAddr) -> Result<Arc<Peer>> {
    let peer = identify(ctx, ip).await?;
    let paired = peer
        .wait_until(ctx.settings.identify_timeout, |_, state| state.is_trusted())
        .await;
    if paired {
        Ok(peer)
    } else {
        Err(SyncError::Unidentified(ip))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

struct Connection {
    stream: TcpStream,
    frames: FrameBuffer,
    /// Set when a round-trip was abandoned midway; the stream is out of step.
    broken: bool,
}

/// One control connection to a peer. Requests are serialized.
pub struct ControlClient {
    remote: SocketAddr,
    timeout: Duration,
    conn: Mutex<Connection>,
}

impl ControlClient {
    /// Connect to `remote`, sourcing from `local_ip` when one is given.
    pub async fn connect(
        remote: SocketAddr,
        local_ip: Option<IpAddr>,
        timeout: Duration,
    ) -> Result<Self> {
        let socket = if remote.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(ip) = local_ip.filter(|ip| !ip.is_unspecified() && ip.is_ipv4() == remote.is_ipv4()) {
            socket.bind(SocketAddr::new(ip, 0))?;
        }

        let stream = tokio::time::timeout(timeout, socket.connect(remote))
            .await
            .map_err(|_| SyncError::Timeout(format!("connecting to {}", remote)))??;
        stream.set_nodelay(true)?;

        Ok(Self {
            remote,
            timeout,
            conn: Mutex::new(Connection {
                stream,
                frames: FrameBuffer::new(),
                broken: false,
            }),
        })
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    async fn request(&self, request: &Request) -> Result<Response> {
        self.request_within(request, self.timeout).await
    }

    async fn request_within(&self, request: &Request, timeout: Duration) -> Result<Response> {
        let code = request.code();
        let mut conn = self.conn.lock().await;
        if conn.broken {
            return Err(SyncError::PeerNotConnected(self.remote.to_string()));
        }

        let response = match tokio::time::timeout(timeout, conn.round_trip(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                conn.broken = true;
                return Err(e);
            }
            Err(_) => {
                conn.broken = true;
                return Err(SyncError::Timeout(format!("{:?} to {}", code, self.remote)));
            }
        };

        match response {
            Response::ProtocolError => Err(SyncError::ProtocolError),
            Response::Nak => Err(SyncError::Nak),
            response => Ok(response),
        }
    }

    pub async fn pair(&self, versions: &[Version]) -> Result<bool> {
        match self.request(&Request::Pair { versions: versions.to_vec() }).await? {
            Response::Flag(accepted) => Ok(accepted),
            other => Err(unexpected(CommandCode::Pair, other)),
        }
    }

    /// The version the server picked, `None` if it shares none with us.
    pub async fn connect_version(&self, versions: &[Version]) -> Result<Option<Version>> {
        match self.request(&Request::Connect { versions: versions.to_vec() }).await? {
            Response::Version(v) => Ok(v),
            other => Err(unexpected(CommandCode::Connect, other)),
        }
    }

    pub async fn key(&self, public: X25519PublicKey) -> Result<X25519PublicKey> {
        match self.request(&Request::Key { public }).await? {
            Response::Key(theirs) => Ok(theirs),
            other => Err(unexpected(CommandCode::Key, other)),
        }
    }

    /// `wait` is how long the server may hold the answer back.
    pub async fn sync(&self, wait: Duration) -> Result<bool> {
        match self.request_within(&Request::Sync, self.timeout + wait).await? {
            Response::Flag(ready) => Ok(ready),
            other => Err(unexpected(CommandCode::Sync, other)),
        }
    }

    /// `wait` is how long the server may hold the answer back.
    pub async fn ready(&self, wait: Duration) -> Result<bool> {
        match self.request_within(&Request::Ready, self.timeout + wait).await? {
            Response::Flag(ready) => Ok(ready),
            other => Err(unexpected(CommandCode::Ready, other)),
        }
    }

    pub async fn create(&self, path: &RemotePath, is_dir: bool) -> Result<()> {
        let request = Request::Create {
            path: path.clone(),
            is_dir,
        };
        self.ack(request).await
    }

    pub async fn rename(&self, from: &RemotePath, to: &RemotePath) -> Result<()> {
        let request = Request::Rename {
            from: from.clone(),
            to: to.clone(),
        };
        self.ack(request).await
    }

    pub async fn remove(&self, path: &RemotePath) -> Result<()> {
        self.ack(Request::Remove { path: path.clone() }).await
    }

    pub async fn list(&self, path: &RemotePath) -> Result<Listing> {
        match self.request(&Request::List { path: path.clone() }).await? {
            Response::Listing(listing) => Ok(listing),
            other => Err(unexpected(CommandCode::List, other)),
        }
    }

    pub async fn stats(&self, path: &RemotePath) -> Result<Metadata> {
        match self.request(&Request::Stats { path: path.clone() }).await? {
            Response::Stats(metadata) => Ok(metadata),
            other => Err(unexpected(CommandCode::Stats, other)),
        }
    }

    async fn ack(&self, request: Request) -> Result<()> {
        let code = request.code();
        match self.request(&request).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(code, other)),
        }
    }

    /// Send DISCONNECT and half-close. No answer is expected.
    pub async fn disconnect(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        conn.broken = true;
        let send = async {
            conn.stream.write_all(&Request::Disconnect.encode()).await?;
            conn.stream.shutdown().await
        };
        tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| SyncError::Timeout(format!("DISCONNECT to {}", self.remote)))??;
        Ok(())
    }

    /// Half-close without a DISCONNECT.
    pub async fn close(&self) {
        let mut conn = self.conn.lock().await;
        conn.broken = true;
        let _ = conn.stream.shutdown().await;
    }
}

impl Connection {
    async fn round_trip(&mut self, request: &Request) -> Result<Response> {
        self.stream.write_all(&request.encode()).await?;
        loop {
            if let Some(frame) = self.frames.next_frame()? {
                return Response::decode(request.code(), &frame);
            }
            if self.stream.read_buf(self.frames.buffer_mut()).await? == 0 {
                return Err(SyncError::PeerNotConnected("control stream closed".into()));
            }
        }
    }
}

impl std::fmt::Debug for ControlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlClient").field("remote", &self.remote).finish()
    }
}

fn unexpected(code: CommandCode, response: Response) -> SyncError {
    SyncError::InvalidMessage(format!("unexpected answer to {:?}: {:?}", code, response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ChannelSettings;
    use crate::peers::{DiscoveredPeer, PeerDirectory};
    use crate::shutdown::Shutdown;
    use adar_core::PeerId;
    use adar_pairing::{AcceptAll, Pairing, PeerIdentity, RejectAll};
    use adar_store::{MemoryStore, Storage};

    const WAIT: Duration = Duration::from_millis(100);

    struct Harness {
        addr: SocketAddr,
        ctx: ChannelContext,
        shutdown: Shutdown,
    }

    async fn harness(accept: bool) -> Harness {
        harness_with(
            accept,
            ChannelSettings {
                identify_timeout: Duration::from_millis(100),
                sync_timeout: Duration::from_millis(100),
                ready_timeout: Duration::from_millis(100),
                request_timeout: Duration::from_secs(2),
                ..ChannelSettings::default()
            },
        )
        .await
    }

    async fn harness_with(accept: bool, settings: ChannelSettings) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let policy: Arc<dyn adar_pairing::PairingPolicy> = if accept {
            Arc::new(AcceptAll)
        } else {
            Arc::new(RejectAll)
        };
        let pairing = Arc::new(Pairing::new(store.clone(), policy, vec![1]));
        let ctx = ChannelContext::new(
            Arc::new(PeerDirectory::new(PeerId::random())),
            store,
            pairing,
            settings,
        );
        let shutdown = Shutdown::new();
        let server = ControlServer::bind("127.0.0.1:0".parse().unwrap(), ctx.clone(), shutdown.signal())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        Harness { addr, ctx, shutdown }
    }

    async fn add_loopback_peer(ctx: &ChannelContext, state: SessionState) -> Arc<Peer> {
        let (peer, _) = ctx
            .directory
            .upsert(DiscoveredPeer {
                identity: PeerIdentity::new(PeerId::random(), "loopback", vec![1]),
                addresses: vec!["127.0.0.1".parse().unwrap()],
                control_port: 0,
                data_port: 0,
            })
            .await
            .unwrap();
        let mut current = peer.state();
        while current < state {
            let next = current.next().unwrap();
            peer.advance(next).unwrap();
            current = next;
        }
        peer
    }

    async fn client(addr: SocketAddr) -> ControlClient {
        ControlClient::connect(addr, None, Duration::from_secs(2)).await.unwrap()
    }

    async fn raw_exchange(addr: SocketAddr, bytes: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(bytes).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut out))
            .await
            .unwrap()
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_pair_answers_by_policy_and_versions() {
        let accepting = harness(true).await;
        let c = client(accepting.addr).await;
        assert!(c.pair(&[1]).await.unwrap());
        assert!(!c.pair(&[7]).await.unwrap());

        let rejecting = harness(false).await;
        assert!(!client(rejecting.addr).await.pair(&[1]).await.unwrap());
    }

    #[tokio::test]
    async fn test_tree_commands_delegate_to_storage() {
        let h = harness(true).await;
        add_loopback_peer(&h.ctx, SessionState::Paired).await;
        let c = client(h.addr).await;

        let dir = RemotePath::new("/docs").unwrap();
        let file = RemotePath::new("/docs/a.txt").unwrap();
        c.create(&dir, true).await.unwrap();
        c.create(&file, false).await.unwrap();
        h.ctx.storage.replace(&file, b"hello", 42).await.unwrap();

        let listing = c.list(&dir).await.unwrap();
        assert_eq!(listing.files, vec!["a.txt".to_string()]);
        assert!(listing.folders.is_empty());
        assert_eq!(c.stats(&file).await.unwrap().length, 5);

        let moved = RemotePath::new("/docs/b.txt").unwrap();
        c.rename(&file, &moved).await.unwrap();
        c.remove(&moved).await.unwrap();
        assert!(h.ctx.storage.stat(&moved).await.is_err());
    }

    #[tokio::test]
    async fn test_storage_failure_answers_nak() {
        let h = harness(true).await;
        add_loopback_peer(&h.ctx, SessionState::Paired).await;
        let c = client(h.addr).await;
        let missing = RemotePath::new("/nope").unwrap();
        assert!(matches!(c.stats(&missing).await, Err(SyncError::Nak)));
        // The connection survives a failed command.
        assert!(c.list(&RemotePath::root()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unterminated_message_answered_with_sentinel() {
        let h = harness(true).await;
        let peer = add_loopback_peer(&h.ctx, SessionState::Paired).await;
        assert_eq!(raw_exchange(h.addr, b"9:/").await, vec![SENTINEL]);
        assert_eq!(peer.state(), SessionState::Paired);
    }

    #[tokio::test]
    async fn test_malformed_request_keeps_connection_open() {
        let h = harness(true).await;
        add_loopback_peer(&h.ctx, SessionState::Paired).await;
        assert_eq!(raw_exchange(h.addr, b"99:x\n9:/\n").await, b"\n0\n");
    }

    #[tokio::test]
    async fn test_unidentified_caller_gets_no_answer() {
        let h = harness(true).await;
        assert!(raw_exchange(h.addr, b"9:/\n").await.is_empty());
    }

    #[tokio::test]
    async fn test_untrusted_caller_gets_no_answer() {
        let h = harness(true).await;
        add_loopback_peer(&h.ctx, SessionState::Discovered).await;
        assert!(raw_exchange(h.addr, b"9:/\n").await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_negotiates_highest_common_version() {
        let h = harness(true).await;
        let peer = add_loopback_peer(&h.ctx, SessionState::Paired).await;
        let c = client(h.addr).await;
        assert_eq!(c.connect_version(&[1, 2]).await.unwrap(), Some(1));
        assert_eq!(peer.inspect(|s| s.negotiated), Some(1));
        assert_eq!(c.connect_version(&[3]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_key_exchange_agrees_on_data_key() {
        let h = harness(true).await;
        let peer = add_loopback_peer(&h.ctx, SessionState::Connected).await;
        let c = client(h.addr).await;

        let ours = adar_pairing::KeyAgreement::generate();
        let theirs = c.key(ours.public_key()).await.unwrap();
        let local = ours.agree(&theirs).data_key();
        let remote = peer.data_key().unwrap();

        let sealed = local.seal(b"agreed", b"/p").unwrap();
        assert_eq!(remote.open(&sealed, b"/p").unwrap(), b"agreed");
    }

    #[tokio::test]
    async fn test_sync_and_ready_report_timeouts() {
        let h = harness(true).await;
        let peer = add_loopback_peer(&h.ctx, SessionState::KeyAgreed).await;
        let c = client(h.addr).await;
        assert!(!c.sync(WAIT).await.unwrap());

        peer.advance(SessionState::Syncing).unwrap();
        assert!(c.sync(WAIT).await.unwrap());

        assert!(!c.ready(WAIT).await.unwrap());
        assert!(peer.inspect(|s| s.peer_ready));
        peer.with_session(|s| s.we_ready = true);
        assert!(c.ready(WAIT).await.unwrap());
        assert_eq!(peer.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_held_ready() {
        let h = harness_with(
            true,
            ChannelSettings {
                identify_timeout: Duration::from_millis(100),
                ready_timeout: Duration::from_secs(60),
                ..ChannelSettings::default()
            },
        )
        .await;
        let peer = add_loopback_peer(&h.ctx, SessionState::Syncing).await;

        let mut stream = TcpStream::connect(h.addr).await.unwrap();
        stream.write_all(b"5:\n").await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !peer.inspect(|s| s.peer_ready) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(peer.inspect(|s| s.peer_ready));

        h.shutdown.trigger();
        let mut out = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), stream.read_to_end(&mut out))
            .await
            .expect("connection outlived shutdown")
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_removes_peer() {
        let h = harness(true).await;
        let peer = add_loopback_peer(&h.ctx, SessionState::Ready).await;
        let c = client(h.addr).await;
        c.disconnect().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while peer.state() != SessionState::Disconnected && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(peer.state(), SessionState::Disconnected);
        assert!(h.ctx.directory.get(&peer.id()).await.is_none());
    }
}
