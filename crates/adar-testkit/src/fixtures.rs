//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: throwaway stores, the
//! reference remote tree, and pairs of nodes on loopback addresses.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::Instant;

use adar::{AcceptAll, DiscoveredPeer, Node, NodeConfig, PairingPolicy, SessionState};
use adar_core::{PeerId, RemotePath};
use adar_store::{MemoryStore, SqliteStore, Storage};

/// A SQLite store in a temporary directory, deleted on drop.
pub struct TempStore {
    pub dir: TempDir,
    pub store: Arc<SqliteStore>,
}

impl TempStore {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = SqliteStore::open(dir.path().join("adar.db")).expect("open sqlite store");
        Self {
            dir,
            store: Arc::new(store),
        }
    }
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn path(s: &str) -> RemotePath {
    RemotePath::new(s).expect("valid path")
}

/// Fill `store` with the reference tree:
///
/// ```text
/// /a      "alpha"   mtime 10
/// /b/
/// /b/c    "gamma"   mtime 5
/// ```
pub async fn populate_remote_tree(store: &dyn Storage) {
    store.replace(&path("/a"), b"alpha", 1).await.expect("write /a");
    store.set_times(&path("/a"), 1, 10, 10).await.expect("times /a");
    store.create(&path("/b"), true, 1).await.expect("create /b");
    store.replace(&path("/b/c"), b"gamma", 1).await.expect("write /b/c");
    store.set_times(&path("/b/c"), 1, 5, 5).await.expect("times /b/c");
}

/// Node settings for loopback tests: ephemeral ports, short timeouts.
pub fn loopback_config(ip: &str, name: &str) -> NodeConfig {
    NodeConfig {
        identity: PeerId::random(),
        name: name.to_string(),
        bind_ip: ip.parse().expect("loopback ip"),
        control_port: 0,
        data_port: 0,
        identify_timeout: 2_000,
        sync_timeout: 5_000,
        ready_timeout: 10_000,
        request_timeout: 5_000,
        read_timeout: 1_000,
        poll_interval: 20,
        ..NodeConfig::default()
    }
}

pub async fn loopback_node(
    config: NodeConfig,
    store: Arc<MemoryStore>,
    policy: Arc<dyn PairingPolicy>,
) -> Node {
    Node::start_with(config, store, policy)
        .await
        .expect("start loopback node")
}

/// What discovery would report about `node`.
pub fn advertisement(node: &Node) -> DiscoveredPeer {
    let ip: IpAddr = node.config().bind_ip;
    DiscoveredPeer {
        identity: node.identity().clone(),
        addresses: vec![ip],
        control_port: node.control_addr().port(),
        data_port: node.data_addr().port(),
    }
}

/// Two nodes on 127.0.0.1 and 127.0.0.2.
pub struct NodePair {
    pub a: Node,
    pub b: Node,
    pub a_store: Arc<MemoryStore>,
    pub b_store: Arc<MemoryStore>,
}

impl NodePair {
    pub async fn start(a_store: Arc<MemoryStore>, b_store: Arc<MemoryStore>) -> Self {
        Self::start_with_policies(a_store, b_store, Arc::new(AcceptAll), Arc::new(AcceptAll)).await
    }

    pub async fn start_with_policies(
        a_store: Arc<MemoryStore>,
        b_store: Arc<MemoryStore>,
        a_policy: Arc<dyn PairingPolicy>,
        b_policy: Arc<dyn PairingPolicy>,
    ) -> Self {
        let a = loopback_node(loopback_config("127.0.0.1", "node-a"), a_store.clone(), a_policy).await;
        let b = loopback_node(loopback_config("127.0.0.2", "node-b"), b_store.clone(), b_policy).await;
        Self {
            a,
            b,
            a_store,
            b_store,
        }
    }

    /// Let each node discover the other.
    pub async fn introduce(&self) {
        self.a.on_peer_discovered(advertisement(&self.b)).await;
        self.b.on_peer_discovered(advertisement(&self.a)).await;
    }

    /// Both sessions reached `Ready` within `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        wait_for_state(&self.a, self.b.id(), SessionState::Ready, timeout).await
            && wait_for_state(
                &self.b,
                self.a.id(),
                SessionState::Ready,
                deadline.saturating_duration_since(Instant::now()),
            )
            .await
    }
}

/// Poll `node` until its session with `peer` is in `state`.
pub async fn wait_for_state(node: &Node, peer: PeerId, state: SessionState, timeout: Duration) -> bool {
    eventually(timeout, move || async move {
        node.peer(&peer).await.map(|p| p.state) == Some(state)
    })
    .await
}

/// Poll `check` every 20ms until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
