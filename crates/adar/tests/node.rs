//! Single-node behaviour: startup, local operations and discovery callbacks.

use std::sync::Arc;
use std::time::Duration;

use adar::store::MemoryStore;
use adar::{AcceptAll, DiscoveredPeer, Node, NodeConfig, PeerId, PeerIdentity, RemotePath, SessionState};

fn config() -> NodeConfig {
    NodeConfig {
        bind_ip: "127.0.0.1".parse().unwrap(),
        control_port: 0,
        data_port: 0,
        request_timeout: 500,
        poll_interval: 20,
        ..NodeConfig::default()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

async fn node(config: NodeConfig) -> Node {
    init_tracing();
    Node::start_with(config, Arc::new(MemoryStore::new()), Arc::new(AcceptAll))
        .await
        .unwrap()
}

fn path(s: &str) -> RemotePath {
    RemotePath::new(s).unwrap()
}

#[tokio::test]
async fn test_start_binds_ephemeral_ports() {
    let node = node(config()).await;
    assert_ne!(node.control_addr().port(), 0);
    assert_ne!(node.data_addr().port(), 0);
    assert!(node.peers().await.is_empty());
    node.shutdown().await;
}

#[tokio::test]
async fn test_port_in_use_is_fatal() {
    let first = node(config()).await;
    let taken = NodeConfig {
        control_port: first.control_addr().port(),
        ..config()
    };
    let err = Node::start_with(taken, Arc::new(MemoryStore::new()), Arc::new(AcceptAll))
        .await
        .err()
        .unwrap();
    assert!(format!("{:#}", err).contains("control port"));
}

#[tokio::test]
async fn test_local_operations_without_peers() {
    let node = node(config()).await;
    node.create(&path("/docs"), true).await.unwrap();
    node.create(&path("/docs/a.txt"), false).await.unwrap();
    node.write(&path("/docs/a.txt"), 0, b"line one\r\nline two\n").await.unwrap();

    assert_eq!(
        node.read(&path("/docs/a.txt"), 0, 100).await.unwrap(),
        b"line one\r\nline two\n"
    );
    node.rename(&path("/docs"), &path("/papers")).await.unwrap();
    assert_eq!(node.stat(&path("/papers/a.txt")).await.unwrap().metadata.length, 19);
    assert_eq!(node.list(&path("/papers")).await.unwrap().files, vec!["a.txt"]);

    node.remove(&path("/papers")).await.unwrap();
    assert!(node.stat(&path("/papers/a.txt")).await.is_err());
}

#[tokio::test]
async fn test_local_failure_is_returned() {
    let node = node(config()).await;
    assert!(node.create(&path("/missing/child"), false).await.is_err());
    assert!(node.read(&path("/nothing"), 0, 1).await.is_err());
}

#[tokio::test]
async fn test_own_advertisement_ignored() {
    let node = node(config()).await;
    node.on_peer_discovered(DiscoveredPeer {
        identity: node.identity().clone(),
        addresses: vec![node.control_addr().ip()],
        control_port: node.control_addr().port(),
        data_port: node.data_addr().port(),
    })
    .await;
    assert!(node.peers().await.is_empty());
}

#[tokio::test]
async fn test_unreachable_peer_stays_discovered_until_lost() {
    let node = node(config()).await;
    let id = PeerId::random();
    node.on_peer_discovered(DiscoveredPeer {
        identity: PeerIdentity::new(id, "ghost", vec![1]),
        addresses: vec!["127.0.0.9".parse().unwrap()],
        control_port: 1,
        data_port: 1,
    })
    .await;

    tokio::time::sleep(Duration::from_millis(700)).await;
    let info = node.peer(&id).await.unwrap();
    assert_eq!(info.state, SessionState::Discovered);
    assert_eq!(info.name, "ghost");

    node.on_peer_lost(id).await;
    assert!(node.peer(&id).await.is_none());
}

#[tokio::test]
async fn test_incompatible_peer_not_contacted() {
    let node = node(config()).await;
    let id = PeerId::random();
    node.on_peer_discovered(DiscoveredPeer {
        identity: PeerIdentity::new(id, "future", vec![9]),
        addresses: vec!["127.0.0.1".parse().unwrap()],
        control_port: node.control_addr().port(),
        data_port: node.data_addr().port(),
    })
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(node.peer(&id).await.unwrap().state, SessionState::Discovered);
}

#[tokio::test]
async fn test_start_with_sqlite_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = NodeConfig {
        database: dir.path().join("node.db"),
        ..config()
    };
    let node = Node::start(config).await.unwrap();
    node.create(&path("/kept"), false).await.unwrap();
    node.write(&path("/kept"), 0, b"persisted").await.unwrap();
    node.shutdown().await;
    drop(node);

    let reopened = adar::store::SqliteStore::open(dir.path().join("node.db")).unwrap();
    use adar::store::Storage;
    assert_eq!(reopened.read(&path("/kept"), 0, 100).await.unwrap(), b"persisted");
}

#[tokio::test]
async fn test_shutdown_closes_control_port() {
    let node = node(config()).await;
    let addr = node.control_addr();
    node.shutdown().await;

    let mut refused = false;
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(addr).await.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(refused);
}
