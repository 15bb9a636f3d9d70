//! Two nodes on loopback: pairing, replication and fan-out.

use std::sync::Arc;
use std::time::Duration;

use adar::{RejectAll, SessionState};
use adar_store::{MemoryStore, Storage};
use adar_testkit::fixtures::{eventually, path, populate_remote_tree, wait_for_state, NodePair};

const SETTLE: Duration = Duration::from_secs(15);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pair_replicates_reference_tree() {
    init_tracing();
    let b_store = Arc::new(MemoryStore::new());
    populate_remote_tree(b_store.as_ref()).await;
    b_store.create(&path("/10:30 notes"), true, 1).await.unwrap();
    b_store.replace(&path("/10:30 notes/x:y"), b"colon", 1).await.unwrap();
    let pair = NodePair::start(Arc::new(MemoryStore::new()), b_store).await;

    pair.introduce().await;
    assert!(pair.wait_ready(SETTLE).await);

    let a = &pair.a_store;
    assert!(a.stat(&path("/b")).await.unwrap().is_dir);
    assert_eq!(a.read(&path("/a"), 0, 100).await.unwrap(), b"alpha");
    assert_eq!(a.read(&path("/b/c"), 0, 100).await.unwrap(), b"gamma");
    assert_eq!(a.stat(&path("/a")).await.unwrap().metadata.mtime_ns, 10);
    assert_eq!(a.stat(&path("/b/c")).await.unwrap().metadata.mtime_ns, 5);
    assert!(a.stat(&path("/10:30 notes")).await.unwrap().is_dir);
    assert_eq!(a.read(&path("/10:30 notes/x:y"), 0, 100).await.unwrap(), b"colon");
    assert!(a.stat(&path("/10")).await.is_err());

    let info = pair.a.peer(&pair.b.id()).await.unwrap();
    assert_eq!(info.negotiated, Some(1));
    assert_eq!(info.name, "node-b");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_changes_reach_peer() {
    init_tracing();
    let pair = NodePair::start(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new())).await;
    pair.introduce().await;
    assert!(pair.wait_ready(SETTLE).await);

    pair.a.create(&path("/docs"), true).await.unwrap();
    pair.a.create(&path("/docs/note"), false).await.unwrap();
    pair.a.write(&path("/docs/note"), 0, b"written on a\n").await.unwrap();

    let b = pair.b_store.clone();
    assert!(
        eventually(SETTLE, || {
            let b = b.clone();
            async move {
                b.read(&path("/docs/note"), 0, 100).await.ok().as_deref()
                    == Some(&b"written on a\n"[..])
            }
        })
        .await
    );

    pair.a.rename(&path("/docs/note"), &path("/docs/renamed")).await.unwrap();
    assert!(pair.b_store.stat(&path("/docs/renamed")).await.is_ok());
    assert!(pair.b_store.stat(&path("/docs/note")).await.is_err());

    pair.a.remove(&path("/docs")).await.unwrap();
    assert!(pair.b_store.stat(&path("/docs")).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_declined_pairing_leaves_peers_discovered() {
    init_tracing();
    let b_store = Arc::new(MemoryStore::new());
    populate_remote_tree(b_store.as_ref()).await;
    let pair = NodePair::start_with_policies(
        Arc::new(MemoryStore::new()),
        b_store,
        Arc::new(adar::AcceptAll),
        Arc::new(RejectAll),
    )
    .await;
    pair.introduce().await;

    tokio::time::sleep(Duration::from_secs(1)).await;
    // B never records A, so B stays put and A can get no further than
    // its own half of the handshake.
    assert_eq!(
        pair.b.peer(&pair.a.id()).await.unwrap().state,
        SessionState::Discovered
    );
    let a_side = pair.a.peer(&pair.b.id()).await.map(|p| p.state);
    assert!(a_side.map_or(true, |state| state < SessionState::KeyAgreed));
    assert!(pair.a_store.stat(&path("/a")).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_disconnects_ready_peer() {
    init_tracing();
    let pair = NodePair::start(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new())).await;
    pair.introduce().await;
    assert!(pair.wait_ready(SETTLE).await);

    pair.a.shutdown().await;
    let b = &pair.b;
    let a_id = pair.a.id();
    assert!(eventually(SETTLE, move || async move { b.peer(&a_id).await.is_none() }).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rediscovery_after_loss_pairs_again() {
    init_tracing();
    let pair = NodePair::start(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new())).await;
    pair.introduce().await;
    assert!(pair.wait_ready(SETTLE).await);

    pair.a.on_peer_lost(pair.b.id()).await;
    assert!(pair.a.peer(&pair.b.id()).await.is_none());

    pair.b_store.replace(&path("/late"), b"after", 1).await.unwrap();
    pair.b_store.set_times(&path("/late"), 1, 3, 3).await.unwrap();
    pair.a.on_peer_discovered(adar_testkit::fixtures::advertisement(&pair.b)).await;

    // B still holds the old session; A's new driver finds its trust
    // record for B and replicates again.
    assert!(wait_for_state(&pair.a, pair.b.id(), SessionState::Ready, SETTLE).await);
    let a = pair.a_store.clone();
    assert!(
        eventually(SETTLE, || {
            let a = a.clone();
            async move { a.read(&path("/late"), 0, 10).await.ok().as_deref() == Some(&b"after"[..]) }
        })
        .await
    );
}
