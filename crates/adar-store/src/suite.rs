//! Behaviour shared by every backend, run against each in its own tests.

use adar_core::{Fingerprint, PeerId, RemotePath};

use crate::error::StoreError;
use crate::traits::{Storage, TrustStore};

fn p(s: &str) -> RemotePath {
    RemotePath::new(s).unwrap()
}

pub async fn tree_operations<S: Storage>(store: &S) {
    assert!(store.stat(&RemotePath::root()).await.unwrap().is_dir);
    assert!(store.list(&RemotePath::root()).await.unwrap().is_empty());

    store.create(&p("/b"), true, 10).await.unwrap();
    store.create(&p("/a"), false, 11).await.unwrap();
    store.create(&p("/b/c"), false, 12).await.unwrap();
    store.create(&p("/b"), true, 99).await.unwrap();

    let root = store.list(&RemotePath::root()).await.unwrap();
    assert_eq!(root.folders, vec!["b".to_string()]);
    assert_eq!(root.files, vec!["a".to_string()]);
    assert_eq!(store.list(&p("/b")).await.unwrap().files, vec!["c".to_string()]);

    let b = store.stat(&p("/b")).await.unwrap();
    assert_eq!(b.metadata.ctime_ns, 10);

    assert!(matches!(
        store.create(&p("/b"), false, 1).await,
        Err(StoreError::AlreadyExists(_))
    ));
    assert!(matches!(
        store.create(&p("/missing/x"), false, 1).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.create(&p("/a/x"), false, 1).await,
        Err(StoreError::NotADirectory(_))
    ));
    assert!(matches!(
        store.list(&p("/a")).await,
        Err(StoreError::NotADirectory(_))
    ));
    assert!(matches!(
        store.stat(&p("/nope")).await,
        Err(StoreError::NotFound(_))
    ));

    store.set_times(&p("/a"), 1, 2, 3).await.unwrap();
    let a = store.stat(&p("/a")).await.unwrap().metadata;
    assert_eq!((a.ctime_ns, a.mtime_ns, a.atime_ns), (1, 2, 3));
}

pub async fn content_operations<S: Storage>(store: &S) {
    let f = p("/f");
    store.create(&f, false, 1).await.unwrap();
    assert_eq!(store.read(&f, 0, 10).await.unwrap(), b"");

    assert_eq!(store.write(&f, 0, b"hello", 5).await.unwrap(), 5);
    assert_eq!(store.read(&f, 0, 100).await.unwrap(), b"hello");
    assert_eq!(store.read(&f, 1, 3).await.unwrap(), b"ell");

    store.write(&f, 7, b"!", 6).await.unwrap();
    assert_eq!(store.read(&f, 0, 100).await.unwrap(), b"hello\0\0!");

    let meta = store.stat(&f).await.unwrap().metadata;
    assert_eq!(meta.length, 8);
    assert_eq!(meta.mtime_ns, 6);
    assert_eq!(meta.ctime_ns, 1);
    let seed = meta.seed.unwrap();
    assert_ne!(seed, 0);

    let slice = store.symbols(&f, 0, u64::MAX).await.unwrap();
    assert_eq!(slice.seed, seed);
    assert_eq!(slice.length, 8);
    assert_eq!(slice.symbols.len(), 16);
    assert_eq!(&slice.symbols[..8], b"hello\0\0!");
    assert_eq!(store.symbols(&f, 6, 3).await.unwrap().symbols.len(), 3);

    store.replace(&f, b"new", 7).await.unwrap();
    assert_eq!(store.read(&f, 0, 100).await.unwrap(), b"new");
    assert_eq!(store.stat(&f).await.unwrap().metadata.length, 3);
    assert_eq!(store.stat(&f).await.unwrap().metadata.seed, Some(seed));

    let g = p("/g");
    store.replace(&g, b"created", 8).await.unwrap();
    assert_eq!(store.read(&g, 0, 100).await.unwrap(), b"created");

    assert!(matches!(
        store.write(&p("/nope"), 0, b"x", 1).await,
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.read(&RemotePath::root(), 0, 1).await,
        Err(StoreError::IsADirectory(_))
    ));
}

pub async fn rename_and_remove_subtrees<S: Storage>(store: &S) {
    store.create(&p("/d"), true, 1).await.unwrap();
    store.create(&p("/d/e"), true, 1).await.unwrap();
    store.create(&p("/d/e/f"), false, 1).await.unwrap();
    store.write(&p("/d/e/f"), 0, b"deep", 2).await.unwrap();
    store.create(&p("/dx"), false, 1).await.unwrap();

    store.rename(&p("/d"), &p("/m")).await.unwrap();
    assert!(matches!(
        store.stat(&p("/d/e/f")).await,
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(store.read(&p("/m/e/f"), 0, 10).await.unwrap(), b"deep");
    assert!(store.stat(&p("/dx")).await.is_ok());

    assert!(store.rename(&p("/m"), &p("/m/e/x")).await.is_err());
    assert!(matches!(
        store.rename(&p("/m"), &p("/dx")).await,
        Err(StoreError::AlreadyExists(_))
    ));

    store.remove(&p("/m")).await.unwrap();
    assert!(store.stat(&p("/m/e")).await.is_err());
    assert!(store.stat(&p("/m/e/f")).await.is_err());
    assert_eq!(
        store.list(&RemotePath::root()).await.unwrap().files,
        vec!["dx".to_string()]
    );
    assert!(matches!(
        store.remove(&RemotePath::root()).await,
        Err(StoreError::Root)
    ));
    assert!(matches!(
        store.remove(&p("/m")).await,
        Err(StoreError::NotFound(_))
    ));
}

pub async fn trust_records<S: TrustStore>(store: &S) {
    let peer = PeerId::random();
    let first = Fingerprint([1; 32]);
    let second = Fingerprint([2; 32]);

    assert_eq!(store.fingerprint(&peer).await.unwrap(), None);
    assert!(store.record(&peer, &first).await.unwrap());
    assert!(!store.record(&peer, &second).await.unwrap());
    assert_eq!(store.fingerprint(&peer).await.unwrap(), Some(first));

    assert!(store.forget(&peer).await.unwrap());
    assert!(!store.forget(&peer).await.unwrap());
    assert!(store.record(&peer, &second).await.unwrap());
    assert_eq!(store.fingerprint(&peer).await.unwrap(), Some(second));
}
