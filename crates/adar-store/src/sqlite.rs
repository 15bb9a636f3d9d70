//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite; every call runs on the blocking pool via `spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use adar_core::{Fingerprint, Metadata, PeerId, RemotePath, SymbolBlob};

use crate::content;
use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{Entry, Listing, Storage, SymbolSlice, TrustStore, DEFAULT_REDUNDANCY};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    redundancy: f64,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            redundancy: DEFAULT_REDUNDANCY,
        }
    }

    /// Set the redundancy used when encoding new content.
    pub fn with_redundancy(mut self, redundancy: f64) -> Self {
        self.redundancy = redundancy;
        self
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entry> {
    let seed: Option<i64> = row.get("seed")?;
    Ok(Entry {
        is_dir: row.get("is_dir")?,
        metadata: Metadata {
            length: row.get::<_, i64>("length")? as u64,
            ctime_ns: row.get("ctime")?,
            mtime_ns: row.get("mtime")?,
            atime_ns: row.get("atime")?,
            seed: seed.map(|s| s as u64),
        },
    })
}

fn load_entry(conn: &Connection, path: &str) -> Result<Entry> {
    conn.query_row(
        "SELECT is_dir, length, ctime, mtime, atime, seed FROM entries WHERE path = ?1",
        params![path],
        row_to_entry,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(path.to_string()))
}

fn exists(conn: &Connection, path: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM entries WHERE path = ?1)",
        params![path],
        |row| row.get(0),
    )?)
}

fn require_dir(conn: &Connection, path: &str) -> Result<()> {
    if load_entry(conn, path)?.is_dir {
        Ok(())
    } else {
        Err(StoreError::NotADirectory(path.to_string()))
    }
}

fn require_file(conn: &Connection, path: &str) -> Result<Entry> {
    let entry = load_entry(conn, path)?;
    if entry.is_dir {
        return Err(StoreError::IsADirectory(path.to_string()));
    }
    Ok(entry)
}

fn insert_entry(conn: &Connection, path: &RemotePath, is_dir: bool, now: i64) -> Result<()> {
    let parent = path.parent().ok_or(StoreError::Root)?;
    require_dir(conn, parent.as_str())?;
    conn.execute(
        "INSERT INTO entries (path, parent, is_dir, length, ctime, mtime, atime, seed)
         VALUES (?1, ?2, ?3, 0, ?4, ?4, ?4, NULL)",
        params![path.as_str(), parent.as_str(), is_dir, now],
    )?;
    Ok(())
}

fn load_blob(conn: &Connection, path: &str, entry: &Entry) -> Result<SymbolBlob> {
    let blob = conn
        .query_row(
            "SELECT seed, length, data FROM symbols WHERE path = ?1",
            params![path],
            |row| {
                Ok(SymbolBlob {
                    seed: row.get::<_, i64>(0)? as u64,
                    length: row.get::<_, i64>(1)? as u64,
                    symbols: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(blob.unwrap_or_else(|| SymbolBlob::empty(entry.metadata.seed.unwrap_or(0))))
}

fn store_blob(conn: &Connection, path: &str, blob: &SymbolBlob, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO symbols (path, seed, length, data) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(path) DO UPDATE SET
            seed = excluded.seed, length = excluded.length, data = excluded.data",
        params![path, blob.seed as i64, blob.length as i64, blob.symbols],
    )?;
    conn.execute(
        "UPDATE entries SET length = ?2, seed = ?3, mtime = ?4, atime = ?4 WHERE path = ?1",
        params![path, blob.length as i64, blob.seed as i64, now],
    )?;
    Ok(())
}

/// Paths at or below `path`, the path itself first.
fn subtree(conn: &Connection, path: &str) -> Result<Vec<String>> {
    let prefix = format!("{}/", path.trim_end_matches('/'));
    let mut stmt = conn.prepare(
        "SELECT path FROM entries
         WHERE path = ?1 OR substr(path, 1, length(?2)) = ?2
         ORDER BY length(path)",
    )?;
    let paths = stmt
        .query_map(params![path, prefix], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(paths)
}

#[async_trait]
impl Storage for SqliteStore {
    async fn list(&self, path: &RemotePath) -> Result<Listing> {
        let path = path.clone();
        self.run(move |conn| {
            require_dir(conn, path.as_str())?;
            let mut stmt = conn.prepare(
                "SELECT path, is_dir FROM entries WHERE parent = ?1 ORDER BY path",
            )?;
            let rows = stmt
                .query_map(params![path.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut listing = Listing::default();
            for (child, is_dir) in rows {
                let name = child.rsplit('/').next().unwrap_or_default().to_string();
                if is_dir {
                    listing.folders.push(name);
                } else {
                    listing.files.push(name);
                }
            }
            Ok(listing)
        })
        .await
    }

    async fn stat(&self, path: &RemotePath) -> Result<Entry> {
        let path = path.clone();
        self.run(move |conn| load_entry(conn, path.as_str())).await
    }

    async fn create(&self, path: &RemotePath, is_dir: bool, now: i64) -> Result<()> {
        let path = path.clone();
        self.run(move |conn| {
            if exists(conn, path.as_str())? {
                let existing = load_entry(conn, path.as_str())?;
                return if existing.is_dir == is_dir {
                    Ok(())
                } else {
                    Err(StoreError::AlreadyExists(path.to_string()))
                };
            }
            insert_entry(conn, &path, is_dir, now)
        })
        .await
    }

    async fn rename(&self, from: &RemotePath, to: &RemotePath) -> Result<()> {
        if from.is_root() || to.is_root() {
            return Err(StoreError::Root);
        }
        let (from, to) = (from.clone(), to.clone());
        self.run(move |conn| {
            load_entry(conn, from.as_str())?;
            if exists(conn, to.as_str())? {
                return Err(StoreError::AlreadyExists(to.to_string()));
            }
            if to.starts_with(&from) {
                return Err(StoreError::InvalidData(format!(
                    "cannot move {} below itself",
                    from
                )));
            }
            let parent = to.parent().ok_or(StoreError::Root)?;
            require_dir(conn, parent.as_str())?;

            let tx = conn.transaction()?;
            for old in subtree(&tx, from.as_str())? {
                let old_path = RemotePath::new(&old)?;
                let Some(new_path) = old_path.rebase(&from, &to) else {
                    continue;
                };
                let new_parent = new_path.parent().ok_or(StoreError::Root)?;
                tx.execute(
                    "UPDATE entries SET path = ?2, parent = ?3 WHERE path = ?1",
                    params![old, new_path.as_str(), new_parent.as_str()],
                )?;
                tx.execute(
                    "UPDATE symbols SET path = ?2 WHERE path = ?1",
                    params![old, new_path.as_str()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, path: &RemotePath) -> Result<()> {
        if path.is_root() {
            return Err(StoreError::Root);
        }
        let path = path.clone();
        self.run(move |conn| {
            load_entry(conn, path.as_str())?;
            let tx = conn.transaction()?;
            for p in subtree(&tx, path.as_str())? {
                tx.execute("DELETE FROM symbols WHERE path = ?1", params![p])?;
                tx.execute("DELETE FROM entries WHERE path = ?1", params![p])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn set_times(
        &self,
        path: &RemotePath,
        ctime: i64,
        mtime: i64,
        atime: i64,
    ) -> Result<()> {
        let path = path.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE entries SET ctime = ?2, mtime = ?3, atime = ?4 WHERE path = ?1",
                params![path.as_str(), ctime, mtime, atime],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(path.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn read(&self, path: &RemotePath, offset: u64, length: u64) -> Result<Vec<u8>> {
        let path = path.clone();
        self.run(move |conn| {
            let entry = require_file(conn, path.as_str())?;
            let blob = load_blob(conn, path.as_str(), &entry)?;
            content::range(&blob, offset, length)
        })
        .await
    }

    async fn write(&self, path: &RemotePath, offset: u64, data: &[u8], now: i64) -> Result<u64> {
        let path = path.clone();
        let data = data.to_vec();
        let redundancy = self.redundancy;
        self.run(move |conn| {
            let entry = require_file(conn, path.as_str())?;
            let existing = load_blob(conn, path.as_str(), &entry)?;
            let blob = content::spliced(&existing, offset, &data, redundancy)?;
            let tx = conn.transaction()?;
            store_blob(&tx, path.as_str(), &blob, now)?;
            tx.commit()?;
            Ok(data.len() as u64)
        })
        .await
    }

    async fn replace(&self, path: &RemotePath, data: &[u8], now: i64) -> Result<()> {
        let path = path.clone();
        let data = data.to_vec();
        let redundancy = self.redundancy;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let seed = if exists(&tx, path.as_str())? {
                require_file(&tx, path.as_str())?.metadata.seed
            } else {
                insert_entry(&tx, &path, false, now)?;
                None
            };
            let blob = content::encoded(&data, seed, redundancy)?;
            store_blob(&tx, path.as_str(), &blob, now)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn symbols(&self, path: &RemotePath, skip: u64, count: u64) -> Result<SymbolSlice> {
        let path = path.clone();
        self.run(move |conn| {
            let entry = require_file(conn, path.as_str())?;
            let blob = load_blob(conn, path.as_str(), &entry)?;
            Ok(SymbolSlice {
                seed: blob.seed,
                length: blob.length,
                symbols: blob.slice(skip, count).to_vec(),
            })
        })
        .await
    }
}

#[async_trait]
impl TrustStore for SqliteStore {
    async fn fingerprint(&self, peer: &PeerId) -> Result<Option<Fingerprint>> {
        let peer = *peer;
        self.run(move |conn| {
            let hex: Option<String> = conn
                .query_row(
                    "SELECT fingerprint FROM pairings WHERE peer_id = ?1",
                    params![peer.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            hex.map(|h| Fingerprint::from_hex(&h).map_err(StoreError::from))
                .transpose()
        })
        .await
    }

    async fn record(&self, peer: &PeerId, fingerprint: &Fingerprint) -> Result<bool> {
        let (peer, fingerprint) = (*peer, *fingerprint);
        self.run(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO pairings (peer_id, fingerprint, paired_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    peer.to_string(),
                    fingerprint.to_hex(),
                    adar_core::now_nanos()
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn forget(&self, peer: &PeerId) -> Result<bool> {
        let peer = *peer;
        self.run(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM pairings WHERE peer_id = ?1",
                params![peer.to_string()],
            )?;
            Ok(deleted == 1)
        })
        .await
    }
}
