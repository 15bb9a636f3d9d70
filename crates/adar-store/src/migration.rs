//! Database schema migrations for SQLite.
//!
//! Each migration is applied once, in order, and recorded in
//! `schema_migrations`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Safe to call repeatedly.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;
        let now = adar_core::now_nanos();

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version, now)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now],
            )?;
        }

        tx.commit()?;
        tracing::debug!("schema migrated from v{} to v{}", current, CURRENT_VERSION);
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32, now: i64) -> Result<()> {
    match version {
        1 => apply_v1(conn, now),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: entries, coded content and pairings.
fn apply_v1(conn: &Connection, now: i64) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per path; the root has a NULL parent
        CREATE TABLE entries (
            path TEXT PRIMARY KEY,
            parent TEXT,
            is_dir INTEGER NOT NULL,
            length INTEGER NOT NULL DEFAULT 0,
            ctime INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            atime INTEGER NOT NULL,
            seed INTEGER                     -- coefficient seed, files only
        );

        -- Coded symbols of each file: the source bytes then redundancy
        CREATE TABLE symbols (
            path TEXT PRIMARY KEY,
            seed INTEGER NOT NULL,
            length INTEGER NOT NULL,
            data BLOB NOT NULL
        );

        -- Trust-on-first-use pairing records
        CREATE TABLE pairings (
            peer_id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            paired_at INTEGER NOT NULL
        );

        CREATE INDEX idx_entries_parent ON entries(parent);
        "#,
    )?;

    conn.execute(
        "INSERT INTO entries (path, parent, is_dir, length, ctime, mtime, atime, seed)
         VALUES ('/', NULL, 1, 0, ?1, ?1, ?1, NULL)",
        [now],
    )?;

    Ok(())
}
