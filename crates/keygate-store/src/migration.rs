//! Database schema migrations for SQLite.
//!
//! Each migration transforms the schema from version N to N+1.

use rusqlite::Connection;

use keygate_core::now_millis;

use crate::error::{Result, StorageError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema. Idempotent.
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

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StorageError::Migration(format!(
            "unknown migration version: {version}"
        ))),
    }
}

/// Migration v1: blob table.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE blobs (
            address BLOB PRIMARY KEY,      -- 32 bytes, BLAKE3 digest of bytes
            bytes BLOB NOT NULL,
            stored_at INTEGER NOT NULL     -- local timestamp (Unix ms)
        );
        "#,
    )?;
    Ok(())
}

/// Migration v2: track reads for cache eviction.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE blobs ADD COLUMN last_read_at INTEGER;
        CREATE INDEX idx_blobs_last_read ON blobs(last_read_at);
        "#,
    )?;
    Ok(())
}
