//! Migration setup and connection configuration for the SQLite backend.
//!
//! Migrations are tracked through SQLite's `user_version` pragma by
//! `rusqlite_migration` and embedded at compile time with `include_str!`.

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::StorageError;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!("migrations/001_initial_schema.sql"))])
}

/// Opens (or creates) the database at `path` and brings it to the latest
/// schema.
pub fn open_database(path: &str) -> Result<Connection, StorageError> {
    let mut conn = Connection::open(path)?;
    configure_and_migrate(&mut conn)?;
    Ok(conn)
}

/// Opens a private in-memory database with the full schema applied.
pub fn open_in_memory() -> Result<Connection, StorageError> {
    let mut conn = Connection::open_in_memory()?;
    configure_and_migrate(&mut conn)?;
    Ok(conn)
}

fn configure_and_migrate(conn: &mut Connection) -> Result<(), StorageError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    // Referential integrity for edges is also checked before every write;
    // the pragma catches anything that bypasses the store.
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations()
        .to_latest(conn)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    Ok(())
}
