use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::{leaderboard, ledger};

/// Open (or create) the season database holding the leaderboard, the event
/// ledger, and the adjustments journal.
pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")
        .context("enable wal")?;
    leaderboard::init_schema(&conn)?;
    ledger::init_schema(&conn)?;
    Ok(conn)
}
