//! Low-level storage: the SQLite index and the per-project git archives.
//!
//! All durable data lives in two places:
//! 1. The **archive** — one git repository per project (see [`git_store`]);
//!    the sole artifact that must survive.
//! 2. The **index** — `$STORAGE_ROOT/store.sqlite3`, a rebuildable mirror
//!    used for queries and full-text search.
//!
//! The index connection is configured for concurrent agents: WAL journaling,
//! a generous busy timeout, enforced foreign keys.

use crate::Result;
use libsql::{Builder, Connection};
use std::path::Path;

/// Type alias for index connections.
pub type Db = Connection;

pub mod git_store;
pub mod project_lock;

/// Open (creating if needed) the index database and apply migrations.
pub async fn open_index<P: AsRef<Path>>(db_path: P) -> Result<Db> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db = Builder::new_local(db_path).build().await?;
    let conn = db.connect()?;

    // WAL enables concurrent reads during writes; busy_timeout keeps a busy
    // fleet from failing fast on lock contention.
    let _ = conn.execute("PRAGMA journal_mode=WAL;", ()).await;
    let _ = conn.execute("PRAGMA busy_timeout=30000;", ()).await;
    let _ = conn.execute("PRAGMA synchronous=NORMAL;", ()).await;
    let _ = conn.execute("PRAGMA foreign_keys=ON;", ()).await;
    let _ = conn.execute("PRAGMA cache_size=-64000;", ()).await;

    apply_migrations(&conn).await?;

    Ok(conn)
}

/// Apply all migrations in order. `IF NOT EXISTS` guards make this
/// idempotent across restarts.
pub async fn apply_migrations(conn: &Db) -> Result<()> {
    let migrations = [include_str!(
        "../../../../../migrations/001_initial_schema.sql"
    )];
    for migration in &migrations {
        conn.execute_batch(migration).await?;
    }
    Ok(())
}
