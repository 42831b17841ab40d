//! SQLite persistence for the metadata tree.
//!
//! One connection behind a mutex. Every public operation runs as a single
//! transaction, so each is atomic on its own; there is no isolation across
//! operations (last commit wins).

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, Row, Transaction};

use crate::error::{StoreError, StoreResult};
use crate::types::{Directory, FileRecord, Part, Share};

/// Database handle for the tree store.
pub struct TreeStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for TreeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeStore")
            .field("conn", &"<locked>")
            .finish()
    }
}

const PRAGMAS: &str = r#"
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
"#;

const SCHEMA: &str = r#"
-- Tenants
CREATE TABLE IF NOT EXISTS owners (
    owner_id INTEGER PRIMARY KEY,
    created_at INTEGER NOT NULL
);

-- Directory tree (parent_id NULL only for the owner's root)
CREATE TABLE IF NOT EXISTS directories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    parent_id INTEGER,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (owner_id) REFERENCES owners(owner_id) ON DELETE CASCADE,
    FOREIGN KEY (parent_id) REFERENCES directories(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_dirs_parent ON directories(owner_id, parent_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_dirs_name ON directories(parent_id, name);

-- Files (blob_ref addresses single-blob content directly)
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    dir_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    blob_ref TEXT NOT NULL,
    unique_ref TEXT NOT NULL,
    size INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (owner_id) REFERENCES owners(owner_id) ON DELETE CASCADE,
    FOREIGN KEY (dir_id) REFERENCES directories(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_files_dir ON files(owner_id, dir_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_files_name ON files(dir_id, name);

-- Parts of multi-blob files (never exactly one row per file)
CREATE TABLE IF NOT EXISTS parts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    part_index INTEGER NOT NULL,
    blob_ref TEXT NOT NULL,
    unique_ref TEXT NOT NULL,
    size INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE,
    UNIQUE (file_id, part_index)
);

-- Share capabilities
CREATE TABLE IF NOT EXISTS shares (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    token TEXT NOT NULL UNIQUE,
    expires_at INTEGER,
    use_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
);

-- Front-end session state
CREATE TABLE IF NOT EXISTS sessions (
    owner_id INTEGER PRIMARY KEY,
    current_dir_id INTEGER,
    pending_action TEXT,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (owner_id) REFERENCES owners(owner_id) ON DELETE CASCADE,
    FOREIGN KEY (current_dir_id) REFERENCES directories(id) ON DELETE SET NULL
);

-- Transport usernames
CREATE TABLE IF NOT EXISTS profiles (
    owner_id INTEGER PRIMARY KEY,
    username TEXT NOT NULL,
    username_lower TEXT NOT NULL UNIQUE,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (owner_id) REFERENCES owners(owner_id) ON DELETE CASCADE
);

-- Salted password hashes
CREATE TABLE IF NOT EXISTS credentials (
    owner_id INTEGER PRIMARY KEY,
    password_salt TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (owner_id) REFERENCES owners(owner_id) ON DELETE CASCADE
);
"#;

pub(crate) const DIR_COLUMNS: &str = "id, owner_id, parent_id, name, created_at, updated_at";
pub(crate) const FILE_COLUMNS: &str =
    "id, owner_id, dir_id, name, blob_ref, unique_ref, size, mime_type, created_at";
pub(crate) const PART_COLUMNS: &str =
    "id, file_id, part_index, blob_ref, unique_ref, size, created_at";
pub(crate) const SHARE_COLUMNS: &str = "id, file_id, token, expires_at, use_count, created_at";

impl TreeStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(PRAGMAS)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside one transaction. Dropping the transaction on an error
    /// path rolls it back.
    pub(crate) fn transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Current time as unix seconds.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Map a UNIQUE violation onto NameConflict; pass anything else through.
pub(crate) fn conflict_on_unique(err: rusqlite::Error, name: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::name_conflict(name)
        }
        _ => StoreError::StorageFailure(err),
    }
}

// =============================================================================
// Row mapping
// =============================================================================

pub(crate) fn dir_from_row(row: &Row<'_>) -> rusqlite::Result<Directory> {
    Ok(Directory {
        id: row.get(0)?,
        owner: row.get(1)?,
        parent_id: row.get(2)?,
        name: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub(crate) fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let size: i64 = row.get(6)?;
    Ok(FileRecord {
        id: row.get(0)?,
        owner: row.get(1)?,
        dir_id: row.get(2)?,
        name: row.get(3)?,
        blob_ref: row.get(4)?,
        unique_ref: row.get(5)?,
        size: size as u64,
        mime_type: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub(crate) fn part_from_row(row: &Row<'_>) -> rusqlite::Result<Part> {
    let size: i64 = row.get(5)?;
    Ok(Part {
        id: row.get(0)?,
        file_id: row.get(1)?,
        index: row.get(2)?,
        blob_ref: row.get(3)?,
        unique_ref: row.get(4)?,
        size: size as u64,
        created_at: row.get(6)?,
    })
}

pub(crate) fn share_from_row(row: &Row<'_>) -> rusqlite::Result<Share> {
    Ok(Share {
        id: row.get(0)?,
        file_id: row.get(1)?,
        token: row.get(2)?,
        expires_at: row.get(3)?,
        use_count: row.get(4)?,
        created_at: row.get(5)?,
    })
}
