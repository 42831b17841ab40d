//! Per-owner front-end session state.
//!
//! Sessions are last-writer-wins. A session whose current directory was
//! deleted points nowhere (the foreign key nulls it) and reads fall back to
//! the owner's root.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::db::{TreeStore, now};
use crate::error::{StoreError, StoreResult};
use crate::tree::{query_directory, root_id};
use crate::types::{DirId, Directory, OwnerId, PendingAction, Session};

fn query_session(conn: &Connection, owner: OwnerId) -> StoreResult<Option<Session>> {
    let row = conn
        .query_row(
            "SELECT owner_id, current_dir_id, pending_action, updated_at
             FROM sessions WHERE owner_id = ?1",
            params![owner],
            |row| {
                Ok((
                    row.get::<_, OwnerId>(0)?,
                    row.get::<_, Option<DirId>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((owner, current_dir, pending, updated_at)) = row else {
        return Ok(None);
    };
    let pending = match pending {
        Some(json) => Some(
            serde_json::from_str::<PendingAction>(&json)
                .map_err(|e| StoreError::corrupt(format!("pending action for owner {owner}: {e}")))?,
        ),
        None => None,
    };
    Ok(Some(Session {
        owner,
        current_dir,
        pending,
        updated_at,
    }))
}

fn upsert_session(conn: &Connection, owner: OwnerId) -> StoreResult<Session> {
    if let Some(session) = query_session(conn, owner)? {
        return Ok(session);
    }
    let root = root_id(conn, owner)?;
    let ts = now();
    conn.execute(
        "INSERT INTO sessions (owner_id, current_dir_id, pending_action, updated_at)
         VALUES (?1, ?2, NULL, ?3)",
        params![owner, root, ts],
    )?;
    Ok(Session {
        owner,
        current_dir: Some(root),
        pending: None,
        updated_at: ts,
    })
}

impl TreeStore {
    /// Create the owner's session pointing at their root if absent.
    pub fn ensure_session(&self, owner: OwnerId) -> StoreResult<Session> {
        self.transaction(|tx| upsert_session(tx, owner))
    }

    pub fn get_session(&self, owner: OwnerId) -> StoreResult<Session> {
        self.transaction(|tx| {
            query_session(tx, owner)?
                .ok_or_else(|| StoreError::not_found(format!("session of owner {owner}")))
        })
    }

    /// The session's current directory, repairing a dangling pointer to root.
    pub fn current_directory(&self, owner: OwnerId) -> StoreResult<Directory> {
        self.transaction(|tx| {
            let session = upsert_session(tx, owner)?;
            if let Some(dir) = session.current_dir {
                match query_directory(tx, owner, dir) {
                    Ok(found) => return Ok(found),
                    Err(StoreError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            let root = root_id(tx, owner)?;
            tx.execute(
                "UPDATE sessions SET current_dir_id = ?1, updated_at = ?2 WHERE owner_id = ?3",
                params![root, now(), owner],
            )?;
            debug!(%owner, %root, "session fell back to root");
            query_directory(tx, owner, root)
        })
    }

    pub fn set_current_directory(&self, owner: OwnerId, dir: DirId) -> StoreResult<()> {
        self.transaction(|tx| {
            query_directory(tx, owner, dir)?;
            upsert_session(tx, owner)?;
            tx.execute(
                "UPDATE sessions SET current_dir_id = ?1, updated_at = ?2 WHERE owner_id = ?3",
                params![dir, now(), owner],
            )?;
            Ok(())
        })
    }

    /// Record what the front-end expects next from this owner.
    pub fn set_pending_action(&self, owner: OwnerId, action: &PendingAction) -> StoreResult<()> {
        let json = serde_json::to_string(action)
            .map_err(|e| StoreError::corrupt(format!("encoding pending action: {e}")))?;
        self.transaction(|tx| {
            upsert_session(tx, owner)?;
            tx.execute(
                "UPDATE sessions SET pending_action = ?1, updated_at = ?2 WHERE owner_id = ?3",
                params![json, now(), owner],
            )?;
            debug!(%owner, ?action, "set pending action");
            Ok(())
        })
    }

    pub fn clear_pending_action(&self, owner: OwnerId) -> StoreResult<()> {
        self.transaction(|tx| {
            upsert_session(tx, owner)?;
            tx.execute(
                "UPDATE sessions SET pending_action = NULL, updated_at = ?1 WHERE owner_id = ?2",
                params![now(), owner],
            )?;
            Ok(())
        })
    }
}
