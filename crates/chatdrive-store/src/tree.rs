//! Directory and file namespace operations.
//!
//! Directory and file names share one namespace per parent. Every check and
//! the mutation it guards run inside the same transaction.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::db::{
    DIR_COLUMNS, FILE_COLUMNS, PART_COLUMNS, TreeStore, conflict_on_unique, dir_from_row,
    file_from_row, now, part_from_row,
};
use crate::error::{StoreError, StoreResult};
use crate::types::{
    BlobContent, DEFAULT_MIME_TYPE, DirId, Directory, FileId, FileRecord, NewPart, Node, NodeId,
    OwnerId, Part,
};

/// Stored name of every root directory.
pub const ROOT_NAME: &str = "/";

/// Entity allowed to keep its own name during an availability check.
#[derive(Debug, Clone, Copy)]
enum Exclude {
    Nothing,
    Dir(DirId),
    File(FileId),
}

/// Reject names that can't be addressed as a single path segment.
pub fn validate_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(StoreError::invalid(format!("invalid name: {name:?}")));
    }
    Ok(())
}

// =============================================================================
// Lookups shared across modules (take a connection so they compose in a tx)
// =============================================================================

pub(crate) fn root_id(conn: &Connection, owner: OwnerId) -> StoreResult<DirId> {
    conn.query_row(
        "SELECT id FROM directories WHERE owner_id = ?1 AND parent_id IS NULL LIMIT 1",
        params![owner],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found(format!("root directory of owner {owner}")))
}

pub(crate) fn query_directory(
    conn: &Connection,
    owner: OwnerId,
    id: DirId,
) -> StoreResult<Directory> {
    conn.query_row(
        &format!("SELECT {DIR_COLUMNS} FROM directories WHERE id = ?1 AND owner_id = ?2"),
        params![id, owner],
        dir_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found(format!("directory {id}")))
}

fn query_directory_by_name(
    conn: &Connection,
    owner: OwnerId,
    parent: DirId,
    name: &str,
) -> StoreResult<Option<Directory>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {DIR_COLUMNS} FROM directories
                 WHERE owner_id = ?1 AND parent_id = ?2 AND name = ?3"
            ),
            params![owner, parent, name],
            dir_from_row,
        )
        .optional()?)
}

pub(crate) fn query_file(conn: &Connection, owner: OwnerId, id: FileId) -> StoreResult<FileRecord> {
    conn.query_row(
        &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1 AND owner_id = ?2"),
        params![id, owner],
        file_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found(format!("file {id}")))
}

fn query_file_by_name(
    conn: &Connection,
    owner: OwnerId,
    dir: DirId,
    name: &str,
) -> StoreResult<Option<FileRecord>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE owner_id = ?1 AND dir_id = ?2 AND name = ?3"
            ),
            params![owner, dir, name],
            file_from_row,
        )
        .optional()?)
}

pub(crate) fn query_parts(conn: &Connection, file: FileId) -> StoreResult<Vec<Part>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PART_COLUMNS} FROM parts WHERE file_id = ?1 ORDER BY part_index"
    ))?;
    let rows = stmt.query_map(params![file], part_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn ensure_name_available(
    conn: &Connection,
    owner: OwnerId,
    parent: DirId,
    name: &str,
    exclude: Exclude,
) -> StoreResult<()> {
    if let Some(dir) = query_directory_by_name(conn, owner, parent, name)? {
        if !matches!(exclude, Exclude::Dir(id) if id == dir.id) {
            return Err(StoreError::name_conflict(name));
        }
    }
    if let Some(file) = query_file_by_name(conn, owner, parent, name)? {
        if !matches!(exclude, Exclude::File(id) if id == file.id) {
            return Err(StoreError::name_conflict(name));
        }
    }
    Ok(())
}

/// Whether a row of `node`'s own kind, other than `node`, holds `name` in
/// `parent`. These are the clashes the unique indexes reject mid-transaction.
fn holds_name(
    conn: &Connection,
    owner: OwnerId,
    node: NodeId,
    parent: DirId,
    name: &str,
) -> StoreResult<bool> {
    Ok(match node {
        NodeId::Directory(id) => {
            query_directory_by_name(conn, owner, parent, name)?.is_some_and(|d| d.id != id)
        }
        NodeId::File(id) => {
            query_file_by_name(conn, owner, parent, name)?.is_some_and(|f| f.id != id)
        }
    })
}

/// Rewrite the parent and/or name of one row. `None` keeps the column.
fn place(
    conn: &Connection,
    owner: OwnerId,
    node: NodeId,
    parent: Option<DirId>,
    name: Option<&str>,
) -> StoreResult<()> {
    let n = match node {
        NodeId::Directory(id) => conn.execute(
            "UPDATE directories
             SET parent_id = COALESCE(?1, parent_id), name = COALESCE(?2, name), updated_at = ?3
             WHERE id = ?4 AND owner_id = ?5",
            params![parent, name, now(), id, owner],
        ),
        NodeId::File(id) => conn.execute(
            "UPDATE files SET dir_id = COALESCE(?1, dir_id), name = COALESCE(?2, name)
             WHERE id = ?3 AND owner_id = ?4",
            params![parent, name, id, owner],
        ),
    }
    .map_err(|e| conflict_on_unique(e, name.unwrap_or_default()))?;
    if n == 0 {
        return Err(StoreError::not_found(format!("{node:?}")));
    }
    Ok(())
}

/// Every directory id in the subtree rooted at `dir`, `dir` included.
fn subtree_ids(conn: &Connection, owner: OwnerId, dir: DirId) -> StoreResult<Vec<DirId>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE subtree(id) AS (
            SELECT id FROM directories WHERE id = ?1 AND owner_id = ?2
            UNION ALL
            SELECT d.id FROM directories d JOIN subtree s ON d.parent_id = s.id
         ) SELECT id FROM subtree",
    )?;
    let rows = stmt.query_map(params![dir, owner], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Part sets must be contiguous from 0 in index order.
fn check_parts(parts: &[NewPart]) -> StoreResult<()> {
    for (expected, part) in parts.iter().enumerate() {
        if part.index as usize != expected {
            return Err(StoreError::invalid(format!(
                "part index {} out of order (expected {expected})",
                part.index
            )));
        }
    }
    Ok(())
}

pub(crate) fn insert_file(
    conn: &Connection,
    owner: OwnerId,
    dir: DirId,
    name: &str,
    content: &BlobContent,
) -> StoreResult<FileId> {
    let mime = if content.mime_type.is_empty() {
        DEFAULT_MIME_TYPE
    } else {
        content.mime_type.as_str()
    };
    conn.execute(
        "INSERT INTO files (owner_id, dir_id, name, blob_ref, unique_ref, size, mime_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            owner,
            dir,
            name,
            content.blob_ref,
            content.unique_ref,
            content.size as i64,
            mime,
            now(),
        ],
    )
    .map_err(|e| conflict_on_unique(e, name))?;
    Ok(FileId(conn.last_insert_rowid()))
}

/// Write part rows, skipping single-part sets entirely.
pub(crate) fn insert_parts(conn: &Connection, file: FileId, parts: &[NewPart]) -> StoreResult<()> {
    if parts.len() <= 1 {
        return Ok(());
    }
    let created = now();
    let mut stmt = conn.prepare(
        "INSERT INTO parts (file_id, part_index, blob_ref, unique_ref, size, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for part in parts {
        stmt.execute(params![
            file,
            part.index,
            part.blob_ref,
            part.unique_ref,
            part.size as i64,
            created,
        ])?;
    }
    Ok(())
}

// =============================================================================
// Public operations
// =============================================================================

impl TreeStore {
    /// Create the owner and their root directory if absent. Idempotent.
    pub fn ensure_owner_root(&self, owner: OwnerId) -> StoreResult<DirId> {
        self.transaction(|tx| {
            let ts = now();
            tx.execute(
                "INSERT OR IGNORE INTO owners (owner_id, created_at) VALUES (?1, ?2)",
                params![owner, ts],
            )?;
            if let Ok(id) = root_id(tx, owner) {
                return Ok(id);
            }
            tx.execute(
                "INSERT INTO directories (owner_id, parent_id, name, created_at, updated_at)
                 VALUES (?1, NULL, ?2, ?3, ?3)",
                params![owner, ROOT_NAME, ts],
            )?;
            let id = DirId(tx.last_insert_rowid());
            debug!(%owner, root = %id, "created owner root");
            Ok(id)
        })
    }

    /// The owner's root directory.
    pub fn root_directory(&self, owner: OwnerId) -> StoreResult<Directory> {
        self.transaction(|tx| {
            let id = root_id(tx, owner)?;
            query_directory(tx, owner, id)
        })
    }

    pub fn get_directory(&self, owner: OwnerId, id: DirId) -> StoreResult<Directory> {
        self.transaction(|tx| query_directory(tx, owner, id))
    }

    pub fn get_file(&self, owner: OwnerId, id: FileId) -> StoreResult<FileRecord> {
        self.transaction(|tx| query_file(tx, owner, id))
    }

    /// Create a directory under `parent`.
    pub fn create_directory(
        &self,
        owner: OwnerId,
        parent: DirId,
        name: &str,
    ) -> StoreResult<Directory> {
        validate_name(name)?;
        self.transaction(|tx| {
            query_directory(tx, owner, parent)?;
            ensure_name_available(tx, owner, parent, name, Exclude::Nothing)?;
            let ts = now();
            tx.execute(
                "INSERT INTO directories (owner_id, parent_id, name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![owner, parent, name, ts],
            )
            .map_err(|e| conflict_on_unique(e, name))?;
            let id = DirId(tx.last_insert_rowid());
            debug!(%owner, %parent, %id, name, "created directory");
            query_directory(tx, owner, id)
        })
    }

    /// Create a single-blob file (no part rows).
    pub fn create_file(
        &self,
        owner: OwnerId,
        dir: DirId,
        name: &str,
        content: &BlobContent,
    ) -> StoreResult<FileRecord> {
        self.create_file_with_parts(owner, dir, name, content, &[])
    }

    /// Create a file row and its part set in one transaction.
    ///
    /// A part set of zero or one entries writes no part rows.
    pub fn create_file_with_parts(
        &self,
        owner: OwnerId,
        dir: DirId,
        name: &str,
        content: &BlobContent,
        parts: &[NewPart],
    ) -> StoreResult<FileRecord> {
        validate_name(name)?;
        check_parts(parts)?;
        self.transaction(|tx| {
            query_directory(tx, owner, dir)?;
            ensure_name_available(tx, owner, dir, name, Exclude::Nothing)?;
            let id = insert_file(tx, owner, dir, name, content)?;
            insert_parts(tx, id, parts)?;
            debug!(%owner, %dir, file = %id, name, parts = parts.len(), size = content.size, "created file");
            query_file(tx, owner, id)
        })
    }

    /// Overwrite a file's content and part set, keeping its identity.
    ///
    /// The prior part set is deleted in the same transaction, so shares that
    /// point at the file keep resolving to the new content.
    pub fn replace_file_with_parts(
        &self,
        owner: OwnerId,
        file: FileId,
        content: &BlobContent,
        parts: &[NewPart],
    ) -> StoreResult<FileRecord> {
        check_parts(parts)?;
        self.transaction(|tx| {
            query_file(tx, owner, file)?;
            let mime = if content.mime_type.is_empty() {
                DEFAULT_MIME_TYPE
            } else {
                content.mime_type.as_str()
            };
            tx.execute(
                "UPDATE files SET blob_ref = ?1, unique_ref = ?2, size = ?3, mime_type = ?4
                 WHERE id = ?5 AND owner_id = ?6",
                params![
                    content.blob_ref,
                    content.unique_ref,
                    content.size as i64,
                    mime,
                    file,
                    owner,
                ],
            )?;
            tx.execute("DELETE FROM parts WHERE file_id = ?1", params![file])?;
            insert_parts(tx, file, parts)?;
            debug!(%owner, %file, parts = parts.len(), size = content.size, "replaced file content");
            query_file(tx, owner, file)
        })
    }

    pub fn rename_directory(&self, owner: OwnerId, id: DirId, name: &str) -> StoreResult<()> {
        validate_name(name)?;
        self.transaction(|tx| {
            let dir = query_directory(tx, owner, id)?;
            let Some(parent) = dir.parent_id else {
                return Err(StoreError::invalid("cannot rename root directory"));
            };
            if dir.name == name {
                return Ok(());
            }
            ensure_name_available(tx, owner, parent, name, Exclude::Dir(id))?;
            tx.execute(
                "UPDATE directories SET name = ?1, updated_at = ?2 WHERE id = ?3 AND owner_id = ?4",
                params![name, now(), id, owner],
            )
            .map_err(|e| conflict_on_unique(e, name))?;
            debug!(%owner, %id, from = %dir.name, to = name, "renamed directory");
            Ok(())
        })
    }

    pub fn rename_file(&self, owner: OwnerId, id: FileId, name: &str) -> StoreResult<()> {
        validate_name(name)?;
        self.transaction(|tx| {
            let file = query_file(tx, owner, id)?;
            if file.name == name {
                return Ok(());
            }
            ensure_name_available(tx, owner, file.dir_id, name, Exclude::File(id))?;
            tx.execute(
                "UPDATE files SET name = ?1 WHERE id = ?2 AND owner_id = ?3",
                params![name, id, owner],
            )
            .map_err(|e| conflict_on_unique(e, name))?;
            debug!(%owner, %id, from = %file.name, to = name, "renamed file");
            Ok(())
        })
    }

    /// Re-parent a directory.
    ///
    /// Fails for the root, for `new_parent == id`, and for any `new_parent`
    /// inside the subtree rooted at `id`.
    pub fn move_directory(&self, owner: OwnerId, id: DirId, new_parent: DirId) -> StoreResult<()> {
        self.transaction(|tx| {
            let dir = query_directory(tx, owner, id)?;
            if dir.is_root() {
                return Err(StoreError::invalid("cannot move root directory"));
            }
            if id == new_parent {
                return Err(StoreError::invalid("cannot move directory into itself"));
            }
            query_directory(tx, owner, new_parent)?;
            if subtree_ids(tx, owner, id)?.contains(&new_parent) {
                return Err(StoreError::invalid(
                    "cannot move directory into its descendant",
                ));
            }
            if dir.parent_id == Some(new_parent) {
                return Ok(());
            }
            ensure_name_available(tx, owner, new_parent, &dir.name, Exclude::Dir(id))?;
            tx.execute(
                "UPDATE directories SET parent_id = ?1, updated_at = ?2 WHERE id = ?3 AND owner_id = ?4",
                params![new_parent, now(), id, owner],
            )
            .map_err(|e| conflict_on_unique(e, &dir.name))?;
            debug!(%owner, %id, to = %new_parent, "moved directory");
            Ok(())
        })
    }

    pub fn move_file(&self, owner: OwnerId, id: FileId, new_dir: DirId) -> StoreResult<()> {
        self.transaction(|tx| {
            let file = query_file(tx, owner, id)?;
            query_directory(tx, owner, new_dir)?;
            if file.dir_id == new_dir {
                return Ok(());
            }
            ensure_name_available(tx, owner, new_dir, &file.name, Exclude::File(id))?;
            tx.execute(
                "UPDATE files SET dir_id = ?1 WHERE id = ?2 AND owner_id = ?3",
                params![new_dir, id, owner],
            )
            .map_err(|e| conflict_on_unique(e, &file.name))?;
            debug!(%owner, %id, to = %new_dir, "moved file");
            Ok(())
        })
    }

    /// Move `node` into `new_parent` under `name`, as one transaction.
    ///
    /// The final placement is checked before anything changes: `new_parent`
    /// must exist, a directory can't land in its own subtree, and `name` must
    /// be free in `new_parent`. A directory holding `name` is always a
    /// conflict; a file holding it is deleted only with `overwrite`. The move
    /// and the rename then run in whichever order keeps every intermediate
    /// state legal. Returns whether a file was replaced.
    pub fn relocate(
        &self,
        owner: OwnerId,
        node: NodeId,
        new_parent: DirId,
        name: &str,
        overwrite: bool,
    ) -> StoreResult<bool> {
        validate_name(name)?;
        self.transaction(|tx| {
            query_directory(tx, owner, new_parent)?;
            let (from_parent, from_name) = match node {
                NodeId::Directory(id) => {
                    let dir = query_directory(tx, owner, id)?;
                    let Some(parent) = dir.parent_id else {
                        return Err(StoreError::invalid("cannot move root directory"));
                    };
                    if id == new_parent {
                        return Err(StoreError::invalid("cannot move directory into itself"));
                    }
                    if subtree_ids(tx, owner, id)?.contains(&new_parent) {
                        return Err(StoreError::invalid(
                            "cannot move directory into its descendant",
                        ));
                    }
                    (parent, dir.name)
                }
                NodeId::File(id) => {
                    let file = query_file(tx, owner, id)?;
                    (file.dir_id, file.name)
                }
            };
            if from_parent == new_parent && from_name == name {
                return Ok(false);
            }

            if query_directory_by_name(tx, owner, new_parent, name)?.is_some() {
                return Err(StoreError::name_conflict(name));
            }
            let victim = query_file_by_name(tx, owner, new_parent, name)?;
            if victim.is_some() && !overwrite {
                return Err(StoreError::name_conflict(name));
            }
            if let Some(victim) = &victim {
                tx.execute(
                    "DELETE FROM files WHERE id = ?1 AND owner_id = ?2",
                    params![victim.id, owner],
                )?;
            }

            if !holds_name(tx, owner, node, from_parent, name)? {
                place(tx, owner, node, None, Some(name))?;
                place(tx, owner, node, Some(new_parent), None)?;
            } else if !holds_name(tx, owner, node, new_parent, &from_name)? {
                place(tx, owner, node, Some(new_parent), None)?;
                place(tx, owner, node, None, Some(name))?;
            } else {
                // Both halfway placements clash; land in one step.
                place(tx, owner, node, Some(new_parent), Some(name))?;
            }
            let replaced = victim.is_some();
            debug!(%owner, ?node, to = %new_parent, new_name = name, replaced, "relocated");
            Ok(replaced)
        })
    }

    /// Delete a directory and everything beneath it in one transaction.
    pub fn delete_directory_recursive(&self, owner: OwnerId, id: DirId) -> StoreResult<()> {
        self.transaction(|tx| {
            let dir = query_directory(tx, owner, id)?;
            if dir.is_root() {
                return Err(StoreError::invalid("cannot delete root directory"));
            }
            let subtree = subtree_ids(tx, owner, id)?;
            let mut files = 0;
            let mut dirs = 0;
            // Files first: parts and shares follow by cascade.
            for dir_id in &subtree {
                files += tx.execute(
                    "DELETE FROM files WHERE dir_id = ?1 AND owner_id = ?2",
                    params![dir_id, owner],
                )?;
            }
            // Deepest last in CTE order, so delete in reverse.
            for dir_id in subtree.iter().rev() {
                dirs += tx.execute(
                    "DELETE FROM directories WHERE id = ?1 AND owner_id = ?2",
                    params![dir_id, owner],
                )?;
            }
            debug!(%owner, %id, dirs, files, "deleted directory tree");
            Ok(())
        })
    }

    /// Delete one file with its parts and shares.
    pub fn delete_file(&self, owner: OwnerId, id: FileId) -> StoreResult<()> {
        self.transaction(|tx| {
            let n = tx.execute(
                "DELETE FROM files WHERE id = ?1 AND owner_id = ?2",
                params![id, owner],
            )?;
            if n == 0 {
                return Err(StoreError::not_found(format!("file {id}")));
            }
            debug!(%owner, %id, "deleted file");
            Ok(())
        })
    }

    /// Child directories of `parent`, by name.
    pub fn list_directories(&self, owner: OwnerId, parent: DirId) -> StoreResult<Vec<Directory>> {
        self.transaction(|tx| {
            query_directory(tx, owner, parent)?;
            let mut stmt = tx.prepare(&format!(
                "SELECT {DIR_COLUMNS} FROM directories
                 WHERE owner_id = ?1 AND parent_id = ?2 ORDER BY name"
            ))?;
            let rows = stmt.query_map(params![owner, parent], dir_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Files directly inside `dir`, by name.
    pub fn list_files(&self, owner: OwnerId, dir: DirId) -> StoreResult<Vec<FileRecord>> {
        self.transaction(|tx| {
            query_directory(tx, owner, dir)?;
            let mut stmt = tx.prepare(&format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE owner_id = ?1 AND dir_id = ?2 ORDER BY name"
            ))?;
            let rows = stmt.query_map(params![owner, dir], file_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// File rows across every owner.
    pub fn count_files(&self) -> StoreResult<u64> {
        self.transaction(|tx| {
            let n: i64 = tx.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    /// Parts of a multi-blob file in index order; empty for single-blob files.
    pub fn list_parts(&self, file: FileId) -> StoreResult<Vec<Part>> {
        self.transaction(|tx| query_parts(tx, file))
    }

    /// Walk directory names from the owner's root. Empty segments are skipped.
    pub fn find_directory_by_path<S: AsRef<str>>(
        &self,
        owner: OwnerId,
        segments: &[S],
    ) -> StoreResult<Directory> {
        self.transaction(|tx| walk_directories(tx, owner, segments))
    }

    /// Resolve a path whose last segment may name a directory or a file.
    pub fn resolve_path<S: AsRef<str>>(&self, owner: OwnerId, segments: &[S]) -> StoreResult<Node> {
        self.transaction(|tx| {
            let segments: Vec<&str> = segments
                .iter()
                .map(AsRef::as_ref)
                .filter(|s| !s.is_empty())
                .collect();
            let Some((last, parents)) = segments.split_last() else {
                let root = root_id(tx, owner)?;
                return Ok(Node::Directory(query_directory(tx, owner, root)?));
            };
            let parent = walk_directories(tx, owner, parents)?;
            if let Some(dir) = query_directory_by_name(tx, owner, parent.id, last)? {
                return Ok(Node::Directory(dir));
            }
            query_file_by_name(tx, owner, parent.id, last)?
                .map(Node::File)
                .ok_or_else(|| StoreError::not_found(segments.join("/")))
        })
    }

    /// Render a directory as an absolute `/a/b` path.
    pub fn directory_path(&self, owner: OwnerId, dir: DirId) -> StoreResult<String> {
        self.transaction(|tx| {
            let mut names = Vec::new();
            let mut current = query_directory(tx, owner, dir)?;
            while let Some(parent) = current.parent_id {
                names.push(current.name);
                current = query_directory(tx, owner, parent)?;
            }
            names.reverse();
            Ok(format!("/{}", names.join("/")))
        })
    }
}

fn walk_directories<S: AsRef<str>>(
    conn: &Connection,
    owner: OwnerId,
    segments: &[S],
) -> StoreResult<Directory> {
    let root = root_id(conn, owner)?;
    let mut current = query_directory(conn, owner, root)?;
    for segment in segments.iter().map(AsRef::as_ref) {
        if segment.is_empty() {
            continue;
        }
        current = query_directory_by_name(conn, owner, current.id, segment)?
            .ok_or_else(|| StoreError::not_found(segment.to_string()))?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: OwnerId = OwnerId(42);

    fn setup() -> (TreeStore, DirId) {
        let store = TreeStore::in_memory().unwrap();
        let root = store.ensure_owner_root(OWNER).unwrap();
        (store, root)
    }

    fn content(size: u64) -> BlobContent {
        BlobContent::new(format!("blob-{size}"), format!("uniq-{size}"), size, "text/plain")
    }

    fn parts(sizes: &[u64]) -> Vec<NewPart> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| NewPart {
                index: i as u32,
                blob_ref: format!("part-{i}"),
                unique_ref: format!("uniq-part-{i}"),
                size,
            })
            .collect()
    }

    #[test]
    fn test_ensure_owner_root_idempotent() {
        let (store, root) = setup();
        assert_eq!(store.ensure_owner_root(OWNER).unwrap(), root);

        let dir = store.root_directory(OWNER).unwrap();
        assert!(dir.is_root());
        assert_eq!(dir.name, ROOT_NAME);

        let parentless: i64 = store
            .transaction(|tx| {
                Ok(tx.query_row(
                    "SELECT COUNT(*) FROM directories WHERE owner_id = ?1 AND parent_id IS NULL",
                    params![OWNER],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(parentless, 1);
    }

    #[test]
    fn test_rename_then_conflict_scenario() {
        let (store, root) = setup();
        let docs = store.create_directory(OWNER, root, "docs").unwrap();
        let a = store.create_file(OWNER, docs.id, "a.txt", &content(10)).unwrap();
        assert_eq!(a.size, 10);

        store.rename_file(OWNER, a.id, "b.txt").unwrap();
        let err = store
            .create_file(OWNER, docs.id, "b.txt", &content(3))
            .unwrap_err();
        assert!(err.is_name_conflict());

        let files = store.list_files(OWNER, docs.id).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "b.txt");
    }

    #[test]
    fn test_dirs_and_files_share_namespace() {
        let (store, root) = setup();
        store.create_directory(OWNER, root, "x").unwrap();
        assert!(store
            .create_file(OWNER, root, "x", &content(1))
            .unwrap_err()
            .is_name_conflict());

        store.create_file(OWNER, root, "y", &content(1)).unwrap();
        assert!(store
            .create_directory(OWNER, root, "y")
            .unwrap_err()
            .is_name_conflict());
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let (store, root) = setup();
        store.create_directory(OWNER, root, "Docs").unwrap();
        store.create_directory(OWNER, root, "docs").unwrap();
        assert_eq!(store.list_directories(OWNER, root).unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let (store, root) = setup();
        for bad in ["", ".", "..", "a/b"] {
            assert!(store.create_directory(OWNER, root, bad).unwrap_err().is_invalid());
        }
    }

    #[test]
    fn test_rename_conflict_leaves_state() {
        let (store, root) = setup();
        let a = store.create_directory(OWNER, root, "a").unwrap();
        store.create_file(OWNER, root, "b", &content(1)).unwrap();

        assert!(store.rename_directory(OWNER, a.id, "b").unwrap_err().is_name_conflict());
        assert_eq!(store.get_directory(OWNER, a.id).unwrap().name, "a");

        // Renaming to the current name is a no-op
        store.rename_directory(OWNER, a.id, "a").unwrap();
    }

    #[test]
    fn test_root_is_immutable() {
        let (store, root) = setup();
        let sub = store.create_directory(OWNER, root, "sub").unwrap();

        assert!(store.rename_directory(OWNER, root, "r").unwrap_err().is_invalid());
        assert!(store.move_directory(OWNER, root, sub.id).unwrap_err().is_invalid());
        assert!(store.delete_directory_recursive(OWNER, root).unwrap_err().is_invalid());
        assert!(store.root_directory(OWNER).is_ok());
    }

    #[test]
    fn test_move_directory_rejects_cycles_at_any_depth() {
        let (store, root) = setup();
        let a = store.create_directory(OWNER, root, "a").unwrap();
        let mut chain = vec![a.id];
        for depth in 0..4 {
            let parent = *chain.last().unwrap();
            let d = store
                .create_directory(OWNER, parent, &format!("d{depth}"))
                .unwrap();
            chain.push(d.id);
        }

        for target in &chain {
            let err = store.move_directory(OWNER, a.id, *target).unwrap_err();
            assert!(err.is_invalid(), "target {target} should be rejected");
        }
        assert_eq!(store.get_directory(OWNER, a.id).unwrap().parent_id, Some(root));

        // A sibling destination is fine
        let b = store.create_directory(OWNER, root, "b").unwrap();
        store.move_directory(OWNER, a.id, b.id).unwrap();
        assert_eq!(store.directory_path(OWNER, chain[4]).unwrap(), "/b/a/d0/d1/d2/d3");
    }

    #[test]
    fn test_move_conflicts() {
        let (store, root) = setup();
        let src = store.create_directory(OWNER, root, "src").unwrap();
        let dst = store.create_directory(OWNER, root, "dst").unwrap();
        let inner = store.create_directory(OWNER, src.id, "same").unwrap();
        store.create_file(OWNER, dst.id, "same", &content(1)).unwrap();
        assert!(store.move_directory(OWNER, inner.id, dst.id).unwrap_err().is_name_conflict());

        let f = store.create_file(OWNER, src.id, "f", &content(1)).unwrap();
        store.create_directory(OWNER, dst.id, "f").unwrap();
        assert!(store.move_file(OWNER, f.id, dst.id).unwrap_err().is_name_conflict());
        assert_eq!(store.get_file(OWNER, f.id).unwrap().dir_id, src.id);
    }

    #[test]
    fn test_relocate_checks_final_name_only() {
        let (store, root) = setup();
        let src = store.create_directory(OWNER, root, "src").unwrap();
        let dst = store.create_directory(OWNER, root, "dst").unwrap();
        let z = store.create_file(OWNER, src.id, "z.txt", &content(1)).unwrap();
        let dst_z = store.create_file(OWNER, dst.id, "z.txt", &content(2)).unwrap();

        let replaced = store
            .relocate(OWNER, NodeId::File(z.id), dst.id, "free.txt", false)
            .unwrap();
        assert!(!replaced);
        let moved = store.get_file(OWNER, z.id).unwrap();
        assert_eq!((moved.dir_id, moved.name.as_str()), (dst.id, "free.txt"));
        assert_eq!(store.get_file(OWNER, dst_z.id).unwrap().name, "z.txt");

        // Old name taken at the destination and new name taken at the source
        let a = store.create_file(OWNER, src.id, "a", &content(1)).unwrap();
        store.create_file(OWNER, src.id, "b", &content(1)).unwrap();
        store.create_file(OWNER, dst.id, "a", &content(1)).unwrap();
        store.relocate(OWNER, NodeId::File(a.id), dst.id, "b", false).unwrap();
        let moved = store.get_file(OWNER, a.id).unwrap();
        assert_eq!((moved.dir_id, moved.name.as_str()), (dst.id, "b"));
    }

    #[test]
    fn test_relocate_overwrites_only_files() {
        let (store, root) = setup();
        let src = store.create_directory(OWNER, root, "src").unwrap();
        let dst = store.create_directory(OWNER, root, "dst").unwrap();
        let x = store.create_file(OWNER, src.id, "x.txt", &content(1)).unwrap();
        let dst_x = store.create_file(OWNER, dst.id, "x.txt", &content(2)).unwrap();
        let y = store.create_file(OWNER, dst.id, "y.txt", &content(3)).unwrap();

        assert!(store
            .relocate(OWNER, NodeId::File(x.id), dst.id, "y.txt", false)
            .unwrap_err()
            .is_name_conflict());
        assert_eq!(store.get_file(OWNER, y.id).unwrap().size, 3);

        assert!(store
            .relocate(OWNER, NodeId::File(x.id), dst.id, "y.txt", true)
            .unwrap());
        assert!(store.get_file(OWNER, y.id).unwrap_err().is_not_found());
        assert_eq!(store.get_file(OWNER, dst_x.id).unwrap().name, "x.txt");
        let names: Vec<_> = store
            .list_files(OWNER, dst.id)
            .unwrap()
            .into_iter()
            .map(|f| (f.id, f.name))
            .collect();
        assert_eq!(names, vec![(dst_x.id, "x.txt".to_string()), (x.id, "y.txt".to_string())]);

        store.create_directory(OWNER, dst.id, "sub").unwrap();
        let w = store.create_file(OWNER, src.id, "w", &content(1)).unwrap();
        assert!(store
            .relocate(OWNER, NodeId::File(w.id), dst.id, "sub", true)
            .unwrap_err()
            .is_name_conflict());
    }

    #[test]
    fn test_failed_relocate_keeps_destination() {
        let (store, root) = setup();
        let src = store.create_directory(OWNER, root, "src").unwrap();
        let victim = store.create_file(OWNER, src.id, "victim", &content(5)).unwrap();

        let err = store
            .relocate(OWNER, NodeId::Directory(src.id), src.id, "victim", true)
            .unwrap_err();
        assert!(err.is_invalid());
        assert_eq!(store.get_file(OWNER, victim.id).unwrap().size, 5);
        assert_eq!(store.get_directory(OWNER, src.id).unwrap().parent_id, Some(root));

        let inner = store.create_directory(OWNER, src.id, "inner").unwrap();
        store.create_file(OWNER, inner.id, "deep", &content(1)).unwrap();
        assert!(store
            .relocate(OWNER, NodeId::Directory(src.id), inner.id, "deep", true)
            .unwrap_err()
            .is_invalid());
        assert_eq!(store.list_files(OWNER, inner.id).unwrap().len(), 1);

        assert!(store
            .relocate(OWNER, NodeId::Directory(root), src.id, "r", true)
            .unwrap_err()
            .is_invalid());
    }

    #[test]
    fn test_count_files_spans_owners() {
        let (store, root) = setup();
        assert_eq!(store.count_files().unwrap(), 0);
        store.create_file(OWNER, root, "a", &content(1)).unwrap();
        let other = store.ensure_owner_root(OwnerId(7)).unwrap();
        let b = store.create_file(OwnerId(7), other, "b", &content(2)).unwrap();
        assert_eq!(store.count_files().unwrap(), 2);
        store.delete_file(OwnerId(7), b.id).unwrap();
        assert_eq!(store.count_files().unwrap(), 1);
    }

    #[test]
    fn test_owner_isolation() {
        let (store, root) = setup();
        let other = OwnerId(7);
        let other_root = store.ensure_owner_root(other).unwrap();

        assert!(store.create_directory(other, root, "x").unwrap_err().is_not_found());
        let d = store.create_directory(OWNER, root, "mine").unwrap();
        assert!(store.get_directory(other, d.id).unwrap_err().is_not_found());
        assert!(store.move_directory(OWNER, d.id, other_root).unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_directory_cascades() {
        let (store, root) = setup();
        let top = store.create_directory(OWNER, root, "top").unwrap();
        let mid = store.create_directory(OWNER, top.id, "mid").unwrap();
        let leaf = store.create_directory(OWNER, mid.id, "leaf").unwrap();
        let f1 = store.create_file(OWNER, top.id, "f1", &content(1)).unwrap();
        let f2 = store
            .create_file_with_parts(OWNER, leaf.id, "big", &content(30), &parts(&[10, 10, 10]))
            .unwrap();
        let keep = store.create_file(OWNER, root, "keep", &content(1)).unwrap();

        store.delete_directory_recursive(OWNER, top.id).unwrap();

        for dir in [top.id, mid.id, leaf.id] {
            assert!(store.get_directory(OWNER, dir).unwrap_err().is_not_found());
        }
        for file in [f1.id, f2.id] {
            assert!(store.get_file(OWNER, file).unwrap_err().is_not_found());
        }
        assert!(store.list_parts(f2.id).unwrap().is_empty());
        assert!(store.get_file(OWNER, keep.id).is_ok());
        assert!(store
            .resolve_path(OWNER, &["top", "mid"])
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_single_part_writes_no_rows() {
        let (store, root) = setup();
        let f = store
            .create_file_with_parts(OWNER, root, "one", &content(5), &parts(&[5]))
            .unwrap();
        assert!(store.list_parts(f.id).unwrap().is_empty());

        let g = store
            .create_file_with_parts(OWNER, root, "two", &content(8), &parts(&[5, 3]))
            .unwrap();
        let stored = store.list_parts(g.id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].index, 0);
        assert_eq!(stored[1].size, 3);
    }

    #[test]
    fn test_non_contiguous_parts_rejected() {
        let (store, root) = setup();
        let mut bad = parts(&[5, 5]);
        bad[1].index = 2;
        assert!(store
            .create_file_with_parts(OWNER, root, "gap", &content(10), &bad)
            .unwrap_err()
            .is_invalid());
        assert!(store.resolve_path(OWNER, &["gap"]).unwrap_err().is_not_found());
    }

    #[test]
    fn test_replace_keeps_identity_and_swaps_parts() {
        let (store, root) = setup();
        let f = store
            .create_file_with_parts(OWNER, root, "f", &content(20), &parts(&[10, 10]))
            .unwrap();

        let replaced = store
            .replace_file_with_parts(OWNER, f.id, &BlobContent::new("new", "new-u", 4, ""), &[])
            .unwrap();
        assert_eq!(replaced.id, f.id);
        assert_eq!(replaced.size, 4);
        assert_eq!(replaced.mime_type, DEFAULT_MIME_TYPE);
        assert!(store.list_parts(f.id).unwrap().is_empty());
    }

    #[test]
    fn test_listing_is_name_ordered() {
        let (store, root) = setup();
        for name in ["zeta", "Alpha", "beta"] {
            store.create_directory(OWNER, root, name).unwrap();
            store
                .create_file(OWNER, root, &format!("{name}.txt"), &content(1))
                .unwrap();
        }
        let dirs: Vec<_> = store
            .list_directories(OWNER, root)
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(dirs, vec!["Alpha", "beta", "zeta"]);

        let files: Vec<_> = store
            .list_files(OWNER, root)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(files, vec!["Alpha.txt", "beta.txt", "zeta.txt"]);
    }

    #[test]
    fn test_find_and_resolve_paths() {
        let (store, root) = setup();
        let a = store.create_directory(OWNER, root, "a").unwrap();
        let b = store.create_directory(OWNER, a.id, "b").unwrap();
        let f = store.create_file(OWNER, b.id, "f.bin", &content(2)).unwrap();

        assert_eq!(store.find_directory_by_path(OWNER, &["a", "", "b"]).unwrap().id, b.id);
        let empty: [&str; 0] = [];
        assert_eq!(store.find_directory_by_path(OWNER, &empty).unwrap().id, root);
        assert!(store
            .find_directory_by_path(OWNER, &["a", "missing", "b"])
            .unwrap_err()
            .is_not_found());

        match store.resolve_path(OWNER, &["a", "b", "f.bin"]).unwrap() {
            Node::File(found) => assert_eq!(found.id, f.id),
            other => panic!("expected file, got {other:?}"),
        }
        assert!(store.resolve_path(OWNER, &["a"]).unwrap().is_dir());
        assert_eq!(store.directory_path(OWNER, root).unwrap(), "/");
    }
}
