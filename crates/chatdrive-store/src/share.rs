//! Share capabilities: opaque tokens granting read access to one file.

use rand::Rng;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::db::{
    FILE_COLUMNS, SHARE_COLUMNS, TreeStore, conflict_on_unique, file_from_row, now, share_from_row,
};
use crate::error::{StoreError, StoreResult};
use crate::tree::{insert_file, insert_parts, query_directory, query_file, query_parts};
use crate::types::{BlobContent, DirId, FileId, FileRecord, NewPart, OwnerId, Share, ShareId};

/// Length of generated share tokens.
pub const TOKEN_LEN: usize = 16;

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A fresh random token drawn from `[a-z0-9]`.
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Check a share against the clock. Usable at exactly `expires_at`.
pub fn validate(share: &Share, now: i64) -> StoreResult<()> {
    match share.expires_at {
        Some(expires) if now > expires => Err(StoreError::expired(&share.token)),
        _ => Ok(()),
    }
}

fn query_share(conn: &Connection, token: &str) -> StoreResult<(Share, FileRecord)> {
    let share = conn
        .query_row(
            &format!("SELECT {SHARE_COLUMNS} FROM shares WHERE token = ?1"),
            params![token],
            share_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("share {token}")))?;
    let file = conn
        .query_row(
            &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
            params![share.file_id],
            file_from_row,
        )
        .optional()?
        .ok_or_else(|| StoreError::not_found(format!("file {}", share.file_id)))?;
    Ok((share, file))
}

fn bump_uses(conn: &Connection, id: ShareId) -> StoreResult<()> {
    let n = conn.execute(
        "UPDATE shares SET use_count = use_count + 1 WHERE id = ?1",
        params![id],
    )?;
    if n == 0 {
        return Err(StoreError::not_found(format!("share {id}")));
    }
    Ok(())
}

impl TreeStore {
    /// Register a share for one of the owner's files.
    pub fn create_share(
        &self,
        owner: OwnerId,
        file: FileId,
        token: &str,
        expires_at: Option<i64>,
    ) -> StoreResult<Share> {
        self.transaction(|tx| {
            query_file(tx, owner, file)?;
            tx.execute(
                "INSERT INTO shares (file_id, token, expires_at, use_count, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![file, token, expires_at, now()],
            )
            .map_err(|e| conflict_on_unique(e, token))?;
            let id = ShareId(tx.last_insert_rowid());
            debug!(%owner, %file, share = %id, ?expires_at, "created share");
            Ok(tx.query_row(
                &format!("SELECT {SHARE_COLUMNS} FROM shares WHERE id = ?1"),
                params![id],
                share_from_row,
            )?)
        })
    }

    /// Look up a share and the file it grants. Expiry is not checked here.
    pub fn get_share_by_token(&self, token: &str) -> StoreResult<(Share, FileRecord)> {
        self.transaction(|tx| query_share(tx, token))
    }

    pub fn increment_share_uses(&self, share: ShareId) -> StoreResult<()> {
        self.transaction(|tx| bump_uses(tx, share))
    }

    /// Copy a shared file into one of the caller's directories.
    ///
    /// The copy references the same remote blobs. The share's use count is
    /// bumped in the same transaction.
    pub fn import_shared_file(
        &self,
        owner: OwnerId,
        dir: DirId,
        token: &str,
        now: i64,
    ) -> StoreResult<FileRecord> {
        self.transaction(|tx| {
            let (share, source) = query_share(tx, token)?;
            validate(&share, now)?;
            query_directory(tx, owner, dir)?;

            let content = BlobContent::new(
                source.blob_ref.clone(),
                source.unique_ref.clone(),
                source.size,
                source.mime_type.clone(),
            );
            // insert_file hits the unique index on a sibling file; directories
            // need an explicit check.
            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM directories WHERE owner_id = ?1 AND parent_id = ?2 AND name = ?3)",
                params![owner, dir, source.name],
                |row| row.get(0),
            )?;
            if taken {
                return Err(StoreError::name_conflict(&source.name));
            }
            let id = insert_file(tx, owner, dir, &source.name, &content)?;

            let parts: Vec<NewPart> = query_parts(tx, source.id)?
                .into_iter()
                .map(|p| NewPart {
                    index: p.index,
                    blob_ref: p.blob_ref,
                    unique_ref: p.unique_ref,
                    size: p.size,
                })
                .collect();
            insert_parts(tx, id, &parts)?;
            bump_uses(tx, share.id)?;
            debug!(%owner, %dir, file = %id, share = %share.id, "imported shared file");
            query_file(tx, owner, id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: OwnerId = OwnerId(1);
    const OTHER: OwnerId = OwnerId(2);

    fn setup() -> (TreeStore, DirId, FileRecord) {
        let store = TreeStore::in_memory().unwrap();
        let root = store.ensure_owner_root(OWNER).unwrap();
        let file = store
            .create_file(OWNER, root, "report.pdf", &BlobContent::new("b1", "u1", 12, "application/pdf"))
            .unwrap();
        (store, root, file)
    }

    #[test]
    fn test_generate_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
        assert_ne!(generate_token(), token);
    }

    #[test]
    fn test_validate_boundary() {
        let share = Share {
            id: ShareId(1),
            file_id: FileId(1),
            token: "t".into(),
            expires_at: Some(1000),
            use_count: 0,
            created_at: 0,
        };
        assert!(validate(&share, 999).is_ok());
        assert!(validate(&share, 1000).is_ok());
        assert!(matches!(validate(&share, 1001), Err(StoreError::Expired(_))));

        let forever = Share { expires_at: None, ..share };
        assert!(validate(&forever, i64::MAX).is_ok());
    }

    #[test]
    fn test_create_and_lookup_share() {
        let (store, _, file) = setup();
        let share = store.create_share(OWNER, file.id, "abc123", Some(50)).unwrap();
        assert_eq!(share.use_count, 0);

        let (found, target) = store.get_share_by_token("abc123").unwrap();
        assert_eq!(found.id, share.id);
        assert_eq!(target.id, file.id);

        store.increment_share_uses(share.id).unwrap();
        let (found, _) = store.get_share_by_token("abc123").unwrap();
        assert_eq!(found.use_count, 1);

        assert!(store.get_share_by_token("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_duplicate_token_conflicts() {
        let (store, _, file) = setup();
        store.create_share(OWNER, file.id, "dup", None).unwrap();
        assert!(store
            .create_share(OWNER, file.id, "dup", None)
            .unwrap_err()
            .is_name_conflict());
    }

    #[test]
    fn test_share_requires_ownership() {
        let (store, _, file) = setup();
        store.ensure_owner_root(OTHER).unwrap();
        assert!(store
            .create_share(OTHER, file.id, "steal", None)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_share_dies_with_file() {
        let (store, _, file) = setup();
        store.create_share(OWNER, file.id, "gone", None).unwrap();
        store.delete_file(OWNER, file.id).unwrap();
        assert!(store.get_share_by_token("gone").unwrap_err().is_not_found());
    }

    #[test]
    fn test_import_shared_file_copies_parts() {
        let store = TreeStore::in_memory().unwrap();
        let root = store.ensure_owner_root(OWNER).unwrap();
        let parts = vec![
            NewPart { index: 0, blob_ref: "p0".into(), unique_ref: "u0".into(), size: 4 },
            NewPart { index: 1, blob_ref: "p1".into(), unique_ref: "u1".into(), size: 2 },
        ];
        let file = store
            .create_file_with_parts(OWNER, root, "big.bin", &BlobContent::new("p0", "u0", 6, ""), &parts)
            .unwrap();
        let share = store.create_share(OWNER, file.id, "tok", Some(100)).unwrap();

        let other_root = store.ensure_owner_root(OTHER).unwrap();
        let copy = store.import_shared_file(OTHER, other_root, "tok", 100).unwrap();
        assert_eq!(copy.owner, OTHER);
        assert_eq!(copy.name, "big.bin");
        assert_eq!(copy.size, 6);
        assert_eq!(store.list_parts(copy.id).unwrap().len(), 2);

        let (after, _) = store.get_share_by_token("tok").unwrap();
        assert_eq!(after.use_count, share.use_count + 1);

        // Second import collides with the first copy
        assert!(store
            .import_shared_file(OTHER, other_root, "tok", 100)
            .unwrap_err()
            .is_name_conflict());
    }

    #[test]
    fn test_import_expired_share_fails() {
        let (store, _, file) = setup();
        store.create_share(OWNER, file.id, "old", Some(10)).unwrap();
        let other_root = store.ensure_owner_root(OTHER).unwrap();

        let err = store.import_shared_file(OTHER, other_root, "old", 11).unwrap_err();
        assert!(matches!(err, StoreError::Expired(_)));
        assert!(store.list_files(OTHER, other_root).unwrap().is_empty());
        let (share, _) = store.get_share_by_token("old").unwrap();
        assert_eq!(share.use_count, 0);
    }
}
