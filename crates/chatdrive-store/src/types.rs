//! Typed identifiers and records for the metadata tree.
//!
//! All ID types wrap SQLite rowids. They're opaque to callers and display as
//! the bare integer for logging.

use std::fmt;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Tenant identity. Everything in the tree is partitioned by owner.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

/// A directory identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirId(pub i64);

/// A file identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub i64);

/// A share identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareId(pub i64);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_row_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// The raw rowid.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $T {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        impl ToSql for $T {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $T {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }
    };
}

impl_row_id!(OwnerId, "OwnerId");
impl_row_id!(DirId, "DirId");
impl_row_id!(FileId, "FileId");
impl_row_id!(ShareId, "ShareId");

/// Mime type recorded when the blob store reports none.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

// ── Records ─────────────────────────────────────────────────────────────────

/// A directory row. `parent_id` is `None` only for the owner's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub id: DirId,
    pub owner: OwnerId,
    pub parent_id: Option<DirId>,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Directory {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A file row.
///
/// For single-blob content `blob_ref` addresses the bytes directly. For
/// multi-part content it repeats part 0's reference and `size` is the total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,
    pub owner: OwnerId,
    pub dir_id: DirId,
    pub name: String,
    pub blob_ref: String,
    pub unique_ref: String,
    pub size: u64,
    pub mime_type: String,
    pub created_at: i64,
}

/// One stored slice of a multi-part file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub id: i64,
    pub file_id: FileId,
    pub index: u32,
    pub blob_ref: String,
    pub unique_ref: String,
    pub size: u64,
    pub created_at: i64,
}

/// Part description supplied by the transfer engine before the file row exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPart {
    pub index: u32,
    pub blob_ref: String,
    pub unique_ref: String,
    pub size: u64,
}

/// Remote content descriptor for a file row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobContent {
    pub blob_ref: String,
    pub unique_ref: String,
    pub size: u64,
    pub mime_type: String,
}

impl BlobContent {
    pub fn new(
        blob_ref: impl Into<String>,
        unique_ref: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            blob_ref: blob_ref.into(),
            unique_ref: unique_ref.into(),
            size,
            mime_type: mime_type.into(),
        }
    }
}

/// A share capability for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub id: ShareId,
    pub file_id: FileId,
    pub token: String,
    /// Unix seconds; `None` never expires.
    pub expires_at: Option<i64>,
    pub use_count: i64,
    pub created_at: i64,
}

/// Result of a path lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Directory(Directory),
    File(FileRecord),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Directory(d) => &d.name,
            Node::File(f) => &f.name,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory(_))
    }

    pub fn id(&self) -> NodeId {
        match self {
            Node::Directory(d) => NodeId::Directory(d.id),
            Node::File(f) => NodeId::File(f.id),
        }
    }
}

/// Either kind of tree entry, by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeId {
    Directory(DirId),
    File(FileId),
}

// ── Sessions ────────────────────────────────────────────────────────────────

/// What the front-end is waiting on the user to supply.
///
/// Persisted as tagged JSON so an unknown kind fails loudly on decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingAction {
    /// Next text message names a new directory under `parent`.
    MakeDirectory { parent: DirId },
    /// Next text message is the new name for `dir`.
    RenameDirectory { dir: DirId },
    /// Next text message is the new name for `file`.
    RenameFile { file: FileId },
    /// Next directory selection is the destination for `file`.
    MoveFile { file: FileId },
    /// Next directory selection is the destination for `dir`.
    MoveDirectory { dir: DirId },
}

/// Front-end UI state for one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub owner: OwnerId,
    pub current_dir: Option<DirId>,
    pub pending: Option<PendingAction>,
    pub updated_at: i64,
}

/// Username binding for transport-level authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub owner: OwnerId,
    pub username: String,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_action_json_is_tagged() {
        let action = PendingAction::MoveFile { file: FileId(7) };
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, r#"{"kind":"move_file","file":7}"#);

        let back: PendingAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_unknown_pending_kind_rejected() {
        let err = serde_json::from_str::<PendingAction>(r#"{"kind":"teleport","dir":1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_id_debug_format() {
        assert_eq!(format!("{:?}", DirId(3)), "DirId(3)");
        assert_eq!(DirId(3).to_string(), "3");
    }
}
