//! Transactional metadata tree for chatdrive.
//!
//! File content never touches local disk. This crate keeps everything else:
//! the per-owner directory tree, file rows with their remote blob references,
//! part sets for files larger than one remote object, share tokens, front-end
//! sessions and transport credentials.
//!
//! # Invariants
//!
//! Each holds at every transaction boundary:
//!
//! - One parentless directory (the root) per owner, never renamed, moved or
//!   deleted.
//! - Directory and file names share one case-sensitive namespace per parent.
//! - No directory is moved into itself or its own subtree.
//! - Part sets are contiguous from 0, and a single-part file has no part rows.
//!
//! ```no_run
//! use chatdrive_store::{BlobContent, OwnerId, TreeStore};
//!
//! let store = TreeStore::open("chatdrive.db")?;
//! let root = store.ensure_owner_root(OwnerId(1))?;
//! let docs = store.create_directory(OwnerId(1), root, "docs")?;
//! store.create_file(OwnerId(1), docs.id, "a.txt", &BlobContent::new("b", "u", 10, "text/plain"))?;
//! # Ok::<(), chatdrive_store::StoreError>(())
//! ```

mod auth;
mod db;
pub mod error;
mod session;
pub mod share;
mod tree;
pub mod types;

pub use db::{TreeStore, now};
pub use error::{StoreError, StoreResult};
pub use share::generate_token;
pub use tree::{ROOT_NAME, validate_name};
pub use types::{
    BlobContent, DEFAULT_MIME_TYPE, DirId, Directory, FileId, FileRecord, NewPart, Node, NodeId,
    OwnerId, Part, PendingAction, Profile, Session, Share, ShareId,
};
