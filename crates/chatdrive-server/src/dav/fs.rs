//! Path-based filesystem view over the tree store and transfer engine.
//!
//! Stateless beyond the owner and path of each call. Content streams are
//! built here and handed to the HTTP layer.

use std::sync::Arc;

use chatdrive_store::{Directory, FileRecord, Node, OwnerId, StoreError, TreeStore};
use chatdrive_transfer::{BlobStore, Download, StorageChannel, Upload, UploadOptions, UploadTarget};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::{DavError, DavResult};

/// Transfer tuning applied to every upload.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub channel: StorageChannel,
    pub max_part_size: u64,
    pub handoff_capacity: usize,
}

/// Metadata for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    /// Unix seconds.
    pub modified: i64,
    /// Unix seconds.
    pub created: i64,
    pub mime_type: Option<String>,
    /// Remote identity of the content, for ETags.
    pub unique_ref: Option<String>,
}

impl From<&Directory> for DavEntry {
    fn from(dir: &Directory) -> Self {
        Self {
            name: if dir.is_root() { String::new() } else { dir.name.clone() },
            size: 0,
            is_dir: true,
            modified: dir.updated_at,
            created: dir.created_at,
            mime_type: None,
            unique_ref: None,
        }
    }
}

impl From<&FileRecord> for DavEntry {
    fn from(file: &FileRecord) -> Self {
        Self {
            name: file.name.clone(),
            size: file.size,
            is_dir: false,
            modified: file.created_at,
            created: file.created_at,
            mime_type: Some(file.mime_type.clone()),
            unique_ref: Some(file.unique_ref.clone()),
        }
    }
}

impl From<&Node> for DavEntry {
    fn from(node: &Node) -> Self {
        match node {
            Node::Directory(dir) => dir.into(),
            Node::File(file) => file.into(),
        }
    }
}

/// A canonical path: parent segments plus a base name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavPath {
    pub parents: Vec<String>,
    /// Empty for the root.
    pub base: String,
}

impl DavPath {
    pub fn is_root(&self) -> bool {
        self.base.is_empty()
    }

    /// All segments, parents then base.
    pub fn segments(&self) -> Vec<&str> {
        let mut all: Vec<&str> = self.parents.iter().map(String::as_str).collect();
        if !self.base.is_empty() {
            all.push(&self.base);
        }
        all
    }

    pub fn display(&self) -> String {
        format!("/{}", self.segments().join("/"))
    }
}

/// Canonicalize a decoded request path.
///
/// `.` segments are dropped, `..` pops, repeated slashes collapse. `""` and
/// `/` are the root.
pub fn split_path(path: &str) -> DavPath {
    let mut segments: Vec<String> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name.to_string()),
        }
    }
    let base = segments.pop().unwrap_or_default();
    DavPath {
        parents: segments,
        base,
    }
}

/// Filesystem operations for one server.
#[derive(Clone)]
pub struct DavFs {
    tree: Arc<TreeStore>,
    blobs: Arc<dyn BlobStore>,
    settings: TransferSettings,
}

impl DavFs {
    pub fn new(tree: Arc<TreeStore>, blobs: Arc<dyn BlobStore>, settings: TransferSettings) -> Self {
        Self {
            tree,
            blobs,
            settings,
        }
    }

    pub fn tree(&self) -> &Arc<TreeStore> {
        &self.tree
    }

    fn resolve(&self, owner: OwnerId, path: &DavPath) -> DavResult<Node> {
        Ok(self.tree.resolve_path(owner, &path.segments())?)
    }

    /// Like `resolve`, but a missing final segment is `None`.
    fn lookup(&self, owner: OwnerId, path: &DavPath) -> DavResult<Option<Node>> {
        match self.tree.resolve_path(owner, &path.segments()) {
            Ok(node) => Ok(Some(node)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn parent_of(&self, owner: OwnerId, path: &DavPath) -> DavResult<Directory> {
        match self.tree.find_directory_by_path(owner, &path.parents) {
            Ok(dir) => Ok(dir),
            Err(StoreError::NotFound(_)) => Err(DavError::MissingParent(path.display())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn stat(&self, owner: OwnerId, path: &str) -> DavResult<DavEntry> {
        let path = split_path(path);
        Ok(DavEntry::from(&self.resolve(owner, &path)?))
    }

    /// Children of a collection: directories first, then files, each by name.
    pub fn read_dir(&self, owner: OwnerId, path: &str) -> DavResult<Vec<DavEntry>> {
        let path = split_path(path);
        let dir = match self.resolve(owner, &path)? {
            Node::Directory(dir) => dir,
            Node::File(_) => {
                return Err(StoreError::invalid(format!("{} is not a collection", path.display())).into())
            }
        };
        let mut entries: Vec<DavEntry> = self
            .tree
            .list_directories(owner, dir.id)?
            .iter()
            .map(DavEntry::from)
            .collect();
        entries.extend(self.tree.list_files(owner, dir.id)?.iter().map(DavEntry::from));
        Ok(entries)
    }

    /// Create one collection. The parent must exist.
    pub fn mkcol(&self, owner: OwnerId, path: &str) -> DavResult<DavEntry> {
        let path = split_path(path);
        if path.is_root() {
            return Err(StoreError::name_conflict("/").into());
        }
        let parent = self.parent_of(owner, &path)?;
        let dir = self.tree.create_directory(owner, parent.id, &path.base)?;
        debug!(%owner, path = %path.display(), "mkcol");
        Ok(DavEntry::from(&dir))
    }

    /// Open a file for reading from offset 0.
    pub fn open_read(&self, owner: OwnerId, path: &str) -> DavResult<(DavEntry, Download)> {
        let path = split_path(path);
        match self.resolve(owner, &path)? {
            Node::File(file) => {
                let parts = self.tree.list_parts(file.id)?;
                let download = Download::new(self.blobs.clone(), &file, parts);
                Ok((DavEntry::from(&file), download))
            }
            Node::Directory(_) => Err(DavError::MethodNotAllowed(format!(
                "{} is a collection",
                path.display()
            ))),
        }
    }

    /// Start an upload to `path`. Returns the upload and whether it creates a
    /// new file (`false` when it replaces one in place).
    pub fn open_write(
        &self,
        owner: OwnerId,
        path: &str,
        declared_len: Option<u64>,
        cancel: CancellationToken,
    ) -> DavResult<(Upload, bool)> {
        let path = split_path(path);
        if path.is_root() {
            return Err(StoreError::invalid("cannot write to the root collection").into());
        }
        let parent = self.parent_of(owner, &path)?;
        let (target, created) = match self.lookup(owner, &path)? {
            Some(Node::Directory(_)) => {
                return Err(StoreError::invalid(format!(
                    "{} is a collection",
                    path.display()
                ))
                .into())
            }
            Some(Node::File(file)) => (UploadTarget::Replace { owner, file: file.id }, false),
            None => (
                UploadTarget::Create {
                    owner,
                    dir: parent.id,
                    name: path.base.clone(),
                },
                true,
            ),
        };
        let options = UploadOptions::new(self.settings.channel, self.settings.max_part_size)
            .with_declared_len(declared_len)
            .with_handoff_capacity(self.settings.handoff_capacity);
        let upload = Upload::new(
            self.blobs.clone(),
            self.tree.clone(),
            target,
            options,
            cancel,
        )?;
        Ok((upload, created))
    }

    /// Delete a file, or a collection and everything beneath it.
    pub fn remove(&self, owner: OwnerId, path: &str) -> DavResult<()> {
        let path = split_path(path);
        match self.resolve(owner, &path)? {
            Node::Directory(dir) => self.tree.delete_directory_recursive(owner, dir.id)?,
            Node::File(file) => self.tree.delete_file(owner, file.id)?,
        }
        debug!(%owner, path = %path.display(), "removed");
        Ok(())
    }

    /// Move and/or rename `from` to `to` as one store transaction.
    ///
    /// With `overwrite`, an existing destination file is replaced; an
    /// existing destination collection never is. Nothing changes unless the
    /// whole move succeeds. Returns whether something was overwritten.
    pub fn rename(&self, owner: OwnerId, from: &str, to: &str, overwrite: bool) -> DavResult<bool> {
        let src = split_path(from);
        let dst = split_path(to);
        if src.is_root() || dst.is_root() {
            return Err(StoreError::invalid("cannot move the root collection").into());
        }
        if src == dst {
            return Err(StoreError::invalid("source and destination are the same").into());
        }
        let node = self.resolve(owner, &src)?;
        let parent = self.parent_of(owner, &dst)?;
        let replaced = self
            .tree
            .relocate(owner, node.id(), parent.id, &dst.base, overwrite)?;
        debug!(%owner, from = %src.display(), to = %dst.display(), replaced, "moved");
        Ok(replaced)
    }
}

impl std::fmt::Debug for DavFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DavFs").field("settings", &self.settings).finish()
    }
}
