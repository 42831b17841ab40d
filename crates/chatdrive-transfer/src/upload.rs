//! Streaming upload that splits a file into bounded remote parts.
//!
//! # Flow
//!
//! The writer pushes chunks into a bounded hand-off feeding one spawned part
//! task, which streams them into [`BlobStore::upload`]. A full hand-off makes
//! the writer wait. When a part reaches `max_part_size` the hand-off is closed,
//! the confirmed blob is recorded, and a new task is started for the next
//! part. Only [`Upload::finish`] touches the tree store, so an upload that is
//! aborted for any reason leaves no file or part rows behind.
//!
//! # Aborts
//!
//! The caller's token, a failed part, a size mismatch, [`Upload::abort`] and
//! dropping the upload all go through [`TransferState::abort`]. A watcher task
//! observes the caller's token while the writer is idle.

use std::sync::Arc;

use bytes::Bytes;
use chatdrive_store::{
    BlobContent, DirId, FileId, FileRecord, NewPart, OwnerId, TreeStore, validate_name,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::blob::{BlobStore, PartBody, StorageChannel, UploadedBlob};
use crate::error::{TransferError, TransferResult};
use crate::state::TransferState;

/// Default hand-off depth in chunks.
pub const DEFAULT_HANDOFF_CAPACITY: usize = 8;

/// Where a finished upload lands in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    /// New file `name` in `dir`.
    Create {
        owner: OwnerId,
        dir: DirId,
        name: String,
    },
    /// Overwrite an existing file's content, keeping its id.
    Replace { owner: OwnerId, file: FileId },
}

/// Tuning for one upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub channel: StorageChannel,
    pub max_part_size: u64,
    pub handoff_capacity: usize,
    /// Content length announced by the client, if any.
    pub declared_len: Option<u64>,
}

impl UploadOptions {
    pub fn new(channel: StorageChannel, max_part_size: u64) -> Self {
        Self {
            channel,
            max_part_size,
            handoff_capacity: DEFAULT_HANDOFF_CAPACITY,
            declared_len: None,
        }
    }

    pub fn with_declared_len(mut self, len: Option<u64>) -> Self {
        self.declared_len = len;
        self
    }

    pub fn with_handoff_capacity(mut self, capacity: usize) -> Self {
        self.handoff_capacity = capacity.max(1);
        self
    }
}

struct PartTransfer {
    index: u32,
    tx: mpsc::Sender<Bytes>,
    task: JoinHandle<TransferResult<UploadedBlob>>,
    written: u64,
}

/// An in-progress upload. Call [`finish`](Self::finish) to commit.
pub struct Upload {
    store: Arc<dyn BlobStore>,
    tree: Arc<TreeStore>,
    target: UploadTarget,
    options: UploadOptions,
    name: String,
    split: bool,
    state: Arc<TransferState>,
    current: Option<PartTransfer>,
    parts: Vec<NewPart>,
    mime_type: Option<String>,
    relayed: u64,
    finished: bool,
    watcher: JoinHandle<()>,
}

impl Upload {
    /// Start an upload. Must be called inside a tokio runtime.
    ///
    /// Fails before any transfer if the target can't exist: a bad name, a
    /// missing directory, or a missing file to replace.
    pub fn new(
        store: Arc<dyn BlobStore>,
        tree: Arc<TreeStore>,
        target: UploadTarget,
        options: UploadOptions,
        cancel: CancellationToken,
    ) -> TransferResult<Self> {
        if options.max_part_size == 0 {
            return Err(TransferError::aborted("max part size must be positive"));
        }
        let name = match &target {
            UploadTarget::Create { owner, dir, name } => {
                validate_name(name)?;
                tree.get_directory(*owner, *dir)?;
                name.clone()
            }
            UploadTarget::Replace { owner, file } => tree.get_file(*owner, *file)?.name,
        };
        let split = options
            .declared_len
            .is_some_and(|len| len > options.max_part_size);

        let state = Arc::new(TransferState::new());
        let watcher = {
            let state = state.clone();
            let name = name.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if state.abort(&TransferError::aborted("cancelled by caller")) {
                            warn!(%name, "upload cancelled");
                        }
                    }
                    _ = state.cancelled() => {}
                }
            })
        };

        debug!(%name, split, declared = ?options.declared_len, max = options.max_part_size, "upload started");
        Ok(Self {
            store,
            tree,
            target,
            options,
            name,
            split,
            state,
            current: None,
            parts: Vec::new(),
            mime_type: None,
            relayed: 0,
            finished: false,
            watcher,
        })
    }

    /// Bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.relayed
    }

    pub fn is_aborted(&self) -> bool {
        self.state.is_aborted()
    }

    /// Relay a chunk, rolling over to a new part at the size ceiling.
    pub async fn write(&mut self, mut data: Bytes) -> TransferResult<()> {
        self.state.check()?;
        while !data.is_empty() {
            if self.current.is_none() {
                self.open_part();
            }
            let written = self.current.as_ref().map_or(0, |part| part.written);
            let room = self.options.max_part_size - written;
            if room == 0 {
                self.close_part().await?;
                continue;
            }
            let take = usize::try_from(room).unwrap_or(usize::MAX).min(data.len());
            let chunk = data.split_to(take);
            self.send(chunk).await?;
        }
        Ok(())
    }

    async fn send(&mut self, chunk: Bytes) -> TransferResult<()> {
        let len = chunk.len() as u64;
        let Some(part) = self.current.as_mut() else {
            return Err(TransferError::aborted("no open part"));
        };
        let sent = tokio::select! {
            biased;
            _ = self.state.cancelled() => return Err(self.state.error()),
            sent = part.tx.send(chunk) => sent,
        };
        if sent.is_err() {
            // The part task stopped reading; its result carries the reason.
            let err = match self.close_part().await {
                Err(e) => e,
                Ok(()) => TransferError::aborted("part transfer ended before its data"),
            };
            self.state.abort(&err);
            return Err(self.state.error());
        }
        if let Some(part) = self.current.as_mut() {
            part.written += len;
        }
        self.relayed += len;
        Ok(())
    }

    fn open_part(&mut self) {
        let index = self.parts.len() as u32;
        let name = if self.split || index > 0 {
            format!("{}.part{index:03}", self.name)
        } else {
            self.name.clone()
        };
        let (tx, rx) = mpsc::channel(self.options.handoff_capacity.max(1));
        let body = PartBody::new(rx, self.state.clone());
        let store = self.store.clone();
        let channel = self.options.channel;
        debug!(part = index, %name, "part transfer started");
        let task = tokio::spawn(async move { store.upload(channel, &name, body).await });
        self.current = Some(PartTransfer {
            index,
            tx,
            task,
            written: 0,
        });
    }

    /// Close the hand-off, wait for the remote confirmation and record it.
    async fn close_part(&mut self) -> TransferResult<()> {
        let Some(part) = self.current.take() else {
            return Ok(());
        };
        let PartTransfer {
            index,
            tx,
            task,
            written,
        } = part;
        drop(tx);

        let outcome = match task.await {
            Ok(result) => result,
            Err(e) => Err(TransferError::aborted(format!("part {index} task failed: {e}"))),
        };
        let blob = match outcome {
            Ok(blob) => blob,
            Err(e) => {
                self.state.abort(&e);
                return Err(self.state.error());
            }
        };
        if blob.size != written {
            let err = TransferError::aborted(format!(
                "part {index} confirmed {} bytes but {written} were sent",
                blob.size
            ));
            self.state.abort(&err);
            return Err(self.state.error());
        }
        debug!(part = index, size = blob.size, blob = %blob.blob_ref, "part transfer complete");
        if self.mime_type.is_none() {
            self.mime_type = Some(blob.mime_type.clone());
        }
        self.parts.push(NewPart {
            index,
            blob_ref: blob.blob_ref,
            unique_ref: blob.unique_ref,
            size: blob.size,
        });
        Ok(())
    }

    /// Abort the upload. Nothing is committed; later calls are no-ops.
    pub fn abort(&mut self, reason: &str) {
        if self.state.abort(&TransferError::aborted(reason)) {
            warn!(name = %self.name, reason, "upload aborted");
        }
        if let Some(part) = self.current.take() {
            part.task.abort();
        }
    }

    /// Flush the last part and commit the file.
    pub async fn finish(mut self) -> TransferResult<FileRecord> {
        self.state.check()?;
        if self.current.is_none() && self.parts.is_empty() {
            // Zero bytes still produce one (empty) remote object.
            self.open_part();
        }
        self.close_part().await?;
        self.state.check()?;

        let total: u64 = self.parts.iter().map(|p| p.size).sum();
        if total != self.relayed {
            let err = TransferError::aborted(format!(
                "confirmed {total} bytes but {} were relayed",
                self.relayed
            ));
            self.state.abort(&err);
            return Err(self.state.error());
        }
        let Some(first) = self.parts.first() else {
            return Err(TransferError::aborted("no parts transferred"));
        };
        let content = BlobContent::new(
            first.blob_ref.clone(),
            first.unique_ref.clone(),
            total,
            self.mime_type.clone().unwrap_or_default(),
        );
        let parts: &[NewPart] = if self.parts.len() > 1 { &self.parts } else { &[] };

        let committed = match &self.target {
            UploadTarget::Create { owner, dir, name } => {
                self.tree
                    .create_file_with_parts(*owner, *dir, name, &content, parts)
            }
            UploadTarget::Replace { owner, file } => {
                self.tree
                    .replace_file_with_parts(*owner, *file, &content, parts)
            }
        };
        let record = match committed {
            Ok(record) => record,
            Err(e) => {
                let err = TransferError::from(e);
                self.state.abort(&err);
                return Err(err);
            }
        };

        self.finished = true;
        info!(name = %self.name, file = %record.id, size = total, parts = self.parts.len(), "upload committed");
        Ok(record)
    }
}

impl Drop for Upload {
    fn drop(&mut self) {
        if !self.finished {
            self.abort("upload dropped before finish");
        }
        self.watcher.abort();
    }
}

impl std::fmt::Debug for Upload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upload")
            .field("target", &self.target)
            .field("name", &self.name)
            .field("parts", &self.parts.len())
            .field("relayed", &self.relayed)
            .field("aborted", &self.state.is_aborted())
            .finish()
    }
}
