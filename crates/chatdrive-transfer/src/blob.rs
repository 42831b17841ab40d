//! Remote blob store contract.
//!
//! A blob store holds immutable objects of bounded size addressed by an opaque
//! reference. Uploads are streamed in through a [`PartBody`]; downloads come
//! back as an [`AsyncRead`] starting at any offset.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

use crate::error::TransferResult;
use crate::state::TransferState;

/// Chat that receives uploaded blobs.
pub type StorageChannel = i64;

/// Byte stream for one downloaded blob.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// What the remote store confirmed after an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBlob {
    pub blob_ref: String,
    pub unique_ref: String,
    pub size: u64,
    pub mime_type: String,
}

/// Resolved download location for one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHandle {
    pub blob_ref: String,
    pub location: String,
    pub size: u64,
}

/// Receiving side of the upload hand-off.
///
/// Yields chunks until the writer closes the part. If the transfer is aborted
/// the next read fails with the recorded reason.
pub struct PartBody {
    rx: mpsc::Receiver<Bytes>,
    state: Arc<TransferState>,
}

impl PartBody {
    pub(crate) fn new(rx: mpsc::Receiver<Bytes>, state: Arc<TransferState>) -> Self {
        Self { rx, state }
    }

    /// A detached hand-off, for driving a store directly.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx, Arc::new(TransferState::new())))
    }

    /// Next chunk, or `None` at end of part.
    pub async fn next_chunk(&mut self) -> TransferResult<Option<Bytes>> {
        self.state.check()?;
        tokio::select! {
            biased;
            _ = self.state.cancelled() => Err(self.state.error()),
            chunk = self.rx.recv() => Ok(chunk),
        }
    }

    /// Resolves with the abort reason once the transfer is aborted.
    pub async fn aborted(&self) -> crate::TransferError {
        self.state.cancelled().await;
        self.state.error()
    }
}

impl std::fmt::Debug for PartBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartBody")
            .field("aborted", &self.state.is_aborted())
            .finish()
    }
}

/// Remote store for file content.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Largest single object the store accepts.
    fn max_blob_size(&self) -> u64;

    /// Stream one object into `channel` under `name`.
    async fn upload(
        &self,
        channel: StorageChannel,
        name: &str,
        body: PartBody,
    ) -> TransferResult<UploadedBlob>;

    /// Resolve where a stored object can be downloaded from.
    async fn fetch_handle(&self, blob_ref: &str) -> TransferResult<TransferHandle>;

    /// Read an object starting at `offset`. Offsets past the end read as empty.
    async fn download(&self, handle: &TransferHandle, offset: u64) -> TransferResult<BlobReader>;
}
