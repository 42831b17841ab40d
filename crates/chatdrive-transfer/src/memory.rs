//! In-memory blob store.
//!
//! Content lives in a concurrent map for the life of the process. Faults can
//! be injected to exercise the engine's abort paths.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use rand::RngCore;
use tracing::debug;

use crate::blob::{BlobReader, BlobStore, PartBody, StorageChannel, TransferHandle, UploadedBlob};
use crate::error::{TransferError, TransferResult};

/// Per-object ceiling of the chat storage backend (2 GiB).
pub const DEFAULT_MAX_BLOB_SIZE: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
struct StoredBlob {
    channel: StorageChannel,
    name: String,
    data: Bytes,
}

/// Blob store backed by a `DashMap`.
#[derive(Debug)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, StoredBlob>,
    max_blob_size: u64,
    next_id: AtomicU64,
    uploads: AtomicUsize,
    handle_fetches: AtomicUsize,
    /// 1-based upload ordinal that fails; 0 disables.
    fail_upload_at: AtomicUsize,
    stall_uploads: AtomicBool,
    misreport_sizes: AtomicBool,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BLOB_SIZE)
    }
}

impl MemoryBlobStore {
    pub fn new(max_blob_size: u64) -> Self {
        Self {
            blobs: DashMap::new(),
            max_blob_size,
            next_id: AtomicU64::new(1),
            uploads: AtomicUsize::new(0),
            handle_fetches: AtomicUsize::new(0),
            fail_upload_at: AtomicUsize::new(0),
            stall_uploads: AtomicBool::new(false),
            misreport_sizes: AtomicBool::new(false),
        }
    }

    /// Fail the `n`th upload from now on (1-based).
    pub fn fail_upload(&self, n: usize) {
        let done = self.uploads.load(Ordering::SeqCst);
        self.fail_upload_at.store(done + n, Ordering::SeqCst);
    }

    /// Hold every upload open until its transfer is aborted.
    pub fn stall_uploads(&self, stall: bool) {
        self.stall_uploads.store(stall, Ordering::SeqCst);
    }

    /// Confirm one byte more than was received.
    pub fn misreport_sizes(&self, on: bool) {
        self.misreport_sizes.store(on, Ordering::SeqCst);
    }

    /// Cut a stored object short, simulating a remote that drops bytes.
    pub fn truncate(&self, blob_ref: &str, len: usize) -> bool {
        match self.blobs.get_mut(blob_ref) {
            Some(mut blob) => {
                let keep = len.min(blob.data.len());
                blob.data.truncate(keep);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, blob_ref: &str) -> Option<Bytes> {
        self.blobs.get(blob_ref).map(|b| b.data.clone())
    }

    /// Stored object name, as the chat would display it.
    pub fn name_of(&self, blob_ref: &str) -> Option<String> {
        self.blobs.get(blob_ref).map(|b| b.name.clone())
    }

    pub fn channel_of(&self, blob_ref: &str) -> Option<StorageChannel> {
        self.blobs.get(blob_ref).map(|b| b.channel)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Number of `fetch_handle` calls served.
    pub fn handle_fetches(&self) -> usize {
        self.handle_fetches.load(Ordering::SeqCst)
    }
}

/// Guess a content type from the object name's extension.
///
/// A trailing `.partNNN` is ignored so every part of a split file reports the
/// whole file's type.
pub fn mime_for_name(name: &str) -> &'static str {
    let name = match name.rsplit_once(".part") {
        Some((stem, index)) if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) => {
            stem
        }
        _ => name,
    };
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "md" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => chatdrive_store::DEFAULT_MIME_TYPE,
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn max_blob_size(&self) -> u64 {
        self.max_blob_size
    }

    async fn upload(
        &self,
        channel: StorageChannel,
        name: &str,
        mut body: PartBody,
    ) -> TransferResult<UploadedBlob> {
        let ordinal = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        if ordinal == self.fail_upload_at.load(Ordering::SeqCst) {
            return Err(TransferError::remote(format!("injected failure on upload {ordinal}")));
        }
        if self.stall_uploads.load(Ordering::SeqCst) {
            return Err(body.aborted().await);
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next_chunk().await? {
            let size = (buf.len() + chunk.len()) as u64;
            if size > self.max_blob_size {
                return Err(TransferError::TooLarge {
                    size,
                    max: self.max_blob_size,
                });
            }
            buf.extend_from_slice(&chunk);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut unique = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut unique);
        let blob_ref = format!("mem-{channel}-{id}");
        let data = buf.freeze();
        let mut size = data.len() as u64;
        if self.misreport_sizes.load(Ordering::SeqCst) {
            size += 1;
        }
        debug!(%blob_ref, name, size, "stored blob");
        self.blobs.insert(
            blob_ref.clone(),
            StoredBlob {
                channel,
                name: name.to_string(),
                data,
            },
        );
        Ok(UploadedBlob {
            blob_ref,
            unique_ref: hex::encode(unique),
            size,
            mime_type: mime_for_name(name).to_string(),
        })
    }

    async fn fetch_handle(&self, blob_ref: &str) -> TransferResult<TransferHandle> {
        self.handle_fetches.fetch_add(1, Ordering::SeqCst);
        let blob = self
            .blobs
            .get(blob_ref)
            .ok_or_else(|| TransferError::remote(format!("no such blob: {blob_ref}")))?;
        Ok(TransferHandle {
            blob_ref: blob_ref.to_string(),
            location: format!("memory://{}/{blob_ref}", blob.channel),
            size: blob.data.len() as u64,
        })
    }

    async fn download(&self, handle: &TransferHandle, offset: u64) -> TransferResult<BlobReader> {
        let data = self
            .blobs
            .get(&handle.blob_ref)
            .map(|b| b.data.clone())
            .ok_or_else(|| TransferError::remote(format!("no such blob: {}", handle.blob_ref)))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        Ok(Box::pin(std::io::Cursor::new(data.slice(start..))))
    }
}
