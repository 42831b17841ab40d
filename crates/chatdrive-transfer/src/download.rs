//! Seekable reassembly of a file from its remote parts.

use std::io::{self, SeekFrom};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chatdrive_store::{FileRecord, Part};
use futures::stream::{self, Stream};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::blob::{BlobReader, BlobStore, TransferHandle};
use crate::error::{TransferError, TransferResult};

/// Read size used by [`Download::into_stream`].
pub const STREAM_CHUNK: usize = 64 * 1024;

#[derive(Debug)]
struct Segment {
    blob_ref: String,
    size: u64,
    handle: Option<TransferHandle>,
}

/// A cursor over a file's bytes.
///
/// Parts are read in index order. Transfer handles are fetched the first time
/// a part is touched and kept for the life of the cursor.
pub struct Download {
    store: Arc<dyn BlobStore>,
    segments: Vec<Segment>,
    total: u64,
    pos: u64,
    index: usize,
    offset_in_part: u64,
    reader: Option<BlobReader>,
}

impl Download {
    /// Build a cursor for `file`. An empty `parts` means the file's own blob
    /// reference holds all of its bytes.
    pub fn new(store: Arc<dyn BlobStore>, file: &FileRecord, parts: Vec<Part>) -> Self {
        let segments: Vec<Segment> = if parts.is_empty() {
            vec![Segment {
                blob_ref: file.blob_ref.clone(),
                size: file.size,
                handle: None,
            }]
        } else {
            parts
                .into_iter()
                .map(|p| Segment {
                    blob_ref: p.blob_ref,
                    size: p.size,
                    handle: None,
                })
                .collect()
        };
        let total = segments.iter().map(|s| s.size).sum();
        Self {
            store,
            segments,
            total,
            pos: 0,
            index: 0,
            offset_in_part: 0,
            reader: None,
        }
    }

    /// Total size in bytes.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Reposition the cursor. Positions past the end read as EOF.
    pub fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let absolute = match target {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.total.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start"))?;

        self.reader = None;
        self.pos = absolute;
        self.index = self.segments.len();
        self.offset_in_part = 0;

        let mut start = 0u64;
        for (i, segment) in self.segments.iter().enumerate() {
            if absolute < start + segment.size {
                self.index = i;
                self.offset_in_part = absolute - start;
                break;
            }
            start += segment.size;
        }
        Ok(absolute)
    }

    /// Read into `buf`, returning 0 only at end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> TransferResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let Some(segment) = self.segments.get(self.index) else {
                return Ok(0);
            };
            let remaining = segment.size - self.offset_in_part.min(segment.size);
            if remaining == 0 {
                self.index += 1;
                self.offset_in_part = 0;
                self.reader = None;
                continue;
            }

            if self.reader.is_none() {
                let reader = self.open_current().await?;
                self.reader = Some(reader);
            }
            let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
            let Some(reader) = self.reader.as_mut() else {
                continue;
            };
            let n = reader.read(&mut buf[..want]).await?;
            if n == 0 {
                let index = self.index;
                self.reader = None;
                return Err(TransferError::aborted(format!(
                    "part {index} ended early at {} of {} bytes",
                    self.offset_in_part,
                    self.segments[index].size
                )));
            }
            self.offset_in_part += n as u64;
            self.pos += n as u64;
            return Ok(n);
        }
    }

    async fn open_current(&mut self) -> TransferResult<BlobReader> {
        let segment = &mut self.segments[self.index];
        let handle = match &segment.handle {
            Some(handle) => handle.clone(),
            None => {
                let handle = self.store.fetch_handle(&segment.blob_ref).await?;
                segment.handle = Some(handle.clone());
                handle
            }
        };
        debug!(part = self.index, offset = self.offset_in_part, blob = %handle.blob_ref, "opening part");
        self.store.download(&handle, self.offset_in_part).await
    }

    /// Read everything from the current position to the end.
    pub async fn read_to_end(&mut self) -> TransferResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.total.saturating_sub(self.pos) as usize);
        let mut buf = vec![0u8; STREAM_CHUNK];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Stream at most `limit` bytes from the current position.
    pub fn into_stream(self, limit: u64) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::try_unfold((self, limit), |(mut download, left)| async move {
            if left == 0 {
                return Ok(None);
            }
            let want = STREAM_CHUNK.min(usize::try_from(left).unwrap_or(usize::MAX));
            let mut buf = BytesMut::zeroed(want);
            let n = match download.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => return Err(io::Error::from(e)),
            };
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);
            Ok(Some((buf.freeze(), (download, left - n as u64))))
        })
    }
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("parts", &self.segments.len())
            .field("total", &self.total)
            .field("pos", &self.pos)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::PartBody;
    use crate::memory::MemoryBlobStore;
    use chatdrive_store::{DirId, FileId, OwnerId};

    async fn store_blob(store: &MemoryBlobStore, data: &[u8]) -> String {
        let (tx, body) = PartBody::channel(1);
        let chunk = Bytes::copy_from_slice(data);
        let sender = tokio::spawn(async move {
            let _ = tx.send(chunk).await;
        });
        let blob = store.upload(1, "blob", body).await.unwrap();
        sender.await.unwrap();
        blob.blob_ref
    }

    fn file(blob_ref: &str, size: u64) -> FileRecord {
        FileRecord {
            id: FileId(1),
            owner: OwnerId(1),
            dir_id: DirId(1),
            name: "f".into(),
            blob_ref: blob_ref.into(),
            unique_ref: "u".into(),
            size,
            mime_type: "application/octet-stream".into(),
            created_at: 0,
        }
    }

    /// Store `data` as parts of `part_size` bytes.
    async fn multipart(store: &Arc<MemoryBlobStore>, data: &[u8], part_size: usize) -> Download {
        let mut parts = Vec::new();
        for (i, chunk) in data.chunks(part_size).enumerate() {
            let blob_ref = store_blob(store, chunk).await;
            parts.push(Part {
                id: i as i64,
                file_id: FileId(1),
                index: i as u32,
                blob_ref,
                unique_ref: format!("u{i}"),
                size: chunk.len() as u64,
                created_at: 0,
            });
        }
        let record = file(&parts[0].blob_ref, data.len() as u64);
        Download::new(store.clone(), &record, parts)
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_single_blob_reads_whole_file() {
        let store = Arc::new(MemoryBlobStore::new(1024));
        let blob_ref = store_blob(&store, b"hello").await;
        let mut download = Download::new(store.clone(), &file(&blob_ref, 5), vec![]);
        assert_eq!(download.read_to_end().await.unwrap(), b"hello");
        assert_eq!(download.read(&mut [0u8; 4]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_seek_matches_sequential_read_at_every_offset() {
        let store = Arc::new(MemoryBlobStore::new(8));
        let data = sample(8 * 3 + 1);
        let mut whole = multipart(&store, &data, 8).await;
        assert_eq!(whole.read_to_end().await.unwrap(), data);

        for offset in 0..=data.len() {
            let mut download = multipart(&store, &data, 8).await;
            assert_eq!(download.seek(SeekFrom::Start(offset as u64)).unwrap(), offset as u64);
            let tail = download.read_to_end().await.unwrap();
            assert_eq!(tail, &data[offset..], "offset {offset}");
        }
    }

    #[tokio::test]
    async fn test_seek_into_third_part() {
        // 3M+1 bytes with M = 8: seeking to 2M+5 lands at byte 5 of part 2
        let store = Arc::new(MemoryBlobStore::new(8));
        let data = sample(25);
        let mut download = multipart(&store, &data, 8).await;
        download.seek(SeekFrom::Start(21)).unwrap();
        let mut buf = [0u8; 3];
        let n = download.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &data[21..21 + n]);
        assert_eq!(download.position(), 21 + n as u64);
    }

    #[tokio::test]
    async fn test_seek_relative_and_negative() {
        let store = Arc::new(MemoryBlobStore::new(8));
        let data = sample(20);
        let mut download = multipart(&store, &data, 8).await;

        assert_eq!(download.seek(SeekFrom::End(-4)).unwrap(), 16);
        assert_eq!(download.seek(SeekFrom::Current(-6)).unwrap(), 10);
        assert_eq!(download.read_to_end().await.unwrap(), &data[10..]);

        let err = download.seek(SeekFrom::Current(-100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        download.seek(SeekFrom::Start(500)).unwrap();
        assert_eq!(download.read(&mut [0u8; 8]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handles_cached_per_part() {
        let store = Arc::new(MemoryBlobStore::new(4));
        let data = sample(12);
        let mut download = multipart(&store, &data, 4).await;
        let before = store.handle_fetches();

        download.read_to_end().await.unwrap();
        download.seek(SeekFrom::Start(0)).unwrap();
        download.read_to_end().await.unwrap();
        assert_eq!(store.handle_fetches() - before, 3);
    }

    #[tokio::test]
    async fn test_short_part_is_an_error() {
        let store = Arc::new(MemoryBlobStore::new(4));
        let data = sample(12);
        let mut download = multipart(&store, &data, 4).await;
        assert!(store.truncate(&download.segments[1].blob_ref, 2));

        let err = download.read_to_end().await.unwrap_err();
        assert!(err.is_aborted(), "{err}");
    }

    #[tokio::test]
    async fn test_into_stream_respects_limit() {
        use futures::TryStreamExt;

        let store = Arc::new(MemoryBlobStore::new(8));
        let data = sample(30);
        let mut download = multipart(&store, &data, 8).await;
        download.seek(SeekFrom::Start(5)).unwrap();

        let chunks: Vec<Bytes> = download.into_stream(12).try_collect().await.unwrap();
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, &data[5..17]);
    }
}
