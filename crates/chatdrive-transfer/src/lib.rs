//! Chunked transfer engine for chatdrive.
//!
//! Remote blob stores cap the size of a single object. Files above the cap
//! are split into ordered parts on upload ([`Upload`]) and stitched back into
//! one seekable stream on download ([`Download`]). Bytes are relayed straight
//! between the client and the remote store through a bounded hand-off and are
//! never spooled to local disk.
//!
//! The remote store is abstracted by [`BlobStore`]; [`MemoryBlobStore`] is the
//! in-process implementation.

pub mod blob;
pub mod download;
pub mod error;
pub mod memory;
pub mod state;
pub mod upload;

pub use blob::{BlobReader, BlobStore, PartBody, StorageChannel, TransferHandle, UploadedBlob};
pub use download::Download;
pub use error::{TransferError, TransferResult};
pub use memory::{DEFAULT_MAX_BLOB_SIZE, MemoryBlobStore, mime_for_name};
pub use state::TransferState;
pub use upload::{DEFAULT_HANDOFF_CAPACITY, Upload, UploadOptions, UploadTarget};
