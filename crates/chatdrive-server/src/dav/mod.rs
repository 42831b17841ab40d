//! WebDAV over HTTP/1.1.
//!
//! [`DavFs`] maps paths onto the tree store and transfer engine;
//! [`DavHandler`] turns requests into `DavFs` calls; [`DavServer`] accepts
//! connections and drives hyper.

pub mod error;
pub mod fs;
pub mod handlers;
pub mod parse;
pub mod xml;

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use chatdrive_store::{StoreError, TreeStore};
use chatdrive_transfer::BlobStore;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;

pub use error::{DavError, DavResult};
pub use fs::{DavEntry, DavFs, DavPath, TransferSettings, split_path};
pub use handlers::{DavBody, DavHandler};

/// Methods served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum DavMethod {
    Options,
    Propfind,
    Get,
    Head,
    Put,
    Mkcol,
    Delete,
    Move,
}

/// A memory blob store starts empty on every run, so it can only back a
/// database that doesn't reference stored content yet.
pub fn check_memory_blobs(tree: &TreeStore) -> DavResult<()> {
    let files = tree.count_files()?;
    if files > 0 {
        return Err(StoreError::invalid(format!(
            "database holds {files} files but the memory blob store is empty; use a fresh database"
        ))
        .into());
    }
    Ok(())
}

/// WebDAV server
pub struct DavServer {
    config: ServerConfig,
    handler: Arc<DavHandler>,
}

impl DavServer {
    pub fn new(config: ServerConfig, tree: Arc<TreeStore>, blobs: Arc<dyn BlobStore>) -> Self {
        let ceiling = blobs.max_blob_size();
        let settings = TransferSettings {
            channel: config.storage_channel,
            max_part_size: config.max_part_size.map_or(ceiling, |m| m.min(ceiling)),
            handoff_capacity: config.handoff_capacity,
        };
        let fs = DavFs::new(tree, blobs, settings);
        let handler = DavHandler::new(fs, config.realm.clone(), config.auth_rejection_delay());
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    pub fn handler(&self) -> Arc<DavHandler> {
        self.handler.clone()
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> io::Result<()> {
        let listener = TcpListener::bind(self.config.listen).await?;
        info!("WebDAV listening on {}", listener.local_addr()?);
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> io::Result<()> {
        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("WebDAV server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                },
            };

            let handler = self.handler.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler.handle(req).await) }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    debug!(%peer, "connection ended: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names() {
        assert_eq!("PROPFIND".parse::<DavMethod>().unwrap(), DavMethod::Propfind);
        assert_eq!("MKCOL".parse::<DavMethod>().unwrap(), DavMethod::Mkcol);
        assert_eq!(DavMethod::Move.to_string(), "MOVE");
        assert!("COPY".parse::<DavMethod>().is_err());
        assert!("LOCK".parse::<DavMethod>().is_err());
    }

    #[test]
    fn test_memory_blobs_need_empty_database() {
        let tree = TreeStore::in_memory().unwrap();
        let root = tree.ensure_owner_root(chatdrive_store::OwnerId(1)).unwrap();
        check_memory_blobs(&tree).unwrap();

        let content = chatdrive_store::BlobContent::new("mem-1", "u1", 3, "text/plain");
        tree.create_file(chatdrive_store::OwnerId(1), root, "old.txt", &content)
            .unwrap();
        let err = check_memory_blobs(&tree).unwrap_err();
        assert!(err.to_string().contains("1 files"), "{err}");
    }
}
