//! chatdrive server library
//!
//! WebDAV front end over the chatdrive tree store and transfer engine.

pub mod auth;
pub mod config;
pub mod constants;
pub mod dav;

pub use auth::{BasicCredentials, authenticate, parse_basic};
pub use config::{ConfigError, ServerConfig};
pub use dav::{
    DavBody, DavError, DavFs, DavHandler, DavMethod, DavServer, TransferSettings,
    check_memory_blobs,
};
