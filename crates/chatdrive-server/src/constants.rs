//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default WebDAV port.
pub const DEFAULT_DAV_PORT: u16 = 8081;

/// Default Basic-auth realm.
pub const DEFAULT_REALM: &str = "chatdrive";

/// Delay before answering a failed login.
pub const AUTH_REJECTION_DELAY: Duration = Duration::from_secs(1);

/// Environment variable read by `set-password`.
pub const PASSWORD_ENV: &str = "CHATDRIVE_PASSWORD";

/// Methods advertised in `Allow`.
pub const ALLOWED_METHODS: &str = "OPTIONS, PROPFIND, GET, HEAD, PUT, MKCOL, DELETE, MOVE";
