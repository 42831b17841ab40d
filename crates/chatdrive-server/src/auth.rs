//! HTTP Basic authentication against tree store credentials.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chatdrive_store::{OwnerId, StoreError, TreeStore};
use http::HeaderMap;
use tracing::warn;

use crate::dav::error::{DavError, DavResult};

/// Username and password from an `Authorization: Basic` header.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Decode a `Basic` authorization value. Anything else is `None`.
pub fn parse_basic(value: &str) -> Option<BasicCredentials> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Resolve the request's credentials to an owner.
///
/// Every failure short of a storage fault is `Unauthorized`, so callers can't
/// tell an unknown user from a wrong password.
pub fn authenticate(tree: &TreeStore, headers: &HeaderMap) -> DavResult<OwnerId> {
    let creds = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic)
        .ok_or(DavError::Unauthorized)?;

    let owner = match tree.owner_by_username(&creds.username) {
        Ok(owner) => owner,
        Err(StoreError::NotFound(_)) => {
            warn!(username = %creds.username, "login for unknown user");
            return Err(DavError::Unauthorized);
        }
        Err(e) => return Err(e.into()),
    };
    if !tree.verify_password(owner, &creds.password)? {
        warn!(username = %creds.username, %owner, "bad password");
        return Err(DavError::Unauthorized);
    }
    Ok(owner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn header(user: &str, pass: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")));
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_str(&value).unwrap(),
        );
        headers
    }

    #[test]
    fn test_parse_basic() {
        let creds = parse_basic("Basic YWxpY2U6czNjcjN0OndpdGg6Y29sb25z").unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "s3cr3t:with:colons");

        assert!(parse_basic("Bearer abc").is_none());
        assert!(parse_basic("Basic !!!").is_none());
        assert!(parse_basic("Basic bm9jb2xvbg==").is_none());
    }

    #[test]
    fn test_authenticate() {
        let tree = TreeStore::in_memory().unwrap();
        tree.ensure_owner_root(OwnerId(1)).unwrap();
        tree.upsert_profile(OwnerId(1), "alice").unwrap();
        tree.set_password(OwnerId(1), "pw").unwrap();

        assert_eq!(authenticate(&tree, &header("Alice", "pw")).unwrap(), OwnerId(1));
        assert!(matches!(
            authenticate(&tree, &header("alice", "nope")),
            Err(DavError::Unauthorized)
        ));
        assert!(matches!(
            authenticate(&tree, &header("mallory", "pw")),
            Err(DavError::Unauthorized)
        ));
        assert!(matches!(
            authenticate(&tree, &HeaderMap::new()),
            Err(DavError::Unauthorized)
        ));
    }

    #[test]
    fn test_user_without_password_is_rejected() {
        let tree = TreeStore::in_memory().unwrap();
        tree.ensure_owner_root(OwnerId(2)).unwrap();
        tree.upsert_profile(OwnerId(2), "bob").unwrap();
        assert!(matches!(
            authenticate(&tree, &header("bob", "")),
            Err(DavError::Unauthorized)
        ));
    }
}
