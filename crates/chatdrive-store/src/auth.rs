//! Transport usernames and salted password credentials.

use rand::RngCore;
use rusqlite::{OptionalExtension, params};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::db::{TreeStore, now};
use crate::error::{StoreError, StoreResult};
use crate::types::{OwnerId, Profile};

const SALT_LEN: usize = 16;

fn hash_password(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl TreeStore {
    /// Bind `username` to `owner`, taking it over from any other owner.
    ///
    /// Usernames match case-insensitively; the latest spelling is kept.
    pub fn upsert_profile(&self, owner: OwnerId, username: &str) -> StoreResult<Profile> {
        let username = username.trim();
        if username.is_empty() {
            return Err(StoreError::invalid("empty username"));
        }
        let lower = username.to_lowercase();
        self.transaction(|tx| {
            crate::tree::root_id(tx, owner)?;
            let taken_from = tx.execute(
                "DELETE FROM profiles WHERE username_lower = ?1 AND owner_id != ?2",
                params![lower, owner],
            )?;
            let ts = now();
            tx.execute(
                "INSERT INTO profiles (owner_id, username, username_lower, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(owner_id) DO UPDATE SET
                    username = excluded.username,
                    username_lower = excluded.username_lower,
                    updated_at = excluded.updated_at",
                params![owner, username, lower, ts],
            )?;
            if taken_from > 0 {
                info!(%owner, username, "username reassigned");
            }
            Ok(Profile {
                owner,
                username: username.to_string(),
                updated_at: ts,
            })
        })
    }

    /// Resolve a transport username to its owner.
    pub fn owner_by_username(&self, username: &str) -> StoreResult<OwnerId> {
        let lower = username.trim().to_lowercase();
        self.transaction(|tx| {
            tx.query_row(
                "SELECT owner_id FROM profiles WHERE username_lower = ?1",
                params![lower],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(format!("user {username}")))
        })
    }

    pub fn list_profiles(&self) -> StoreResult<Vec<Profile>> {
        self.transaction(|tx| {
            let mut stmt = tx.prepare(
                "SELECT owner_id, username, updated_at FROM profiles ORDER BY username_lower",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(Profile {
                    owner: row.get(0)?,
                    username: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Store a fresh salted hash for the owner's password.
    pub fn set_password(&self, owner: OwnerId, password: &str) -> StoreResult<()> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let hash = hash_password(&salt, password);
        self.transaction(|tx| {
            crate::tree::root_id(tx, owner)?;
            tx.execute(
                "INSERT INTO credentials (owner_id, password_salt, password_hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(owner_id) DO UPDATE SET
                    password_salt = excluded.password_salt,
                    password_hash = excluded.password_hash,
                    updated_at = excluded.updated_at",
                params![owner, hex::encode(salt), hash, now()],
            )?;
            debug!(%owner, "password updated");
            Ok(())
        })
    }

    pub fn has_password(&self, owner: OwnerId) -> StoreResult<bool> {
        self.transaction(|tx| {
            Ok(tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM credentials WHERE owner_id = ?1)",
                params![owner],
                |row| row.get(0),
            )?)
        })
    }

    /// Check a password in constant time. Owners without a credential never verify.
    pub fn verify_password(&self, owner: OwnerId, password: &str) -> StoreResult<bool> {
        let stored = self.transaction(|tx| {
            Ok(tx
                .query_row(
                    "SELECT password_salt, password_hash FROM credentials WHERE owner_id = ?1",
                    params![owner],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?)
        })?;
        let Some((salt_hex, hash_hex)) = stored else {
            return Ok(false);
        };
        let salt = hex::decode(&salt_hex)
            .map_err(|e| StoreError::corrupt(format!("password salt for owner {owner}: {e}")))?;
        let candidate = hash_password(&salt, password);
        Ok(candidate.as_bytes().ct_eq(hash_hex.as_bytes()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_lookup_is_case_insensitive() {
        let store = TreeStore::in_memory().unwrap();
        store.ensure_owner_root(OwnerId(1)).unwrap();
        store.upsert_profile(OwnerId(1), "Alice").unwrap();

        assert_eq!(store.owner_by_username("alice").unwrap(), OwnerId(1));
        assert_eq!(store.owner_by_username("ALICE").unwrap(), OwnerId(1));
        assert!(store.owner_by_username("bob").unwrap_err().is_not_found());
    }

    #[test]
    fn test_upsert_profile_takes_over_username() {
        let store = TreeStore::in_memory().unwrap();
        store.ensure_owner_root(OwnerId(1)).unwrap();
        store.ensure_owner_root(OwnerId(2)).unwrap();

        store.upsert_profile(OwnerId(1), "carol").unwrap();
        store.upsert_profile(OwnerId(2), "Carol").unwrap();
        assert_eq!(store.owner_by_username("carol").unwrap(), OwnerId(2));

        let profiles = store.list_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].username, "Carol");

        // Renaming an owner replaces their previous username
        store.upsert_profile(OwnerId(2), "dave").unwrap();
        assert!(store.owner_by_username("carol").unwrap_err().is_not_found());
    }

    #[test]
    fn test_profile_requires_owner() {
        let store = TreeStore::in_memory().unwrap();
        assert!(store.upsert_profile(OwnerId(3), "eve").unwrap_err().is_not_found());
        assert!(store.upsert_profile(OwnerId(3), "  ").unwrap_err().is_invalid());
    }

    #[test]
    fn test_password_verify() {
        let store = TreeStore::in_memory().unwrap();
        let owner = OwnerId(4);
        store.ensure_owner_root(owner).unwrap();

        assert!(!store.has_password(owner).unwrap());
        assert!(!store.verify_password(owner, "").unwrap());

        store.set_password(owner, "hunter2").unwrap();
        assert!(store.has_password(owner).unwrap());
        assert!(store.verify_password(owner, "hunter2").unwrap());
        assert!(!store.verify_password(owner, "hunter3").unwrap());

        store.set_password(owner, "changed").unwrap();
        assert!(!store.verify_password(owner, "hunter2").unwrap());
        assert!(store.verify_password(owner, "changed").unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let store = TreeStore::in_memory().unwrap();
        for id in [1, 2] {
            store.ensure_owner_root(OwnerId(id)).unwrap();
            store.set_password(OwnerId(id), "same").unwrap();
        }
        let hashes: Vec<String> = store
            .transaction(|tx| {
                let mut stmt = tx.prepare("SELECT password_hash FROM credentials")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .unwrap();
        assert_eq!(hashes.len(), 2);
        assert_ne!(hashes[0], hashes[1]);
    }
}
