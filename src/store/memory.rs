//! In-memory user, token and permission store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::store::token::{generate_plaintext, hash_plaintext, TokenScope};
use crate::store::{AccountStore, PermissionStore, Permissions, StoreError, User, UserStore};

#[derive(Debug, Clone)]
struct TokenRecord {
    user_id: i64,
    scope: TokenScope,
    expiry: SystemTime,
}

/// A thread-safe store keeping users, hashed tokens and permissions in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<DashMap<i64, User>>,
    tokens: Arc<DashMap<[u8; 32], TokenRecord>>,
    permissions: Arc<DashMap<i64, HashSet<String>>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and return it with its assigned id.
    pub fn insert_user(&self, name: &str, email: &str, activated: bool) -> User {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let user = User {
            id,
            name: name.to_string(),
            email: email.to_string(),
            activated,
        };
        self.users.insert(id, user.clone());
        user
    }

    /// Issue a new token for `user_id`, returning the plaintext.
    ///
    /// Only the SHA-256 hash of the plaintext is retained.
    pub fn issue_token(&self, user_id: i64, scope: TokenScope, ttl: Duration) -> Result<String, StoreError> {
        if !self.users.contains_key(&user_id) {
            return Err(StoreError::RecordNotFound);
        }

        let plaintext = generate_plaintext();
        self.tokens.insert(
            hash_plaintext(&plaintext),
            TokenRecord {
                user_id,
                scope,
                expiry: SystemTime::now() + ttl,
            },
        );
        Ok(plaintext)
    }

    pub fn add_permissions<I, S>(&self, user_id: i64, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .entry(user_id)
            .or_default()
            .extend(codes.into_iter().map(Into::into));
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_for_token(&self, scope: TokenScope, plaintext: &str) -> Result<User, StoreError> {
        let hash = hash_plaintext(plaintext);
        let user_id = {
            let record = self.tokens.get(&hash).ok_or(StoreError::RecordNotFound)?;
            if record.scope != scope || record.expiry <= SystemTime::now() {
                return Err(StoreError::RecordNotFound);
            }
            record.user_id
        };

        self.users
            .get(&user_id)
            .map(|user| user.value().clone())
            .ok_or(StoreError::RecordNotFound)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn activate(&self, user_id: i64) -> Result<User, StoreError> {
        let mut user = self.users.get_mut(&user_id).ok_or(StoreError::RecordNotFound)?;
        user.activated = true;
        Ok(user.value().clone())
    }

    async fn delete_all_tokens(&self, scope: TokenScope, user_id: i64) -> Result<(), StoreError> {
        self.tokens
            .retain(|_, record| !(record.user_id == user_id && record.scope == scope));
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions, StoreError> {
        Ok(self
            .permissions
            .get(&user_id)
            .map(|codes| Permissions::new(codes.iter().cloned()))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_token_lookup() {
        let store = MemoryStore::new();
        let user = store.insert_user("Alice", "alice@example.com", true);
        let token = store.issue_token(user.id, TokenScope::Authentication, HOUR).unwrap();

        let found = store.get_for_token(TokenScope::Authentication, &token).await.unwrap();
        assert_eq!(found, user);
    }

    #[tokio::test]
    async fn test_scope_mismatch_is_not_found() {
        let store = MemoryStore::new();
        let user = store.insert_user("Alice", "alice@example.com", true);
        let token = store.issue_token(user.id, TokenScope::Activation, HOUR).unwrap();

        let err = store.get_for_token(TokenScope::Authentication, &token).await.unwrap_err();
        assert_eq!(err, StoreError::RecordNotFound);
    }

    #[tokio::test]
    async fn test_expired_token_is_not_found() {
        let store = MemoryStore::new();
        let user = store.insert_user("Alice", "alice@example.com", true);
        let token = store
            .issue_token(user.id, TokenScope::Authentication, Duration::ZERO)
            .unwrap();

        let err = store.get_for_token(TokenScope::Authentication, &token).await.unwrap_err();
        assert_eq!(err, StoreError::RecordNotFound);
    }

    #[tokio::test]
    async fn test_delete_all_tokens_only_touches_scope() {
        let store = MemoryStore::new();
        let user = store.insert_user("Alice", "alice@example.com", true);
        let auth = store.issue_token(user.id, TokenScope::Authentication, HOUR).unwrap();
        let activation = store.issue_token(user.id, TokenScope::Activation, HOUR).unwrap();

        store.delete_all_tokens(TokenScope::Activation, user.id).await.unwrap();
        assert!(store.get_for_token(TokenScope::Activation, &activation).await.is_err());
        assert!(store.get_for_token(TokenScope::Authentication, &auth).await.is_ok());
    }

    #[tokio::test]
    async fn test_activate() {
        let store = MemoryStore::new();
        let user = store.insert_user("Carol", "carol@example.com", false);
        let token = store.issue_token(user.id, TokenScope::Authentication, HOUR).unwrap();

        let activated = store.activate(user.id).await.unwrap();
        assert!(activated.activated);
        // Token lookups see the change immediately.
        let found = store.get_for_token(TokenScope::Authentication, &token).await.unwrap();
        assert!(found.activated);

        assert_eq!(store.activate(999).await.unwrap_err(), StoreError::RecordNotFound);
    }

    #[tokio::test]
    async fn test_permissions() {
        let store = MemoryStore::new();
        let user = store.insert_user("Bob", "bob@example.com", true);
        assert!(store.get_all_for_user(user.id).await.unwrap().is_empty());

        store.add_permissions(user.id, ["movies:read"]);
        store.add_permissions(user.id, ["movies:read", "movies:write"]);

        let perms = store.get_all_for_user(user.id).await.unwrap();
        assert_eq!(perms.len(), 2);
        assert!(perms.include("movies:write"));
    }

    #[test]
    fn test_issue_token_for_unknown_user() {
        let store = MemoryStore::new();
        assert_eq!(
            store.issue_token(42, TokenScope::Authentication, HOUR).unwrap_err(),
            StoreError::RecordNotFound
        );
    }
}
