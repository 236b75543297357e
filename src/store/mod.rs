//! Storage capabilities consumed by the request pipeline.
//!
//! The pipeline only depends on the [`UserStore`] and [`PermissionStore`]
//! traits; account activation goes through [`AccountStore`]. [`MemoryStore`] is the in-process implementation used by the
//! binary and the tests; a database-backed store plugs in behind the same
//! traits.

pub mod memory;
pub mod movies;
pub mod token;

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryStore;
pub use movies::{Movie, MovieCatalog, MoviePatch, NewMovie};
pub use token::TokenScope;

/// Errors returned by store lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("record not found")]
    RecordNotFound,

    #[error("edit conflict")]
    EditConflict,

    #[error("store lookup timed out")]
    Timeout,

    #[error("store backend error: {0}")]
    Backend(String),
}

/// A registered user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub activated: bool,
}

/// The set of permission codes granted to a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions(HashSet<String>);

impl Permissions {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(codes.into_iter().map(Into::into).collect())
    }

    /// Whether `code` is among the granted permissions.
    pub fn include(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<_> = self.0.iter().map(String::as_str).collect();
        codes.sort_unstable();
        write!(f, "[{}]", codes.join(", "))
    }
}

/// Resolves the owner of a token.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up the user holding an unexpired token of the given scope.
    ///
    /// Returns [`StoreError::RecordNotFound`] for unknown or expired tokens.
    async fn get_for_token(&self, scope: TokenScope, plaintext: &str) -> Result<User, StoreError>;
}

/// Account changes made when a user redeems a token.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Mark the user activated and return the updated record.
    async fn activate(&self, user_id: i64) -> Result<User, StoreError>;

    /// Remove every token of `scope` held by `user_id`.
    async fn delete_all_tokens(&self, scope: TokenScope, user_id: i64) -> Result<(), StoreError>;
}

/// Resolves the permissions granted to a user.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions, StoreError>;
}
