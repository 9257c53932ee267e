//! Repository model and the capability traits between components
//!
//! [`RepoHost`] is the upstream seam (GitHub in production, fakes in tests).
//! [`RepoLister`] and [`RepoValidator`] are the capabilities consumed by the
//! watcher and the HTTP server respectively.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

use crate::error::{HostError, ListError};

/// A repository as reported by the upstream host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Repository {
    /// Owner login (user or organization)
    pub owner: String,

    /// Repository name without the owner
    pub name: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse an `owner/name` string.
    pub fn from_full_name(full_name: &str) -> Option<Self> {
        let (owner, name) = full_name.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(owner, name))
    }

    /// Get display name (owner/name format)
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Whether an account name refers to an individual or an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccountKind {
    #[default]
    Unknown,
    User,
    Organization,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            AccountKind::Unknown => "unknown",
            AccountKind::User => "user",
            AccountKind::Organization => "organization",
        };
        f.write_str(kind)
    }
}

/// Byte counts per language, as returned by the host.
pub type Languages = HashMap<String, u64>;

/// Upstream repository host
///
/// Each method performs exactly one logical upstream request (the listing
/// methods may follow pagination).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Look up an individual account. `Ok(false)` means it does not exist.
    async fn user_exists(&self, name: &str) -> Result<bool, HostError>;

    /// Look up an organization. `Ok(false)` means it does not exist.
    async fn organization_exists(&self, name: &str) -> Result<bool, HostError>;

    /// Public repositories owned by a user, most recently updated first.
    async fn list_user_repositories(&self, user: &str) -> Result<Vec<Repository>, HostError>;

    /// All public repositories of an organization.
    async fn list_organization_repositories(
        &self,
        org: &str,
    ) -> Result<Vec<Repository>, HostError>;

    /// Languages used in a repository.
    async fn list_languages(&self, repository: &Repository) -> Result<Languages, HostError>;
}

/// Produces the list of target-language repositories for an account.
#[async_trait]
pub trait RepoLister: Send + Sync {
    async fn list(&self) -> Result<Vec<String>, ListError>;

    /// Full repository name (`account/partial`) for a partial name.
    fn derive_full_name(&self, partial: &str) -> String;
}

/// Answers whether a repository may be served.
pub trait RepoValidator: Send + Sync {
    fn is_valid(&self, full_name: &str) -> Result<bool, ListError>;

    fn derive_full_name(&self, partial: &str) -> String;
}
