use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::ListError;
use crate::repo::{AccountKind, RepoHost};

/// Determines once whether the account is a user or an organization.
///
/// The outcome, including a failure, is cached for the lifetime of the
/// resolver; concurrent first callers share a single lookup.
pub struct AccountResolver {
    host: Arc<dyn RepoHost>,
    account: String,
    outcome: OnceCell<Result<AccountKind, ListError>>,
}

impl AccountResolver {
    /// Create a resolver that will query the host on first use.
    pub fn new(host: Arc<dyn RepoHost>, account: impl Into<String>) -> Self {
        Self {
            host,
            account: account.into(),
            outcome: OnceCell::new(),
        }
    }

    /// Create a resolver whose kind is already known; it never queries the host.
    ///
    /// `AccountKind::Unknown` behaves like [`AccountResolver::new`].
    pub fn with_kind(host: Arc<dyn RepoHost>, account: impl Into<String>, kind: AccountKind) -> Self {
        let outcome = match kind {
            AccountKind::Unknown => OnceCell::new(),
            known => OnceCell::new_with(Some(Ok(known))),
        };
        Self {
            host,
            account: account.into(),
            outcome,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// The resolved kind, or `Unknown` if resolution has not succeeded.
    pub fn kind(&self) -> AccountKind {
        match self.outcome.get() {
            Some(Ok(kind)) => *kind,
            _ => AccountKind::Unknown,
        }
    }

    /// Resolve the account kind, querying the host only on the first call.
    pub async fn resolve(&self) -> Result<AccountKind, ListError> {
        self.outcome
            .get_or_init(|| self.lookup())
            .await
            .clone()
    }

    async fn lookup(&self) -> Result<AccountKind, ListError> {
        debug!(account = %self.account, "Resolving account kind");

        // Usernames and organization names share one namespace upstream, so the
        // order only decides which endpoint is asked first.
        if self
            .host
            .user_exists(&self.account)
            .await
            .map_err(ListError::Resolve)?
        {
            info!(account = %self.account, "Account resolved as user");
            return Ok(AccountKind::User);
        }

        if self
            .host
            .organization_exists(&self.account)
            .await
            .map_err(ListError::Resolve)?
        {
            info!(account = %self.account, "Account resolved as organization");
            return Ok(AccountKind::Organization);
        }

        warn!(account = %self.account, "No user or organization with this name");
        Err(ListError::AccountNotFound(self.account.clone()))
    }
}
