//! Error types shared by the listing pipeline and the watcher.

use thiserror::Error;

/// Errors returned by a [`RepoHost`](crate::repo::RepoHost) call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// The host was unreachable or answered with a non-success status.
    #[error("{context}: upstream request failed: {message}")]
    Upstream { context: String, message: String },

    /// The host answered, but the body could not be decoded.
    #[error("{context}: failed to decode response: {message}")]
    Decode { context: String, message: String },
}

impl HostError {
    pub fn upstream(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Upstream {
            context: context.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// A single repository whose language lookup failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyFailure {
    pub repository: String,
    pub error: HostError,
}

/// Errors that can occur while listing the target-language repositories.
///
/// Cloneable so the watcher can keep the last one on its snapshot and the
/// account resolver can cache a failed resolution.
#[derive(Debug, Clone, Error)]
pub enum ListError {
    /// Neither a user nor an organization with this name exists.
    #[error("no such user or organization exists: {0}")]
    AccountNotFound(String),

    /// Looking up the account kind failed for a reason other than "not found".
    #[error("resolving account kind: {0}")]
    Resolve(#[source] HostError),

    /// The repository listing itself failed.
    #[error("listing repositories for {account}: {source}")]
    Listing {
        account: String,
        #[source]
        source: HostError,
    },

    /// One or more language lookups failed during a single listing.
    #[error(
        "checking repository languages: {} of {dispatched} lookups failed (first: {})",
        failures.len(),
        first_failure(failures)
    )]
    Classification {
        failures: Vec<ClassifyFailure>,
        dispatched: usize,
    },

    /// The worker pool lost or duplicated results.
    #[error("requested language checks for {dispatched} repos, but got {collected} results")]
    InternalConsistency { dispatched: usize, collected: usize },
}

fn first_failure(failures: &[ClassifyFailure]) -> String {
    failures
        .first()
        .map(|failure| format!("{}: {}", failure.repository, failure.error))
        .unwrap_or_else(|| "none recorded".to_string())
}

/// Errors returned by the watcher lifecycle operations.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// The synchronous listing performed by `start` failed.
    #[error("initial repository listing failed: {0}")]
    InitialListing(#[source] ListError),

    #[error("watcher is already running")]
    AlreadyRunning,

    #[error("watcher has been stopped")]
    Stopped,

    #[error("watcher refresh interval must be positive")]
    ZeroInterval,
}
