//! vaingogh - Vanity import server for Go repositories
//!
//! vaingogh keeps a cached list of the repositories of one GitHub account that
//! contain Go, and serves the `go-import` pages the `go` tool needs to fetch
//! them from a custom import path.
//!
//! ## Core Features
//!
//! - **Repository Discovery**: Lists an account's repositories and checks their
//!   languages over a bounded worker pool
//! - **Account Detection**: Resolves once whether the account is a user or an
//!   organization
//! - **Cached Snapshots**: Periodic background refresh; a failed refresh keeps
//!   serving the last known-good list
//! - **Vanity Pages**: Templated `go-import` / `go-source` HTML
//!
//! ## Modules
//!
//! - [`lister`]: Repository listing with concurrent language classification
//! - [`watcher`]: Background refresh loop and snapshot cache
//! - [`github`]: GitHub API integration
//! - [`server`]: HTTP front end
//! - [`config`]: Configuration management and parsing

pub mod classifier;
pub mod config;
pub mod error;
pub mod github;
pub mod lister;
pub mod repo;
pub mod resolver;
pub mod server;
pub mod vanity;
pub mod watcher;

pub use classifier::LanguageClassifier;
pub use config::Config;
pub use error::{ClassifyFailure, HostError, ListError, WatcherError};
pub use github::GitHubHost;
pub use lister::{ClassificationPolicy, Lister, ListerOptions};
pub use repo::{AccountKind, RepoHost, RepoLister, RepoValidator, Repository};
pub use resolver::AccountResolver;
pub use server::Server;
pub use vanity::{HtmlGenerator, TemplateOptions};
pub use watcher::{Snapshot, Watcher, WatcherState};
