use anyhow::{Context, Result};
use async_trait::async_trait;
use octocrab::{Octocrab, Page};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, info, warn};

use crate::config::GitHubConfig;
use crate::error::HostError;
use crate::repo::{Languages, RepoHost, Repository};

/// Repositories requested per page when listing.
const PER_PAGE: u8 = 100;

/// [`RepoHost`] backed by the GitHub REST API.
pub struct GitHubHost {
    client: Octocrab,
}

/// Where the access token came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Config,
    Environment,
    Anonymous,
}

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RepoRecord {
    name: String,
    full_name: Option<String>,
    owner: Option<Account>,
}

#[derive(Debug, Serialize)]
struct ListParams {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort: Option<&'static str>,
    per_page: u8,
}

impl GitHubHost {
    /// Build a client from configuration.
    ///
    /// Requests are authenticated when a token is configured or `GITHUB_TOKEN`
    /// is set; the token only affects rate limits.
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let (source, token) = Self::detect_token(config);
        info!("Using GitHub token source: {:?}", source);

        let mut builder = Octocrab::builder();
        if let Some(token) = token {
            builder = builder.personal_token(token);
        }
        if let Some(api_url) = &config.api_url {
            builder = builder
                .base_uri(api_url.as_str())
                .with_context(|| format!("Invalid GitHub API URL: {}", api_url))?;
        }

        let client = builder.build().context("Failed to create GitHub client")?;
        Ok(Self { client })
    }

    /// Wrap an existing client (for reuse and tests).
    pub fn with_client(client: Octocrab) -> Self {
        Self { client }
    }

    fn detect_token(config: &GitHubConfig) -> (TokenSource, Option<String>) {
        if let Some(token) = config.token.as_ref().filter(|t| !t.is_empty()) {
            return (TokenSource::Config, Some(token.clone()));
        }

        match env::var("GITHUB_TOKEN") {
            Ok(token) if !token.is_empty() => {
                debug!("Found GITHUB_TOKEN environment variable");
                (TokenSource::Environment, Some(token))
            }
            _ => {
                warn!("No GitHub token configured, requests are subject to anonymous rate limits");
                (TokenSource::Anonymous, None)
            }
        }
    }

    /// `Ok(false)` on 404, the error otherwise.
    async fn exists(&self, route: String) -> Result<bool, HostError> {
        match self.client.get::<Account, _, ()>(&route, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(host_error(format!("getting {}", route), e)),
        }
    }

    async fn list_all(&self, route: String, params: ListParams) -> Result<Vec<Repository>, HostError> {
        let context = format!("listing {}", route);

        let first: Page<RepoRecord> = self
            .client
            .get(&route, Some(&params))
            .await
            .map_err(|e| host_error(context.clone(), e))?;
        let records = self
            .client
            .all_pages(first)
            .await
            .map_err(|e| host_error(context.clone(), e))?;

        debug!(route = %route, count = records.len(), "Fetched repository pages");
        Ok(records.into_iter().filter_map(record_to_repository).collect())
    }
}

#[async_trait]
impl RepoHost for GitHubHost {
    async fn user_exists(&self, name: &str) -> Result<bool, HostError> {
        self.exists(format!("/users/{}", name)).await
    }

    async fn organization_exists(&self, name: &str) -> Result<bool, HostError> {
        self.exists(format!("/orgs/{}", name)).await
    }

    async fn list_user_repositories(&self, user: &str) -> Result<Vec<Repository>, HostError> {
        let params = ListParams {
            kind: "owner",
            sort: Some("updated"),
            per_page: PER_PAGE,
        };
        self.list_all(format!("/users/{}/repos", user), params).await
    }

    async fn list_organization_repositories(
        &self,
        org: &str,
    ) -> Result<Vec<Repository>, HostError> {
        let params = ListParams {
            kind: "public",
            sort: None,
            per_page: PER_PAGE,
        };
        self.list_all(format!("/orgs/{}/repos", org), params).await
    }

    async fn list_languages(&self, repository: &Repository) -> Result<Languages, HostError> {
        let route = format!("/repos/{}/{}/languages", repository.owner, repository.name);
        self.client
            .get::<Languages, _, ()>(&route, None)
            .await
            .map_err(|e| host_error(format!("listing languages for '{}'", repository), e))
    }
}

fn record_to_repository(record: RepoRecord) -> Option<Repository> {
    if let Some(repository) = record
        .full_name
        .as_deref()
        .and_then(Repository::from_full_name)
    {
        return Some(repository);
    }

    match record.owner {
        Some(owner) => Some(Repository::new(owner.login, record.name)),
        None => {
            warn!("Skipping repository without owner: {}", record.name);
            None
        }
    }
}

fn is_not_found(error: &octocrab::Error) -> bool {
    matches!(
        error,
        octocrab::Error::GitHub { source, .. } if source.status_code.as_u16() == 404
    )
}

fn host_error(context: String, error: octocrab::Error) -> HostError {
    match error {
        octocrab::Error::Serde { .. } | octocrab::Error::Json { .. } => {
            HostError::decode(context, error)
        }
        other => HostError::upstream(context, other),
    }
}
