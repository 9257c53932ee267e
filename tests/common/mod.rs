//! Common test utilities and helpers for vaingogh tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use vaingogh::{HostError, RepoHost, Repository};

/// In-memory repository host
///
/// Records how often each upstream request is made and the peak number of
/// concurrent language lookups.
#[derive(Default)]
pub struct FakeHost {
    users: HashSet<String>,
    organizations: HashSet<String>,
    repositories: HashMap<String, Vec<Repository>>,
    languages: HashMap<String, Vec<(String, u64)>>,
    failing_languages: HashSet<String>,
    language_delay: Option<Duration>,

    pub fail_listing: AtomicBool,
    listing_gate: Mutex<Option<watch::Sender<bool>>>,

    pub user_lookups: AtomicUsize,
    pub organization_lookups: AtomicUsize,
    pub listing_calls: AtomicUsize,
    pub language_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.users.insert(user.to_string());
        self
    }

    pub fn with_organization(mut self, org: &str) -> Self {
        self.organizations.insert(org.to_string());
        self
    }

    /// Add a repository owned by `owner` using the given languages.
    pub fn with_repo(mut self, owner: &str, name: &str, languages: &[(&str, u64)]) -> Self {
        self.repositories
            .entry(owner.to_string())
            .or_default()
            .push(Repository::new(owner, name));
        self.languages.insert(
            format!("{}/{}", owner, name),
            languages
                .iter()
                .map(|(language, bytes)| (language.to_string(), *bytes))
                .collect(),
        );
        self
    }

    /// Make the language lookup of `full_name` fail.
    pub fn with_failing_languages(mut self, full_name: &str) -> Self {
        self.failing_languages.insert(full_name.to_string());
        self
    }

    /// Delay every language lookup.
    pub fn with_language_delay(mut self, delay: Duration) -> Self {
        self.language_delay = Some(delay);
        self
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Block listing requests until [`FakeHost::release_listing`].
    pub fn hold_listing(&self) {
        let (gate, _) = watch::channel(false);
        *self.listing_gate.lock().unwrap() = Some(gate);
    }

    pub fn release_listing(&self) {
        if let Some(gate) = self.listing_gate.lock().unwrap().take() {
            gate.send_replace(true);
        }
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    async fn listing(&self, owner: &str) -> Result<Vec<Repository>, HostError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.listing_gate.lock().unwrap().as_ref().map(|g| g.subscribe());
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|released| *released).await;
        }

        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(HostError::upstream(
                format!("listing {}", owner),
                "503 Service Unavailable",
            ));
        }
        Ok(self.repositories.get(owner).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl RepoHost for FakeHost {
    async fn user_exists(&self, name: &str) -> Result<bool, HostError> {
        self.user_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.contains(name))
    }

    async fn organization_exists(&self, name: &str) -> Result<bool, HostError> {
        self.organization_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.organizations.contains(name))
    }

    async fn list_user_repositories(&self, user: &str) -> Result<Vec<Repository>, HostError> {
        self.listing(user).await
    }

    async fn list_organization_repositories(
        &self,
        org: &str,
    ) -> Result<Vec<Repository>, HostError> {
        self.listing(org).await
    }

    async fn list_languages(
        &self,
        repository: &Repository,
    ) -> Result<HashMap<String, u64>, HostError> {
        self.language_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(delay) = self.language_delay {
            tokio::time::sleep(delay).await;
        }

        let full_name = repository.full_name();
        let result = if self.failing_languages.contains(&full_name) {
            Err(HostError::upstream(
                format!("languages of {}", full_name),
                "500 Internal Server Error",
            ))
        } else {
            Ok(self
                .languages
                .get(&full_name)
                .map(|languages| languages.iter().cloned().collect())
                .unwrap_or_default())
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Sorted copy of a name list, for order-insensitive comparison
pub fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}
