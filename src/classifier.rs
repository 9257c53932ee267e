use std::sync::Arc;
use tracing::debug;

use crate::error::HostError;
use crate::repo::{RepoHost, Repository};

/// Default language a repository must contain to be served.
pub const DEFAULT_LANGUAGE: &str = "Go";

/// Decides whether a repository contains code in the target language.
#[derive(Clone)]
pub struct LanguageClassifier {
    host: Arc<dyn RepoHost>,
    language: String,
}

impl LanguageClassifier {
    pub fn new(host: Arc<dyn RepoHost>, language: impl Into<String>) -> Self {
        Self {
            host,
            language: language.into(),
        }
    }

    /// The language being matched
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Query the host once for the repository's languages.
    ///
    /// No retries: a failure here fails this repository's classification.
    pub async fn classify(&self, repository: &Repository) -> Result<bool, HostError> {
        let languages = self.host.list_languages(repository).await?;
        let matched = languages.contains_key(&self.language);

        debug!(
            repository = %repository,
            language = %self.language,
            matched,
            "Classified repository"
        );
        Ok(matched)
    }
}
