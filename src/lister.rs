//! Repository Lister - Fans language checks out over a bounded worker pool
//!
//! A listing resolves the account kind, fetches every repository of the
//! account, then classifies them with `min(concurrency, repos)` workers pulling
//! from a shared queue. A collector task drains results while the queue is
//! being fed, so dispatch never waits on result consumption.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::classifier::{LanguageClassifier, DEFAULT_LANGUAGE};
use crate::error::{ClassifyFailure, HostError, ListError};
use crate::repo::{AccountKind, RepoHost, RepoLister, Repository};
use crate::resolver::AccountResolver;

/// Default number of concurrent language lookups.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// What a listing does when a language lookup fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationPolicy {
    /// Abort the remaining lookups and fail the whole listing.
    #[default]
    FailFast,
    /// Log the failure and leave that repository out of the result.
    Skip,
}

/// Construction parameters for a [`Lister`].
#[derive(Debug, Clone)]
pub struct ListerOptions {
    pub account: String,
    pub account_kind: AccountKind,
    pub concurrency: NonZeroUsize,
    pub language: String,
    pub policy: ClassificationPolicy,
}

impl ListerOptions {
    /// Options with defaults: auto-detected kind, 5 workers, `Go`, fail-fast.
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            account_kind: AccountKind::Unknown,
            concurrency: NonZeroUsize::new(DEFAULT_CONCURRENCY).unwrap_or(NonZeroUsize::MIN),
            language: DEFAULT_LANGUAGE.to_string(),
            policy: ClassificationPolicy::default(),
        }
    }
}

/// Lists the repositories of one account that contain the target language.
pub struct Lister {
    host: Arc<dyn RepoHost>,
    resolver: AccountResolver,
    classifier: Arc<LanguageClassifier>,
    concurrency: NonZeroUsize,
    policy: ClassificationPolicy,
}

/// Outcome of one language lookup, sent from a worker to the collector.
struct Classified {
    repository: Repository,
    outcome: Result<bool, HostError>,
}

/// How a worker left its loop.
enum WorkerExit {
    Drained,
    Failed,
}

/// Everything the collector saw.
#[derive(Default)]
struct Collected {
    names: Vec<String>,
    failures: Vec<ClassifyFailure>,
    count: usize,
}

impl Lister {
    pub fn new(host: Arc<dyn RepoHost>, options: ListerOptions) -> Self {
        let resolver =
            AccountResolver::with_kind(Arc::clone(&host), options.account, options.account_kind);
        let classifier = Arc::new(LanguageClassifier::new(Arc::clone(&host), options.language));

        Self {
            host,
            resolver,
            classifier,
            concurrency: options.concurrency,
            policy: options.policy,
        }
    }

    pub fn account(&self) -> &str {
        self.resolver.account()
    }

    /// Account kind, `Unknown` until the first successful resolution.
    pub fn account_kind(&self) -> AccountKind {
        self.resolver.kind()
    }

    /// List the target-language repositories. Order is not guaranteed.
    pub async fn list_repositories(&self) -> Result<Vec<String>, ListError> {
        let span = info_span!("list", account = %self.account());

        async {
            let start = Instant::now();
            let kind = self.resolver.resolve().await?;
            let repositories = self.fetch_repositories(kind).await?;

            info!(
                kind = %kind,
                count = repositories.len(),
                "Listed repositories, checking languages"
            );

            let names = self.classify_all(repositories).await?;

            info!(
                count = names.len(),
                language = %self.classifier.language(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Listing complete"
            );
            Ok(names)
        }
        .instrument(span)
        .await
    }

    async fn fetch_repositories(&self, kind: AccountKind) -> Result<Vec<Repository>, ListError> {
        let account = self.account();
        let listed = match kind {
            AccountKind::Organization => self.host.list_organization_repositories(account).await,
            AccountKind::User | AccountKind::Unknown => {
                self.host.list_user_repositories(account).await
            }
        };

        listed.map_err(|source| ListError::Listing {
            account: account.to_string(),
            source,
        })
    }

    /// Fan the repositories out to the worker pool and fan the results back in.
    async fn classify_all(&self, repositories: Vec<Repository>) -> Result<Vec<String>, ListError> {
        let dispatched = repositories.len();
        if dispatched == 0 {
            return Ok(Vec::new());
        }

        let worker_count = self.concurrency.get().min(dispatched);
        debug!(workers = worker_count, repos = dispatched, "Starting language checks");

        let (job_tx, job_rx) = mpsc::unbounded_channel::<Repository>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<Classified>();
        let queue = Arc::new(Mutex::new(job_rx));

        let mut workers = JoinSet::new();
        for _ in 0..worker_count {
            workers.spawn(classify_worker(
                Arc::clone(&self.classifier),
                Arc::clone(&queue),
                result_tx.clone(),
                self.policy,
            ));
        }
        // Workers hold the only remaining senders, so the collector ends once
        // every worker has exited.
        drop(result_tx);

        let collector = tokio::spawn(collect_results(result_rx));

        for repository in repositories {
            // Cannot fail while `queue` keeps the receiver alive.
            let _ = job_tx.send(repository);
        }
        drop(job_tx);

        let mut aborted = false;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(WorkerExit::Failed) if !aborted => {
                    debug!("Language check failed, cancelling remaining workers");
                    workers.abort_all();
                    aborted = true;
                }
                Ok(_) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("Language check worker panicked: {}", e),
            }
        }

        let collected = match collector.await {
            Ok(collected) => collected,
            Err(e) => {
                error!("Result collector failed: {}", e);
                Collected::default()
            }
        };

        match self.policy {
            ClassificationPolicy::FailFast if !collected.failures.is_empty() => {
                return Err(ListError::Classification {
                    failures: collected.failures,
                    dispatched,
                });
            }
            ClassificationPolicy::Skip => {
                for failure in &collected.failures {
                    warn!(
                        repository = %failure.repository,
                        "Skipping repository after failed language check: {}",
                        failure.error
                    );
                }
            }
            ClassificationPolicy::FailFast => {}
        }

        if collected.count != dispatched {
            error!(
                dispatched,
                collected = collected.count,
                "Language check results do not match dispatched repositories"
            );
            return Err(ListError::InternalConsistency {
                dispatched,
                collected: collected.count,
            });
        }

        Ok(collected.names)
    }

    /// Full repository name for a partial name under this account.
    pub fn derive_full_name(&self, partial: &str) -> String {
        format!("{}/{}", self.account(), partial)
    }
}

#[async_trait]
impl RepoLister for Lister {
    async fn list(&self) -> Result<Vec<String>, ListError> {
        self.list_repositories().await
    }

    fn derive_full_name(&self, partial: &str) -> String {
        Lister::derive_full_name(self, partial)
    }
}

async fn classify_worker(
    classifier: Arc<LanguageClassifier>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Repository>>>,
    results: mpsc::UnboundedSender<Classified>,
    policy: ClassificationPolicy,
) -> WorkerExit {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(repository) = next else {
            return WorkerExit::Drained;
        };

        let outcome = classifier.classify(&repository).await;
        let failed = outcome.is_err();

        if results.send(Classified { repository, outcome }).is_err() {
            return WorkerExit::Drained;
        }
        if failed && policy == ClassificationPolicy::FailFast {
            return WorkerExit::Failed;
        }
    }
}

async fn collect_results(mut results: mpsc::UnboundedReceiver<Classified>) -> Collected {
    let mut collected = Collected::default();

    while let Some(Classified { repository, outcome }) = results.recv().await {
        collected.count += 1;
        match outcome {
            Ok(true) => collected.names.push(repository.full_name()),
            Ok(false) => {}
            Err(error) => collected.failures.push(ClassifyFailure {
                repository: repository.full_name(),
                error,
            }),
        }
    }

    collected
}
