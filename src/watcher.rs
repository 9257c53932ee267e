//! Watcher - Keeps a periodically refreshed snapshot of the repository list
//!
//! The watcher lists repositories once on `start`, then refreshes on a fixed
//! interval from a background task. Readers only ever clone the current
//! `Arc<Snapshot>`, so they never wait on upstream requests. A failed refresh
//! keeps serving the previous list and records the error next to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{ListError, WatcherError};
use crate::repo::{RepoLister, RepoValidator};

/// Default time between refreshes.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// One published view of the repository list.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub repositories: Vec<String>,

    /// Error of the most recent listing, if it failed
    pub error: Option<ListError>,

    pub generated_at: DateTime<Utc>,

    /// When `repositories` was last fetched successfully
    pub last_success_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            repositories: Vec::new(),
            error: None,
            generated_at: Utc::now(),
            last_success_at: None,
        }
    }

    fn success(repositories: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            repositories,
            error: None,
            generated_at: now,
            last_success_at: Some(now),
        }
    }

    /// Keep the previous list, record the new error.
    fn failure(previous: &Snapshot, error: ListError) -> Self {
        Self {
            repositories: previous.repositories.clone(),
            error: Some(error),
            generated_at: Utc::now(),
            last_success_at: previous.last_success_at,
        }
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.repositories.iter().any(|name| name == full_name)
    }
}

/// Lifecycle of a [`Watcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Created,
    /// The first listing of `start` is in progress
    Starting,
    Running,
    Stopped,
}

enum Lifecycle {
    Created,
    Starting,
    Running(JoinHandle<()>),
    Stopped,
}

/// Caches a repository list and refreshes it at regular intervals.
pub struct Watcher {
    lister: Arc<dyn RepoLister>,
    interval: Duration,
    snapshot: Arc<watch::Sender<Arc<Snapshot>>>,
    shutdown_sender: broadcast::Sender<()>,
    lifecycle: Mutex<Lifecycle>,
}

impl Watcher {
    /// Create a watcher; nothing is fetched until [`Watcher::start`].
    ///
    /// A zero `interval` is rejected by `start`.
    pub fn new(lister: Arc<dyn RepoLister>, interval: Duration) -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Snapshot::empty()));
        let (shutdown_sender, _) = broadcast::channel(1);

        Self {
            lister,
            interval,
            snapshot: Arc::new(snapshot),
            shutdown_sender,
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    /// List once, synchronously, then begin refreshing in the background.
    ///
    /// If the first listing fails the error is returned, no background task is
    /// left running and the watcher can be started again. The state lock is not
    /// held while listing, so `state` and `stop` answer immediately; a `stop`
    /// during the first listing abandons it and `start` returns
    /// [`WatcherError::Stopped`].
    pub async fn start(&self) -> Result<(), WatcherError> {
        if self.interval.is_zero() {
            return Err(WatcherError::ZeroInterval);
        }

        let mut shutdown_receiver = {
            let mut lifecycle = self.lifecycle.lock().await;
            match *lifecycle {
                Lifecycle::Starting | Lifecycle::Running(_) => {
                    return Err(WatcherError::AlreadyRunning)
                }
                Lifecycle::Stopped => return Err(WatcherError::Stopped),
                Lifecycle::Created => {}
            }
            *lifecycle = Lifecycle::Starting;
            self.shutdown_sender.subscribe()
        };

        info!("Starting repository watcher");
        let listed = tokio::select! {
            listed = self.lister.list() => listed,
            _ = shutdown_receiver.recv() => {
                info!("Watcher stopped during initial listing");
                return Err(WatcherError::Stopped);
            }
        };

        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Starting) {
            // Stopped between the listing finishing and the lock being retaken.
            return Err(WatcherError::Stopped);
        }

        let repositories = match listed {
            Ok(repositories) => repositories,
            Err(e) => {
                *lifecycle = Lifecycle::Created;
                return Err(WatcherError::InitialListing(e));
            }
        };
        info!(count = repositories.len(), "Initial repository list loaded");
        self.snapshot
            .send_replace(Arc::new(Snapshot::success(repositories)));

        let task = tokio::spawn(refresh_loop(
            Arc::clone(&self.lister),
            Arc::clone(&self.snapshot),
            self.interval,
            shutdown_receiver,
        ));

        *lifecycle = Lifecycle::Running(task);
        Ok(())
    }

    /// Stop refreshing and wait for the background task to exit.
    ///
    /// A no-op before `start` or after a previous `stop`. The last snapshot
    /// stays readable.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let task = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(task) => task,
            Lifecycle::Starting => {
                info!("Stopping repository watcher during startup");
                let _ = self.shutdown_sender.send(());
                return;
            }
            previous @ (Lifecycle::Created | Lifecycle::Stopped) => {
                *lifecycle = previous;
                debug!("Watcher stop requested, but it is not running");
                return;
            }
        };
        drop(lifecycle);

        info!("Stopping repository watcher");
        let _ = self.shutdown_sender.send(());
        if let Err(e) = task.await {
            if e.is_panic() {
                error!("Watcher refresh task panicked: {}", e);
            }
        }
        info!("Repository watcher stopped");
    }

    pub async fn state(&self) -> WatcherState {
        match *self.lifecycle.lock().await {
            Lifecycle::Created => WatcherState::Created,
            Lifecycle::Starting => WatcherState::Starting,
            Lifecycle::Running(_) => WatcherState::Running,
            Lifecycle::Stopped => WatcherState::Stopped,
        }
    }

    /// The current snapshot. Never touches the network.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// Repository names and the last listing error.
    pub fn read(&self) -> (Vec<String>, Option<ListError>) {
        let snapshot = self.snapshot();
        (snapshot.repositories.clone(), snapshot.error.clone())
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshot.subscribe()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Lifecycle::Running(task) = self.lifecycle.get_mut() {
            task.abort();
        }
    }
}

#[async_trait]
impl RepoLister for Watcher {
    /// The cached list; fails with the last error if the cache is empty
    /// because of it.
    async fn list(&self) -> Result<Vec<String>, ListError> {
        match self.read() {
            (repositories, Some(error)) if repositories.is_empty() => Err(error),
            (repositories, _) => Ok(repositories),
        }
    }

    fn derive_full_name(&self, partial: &str) -> String {
        self.lister.derive_full_name(partial)
    }
}

impl RepoValidator for Watcher {
    /// A repository in the cached list is valid even if the latest refresh
    /// failed. An absent one is only reported invalid when the cache is not
    /// carrying an error.
    fn is_valid(&self, full_name: &str) -> Result<bool, ListError> {
        let snapshot = self.snapshot();
        if snapshot.contains(full_name) {
            return Ok(true);
        }
        match &snapshot.error {
            Some(error) => Err(error.clone()),
            None => Ok(false),
        }
    }

    fn derive_full_name(&self, partial: &str) -> String {
        self.lister.derive_full_name(partial)
    }
}

async fn refresh_loop(
    lister: Arc<dyn RepoLister>,
    snapshot: Arc<watch::Sender<Arc<Snapshot>>>,
    period: Duration,
    mut shutdown_receiver: broadcast::Receiver<()>,
) {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Refresh loop started with interval: {:?}", period);

    loop {
        tokio::select! {
            _ = shutdown_receiver.recv() => {
                debug!("Shutdown signal received in refresh loop");
                break;
            }

            _ = timer.tick() => {
                debug!("Starting scheduled refresh");

                let result = tokio::select! {
                    result = lister.list() => result,
                    _ = shutdown_receiver.recv() => {
                        debug!("Shutdown signal received during refresh");
                        break;
                    }
                };

                match result {
                    Ok(repositories) => {
                        info!(count = repositories.len(), "Repository list refreshed");
                        snapshot.send_replace(Arc::new(Snapshot::success(repositories)));
                    }
                    Err(e) => {
                        error!("Failed to refresh repository list: {}", e);
                        let previous = Arc::clone(&snapshot.borrow());
                        if !previous.repositories.is_empty() {
                            warn!(
                                count = previous.repositories.len(),
                                "Serving previous repository list"
                            );
                        }
                        snapshot.send_replace(Arc::new(Snapshot::failure(&previous, e)));
                    }
                }
            }
        }
    }

    info!("Refresh loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the scripted results in order, repeating the last one.
    struct ScriptedLister {
        script: Vec<Result<Vec<String>, ListError>>,
        calls: AtomicUsize,
    }

    impl ScriptedLister {
        fn new(script: Vec<Result<Vec<String>, ListError>>) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RepoLister for ScriptedLister {
        async fn list(&self) -> Result<Vec<String>, ListError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.script[call.min(self.script.len() - 1)].clone()
        }

        fn derive_full_name(&self, partial: &str) -> String {
            format!("alice/{}", partial)
        }
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn test_new_watcher_is_empty_and_created() {
        let watcher = Watcher::new(ScriptedLister::new(vec![Ok(names(&["a/b"]))]), DEFAULT_CHECK_INTERVAL);

        assert_eq!(watcher.state().await, WatcherState::Created);
        let (repositories, error) = watcher.read();
        assert!(repositories.is_empty());
        assert!(error.is_none());
        assert!(watcher.snapshot().last_success_at.is_none());
    }

    #[tokio::test]
    async fn test_start_publishes_first_snapshot() {
        let watcher = Watcher::new(ScriptedLister::new(vec![Ok(names(&["a/b"]))]), DEFAULT_CHECK_INTERVAL);

        watcher.start().await.unwrap();
        assert_eq!(watcher.state().await, WatcherState::Running);
        assert_eq!(watcher.read().0, names(&["a/b"]));
        assert!(watcher.snapshot().last_success_at.is_some());

        watcher.stop().await;
        assert_eq!(watcher.state().await, WatcherState::Stopped);
    }

    #[tokio::test]
    async fn test_failed_start_leaves_watcher_created() {
        let lister = ScriptedLister::new(vec![Err(ListError::AccountNotFound("ghost".into()))]);
        let watcher = Watcher::new(lister, DEFAULT_CHECK_INTERVAL);

        let err = watcher.start().await.unwrap_err();
        assert!(matches!(
            err,
            WatcherError::InitialListing(ListError::AccountNotFound(_))
        ));
        assert_eq!(watcher.state().await, WatcherState::Created);
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let lister = ScriptedLister::new(vec![Ok(names(&["a/b"]))]);
        let watcher = Watcher::new(lister.clone(), Duration::ZERO);

        assert!(matches!(watcher.start().await, Err(WatcherError::ZeroInterval)));
        assert_eq!(watcher.state().await, WatcherState::Created);
        assert_eq!(lister.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let watcher = Watcher::new(ScriptedLister::new(vec![Ok(names(&["a/b"]))]), DEFAULT_CHECK_INTERVAL);

        watcher.start().await.unwrap();
        assert!(matches!(watcher.start().await, Err(WatcherError::AlreadyRunning)));

        watcher.stop().await;
        assert!(matches!(watcher.start().await, Err(WatcherError::Stopped)));
    }

    #[tokio::test]
    async fn test_stop_before_start_and_twice() {
        let watcher = Watcher::new(ScriptedLister::new(vec![Ok(names(&["a/b"]))]), DEFAULT_CHECK_INTERVAL);

        watcher.stop().await;
        assert_eq!(watcher.state().await, WatcherState::Created);

        watcher.start().await.unwrap();
        watcher.stop().await;
        watcher.stop().await;
        assert_eq!(watcher.state().await, WatcherState::Stopped);
        assert_eq!(watcher.read().0, names(&["a/b"]));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_list() {
        let lister = ScriptedLister::new(vec![
            Ok(names(&["a/b"])),
            Err(ListError::InternalConsistency {
                dispatched: 2,
                collected: 1,
            }),
        ]);
        let watcher = Watcher::new(lister, Duration::from_millis(20));
        watcher.start().await.unwrap();

        let mut updates = watcher.subscribe();
        tokio::time::timeout(Duration::from_secs(5), updates.changed())
            .await
            .expect("no refresh within timeout")
            .unwrap();
        watcher.stop().await;

        let (repositories, error) = watcher.read();
        assert_eq!(repositories, names(&["a/b"]));
        assert!(matches!(error, Some(ListError::InternalConsistency { .. })));
        assert!(watcher.snapshot().last_success_at.is_some());
    }

    #[tokio::test]
    async fn test_validator_prefers_stale_list_over_error() {
        let lister = ScriptedLister::new(vec![
            Ok(names(&["alice/x"])),
            Err(ListError::AccountNotFound("alice".into())),
        ]);
        let watcher = Watcher::new(lister, Duration::from_millis(20));
        watcher.start().await.unwrap();

        assert!(watcher.is_valid("alice/x").unwrap());
        assert!(!watcher.is_valid("alice/nope").unwrap());

        let mut updates = watcher.subscribe();
        tokio::time::timeout(Duration::from_secs(5), updates.changed())
            .await
            .expect("no refresh within timeout")
            .unwrap();
        watcher.stop().await;

        assert!(watcher.is_valid("alice/x").unwrap());
        assert!(watcher.is_valid("alice/nope").is_err());
        assert_eq!(RepoValidator::derive_full_name(&watcher, "x"), "alice/x");
    }

    #[tokio::test]
    async fn test_held_snapshot_never_changes() {
        let lister = ScriptedLister::new(vec![Ok(names(&["a/b"])), Ok(names(&["a/c"]))]);
        let watcher = Watcher::new(lister, Duration::from_millis(20));
        watcher.start().await.unwrap();

        let held = watcher.snapshot();
        let mut updates = watcher.subscribe();
        tokio::time::timeout(Duration::from_secs(5), updates.changed())
            .await
            .expect("no refresh within timeout")
            .unwrap();
        watcher.stop().await;

        assert_eq!(held.repositories, names(&["a/b"]));
        assert_eq!(watcher.read().0, names(&["a/c"]));
    }
}
