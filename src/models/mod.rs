//! Catalog of models offered by the completion provider
//!
//! The catalog is an explicit service rather than shared global state:
//! a [`ModelSource`] fetches the list, a [`Clock`] decides staleness, and
//! the current [`ModelSnapshot`] is swapped atomically behind an `Arc`.
//! Snapshots are persisted to a JSON file so restarts within the refresh
//! window don't hit the provider.

mod cache;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

pub use cache::{read_snapshot, write_snapshot};

/// Default age after which the cached list is refetched
pub const DEFAULT_REFRESH_AFTER: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// A model as reported by the provider's model listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default = "default_object")]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub owned_by: String,
}

fn default_object() -> String {
    "model".to_string()
}

impl ModelInfo {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: default_object(),
            created: 0,
            owned_by: String::new(),
        }
    }
}

/// Point-in-time view of the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
    /// When the list was fetched from the provider
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

impl ModelSnapshot {
    /// Whether the snapshot lists a model with this ID
    #[must_use]
    pub fn contains(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m.id == model_id)
    }
}

/// Fetches the current model list from a provider
#[async_trait]
pub trait ModelSource: Send + Sync {
    /// # Errors
    ///
    /// Returns error if the provider cannot be reached or answers badly
    async fn fetch_models(&self) -> Result<Vec<ModelInfo>>;
}

/// Time source for staleness checks
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Cached, periodically refreshed model catalog
pub struct ModelCatalog {
    source: Arc<dyn ModelSource>,
    clock: Arc<dyn Clock>,
    cache_path: PathBuf,
    refresh_after: chrono::Duration,
    snapshot: RwLock<Arc<ModelSnapshot>>,
}

impl ModelCatalog {
    /// Create an empty catalog; call [`Self::initialize`] to populate it
    #[must_use]
    pub fn new(
        source: Arc<dyn ModelSource>,
        clock: Arc<dyn Clock>,
        cache_path: PathBuf,
        refresh_after: Duration,
    ) -> Self {
        Self {
            source,
            clock,
            cache_path,
            refresh_after: chrono::Duration::from_std(refresh_after)
                .unwrap_or(chrono::Duration::MAX),
            snapshot: RwLock::new(Arc::new(ModelSnapshot::default())),
        }
    }

    #[must_use]
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<ModelSnapshot> {
        self.snapshot
            .read()
            .map_or_else(|poisoned| poisoned.into_inner().clone(), |s| s.clone())
    }

    /// Load the on-disk cache, refetching if it is stale or missing
    ///
    /// A failed fetch keeps whatever could be read from disk.
    pub async fn initialize(&self) {
        let cached = read_snapshot(&self.cache_path);

        if let Some(snapshot) = &cached {
            if !self.is_stale(snapshot) {
                tracing::info!(
                    models = snapshot.models.len(),
                    path = %self.cache_path.display(),
                    "loaded model cache from disk"
                );
                self.swap(snapshot.clone());
                return;
            }
        }

        tracing::info!(path = %self.cache_path.display(), "model cache stale or missing, refreshing");
        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "model refresh failed");
            if let Some(snapshot) = cached {
                self.swap(snapshot);
            }
        }
    }

    /// Fetch the model list, persist it, and swap it in
    ///
    /// # Errors
    ///
    /// Returns error if the fetch fails; the current snapshot is kept.
    /// A failed disk write is logged and does not fail the refresh.
    pub async fn refresh(&self) -> Result<Arc<ModelSnapshot>> {
        let models = self.source.fetch_models().await?;
        let snapshot = ModelSnapshot {
            models,
            last_update: Some(self.clock.now()),
        };

        if let Err(e) = write_snapshot(&self.cache_path, &snapshot) {
            tracing::warn!(
                error = %e,
                path = %self.cache_path.display(),
                "failed to persist model cache"
            );
        }

        tracing::info!(models = snapshot.models.len(), "model catalog refreshed");
        Ok(self.swap(snapshot))
    }

    /// Refresh only if the current snapshot is stale
    ///
    /// Returns true if a refresh happened.
    ///
    /// # Errors
    ///
    /// Returns error if a needed refresh fails
    pub async fn ensure_fresh(&self) -> Result<bool> {
        if self.is_stale(&self.snapshot()) {
            self.refresh().await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Staleness predicate: older than the refresh window, or never fetched
    ///
    /// Snapshots without `last_update` fall back to the cache file's
    /// modification time.
    #[must_use]
    pub fn is_stale(&self, snapshot: &ModelSnapshot) -> bool {
        let stamp = snapshot
            .last_update
            .or_else(|| cache::modified_at(&self.cache_path));

        stamp.is_none_or(|at| self.clock.now() - at > self.refresh_after)
    }

    fn swap(&self, snapshot: ModelSnapshot) -> Arc<ModelSnapshot> {
        let snapshot = Arc::new(snapshot);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot.clone(),
            Err(poisoned) => *poisoned.into_inner() = snapshot.clone(),
        }
        snapshot
    }
}

/// Spawn a task that keeps the catalog fresh
#[must_use]
pub fn spawn_refresher(
    catalog: Arc<ModelCatalog>,
    check_every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(check_every);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(e) = catalog.ensure_fresh().await {
                tracing::warn!(error = %e, "scheduled model refresh failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::Error;

    struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        fn at(rfc3339: &str) -> Self {
            Self(Mutex::new(
                DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc),
            ))
        }

        fn advance(&self, days: i64) {
            *self.0.lock().unwrap() += chrono::Duration::days(days);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    struct CountingSource {
        models: Vec<&'static str>,
        fail: bool,
        fetches: AtomicUsize,
    }

    impl CountingSource {
        fn new(models: Vec<&'static str>) -> Self {
            Self {
                models,
                fail: false,
                fetches: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(vec![])
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelSource for CountingSource {
        async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Provider("offline".to_string()));
            }
            Ok(self.models.iter().map(|id| ModelInfo::new(*id)).collect())
        }
    }

    fn catalog(
        dir: &tempfile::TempDir,
        source: &Arc<CountingSource>,
        clock: &Arc<FixedClock>,
    ) -> ModelCatalog {
        ModelCatalog::new(
            source.clone(),
            clock.clone(),
            dir.path().join("models_cache.json"),
            DEFAULT_REFRESH_AFTER,
        )
    }

    #[tokio::test]
    async fn initialize_without_cache_fetches_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(CountingSource::new(vec!["gpt-4", "gpt-3.5-turbo"]));
        let clock = Arc::new(FixedClock::at("2026-01-01T00:00:00Z"));
        let catalog = catalog(&dir, &source, &clock);

        catalog.initialize().await;

        assert_eq!(source.fetches(), 1);
        let snapshot = catalog.snapshot();
        assert!(snapshot.contains("gpt-4"));
        assert_eq!(snapshot.last_update, Some(clock.now()));

        let on_disk = read_snapshot(catalog.cache_path()).unwrap();
        assert_eq!(on_disk, *snapshot);
    }

    #[tokio::test]
    async fn fresh_cache_is_loaded_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::at("2026-01-01T00:00:00Z"));

        let first = Arc::new(CountingSource::new(vec!["gpt-4"]));
        catalog(&dir, &first, &clock).initialize().await;

        clock.advance(13);
        let second = Arc::new(CountingSource::new(vec!["other"]));
        let catalog = catalog(&dir, &second, &clock);
        catalog.initialize().await;

        assert_eq!(second.fetches(), 0);
        assert!(catalog.snapshot().contains("gpt-4"));
    }

    #[tokio::test]
    async fn stale_cache_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::at("2026-01-01T00:00:00Z"));

        let first = Arc::new(CountingSource::new(vec!["gpt-4"]));
        catalog(&dir, &first, &clock).initialize().await;

        clock.advance(15);
        let second = Arc::new(CountingSource::new(vec!["gpt-4o"]));
        let catalog = catalog(&dir, &second, &clock);
        catalog.initialize().await;

        assert_eq!(second.fetches(), 1);
        assert!(catalog.snapshot().contains("gpt-4o"));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_disk_copy() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::at("2026-01-01T00:00:00Z"));

        let first = Arc::new(CountingSource::new(vec!["gpt-4"]));
        catalog(&dir, &first, &clock).initialize().await;

        clock.advance(30);
        let offline = Arc::new(CountingSource::failing());
        let catalog = catalog(&dir, &offline, &clock);
        catalog.initialize().await;

        assert_eq!(offline.fetches(), 1);
        assert!(catalog.snapshot().contains("gpt-4"));
        assert!(catalog.refresh().await.is_err());
        assert!(catalog.snapshot().contains("gpt-4"));
    }

    #[tokio::test]
    async fn ensure_fresh_only_refreshes_when_stale() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(CountingSource::new(vec!["gpt-4"]));
        let clock = Arc::new(FixedClock::at("2026-01-01T00:00:00Z"));
        let catalog = catalog(&dir, &source, &clock);

        catalog.initialize().await;
        assert!(!catalog.ensure_fresh().await.unwrap());
        assert_eq!(source.fetches(), 1);

        clock.advance(14);
        assert!(!catalog.ensure_fresh().await.unwrap());

        clock.advance(1);
        assert!(catalog.ensure_fresh().await.unwrap());
        assert_eq!(source.fetches(), 2);
    }

    #[test]
    fn empty_snapshot_without_file_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(CountingSource::new(vec![]));
        let clock = Arc::new(FixedClock::at("2026-01-01T00:00:00Z"));
        let catalog = catalog(&dir, &source, &clock);

        assert!(catalog.is_stale(&ModelSnapshot::default()));
    }
}
