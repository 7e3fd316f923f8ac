//! Per-project cache of trained models.
//!
//! The model list only changes when a training job completes, so it is
//! fetched once per project and kept until the job monitor invalidates it.

use std::collections::HashMap;
use std::sync::Arc;

use inspect_core::models::TrainedModel;
use inspect_core::types::ProjectId;
use tokio::sync::RwLock;

use crate::api::ApiError;
use crate::source::ModelSource;

pub struct ModelsCache {
    source: Arc<dyn ModelSource>,
    entries: RwLock<Entries>,
}

/// Cached lists plus a per-project epoch bumped on every invalidation. A
/// fetch only stores its result if the epoch it started under is still
/// current.
#[derive(Default)]
struct Entries {
    models: HashMap<ProjectId, Vec<TrainedModel>>,
    epochs: HashMap<ProjectId, u64>,
}

impl Entries {
    fn epoch(&self, project_id: &str) -> u64 {
        self.epochs.get(project_id).copied().unwrap_or(0)
    }
}

impl ModelsCache {
    pub fn new(source: Arc<dyn ModelSource>) -> Self {
        Self {
            source,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Cached models of `project_id`, fetching them on a miss.
    ///
    /// A list fetched across an [`invalidate`](Self::invalidate) is returned
    /// to the caller but not cached.
    pub async fn get(&self, project_id: &str) -> Result<Vec<TrainedModel>, ApiError> {
        let epoch = {
            let entries = self.entries.read().await;
            if let Some(models) = entries.models.get(project_id) {
                return Ok(models.clone());
            }
            entries.epoch(project_id)
        };

        let models = self.source.list_models(project_id).await?;

        let mut entries = self.entries.write().await;
        if entries.epoch(project_id) == epoch {
            tracing::debug!(project_id, count = models.len(), "Cached trained models");
            entries.models.insert(project_id.to_string(), models.clone());
        } else {
            tracing::debug!(project_id, "Models invalidated during fetch, not caching");
        }
        Ok(models)
    }

    /// Cached models without touching the backend.
    pub async fn cached(&self, project_id: &str) -> Option<Vec<TrainedModel>> {
        self.entries.read().await.models.get(project_id).cloned()
    }

    /// Drop the entry of `project_id`. Returns whether one existed.
    pub async fn invalidate(&self, project_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        *entries.epochs.entry(project_id.to_string()).or_insert(0) += 1;
        let removed = entries.models.remove(project_id).is_some();
        drop(entries);
        tracing::info!(project_id, removed, "Invalidated trained models");
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;

    struct CountingModels {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelSource for CountingModels {
        async fn list_models(&self, project_id: &str) -> Result<Vec<TrainedModel>, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![TrainedModel {
                id: format!("{project_id}-m{n}"),
                name: "Padim".into(),
                train_job_id: None,
            }])
        }
    }

    #[tokio::test]
    async fn fetches_once_until_invalidated() {
        let source = Arc::new(CountingModels {
            calls: AtomicUsize::new(0),
        });
        let cache = ModelsCache::new(source.clone());

        assert!(cache.cached("p1").await.is_none());
        assert_eq!(cache.get("p1").await.unwrap()[0].id, "p1-m0");
        assert_eq!(cache.get("p1").await.unwrap()[0].id, "p1-m0");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        assert!(cache.invalidate("p1").await);
        assert!(!cache.invalidate("p1").await);
        assert_eq!(cache.get("p1").await.unwrap()[0].id, "p1-m1");
    }

    #[tokio::test]
    async fn projects_are_independent() {
        let source = Arc::new(CountingModels {
            calls: AtomicUsize::new(0),
        });
        let cache = ModelsCache::new(source);
        cache.get("p1").await.unwrap();
        cache.get("p2").await.unwrap();
        cache.invalidate("p1").await;
        assert!(cache.cached("p1").await.is_none());
        assert!(cache.cached("p2").await.is_some());
    }

    /// Blocks every fetch until `release` is notified.
    struct GatedModels {
        started: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelSource for GatedModels {
        async fn list_models(&self, _project_id: &str) -> Result<Vec<TrainedModel>, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            Ok(vec![TrainedModel {
                id: format!("gen{n}"),
                name: "Padim".into(),
                train_job_id: None,
            }])
        }
    }

    #[tokio::test]
    async fn invalidation_during_fetch_is_not_lost() {
        let source = Arc::new(GatedModels {
            started: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(ModelsCache::new(source.clone()));

        let pending = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.get("p1").await }
        });
        source.started.notified().await;

        assert!(!cache.invalidate("p1").await);
        source.release.notify_one();

        // The caller still gets the list it asked for.
        assert_eq!(pending.await.unwrap().unwrap()[0].id, "gen0");
        assert!(cache.cached("p1").await.is_none());

        let next = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.get("p1").await }
        });
        source.started.notified().await;
        source.release.notify_one();
        assert_eq!(next.await.unwrap().unwrap()[0].id, "gen1");
        assert_eq!(cache.cached("p1").await.unwrap()[0].id, "gen1");
    }
}
