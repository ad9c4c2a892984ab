use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use operator_core::{ModelConfig, ModelConfigStore, ModelType, OperatorError, Result};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Immutable view of the active model configurations.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    models: BTreeMap<String, ModelConfig>,
    defaults: HashMap<ModelType, String>,
    loaded_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
            defaults: HashMap::new(),
            loaded_at: Utc::now(),
        }
    }

    /// Build from store rows. Inactive rows are skipped; duplicate names or a
    /// second default for one type reject the whole load.
    pub fn build(rows: Vec<ModelConfig>) -> Result<Self> {
        let mut models = BTreeMap::new();
        let mut defaults: HashMap<ModelType, String> = HashMap::new();

        for row in rows.into_iter().filter(ModelConfig::is_active) {
            if row.is_default
                && let Some(existing) = defaults.insert(row.model_type, row.name.clone())
            {
                return Err(OperatorError::Configuration(format!(
                    "models '{existing}' and '{}' are both default for type {}",
                    row.name, row.model_type
                )));
            }
            let name = row.name.clone();
            if models.insert(name.clone(), row).is_some() {
                return Err(OperatorError::Configuration(format!(
                    "duplicate model name '{name}'"
                )));
            }
        }

        Ok(Self {
            models,
            defaults,
            loaded_at: Utc::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn get(&self, name: &str) -> Option<&ModelConfig> {
        self.models.get(name)
    }

    pub fn default_for(&self, model_type: ModelType) -> Option<&ModelConfig> {
        self.defaults
            .get(&model_type)
            .and_then(|name| self.models.get(name))
    }

    /// Active models, name order.
    pub fn iter(&self) -> impl Iterator<Item = &ModelConfig> {
        self.models.values()
    }
}

/// Process-wide cache of model configurations.
///
/// Readers clone the current `Arc<RegistrySnapshot>` and never wait on a
/// refresh; a refresh builds a complete snapshot before swapping it in.
pub struct ModelRegistry {
    store: Arc<dyn ModelConfigStore>,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    refresh_failures: AtomicU64,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn ModelConfigStore>) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(RegistrySnapshot::empty())),
            refresh_failures: AtomicU64::new(0),
        }
    }

    /// Initial load. Errors propagate so startup can fail loudly.
    pub async fn initialize(&self) -> Result<()> {
        self.reload().await?;
        let snap = self.snapshot();
        info!(
            models = snap.len(),
            defaults = snap.defaults.len(),
            "model registry initialized"
        );
        Ok(())
    }

    /// Re-read the store and swap in a new snapshot. On error the current
    /// snapshot stays in place.
    pub async fn reload(&self) -> Result<()> {
        let rows = self.store.find_active_model_configs().await?;
        let next = RegistrySnapshot::build(rows)?;
        *self.snapshot.write() = Arc::new(next);
        Ok(())
    }

    /// Current snapshot; the lock is held only for the pointer clone.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn get_default(&self, model_type: ModelType) -> Result<ModelConfig> {
        self.snapshot()
            .default_for(model_type)
            .cloned()
            .ok_or_else(|| OperatorError::NotFound(format!("no default {model_type} model")))
    }

    pub fn get_by_name(&self, name: &str) -> Result<ModelConfig> {
        self.snapshot()
            .get(name)
            .cloned()
            .ok_or_else(|| OperatorError::NotFound(format!("model '{name}'")))
    }

    /// Active models, optionally of one type, sorted by name.
    pub fn list_available(&self, model_type: Option<ModelType>) -> Vec<ModelConfig> {
        self.snapshot()
            .iter()
            .filter(|m| model_type.is_none_or(|t| m.model_type == t))
            .cloned()
            .collect()
    }

    /// Other active models of a type, default first then by name.
    pub fn alternates(&self, model_type: ModelType, exclude: &str) -> Vec<ModelConfig> {
        let mut out: Vec<ModelConfig> = self
            .list_available(Some(model_type))
            .into_iter()
            .filter(|m| m.name != exclude)
            .collect();
        out.sort_by_key(|m| !m.is_default);
        out
    }

    pub fn refresh_failures(&self) -> u64 {
        self.refresh_failures.load(Ordering::Relaxed)
    }

    /// One refresh tick: reload, or keep the previous snapshot and count the failure.
    pub async fn refresh(&self) {
        match self.reload().await {
            Ok(()) => debug!(models = self.snapshot().len(), "model registry refreshed"),
            Err(e) => {
                self.refresh_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "model registry refresh failed, keeping previous snapshot");
            }
        }
    }

    /// Periodically refresh until `cancel` fires.
    pub fn spawn_refresh(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("model registry refresh stopped");
                        return;
                    }
                    _ = ticker.tick() => registry.refresh().await,
                }
            }
        })
    }
}
