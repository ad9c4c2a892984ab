use async_trait::async_trait;

use crate::types::{ModelConfig, ModelType, UsageRecord};

/// Read side of the relational model-configuration table.
///
/// The registry only ever reads through this trait; administrative writes go
/// through the concrete store.
#[async_trait]
pub trait ModelConfigStore: Send + Sync {
    /// All rows with status `active` that are not soft-deleted.
    async fn find_active_model_configs(&self) -> crate::Result<Vec<ModelConfig>>;

    /// The active default row for a model type, if one is configured.
    async fn find_default_model(&self, model_type: ModelType) -> crate::Result<Option<ModelConfig>>;
}

/// Destination for usage records. Callers treat a failed write as a warning,
/// never as a failed model call.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record_usage(&self, record: UsageRecord) -> crate::Result<()>;
}
