use thiserror::Error;

/// Unified error type for the operator core.
#[derive(Error, Debug)]
pub enum OperatorError {
    // ── Lookup / request errors ────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    // ── Provider errors ────────────────────────────────────────
    #[error("provider unavailable: {provider}/{model}: {reason}")]
    ProviderUnavailable {
        provider: String,
        model: String,
        reason: String,
    },

    #[error("provider rejected request: {provider}/{model}: HTTP {status}: {reason}")]
    ProviderRejected {
        provider: String,
        model: String,
        status: u16,
        reason: String,
    },

    #[error("provider timed out after {after_ms}ms: {provider}/{model}")]
    Timeout {
        provider: String,
        model: String,
        after_ms: u64,
    },

    // ── Configuration errors ───────────────────────────────────
    #[error("configuration error: {0}")]
    Configuration(String),

    // ── Persistence errors ─────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("memory error: {0}")]
    Memory(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl OperatorError {
    /// Transient upstream failures that warrant a single retry with the same model.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::ProviderUnavailable { .. } | OperatorError::Timeout { .. }
        )
    }

    /// The `(provider, model)` pair a provider-side failure is tagged with.
    pub fn provider_identity(&self) -> Option<(&str, &str)> {
        match self {
            OperatorError::ProviderUnavailable {
                provider, model, ..
            }
            | OperatorError::ProviderRejected {
                provider, model, ..
            }
            | OperatorError::Timeout {
                provider, model, ..
            } => Some((provider.as_str(), model.as_str())),
            _ => None,
        }
    }

    /// Re-tag a provider failure with the model that was actually dispatched.
    pub fn with_identity(self, provider: &str, model: &str) -> Self {
        match self {
            OperatorError::ProviderUnavailable { reason, .. } => {
                OperatorError::ProviderUnavailable {
                    provider: provider.to_string(),
                    model: model.to_string(),
                    reason,
                }
            }
            OperatorError::ProviderRejected { status, reason, .. } => {
                OperatorError::ProviderRejected {
                    provider: provider.to_string(),
                    model: model.to_string(),
                    status,
                    reason,
                }
            }
            OperatorError::Timeout { after_ms, .. } => OperatorError::Timeout {
                provider: provider.to_string(),
                model: model.to_string(),
                after_ms,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, OperatorError>;
