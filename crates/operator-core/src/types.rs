use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::OperatorError;

/// Identifier of the user or conversation owner that memory rows belong to.
pub type SubjectId = String;

/// Capability class of a configured model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Text,
    Image,
    Video,
    Speech,
    Multimodal,
    Embedding,
}

impl ModelType {
    pub const ALL: [ModelType; 6] = [
        ModelType::Text,
        ModelType::Image,
        ModelType::Video,
        ModelType::Speech,
        ModelType::Multimodal,
        ModelType::Embedding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Text => "text",
            ModelType::Image => "image",
            ModelType::Video => "video",
            ModelType::Speech => "speech",
            ModelType::Multimodal => "multimodal",
            ModelType::Embedding => "embedding",
        }
    }

    /// Whether a model of this type can serve chat completions.
    pub fn can_chat(&self) -> bool {
        matches!(self, ModelType::Text | ModelType::Multimodal)
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ModelType::Text),
            "image" => Ok(ModelType::Image),
            "video" => Ok(ModelType::Video),
            "speech" => Ok(ModelType::Speech),
            "multimodal" => Ok(ModelType::Multimodal),
            "embedding" => Ok(ModelType::Embedding),
            other => Err(OperatorError::InvalidParameter(format!(
                "unknown model type '{other}'"
            ))),
        }
    }
}

/// Lifecycle status of a model configuration row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Active,
    Inactive,
    Testing,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Active => "active",
            ModelStatus::Inactive => "inactive",
            ModelStatus::Testing => "testing",
        }
    }
}

impl FromStr for ModelStatus {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(ModelStatus::Active),
            "inactive" => Ok(ModelStatus::Inactive),
            "testing" => Ok(ModelStatus::Testing),
            other => Err(OperatorError::InvalidParameter(format!(
                "unknown model status '{other}'"
            ))),
        }
    }
}

/// Capability flags advertised by a model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCapabilities {
    pub supports_tools: bool,
    pub supports_multimodal: bool,
    pub supports_images: bool,
}

/// Parameter bag: common knobs plus provider-specific extras
/// (`min_pixels`, `watermark`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParameters {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Price per 1000 prompt tokens; [`DEFAULT_INPUT_PRICE_PER_1K`] when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_price_per_1k: Option<f64>,
    /// Price per 1000 completion tokens; [`DEFAULT_OUTPUT_PRICE_PER_1K`] when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_price_per_1k: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub const DEFAULT_INPUT_PRICE_PER_1K: f64 = 0.001;
pub const DEFAULT_OUTPUT_PRICE_PER_1K: f64 = 0.002;

impl ModelParameters {
    /// Cost of a call, rounded to six decimal places.
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let input = self.input_price_per_1k.unwrap_or(DEFAULT_INPUT_PRICE_PER_1K);
        let output = self.output_price_per_1k.unwrap_or(DEFAULT_OUTPUT_PRICE_PER_1K);
        let raw = f64::from(input_tokens) / 1000.0 * input + f64::from(output_tokens) / 1000.0 * output;
        (raw * 1_000_000.0).round() / 1_000_000.0
    }

    pub fn extra_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(|v| v.as_u64())
    }

    pub fn extra_bool(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(|v| v.as_bool())
    }
}

/// A model registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider-side model name, unique among non-deleted rows.
    pub name: String,
    pub display_name: String,
    /// Provider identifier selecting the adapter, e.g. "openai", "doubao".
    pub provider: String,
    pub model_type: ModelType,
    pub endpoint_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub capabilities: ModelCapabilities,
    #[serde(default)]
    pub is_default: bool,
    pub status: ModelStatus,
    #[serde(default)]
    pub parameters: ModelParameters,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ModelConfig {
    pub fn is_active(&self) -> bool {
        self.status == ModelStatus::Active
    }

    /// Credential with a masked middle, for logs and listings.
    pub fn masked_key(&self) -> String {
        match self.api_key.as_deref() {
            None | Some("") => "(none)".into(),
            Some(k) if k.chars().count() <= 8 => "****".into(),
            Some(k) => {
                let head: String = k.chars().take(4).collect();
                format!("{head}****")
            }
        }
    }
}

/// One successful model call, as billed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: String,
    /// Who the call was made for, when the caller said.
    pub subject: Option<SubjectId>,
    pub provider: String,
    pub model: String,
    pub usage_type: ModelType,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub cost: f64,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Token and cost totals over a set of [`UsageRecord`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}
