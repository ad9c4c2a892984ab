use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use operator_core::{ModelConfig, ModelType, OperatorError, Result, UsageRecord, UsageSink};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::doubao::DoubaoAdapter;
use crate::mock::MockAdapter;
use crate::openai::OpenAiAdapter;
use crate::provider::*;
use crate::registry::ModelRegistry;

/// Attempts per request: the first try plus one retry on a transient failure.
const MAX_ATTEMPTS: u32 = 2;

/// Timing knobs for provider calls.
#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    /// Deadline for each individual attempt.
    pub request_timeout: Duration,
    /// Pause before the retry (multiplied by the attempt number).
    pub retry_delay: Duration,
    /// Channel capacity for streamed completions.
    pub stream_buffer: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            retry_delay: Duration::from_millis(1000),
            stream_buffer: 256,
        }
    }
}

/// Which operation a model is being resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Chat,
    Image,
    Video,
    Speech,
}

impl Capability {
    fn accepts(&self, model_type: ModelType) -> bool {
        match self {
            Capability::Chat => model_type.can_chat(),
            Capability::Image => model_type == ModelType::Image,
            Capability::Video => model_type == ModelType::Video,
            Capability::Speech => model_type == ModelType::Speech,
        }
    }

    /// Types whose default serves this capability, in preference order.
    fn default_types(&self) -> &'static [ModelType] {
        match self {
            Capability::Chat => &[ModelType::Text, ModelType::Multimodal],
            Capability::Image => &[ModelType::Image],
            Capability::Video => &[ModelType::Video],
            Capability::Speech => &[ModelType::Speech],
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Capability::Chat => "chat",
            Capability::Image => "image",
            Capability::Video => "video",
            Capability::Speech => "speech",
        }
    }
}

/// Single entry point for every model call. Resolves the target model from
/// the registry, validates locally, dispatches to the provider adapter, and
/// normalizes failures.
pub struct ModelBridge {
    registry: Arc<ModelRegistry>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    settings: BridgeSettings,
    usage: Option<Arc<dyn UsageSink>>,
}

impl ModelBridge {
    /// A bridge with no adapters registered.
    pub fn new(registry: Arc<ModelRegistry>, settings: BridgeSettings) -> Self {
        Self {
            registry,
            adapters: HashMap::new(),
            settings,
            usage: None,
        }
    }

    /// A bridge with the built-in adapters: `openai`, `doubao`, `mock`.
    pub fn with_default_adapters(registry: Arc<ModelRegistry>, settings: BridgeSettings) -> Self {
        let buffer = settings.stream_buffer;
        let idle = settings.request_timeout;
        Self::new(registry, settings)
            .with_adapter(Arc::new(
                OpenAiAdapter::new()
                    .with_stream_buffer(buffer)
                    .with_stream_idle_timeout(idle),
            ))
            .with_adapter(Arc::new(
                DoubaoAdapter::new()
                    .with_stream_buffer(buffer)
                    .with_stream_idle_timeout(idle),
            ))
            .with_adapter(Arc::new(MockAdapter::new()))
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register_adapter(adapter);
        self
    }

    /// Record tokens and cost of every successful chat completion.
    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage = Some(sink);
        self
    }

    /// Register (or replace) the adapter for its provider identifier.
    pub fn register_adapter(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        let id = adapter.id().to_lowercase();
        debug!(provider = %id, "registered provider adapter");
        self.adapters.insert(id, adapter);
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    // ── Resolution ─────────────────────────────────────────────

    /// Pick the model for an operation: the override when given (it must be
    /// active and of a compatible type), otherwise the capability's default.
    pub fn resolve(&self, capability: Capability, model_override: Option<&str>) -> Result<ModelConfig> {
        if let Some(name) = model_override {
            let model = self.registry.get_by_name(name)?;
            if !capability.accepts(model.model_type) {
                return Err(OperatorError::InvalidParameter(format!(
                    "model '{name}' is a {} model and cannot serve {} requests",
                    model.model_type,
                    capability.as_str()
                )));
            }
            return Ok(model);
        }
        let snapshot = self.registry.snapshot();
        capability
            .default_types()
            .iter()
            .find_map(|t| snapshot.default_for(*t).cloned())
            .ok_or_else(|| {
                OperatorError::NotFound(format!("no default model for {} requests", capability.as_str()))
            })
    }

    fn adapter_for(&self, model: &ModelConfig) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&model.provider.to_lowercase())
            .cloned()
            .ok_or_else(|| {
                OperatorError::Configuration(format!(
                    "no adapter for provider '{}' (model '{}')",
                    model.provider, model.name
                ))
            })
    }

    /// Run one provider call under the per-attempt deadline, retrying once
    /// with the same model on a transient failure.
    async fn with_retry<T, F, Fut>(&self, model: &ModelConfig, op: &str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = self.settings.request_timeout;
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(deadline, call()).await {
                Ok(result) => result,
                Err(_) => Err(OperatorError::Timeout {
                    provider: model.provider.clone(),
                    model: model.name.clone(),
                    after_ms: deadline.as_millis() as u64,
                }),
            }
            .map_err(|e| e.with_identity(&model.provider, &model.name));

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let delay = self.settings.retry_delay * attempt;
                    warn!(
                        provider = %model.provider,
                        model = %model.name,
                        op,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(provider = %model.provider, model = %model.name, op, error = %e, "provider call failed");
                    return Err(e);
                }
            }
        }
    }

    // ── Chat ───────────────────────────────────────────────────

    pub async fn chat_completion(
        &self,
        request: &ChatRequest,
        model_override: Option<&str>,
    ) -> Result<ChatResponse> {
        validate_chat(request)?;
        let model = self.resolve(Capability::Chat, model_override)?;
        let adapter = self.adapter_for(&model)?;
        info!(provider = %model.provider, model = %model.name, messages = request.messages.len(), tools = request.tools.len(), "chat completion");

        let started = Instant::now();
        let response = self
            .with_retry(&model, "chat", || adapter.chat(&model, request))
            .await?;
        debug!(
            model = %model.name,
            finish = ?response.finish_reason,
            tokens = response.usage.map(|u| u.total_tokens),
            "chat completion finished"
        );
        self.record_usage(&model, response.usage, request.user.as_deref(), started.elapsed())
            .await;
        Ok(response)
    }

    /// Start a streamed completion. Retries cover only stream setup; once
    /// events flow, failures arrive as a terminal `StreamEvent::Error`.
    pub async fn stream_chat_completion(
        &self,
        request: &ChatRequest,
        model_override: Option<&str>,
    ) -> Result<ChatStream> {
        validate_chat(request)?;
        let model = self.resolve(Capability::Chat, model_override)?;
        let adapter = self.adapter_for(&model)?;
        info!(provider = %model.provider, model = %model.name, "streaming chat completion");

        self.with_retry(&model, "stream_chat", || adapter.stream_chat(&model, request))
            .await
    }

    /// Record a finished streamed completion, looked up by model name.
    pub async fn record_stream_usage(
        &self,
        model_name: &str,
        usage: Option<Usage>,
        user: Option<&str>,
        elapsed: Duration,
    ) {
        if self.usage.is_none() {
            return;
        }
        match self.registry.get_by_name(model_name) {
            Ok(model) => self.record_usage(&model, usage, user, elapsed).await,
            Err(e) => warn!(model = %model_name, error = %e, "usage not recorded"),
        }
    }

    /// Best-effort write to the usage sink; failures are logged only.
    async fn record_usage(&self, model: &ModelConfig, usage: Option<Usage>, user: Option<&str>, elapsed: Duration) {
        let Some(sink) = &self.usage else { return };
        let usage = usage.unwrap_or_default();
        let total_tokens = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens + usage.completion_tokens
        };
        let record = UsageRecord {
            request_id: Uuid::new_v4().to_string(),
            subject: user.map(str::to_string),
            provider: model.provider.clone(),
            model: model.name.clone(),
            usage_type: model.model_type,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens,
            cost: model.parameters.cost(usage.prompt_tokens, usage.completion_tokens),
            duration_ms: elapsed.as_millis() as u64,
            recorded_at: Utc::now(),
        };
        if let Err(e) = sink.record_usage(record).await {
            warn!(model = %model.name, error = %e, "failed to record usage");
        }
    }

    // ── Media ──────────────────────────────────────────────────

    pub async fn generate_image(&self, request: &ImageRequest) -> Result<ImageResponse> {
        if request.prompt.trim().is_empty() {
            return Err(OperatorError::InvalidParameter("image prompt is empty".into()));
        }
        let model = self.resolve(Capability::Image, request.model.as_deref())?;
        let adapter = self.adapter_for(&model)?;

        let size = request
            .size
            .clone()
            .unwrap_or_else(|| adapter.default_image_size().to_string());
        let (width, height) = parse_image_size(&size)?;
        let pixels = u64::from(width) * u64::from(height);
        let min_pixels = model
            .parameters
            .extra_u64("min_pixels")
            .or_else(|| adapter.min_image_pixels());
        if let Some(min) = min_pixels
            && pixels < min
        {
            return Err(OperatorError::InvalidParameter(format!(
                "image size {size} has {pixels} pixels, below the minimum of {min} for model '{}'",
                model.name
            )));
        }

        let request = ImageRequest {
            size: Some(size),
            ..request.clone()
        };
        info!(provider = %model.provider, model = %model.name, size = ?request.size, "image generation");
        self.with_retry(&model, "image", || adapter.generate_image(&model, &request))
            .await
    }

    /// Submit a video generation task.
    pub async fn generate_video(&self, request: &VideoRequest) -> Result<VideoResponse> {
        if request.prompt.trim().is_empty() {
            return Err(OperatorError::InvalidParameter("video prompt is empty".into()));
        }
        let model = self.resolve(Capability::Video, request.model.as_deref())?;
        let adapter = self.adapter_for(&model)?;
        info!(provider = %model.provider, model = %model.name, "video generation");
        self.with_retry(&model, "video", || adapter.generate_video(&model, request))
            .await
    }

    /// Poll a video task submitted through [`ModelBridge::generate_video`].
    pub async fn video_status(&self, task_id: &str, model_override: Option<&str>) -> Result<VideoResponse> {
        let model = self.resolve(Capability::Video, model_override)?;
        let adapter = self.adapter_for(&model)?;
        self.with_retry(&model, "video_status", || adapter.video_status(&model, task_id))
            .await
    }

    // ── Speech ─────────────────────────────────────────────────

    pub async fn text_to_speech(&self, request: &SpeechRequest) -> Result<SpeechResponse> {
        validate_speech(request)?;
        let model = self.resolve(Capability::Speech, request.model.as_deref())?;
        let adapter = self.adapter_for(&model)?;
        info!(provider = %model.provider, model = %model.name, chars = request.input.chars().count(), "text to speech");
        self.with_retry(&model, "tts", || adapter.text_to_speech(&model, request))
            .await
    }

    pub async fn speech_to_text(&self, request: &TranscriptionRequest) -> Result<TranscriptionResponse> {
        if request.audio.is_empty() {
            return Err(OperatorError::InvalidParameter("audio is empty".into()));
        }
        if request.filename.trim().is_empty() {
            return Err(OperatorError::InvalidParameter(
                "audio needs a file name with an extension".into(),
            ));
        }
        let model = self.resolve(Capability::Speech, request.model.as_deref())?;
        let adapter = self.adapter_for(&model)?;
        info!(provider = %model.provider, model = %model.name, bytes = request.audio.len(), "speech to text");
        self.with_retry(&model, "stt", || adapter.speech_to_text(&model, request))
            .await
    }
}

fn validate_speech(request: &SpeechRequest) -> Result<()> {
    let chars = request.input.trim().chars().count();
    if chars == 0 {
        return Err(OperatorError::InvalidParameter("speech input is empty".into()));
    }
    if chars > MAX_SPEECH_INPUT_CHARS {
        return Err(OperatorError::InvalidParameter(format!(
            "speech input has {chars} characters, the limit is {MAX_SPEECH_INPUT_CHARS}"
        )));
    }
    if let Some(speed) = request.speed
        && !(0.25..=4.0).contains(&speed)
    {
        return Err(OperatorError::InvalidParameter(format!(
            "speech speed {speed} is outside 0.25 to 4.0"
        )));
    }
    Ok(())
}

fn validate_chat(request: &ChatRequest) -> Result<()> {
    if request.messages.is_empty() {
        return Err(OperatorError::InvalidParameter(
            "chat request has no messages".into(),
        ));
    }
    Ok(())
}
