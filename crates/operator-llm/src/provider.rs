use async_trait::async_trait;
use operator_core::{Message, ModelConfig, OperatorError, Result, Tool, ToolCall};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A chat completion request, independent of any provider.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Conversation, system prompt first when present.
    pub messages: Vec<Message>,
    /// Tools offered to the model for this turn.
    pub tools: Vec<Tool>,
    /// Overrides the model's configured temperature.
    pub temperature: Option<f32>,
    /// Overrides the model's configured max tokens.
    pub max_tokens: Option<u32>,
    /// Subject the call is made for; attributed in usage records.
    pub user: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Whether any message carries an image block.
    pub fn has_images(&self) -> bool {
        self.messages.iter().any(|m| m.has_images())
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
}

impl FinishReason {
    /// Map an OpenAI-style `finish_reason` string.
    pub fn from_wire(reason: Option<&str>, has_tool_calls: bool) -> Self {
        match reason {
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some("tool_calls") => FinishReason::ToolCalls,
            _ if has_tool_calls => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        }
    }
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Parse an OpenAI-style `usage` object; `None` when absent or null.
    pub fn from_wire(value: &serde_json::Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let prompt = value["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let completion = value["completion_tokens"].as_u64().unwrap_or(0) as u32;
        let total = value["total_tokens"]
            .as_u64()
            .map(|t| t as u32)
            .unwrap_or(prompt + completion);
        Some(Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
        })
    }
}

/// A complete (non-streaming) chat result.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
    /// Provider that served the request.
    pub provider: String,
    /// Model name that served the request.
    pub model: String,
}

// ── Streaming ──────────────────────────────────────────────────

/// One event of a streamed chat completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Content text delta.
    Delta(String),
    /// A fully assembled tool call.
    ToolCall(ToolCall),
    /// Terminal: the stream finished normally.
    Done {
        usage: Option<Usage>,
        finish_reason: FinishReason,
    },
    /// Terminal: the stream failed mid-way.
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error(_))
    }
}

/// Receiving half of a streamed chat completion.
///
/// Yields deltas and tool calls in order, then exactly one terminal event.
/// A producer that goes away without sending one surfaces as
/// [`StreamEvent::Error`]. Dropping the stream or calling [`ChatStream::cancel`]
/// closes the channel, which stops the producer at its next send.
#[derive(Debug)]
pub struct ChatStream {
    rx: mpsc::Receiver<StreamEvent>,
    provider: String,
    model: String,
    finished: bool,
}

impl ChatStream {
    /// Create a connected sender/stream pair.
    pub fn channel(
        buffer: usize,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> (mpsc::Sender<StreamEvent>, ChatStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            tx,
            ChatStream {
                rx,
                provider: provider.into(),
                model: model.into(),
                finished: false,
            },
        )
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Next event, or `None` once the terminal event has been yielded.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(event) => {
                if event.is_terminal() {
                    self.finished = true;
                    self.rx.close();
                }
                Some(event)
            }
            None => {
                self.finished = true;
                Some(StreamEvent::Error(
                    "stream closed without a terminal event".into(),
                ))
            }
        }
    }

    /// Stop consuming; the producer observes the closed channel and exits.
    pub fn cancel(&mut self) {
        self.finished = true;
        self.rx.close();
    }

    /// Drain the stream into a single response.
    pub async fn collect(mut self) -> Result<ChatResponse> {
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Delta(text) => content.push_str(&text),
                StreamEvent::ToolCall(call) => tool_calls.push(call),
                StreamEvent::Done {
                    usage,
                    finish_reason,
                } => {
                    return Ok(ChatResponse {
                        content,
                        tool_calls,
                        finish_reason,
                        usage,
                        provider: self.provider.clone(),
                        model: self.model.clone(),
                    });
                }
                StreamEvent::Error(reason) => {
                    return Err(OperatorError::ProviderUnavailable {
                        provider: self.provider.clone(),
                        model: self.model.clone(),
                        reason,
                    });
                }
            }
        }
        Err(OperatorError::ProviderUnavailable {
            provider: self.provider,
            model: self.model,
            reason: "stream already finished".into(),
        })
    }
}

// ── Media ──────────────────────────────────────────────────────

/// An image generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    /// `"WIDTHxHEIGHT"`; the adapter's default size when absent.
    #[serde(default)]
    pub size: Option<String>,
    /// Number of images; 1 when absent.
    #[serde(default)]
    pub n: Option<u32>,
    /// Explicit model name instead of the image default.
    #[serde(default)]
    pub model: Option<String>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub b64_json: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageResponse {
    pub images: Vec<GeneratedImage>,
    /// Size actually requested from the provider.
    pub size: String,
    pub provider: String,
    pub model: String,
}

/// A video generation request, served through the provider's task API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoRequest {
    pub prompt: String,
    /// Optional first-frame image (URL or data URI).
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    /// Aspect ratio such as `"16:9"`.
    #[serde(default)]
    pub ratio: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl VideoRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl VideoStatus {
    pub fn from_wire(status: &str) -> Self {
        match status {
            "running" => VideoStatus::Running,
            "succeeded" => VideoStatus::Succeeded,
            "failed" => VideoStatus::Failed,
            "cancelled" | "canceled" => VideoStatus::Cancelled,
            _ => VideoStatus::Queued,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, VideoStatus::Queued | VideoStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoResponse {
    pub task_id: String,
    pub status: VideoStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub provider: String,
    pub model: String,
}

// ── Speech ─────────────────────────────────────────────────────

/// Longest text accepted for one synthesis call.
pub const MAX_SPEECH_INPUT_CHARS: usize = 4096;

/// Text-to-speech request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub input: String,
    /// Provider voice id; the adapter's default when absent.
    #[serde(default)]
    pub voice: Option<String>,
    /// Playback speed, 0.25 to 4.0.
    #[serde(default)]
    pub speed: Option<f32>,
    /// Audio format such as `mp3` or `wav`; mp3 when absent.
    #[serde(default)]
    pub format: Option<String>,
    /// Explicit model name instead of the speech default.
    #[serde(default)]
    pub model: Option<String>,
}

impl SpeechRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }
}

/// Synthesized audio.
#[derive(Debug, Clone)]
pub struct SpeechResponse {
    pub audio: Vec<u8>,
    pub content_type: String,
    pub provider: String,
    pub model: String,
}

/// Speech-to-text request carrying the raw audio file.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionRequest {
    pub audio: Vec<u8>,
    /// File name sent with the upload; its extension names the format.
    pub filename: String,
    /// ISO-639-1 hint such as `zh` or `en`.
    pub language: Option<String>,
    /// Vocabulary or style hint for the recognizer.
    pub prompt: Option<String>,
    pub model: Option<String>,
}

impl TranscriptionRequest {
    pub fn new(audio: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            audio,
            filename: filename.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub provider: String,
    pub model: String,
}

/// MIME type for an audio file name, by extension.
pub fn audio_mime(filename: &str) -> &'static str {
    let ext = filename.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp3" | "mpeg" | "mpga") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg" | "oga") => "audio/ogg",
        Some("webm") => "audio/webm",
        Some("m4a" | "mp4") => "audio/mp4",
        Some("flac") => "audio/flac",
        Some("pcm") => "audio/pcm",
        _ => "application/octet-stream",
    }
}

/// Parse `"WIDTHxHEIGHT"` (also `X` or `*` as separator).
pub fn parse_image_size(size: &str) -> Result<(u32, u32)> {
    let invalid = || {
        OperatorError::InvalidParameter(format!(
            "image size '{size}' must look like WIDTHxHEIGHT"
        ))
    };
    let (w, h) = size
        .trim()
        .split_once(['x', 'X', '*'])
        .ok_or_else(invalid)?;
    let w: u32 = w.trim().parse().map_err(|_| invalid())?;
    let h: u32 = h.trim().parse().map_err(|_| invalid())?;
    if w == 0 || h == 0 {
        return Err(invalid());
    }
    Ok((w, h))
}

// ── Adapter trait ──────────────────────────────────────────────

/// Implemented once per provider wire protocol. The bridge picks the adapter
/// by the registry entry's `provider` field and passes that entry along with
/// every call.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider identifier matched against `ModelConfig::provider`.
    fn id(&self) -> &str;

    /// Minimum total pixel count for generated images, if the provider has one.
    fn min_image_pixels(&self) -> Option<u64> {
        None
    }

    /// Size used when an image request does not name one.
    fn default_image_size(&self) -> &str {
        "1024x1024"
    }

    async fn chat(&self, model: &ModelConfig, request: &ChatRequest) -> Result<ChatResponse>;

    /// Start a streamed completion. Upstream HTTP errors surface here rather
    /// than as stream events so the caller can retry.
    async fn stream_chat(&self, model: &ModelConfig, request: &ChatRequest)
    -> Result<ChatStream>;

    async fn generate_image(
        &self,
        model: &ModelConfig,
        _request: &ImageRequest,
    ) -> Result<ImageResponse> {
        Err(OperatorError::InvalidParameter(format!(
            "provider '{}' does not generate images ({})",
            self.id(),
            model.name
        )))
    }

    /// Submit a video generation task.
    async fn generate_video(
        &self,
        model: &ModelConfig,
        _request: &VideoRequest,
    ) -> Result<VideoResponse> {
        Err(OperatorError::InvalidParameter(format!(
            "provider '{}' does not generate video ({})",
            self.id(),
            model.name
        )))
    }

    /// Poll a previously submitted video task.
    async fn video_status(&self, model: &ModelConfig, task_id: &str) -> Result<VideoResponse> {
        Err(OperatorError::NotFound(format!(
            "provider '{}' has no video task '{task_id}' ({})",
            self.id(),
            model.name
        )))
    }

    async fn text_to_speech(
        &self,
        model: &ModelConfig,
        _request: &SpeechRequest,
    ) -> Result<SpeechResponse> {
        Err(OperatorError::Configuration(format!(
            "provider '{}' does not synthesize speech ({})",
            self.id(),
            model.name
        )))
    }

    async fn speech_to_text(
        &self,
        model: &ModelConfig,
        _request: &TranscriptionRequest,
    ) -> Result<TranscriptionResponse> {
        Err(OperatorError::Configuration(format!(
            "provider '{}' does not transcribe audio ({})",
            self.id(),
            model.name
        )))
    }
}
