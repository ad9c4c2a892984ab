//! Mock provider adapter for deterministic testing and offline runs.
//!
//! Returns pre-configured responses without making any HTTP calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use operator_core::{ModelConfig, OperatorError, Result, Role, ToolCall};
use parking_lot::Mutex;

use crate::provider::*;

pub const MOCK_ID: &str = "mock";

/// A failure the mock should report instead of answering.
#[derive(Debug, Clone)]
pub enum MockError {
    /// Transient upstream failure (5xx, connection reset).
    Unavailable(String),
    /// Upstream rejected the request with a 4xx status.
    Rejected(u16, String),
}

/// A pre-configured response from the mock adapter.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
    /// If set, the adapter returns this error instead.
    pub error: Option<MockError>,
    /// Sleep before answering (drives deadline tests).
    pub delay: Option<Duration>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            text: String::new(),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: Some(Usage::new(100, 50)),
            error: None,
            delay: None,
        }
    }
}

impl MockResponse {
    /// Create a text response.
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    /// Create a transient failure.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            error: Some(MockError::Unavailable(reason.to_string())),
            ..Default::default()
        }
    }

    /// Create a 4xx rejection.
    pub fn rejected(status: u16, reason: &str) -> Self {
        Self {
            error: Some(MockError::Rejected(status, reason.to_string())),
            ..Default::default()
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A mock adapter that replays queued responses and records every request.
///
/// # Example
/// ```
/// use operator_llm::mock::MockAdapter;
/// let adapter = MockAdapter::new().with_response("Hello, world!");
/// ```
pub struct MockAdapter {
    id: String,
    responses: Arc<Mutex<Vec<MockResponse>>>,
    /// Track all chat requests received (for assertions in tests).
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
    calls: Arc<AtomicUsize>,
    min_pixels: Option<u64>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            id: MOCK_ID.into(),
            responses: Arc::new(Mutex::new(vec![])),
            requests: Arc::new(Mutex::new(vec![])),
            calls: Arc::new(AtomicUsize::new(0)),
            min_pixels: None,
        }
    }

    /// Register under another provider identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Queue a simple text response.
    pub fn with_response(self, text: &str) -> Self {
        self.responses.lock().push(MockResponse::text(text));
        self
    }

    /// Queue a tool call response.
    pub fn with_tool_call(self, name: &str, args: serde_json::Value) -> Self {
        self.responses.lock().push(MockResponse {
            tool_calls: vec![ToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4()),
                tool_name: name.to_string(),
                arguments: args,
            }],
            finish_reason: FinishReason::ToolCalls,
            ..Default::default()
        });
        self
    }

    /// Queue a transient failure.
    pub fn with_error(self, reason: &str) -> Self {
        self.responses.lock().push(MockResponse::unavailable(reason));
        self
    }

    /// Queue a fully custom response.
    pub fn with_mock_response(self, resp: MockResponse) -> Self {
        self.responses.lock().push(resp);
        self
    }

    pub fn with_min_pixels(mut self, min_pixels: u64) -> Self {
        self.min_pixels = Some(min_pixels);
        self
    }

    /// Queue a response after construction.
    pub fn queue_response(&self, resp: MockResponse) {
        self.responses.lock().push(resp);
    }

    /// Number of provider calls received, across all operations.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Shared call counter, readable after the adapter moves into a bridge.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Get all chat requests that were made to this adapter.
    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<ChatRequest>>> {
        Arc::clone(&self.requests)
    }

    /// Pop the next queued response, or answer with `fallback` text.
    fn next_response(&self, fallback: impl FnOnce() -> String) -> MockResponse {
        let mut responses = self.responses.lock();
        if !responses.is_empty() {
            return responses.remove(0);
        }
        MockResponse::text(&fallback())
    }

    /// With nothing queued, echo the last user message so offline runs still
    /// produce a reply.
    async fn answer(&self, model: &ModelConfig, request: Option<&ChatRequest>) -> Result<MockResponse> {
        let echo = || {
            let last_user = request
                .and_then(|r| r.messages.iter().rev().find(|m| m.role == Role::User))
                .map(|m| m.text_content())
                .unwrap_or_default();
            format!("(mock) {last_user}")
        };
        self.answer_with(model, request, echo).await
    }

    /// Count the call, pop a response, honor its delay and error.
    async fn answer_with(
        &self,
        model: &ModelConfig,
        request: Option<&ChatRequest>,
        fallback: impl FnOnce() -> String,
    ) -> Result<MockResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(req) = request {
            self.requests.lock().push(req.clone());
        }
        let mock = self.next_response(fallback);
        if let Some(delay) = mock.delay {
            tokio::time::sleep(delay).await;
        }
        match mock.error {
            Some(MockError::Unavailable(reason)) => Err(OperatorError::ProviderUnavailable {
                provider: model.provider.clone(),
                model: model.name.clone(),
                reason,
            }),
            Some(MockError::Rejected(status, reason)) => Err(OperatorError::ProviderRejected {
                provider: model.provider.clone(),
                model: model.name.clone(),
                status,
                reason,
            }),
            None => Ok(mock),
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn min_image_pixels(&self) -> Option<u64> {
        self.min_pixels
    }

    async fn chat(&self, model: &ModelConfig, request: &ChatRequest) -> Result<ChatResponse> {
        let mock = self.answer(model, Some(request)).await?;
        Ok(ChatResponse {
            content: mock.text,
            tool_calls: mock.tool_calls,
            finish_reason: mock.finish_reason,
            usage: mock.usage,
            provider: model.provider.clone(),
            model: model.name.clone(),
        })
    }

    async fn stream_chat(
        &self,
        model: &ModelConfig,
        request: &ChatRequest,
    ) -> Result<ChatStream> {
        let mock = self.answer(model, Some(request)).await?;
        let (tx, stream) = ChatStream::channel(64, &model.provider, &model.name);

        tokio::spawn(async move {
            // Stream the text word by word
            for word in mock.text.split_inclusive(' ') {
                if tx.send(StreamEvent::Delta(word.to_string())).await.is_err() {
                    return;
                }
            }
            for tc in mock.tool_calls {
                if tx.send(StreamEvent::ToolCall(tc)).await.is_err() {
                    return;
                }
            }
            let _ = tx
                .send(StreamEvent::Done {
                    usage: mock.usage,
                    finish_reason: mock.finish_reason,
                })
                .await;
        });

        Ok(stream)
    }

    async fn generate_image(
        &self,
        model: &ModelConfig,
        request: &ImageRequest,
    ) -> Result<ImageResponse> {
        self.answer(model, None).await?;
        let n = request.n.unwrap_or(1);
        Ok(ImageResponse {
            images: (0..n)
                .map(|i| GeneratedImage {
                    url: Some(format!("mock://image/{i}")),
                    b64_json: None,
                })
                .collect(),
            size: request
                .size
                .clone()
                .unwrap_or_else(|| self.default_image_size().to_string()),
            provider: model.provider.clone(),
            model: model.name.clone(),
        })
    }

    async fn generate_video(
        &self,
        model: &ModelConfig,
        _request: &VideoRequest,
    ) -> Result<VideoResponse> {
        self.answer(model, None).await?;
        Ok(VideoResponse {
            task_id: format!("mock-task-{}", uuid::Uuid::new_v4()),
            status: VideoStatus::Queued,
            video_url: None,
            provider: model.provider.clone(),
            model: model.name.clone(),
        })
    }

    async fn video_status(&self, model: &ModelConfig, task_id: &str) -> Result<VideoResponse> {
        self.answer(model, None).await?;
        Ok(VideoResponse {
            task_id: task_id.to_string(),
            status: VideoStatus::Succeeded,
            video_url: Some(format!("mock://video/{task_id}")),
            provider: model.provider.clone(),
            model: model.name.clone(),
        })
    }

    /// The "audio" is the input text as UTF-8 bytes.
    async fn text_to_speech(
        &self,
        model: &ModelConfig,
        request: &SpeechRequest,
    ) -> Result<SpeechResponse> {
        self.answer(model, None).await?;
        Ok(SpeechResponse {
            audio: request.input.as_bytes().to_vec(),
            content_type: "audio/mpeg".into(),
            provider: model.provider.clone(),
            model: model.name.clone(),
        })
    }

    /// Queued text is the transcript; otherwise the file name is echoed.
    async fn speech_to_text(
        &self,
        model: &ModelConfig,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionResponse> {
        let mock = self
            .answer_with(model, None, || format!("(mock) transcript of {}", request.filename))
            .await?;
        Ok(TranscriptionResponse {
            text: mock.text,
            language: request.language.clone(),
            provider: model.provider.clone(),
            model: model.name.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use operator_core::{Message, ModelStatus, ModelType};

    fn model() -> ModelConfig {
        ModelConfig {
            name: "mock-chat".into(),
            display_name: "Mock".into(),
            provider: MOCK_ID.into(),
            model_type: ModelType::Text,
            endpoint_url: "mock://".into(),
            api_key: None,
            capabilities: Default::default(),
            is_default: true,
            status: ModelStatus::Active,
            parameters: Default::default(),
            updated_at: None,
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new(vec![Message::user("hello")])
    }

    #[tokio::test]
    async fn test_mock_text_response() {
        let adapter = MockAdapter::new().with_response("Hello!");
        let resp = adapter.chat(&model(), &request()).await.unwrap();
        assert_eq!(resp.content, "Hello!");
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert!(resp.tool_calls.is_empty());
        assert_eq!(resp.provider, "mock");
    }

    #[tokio::test]
    async fn test_mock_tool_call() {
        let adapter = MockAdapter::new()
            .with_tool_call("any_query", serde_json::json!({"query": "班级人数"}));
        let resp = adapter.chat(&model(), &request()).await.unwrap();
        assert_eq!(resp.tool_calls[0].tool_name, "any_query");
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
    }

    #[tokio::test]
    async fn test_mock_error_kinds() {
        let adapter = MockAdapter::new()
            .with_error("HTTP 503")
            .with_mock_response(MockResponse::rejected(400, "bad request"));
        let first = adapter.chat(&model(), &request()).await.unwrap_err();
        assert!(first.is_retryable());
        let second = adapter.chat(&model(), &request()).await.unwrap_err();
        assert!(matches!(
            second,
            OperatorError::ProviderRejected { status: 400, .. }
        ));
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn test_mock_echoes_when_queue_empty() {
        let adapter = MockAdapter::new();
        let resp = adapter.chat(&model(), &request()).await.unwrap();
        assert_eq!(resp.content, "(mock) hello");
    }

    #[tokio::test]
    async fn test_mock_speech_round_trip() {
        let adapter = MockAdapter::new();
        let speech = adapter
            .text_to_speech(&model(), &SpeechRequest::new("放学啦"))
            .await
            .unwrap();
        assert_eq!(speech.audio, "放学啦".as_bytes());

        let transcript = adapter
            .speech_to_text(&model(), &TranscriptionRequest::new(speech.audio, "note.mp3"))
            .await
            .unwrap();
        assert_eq!(transcript.text, "(mock) transcript of note.mp3");

        adapter.queue_response(MockResponse::text("明天春游"));
        let transcript = adapter
            .speech_to_text(&model(), &TranscriptionRequest::new(vec![1, 2], "a.wav"))
            .await
            .unwrap();
        assert_eq!(transcript.text, "明天春游");
        assert_eq!(adapter.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let adapter = MockAdapter::new().with_response("ok");
        let _ = adapter.chat(&model(), &request()).await;
        let recorded = adapter.recorded_requests();
        let recorded = recorded.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].messages[0].text_content(), "hello");
    }

    #[tokio::test]
    async fn test_mock_streaming() {
        let adapter = MockAdapter::new().with_response("Hello world");
        let mut stream = adapter.stream_chat(&model(), &request()).await.unwrap();
        let mut events = vec![];
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        assert_eq!(events[0], StreamEvent::Delta("Hello ".into()));
        assert_eq!(events[1], StreamEvent::Delta("world".into()));
        assert!(matches!(events.last().unwrap(), StreamEvent::Done { .. }));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_mock_multiple_responses_in_order() {
        let adapter = MockAdapter::new()
            .with_response("first")
            .with_response("second")
            .with_response("third");
        let m = model();
        let r1 = adapter.chat(&m, &request()).await.unwrap();
        let r2 = adapter.chat(&m, &request()).await.unwrap();
        let r3 = adapter.chat(&m, &request()).await.unwrap();
        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
        assert_eq!(r3.content, "third");
    }
}
