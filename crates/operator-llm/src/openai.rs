use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use operator_core::{Message, MessageContent, ModelConfig, OperatorError, Result, Role, ToolCall};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::*;

pub const OPENAI_ID: &str = "openai";

/// Endpoint suffixes stripped from a configured URL to obtain the API base.
const ENDPOINT_SUFFIXES: [&str; 2] = ["/chat/completions", "/images/generations"];
const ENDPOINT_FAMILIES: [&str; 2] = ["/audio/", "/video/"];

/// Longest gap between two stream chunks before the stream is abandoned.
/// Voice used when a speech request names none.
pub const DEFAULT_VOICE: &str = "alloy";

pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible API adapter (OpenAI, Azure, vLLM, DeepSeek, ...).
pub struct OpenAiAdapter {
    client: reqwest::Client,
    id: String,
    stream_buffer: usize,
    stream_idle_timeout: Duration,
}

impl Default for OpenAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            id: OPENAI_ID.into(),
            stream_buffer: 256,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        }
    }

    /// Register the same wire protocol under another provider identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer;
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn chat(&self, model: &ModelConfig, request: &ChatRequest) -> Result<ChatResponse> {
        let body = chat_body(model, request, false);
        let url = format!("{}/chat/completions", base_url(&model.endpoint_url));
        let resp = post_json(&self.client, &url, model, &body).await?;
        let data: Value = resp.json().await.map_err(|e| unavailable(model, e))?;
        Ok(parse_chat_response(&data, model))
    }

    async fn stream_chat(
        &self,
        model: &ModelConfig,
        request: &ChatRequest,
    ) -> Result<ChatStream> {
        let body = chat_body(model, request, true);
        let url = format!("{}/chat/completions", base_url(&model.endpoint_url));
        let resp = post_json(&self.client, &url, model, &body).await?;

        let (tx, stream) = ChatStream::channel(self.stream_buffer, &model.provider, &model.name);
        tokio::spawn(pump_sse(resp.bytes_stream(), tx, self.stream_idle_timeout));
        Ok(stream)
    }

    async fn generate_image(
        &self,
        model: &ModelConfig,
        request: &ImageRequest,
    ) -> Result<ImageResponse> {
        let size = request
            .size
            .clone()
            .unwrap_or_else(|| self.default_image_size().to_string());
        let body = json!({
            "model": model.name,
            "prompt": request.prompt,
            "n": request.n.unwrap_or(1),
            "size": size,
            "response_format": "url",
        });
        let url = format!("{}/images/generations", base_url(&model.endpoint_url));
        let resp = post_json(&self.client, &url, model, &body).await?;
        let data: Value = resp.json().await.map_err(|e| unavailable(model, e))?;
        Ok(parse_image_response(&data, model, size))
    }

    async fn text_to_speech(
        &self,
        model: &ModelConfig,
        request: &SpeechRequest,
    ) -> Result<SpeechResponse> {
        let body = speech_body(model, request);
        let url = format!("{}/audio/speech", base_url(&model.endpoint_url));
        let resp = post_json(&self.client, &url, model, &body).await?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let audio = resp.bytes().await.map_err(|e| unavailable(model, e))?;
        debug!(model = %model.name, bytes = audio.len(), "speech synthesized");
        Ok(SpeechResponse {
            audio: audio.to_vec(),
            content_type,
            provider: model.provider.clone(),
            model: model.name.clone(),
        })
    }

    async fn speech_to_text(
        &self,
        model: &ModelConfig,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionResponse> {
        let file = reqwest::multipart::Part::bytes(request.audio.clone())
            .file_name(request.filename.clone())
            .mime_str(audio_mime(&request.filename))
            .map_err(|e| OperatorError::InvalidParameter(format!("audio upload: {e}")))?;
        let mut form = reqwest::multipart::Form::new()
            .text("model", model.name.clone())
            .text("response_format", "json")
            .part("file", file);
        if let Some(language) = &request.language {
            form = form.text("language", language.clone());
        }
        if let Some(prompt) = &request.prompt {
            form = form.text("prompt", prompt.clone());
        }

        let url = format!("{}/audio/transcriptions", base_url(&model.endpoint_url));
        debug!(provider = %model.provider, model = %model.name, url, "POST multipart");
        let resp = authorize(self.client.post(&url), model)
            .multipart(form)
            .send()
            .await
            .map_err(|e| unavailable(model, e))?;
        let resp = check_status(resp, model).await?;
        let data: Value = resp.json().await.map_err(|e| unavailable(model, e))?;
        parse_transcription(&data, model)
    }
}

pub(crate) fn speech_body(model: &ModelConfig, request: &SpeechRequest) -> Value {
    let mut body = json!({
        "model": model.name,
        "input": request.input,
        "voice": request.voice.as_deref().unwrap_or(DEFAULT_VOICE),
        "response_format": request.format.as_deref().unwrap_or("mp3"),
    });
    if let Some(speed) = request.speed {
        body["speed"] = json!(speed);
    }
    body
}

pub(crate) fn parse_transcription(data: &Value, model: &ModelConfig) -> Result<TranscriptionResponse> {
    let text = data["text"]
        .as_str()
        .ok_or_else(|| unavailable(model, "transcription response has no text"))?;
    Ok(TranscriptionResponse {
        text: text.trim().to_string(),
        language: data["language"].as_str().map(str::to_string),
        provider: model.provider.clone(),
        model: model.name.clone(),
    })
}

// ── Wire helpers (shared with other OpenAI-compatible adapters) ─

/// Derive the API base from a configured endpoint, which may be either the
/// base itself or a full operation URL.
pub fn base_url(endpoint: &str) -> String {
    let mut url = endpoint.trim().trim_end_matches('/');
    for suffix in ENDPOINT_SUFFIXES {
        if let Some(stripped) = url.strip_suffix(suffix) {
            url = stripped;
        }
    }
    for family in ENDPOINT_FAMILIES {
        if let Some(pos) = url.rfind(family) {
            url = &url[..pos];
        }
    }
    url.trim_end_matches('/').to_string()
}

/// Returns true for models that require `max_completion_tokens` instead of `max_tokens`.
fn uses_max_completion_tokens(model: &str) -> bool {
    let m = model.to_lowercase();
    m.starts_with("o1")
        || m.starts_with("o3")
        || m.starts_with("o4")
        || m.contains("gpt-5")
        || m.contains("gpt5")
}

pub(crate) fn chat_body(model: &ModelConfig, request: &ChatRequest, stream: bool) -> Value {
    let mut body = json!({
        "model": model.name,
        "messages": wire_messages(&request.messages),
    });

    if let Some(t) = request.temperature.or(model.parameters.temperature) {
        body["temperature"] = json!(t);
    }
    if let Some(max) = request.max_tokens.or(model.parameters.max_tokens) {
        if uses_max_completion_tokens(&model.name) {
            body["max_completion_tokens"] = json!(max);
        } else {
            body["max_tokens"] = json!(max);
        }
    }

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    if stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }
    body
}

fn wire_content(msg: &Message) -> Value {
    if !msg.has_images() {
        return json!(msg.text_content());
    }
    let parts: Vec<Value> = msg
        .content
        .iter()
        .map(|block| match block {
            MessageContent::Text { text } => json!({ "type": "text", "text": text }),
            MessageContent::ImageUrl { url } => {
                json!({ "type": "image_url", "image_url": { "url": url } })
            }
        })
        .collect();
    json!(parts)
}

fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::Assistant if !msg.tool_calls.is_empty() => {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.tool_name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                let text = msg.text_content();
                let content = if text.is_empty() { Value::Null } else { json!(text) };
                json!({ "role": "assistant", "content": content, "tool_calls": calls })
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                "content": msg.text_content(),
            }),
            role => json!({ "role": role.as_str(), "content": wire_content(msg) }),
        })
        .collect()
}

fn parse_tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    let arguments = if arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(arguments).unwrap_or_else(|_| json!({ "raw": arguments }))
    };
    ToolCall {
        id: id.to_string(),
        tool_name: name.to_string(),
        arguments,
    }
}

pub(crate) fn parse_chat_response(data: &Value, model: &ModelConfig) -> ChatResponse {
    let choice = &data["choices"][0];
    let content = choice["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let tool_calls: Vec<ToolCall> = choice["message"]["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    Some(parse_tool_call(
                        c["id"].as_str()?,
                        c["function"]["name"].as_str()?,
                        c["function"]["arguments"].as_str().unwrap_or("{}"),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    let finish_reason =
        FinishReason::from_wire(choice["finish_reason"].as_str(), !tool_calls.is_empty());

    ChatResponse {
        content,
        tool_calls,
        finish_reason,
        usage: Usage::from_wire(&data["usage"]),
        provider: model.provider.clone(),
        model: model.name.clone(),
    }
}

pub(crate) fn parse_image_response(data: &Value, model: &ModelConfig, size: String) -> ImageResponse {
    let images = data["data"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| GeneratedImage {
                    url: item["url"].as_str().map(str::to_string),
                    b64_json: item["b64_json"].as_str().map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();
    ImageResponse {
        images,
        size,
        provider: model.provider.clone(),
        model: model.name.clone(),
    }
}

// ── HTTP ───────────────────────────────────────────────────────

pub(crate) fn unavailable(model: &ModelConfig, reason: impl ToString) -> OperatorError {
    OperatorError::ProviderUnavailable {
        provider: model.provider.clone(),
        model: model.name.clone(),
        reason: reason.to_string(),
    }
}

/// 429 and 5xx are transient; every other non-success status is a rejection.
pub(crate) fn status_error(model: &ModelConfig, status: u16, body: &str) -> OperatorError {
    if status == 429 || status >= 500 {
        unavailable(model, format!("HTTP {status}: {body}"))
    } else {
        OperatorError::ProviderRejected {
            provider: model.provider.clone(),
            model: model.name.clone(),
            status,
            reason: body.to_string(),
        }
    }
}

fn authorize(builder: reqwest::RequestBuilder, model: &ModelConfig) -> reqwest::RequestBuilder {
    match model.api_key.as_deref() {
        Some(key) if !key.is_empty() => builder.bearer_auth(key),
        _ => builder,
    }
}

pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    model: &ModelConfig,
    body: &Value,
) -> Result<reqwest::Response> {
    debug!(provider = %model.provider, model = %model.name, url, "POST");
    let resp = authorize(client.post(url), model)
        .json(body)
        .send()
        .await
        .map_err(|e| unavailable(model, e))?;
    check_status(resp, model).await
}

pub(crate) async fn get_json(
    client: &reqwest::Client,
    url: &str,
    model: &ModelConfig,
) -> Result<Value> {
    debug!(provider = %model.provider, model = %model.name, url, "GET");
    let resp = authorize(client.get(url), model)
        .send()
        .await
        .map_err(|e| unavailable(model, e))?;
    let resp = check_status(resp, model).await?;
    resp.json().await.map_err(|e| unavailable(model, e))
}

async fn check_status(resp: reqwest::Response, model: &ModelConfig) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(status_error(model, status.as_u16(), &text))
}

// ── SSE ────────────────────────────────────────────────────────

/// Incremental parser for OpenAI-style `data:` lines.
#[derive(Debug, Default)]
pub(crate) struct SseState {
    /// index -> (id, name, arguments json)
    tool_calls: BTreeMap<u64, (String, String, String)>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    done: bool,
}

impl SseState {
    pub(crate) fn feed_line(&mut self, line: &str) -> Vec<StreamEvent> {
        if self.done || line.is_empty() || line.starts_with(':') {
            return vec![];
        }
        let Some(data) = line.strip_prefix("data:") else {
            return vec![];
        };
        let data = data.trim();
        if data == "[DONE]" {
            return self.finish();
        }
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            return vec![];
        };

        if let Some(message) = event["error"]["message"].as_str() {
            self.done = true;
            return vec![StreamEvent::Error(message.to_string())];
        }

        let mut out = Vec::new();
        let delta = &event["choices"][0]["delta"];
        if let Some(text) = delta["content"].as_str()
            && !text.is_empty()
        {
            out.push(StreamEvent::Delta(text.to_string()));
        }
        if let Some(tcs) = delta["tool_calls"].as_array() {
            for tc in tcs {
                let idx = tc["index"].as_u64().unwrap_or(0);
                let entry = self.tool_calls.entry(idx).or_default();
                if let Some(id) = tc["id"].as_str() {
                    entry.0 = id.to_string();
                }
                if let Some(name) = tc["function"]["name"].as_str() {
                    entry.1.push_str(name);
                }
                if let Some(args) = tc["function"]["arguments"].as_str() {
                    entry.2.push_str(args);
                }
            }
        }
        if let Some(fr) = event["choices"][0]["finish_reason"].as_str() {
            self.finish_reason = Some(fr.to_string());
        }
        if let Some(usage) = Usage::from_wire(&event["usage"]) {
            self.usage = Some(usage);
        }
        out
    }

    /// Assembled tool calls followed by the terminal `Done`.
    pub(crate) fn finish(&mut self) -> Vec<StreamEvent> {
        if self.done {
            return vec![];
        }
        self.done = true;
        let has_calls = !self.tool_calls.is_empty();
        let mut out: Vec<StreamEvent> = std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|(id, name, args)| StreamEvent::ToolCall(parse_tool_call(&id, &name, &args)))
            .collect();
        out.push(StreamEvent::Done {
            usage: self.usage,
            finish_reason: FinishReason::from_wire(self.finish_reason.as_deref(), has_calls),
        });
        out
    }
}

/// Forward an SSE body into the stream channel.
///
/// Returns as soon as the receiver is gone, even while upstream is silent,
/// which drops the upstream connection. A gap longer than `idle_timeout`
/// between chunks ends the stream with a terminal error.
pub(crate) async fn pump_sse<S, B, E>(body: S, tx: mpsc::Sender<StreamEvent>, idle_timeout: Duration)
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut body = std::pin::pin!(body);
    // Raw bytes so multi-byte characters split across chunks decode intact.
    let mut buffer: Vec<u8> = Vec::new();
    let mut state = SseState::default();

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!("stream receiver closed, dropping upstream");
                return;
            }
            next = tokio::time::timeout(idle_timeout, body.next()) => next,
        };
        let bytes = match chunk {
            Ok(Some(Ok(bytes))) => bytes,
            Ok(Some(Err(e))) => {
                let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                return;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(after_secs = idle_timeout.as_secs(), "provider stream went idle");
                let _ = tx
                    .send(StreamEvent::Error(format!(
                        "timed out: no data from provider for {}s",
                        idle_timeout.as_secs()
                    )))
                    .await;
                return;
            }
        };
        buffer.extend_from_slice(bytes.as_ref());
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            for event in state.feed_line(line.trim()) {
                let terminal = event.is_terminal();
                if tx.send(event).await.is_err() {
                    debug!("stream receiver closed, dropping upstream");
                    return;
                }
                if terminal {
                    return;
                }
            }
        }
    }

    // Upstream ended without [DONE].
    for event in state.finish() {
        if tx.send(event).await.is_err() {
            return;
        }
    }
}
