//! Volcengine Ark (Doubao) adapter.
//!
//! Chat is OpenAI-compatible and delegated to [`OpenAiAdapter`]. Image
//! generation (Seedream) enforces a pixel floor and disables the watermark by
//! default. Video (Seedance) goes through the asynchronous content-generation
//! task API.

use std::time::Duration;

use async_trait::async_trait;
use operator_core::{ModelConfig, Result};
use serde_json::{Value, json};
use tracing::info;

use crate::openai::{self, OpenAiAdapter};
use crate::provider::*;

pub const DOUBAO_ID: &str = "doubao";

/// Seedream rejects images smaller than 1920x1920.
pub const DOUBAO_MIN_IMAGE_PIXELS: u64 = 1920 * 1920;

const DEFAULT_VIDEO_DURATION_SECS: u32 = 5;

pub struct DoubaoAdapter {
    chat: OpenAiAdapter,
}

impl Default for DoubaoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DoubaoAdapter {
    pub fn new() -> Self {
        Self {
            chat: OpenAiAdapter::new().with_id(DOUBAO_ID),
        }
    }

    pub fn with_stream_buffer(mut self, buffer: usize) -> Self {
        self.chat = self.chat.with_stream_buffer(buffer);
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.chat = self.chat.with_stream_idle_timeout(timeout);
        self
    }
}

/// Seedance takes generation options as `--flag value` suffixes on the prompt.
fn video_prompt(request: &VideoRequest) -> String {
    let mut text = request.prompt.trim().to_string();
    let duration = request.duration_secs.unwrap_or(DEFAULT_VIDEO_DURATION_SECS);
    text.push_str(&format!(" --duration {duration}"));
    if let Some(ratio) = &request.ratio {
        text.push_str(&format!(" --ratio {ratio}"));
    }
    text
}

pub(crate) fn video_body(model: &ModelConfig, request: &VideoRequest) -> Value {
    let mut content = vec![json!({ "type": "text", "text": video_prompt(request) })];
    if let Some(url) = &request.image_url {
        content.push(json!({ "type": "image_url", "image_url": { "url": url } }));
    }
    json!({ "model": model.name, "content": content })
}

pub(crate) fn image_body(model: &ModelConfig, request: &ImageRequest, size: &str) -> Value {
    let watermark = model.parameters.extra_bool("watermark").unwrap_or(false);
    let mut body = json!({
        "model": model.name,
        "prompt": request.prompt,
        "size": size,
        "response_format": "url",
        "watermark": watermark,
    });
    if let Some(n) = request.n
        && n > 1
    {
        body["n"] = json!(n);
    }
    body
}

fn video_response(data: &Value, model: &ModelConfig, fallback_id: &str) -> VideoResponse {
    VideoResponse {
        task_id: data["id"].as_str().unwrap_or(fallback_id).to_string(),
        status: VideoStatus::from_wire(data["status"].as_str().unwrap_or("queued")),
        video_url: data["content"]["video_url"].as_str().map(str::to_string),
        provider: model.provider.clone(),
        model: model.name.clone(),
    }
}

#[async_trait]
impl ProviderAdapter for DoubaoAdapter {
    fn id(&self) -> &str {
        DOUBAO_ID
    }

    fn min_image_pixels(&self) -> Option<u64> {
        Some(DOUBAO_MIN_IMAGE_PIXELS)
    }

    fn default_image_size(&self) -> &str {
        "1920x1920"
    }

    async fn chat(&self, model: &ModelConfig, request: &ChatRequest) -> Result<ChatResponse> {
        self.chat.chat(model, request).await
    }

    async fn stream_chat(
        &self,
        model: &ModelConfig,
        request: &ChatRequest,
    ) -> Result<ChatStream> {
        self.chat.stream_chat(model, request).await
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
        let body = image_body(model, request, &size);
        let url = format!("{}/images/generations", openai::base_url(&model.endpoint_url));
        let resp = openai::post_json(self.chat.client(), &url, model, &body).await?;
        let data: Value = resp
            .json()
            .await
            .map_err(|e| openai::unavailable(model, e))?;
        Ok(openai::parse_image_response(&data, model, size))
    }

    async fn generate_video(
        &self,
        model: &ModelConfig,
        request: &VideoRequest,
    ) -> Result<VideoResponse> {
        let url = format!(
            "{}/contents/generations/tasks",
            openai::base_url(&model.endpoint_url)
        );
        let resp = openai::post_json(self.chat.client(), &url, model, &video_body(model, request))
            .await?;
        let data: Value = resp
            .json()
            .await
            .map_err(|e| openai::unavailable(model, e))?;
        let created = video_response(&data, model, "");
        info!(model = %model.name, task_id = %created.task_id, "video task submitted");
        Ok(created)
    }

    async fn video_status(&self, model: &ModelConfig, task_id: &str) -> Result<VideoResponse> {
        let url = format!(
            "{}/contents/generations/tasks/{task_id}",
            openai::base_url(&model.endpoint_url)
        );
        let data = openai::get_json(self.chat.client(), &url, model).await?;
        Ok(video_response(&data, model, task_id))
    }
}
