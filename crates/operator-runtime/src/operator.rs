//! The per-turn orchestrator.
//!
//! One call to [`AiOperator::handle_turn`] runs the whole cycle:
//!
//! 1. **Select**: rank the tool catalog for the query and role.
//! 2. **Prompt**: system prompt from the cache, built and stored on a miss.
//! 3. **Recall**: memory context from every dimension, under the read deadline.
//! 4. **Think**: bridge call, with one alternate model on a transient failure
//!    or rejected credentials. The bridge records token usage.
//! 5. **Remember**: best-effort episodic write of the exchange, plus the
//!    concepts the user mentioned and any repeated tool sequence.
//!
//! Generated images and videos go through the same operator so that each
//! artifact is kept in resource memory.
//!
//! Turns share nothing but the injected services, so any number may run
//! concurrently.

use std::future::Future;
use std::sync::Arc;

use operator_core::{Message, ModelConfig, OperatorError, Result, Tool};
use operator_llm::{
    ChatRequest, ChatResponse, ChatStream, ImageRequest, ImageResponse, ModelBridge, ModelRegistry,
    StreamEvent, VideoRequest, VideoResponse,
};
use operator_memory::{Dimension, ResourceInput, ResourceKind, SixDimensionMemory};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::prompt::{OrganizationSnapshot, OrganizationSource, PromptMode, build_system_prompt};
use crate::prompt_cache::{CacheLookup, PromptCache, PromptContext};
use crate::selector::ToolSelector;

/// Every collaborator the operator needs, constructed by the caller.
pub struct OperatorDeps {
    pub registry: Arc<ModelRegistry>,
    pub bridge: Arc<ModelBridge>,
    pub memory: SixDimensionMemory,
    pub prompt_cache: Arc<PromptCache>,
    pub selector: ToolSelector,
    pub organizations: Arc<dyn OrganizationSource>,
    /// Tool definitions, looked up by the names the selector returns.
    pub tools: Vec<Tool>,
}

/// One user turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnRequest {
    /// Memory owner, usually the user id.
    pub subject: String,
    pub role: String,
    pub message: String,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
    pub model_override: Option<String>,
    /// Overrides the configured tool count.
    pub max_tools: Option<usize>,
    pub page: Option<String>,
    #[serde(default)]
    pub mode: PromptMode,
    pub request_id: Option<String>,
}

impl TurnRequest {
    pub fn new(subject: impl Into<String>, role: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role: role.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn with_model(mut self, name: impl Into<String>) -> Self {
        self.model_override = Some(name.into());
        self
    }

    pub fn with_max_tools(mut self, max_tools: usize) -> Self {
        self.max_tools = Some(max_tools);
        self
    }

    pub fn with_page(mut self, page: impl Into<String>) -> Self {
        self.page = Some(page.into());
        self
    }

    pub fn with_mode(mut self, mode: PromptMode) -> Self {
        self.mode = mode;
        self
    }

    fn prompt_context(&self) -> PromptContext {
        PromptContext {
            organization_id: self.organization_id.clone(),
            mode: Some(self.mode.as_str().to_string()),
            page: self.page.clone(),
            request_id: self.request_id.clone(),
            user_query: Some(self.message.clone()),
        }
    }

    /// Tag path for the episodic events of this turn. A page route such as
    /// `/classes/3` contributes one segment per route component.
    fn tree_path(&self) -> Vec<String> {
        let mut path = vec!["turn".to_string(), self.role.clone()];
        if let Some(page) = &self.page {
            path.extend(
                page.split('/')
                    .map(str::trim)
                    .filter(|seg| !seg.is_empty())
                    .map(str::to_string),
            );
        }
        path
    }
}

/// Result of a turn. Exactly one of `response` and `stream` is set.
#[derive(Debug)]
pub struct TurnOutcome {
    pub request_id: String,
    pub tools_offered: Vec<String>,
    /// Whether the system prompt came from the cache.
    pub prompt_cached: bool,
    /// Memory dimensions that could not be read in time.
    pub memory_degraded: Vec<Dimension>,
    pub response: Option<ChatResponse>,
    pub stream: Option<ChatStream>,
}

pub struct AiOperator {
    registry: Arc<ModelRegistry>,
    bridge: Arc<ModelBridge>,
    memory: SixDimensionMemory,
    prompt_cache: Arc<PromptCache>,
    selector: ToolSelector,
    organizations: Arc<dyn OrganizationSource>,
    tools: Vec<Tool>,
}

impl AiOperator {
    pub fn new(deps: OperatorDeps) -> Self {
        Self {
            registry: deps.registry,
            bridge: deps.bridge,
            memory: deps.memory,
            prompt_cache: deps.prompt_cache,
            selector: deps.selector,
            organizations: deps.organizations,
            tools: deps.tools,
        }
    }

    pub fn selector(&self) -> &ToolSelector {
        &self.selector
    }

    pub fn prompt_cache(&self) -> &Arc<PromptCache> {
        &self.prompt_cache
    }

    pub fn memory(&self) -> &SixDimensionMemory {
        &self.memory
    }

    pub fn bridge(&self) -> &Arc<ModelBridge> {
        &self.bridge
    }

    pub async fn handle_turn(&self, mut request: TurnRequest) -> Result<TurnOutcome> {
        request.message = request.message.trim().to_string();
        if request.message.is_empty() {
            return Err(OperatorError::InvalidParameter("message is empty".into()));
        }
        if request.subject.trim().is_empty() {
            return Err(OperatorError::InvalidParameter("subject is empty".into()));
        }
        let request_id = request
            .request_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();

        // 1. SELECT
        let max_tools = request.max_tools.unwrap_or(self.selector.config().max_tools);
        let tools_offered = self.selector.select(&request.message, &request.role, max_tools);

        // 2. PROMPT
        let (mut system_prompt, prompt_cached) = self.system_prompt(&request).await;

        // 3. RECALL
        let memory = self
            .memory
            .build_context(&request.subject, &Dimension::ALL, &request.message)
            .await;
        if !memory.is_empty() {
            system_prompt.push_str("\n\n<memory>\n");
            system_prompt.push_str(&memory.render());
            system_prompt.push_str("\n</memory>");
        }

        info!(
            request_id = %request_id,
            subject = %request.subject,
            role = %request.role,
            tools = ?tools_offered,
            prompt_cached,
            degraded = memory.degraded.len(),
            stream = request.stream,
            "handling turn"
        );

        // 4. THINK
        let chat = ChatRequest::new(vec![
            Message::system(system_prompt),
            Message::user(request.message.clone()),
        ])
        .with_tools(self.tool_definitions(&tools_offered))
        .with_user(request.subject.clone());
        let model_override = request.model_override.as_deref();

        let mut outcome = TurnOutcome {
            request_id,
            tools_offered,
            prompt_cached,
            memory_degraded: memory.degraded,
            response: None,
            stream: None,
        };

        if request.stream {
            let chat = &chat;
            let upstream = self
                .with_fallback(model_override, |model| async move {
                    self.bridge.stream_chat_completion(chat, model.as_deref()).await
                })
                .await?;
            outcome.stream = Some(self.relay(upstream, &request));
            return Ok(outcome);
        }

        let chat = &chat;
        let response = self
            .with_fallback(model_override, |model| async move {
                self.bridge.chat_completion(chat, model.as_deref()).await
            })
            .await?;

        // 5. REMEMBER
        let tree_path = request.tree_path();
        self.memory
            .record_turn(
                &request.subject,
                &request.message,
                &reply_text(&response.content, &response.tool_calls),
                &tree_path,
            )
            .await;
        self.memory
            .record_tool_calls(&request.subject, &response.tool_calls, &tree_path)
            .await;

        outcome.response = Some(response);
        Ok(outcome)
    }

    // ── Media ──────────────────────────────────────────────────

    /// Generate images and keep every returned URL as a resource of `subject`.
    pub async fn generate_image(&self, subject: &str, request: &ImageRequest) -> Result<ImageResponse> {
        let response = self.bridge.generate_image(request).await?;
        for image in &response.images {
            let Some(url) = &image.url else {
                debug!(subject = %subject, "inline image has no location, not recorded");
                continue;
            };
            let input = artifact(ResourceKind::Image, &request.prompt, url, &response.provider, &response.model);
            self.memory.record_artifact(subject, input).await;
        }
        Ok(response)
    }

    /// Submit a video task. The video is recorded once a URL is known.
    pub async fn generate_video(&self, subject: &str, request: &VideoRequest) -> Result<VideoResponse> {
        let response = self.bridge.generate_video(request).await?;
        self.record_video(subject, &request.prompt, &response).await;
        Ok(response)
    }

    /// Poll a video task, recording the video when it has finished.
    pub async fn video_status(
        &self,
        subject: &str,
        task_id: &str,
        model_override: Option<&str>,
    ) -> Result<VideoResponse> {
        let response = self.bridge.video_status(task_id, model_override).await?;
        self.record_video(subject, &format!("video task {task_id}"), &response).await;
        Ok(response)
    }

    async fn record_video(&self, subject: &str, label: &str, response: &VideoResponse) {
        if let Some(url) = &response.video_url {
            let input = artifact(ResourceKind::Video, label, url, &response.provider, &response.model);
            self.memory.record_artifact(subject, input).await;
        }
    }

    /// Cached prompt for the request, or a freshly built one. A prompt built
    /// without organization figures is used for this turn but not cached.
    async fn system_prompt(&self, request: &TurnRequest) -> (String, bool) {
        let context = request.prompt_context();
        if let CacheLookup::Hit(text) = self.prompt_cache.get(&request.role, &context) {
            return (text, true);
        }

        let organization_id = request.organization_id.as_deref();
        let (organization, complete) = match self.organizations.snapshot(organization_id).await {
            Ok(snapshot) => (snapshot, true),
            Err(e) => {
                warn!(organization_id = ?organization_id, error = %e, "organization snapshot unavailable");
                let id = organization_id.unwrap_or_default();
                (OrganizationSnapshot::new(id, ""), false)
            }
        };

        // The cached prompt covers every tool the role may use; the per-turn
        // subset travels in the request's tool list.
        let admissible = self.selector.admissible_tools(&request.role);
        let catalog: Vec<&Tool> = admissible
            .iter()
            .filter_map(|name| self.tools.iter().find(|t| &t.name == name))
            .collect();

        let text = build_system_prompt(
            &request.role,
            request.mode,
            &organization,
            &catalog,
            request.page.as_deref(),
        );
        if complete {
            self.prompt_cache.put(&request.role, &context, text.clone());
        }
        (text, false)
    }

    fn tool_definitions(&self, names: &[String]) -> Vec<Tool> {
        names
            .iter()
            .filter_map(|name| {
                let tool = self.tools.iter().find(|t| &t.name == name);
                if tool.is_none() {
                    warn!(tool = %name, "selected tool has no definition");
                }
                tool.cloned()
            })
            .collect()
    }

    /// Another active model of the failed model's type, when the failure
    /// allows one.
    fn alternate_for(&self, error: &OperatorError, model_override: Option<&str>) -> Option<ModelConfig> {
        if model_override.is_some() {
            return None;
        }
        let credentials = is_credential_rejection(error);
        if !error.is_retryable() && !credentials {
            return None;
        }
        let (provider, failed) = error.provider_identity()?;
        let failed = self.registry.get_by_name(failed).ok()?;
        // A rejected key is shared by every model of its provider.
        self.registry
            .alternates(failed.model_type, &failed.name)
            .into_iter()
            .find(|m| !credentials || m.provider != provider)
    }

    /// Run a bridge call; on a transient failure of the default model, or a
    /// rejection of its credentials, run it once more against an alternate.
    async fn with_fallback<T, F, Fut>(&self, model_override: Option<&str>, call: F) -> Result<T>
    where
        F: Fn(Option<String>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let error = match call(model_override.map(str::to_string)).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        let Some(alternate) = self.alternate_for(&error, model_override) else {
            return Err(error);
        };
        warn!(
            alternate = %alternate.name,
            provider = %alternate.provider,
            error = %error,
            "default model failed, trying alternate"
        );
        call(Some(alternate.name)).await
    }

    /// Forward the bridge stream to the caller. Memory is written once the
    /// upstream finishes cleanly; a caller that goes away cancels upstream.
    fn relay(&self, mut upstream: ChatStream, request: &TurnRequest) -> ChatStream {
        let (tx, downstream) = ChatStream::channel(
            self.bridge.settings().stream_buffer,
            upstream.provider(),
            upstream.model(),
        );
        let memory = self.memory.clone();
        let bridge = Arc::clone(&self.bridge);
        let model = upstream.model().to_string();
        let subject = request.subject.clone();
        let message = request.message.clone();
        let tree_path = request.tree_path();
        let started = Instant::now();

        tokio::spawn(async move {
            let mut content = String::new();
            let mut tool_calls = Vec::new();
            loop {
                let next = tokio::select! {
                    _ = tx.closed() => None,
                    event = upstream.next() => Some(event),
                };
                let Some(next) = next else {
                    debug!(subject = %subject, "stream consumer went away");
                    upstream.cancel();
                    return;
                };
                let Some(event) = next else { break };

                match &event {
                    StreamEvent::Delta(text) => content.push_str(text),
                    StreamEvent::ToolCall(call) => tool_calls.push(call.clone()),
                    StreamEvent::Done { usage, .. } => {
                        bridge
                            .record_stream_usage(&model, *usage, Some(&subject), started.elapsed())
                            .await;
                        memory
                            .record_turn(&subject, &message, &reply_text(&content, &tool_calls), &tree_path)
                            .await;
                        memory.record_tool_calls(&subject, &tool_calls, &tree_path).await;
                    }
                    StreamEvent::Error(reason) => {
                        warn!(subject = %subject, reason = %reason, "stream failed, turn not recorded");
                    }
                }

                let terminal = event.is_terminal();
                if tx.send(event).await.is_err() {
                    upstream.cancel();
                    return;
                }
                if terminal {
                    break;
                }
            }
        });
        downstream
    }
}

fn is_credential_rejection(error: &OperatorError) -> bool {
    matches!(error, OperatorError::ProviderRejected { status: 401 | 403, .. })
}

/// Characters of the prompt kept as an artifact label.
const LABEL_CHARS: usize = 60;

fn artifact(kind: ResourceKind, prompt: &str, location: &str, provider: &str, model: &str) -> ResourceInput {
    let prompt = prompt.trim();
    let label = match prompt.char_indices().nth(LABEL_CHARS) {
        Some((idx, _)) => format!("{}…", &prompt[..idx]),
        None if prompt.is_empty() => kind.to_string(),
        None => prompt.to_string(),
    };
    ResourceInput {
        kind,
        label,
        location: location.to_string(),
        summary: (!prompt.is_empty()).then(|| prompt.to_string()),
        tags: vec!["generated".into(), provider.to_string(), model.to_string()],
    }
}

/// Text recorded as the assistant side of a turn.
fn reply_text(content: &str, tool_calls: &[operator_core::ToolCall]) -> String {
    if !content.trim().is_empty() || tool_calls.is_empty() {
        return content.to_string();
    }
    let names: Vec<&str> = tool_calls.iter().map(|c| c.tool_name.as_str()).collect();
    format!("(called {})", names.join(", "))
}
