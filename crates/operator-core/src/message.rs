use serde::{Deserialize, Serialize};

/// A message in a chat completion request or response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
    /// Tool calls requested by the assistant in this message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<crate::tool::ToolCall>,
    /// Set on `Role::Tool` messages: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single content block within a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    /// Image reference for multimodal models (URL or data URI).
    ImageUrl { url: String },
}

impl Message {
    /// Create a simple text message.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![MessageContent::Text { text: text.into() }],
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    /// Extract all text content joined together.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                MessageContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether any block carries an image.
    pub fn has_images(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, MessageContent::ImageUrl { .. }))
    }

    /// Estimate token count for this message (~4 chars per token).
    pub fn estimate_tokens(&self) -> usize {
        let mut chars = 16usize;
        for block in &self.content {
            match block {
                MessageContent::Text { text } => chars += text.len(),
                MessageContent::ImageUrl { url } => chars += url.len().min(1000),
            }
        }
        for tc in &self.tool_calls {
            chars += tc.tool_name.len() + tc.id.len() + tc.arguments.to_string().len();
        }
        (chars / 4).max(1)
    }
}
