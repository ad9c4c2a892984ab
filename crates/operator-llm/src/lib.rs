//! # operator-llm
//!
//! Model access for the AI operator: the [`ModelRegistry`] caches model
//! configurations from the store, and the [`ModelBridge`] resolves a model per
//! request and dispatches it to the provider adapter (OpenAI-compatible,
//! Doubao/Ark, mock) with deadlines and a single retry. Chat, image, video
//! and speech all go through the same path.

pub mod bridge;
pub mod doubao;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod registry;

pub use bridge::{BridgeSettings, Capability, ModelBridge};
pub use mock::{MockAdapter, MockResponse};
pub use provider::{
    ChatRequest, ChatResponse, ChatStream, FinishReason, GeneratedImage, ImageRequest,
    ImageResponse, ProviderAdapter, SpeechRequest, SpeechResponse, StreamEvent,
    TranscriptionRequest, TranscriptionResponse, Usage, VideoRequest, VideoResponse, VideoStatus,
};
pub use registry::{ModelRegistry, RegistrySnapshot};
