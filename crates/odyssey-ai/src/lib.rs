//! Provider-agnostic chat types and the OpenAI-compatible client.
mod openai;
mod retry;
mod types;

pub use openai::{OpenAiClient, OpenAiConfig};
pub use types::{
    ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, Message, MessageRole,
    OdysseyAiError, StreamDeltaHandler, ToolCall, ToolDefinition,
};
