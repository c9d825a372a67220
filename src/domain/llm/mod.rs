//! LLM message, request/response, and provider abstractions.

mod capability;
mod message;
mod provider;
mod request;
mod response;

pub use capability::{Capability, FALLBACK_PROVIDER};
pub use message::{Message, MessageRole, ToolCall};
pub use provider::{mock, LlmProvider, ProviderRegistry};
pub use request::{LlmRequest, LlmRequestBuilder, ToolChoice, ToolDefinition};
pub use response::{FinishReason, LlmResponse, Usage};
