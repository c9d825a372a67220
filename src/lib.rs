//! Composable multi-step LLM workflows.
//!
//! A [`Chain`] is an immutable pipeline of steps (LLM calls, transforms,
//! prompt renders, tool invocations, parsing) executed by a [`ChainEngine`]
//! against a set of [`Variables`]. Chains can carry retry, timeout and
//! fallback configuration, session-scoped conversational memory with
//! pluggable backends and eviction, and schema-validated tools the model
//! may call through a depth-bounded loop.
//!
//! ```no_run
//! use llm_chains::{Chain, ChainEngine, Fallback, RetryConfig, Step, Variables};
//!
//! # async fn example() -> llm_chains::ChainResult<()> {
//! let chain = Chain::new()
//!     .with_user_prompt("Summarize: {{text}}")
//!     .with_step(Step::llm("mock"))
//!     .with_retry(RetryConfig::new(2).with_delay_ms(100))
//!     .with_fallback(Fallback::value("unavailable"));
//!
//! let engine = ChainEngine::new();
//! let vars = Variables::new().with("text", "a long article");
//! let summary = engine.run(&chain, &vars).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::EngineConfig;
pub use domain::chain::{
    BackoffStrategy, Chain, ChainEngine, ChainOptions, Fallback, LlmStepOptions, LlmTarget,
    ParseSpec, PromptSource, PromptSpec, RetryConfig, RouteSelector, RunContext, RunMetadata,
    Step, TokenTotals,
};
pub use domain::error::{ChainError, ChainResult, ParseErrorKind, ProviderErrorKind};
pub use domain::llm::{
    Capability, LlmProvider, LlmRequest, LlmResponse, Message, MessageRole, ProviderRegistry,
    ToolCall, ToolChoice, ToolDefinition, Usage,
};
pub use domain::memory::{
    MemoryBackend, MemoryConfig, MemoryEntry, MemoryKind, MemoryManager, MemoryStore,
    PruningStrategy,
};
pub use domain::tool::{ParameterSpec, ParameterType, Tool, ToolParameters, ToolRegistry};
pub use domain::variables::Variables;
pub use infrastructure::logging::{init_logging, LogFormat, LoggingConfig};
