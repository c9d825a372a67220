//! Chain definitions, the step union, resilience layers and the engine.

mod entity;
mod executor;
mod metadata;
mod resilience;
mod step;
mod tool_loop;

pub use entity::{Chain, ChainOptions};
pub use executor::ChainEngine;
pub use metadata::{estimate_cost, RunMetadata, TokenTotals};
pub use resilience::{
    BackoffStrategy, Fallback, FallbackFn, FallbackWithContextFn, RetryConfig, RunContext,
};
pub use step::{
    LlmStepOptions, LlmTarget, ParseSpec, ParserFn, PredicateFn, PromptFn, PromptSource,
    PromptSpec, RouteFn, RouteSelector, Step, TransformFn,
};
pub use tool_loop::{run_tool_loop, ToolLoopResult};
