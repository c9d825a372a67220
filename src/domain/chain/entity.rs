//! The chain definition and its builder API.

use super::resilience::{Fallback, RetryConfig};
use super::step::Step;
use crate::domain::memory::MemoryConfig;
use crate::domain::tool::{Tool, ToolRegistry};

/// Options attached to a chain definition.
#[derive(Debug, Clone, Default)]
pub struct ChainOptions {
    /// Variable names that must be bound before a run starts.
    pub required_variables: Vec<String>,
    /// Tools the model may request during LLM steps.
    pub tools: ToolRegistry,
    pub memory: Option<MemoryConfig>,
    pub retry: Option<RetryConfig>,
    /// Millisecond bound per step; zero means no timeout.
    pub timeout_ms: Option<u64>,
    pub fallback: Option<Fallback>,
    /// Fixed session id, overridable by a `session_id` variable binding.
    pub session_id: Option<String>,
    /// Force every LLM call in the chain to fail, for test chains.
    pub force_all_errors: bool,
}

/// An immutable, reusable pipeline definition.
///
/// Built once through the `with_*` methods and never mutated after a run
/// starts; per-run state (resolved session id, memory handle, metadata)
/// lives in the engine, not here.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    pub steps: Vec<Step>,
    pub system_prompt: Option<String>,
    pub user_prompt: Option<String>,
    pub options: ChainOptions,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_steps<I: IntoIterator<Item = Step>>(mut self, steps: I) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Chain-level system prompt template, used by LLM steps that do not
    /// carry their own system override.
    pub fn with_system_prompt(mut self, template: impl Into<String>) -> Self {
        self.system_prompt = Some(template.into());
        self
    }

    /// User prompt template resolved against the run variables to produce
    /// the initial input.
    pub fn with_user_prompt(mut self, template: impl Into<String>) -> Self {
        self.user_prompt = Some(template.into());
        self
    }

    pub fn with_required_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.required_variables = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.options.tools = self.options.tools.with_tool(tool);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.options.tools = tools;
        self
    }

    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.options.memory = Some(memory);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.options.retry = Some(retry);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.options.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.options.fallback = Some(fallback);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.options.session_id = Some(session_id.into());
        self
    }

    pub fn with_force_all_errors(mut self, force: bool) -> Self {
        self.options.force_all_errors = force;
        self
    }

    pub fn has_tools(&self) -> bool {
        !self.options.tools.is_empty()
    }

    /// Effective per-step timeout, ignoring a zero bound.
    pub fn effective_timeout_ms(&self) -> Option<u64> {
        self.options.timeout_ms.filter(|&ms| ms > 0)
    }
}
