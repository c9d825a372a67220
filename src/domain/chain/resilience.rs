//! Retry, timeout and fallback configuration.
//!
//! Composition order is fixed: retry wraps the raw LLM call, the timeout
//! bound wraps each (possibly retried) step, and the chain-level fallback
//! wraps the whole run as the outermost layer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::domain::error::{ChainError, ChainResult};
use crate::domain::variables::Variables;

/// Delay policy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Constant delay between attempts.
    #[default]
    Fixed,
    /// Delay doubles per attempt, capped at `max_delay_ms`.
    Exponential,
}

/// Retry configuration for the LLM execution path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff: BackoffStrategy,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff: BackoffStrategy::Fixed,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Delay before attempt `attempt` (1-based; the first attempt has no
    /// delay). Exponential delays are `delay * 2^(attempt - 2)`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let ms = match self.backoff {
            BackoffStrategy::Fixed => self.delay_ms,
            BackoffStrategy::Exponential => {
                let exponent = attempt.saturating_sub(2).min(63);
                self.delay_ms
                    .saturating_mul(1u64 << exponent)
                    .min(self.max_delay_ms)
            }
        };
        Duration::from_millis(ms)
    }
}

/// Run context handed to context-aware fallback functions.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub elapsed: Duration,
    pub retry_count: u32,
    pub completed_steps: usize,
    pub variables: Variables,
}

/// Fallback function of the error alone.
pub type FallbackFn = Arc<dyn Fn(&ChainError) -> ChainResult<Value> + Send + Sync>;

/// Fallback function of the error plus run context.
pub type FallbackWithContextFn =
    Arc<dyn Fn(&ChainError, &RunContext) -> ChainResult<Value> + Send + Sync>;

/// The chain-level last line of defense. A static value always converts a
/// failure into a success; fallback functions may themselves fail, which is
/// fatal for the run.
#[derive(Clone)]
pub enum Fallback {
    Value(Value),
    Function(FallbackFn),
    FunctionWithContext(FallbackWithContextFn),
}

impl Fallback {
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&ChainError) -> ChainResult<Value> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    pub fn function_with_context<F>(f: F) -> Self
    where
        F: Fn(&ChainError, &RunContext) -> ChainResult<Value> + Send + Sync + 'static,
    {
        Self::FunctionWithContext(Arc::new(f))
    }

    /// Produce the substitute value for a failed run. A failing fallback
    /// function maps to `FallbackFailed`.
    pub fn resolve(&self, error: &ChainError, context: &RunContext) -> ChainResult<Value> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Function(f) => {
                f(error).map_err(|e| ChainError::fallback(e.to_string()))
            }
            Self::FunctionWithContext(f) => {
                f(error, context).map_err(|e| ChainError::fallback(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
            Self::FunctionWithContext(_) => f.write_str("FunctionWithContext(..)"),
        }
    }
}
