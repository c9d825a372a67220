//! Per-run metadata and cost accumulation.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::llm::Usage;

/// Per-million-token prices used for cost estimation. Unknown providers get
/// the flat default.
const PRICING: &[(&str, f64, f64)] = &[
    ("openai", 2.50, 10.00),
    ("anthropic", 3.00, 15.00),
    ("groq", 0.59, 0.79),
    ("mock", 0.0, 0.0),
];

const DEFAULT_PROMPT_PRICE: f64 = 1.00;
const DEFAULT_COMPLETION_PRICE: f64 = 3.00;

/// Estimated cost in dollars for one call.
pub fn estimate_cost(provider: &str, usage: &Usage) -> f64 {
    let (prompt_price, completion_price) = PRICING
        .iter()
        .find(|(name, _, _)| *name == provider)
        .map(|(_, p, c)| (*p, *c))
        .unwrap_or((DEFAULT_PROMPT_PRICE, DEFAULT_COMPLETION_PRICE));

    (usage.prompt_tokens as f64 * prompt_price
        + usage.completion_tokens as f64 * completion_price)
        / 1_000_000.0
}

/// Prompt and completion token totals for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenTotals {
    pub prompt: u32,
    pub completion: u32,
}

impl TokenTotals {
    pub fn total(&self) -> u32 {
        self.prompt + self.completion
    }
}

/// Side channel recording usage and cost per LLM call. Grows monotonically
/// across a run and is never shared between runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetadata {
    pub total_cost: f64,
    pub total_tokens: TokenTotals,
    /// Append-only log of `(provider, cost)` pairs, one per call.
    pub provider_costs: Vec<(String, f64)>,
    pub providers_used: BTreeSet<String>,
}

impl RunMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one LLM call's usage against the accumulator.
    pub fn record_call(&mut self, provider: &str, usage: &Usage) {
        let cost = estimate_cost(provider, usage);
        self.total_cost += cost;
        self.total_tokens.prompt += usage.prompt_tokens;
        self.total_tokens.completion += usage.completion_tokens;
        self.provider_costs.push((provider.to_string(), cost));
        self.providers_used.insert(provider.to_string());
    }

    /// Number of LLM calls recorded.
    pub fn call_count(&self) -> usize {
        self.provider_costs.len()
    }

    /// Fold another accumulator into this one, preserving call order.
    pub fn merge(&mut self, other: RunMetadata) {
        self.total_cost += other.total_cost;
        self.total_tokens.prompt += other.total_tokens.prompt;
        self.total_tokens.completion += other.total_tokens.completion;
        self.provider_costs.extend(other.provider_costs);
        self.providers_used.extend(other.providers_used);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_provider_pricing() {
        let usage = Usage::new(1_000_000, 1_000_000);
        let cost = estimate_cost("openai", &usage);
        assert!((cost - 12.50).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_provider_uses_flat_default() {
        let usage = Usage::new(1_000_000, 0);
        let cost = estimate_cost("someone-new", &usage);
        assert!((cost - DEFAULT_PROMPT_PRICE).abs() < 1e-9);
    }

    #[test]
    fn test_mock_provider_is_free() {
        let usage = Usage::new(10, 20);
        assert_eq!(estimate_cost("mock", &usage), 0.0);
    }

    #[test]
    fn test_accumulator_grows_monotonically() {
        let mut metadata = RunMetadata::new();
        metadata.record_call("openai", &Usage::new(100, 50));
        metadata.record_call("openai", &Usage::new(200, 100));
        metadata.record_call("anthropic", &Usage::new(10, 5));

        assert_eq!(metadata.call_count(), 3);
        assert_eq!(metadata.total_tokens.prompt, 310);
        assert_eq!(metadata.total_tokens.completion, 155);
        assert_eq!(metadata.total_tokens.total(), 465);
        // Deduplicated set, ordered log.
        assert_eq!(metadata.providers_used.len(), 2);
        assert_eq!(metadata.provider_costs[0].0, "openai");
        assert_eq!(metadata.provider_costs[2].0, "anthropic");
    }

    #[test]
    fn test_merge_preserves_order() {
        let mut a = RunMetadata::new();
        a.record_call("openai", &Usage::new(10, 10));
        let mut b = RunMetadata::new();
        b.record_call("groq", &Usage::new(20, 20));

        a.merge(b);
        assert_eq!(a.call_count(), 2);
        assert_eq!(a.provider_costs[1].0, "groq");
        assert!(a.providers_used.contains("groq"));
    }
}
