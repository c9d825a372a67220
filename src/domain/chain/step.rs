//! The step union interpreted by the execution engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::error::{ChainError, ChainResult, ParseErrorKind};
use crate::domain::llm::{Capability, ToolChoice};
use crate::domain::template;
use crate::domain::variables::Variables;

/// User transform over the running value. Returns the next value explicitly;
/// panics inside the closure are recovered into `ChainError::Transform` by
/// the interpreter.
pub type TransformFn = Arc<dyn Fn(&Value, &Variables) -> ChainResult<Value> + Send + Sync>;

/// User prompt builder over the running value.
pub type PromptFn = Arc<dyn Fn(&Value, &Variables) -> ChainResult<String> + Send + Sync>;

/// Branch predicate for conditional LLM steps.
pub type PredicateFn = Arc<dyn Fn(&Value, &Variables) -> bool + Send + Sync>;

/// Dynamic provider selector for routed LLM steps.
pub type RouteFn = Arc<dyn Fn(&Value, &Variables) -> LlmTarget + Send + Sync>;

/// Custom parser over the raw step input.
pub type ParserFn = Arc<dyn Fn(&str) -> ChainResult<Value> + Send + Sync>;

/// Per-step overrides for an LLM call. Unset fields fall back to the engine
/// defaults when the request is built.
#[derive(Clone, Default)]
pub struct LlmStepOptions {
    pub system: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub tool_choice: Option<ToolChoice>,
    /// Deterministic failure hook for test chains.
    pub forced_error: bool,
    /// Alternatives tried in order once the primary provider (and its
    /// retries) are exhausted. Each gets a single attempt.
    pub fallback_providers: Vec<LlmTarget>,
}

impl LlmStepOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn with_forced_error(mut self, forced_error: bool) -> Self {
        self.forced_error = forced_error;
        self
    }

    pub fn with_fallback_provider(mut self, target: LlmTarget) -> Self {
        self.fallback_providers.push(target);
        self
    }
}

impl fmt::Debug for LlmStepOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmStepOptions")
            .field("system", &self.system)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("tool_choice", &self.tool_choice)
            .field("forced_error", &self.forced_error)
            .field("fallback_providers", &self.fallback_providers.len())
            .finish()
    }
}

/// A concrete provider plus per-call options, the unit the LLM execution
/// path consumes.
#[derive(Debug, Clone)]
pub struct LlmTarget {
    pub provider: String,
    pub options: LlmStepOptions,
}

impl LlmTarget {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            options: LlmStepOptions::default(),
        }
    }

    pub fn with_options(provider: impl Into<String>, options: LlmStepOptions) -> Self {
        Self {
            provider: provider.into(),
            options,
        }
    }
}

/// Structured prompt with declared variables, validated before rendering.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub template: String,
    pub required_variables: Vec<String>,
}

impl PromptSpec {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            required_variables: Vec::new(),
        }
    }

    pub fn with_required_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_variables = names.into_iter().map(Into::into).collect();
        self
    }

    /// Every declared variable must appear as a placeholder in the template.
    pub fn validate(&self) -> ChainResult<()> {
        let placeholders = template::placeholder_names(&self.template);
        for name in &self.required_variables {
            if !placeholders.contains(name) {
                return Err(ChainError::template(format!(
                    "declared variable '{name}' has no placeholder in prompt template"
                )));
            }
        }
        Ok(())
    }
}

/// Where a prompt step gets its text from.
#[derive(Clone)]
pub enum PromptSource {
    /// A `{{name}}` template resolved against variables plus `input`.
    Template(String),
    /// A structured prompt validated before rendering.
    Spec(PromptSpec),
    /// A user function of the running value and variables.
    Function(PromptFn),
}

impl fmt::Debug for PromptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(t) => f.debug_tuple("Template").field(t).finish(),
            Self::Spec(s) => f.debug_tuple("Spec").field(s).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// How a routed LLM step picks its target.
#[derive(Clone)]
pub enum RouteSelector {
    /// A user function of the running value and variables.
    Function(RouteFn),
    /// A task-key table. The effective key is the step's `task` option if
    /// set, else the `task` variable binding, else `"default"`; a miss falls
    /// back to the table's `"default"` entry.
    Table {
        routes: HashMap<String, LlmTarget>,
        task: Option<String>,
    },
}

impl RouteSelector {
    pub const DEFAULT_ROUTE: &'static str = "default";

    pub fn table(routes: HashMap<String, LlmTarget>) -> Self {
        Self::Table { routes, task: None }
    }

    pub fn table_for_task(routes: HashMap<String, LlmTarget>, task: impl Into<String>) -> Self {
        Self::Table {
            routes,
            task: Some(task.into()),
        }
    }

    /// Resolve the selector to a concrete target for this run.
    pub fn select(&self, input: &Value, variables: &Variables) -> ChainResult<LlmTarget> {
        match self {
            Self::Function(f) => Ok(f(input, variables)),
            Self::Table { routes, task } => {
                let key = task
                    .clone()
                    .or_else(|| variables.get_str("task").map(str::to_string))
                    .unwrap_or_else(|| Self::DEFAULT_ROUTE.to_string());

                routes
                    .get(&key)
                    .or_else(|| routes.get(Self::DEFAULT_ROUTE))
                    .cloned()
                    .ok_or_else(|| {
                        ChainError::configuration(format!(
                            "no route for task '{key}' and no default route"
                        ))
                    })
            }
        }
    }
}

impl fmt::Debug for RouteSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function(..)"),
            Self::Table { routes, task } => f
                .debug_struct("Table")
                .field("routes", &routes.keys().collect::<Vec<_>>())
                .field("task", task)
                .finish(),
        }
    }
}

/// How a parse step interprets the running value.
#[derive(Clone)]
pub enum ParseSpec {
    /// Decode as JSON; when `required_keys` is non-empty the decoded object
    /// must contain each key (shallow check only).
    Json { required_keys: Vec<String> },
    /// A user parser over the raw input string.
    Parser(ParserFn),
}

impl ParseSpec {
    pub fn json() -> Self {
        Self::Json {
            required_keys: Vec::new(),
        }
    }

    pub fn json_with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Json {
            required_keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Parser that decodes into a concrete type and re-emits it as a JSON
    /// value. The type's serde definition is the schema; there is no
    /// name-based field inference.
    pub fn typed<T>() -> Self
    where
        T: DeserializeOwned + serde::Serialize,
    {
        Self::Parser(Arc::new(|raw: &str| {
            let decoded: T = serde_json::from_str(raw).map_err(|e| ChainError::Parse {
                kind: ParseErrorKind::SchemaMismatch,
                message: e.to_string(),
            })?;
            serde_json::to_value(decoded).map_err(|e| ChainError::Parse {
                kind: ParseErrorKind::InvalidFormat,
                message: e.to_string(),
            })
        }))
    }
}

impl fmt::Debug for ParseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json { required_keys } => {
                f.debug_struct("Json").field("required_keys", required_keys).finish()
            }
            Self::Parser(_) => f.write_str("Parser(..)"),
        }
    }
}

/// One unit of work in a chain. Steps are stateless descriptors; all run
/// state lives in the engine.
#[derive(Clone)]
pub enum Step {
    /// Call an LLM provider with the current value as the user message.
    Llm(LlmTarget),
    /// Apply a user function to the current value.
    Transform(TransformFn),
    /// Render a prompt, replacing the current value.
    Prompt(PromptSource),
    /// Invoke a registered tool directly with templated parameters.
    Tool {
        name: String,
        params: HashMap<String, Value>,
    },
    /// Pick a provider at run time and delegate to the LLM path.
    RouteLlm(RouteSelector),
    /// Pick one of two targets by predicate and delegate to the LLM path.
    ConditionalLlm {
        predicate: PredicateFn,
        if_branch: LlmTarget,
        else_branch: LlmTarget,
    },
    /// Fan out one concurrent LLM call per branch; failed branches are
    /// dropped, and the step errors only when every branch fails.
    ParallelLlm(Vec<LlmTarget>),
    /// Route by declared capability instead of provider name.
    LlmWithCapability {
        capability: Capability,
        options: LlmStepOptions,
    },
    /// Parse the current value into structured data.
    Parse(ParseSpec),
}

impl Step {
    pub fn llm(provider: impl Into<String>) -> Self {
        Self::Llm(LlmTarget::new(provider))
    }

    pub fn llm_with(provider: impl Into<String>, options: LlmStepOptions) -> Self {
        Self::Llm(LlmTarget::with_options(provider, options))
    }

    pub fn transform<F>(f: F) -> Self
    where
        F: Fn(&Value, &Variables) -> ChainResult<Value> + Send + Sync + 'static,
    {
        Self::Transform(Arc::new(f))
    }

    pub fn prompt(template: impl Into<String>) -> Self {
        Self::Prompt(PromptSource::Template(template.into()))
    }

    pub fn prompt_spec(spec: PromptSpec) -> Self {
        Self::Prompt(PromptSource::Spec(spec))
    }

    pub fn prompt_fn<F>(f: F) -> Self
    where
        F: Fn(&Value, &Variables) -> ChainResult<String> + Send + Sync + 'static,
    {
        Self::Prompt(PromptSource::Function(Arc::new(f)))
    }

    pub fn tool(name: impl Into<String>, params: HashMap<String, Value>) -> Self {
        Self::Tool {
            name: name.into(),
            params,
        }
    }

    pub fn route_llm(selector: RouteSelector) -> Self {
        Self::RouteLlm(selector)
    }

    pub fn route_llm_fn<F>(f: F) -> Self
    where
        F: Fn(&Value, &Variables) -> LlmTarget + Send + Sync + 'static,
    {
        Self::RouteLlm(RouteSelector::Function(Arc::new(f)))
    }

    pub fn conditional_llm<F>(predicate: F, if_branch: LlmTarget, else_branch: LlmTarget) -> Self
    where
        F: Fn(&Value, &Variables) -> bool + Send + Sync + 'static,
    {
        Self::ConditionalLlm {
            predicate: Arc::new(predicate),
            if_branch,
            else_branch,
        }
    }

    pub fn parallel_llm(branches: Vec<LlmTarget>) -> Self {
        Self::ParallelLlm(branches)
    }

    pub fn llm_with_capability(capability: Capability) -> Self {
        Self::LlmWithCapability {
            capability,
            options: LlmStepOptions::default(),
        }
    }

    pub fn llm_with_capability_opts(capability: Capability, options: LlmStepOptions) -> Self {
        Self::LlmWithCapability {
            capability,
            options,
        }
    }

    pub fn parse(spec: ParseSpec) -> Self {
        Self::Parse(spec)
    }

    /// Step name used in logs and error context.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Llm(_) => "llm",
            Self::Transform(_) => "transform",
            Self::Prompt(_) => "prompt",
            Self::Tool { .. } => "tool",
            Self::RouteLlm(_) => "route_llm",
            Self::ConditionalLlm { .. } => "conditional_llm",
            Self::ParallelLlm(_) => "parallel_llm",
            Self::LlmWithCapability { .. } => "llm_with_capability",
            Self::Parse(_) => "parse",
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Llm(target) => f.debug_tuple("Llm").field(target).finish(),
            Self::Transform(_) => f.write_str("Transform(..)"),
            Self::Prompt(source) => f.debug_tuple("Prompt").field(source).finish(),
            Self::Tool { name, params } => f
                .debug_struct("Tool")
                .field("name", name)
                .field("params", params)
                .finish(),
            Self::RouteLlm(selector) => f.debug_tuple("RouteLlm").field(selector).finish(),
            Self::ConditionalLlm {
                if_branch,
                else_branch,
                ..
            } => f
                .debug_struct("ConditionalLlm")
                .field("if_branch", if_branch)
                .field("else_branch", else_branch)
                .finish(),
            Self::ParallelLlm(branches) => f.debug_tuple("ParallelLlm").field(branches).finish(),
            Self::LlmWithCapability {
                capability,
                options,
            } => f
                .debug_struct("LlmWithCapability")
                .field("capability", capability)
                .field("options", options)
                .finish(),
            Self::Parse(spec) => f.debug_tuple("Parse").field(spec).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_route_table_prefers_task_option() {
        let mut routes = HashMap::new();
        routes.insert("default".to_string(), LlmTarget::new("mock"));
        routes.insert("code".to_string(), LlmTarget::new("openai"));
        let selector = RouteSelector::table_for_task(routes, "code");

        let target = selector
            .select(&json!("input"), &Variables::new())
            .expect("route");
        assert_eq!(target.provider, "openai");
    }

    #[test]
    fn test_route_table_reads_task_variable() {
        let mut routes = HashMap::new();
        routes.insert("default".to_string(), LlmTarget::new("mock"));
        routes.insert("fast".to_string(), LlmTarget::new("groq"));
        let selector = RouteSelector::table(routes);

        let vars = Variables::new().with("task", "fast");
        let target = selector.select(&json!("input"), &vars).expect("route");
        assert_eq!(target.provider, "groq");
    }

    #[test]
    fn test_route_table_falls_back_to_default() {
        let mut routes = HashMap::new();
        routes.insert("default".to_string(), LlmTarget::new("anthropic"));
        let selector = RouteSelector::table_for_task(routes, "unknown");

        let target = selector
            .select(&json!("input"), &Variables::new())
            .expect("route");
        assert_eq!(target.provider, "anthropic");
    }

    #[test]
    fn test_route_table_errors_without_default() {
        let selector = RouteSelector::table_for_task(HashMap::new(), "unknown");
        let err = selector
            .select(&json!("input"), &Variables::new())
            .unwrap_err();
        assert!(matches!(err, ChainError::Configuration { .. }));
    }

    #[test]
    fn test_prompt_spec_validation() {
        let spec = PromptSpec::new("Hello {{name}}").with_required_variables(["name"]);
        assert!(spec.validate().is_ok());

        let spec = PromptSpec::new("Hello {{name}}").with_required_variables(["missing"]);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_typed_parse_spec() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Answer {
            score: u32,
        }

        let ParseSpec::Parser(parser) = ParseSpec::typed::<Answer>() else {
            panic!("expected parser variant");
        };

        let value = parser(r#"{"score": 7}"#).expect("parse");
        assert_eq!(value, json!({"score": 7}));

        let err = parser(r#"{"score": "high"}"#).unwrap_err();
        assert!(matches!(
            err,
            ChainError::Parse {
                kind: ParseErrorKind::SchemaMismatch,
                ..
            }
        ));
    }
}
