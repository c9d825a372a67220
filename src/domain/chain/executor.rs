//! The chain execution engine.
//!
//! Validates the run, resolves the initial input, then folds the step list
//! left to right. Resilience layers compose in a fixed order: retry wraps
//! the raw LLM call, the chain timeout bounds each step, and the chain
//! fallback wraps the whole run as the outermost layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::entity::Chain;
use super::metadata::RunMetadata;
use super::resilience::{RetryConfig, RunContext};
use super::step::{LlmTarget, ParseSpec, PromptSource, Step};
use super::tool_loop::run_tool_loop;
use crate::config::EngineConfig;
use crate::domain::error::{ChainError, ChainResult, ParseErrorKind, ProviderErrorKind};
use crate::domain::llm::mock::MockLlmProvider;
use crate::domain::llm::{
    LlmProvider, LlmRequest, ProviderRegistry, ToolChoice, Usage, FALLBACK_PROVIDER,
};
use crate::domain::memory::{
    resolve_session_id, MemoryBackend, MemoryManager, MemoryStore,
};
use crate::domain::template;
use crate::domain::variables::Variables;
use crate::infrastructure::memory::{FileStore, InMemoryStore, SqliteStore};

/// Per-run state. Metadata and counters use interior mutability so parallel
/// branches can record against them without exclusive access.
struct RunState {
    session_id: String,
    memory: Option<MemoryManager>,
    metadata: Mutex<RunMetadata>,
    retry_count: AtomicU32,
    completed_steps: AtomicUsize,
}

impl RunState {
    fn lock_metadata(&self) -> MutexGuard<'_, RunMetadata> {
        match self.metadata.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn into_metadata(self) -> RunMetadata {
        match self.metadata.into_inner() {
            Ok(metadata) => metadata,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The step interpreter and its surrounding run machinery.
///
/// Holds the provider registry, engine defaults and a cache of memory store
/// handles, so every run of a chain observes a consistent backend for a
/// given backend descriptor. Chains themselves stay immutable and reusable.
#[derive(Debug)]
pub struct ChainEngine {
    providers: ProviderRegistry,
    config: EngineConfig,
    stores: Mutex<HashMap<MemoryBackend, Arc<dyn MemoryStore>>>,
}

impl Default for ChainEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainEngine {
    /// Engine with default configuration and the built-in mock provider
    /// registered under the capability-fallback name.
    pub fn new() -> Self {
        let providers = ProviderRegistry::new().with_provider(
            FALLBACK_PROVIDER,
            Arc::new(MockLlmProvider::with_content(
                FALLBACK_PROVIDER,
                "Mock response",
            )),
        );

        Self {
            providers,
            config: EngineConfig::default(),
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_provider(
        mut self,
        name: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        self.providers.register(name, provider);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Pre-bind a store to a backend descriptor, overriding the default
    /// construction. Useful for tests and custom backends.
    pub fn with_memory_store(self, backend: MemoryBackend, store: Arc<dyn MemoryStore>) -> Self {
        self.lock_stores().insert(backend, store);
        self
    }

    /// Execute the chain against the given variable bindings.
    pub async fn run(&self, chain: &Chain, variables: &Variables) -> ChainResult<Value> {
        self.run_with_metadata(chain, variables)
            .await
            .map(|(value, _)| value)
    }

    /// Execute the chain, also returning the run's usage and cost metadata.
    pub async fn run_with_metadata(
        &self,
        chain: &Chain,
        variables: &Variables,
    ) -> ChainResult<(Value, RunMetadata)> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        debug!(%run_id, steps = chain.steps.len(), "starting chain run");

        let state = self.init_state(chain, variables)?;
        let result = self.execute(chain, variables, &state).await;

        match result {
            Ok(value) => {
                debug!(%run_id, elapsed_ms = started.elapsed().as_millis() as u64, "chain run succeeded");
                Ok((value, state.into_metadata()))
            }
            Err(error) => match &chain.options.fallback {
                Some(fallback) => {
                    warn!(%run_id, %error, "chain run failed, engaging fallback");
                    let context = RunContext {
                        elapsed: started.elapsed(),
                        retry_count: state.retry_count.load(Ordering::SeqCst),
                        completed_steps: state.completed_steps.load(Ordering::SeqCst),
                        variables: variables.clone(),
                    };
                    let value = fallback.resolve(&error, &context)?;
                    Ok((value, state.into_metadata()))
                }
                None => {
                    debug!(%run_id, %error, "chain run failed");
                    Err(error)
                }
            },
        }
    }

    fn init_state(&self, chain: &Chain, variables: &Variables) -> ChainResult<RunState> {
        let memory = match &chain.options.memory {
            Some(config) => Some(MemoryManager::new(
                self.resolve_store(&config.backend)?,
                config.clone(),
            )),
            None => None,
        };

        Ok(RunState {
            session_id: resolve_session_id(variables, chain.options.session_id.as_deref()),
            memory,
            metadata: Mutex::new(RunMetadata::new()),
            retry_count: AtomicU32::new(0),
            completed_steps: AtomicUsize::new(0),
        })
    }

    fn lock_stores(&self) -> MutexGuard<'_, HashMap<MemoryBackend, Arc<dyn MemoryStore>>> {
        match self.stores.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn resolve_store(&self, backend: &MemoryBackend) -> ChainResult<Arc<dyn MemoryStore>> {
        let mut cache = self.lock_stores();
        if let Some(store) = cache.get(backend) {
            return Ok(store.clone());
        }

        let store: Arc<dyn MemoryStore> = match backend {
            MemoryBackend::Shared => Arc::new(InMemoryStore::new()),
            MemoryBackend::File { path } => Arc::new(FileStore::new(path.clone())),
            MemoryBackend::Database { path } => Arc::new(SqliteStore::open(path)?),
        };
        cache.insert(backend.clone(), store.clone());
        Ok(store)
    }

    async fn execute(
        &self,
        chain: &Chain,
        variables: &Variables,
        state: &RunState,
    ) -> ChainResult<Value> {
        for name in &chain.options.required_variables {
            if !variables.contains(name) {
                return Err(ChainError::missing_variable(name));
            }
        }

        let mut value = self.initial_input(chain, variables)?;
        for (index, step) in chain.steps.iter().enumerate() {
            debug!(index, kind = step.kind(), "executing step");
            value = self
                .execute_step_bounded(chain, step, value, variables, state)
                .await?;
            state.completed_steps.fetch_add(1, Ordering::SeqCst);
        }
        Ok(value)
    }

    /// Initial input: the resolved user-prompt template, else the `input`
    /// variable, else the empty string.
    fn initial_input(&self, chain: &Chain, variables: &Variables) -> ChainResult<Value> {
        if let Some(template) = &chain.user_prompt {
            return Ok(Value::String(template::resolve(template, variables)?));
        }
        Ok(variables
            .get("input")
            .cloned()
            .unwrap_or_else(|| Value::String(String::new())))
    }

    async fn execute_step_bounded(
        &self,
        chain: &Chain,
        step: &Step,
        value: Value,
        variables: &Variables,
        state: &RunState,
    ) -> ChainResult<Value> {
        let fut = self.execute_step(chain, step, value, variables, state);
        match chain.effective_timeout_ms() {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), fut)
                .await
                .map_err(|_| ChainError::timeout(ms))?,
            None => fut.await,
        }
    }

    async fn execute_step(
        &self,
        chain: &Chain,
        step: &Step,
        value: Value,
        variables: &Variables,
        state: &RunState,
    ) -> ChainResult<Value> {
        match step {
            Step::Llm(target) => self.execute_llm(chain, target, &value, variables, state).await,

            Step::Transform(f) => {
                // User code runs on the blocking pool inside a panic
                // recovery boundary; a timed-out transform is abandoned
                // there rather than blocking the run.
                let f = f.clone();
                let input = value;
                let vars = variables.clone();
                match tokio::task::spawn_blocking(move || f(&input, &vars)).await {
                    Ok(result) => result,
                    Err(join_error) => {
                        if join_error.is_panic() {
                            Err(ChainError::transform(panic_message(
                                join_error.into_panic(),
                            )))
                        } else {
                            Err(ChainError::transform("transform task cancelled"))
                        }
                    }
                }
            }

            Step::Prompt(source) => {
                let merged = variables.with_input(&value);
                let text = match source {
                    PromptSource::Template(t) => template::resolve(t, &merged)?,
                    PromptSource::Spec(spec) => {
                        spec.validate()?;
                        template::resolve(&spec.template, &merged)?
                    }
                    PromptSource::Function(f) => f(&value, variables)?,
                };
                Ok(Value::String(text))
            }

            Step::Tool { name, params } => {
                let tool = chain
                    .options
                    .tools
                    .get(name)
                    .ok_or_else(|| ChainError::tool_not_found(name))?;

                let merged = variables.with_input(&value);
                let mut args = Map::new();
                for (key, param) in params {
                    let resolved = match param {
                        Value::String(s) if template::looks_like_template(s) => {
                            Value::String(template::resolve(s, &merged)?)
                        }
                        other => other.clone(),
                    };
                    args.insert(key.clone(), resolved);
                }
                tool.call(args)
            }

            Step::RouteLlm(selector) => {
                let target = selector.select(&value, variables)?;
                self.execute_llm(chain, &target, &value, variables, state)
                    .await
            }

            Step::ConditionalLlm {
                predicate,
                if_branch,
                else_branch,
            } => {
                let target = if predicate(&value, variables) {
                    if_branch
                } else {
                    else_branch
                };
                self.execute_llm(chain, target, &value, variables, state)
                    .await
            }

            Step::ParallelLlm(branches) => {
                self.execute_parallel(chain, branches, &value, variables, state)
                    .await
            }

            Step::LlmWithCapability {
                capability,
                options,
            } => {
                let target =
                    LlmTarget::with_options(capability.provider_name(), options.clone());
                self.execute_llm(chain, &target, &value, variables, state)
                    .await
            }

            Step::Parse(spec) => execute_parse(spec, &value),
        }
    }

    /// One concurrent call per branch under a collective per-branch ceiling.
    /// Failed branches are dropped; the step errors only when every branch
    /// fails.
    async fn execute_parallel(
        &self,
        chain: &Chain,
        branches: &[LlmTarget],
        input: &Value,
        variables: &Variables,
        state: &RunState,
    ) -> ChainResult<Value> {
        if branches.is_empty() {
            return Ok(Value::Array(Vec::new()));
        }

        let ceiling = Duration::from_millis(self.config.parallel_branch_timeout_ms);
        let futures = branches.iter().map(|branch| async move {
            match tokio::time::timeout(
                ceiling,
                self.execute_llm(chain, branch, input, variables, state),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ChainError::timeout(self.config.parallel_branch_timeout_ms)),
            }
        });

        let results = join_all(futures).await;
        let attempted = results.len();
        let successes: Vec<Value> = results
            .into_iter()
            .filter_map(|result| match result {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(%error, "parallel branch failed");
                    None
                }
            })
            .collect();

        if successes.is_empty() {
            Err(ChainError::AllBranchesFailed { attempted })
        } else {
            Ok(Value::Array(successes))
        }
    }

    /// The shared LLM path: the primary target with retries, then each
    /// per-step fallback provider once, surfacing the last error.
    async fn execute_llm(
        &self,
        chain: &Chain,
        target: &LlmTarget,
        input: &Value,
        variables: &Variables,
        state: &RunState,
    ) -> ChainResult<Value> {
        match self
            .call_with_retry(chain, target, input, variables, state)
            .await
        {
            Ok(value) => Ok(value),
            Err(primary_error) => {
                let mut last_error = primary_error;
                for alternative in &target.options.fallback_providers {
                    warn!(
                        provider = %alternative.provider,
                        after = %last_error,
                        "trying fallback provider"
                    );
                    match self
                        .call_provider(chain, alternative, input, variables, state)
                        .await
                    {
                        Ok(value) => return Ok(value),
                        Err(error) => last_error = error,
                    }
                }
                Err(last_error)
            }
        }
    }

    async fn call_with_retry(
        &self,
        chain: &Chain,
        target: &LlmTarget,
        input: &Value,
        variables: &Variables,
        state: &RunState,
    ) -> ChainResult<Value> {
        let retry = chain
            .options
            .retry
            .clone()
            .unwrap_or_else(|| RetryConfig::new(1));

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .call_provider(chain, target, input, variables, state)
                .await
            {
                Ok(value) => return Ok(value),
                Err(error) if attempt < retry.max_attempts && error.is_retryable() => {
                    state.retry_count.fetch_add(1, Ordering::SeqCst);
                    let delay = retry.delay_for_attempt(attempt + 1);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "retrying provider call"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// One provider attempt: build the request (system prompt, memory
    /// context, defaults), call the client or delegate to the tool loop,
    /// record usage and write the exchange back to memory.
    async fn call_provider(
        &self,
        chain: &Chain,
        target: &LlmTarget,
        input: &Value,
        variables: &Variables,
        state: &RunState,
    ) -> ChainResult<Value> {
        if target.options.forced_error || chain.options.force_all_errors {
            return Err(ChainError::provider(
                &target.provider,
                ProviderErrorKind::Server,
                "forced failure",
            ));
        }

        let provider = self.providers.get(&target.provider).ok_or_else(|| {
            ChainError::provider(
                &target.provider,
                ProviderErrorKind::NotFound,
                "provider not registered",
            )
        })?;

        let user_content = template::value_to_string(input);
        let mut system = self.system_content(chain, target, variables)?;

        if let Some(memory) = &state.memory {
            if let Some(block) = memory.context_block(&state.session_id).await? {
                system = Some(match system {
                    Some(existing) => format!("{existing}\n\n{block}"),
                    None => block,
                });
            }
        }

        let mut builder = LlmRequest::builder();
        if let Some(system) = system {
            builder = builder.system(system);
        }
        builder = builder
            .user(user_content.clone())
            .temperature(
                target
                    .options
                    .temperature
                    .unwrap_or(self.config.default_temperature),
            )
            .max_tokens(
                target
                    .options
                    .max_tokens
                    .unwrap_or(self.config.default_max_tokens),
            );
        if let Some(model) = &target.options.model {
            builder = builder.model(model.clone());
        }

        let tool_choice = target.options.tool_choice.unwrap_or_default();
        let response = if chain.has_tools() && tool_choice != ToolChoice::None {
            let request = builder
                .tools(chain.options.tools.definitions())
                .tool_choice(tool_choice)
                .build();
            let outcome = run_tool_loop(
                &provider,
                request,
                &chain.options.tools,
                self.config.max_tool_depth,
            )
            .await?;
            for (_, usage) in &outcome.round_trips {
                self.record_usage(state, &target.provider, *usage);
            }
            outcome.response
        } else {
            let request = builder.tool_choice(tool_choice).build();
            let response = provider.chat(request).await?;
            self.record_usage(state, &target.provider, response.usage);
            response
        };

        if let Some(memory) = &state.memory {
            memory
                .record_exchange(&state.session_id, &user_content, &response.content)
                .await?;
        }

        Ok(Value::String(response.content))
    }

    /// Step-level system override else the chain-level template; both are
    /// resolved against the run variables.
    fn system_content(
        &self,
        chain: &Chain,
        target: &LlmTarget,
        variables: &Variables,
    ) -> ChainResult<Option<String>> {
        let template = target
            .options
            .system
            .as_deref()
            .or(chain.system_prompt.as_deref());
        match template {
            Some(template) => Ok(Some(template::resolve(template, variables)?)),
            None => Ok(None),
        }
    }

    fn record_usage(&self, state: &RunState, provider: &str, usage: Option<Usage>) {
        let usage = usage.unwrap_or_else(|| {
            Usage::new(
                self.config.mock_prompt_tokens,
                self.config.mock_completion_tokens,
            )
        });
        state.lock_metadata().record_call(provider, &usage);
    }
}

fn execute_parse(spec: &ParseSpec, value: &Value) -> ChainResult<Value> {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    match spec {
        ParseSpec::Json { required_keys } => {
            let decoded: Value = serde_json::from_str(&raw)
                .map_err(|e| ChainError::parse(ParseErrorKind::InvalidFormat, e.to_string()))?;

            if !required_keys.is_empty() {
                let object = decoded.as_object().ok_or_else(|| {
                    ChainError::parse(ParseErrorKind::SchemaMismatch, "expected a JSON object")
                })?;
                for key in required_keys {
                    if !object.contains_key(key) {
                        return Err(ChainError::parse(
                            ParseErrorKind::SchemaMismatch,
                            format!("missing required key '{key}'"),
                        ));
                    }
                }
            }
            Ok(decoded)
        }
        ParseSpec::Parser(parser) => parser(&raw),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "transform panicked".to_string()
    }
}
