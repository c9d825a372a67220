use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use super::{LlmRequest, LlmResponse};
use crate::domain::error::ChainResult;

/// Trait for LLM providers (OpenAI, Anthropic, etc.)
///
/// Wire-level clients live outside this crate; the engine only depends on
/// this contract.
#[async_trait]
pub trait LlmProvider: Send + Sync + Debug {
    /// Send a chat completion request
    async fn chat(&self, request: LlmRequest) -> ChainResult<LlmResponse>;

    /// Get the provider name
    fn provider_name(&self) -> &'static str;
}

/// Registry mapping provider names to client instances.
///
/// Read-only during a run; populated once when the engine is built.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(name, provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Deterministic in-process provider.
///
/// Doubles as the safe default for unknown capability routes and as the
/// scriptable test double backing the forced-error contract, so it is part
/// of the public API rather than test-only code.
pub mod mock {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard};

    use super::*;
    use crate::domain::error::{ChainError, ProviderErrorKind};
    use crate::domain::llm::{FinishReason, Usage};

    #[derive(Debug)]
    pub struct MockLlmProvider {
        name: &'static str,
        /// Scripted responses, consumed front to back; the last one repeats.
        responses: Mutex<Vec<LlmResponse>>,
        error: Option<(ProviderErrorKind, String)>,
        call_count: AtomicUsize,
        last_request: Mutex<Option<LlmRequest>>,
    }

    fn lock_recovered<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    impl MockLlmProvider {
        pub fn new(name: &'static str) -> Self {
            Self {
                name,
                responses: Mutex::new(Vec::new()),
                error: None,
                call_count: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            }
        }

        /// Provider that answers every request with the same content.
        pub fn with_content(name: &'static str, content: impl Into<String>) -> Self {
            let provider = Self::new(name);
            let response = LlmResponse::new("mock-id", "mock-model", name, content)
                .with_finish_reason(FinishReason::Stop)
                .with_usage(Usage::new(10, 20));
            lock_recovered(&provider.responses).push(response);
            provider
        }

        pub fn with_response(self, response: LlmResponse) -> Self {
            lock_recovered(&self.responses).push(response);
            self
        }

        pub fn with_error(mut self, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
            self.error = Some((kind, message.into()));
            self
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        pub fn last_request(&self) -> Option<LlmRequest> {
            lock_recovered(&self.last_request).clone()
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlmProvider {
        async fn chat(&self, request: LlmRequest) -> ChainResult<LlmResponse> {
            let call = self.call_count.fetch_add(1, Ordering::SeqCst);
            *lock_recovered(&self.last_request) = Some(request);

            if let Some((kind, message)) = &self.error {
                return Err(ChainError::provider(self.name, *kind, message.clone()));
            }

            let responses = lock_recovered(&self.responses);
            match responses.get(call).or_else(|| responses.last()) {
                Some(response) => Ok(response.clone()),
                None => Ok(
                    LlmResponse::new("mock-id", "mock-model", self.name, "")
                        .with_finish_reason(FinishReason::Stop),
                ),
            }
        }

        fn provider_name(&self) -> &'static str {
            self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockLlmProvider;
    use super::*;
    use crate::domain::error::{ChainError, ProviderErrorKind};

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = ProviderRegistry::new()
            .with_provider("mock", Arc::new(MockLlmProvider::with_content("mock", "hi")));

        assert!(registry.get("mock").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[tokio::test]
    async fn test_mock_provider_scripted_responses() {
        let provider = MockLlmProvider::with_content("mock", "Hello!");
        let request = LlmRequest::builder().user("Hi").build();

        let first = provider.chat(request.clone()).await.unwrap();
        let second = provider.chat(request).await.unwrap();

        assert_eq!(first.content, "Hello!");
        assert_eq!(second.content, "Hello!");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_provider_error() {
        let provider =
            MockLlmProvider::new("mock").with_error(ProviderErrorKind::Server, "boom");
        let result = provider.chat(LlmRequest::builder().user("Hi").build()).await;

        assert!(matches!(
            result,
            Err(ChainError::Provider {
                kind: ProviderErrorKind::Server,
                ..
            })
        ));
    }
}
