use thiserror::Error;

/// Classification of failures reported by an LLM provider.
///
/// The class decides whether the retry combinator may re-attempt the call:
/// transient conditions (network, rate limiting, server-side faults) are
/// retryable, request-shaped conditions (auth, malformed payloads, unknown
/// models) are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Network,
    Auth,
    RateLimit,
    Server,
    MalformedResponse,
    NotFound,
}

impl ProviderErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::Server)
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::MalformedResponse => "malformed_response",
            Self::NotFound => "not_found",
        };
        write!(f, "{}", name)
    }
}

/// Classification of parse-step failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    SchemaMismatch,
    InvalidFormat,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SchemaMismatch => "schema_mismatch",
            Self::InvalidFormat => "invalid_format",
        };
        write!(f, "{}", name)
    }
}

/// Core chain execution errors
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Missing required variable: {name}")]
    MissingRequiredVariable { name: String },

    #[error("Template resolution failed: {message}")]
    TemplateResolution { message: String },

    #[error("Provider error ({kind}): {provider} - {message}")]
    Provider {
        provider: String,
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Tool call depth exceeded the bound of {max_depth}")]
    MaxToolDepthExceeded { max_depth: u32 },

    #[error("Parse error ({kind}): {message}")]
    Parse {
        kind: ParseErrorKind,
        message: String,
    },

    #[error("Transform failed: {message}")]
    Transform { message: String },

    #[error("All {attempted} parallel branches failed")]
    AllBranchesFailed { attempted: usize },

    #[error("Fallback failed: {message}")]
    FallbackFailed { message: String },

    #[error("Memory error: {message}")]
    Memory { message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Convenience alias used throughout the crate.
pub type ChainResult<T> = Result<T, ChainError>;

impl ChainError {
    pub fn missing_variable(name: impl Into<String>) -> Self {
        Self::MissingRequiredVariable { name: name.into() }
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::TemplateResolution {
            message: message.into(),
        }
    }

    pub fn provider(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound { name: name.into() }
    }

    pub fn parse(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::Parse {
            kind,
            message: message.into(),
        }
    }

    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform {
            message: message.into(),
        }
    }

    pub fn fallback(message: impl Into<String>) -> Self {
        Self::FallbackFailed {
            message: message.into(),
        }
    }

    pub fn memory(message: impl Into<String>) -> Self {
        Self::Memory {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the retry combinator may re-attempt the failed operation.
    ///
    /// Only provider failures of a transient class and timeouts qualify;
    /// everything else short-circuits without consuming further attempts.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { kind, .. } => kind.is_retryable(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let error = ChainError::provider("openai", ProviderErrorKind::RateLimit, "429");
        assert_eq!(
            error.to_string(),
            "Provider error (rate_limit): openai - 429"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ChainError::provider("p", ProviderErrorKind::Network, "down").is_retryable());
        assert!(ChainError::provider("p", ProviderErrorKind::RateLimit, "429").is_retryable());
        assert!(ChainError::provider("p", ProviderErrorKind::Server, "500").is_retryable());
        assert!(ChainError::timeout(100).is_retryable());

        assert!(!ChainError::provider("p", ProviderErrorKind::Auth, "401").is_retryable());
        assert!(
            !ChainError::provider("p", ProviderErrorKind::MalformedResponse, "bad").is_retryable()
        );
        assert!(!ChainError::provider("p", ProviderErrorKind::NotFound, "404").is_retryable());
        assert!(!ChainError::tool_not_found("search").is_retryable());
        assert!(!ChainError::transform("boom").is_retryable());
    }

    #[test]
    fn test_missing_variable_display() {
        let error = ChainError::missing_variable("session_id");
        assert_eq!(error.to_string(), "Missing required variable: session_id");
    }
}
