//! Capability-based provider routing.
//!
//! Maps a declared task capability onto a concrete provider name instead of
//! naming the provider in the step. The table is static; capabilities the
//! table does not know route to the built-in mock provider so a chain never
//! fails on an unrecognized tag.

use serde::{Deserialize, Serialize};

/// Default provider name used for capabilities without a mapping.
pub const FALLBACK_PROVIDER: &str = "mock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    LongContext,
    CodeGeneration,
    FastResponse,
    ImageGeneration,
    /// An unrecognized capability tag, preserved for diagnostics.
    Other(String),
}

impl Capability {
    /// The provider name this capability routes to.
    pub fn provider_name(&self) -> &str {
        match self {
            Self::LongContext => "anthropic",
            Self::CodeGeneration => "openai",
            Self::FastResponse => "groq",
            Self::ImageGeneration => "openai",
            Self::Other(_) => FALLBACK_PROVIDER,
        }
    }
}

impl From<&str> for Capability {
    fn from(tag: &str) -> Self {
        match tag {
            "long_context" => Self::LongContext,
            "code_generation" => Self::CodeGeneration,
            "fast_response" => Self::FastResponse,
            "image_generation" => Self::ImageGeneration,
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_capability_routes() {
        assert_eq!(Capability::LongContext.provider_name(), "anthropic");
        assert_eq!(Capability::CodeGeneration.provider_name(), "openai");
        assert_eq!(Capability::FastResponse.provider_name(), "groq");
    }

    #[test]
    fn test_unknown_capability_routes_to_fallback() {
        let capability = Capability::from("underwater_basket_weaving");
        assert_eq!(capability.provider_name(), FALLBACK_PROVIDER);
        assert!(matches!(capability, Capability::Other(_)));
    }

    #[test]
    fn test_tag_round_trip() {
        assert_eq!(Capability::from("long_context"), Capability::LongContext);
        assert_eq!(
            Capability::from("fast_response"),
            Capability::FastResponse
        );
    }
}
