use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::llm::MessageRole;

/// One stored conversational turn.
///
/// Entries for a session are kept newest-first at the storage layer and are
/// reversed into chronological order only when injected as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// The `"Role: content"` line used for context injection.
    pub fn format_line(&self) -> String {
        format!("{}: {}", self.role, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line() {
        let entry = MemoryEntry::user("hello");
        assert_eq!(entry.format_line(), "User: hello");

        let entry = MemoryEntry::assistant("hi there");
        assert_eq!(entry.format_line(), "Assistant: hi there");
    }
}
