use super::entity::Tool;
use crate::domain::llm::ToolDefinition;

/// The tools attached to a chain, looked up by name when the model requests
/// an invocation. Read-only during a run.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Case-insensitive lookup by tool name.
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools
            .iter()
            .find(|tool| tool.name().eq_ignore_ascii_case(name))
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Wire-format descriptions of every registered tool.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(Tool::definition).collect()
    }
}

impl FromIterator<Tool> for ToolRegistry {
    fn from_iter<I: IntoIterator<Item = Tool>>(iter: I) -> Self {
        Self {
            tools: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tool::{ParameterSpec, ToolParameters};
    use serde_json::json;

    fn echo_tool(name: &str) -> Tool {
        Tool::new(
            name,
            ToolParameters::new().with_parameter("text", ParameterSpec::string().required()),
            |args| Ok(args["text"].clone()),
        )
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = ToolRegistry::new().with_tool(echo_tool("Echo"));

        assert!(registry.get("echo").is_some());
        assert!(registry.get("ECHO").is_some());
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn test_definitions() {
        let registry = ToolRegistry::new()
            .with_tool(echo_tool("first"))
            .with_tool(echo_tool("second"));

        let definitions = registry.definitions();
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].name, "first");
        assert_eq!(definitions[0].parameters["required"], json!(["text"]));
    }
}
