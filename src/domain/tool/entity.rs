//! Tool definitions with schema-validated parameters.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::domain::error::{ChainError, ChainResult};
use crate::domain::llm::ToolDefinition;

/// Handler invoked when the model requests a tool call. Arguments are
/// guaranteed to satisfy the tool's parameter schema.
pub type ToolHandler = Arc<dyn Fn(Map<String, Value>) -> ChainResult<Value> + Send + Sync>;

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// Constraints declared for one tool parameter.
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    param_type: ParameterType,
    required: bool,
    default: Option<Value>,
    allowed_values: Option<Vec<Value>>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    pattern: Option<String>,
    description: Option<String>,
}

impl ParameterSpec {
    pub fn new(param_type: ParameterType) -> Self {
        Self {
            param_type,
            required: false,
            default: None,
            allowed_values: None,
            minimum: None,
            maximum: None,
            pattern: None,
            description: None,
        }
    }

    pub fn string() -> Self {
        Self::new(ParameterType::String)
    }

    pub fn number() -> Self {
        Self::new(ParameterType::Number)
    }

    pub fn integer() -> Self {
        Self::new(ParameterType::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(ParameterType::Boolean)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = Some(values);
        self
    }

    pub fn with_minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn with_maximum(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    fn validate(&self, name: &str, value: &Value) -> ChainResult<()> {
        if !self.param_type.matches(value) {
            return Err(ChainError::configuration(format!(
                "parameter '{}' expects type {}",
                name,
                self.param_type.type_name()
            )));
        }

        if let Some(allowed) = &self.allowed_values {
            if !allowed.contains(value) {
                return Err(ChainError::configuration(format!(
                    "parameter '{}' must be one of {:?}",
                    name, allowed
                )));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(minimum) = self.minimum {
                if n < minimum {
                    return Err(ChainError::configuration(format!(
                        "parameter '{}' must be >= {}",
                        name, minimum
                    )));
                }
            }
            if let Some(maximum) = self.maximum {
                if n > maximum {
                    return Err(ChainError::configuration(format!(
                        "parameter '{}' must be <= {}",
                        name, maximum
                    )));
                }
            }
        }

        if let (Some(pattern), Some(s)) = (&self.pattern, value.as_str()) {
            let regex = regex::Regex::new(pattern).map_err(|e| {
                ChainError::configuration(format!(
                    "invalid pattern for parameter '{}': {}",
                    name, e
                ))
            })?;
            if !regex.is_match(s) {
                return Err(ChainError::configuration(format!(
                    "parameter '{}' does not match pattern {}",
                    name, pattern
                )));
            }
        }

        Ok(())
    }

    fn schema_value(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.param_type.type_name()));
        if let Some(description) = &self.description {
            schema.insert("description".into(), json!(description));
        }
        if let Some(allowed) = &self.allowed_values {
            schema.insert("enum".into(), json!(allowed));
        }
        if let Some(minimum) = self.minimum {
            schema.insert("minimum".into(), json!(minimum));
        }
        if let Some(maximum) = self.maximum {
            schema.insert("maximum".into(), json!(maximum));
        }
        if let Some(pattern) = &self.pattern {
            schema.insert("pattern".into(), json!(pattern));
        }
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.clone());
        }
        Value::Object(schema)
    }
}

/// Parameter schema for a tool: named specs plus required/default handling.
#[derive(Debug, Clone, Default)]
pub struct ToolParameters {
    properties: BTreeMap<String, ParameterSpec>,
}

impl ToolParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.properties.insert(name.into(), spec);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// The declared identifier matching a raw argument key, if any.
    /// Matching is case-insensitive; unmatched keys are left to the caller.
    pub fn canonical_name(&self, raw_key: &str) -> Option<&str> {
        self.properties
            .keys()
            .find(|name| name.eq_ignore_ascii_case(raw_key))
            .map(String::as_str)
    }

    /// Validate raw arguments against the schema, filling in defaults.
    /// Returns the arguments the handler may be invoked with.
    pub fn validate(&self, args: Map<String, Value>) -> ChainResult<Map<String, Value>> {
        let mut validated = args;

        for (name, spec) in &self.properties {
            match validated.get(name) {
                Some(value) => spec.validate(name, value)?,
                None => {
                    if let Some(default) = &spec.default {
                        validated.insert(name.clone(), default.clone());
                    } else if spec.required {
                        return Err(ChainError::configuration(format!(
                            "missing required parameter '{}'",
                            name
                        )));
                    }
                }
            }
        }

        Ok(validated)
    }

    /// JSON-schema object in the shape providers expect.
    pub fn schema_value(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, spec)| (name.clone(), spec.schema_value()))
            .collect();
        let required: Vec<&str> = self
            .properties
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A named, schema-validated function the model may request mid-conversation.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    parameters: ToolParameters,
    handler: ToolHandler,
}

impl Tool {
    pub fn new<F>(name: impl Into<String>, parameters: ToolParameters, handler: F) -> Self
    where
        F: Fn(Map<String, Value>) -> ChainResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            parameters,
            handler: Arc::new(handler),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    /// Validate arguments and invoke the handler.
    pub fn call(&self, args: Map<String, Value>) -> ChainResult<Value> {
        let validated = self.parameters.validate(args)?;
        (self.handler)(validated)
    }

    /// Wire-format description of this tool.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.schema_value(),
        }
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> Tool {
        Tool::new(
            "add",
            ToolParameters::new()
                .with_parameter("a", ParameterSpec::number().required())
                .with_parameter("b", ParameterSpec::number().with_default(1.0)),
            |args| {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                Ok(json!(a + b))
            },
        )
    }

    #[test]
    fn test_call_with_valid_args() {
        let tool = calculator();
        let mut args = Map::new();
        args.insert("a".into(), json!(2.0));
        args.insert("b".into(), json!(3.0));

        assert_eq!(tool.call(args).unwrap(), json!(5.0));
    }

    #[test]
    fn test_default_applied_when_missing() {
        let tool = calculator();
        let mut args = Map::new();
        args.insert("a".into(), json!(2.0));

        assert_eq!(tool.call(args).unwrap(), json!(3.0));
    }

    #[test]
    fn test_missing_required_parameter() {
        let tool = calculator();
        let result = tool.call(Map::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let tool = calculator();
        let mut args = Map::new();
        args.insert("a".into(), json!("two"));

        assert!(tool.call(args).is_err());
    }

    #[test]
    fn test_numeric_bounds() {
        let params = ToolParameters::new().with_parameter(
            "count",
            ParameterSpec::integer()
                .required()
                .with_minimum(1.0)
                .with_maximum(10.0),
        );
        let tool = Tool::new("bounded", params, |args| Ok(args["count"].clone()));

        let mut low = Map::new();
        low.insert("count".into(), json!(0));
        assert!(tool.call(low).is_err());

        let mut ok = Map::new();
        ok.insert("count".into(), json!(5));
        assert_eq!(tool.call(ok).unwrap(), json!(5));
    }

    #[test]
    fn test_enum_constraint() {
        let params = ToolParameters::new().with_parameter(
            "unit",
            ParameterSpec::string()
                .required()
                .with_allowed_values(vec![json!("celsius"), json!("fahrenheit")]),
        );
        let tool = Tool::new("weather", params, |args| Ok(args["unit"].clone()));

        let mut bad = Map::new();
        bad.insert("unit".into(), json!("kelvin"));
        assert!(tool.call(bad).is_err());
    }

    #[test]
    fn test_pattern_constraint() {
        let params = ToolParameters::new().with_parameter(
            "id",
            ParameterSpec::string().required().with_pattern("^[a-z-]+$"),
        );
        let tool = Tool::new("lookup", params, |args| Ok(args["id"].clone()));

        let mut bad = Map::new();
        bad.insert("id".into(), json!("ABC"));
        assert!(tool.call(bad).is_err());

        let mut ok = Map::new();
        ok.insert("id".into(), json!("my-id"));
        assert!(tool.call(ok).is_ok());
    }

    #[test]
    fn test_canonical_name_case_insensitive() {
        let params = ToolParameters::new()
            .with_parameter("query", ParameterSpec::string().required());
        assert_eq!(params.canonical_name("Query"), Some("query"));
        assert_eq!(params.canonical_name("QUERY"), Some("query"));
        assert_eq!(params.canonical_name("other"), None);
    }

    #[test]
    fn test_definition_schema_shape() {
        let tool = calculator().with_description("Add two numbers");
        let definition = tool.definition();

        assert_eq!(definition.name, "add");
        assert_eq!(definition.parameters["type"], json!("object"));
        assert_eq!(definition.parameters["required"], json!(["a"]));
        assert_eq!(
            definition.parameters["properties"]["a"]["type"],
            json!("number")
        );
    }
}
