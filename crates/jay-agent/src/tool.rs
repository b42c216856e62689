//! Tool trait, parameter schemas and results

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::arguments::render_literal;
use crate::error::ToolError;
use crate::protocol::RESULT_TAG;

/// Declared type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Int,
    Float,
    List,
    Bool,
}

impl ParamType {
    /// Short label used in tool signatures shown to the model
    pub fn label(&self) -> &'static str {
        match self {
            ParamType::String => "str",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::List => "list",
            ParamType::Bool => "bool",
        }
    }

    fn json_type(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Int => "integer",
            ParamType::Float => "number",
            ParamType::List => "array",
            ParamType::Bool => "boolean",
        }
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParamType,
    /// A parameter with a default is optional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Ordered parameter list; positional arguments bind in this order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema(pub Vec<ParameterSpec>);

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required parameter
    pub fn required(mut self, name: impl Into<String>, kind: ParamType) -> Self {
        self.0.push(ParameterSpec {
            name: name.into(),
            kind,
            default: None,
            description: String::new(),
        });
        self
    }

    /// Add an optional parameter with a default value
    pub fn optional(mut self, name: impl Into<String>, kind: ParamType, default: Value) -> Self {
        self.0.push(ParameterSpec {
            name: name.into(),
            kind,
            default: Some(default),
            description: String::new(),
        });
        self
    }

    /// Attach a description to the most recently added parameter
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        if let Some(last) = self.0.last_mut() {
            last.description = description.into();
        }
        self
    }

    pub fn params(&self) -> &[ParameterSpec] {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.0.iter().find(|p| p.name == name)
    }

    /// JSON Schema describing fully resolved arguments
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in &self.0 {
            let mut prop = json!({ "type": p.kind.json_type() });
            if !p.description.is_empty() {
                prop["description"] = Value::String(p.description.clone());
            }
            properties.insert(p.name.clone(), prop);
            required.push(Value::String(p.name.clone()));
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// `NAME (str), COUNT (int) = 3`
    pub fn signature(&self) -> String {
        self.0
            .iter()
            .map(|p| match &p.default {
                Some(d) => format!("{} ({}) = {}", p.name, p.kind.label(), render_literal(d)),
                None => format!("{} ({})", p.name, p.kind.label()),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Arguments after binding and coercion against a tool's schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedArguments(pub Map<String, Value>);

impl ResolvedArguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(Value::as_f64)
    }

    pub fn list(&self, name: &str) -> Option<&Vec<Value>> {
        self.0.get(name).and_then(Value::as_array)
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// A single dispatch: what the model wrote and what it resolved to.
/// Lives only for the turn that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub raw_arguments: String,
    pub resolved_arguments: ResolvedArguments,
}

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub succeeded: bool,
    /// Text folded back into the conversation
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            payload: payload.into(),
            error_detail: None,
        }
    }

    /// Create an error result
    pub fn error(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            succeeded: false,
            payload: detail.clone(),
            error_detail: Some(detail),
        }
    }

    /// The tagged form appended to the transcript
    pub fn render(&self) -> String {
        if self.succeeded {
            format!("{} {}", RESULT_TAG, self.payload)
        } else {
            let detail = self.error_detail.as_deref().unwrap_or(&self.payload);
            format!("{} ERROR returned: {}", RESULT_TAG, detail)
        }
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        ToolResult::error(err.to_string())
    }
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as the model writes it, including the leading `_`
    fn name(&self) -> &str;

    /// Tool description for the system prompt
    fn description(&self) -> &str;

    /// Declared parameters
    fn parameters(&self) -> ParameterSchema;

    /// Per-tool execution limit; the dispatcher's default applies otherwise
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute the tool. Failures are reported in the result, never raised.
    async fn execute(&self, arguments: ResolvedArguments, cancel: CancellationToken)
    -> ToolResult;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;
