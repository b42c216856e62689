//! Tool registry: lookup, alias rewriting and argument resolution.
//!
//! The registry is populated once at startup and then shared read-only
//! (behind an `Arc`) by every session.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::arguments::{Arguments, parse_arguments, render_literal};
use crate::error::ToolError;
use crate::parser::{ParseOutcome, RawCall, parse};
use crate::protocol::{INVOCATION_MARKER, TERMINATOR};
use crate::tool::{BoxedTool, ParamType, ParameterSchema, ResolvedArguments, ToolInvocation};

/// How an alias rewrites a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasKind {
    /// Only the tool name changes
    Rename,
    /// All argument values are folded into one string argument, behind a
    /// fixed prefix: `_get_weather("Perth")` becomes
    /// `_search_the_internet("weather Perth")`
    FoldIntoQuery { prefix: String },
    /// A keyword argument is renamed on calls to `from`
    RenameKeyword { from: String, to: String },
}

/// A rewrite for a tool name the model commonly gets wrong
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRule {
    pub from: String,
    pub to: String,
    pub kind: AliasKind,
}

impl AliasRule {
    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: AliasKind::Rename,
        }
    }

    pub fn fold_into_query(
        from: impl Into<String>,
        to: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: AliasKind::FoldIntoQuery {
                prefix: prefix.into(),
            },
        }
    }

    pub fn rename_keyword(
        tool: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        let tool = tool.into();
        Self {
            from: tool.clone(),
            to: tool,
            kind: AliasKind::RenameKeyword {
                from: from.into(),
                to: to.into(),
            },
        }
    }

    /// Apply the rule, returning the rewritten call if it matched
    fn apply(&self, call: &RawCall) -> Option<RawCall> {
        if call.name != self.from {
            return None;
        }
        match &self.kind {
            AliasKind::Rename => Some(RawCall {
                name: self.to.clone(),
                raw_arguments: call.raw_arguments.clone(),
            }),
            AliasKind::FoldIntoQuery { prefix } => {
                let words = match parse_arguments(&call.raw_arguments) {
                    Ok(args) => args
                        .positional
                        .iter()
                        .chain(args.keyword.iter().map(|(_, v)| v))
                        .map(plain_text)
                        .collect::<Vec<_>>()
                        .join(" "),
                    Err(_) => call
                        .raw_arguments
                        .replace(['"', '\''], "")
                        .trim()
                        .to_string(),
                };
                let query = format!("{}{}", prefix, words).trim().to_string();
                Some(RawCall {
                    name: self.to.clone(),
                    raw_arguments: render_literal(&Value::String(query)),
                })
            }
            AliasKind::RenameKeyword { from, to } => {
                let mut args = parse_arguments(&call.raw_arguments).ok()?;
                let slot = args.keyword.iter_mut().find(|(k, _)| k == from)?;
                slot.0 = to.clone();
                Some(RawCall {
                    name: self.to.clone(),
                    raw_arguments: render_arguments(&args),
                })
            }
        }
    }
}

/// Weather lookups go through web search; `QUERY` is a common misspelling
/// of the search tool's `QUESTION` parameter.
pub fn default_aliases() -> Vec<AliasRule> {
    let mut rules: Vec<AliasRule> = [
        "_get_weather",
        "_get_weather_forecast",
        "_get_the_weather_forecast",
    ]
    .into_iter()
    .map(|name| AliasRule::fold_into_query(name, "_search_the_internet", "weather "))
    .collect();
    rules.push(AliasRule::rename_keyword(
        "_search_the_internet",
        "QUERY",
        "QUESTION",
    ));
    rules
}

fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => render_literal(other),
    }
}

fn render_arguments(args: &Arguments) -> String {
    args.positional
        .iter()
        .map(render_literal)
        .chain(
            args.keyword
                .iter()
                .map(|(k, v)| format!("{} = {}", k, render_literal(v))),
        )
        .collect::<Vec<_>>()
        .join(", ")
}

struct Entry {
    tool: BoxedTool,
    schema: ParameterSchema,
    validator: Option<Arc<jsonschema::Validator>>,
}

/// Process-wide tool table
#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
    aliases: Vec<AliasRule>,
}

impl ToolRegistry {
    /// An empty registry without alias rules
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty registry with [`default_aliases`]
    pub fn with_default_aliases() -> Self {
        Self {
            aliases: default_aliases(),
            ..Self::default()
        }
    }

    /// Register a tool, replacing any earlier tool with the same name
    pub fn register(&mut self, tool: BoxedTool) {
        let name = tool.name().to_string();
        let schema = tool.parameters();
        let validator = compile_validator(&name, &schema);

        if self.entries.contains_key(&name) {
            warn!("Tool '{}' registered twice, replacing the earlier one", name);
        } else {
            self.order.push(name.clone());
        }
        self.entries.insert(
            name,
            Entry {
                tool,
                schema,
                validator,
            },
        );
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_tool(mut self, tool: BoxedTool) -> Self {
        self.register(tool);
        self
    }

    pub fn add_alias(&mut self, rule: AliasRule) {
        self.aliases.push(rule);
    }

    pub fn aliases(&self) -> &[AliasRule] {
        &self.aliases
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Result<BoxedTool, ToolError> {
        self.entries
            .get(name)
            .map(|e| e.tool.clone())
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    pub fn schema(&self, name: &str) -> Option<&ParameterSchema> {
        self.entries.get(name).map(|e| &e.schema)
    }

    /// Apply alias rules to a parsed call. Runs before lookup.
    pub fn rewrite_call(&self, call: &RawCall) -> RawCall {
        let mut current = call.clone();
        for rule in &self.aliases {
            if let Some(rewritten) = rule.apply(&current) {
                debug!(from = %current.name, to = %rewritten.name, "alias applied");
                current = rewritten;
            }
        }
        current
    }

    /// Text form of [`rewrite_call`](Self::rewrite_call): rewrites the first
    /// call in `text`, leaving text without a call unchanged.
    pub fn rewrite_aliases(&self, text: &str) -> String {
        match parse(text) {
            ParseOutcome::Call { preamble, call, .. } => {
                let call = self.rewrite_call(&call);
                format!(
                    "{}{} {}({}) {}",
                    preamble, INVOCATION_MARKER, call.name, call.raw_arguments, TERMINATOR
                )
            }
            ParseOutcome::NoCall { text } => text,
        }
    }

    /// Bind and coerce raw argument text against a tool's schema
    pub fn resolve(&self, name: &str, raw_arguments: &str) -> Result<ResolvedArguments, ToolError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let args = parse_arguments(raw_arguments)
            .map_err(|e| ToolError::coercion(name, e.to_string()))?;
        let resolved = bind(&entry.schema, args).map_err(|m| ToolError::coercion(name, m))?;

        if let Some(ref validator) = entry.validator {
            if let Some(err) = validate_with_validator(&resolved.as_value(), validator) {
                return Err(ToolError::coercion(name, err));
            }
        }
        Ok(resolved)
    }

    /// Alias rewrite, lookup and argument resolution for one call
    pub fn prepare(&self, call: &RawCall) -> Result<(BoxedTool, ToolInvocation), ToolError> {
        let call = self.rewrite_call(call);
        let tool = self.lookup(&call.name)?;
        let resolved_arguments = self.resolve(&call.name, &call.raw_arguments)?;
        Ok((
            tool,
            ToolInvocation {
                name: call.name,
                raw_arguments: call.raw_arguments,
                resolved_arguments,
            },
        ))
    }

    /// One line per tool for the system prompt, in registration order:
    /// `'to-system: _name(ARG (str)) END_FUNC' - description`
    pub fn describe(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|e| {
                format!(
                    "'{} {}({}) {}' - {}",
                    INVOCATION_MARKER,
                    e.tool.name(),
                    e.schema.signature(),
                    TERMINATOR,
                    e.tool.description()
                )
            })
            .collect()
    }
}

fn compile_validator(name: &str, schema: &ParameterSchema) -> Option<Arc<jsonschema::Validator>> {
    match jsonschema::validator_for(&schema.to_json_schema()) {
        Ok(v) => Some(Arc::new(v)),
        Err(e) => {
            warn!(
                "Invalid parameter schema for '{}', skipping validation: {}",
                name, e
            );
            None
        }
    }
}

fn bind(schema: &ParameterSchema, args: Arguments) -> Result<ResolvedArguments, String> {
    let params = schema.params();
    if args.positional.len() > params.len() {
        return Err(format!(
            "takes {} argument{} but {} were given",
            params.len(),
            if params.len() == 1 { "" } else { "s" },
            args.positional.len()
        ));
    }

    let mut bound: Vec<Option<Value>> = vec![None; params.len()];
    for (slot, value) in bound.iter_mut().zip(args.positional) {
        *slot = Some(value);
    }
    for (key, value) in args.keyword {
        let idx = params
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(&key))
            .ok_or_else(|| format!("unexpected argument '{}'", key))?;
        if bound[idx].is_some() {
            return Err(format!(
                "got multiple values for argument '{}'",
                params[idx].name
            ));
        }
        bound[idx] = Some(value);
    }

    let mut map = Map::new();
    for (param, value) in params.iter().zip(bound) {
        let value = match (value, &param.default) {
            (Some(v), _) => coerce(v, param.kind)
                .map_err(|m| format!("argument '{}' {}", param.name, m))?,
            (None, Some(default)) => default.clone(),
            (None, None) => return Err(format!("missing required argument '{}'", param.name)),
        };
        map.insert(param.name.clone(), value);
    }
    Ok(ResolvedArguments(map))
}

/// Lenient conversion of a literal into the declared type
fn coerce(value: Value, kind: ParamType) -> Result<Value, String> {
    let mismatch = |v: &Value| format!("expected {} but got {}", kind.label(), render_literal(v));

    match kind {
        ParamType::String => match value {
            Value::String(_) => Ok(value),
            Value::Number(ref n) => Ok(Value::String(n.to_string())),
            Value::Bool(_) => Ok(Value::String(render_literal(&value))),
            ref other => Err(mismatch(other)),
        },
        ParamType::Int => match value {
            Value::Number(ref n) if n.is_i64() || n.is_u64() => Ok(value),
            Value::Number(ref n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::from(f as i64))
                }
                _ => Err(mismatch(&value)),
            },
            Value::String(ref s) => {
                let t = s.trim();
                t.parse::<i64>()
                    .ok()
                    .or_else(|| {
                        t.parse::<f64>()
                            .ok()
                            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                            .map(|f| f as i64)
                    })
                    .map(Value::from)
                    .ok_or_else(|| mismatch(&value))
            }
            ref other => Err(mismatch(other)),
        },
        ParamType::Float => match value {
            Value::Number(ref n) => n
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| mismatch(&value)),
            Value::String(ref s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| mismatch(&value)),
            ref other => Err(mismatch(other)),
        },
        ParamType::List => match value {
            Value::Array(_) => Ok(value),
            Value::Null => Ok(Value::Array(vec![])),
            other => Ok(Value::Array(vec![other])),
        },
        ParamType::Bool => match value {
            Value::Bool(_) => Ok(value),
            Value::Number(ref n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
            Value::Number(ref n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
            Value::String(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Ok(Value::Bool(true)),
                "false" | "no" => Ok(Value::Bool(false)),
                _ => Err(mismatch(&value)),
            },
            ref other => Err(mismatch(other)),
        },
    }
}

/// Validate resolved arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(args: &Value, validator: &jsonschema::Validator) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!("validation failed: {}", errors.join("; ")))
    }
}
