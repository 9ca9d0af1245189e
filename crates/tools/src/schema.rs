use homeagent_core::{DeclaredTool, Error, Result, ToolDefinition};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static TOOL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid tool-name regex"));

/// Check a declared tool and turn it into a catalog entry owned by `module`.
/// The strict variant of the parameter schema is computed here, once.
pub fn prepare(module: &str, tool: &DeclaredTool) -> Result<ToolDefinition> {
    validate(module, tool)?;
    let mut def = ToolDefinition::new(module, &tool.name, &tool.description, tool.parameters.clone());
    def.strict_parameters = strict(&tool.parameters);
    Ok(def)
}

pub fn validate(module: &str, tool: &DeclaredTool) -> Result<()> {
    if !TOOL_NAME.is_match(&tool.name) {
        return Err(Error::Load(format!(
            "module '{}' declares invalid tool name '{}'",
            module, tool.name
        )));
    }
    let params = tool.parameters.as_object().ok_or_else(|| {
        Error::Load(format!(
            "module '{}': parameters of '{}' must be a JSON object",
            module, tool.name
        ))
    })?;
    match params.get("type") {
        None => {}
        Some(Value::String(t)) if t == "object" => {}
        Some(other) => {
            return Err(Error::Load(format!(
                "module '{}': parameters of '{}' must have type \"object\", got {}",
                module, tool.name, other
            )))
        }
    }
    if let Some(props) = params.get("properties") {
        if !props.is_object() {
            return Err(Error::Load(format!(
                "module '{}': properties of '{}' must be an object",
                module, tool.name
            )));
        }
    }
    if let Some(required) = params.get("required") {
        let names = required.as_array().filter(|a| a.iter().all(Value::is_string));
        if names.is_none() {
            return Err(Error::Load(format!(
                "module '{}': required of '{}' must be an array of strings",
                module, tool.name
            )));
        }
    }
    Ok(())
}

/// Force `additionalProperties: false` on every object schema: nested
/// properties, array items and each `anyOf`/`oneOf`/`allOf` branch.
pub fn strict(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(strict_object(map)),
        other => other.clone(),
    }
}

fn strict_object(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::with_capacity(map.len() + 1);
    for (key, value) in map {
        let next = match key.as_str() {
            "properties" | "$defs" | "definitions" => match value {
                Value::Object(props) => Value::Object(
                    props.iter().map(|(k, v)| (k.clone(), strict(v))).collect(),
                ),
                other => other.clone(),
            },
            "items" => match value {
                Value::Array(items) => Value::Array(items.iter().map(strict).collect()),
                other => strict(other),
            },
            "anyOf" | "oneOf" | "allOf" => match value {
                Value::Array(branches) => Value::Array(branches.iter().map(strict).collect()),
                other => other.clone(),
            },
            _ => value.clone(),
        };
        out.insert(key.clone(), next);
    }
    if is_object_schema(map) {
        out.insert("additionalProperties".to_string(), Value::Bool(false));
    }
    out
}

fn is_object_schema(map: &Map<String, Value>) -> bool {
    match map.get("type") {
        Some(Value::String(t)) => t == "object",
        Some(Value::Array(types)) => types.iter().any(|t| t == "object"),
        _ => map.contains_key("properties"),
    }
}
