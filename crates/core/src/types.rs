use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A tool call request that serializes to the OpenAI-compatible format:
/// `{id, type: "function", function: {name, arguments}}`
///
/// `arguments` is kept as the raw text the model produced. Parsing happens at
/// dispatch time so that malformed JSON can be reported back to the model
/// instead of silently becoming an empty object.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: &str, name: &str, arguments: Value) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    /// Parse the raw argument text into a JSON object.
    /// An empty string is treated as `{}`.
    pub fn parse_arguments(&self) -> Result<Map<String, Value>> {
        let raw = self.arguments.trim();
        if raw.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(Error::ToolArgument(format!(
                "arguments for '{}' must be a JSON object, got {}",
                self.name,
                json_type_name(&other)
            ))),
            Err(e) => Err(Error::ToolArgument(format!(
                "arguments for '{}' are not valid JSON: {}",
                self.name, e
            ))),
        }
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Serialize for ToolCallRequest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("type", "function")?;
        map.serialize_entry("function", &serde_json::json!({
            "name": self.name,
            "arguments": self.arguments,
        }))?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ToolCallRequest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let obj = value.as_object().ok_or_else(|| serde::de::Error::custom("expected object"))?;

        let id = obj.get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        // Nested {function: {name, arguments}} or flat {name, arguments}
        let source = obj.get("function").and_then(|v| v.as_object()).unwrap_or(obj);
        let name = source.get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let arguments = match source.get("arguments") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(v) => v.to_string(),
        };

        Ok(ToolCallRequest { id, name, arguments })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
}

impl FinishReason {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "stop" => Some(FinishReason::Stop),
            "tool_calls" => Some(FinishReason::ToolCalls),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    /// Raw finish reason as normalized by the driver. The gateway rejects
    /// anything other than `stop` / `tool_calls`.
    pub finish_reason: String,
    pub usage: Value,
}

impl LLMResponse {
    pub fn finish(&self) -> Option<FinishReason> {
        FinishReason::parse(&self.finish_reason)
    }
}

impl Default for LLMResponse {
    fn default() -> Self {
        Self {
            content: None,
            tool_calls: Vec::new(),
            finish_reason: String::new(),
            usage: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// `None` for an assistant turn that only carries tool calls.
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn with_role(role: Role, content: Option<&str>) -> Self {
        Self {
            role,
            content: content.map(str::to_string),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: &str) -> Self {
        Self::with_role(Role::System, Some(content))
    }

    pub fn user(content: &str) -> Self {
        Self::with_role(Role::User, Some(content))
    }

    pub fn assistant(content: &str) -> Self {
        Self::with_role(Role::Assistant, Some(content))
    }

    pub fn assistant_tool_calls(content: Option<&str>, calls: Vec<ToolCallRequest>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content.filter(|c| !c.is_empty()));
        msg.tool_calls = Some(calls);
        msg
    }

    pub fn tool_result(tool_call_id: &str, name: &str, content: &str) -> Self {
        let mut msg = Self::with_role(Role::Tool, Some(content));
        msg.tool_call_id = Some(tool_call_id.to_string());
        msg.name = Some(name.to_string());
        msg
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_serializes_openai_shape() {
        let call = ToolCallRequest::new("call_1", "list_events", serde_json::json!({"day": "today"}));
        let v = serde_json::to_value(&call).unwrap();
        assert_eq!(v["type"], "function");
        assert_eq!(v["function"]["name"], "list_events");
        assert_eq!(v["function"]["arguments"], r#"{"day":"today"}"#);
    }

    #[test]
    fn test_tool_call_deserializes_object_arguments() {
        let call: ToolCallRequest = serde_json::from_value(serde_json::json!({
            "id": "a",
            "name": "x",
            "arguments": {"k": 1}
        }))
        .unwrap();
        assert_eq!(call.parse_arguments().unwrap()["k"], 1);
    }

    #[test]
    fn test_parse_arguments_rejects_garbage() {
        let call = ToolCallRequest { id: "1".into(), name: "t".into(), arguments: "{not json".into() };
        assert!(matches!(call.parse_arguments(), Err(Error::ToolArgument(_))));

        let call = ToolCallRequest { id: "1".into(), name: "t".into(), arguments: "[1,2]".into() };
        let err = call.parse_arguments().unwrap_err().to_string();
        assert!(err.contains("array"));
    }

    #[test]
    fn test_empty_arguments_are_empty_object() {
        let call = ToolCallRequest { id: "1".into(), name: "reset".into(), arguments: "  ".into() };
        assert!(call.parse_arguments().unwrap().is_empty());
    }

    #[test]
    fn test_assistant_tool_call_message_has_null_content() {
        let msg = ChatMessage::assistant_tool_calls(Some(""), vec![]);
        let v = serde_json::to_value(&msg).unwrap();
        assert!(v["content"].is_null());
        assert_eq!(v["role"], "assistant");
    }

    #[test]
    fn test_finish_reason_parse() {
        assert_eq!(FinishReason::parse("stop"), Some(FinishReason::Stop));
        assert_eq!(FinishReason::parse("length"), None);
    }
}
