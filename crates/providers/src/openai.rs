use async_trait::async_trait;
use homeagent_core::types::{ChatMessage, LLMResponse, ToolCallRequest};
use homeagent_core::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::client::{build_http_client, status_error, truncate_at_char_boundary};
use crate::shaping::{SamplingProfile, TokenLimitField};
use crate::Provider;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    sampling: SamplingProfile,
}

impl OpenAIProvider {
    pub fn new(
        api_key: &str,
        api_base: Option<&str>,
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self::new_with_client(api_key, api_base, model, max_tokens, temperature, None, Duration::from_secs(120))
    }

    pub fn new_with_client(
        api_key: &str,
        api_base: Option<&str>,
        model: &str,
        max_tokens: u32,
        temperature: f32,
        proxy: Option<&str>,
        timeout: Duration,
    ) -> Self {
        let resolved_base = api_base
            .unwrap_or(OPENAI_API_BASE)
            .trim_end_matches('/')
            .to_string();
        let client = build_http_client(proxy, &resolved_base, timeout);
        Self {
            client,
            api_key: api_key.to_string(),
            api_base: resolved_base,
            model: model.to_string(),
            max_tokens,
            temperature,
            sampling: SamplingProfile::for_model(model),
        }
    }

    fn build_request(&self, messages: &[ChatMessage], tools: &[Value]) -> ChatRequest {
        let (max_tokens, max_completion_tokens) = match self.sampling.token_field {
            TokenLimitField::MaxTokens => (Some(self.max_tokens), None),
            TokenLimitField::MaxCompletionTokens => (None, Some(self.max_tokens)),
        };
        ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            tool_choice: if tools.is_empty() { None } else { Some("auto".to_string()) },
            max_tokens,
            max_completion_tokens,
            temperature: self.sampling.temperature.then_some(self.temperature),
        }
    }

    async fn send_request(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        info!(
            url = %url,
            model = %self.model,
            tools_count = request.tools.len(),
            messages_count = request.messages.len(),
            "Calling LLM"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, body = %raw_body, "LLM API error");
            return Err(status_error("OpenAI", status, &raw_body));
        }

        let end = truncate_at_char_boundary(&raw_body, 500);
        debug!(body_len = raw_body.len(), preview = %&raw_body[..end], "LLM raw response");

        serde_json::from_str(&raw_body).map_err(|e| {
            Error::Provider(format!("Failed to parse response: {}. Body: {}", e, &raw_body[..end]))
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallRequest>>,
}

impl ChatResponse {
    fn into_llm_response(self) -> Result<LLMResponse> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("No choices in response".to_string()))?;

        let tool_calls = choice.message.tool_calls.unwrap_or_default();
        // Some compatible servers leave finish_reason out.
        let finish_reason = choice.finish_reason.unwrap_or_else(|| {
            if tool_calls.is_empty() { "stop" } else { "tool_calls" }.to_string()
        });

        Ok(LLMResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
            finish_reason,
            usage: self.usage.unwrap_or(Value::Null),
        })
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse> {
        let request = self.build_request(messages, tools);
        let response = self.send_request(&request).await?.into_llm_response()?;
        info!(
            content_len = response.content.as_ref().map(|c| c.len()).unwrap_or(0),
            tool_calls_count = response.tool_calls.len(),
            finish_reason = %response.finish_reason,
            "LLM response parsed"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tool_call_response() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "list_events", "arguments": "{\"day\":\"today\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10}
        }"#;
        let resp: ChatResponse = serde_json::from_str(raw).unwrap();
        let llm = resp.into_llm_response().unwrap();
        assert_eq!(llm.finish_reason, "tool_calls");
        assert_eq!(llm.tool_calls[0].name, "list_events");
        assert_eq!(llm.tool_calls[0].parse_arguments().unwrap()["day"], "today");
        assert!(llm.content.is_none());
    }

    #[test]
    fn test_no_choices_is_provider_error() {
        let resp: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(resp.into_llm_response(), Err(Error::Provider(_))));
    }

    #[test]
    fn test_missing_finish_reason_is_inferred() {
        let resp: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": "hi"}}]}"#).unwrap();
        assert_eq!(resp.into_llm_response().unwrap().finish_reason, "stop");
    }

    #[test]
    fn test_request_follows_sampling_profile() {
        let standard = OpenAIProvider::new("k", None, "gpt-4o-mini", 512, 0.2);
        let req = serde_json::to_value(standard.build_request(&[ChatMessage::user("hi")], &[])).unwrap();
        assert_eq!(req["max_tokens"], 512);
        assert!(req.get("max_completion_tokens").is_none());
        assert!(req.get("tools").is_none());
        assert!(req.get("tool_choice").is_none());

        let reasoning = OpenAIProvider::new("k", Some("https://x/v1/"), "o3-mini", 512, 0.2);
        assert_eq!(reasoning.api_base, "https://x/v1");
        let tools = vec![json!({"type": "function", "function": {"name": "t"}})];
        let req = serde_json::to_value(reasoning.build_request(&[ChatMessage::user("hi")], &tools)).unwrap();
        assert_eq!(req["max_completion_tokens"], 512);
        assert!(req.get("temperature").is_none());
        assert_eq!(req["tool_choice"], "auto");
    }
}
