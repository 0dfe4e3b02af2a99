//! Model transport: the [`ChatModel`] seam and an OpenAI-compatible client.
//!
//! The loops only see [`ChatModel`]. Tests use scripted models that return
//! predetermined replies without touching the network.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::core::types::{Message, ModelReply, Role, ToolCall, ToolDefinition};
use crate::io::cancel::CancelToken;
use crate::io::config::ModelConfig;
use crate::io::retry::{AttemptError, RetryPolicy, retry_with_backoff};

/// One model invocation: the full conversation plus the advertised tools.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolDefinition],
}

/// Abstraction over chat-completion backends.
pub trait ChatModel {
    /// Send `request` and return the reply. Transient failures are retried by
    /// the implementation; an `Err` is terminal for the request.
    fn complete(&self, request: &ChatRequest<'_>, cancel: &CancelToken) -> Result<ModelReply>;
}

/// Client for `POST {base_url}/chat/completions`.
pub struct OpenAiChatModel {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f64>,
    retry: RetryPolicy,
}

impl OpenAiChatModel {
    /// Build a client from config. The API key is read from the environment
    /// variable named by `api_key_env`; a missing key is allowed for local
    /// servers that do not authenticate.
    pub fn from_config(config: &ModelConfig, retry: &RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("build http client")?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() {
            debug!(env = %config.api_key_env, "no api key set");
        }
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            retry: retry.clone(),
        })
    }

    fn request_body(&self, request: &ChatRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": encode_messages(request.messages),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(tool_advertisement(request.tools));
        }
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    fn send_once(&self, body: &Value) -> std::result::Result<ModelReply, AttemptError> {
        let mut builder = self.http.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().map_err(classify_transport_error)?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let text = response.text().map_err(classify_transport_error)?;
        if !status.is_success() {
            return Err(classify_status(status, &text, retry_after));
        }
        let parsed: Value = serde_json::from_str(&text)
            .map_err(|err| AttemptError::Fatal(format!("parse chat response: {err}")))?;
        parse_chat_response(&parsed).map_err(|err| AttemptError::Fatal(format!("{err:#}")))
    }
}

impl ChatModel for OpenAiChatModel {
    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len(), tools = request.tools.len()))]
    fn complete(&self, request: &ChatRequest<'_>, cancel: &CancelToken) -> Result<ModelReply> {
        let body = self.request_body(request);
        let reply = retry_with_backoff(&self.retry, cancel, |attempt| {
            debug!(attempt, "sending chat request");
            self.send_once(&body)
        })?;
        debug!(
            tool_calls = reply.tool_calls.len(),
            has_content = reply.content.is_some(),
            "chat reply received"
        );
        Ok(reply)
    }
}

/// Advertise tools in OpenAI function format, one entry per declaration, in order.
pub fn tool_advertisement(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect()
}

/// Encode the conversation in chat-completions wire format.
pub fn encode_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let mut encoded = json!({
                "role": message.role.as_str(),
                "content": message.content,
            });
            if message.role == Role::Assistant && !message.tool_calls.is_empty() {
                if message.content.is_empty() {
                    encoded["content"] = Value::Null;
                }
                encoded["tool_calls"] = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
            }
            if let Some(id) = &message.tool_call_id {
                encoded["tool_call_id"] = json!(id);
            }
            encoded
        })
        .collect()
}

/// Parse the first choice of a chat-completions response body.
///
/// Tool-call arguments that are not valid JSON are kept as a JSON string, so
/// the tool host can report them back to the model instead of dropping the call.
pub fn parse_chat_response(body: &Value) -> Result<ModelReply> {
    let message = body
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| anyhow!("chat response has no choices[0].message"))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for (idx, call) in calls.iter().enumerate() {
            let name = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("tool call {idx} has no function name"))?;
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map_or_else(|| format!("call_{idx}"), str::to_string);
            let arguments = match call.pointer("/function/arguments") {
                Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
                Some(Value::String(raw)) => {
                    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                }
                Some(other) => other.clone(),
                None => json!({}),
            };
            tool_calls.push(ToolCall {
                id,
                name: name.to_string(),
                arguments,
            });
        }
    }

    Ok(ModelReply {
        content,
        tool_calls,
    })
}

/// 429 and 5xx are retryable; other statuses are fatal.
pub fn classify_status(status: StatusCode, body: &str, retry_after: Option<Duration>) -> AttemptError {
    let message = format!("http {}: {}", status.as_u16(), truncate(body, 500));
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AttemptError::Retryable {
            message,
            retry_after,
        }
    } else {
        AttemptError::Fatal(message)
    }
}

fn classify_transport_error(err: reqwest::Error) -> AttemptError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        AttemptError::retryable(err.to_string())
    } else {
        AttemptError::Fatal(err.to_string())
    }
}

/// `Retry-After` in delta-seconds form. HTTP dates are ignored.
fn parse_retry_after(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}
