//! Chat-completion client with retry, backoff and structured output.
//!
//! [`CompletionClient::generate`] validates its inputs, sends a single
//! `POST` to the configured chat-completion endpoint and interprets the
//! answer.
//!
//! # Retry Strategy
//!
//! - Invalid messages, schema or parameters → fail before any request
//! - HTTP 429 → retry, honouring `Retry-After` (seconds) when present
//! - HTTP 5xx or network error → retry
//! - Any other 4xx → fail immediately
//! - Backoff: `backoff_base_ms × 2^n` (1s, 2s, 4s with defaults)
//!
//! After `max_attempts` attempts a 429 streak becomes
//! [`GenerationError::RateLimited`] and anything else becomes
//! [`GenerationError::ServiceUnavailable`]. Neither carries the provider's
//! error text.
//!
//! # Structured Output
//!
//! When a [`ResponseFormat`] is given, the model content is unfenced and
//! parsed as JSON. Non-strict callers get the raw text back with
//! `structured = None` if parsing fails; strict callers get
//! [`GenerationError::ResponseFormat`] on parse failure or schema mismatch.

use std::time::Duration;

use anyhow::Result;
use reqwest::header::{HeaderValue, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CompletionConfig;
use crate::error::GenerationError;
use crate::models::{
    Completion, GenerateOptions, GenerationParameters, Message, ResponseFormat, Role, Usage,
};
use crate::parse::strip_code_fence;
use crate::schema::{validate_schema, validate_value};

#[derive(Clone)]
pub struct CompletionClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    config: CompletionConfig,
}

impl CompletionClient {
    /// Builds a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if no API key can be resolved or the HTTP client
    /// cannot be built.
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            config: config.clone(),
        })
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Runs one completion against `options.model` (or the configured
    /// default), retrying transient failures.
    pub async fn generate(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
        cancel: &CancellationToken,
    ) -> Result<Completion, GenerationError> {
        validate_messages(messages)?;
        if let Some(format) = &options.response_format {
            if !validate_schema(&format.schema) {
                return Err(GenerationError::InvalidInput(format!(
                    "response schema '{}' is malformed",
                    format.name
                )));
            }
        }
        if let Some(params) = &options.parameters {
            validate_parameters(params)?;
        }

        let model = options
            .model
            .as_deref()
            .unwrap_or(&self.config.default_model);
        let body = build_request(model, messages, options);

        let mut attempt = 0;
        loop {
            attempt += 1;

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                outcome = self.send_once(&body) => outcome?,
            };

            let (kind, retry_after, detail) = match outcome {
                Attempt::Done(response) => {
                    return finish(model, response, options.response_format.as_ref());
                }
                Attempt::Retry {
                    kind,
                    retry_after,
                    detail,
                } => (kind, retry_after, detail),
            };

            if attempt >= self.config.max_attempts {
                warn!(model, attempt, %detail, "completion attempts exhausted");
                return Err(match kind {
                    RetryKind::RateLimited => GenerationError::RateLimited { attempts: attempt },
                    RetryKind::Unavailable => {
                        GenerationError::ServiceUnavailable { attempts: attempt }
                    }
                });
            }

            let max_hint = Duration::from_secs(self.config.max_retry_after_secs);
            let delay = retry_after
                .map(|d| d.min(max_hint))
                .unwrap_or_else(|| self.config.backoff(attempt - 1));
            warn!(
                model,
                attempt,
                delay_ms = delay.as_millis() as u64,
                %detail,
                "completion attempt failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn send_once(
        &self,
        body: &ChatCompletionRequest<'_>,
    ) -> Result<Attempt, GenerationError> {
        let response = match self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Ok(Attempt::Retry {
                    kind: RetryKind::Unavailable,
                    retry_after: None,
                    detail: format!("network error: {}", e),
                });
            }
        };

        let status = response.status();
        if status.is_success() {
            let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
                GenerationError::ResponseFormat(format!("invalid completion response body: {}", e))
            })?;
            return Ok(Attempt::Done(parsed));
        }

        let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
        let body_text = response.text().await.unwrap_or_default();
        let message = provider_message(&body_text);

        if status.as_u16() == 429 {
            return Ok(Attempt::Retry {
                kind: RetryKind::RateLimited,
                retry_after,
                detail: format!("{}: {}", status, message),
            });
        }
        if status.is_server_error() {
            return Ok(Attempt::Retry {
                kind: RetryKind::Unavailable,
                retry_after: None,
                detail: format!("{}: {}", status, message),
            });
        }

        Err(GenerationError::from_status(status.as_u16(), message))
    }
}

enum RetryKind {
    RateLimited,
    Unavailable,
}

enum Attempt {
    Done(ChatCompletionResponse),
    Retry {
        kind: RetryKind,
        retry_after: Option<Duration>,
        detail: String,
    },
}

/// Rejects empty conversations and blank message content.
pub fn validate_messages(messages: &[Message]) -> Result<(), GenerationError> {
    if messages.is_empty() {
        return Err(GenerationError::InvalidInput(
            "messages must not be empty".to_string(),
        ));
    }
    for (i, message) in messages.iter().enumerate() {
        if message.content.trim().is_empty() {
            return Err(GenerationError::InvalidInput(format!(
                "message {} has empty content",
                i
            )));
        }
    }
    Ok(())
}

pub fn validate_parameters(params: &GenerationParameters) -> Result<(), GenerationError> {
    let out_of_range = |name: &str, value: String, range: &str| {
        GenerationError::InvalidInput(format!("{} must be in {}, got {}", name, range, value))
    };

    if !(0.0..=2.0).contains(&params.temperature) {
        return Err(out_of_range(
            "temperature",
            params.temperature.to_string(),
            "[0, 2]",
        ));
    }
    if !(1..=100_000).contains(&params.max_tokens) {
        return Err(out_of_range(
            "max_tokens",
            params.max_tokens.to_string(),
            "[1, 100000]",
        ));
    }
    if let Some(top_p) = params.top_p {
        if !(0.0..=1.0).contains(&top_p) {
            return Err(out_of_range("top_p", top_p.to_string(), "[0, 1]"));
        }
    }
    for (name, value) in [
        ("frequency_penalty", params.frequency_penalty),
        ("presence_penalty", params.presence_penalty),
    ] {
        if let Some(v) = value {
            if !(-2.0..=2.0).contains(&v) {
                return Err(out_of_range(name, v.to_string(), "[-2, 2]"));
            }
        }
    }
    Ok(())
}

fn finish(
    model: &str,
    response: ChatCompletionResponse,
    format: Option<&ResponseFormat>,
) -> Result<Completion, GenerationError> {
    let usage = response.usage;
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| {
            GenerationError::ResponseFormat("completion returned no content".to_string())
        })?;

    let structured = match format {
        Some(format) => structured_output(model, &content, format)?,
        None => None,
    };

    if let Some(usage) = &usage {
        debug!(model, total_tokens = usage.total_tokens, "completion succeeded");
    }

    Ok(Completion {
        model: model.to_string(),
        content,
        structured,
        usage,
    })
}

fn structured_output(
    model: &str,
    content: &str,
    format: &ResponseFormat,
) -> Result<Option<Value>, GenerationError> {
    match serde_json::from_str::<Value>(strip_code_fence(content)) {
        Ok(value) => {
            if format.strict {
                validate_value(&format.schema, &value).map_err(|e| {
                    GenerationError::ResponseFormat(format!(
                        "response does not match schema '{}': {}",
                        format.name, e
                    ))
                })?;
            }
            Ok(Some(value))
        }
        Err(e) if format.strict => Err(GenerationError::ResponseFormat(format!(
            "response is not valid JSON: {}",
            e
        ))),
        Err(e) => {
            warn!(model, error = %e, "structured output unparsable, returning raw text");
            Ok(None)
        }
    }
}

/// Parses a `Retry-After` header given in whole seconds. HTTP-date values
/// are ignored.
fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Pulls `error.message` out of an OpenAI-style error body, falling back to
/// the raw body.
fn provider_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|wrapper| wrapper.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn build_request<'a>(
    model: &'a str,
    messages: &'a [Message],
    options: &'a GenerateOptions,
) -> ChatCompletionRequest<'a> {
    let params = options.parameters.as_ref();
    ChatCompletionRequest {
        model,
        messages: messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.trim(),
            })
            .collect(),
        temperature: params.map(|p| p.temperature),
        max_tokens: params.map(|p| p.max_tokens),
        top_p: params.and_then(|p| p.top_p),
        frequency_penalty: params.and_then(|p| p.frequency_penalty),
        presence_penalty: params.and_then(|p| p.presence_penalty),
        response_format: options
            .response_format
            .as_ref()
            .map(|f| ResponseFormatBody {
                kind: "json_schema",
                json_schema: JsonSchemaBody {
                    name: &f.name,
                    strict: f.strict,
                    schema: &f.schema,
                },
            }),
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormatBody<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormatBody<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaBody<'a>,
}

#[derive(Serialize)]
struct JsonSchemaBody<'a> {
    name: &'a str,
    strict: bool,
    schema: &'a Value,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}
