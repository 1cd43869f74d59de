use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::retry::{
    is_retryable_http_error, new_request_id, parse_retry_after_ms, provider_retry_delay_ms,
    retry_budget_allows_delay, should_retry_status,
};
use crate::types::{
    ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, Message, MessageRole,
    OdysseyAiError, StreamDeltaHandler,
};
use async_trait::async_trait;

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
/// Connection settings for the OpenAI-compatible chat completions endpoint.
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_budget_ms: u64,
    pub retry_jitter: bool,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            api_key: String::new(),
            request_timeout_ms: 120_000,
            max_retries: 2,
            retry_budget_ms: 60_000,
            retry_jitter: true,
        }
    }
}

#[derive(Debug, Clone)]
/// Chat completions client with streaming and bounded retry.
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, OdysseyAiError> {
        if config.api_key.trim().is_empty() {
            return Err(OdysseyAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| {
                OdysseyAiError::InvalidResponse(format!("invalid API key header: {e}"))
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }

        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, OdysseyAiError> {
        self.complete_via_chat(&request, None).await
    }

    async fn complete_with_stream(
        &self,
        request: ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ChatResponse, OdysseyAiError> {
        self.complete_via_chat(&request, on_delta).await
    }
}

impl OpenAiClient {
    async fn complete_via_chat(
        &self,
        request: &ChatRequest,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<ChatResponse, OdysseyAiError> {
        let mut body = build_chat_request_body(request)?;
        if on_delta.is_some() {
            body["stream"] = json!(true);
        }
        let url = self.chat_completions_url();
        let started = std::time::Instant::now();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            let request_id = new_request_id();
            let response = self
                .client
                .post(&url)
                .header("x-odyssey-request-id", request_id)
                .header("x-odyssey-retry-attempt", attempt.to_string())
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        if let Some(delta_handler) = on_delta.clone() {
                            let is_event_stream = response
                                .headers()
                                .get(CONTENT_TYPE)
                                .and_then(|value| value.to_str().ok())
                                .map(|value| {
                                    value.to_ascii_lowercase().contains("text/event-stream")
                                })
                                .unwrap_or(false);
                            if is_event_stream {
                                return parse_chat_stream_response(response, delta_handler).await;
                            }

                            let raw = response.text().await?;
                            let parsed = parse_chat_response(&raw)?;
                            let text = parsed.message.text_content();
                            if !text.is_empty() {
                                delta_handler(text);
                            }
                            return Ok(parsed);
                        }
                        let raw = response.text().await?;
                        return parse_chat_response(&raw);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    if attempt < max_retries && should_retry_status(status.as_u16()) {
                        let backoff_ms = provider_retry_delay_ms(
                            attempt,
                            self.config.retry_jitter,
                            retry_after_ms,
                        );
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        if retry_budget_allows_delay(
                            elapsed_ms,
                            backoff_ms,
                            self.config.retry_budget_ms,
                        ) {
                            sleep(std::time::Duration::from_millis(backoff_ms)).await;
                            continue;
                        }
                    }

                    return Err(OdysseyAiError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_http_error(&error) {
                        let backoff_ms =
                            provider_retry_delay_ms(attempt, self.config.retry_jitter, None);
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        if retry_budget_allows_delay(
                            elapsed_ms,
                            backoff_ms,
                            self.config.retry_budget_ms,
                        ) {
                            sleep(std::time::Duration::from_millis(backoff_ms)).await;
                            continue;
                        }
                    }
                    return Err(OdysseyAiError::Http(error));
                }
            }
        }

        Err(OdysseyAiError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Result<Value, OdysseyAiError> {
    let messages = to_openai_messages(&request.messages)?;
    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });

    if !request.tools.is_empty() {
        body["tools"] = to_openai_tools(&request.tools);
        body["tool_choice"] = json!("auto");
    }

    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }

    Ok(body)
}

fn to_openai_tools(tools: &[crate::types::ToolDefinition]) -> Value {
    Value::Array(
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
            .collect(),
    )
}

fn to_openai_messages(messages: &[Message]) -> Result<Vec<Value>, OdysseyAiError> {
    let mut serialized = Vec::new();

    for message in messages {
        match message.role {
            MessageRole::System => serialized.push(json!({
                "role": "system",
                "content": message.text_content(),
            })),
            MessageRole::User => serialized.push(json!({
                "role": "user",
                "content": message.text_content(),
            })),
            MessageRole::Assistant => {
                let tool_calls: Vec<Value> = message
                    .tool_calls()
                    .into_iter()
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

                let text = message.text_content();
                let content = if text.trim().is_empty() && !tool_calls.is_empty() {
                    Value::Null
                } else {
                    Value::String(text)
                };

                if tool_calls.is_empty() {
                    serialized.push(json!({
                        "role": "assistant",
                        "content": content,
                    }));
                } else {
                    serialized.push(json!({
                        "role": "assistant",
                        "content": content,
                        "tool_calls": tool_calls,
                    }));
                }
            }
            MessageRole::Tool => {
                let Some(tool_call_id) = message.tool_call_id.as_deref() else {
                    return Err(OdysseyAiError::InvalidResponse(
                        "tool message is missing tool_call_id".to_string(),
                    ));
                };

                let mut tool_message = json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": message.text_content(),
                });

                if let Some(name) = &message.tool_name {
                    tool_message["name"] = Value::String(name.clone());
                }

                serialized.push(tool_message);
            }
        }
    }

    Ok(serialized)
}

fn parse_chat_response(raw: &str) -> Result<ChatResponse, OdysseyAiError> {
    let parsed: OpenAiChatResponse = serde_json::from_str(raw)?;
    let choice = parsed.choices.into_iter().next().ok_or_else(|| {
        OdysseyAiError::InvalidResponse("response contained no choices".to_string())
    })?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content {
        if !text.trim().is_empty() {
            content.push(ContentBlock::Text { text });
        }
    }

    if let Some(tool_calls) = choice.message.tool_calls {
        for tool_call in tool_calls {
            if tool_call.call_type != "function" {
                continue;
            }

            let arguments = match serde_json::from_str::<Value>(&tool_call.function.arguments) {
                Ok(value) => value,
                Err(_) => Value::String(tool_call.function.arguments),
            };

            content.push(ContentBlock::ToolCall {
                id: tool_call.id,
                name: tool_call.function.name,
                arguments,
            });
        }
    }

    let message = Message {
        role: MessageRole::Assistant,
        content,
        tool_call_id: None,
        tool_name: None,
        is_error: false,
    };

    let usage = parsed
        .usage
        .map(|usage| ChatUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        message,
        finish_reason: choice.finish_reason,
        usage,
    })
}

async fn parse_chat_stream_response(
    response: reqwest::Response,
    on_delta: StreamDeltaHandler,
) -> Result<ChatResponse, OdysseyAiError> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut finish_reason = None;
    let mut text = String::new();
    let mut tool_calls: Vec<OpenAiToolCallAccumulator> = Vec::new();
    let mut usage = ChatUsage::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let fragment = std::str::from_utf8(chunk.as_ref()).map_err(|error| {
            OdysseyAiError::InvalidResponse(format!("invalid UTF-8 in streaming response: {error}"))
        })?;
        buffer.push_str(fragment);

        while let Some(pos) = buffer.find('\n') {
            let line = buffer[..pos].trim().to_string();
            buffer.drain(..=pos);
            if line.is_empty() {
                continue;
            }

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if data == "[DONE]" {
                    return Ok(finalize_stream_response(
                        text,
                        tool_calls,
                        finish_reason,
                        usage,
                    ));
                }

                apply_stream_data(
                    data,
                    &on_delta,
                    &mut text,
                    &mut tool_calls,
                    &mut finish_reason,
                    &mut usage,
                )?;
            }
        }
    }

    let trailing = buffer.trim();
    if !trailing.is_empty() {
        if let Some(data) = trailing.strip_prefix("data:") {
            let data = data.trim();
            if data != "[DONE]" {
                apply_stream_data(
                    data,
                    &on_delta,
                    &mut text,
                    &mut tool_calls,
                    &mut finish_reason,
                    &mut usage,
                )?;
            }
        }
    }

    Ok(finalize_stream_response(
        text,
        tool_calls,
        finish_reason,
        usage,
    ))
}

fn apply_stream_data(
    data: &str,
    on_delta: &StreamDeltaHandler,
    text: &mut String,
    tool_calls: &mut Vec<OpenAiToolCallAccumulator>,
    finish_reason: &mut Option<String>,
    usage: &mut ChatUsage,
) -> Result<(), OdysseyAiError> {
    let chunk: OpenAiStreamChunk = serde_json::from_str(data).map_err(|error| {
        OdysseyAiError::InvalidResponse(format!("failed to parse OpenAI stream chunk: {error}"))
    })?;

    if let Some(chunk_usage) = chunk.usage {
        usage.input_tokens = chunk_usage.prompt_tokens;
        usage.output_tokens = chunk_usage.completion_tokens;
        usage.total_tokens = chunk_usage.total_tokens;
    }

    for choice in chunk.choices {
        if let Some(reason) = choice.finish_reason {
            *finish_reason = Some(reason);
        }

        let Some(delta) = choice.delta else {
            continue;
        };

        if let Some(delta_text) = delta.content {
            if !delta_text.is_empty() {
                text.push_str(&delta_text);
                on_delta(delta_text);
            }
        }

        if let Some(delta_tool_calls) = delta.tool_calls {
            for delta_call in delta_tool_calls {
                let index = delta_call.index;
                if tool_calls.len() <= index {
                    tool_calls.resize_with(index + 1, OpenAiToolCallAccumulator::default);
                }

                let current = &mut tool_calls[index];
                if let Some(id) = delta_call.id {
                    if !id.is_empty() {
                        current.id = id;
                    }
                }
                if let Some(function) = delta_call.function {
                    if let Some(name) = function.name {
                        if !name.is_empty() {
                            current.name = name;
                        }
                    }
                    if let Some(arguments) = function.arguments {
                        current.arguments.push_str(&arguments);
                    }
                }
            }
        }
    }

    Ok(())
}

fn finalize_stream_response(
    text: String,
    tool_calls: Vec<OpenAiToolCallAccumulator>,
    finish_reason: Option<String>,
    usage: ChatUsage,
) -> ChatResponse {
    let mut content = Vec::new();
    if !text.trim().is_empty() {
        content.push(ContentBlock::Text { text });
    }

    for (index, tool_call) in tool_calls.into_iter().enumerate() {
        if tool_call.name.trim().is_empty() {
            continue;
        }

        let id = if tool_call.id.trim().is_empty() {
            format!("stream_tool_call_{}", index + 1)
        } else {
            tool_call.id
        };
        let arguments = match serde_json::from_str::<Value>(&tool_call.arguments) {
            Ok(value) => value,
            Err(_) => Value::String(tool_call.arguments),
        };
        content.push(ContentBlock::ToolCall {
            id,
            name: tool_call.name,
            arguments,
        });
    }

    ChatResponse {
        message: Message {
            role: MessageRole::Assistant,
            content,
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        },
        finish_reason,
        usage,
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: Option<OpenAiStreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<OpenAiStreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct OpenAiToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}
