//! Chat orchestration loop: conversation history, turn execution, tool dispatch.
//!
//! The [`Agent`] owns the ordered message history for one conversation. Each
//! prompt appends a user message and advances turns until the model stops
//! requesting tools. Tool handlers never see the conversation; the loop
//! records the tool-call and tool-result entries itself.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use odyssey_ai::{
    ChatRequest, ChatResponse, LlmClient, Message, OdysseyAiError, StreamDeltaHandler, ToolCall,
    ToolDefinition,
};

/// Outcome of one tool execution, folded into the conversation as a tool message.
#[derive(Debug, Clone)]
pub struct ToolExecutionResult {
    pub content: Value,
    pub is_error: bool,
}

impl ToolExecutionResult {
    /// Creates a successful tool result.
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Creates a failed tool result.
    pub fn error(content: Value) -> Self {
        Self {
            content,
            is_error: true,
        }
    }

    /// Converts the payload to text for insertion into a tool message.
    pub fn as_text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

/// Trait contract for `AgentTool` behavior.
#[async_trait]
pub trait AgentTool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, arguments: Value) -> ToolExecutionResult;
}

/// Enumerates supported `AgentEvent` values.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    AgentStart,
    AgentEnd {
        new_messages: usize,
    },
    TurnStart {
        turn: usize,
    },
    TurnEnd {
        turn: usize,
        tool_results: usize,
        finish_reason: Option<String>,
    },
    MessageAdded {
        message: Message,
    },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: ToolExecutionResult,
    },
}

/// Enumerates supported `AgentError` values.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Ai(#[from] OdysseyAiError),
    #[error("agent exceeded max turns ({0})")]
    MaxTurnsExceeded(usize),
}

/// Tunables for one agent instance.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub system_prompt: String,
    pub max_turns: usize,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            system_prompt: String::new(),
            max_turns: 8,
            max_tokens: None,
            temperature: None,
        }
    }
}

type EventHandler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

#[derive(Clone)]
struct RegisteredTool {
    definition: ToolDefinition,
    tool: Arc<dyn AgentTool>,
}

/// Conversation-scoped orchestrator over an [`LlmClient`] and a tool registry.
#[derive(Clone)]
pub struct Agent {
    client: Arc<dyn LlmClient>,
    config: AgentConfig,
    messages: Vec<Message>,
    tools: HashMap<String, RegisteredTool>,
    handlers: Vec<EventHandler>,
}

impl Agent {
    /// Creates a new [`Agent`] with an initial system message when configured.
    pub fn new(client: Arc<dyn LlmClient>, config: AgentConfig) -> Self {
        let mut messages = Vec::new();
        if !config.system_prompt.trim().is_empty() {
            messages.push(Message::system(config.system_prompt.clone()));
        }

        Self {
            client,
            config,
            messages,
            tools: HashMap::new(),
            handlers: Vec::new(),
        }
    }

    /// Adds an event subscriber that receives runtime lifecycle callbacks.
    pub fn subscribe<F>(&mut self, handler: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    /// Registers a tool exposed to the language model.
    pub fn register_tool<T>(&mut self, tool: T)
    where
        T: AgentTool + 'static,
    {
        let definition = tool.definition();
        let name = definition.name.clone();
        self.tools.insert(
            name,
            RegisteredTool {
                definition,
                tool: Arc::new(tool),
            },
        );
    }

    /// Returns true when a tool with `tool_name` is registered.
    pub fn has_tool(&self, tool_name: &str) -> bool {
        self.tools.contains_key(tool_name)
    }

    /// Lists registered tool names in sorted order.
    pub fn registered_tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the full conversation history.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Replaces the conversation history wholesale.
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Appends one message without running a turn.
    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Appends a user prompt and advances the agent until completion.
    pub async fn prompt(&mut self, text: impl Into<String>) -> Result<Vec<Message>, AgentError> {
        self.prompt_internal(text.into(), None).await
    }

    /// Runs a prompt while optionally streaming text deltas.
    pub async fn prompt_with_stream(
        &mut self,
        text: impl Into<String>,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<Vec<Message>, AgentError> {
        self.prompt_internal(text.into(), on_delta).await
    }

    async fn prompt_internal(
        &mut self,
        text: String,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<Vec<Message>, AgentError> {
        let start_index = self.messages.len();
        let user_message = Message::user(text);
        self.messages.push(user_message.clone());
        self.emit(AgentEvent::MessageAdded {
            message: user_message,
        });
        self.run_loop(start_index, on_delta).await
    }

    fn emit(&self, event: AgentEvent) {
        for handler in &self.handlers {
            handler(&event);
        }
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| tool.definition.clone())
            .collect()
    }

    async fn run_loop(
        &mut self,
        start_index: usize,
        on_delta: Option<StreamDeltaHandler>,
    ) -> Result<Vec<Message>, AgentError> {
        self.emit(AgentEvent::AgentStart);

        for turn in 1..=self.config.max_turns {
            self.emit(AgentEvent::TurnStart { turn });

            let request = ChatRequest {
                model: self.config.model.clone(),
                messages: self.messages.clone(),
                tools: self.tool_definitions(),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            };

            let response: ChatResponse = self
                .client
                .complete_with_stream(request, on_delta.clone())
                .await?;
            let finish_reason = response.finish_reason.clone();
            let assistant = response.message;
            self.messages.push(assistant.clone());
            self.emit(AgentEvent::MessageAdded {
                message: assistant.clone(),
            });

            let tool_calls = assistant.tool_calls();
            if tool_calls.is_empty() {
                self.emit(AgentEvent::TurnEnd {
                    turn,
                    tool_results: 0,
                    finish_reason,
                });
                let new_messages = self.messages[start_index..].to_vec();
                self.emit(AgentEvent::AgentEnd {
                    new_messages: new_messages.len(),
                });
                return Ok(new_messages);
            }

            let tool_results = tool_calls.len();
            for call in tool_calls {
                self.execute_tool_call(call).await;
            }

            self.emit(AgentEvent::TurnEnd {
                turn,
                tool_results,
                finish_reason,
            });
        }

        Err(AgentError::MaxTurnsExceeded(self.config.max_turns))
    }

    async fn execute_tool_call(&mut self, call: ToolCall) {
        self.emit(AgentEvent::ToolExecutionStart {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
        });

        let result = match self.tools.get(&call.name) {
            Some(registered) => {
                let tool = Arc::clone(&registered.tool);
                tool.execute(call.arguments.clone()).await
            }
            None => ToolExecutionResult::error(json!({
                "error": format!("unknown tool '{}'", call.name)
            })),
        };

        self.emit(AgentEvent::ToolExecutionEnd {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: result.clone(),
        });

        let tool_message =
            Message::tool_result(call.id, call.name, result.as_text(), result.is_error);
        self.messages.push(tool_message.clone());
        self.emit(AgentEvent::MessageAdded {
            message: tool_message,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use odyssey_ai::{
        ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, Message, MessageRole,
        OdysseyAiError, StreamDeltaHandler, ToolDefinition,
    };

    use super::{Agent, AgentConfig, AgentError, AgentEvent, AgentTool, ToolExecutionResult};

    struct ScriptedClient {
        responses: Mutex<VecDeque<ChatResponse>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(VecDeque::from(responses)),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, OdysseyAiError> {
            self.responses
                .lock()
                .expect("scripted responses")
                .pop_front()
                .ok_or_else(|| {
                    OdysseyAiError::InvalidResponse("scripted response queue exhausted".into())
                })
        }

        async fn complete_with_stream(
            &self,
            request: ChatRequest,
            on_delta: Option<StreamDeltaHandler>,
        ) -> Result<ChatResponse, OdysseyAiError> {
            let response = self.complete(request).await?;
            if let Some(handler) = on_delta {
                let text = response.message.text_content();
                if !text.is_empty() {
                    handler(text);
                }
            }
            Ok(response)
        }
    }

    struct EchoTool;

    #[async_trait]
    impl AgentTool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "Echoes the provided arguments".to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            }
        }

        async fn execute(&self, arguments: Value) -> ToolExecutionResult {
            ToolExecutionResult::ok(arguments)
        }
    }

    fn tool_call_response(id: &str, name: &str, arguments: Value) -> ChatResponse {
        ChatResponse {
            message: Message::assistant_blocks(vec![ContentBlock::ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            }]),
            finish_reason: Some("tool_calls".to_string()),
            usage: ChatUsage::default(),
        }
    }

    fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            message: Message::assistant_text(text),
            finish_reason: Some("stop".to_string()),
            usage: ChatUsage::default(),
        }
    }

    fn test_config() -> AgentConfig {
        AgentConfig {
            system_prompt: "orchestrate the album club".to_string(),
            max_turns: 4,
            ..AgentConfig::default()
        }
    }

    #[tokio::test]
    async fn records_tool_call_and_result_in_history() {
        let client = Arc::new(ScriptedClient::new(vec![
            tool_call_response("call_1", "echo", json!({ "note": "hi" })),
            text_response("done"),
        ]));
        let mut agent = Agent::new(client, test_config());
        agent.register_tool(EchoTool);

        let new_messages = agent.prompt("run echo").await.expect("prompt");

        let roles: Vec<MessageRole> = new_messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::Tool,
                MessageRole::Assistant,
            ]
        );

        let tool_message = &new_messages[2];
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_message.tool_name.as_deref(), Some("echo"));
        assert!(!tool_message.is_error);
        let payload: Value =
            serde_json::from_str(&tool_message.text_content()).expect("payload json");
        assert_eq!(payload, json!({ "note": "hi" }));
        assert_eq!(new_messages[3].text_content(), "done");
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_result() {
        let client = Arc::new(ScriptedClient::new(vec![
            tool_call_response("call_1", "missing", json!({})),
            text_response("recovered"),
        ]));
        let mut agent = Agent::new(client, test_config());

        let new_messages = agent.prompt("call something").await.expect("prompt");
        let tool_message = new_messages
            .iter()
            .find(|m| m.role == MessageRole::Tool)
            .expect("tool message");
        assert!(tool_message.is_error);
        assert!(tool_message.text_content().contains("unknown tool"));
    }

    #[tokio::test]
    async fn streams_deltas_and_emits_tool_events() {
        let client = Arc::new(ScriptedClient::new(vec![
            tool_call_response("call_1", "echo", json!({})),
            text_response("all set"),
        ]));
        let mut agent = Agent::new(client, test_config());
        agent.register_tool(EchoTool);

        let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let event_sink = Arc::clone(&events);
        agent.subscribe(move |event| {
            let label = match event {
                AgentEvent::ToolExecutionStart { tool_name, .. } => {
                    format!("start:{tool_name}")
                }
                AgentEvent::ToolExecutionEnd { tool_name, .. } => format!("end:{tool_name}"),
                _ => return,
            };
            event_sink.lock().expect("events").push(label);
        });

        let deltas: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let delta_sink = Arc::clone(&deltas);
        let on_delta: StreamDeltaHandler = Arc::new(move |delta| {
            delta_sink.lock().expect("deltas").push(delta);
        });

        agent
            .prompt_with_stream("go", Some(on_delta))
            .await
            .expect("prompt");

        assert_eq!(
            events.lock().expect("events").clone(),
            vec!["start:echo".to_string(), "end:echo".to_string()]
        );
        assert_eq!(deltas.lock().expect("deltas").join(""), "all set");
    }

    #[tokio::test]
    async fn exceeding_max_turns_is_an_error() {
        let responses: Vec<ChatResponse> = (0..4)
            .map(|index| tool_call_response(&format!("call_{index}"), "echo", json!({})))
            .collect();
        let client = Arc::new(ScriptedClient::new(responses));
        let mut agent = Agent::new(client, test_config());
        agent.register_tool(EchoTool);

        let error = agent.prompt("loop forever").await.expect_err("max turns");
        assert!(matches!(error, AgentError::MaxTurnsExceeded(4)));
    }

    #[tokio::test]
    async fn system_prompt_seeds_history() {
        let client = Arc::new(ScriptedClient::new(vec![text_response("hello")]));
        let mut agent = Agent::new(client, test_config());
        assert_eq!(agent.messages().len(), 1);
        assert_eq!(agent.messages()[0].role, MessageRole::System);

        agent.prompt("hi").await.expect("prompt");
        assert_eq!(agent.messages().len(), 3);
    }
}
