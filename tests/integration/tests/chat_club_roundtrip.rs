use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;

use odyssey_agent::{Agent, AgentConfig};
use odyssey_ai::{
    ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, Message, MessageRole,
    OdysseyAiError,
};
use odyssey_club::{BacklogAlbum, ClubService, ClubStore, Rating};
use odyssey_tools::register_club_tools;

struct ScriptedClient {
    responses: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().expect("requests").len()
    }

    fn last_request(&self) -> ChatRequest {
        self.requests
            .lock()
            .expect("requests")
            .last()
            .cloned()
            .expect("at least one request")
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, OdysseyAiError> {
        self.requests.lock().expect("requests").push(request);
        self.responses
            .lock()
            .expect("responses")
            .pop_front()
            .ok_or_else(|| {
                OdysseyAiError::InvalidResponse("scripted response queue exhausted".into())
            })
    }
}

fn scripted_tool_call(id: &str, name: &str, arguments: Value) -> ChatResponse {
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

fn scripted_assistant_text(text: &str) -> ChatResponse {
    ChatResponse {
        message: Message::assistant_text(text),
        finish_reason: Some("stop".to_string()),
        usage: ChatUsage::default(),
    }
}

fn latest_tool_payload(agent: &Agent, tool_name: &str) -> Value {
    let message = agent
        .messages()
        .iter()
        .rev()
        .find(|message| {
            message.role == MessageRole::Tool
                && !message.is_error
                && message.tool_name.as_deref() == Some(tool_name)
        })
        .unwrap_or_else(|| panic!("missing successful tool payload for {tool_name}"));
    serde_json::from_str(message.text_content().trim())
        .unwrap_or_else(|error| panic!("tool payload should be valid json: {error}"))
}

fn club_agent(client: Arc<ScriptedClient>, service: &Arc<ClubService>) -> Agent {
    let mut agent = Agent::new(
        client,
        AgentConfig {
            system_prompt: "orchestrate the album club".to_string(),
            max_turns: 6,
            ..AgentConfig::default()
        },
    );
    register_club_tools(&mut agent, service);
    agent
}

fn nomination(id: &str, title: &str) -> BacklogAlbum {
    BacklogAlbum {
        id: id.to_string(),
        title: title.to_string(),
        artist: "artist".to_string(),
        genre: None,
        cover_url: None,
        created_at: None,
    }
}

#[tokio::test]
async fn chat_turn_resolves_current_album_and_records_history() {
    let workspace = tempdir().expect("tempdir");
    let service = Arc::new(ClubService::new(ClubStore::new(workspace.path())));
    service
        .store()
        .write_backlog(&[nomination("id_1700000000000_a", "Kid A")])
        .expect("seed backlog");
    service.pick_next_album().expect("promote seed nomination");
    service
        .add_rating(Rating {
            album_id: "id_1700000000000_a".to_string(),
            user: "ana".to_string(),
            score: 4,
            comment: Some("dense but rewarding".to_string()),
            created_at: None,
        })
        .expect("seed rating");

    let client = Arc::new(ScriptedClient::new(vec![
        scripted_tool_call("call_1", "getCurrentWeekAlbum", json!({})),
        scripted_assistant_text("This week the club is listening to Kid A."),
    ]));
    let mut agent = club_agent(Arc::clone(&client), &service);

    let new_messages = agent
        .prompt("what album is up this week?")
        .await
        .expect("chat turn");

    assert_eq!(client.request_count(), 2);
    let payload = latest_tool_payload(&agent, "getCurrentWeekAlbum");
    assert_eq!(payload["kind"], "album_card");
    assert_eq!(payload["isNomination"], false);
    assert_eq!(payload["album"]["title"], "Kid A");
    assert_eq!(payload["stats"]["avg"], 4.0);
    assert_eq!(payload["stats"]["count"], 1);

    // The second model request must carry the recorded tool result.
    let follow_up = client.last_request();
    assert!(follow_up
        .messages
        .iter()
        .any(|message| message.role == MessageRole::Tool
            && message.tool_name.as_deref() == Some("getCurrentWeekAlbum")));
    assert_eq!(
        new_messages.last().expect("final message").text_content(),
        "This week the club is listening to Kid A."
    );
}

#[tokio::test]
async fn fresh_nomination_supersedes_picked_album_until_promoted() {
    let workspace = tempdir().expect("tempdir");
    let service = Arc::new(ClubService::new(ClubStore::new(workspace.path())));
    service
        .store()
        .write_backlog(&[nomination("id_1000_old", "Old Pick")])
        .expect("seed backlog");
    service.pick_next_album().expect("promote first nomination");

    let mut fresh = nomination(&odyssey_club::generate_record_id(), "Blue");
    fresh.created_at = Some(chrono::Utc::now() + chrono::Duration::hours(1));
    service.add_nomination(fresh).expect("add fresh nomination");

    let client = Arc::new(ScriptedClient::new(vec![
        scripted_tool_call("call_1", "getCurrentWeekAlbum", json!({})),
        scripted_assistant_text("A new nomination is waiting."),
        scripted_tool_call("call_2", "getCurrentWeekAlbum", json!({})),
        scripted_assistant_text("Blue is now the current album."),
    ]));
    let mut agent = club_agent(Arc::clone(&client), &service);

    agent.prompt("what's current?").await.expect("first turn");
    let payload = latest_tool_payload(&agent, "getCurrentWeekAlbum");
    assert_eq!(payload["isNomination"], true);
    assert!(payload.get("stats").is_none());

    let backlog_before = service.store().read_backlog().len();
    service.pick_next_album().expect("promote fresh nomination");
    assert_eq!(service.store().read_backlog().len(), backlog_before - 1);

    agent.prompt("and now?").await.expect("second turn");
    let payload = latest_tool_payload(&agent, "getCurrentWeekAlbum");
    assert_eq!(payload["isNomination"], false);
    assert_eq!(payload["album"]["title"], "Blue");
}

#[tokio::test]
async fn rating_form_flow_feeds_album_ratings() {
    let workspace = tempdir().expect("tempdir");
    let service = Arc::new(ClubService::new(ClubStore::new(workspace.path())));
    service
        .store()
        .write_backlog(&[nomination("id_2000_x", "OK Computer")])
        .expect("seed backlog");
    let promoted = service.pick_next_album().expect("promote");

    let client = Arc::new(ScriptedClient::new(vec![
        scripted_tool_call("call_1", "showRatingForm", json!({})),
        scripted_assistant_text("Here is the rating form."),
        scripted_tool_call("call_2", "getAlbumRatings", json!({ "albumId": promoted.id })),
        scripted_assistant_text("The club average is in."),
    ]));
    let mut agent = club_agent(Arc::clone(&client), &service);

    agent.prompt("I want to rate it").await.expect("form turn");
    let payload = latest_tool_payload(&agent, "showRatingForm");
    assert_eq!(payload["kind"], "rating_form");
    assert_eq!(payload["albumTitle"], "OK Computer");

    // The form submission lands on the boundary endpoint, not the tool.
    service
        .add_rating(Rating {
            album_id: promoted.id.clone(),
            user: "sam".to_string(),
            score: 5,
            comment: Some("a classic".to_string()),
            created_at: None,
        })
        .expect("store rating");

    agent.prompt("how is it rated?").await.expect("stats turn");
    let payload = latest_tool_payload(&agent, "getAlbumRatings");
    assert_eq!(payload["kind"], "stats");
    assert_eq!(payload["avg"], 5.0);
    assert_eq!(payload["count"], 1);
    assert_eq!(payload["comments"][0]["comment"], "a classic");
}
