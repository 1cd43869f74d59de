//! HTTP surface for the album club: the chat endpoint plus boundary endpoints.
//!
//! The chat endpoint runs one orchestrated turn per request. Conversation
//! history is held in-process per session key; each turn snapshots the
//! session, runs the agent, and stores the updated history back (last writer
//! wins, matching the flat-file storage model underneath).

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use odyssey_agent::{Agent, AgentConfig, AgentEvent};
use odyssey_ai::{LlmClient, Message, MessageRole, StreamDeltaHandler};
use odyssey_club::{
    generate_record_id, BacklogAlbum, ClubService, ClubStore, PickNextAlbumError, Rating,
};
use odyssey_tools::{register_club_tools, ClubView};

mod types;

use types::{ApiError, ChatSendRequest, ChatSendResponse, NominationSubmission, RatingSubmission};

pub const CHAT_ENDPOINT: &str = "/chat";
pub const NOMINATIONS_ENDPOINT: &str = "/nominations";
pub const RATINGS_ENDPOINT: &str = "/ratings";
pub const PICK_NEXT_ALBUM_ENDPOINT: &str = "/pick-next-album";
pub const STATUS_ENDPOINT: &str = "/status";
const DEFAULT_SESSION_KEY: &str = "default";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are the conversation orchestrator for Audio \
Odyssey, an album discovery and rating club. Use the available tools to fetch club data or \
request a UI view, then summarize the outcome for the user.";

/// Construction-time settings for the gateway.
pub struct GatewayConfig {
    pub client: Arc<dyn LlmClient>,
    pub model: String,
    pub system_prompt: String,
    pub data_dir: PathBuf,
    pub max_turns: usize,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Shared state behind every handler.
pub struct GatewayState {
    config: GatewayConfig,
    service: Arc<ClubService>,
    sessions: Mutex<HashMap<String, Vec<Message>>>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig) -> Self {
        let service = Arc::new(ClubService::new(ClubStore::new(config.data_dir.clone())));
        Self {
            config,
            service,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn service(&self) -> &Arc<ClubService> {
        &self.service
    }
}

pub fn build_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(CHAT_ENDPOINT, post(handle_chat))
        .route(NOMINATIONS_ENDPOINT, post(handle_nominations))
        .route(RATINGS_ENDPOINT, post(handle_ratings))
        .route(PICK_NEXT_ALBUM_ENDPOINT, post(handle_pick_next_album))
        .route(STATUS_ENDPOINT, get(handle_status))
        .with_state(state)
}

/// Binds the listener and serves until ctrl-c.
pub async fn run_gateway_server(config: GatewayConfig, bind_addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind gateway server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway server address")?;

    println!(
        "gateway server listening: chat_endpoint={} addr={} data_dir={}",
        CHAT_ENDPOINT,
        local_addr,
        config.data_dir.display()
    );

    let state = Arc::new(GatewayState::new(config));
    let app = build_gateway_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("gateway server exited unexpectedly")
}

struct TurnOutcome {
    reply: String,
    fragments: Vec<ClubView>,
    messages: Vec<Message>,
}

type FragmentHandler = Arc<dyn Fn(ClubView) + Send + Sync>;

async fn run_chat_turn(
    state: &Arc<GatewayState>,
    session_key: &str,
    message: String,
    on_delta: Option<StreamDeltaHandler>,
    on_fragment: Option<FragmentHandler>,
) -> Result<TurnOutcome, ApiError> {
    let history = {
        let sessions = state.sessions.lock().expect("sessions lock");
        sessions.get(session_key).cloned()
    };

    let mut agent = Agent::new(
        Arc::clone(&state.config.client),
        AgentConfig {
            model: state.config.model.clone(),
            system_prompt: state.config.system_prompt.clone(),
            max_turns: state.config.max_turns,
            max_tokens: state.config.max_tokens,
            temperature: state.config.temperature,
        },
    );
    register_club_tools(&mut agent, &state.service);
    if let Some(history) = history {
        agent.replace_messages(history);
    }

    if let Some(on_fragment) = on_fragment {
        agent.subscribe(move |event| {
            if let AgentEvent::ToolExecutionEnd { result, .. } = event {
                if result.is_error {
                    return;
                }
                if let Ok(view) = serde_json::from_value::<ClubView>(result.content.clone()) {
                    on_fragment(view);
                }
            }
        });
    }

    let new_messages = agent
        .prompt_with_stream(message, on_delta)
        .await
        .map_err(|error| {
            tracing::warn!(%error, session = session_key, "chat turn failed");
            ApiError::gateway_failure(format!("chat turn failed: {error}"))
        })?;

    let reply = new_messages
        .iter()
        .rev()
        .find(|message| {
            message.role == MessageRole::Assistant && !message.text_content().trim().is_empty()
        })
        .map(Message::text_content)
        .unwrap_or_default();
    let fragments = collect_view_fragments(&new_messages);
    let messages = agent.messages().to_vec();

    {
        let mut sessions = state.sessions.lock().expect("sessions lock");
        sessions.insert(session_key.to_string(), messages.clone());
    }

    Ok(TurnOutcome {
        reply,
        fragments,
        messages,
    })
}

fn collect_view_fragments(messages: &[Message]) -> Vec<ClubView> {
    messages
        .iter()
        .filter(|message| message.role == MessageRole::Tool && !message.is_error)
        .filter_map(|message| serde_json::from_str::<ClubView>(&message.text_content()).ok())
        .collect()
}

async fn handle_chat(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<ChatSendRequest>,
) -> Response {
    let message = request.message.trim().to_string();
    if message.is_empty() {
        return ApiError::bad_request("empty_message", "message must not be empty")
            .into_response();
    }
    let session_key = request
        .session
        .as_deref()
        .map(str::trim)
        .filter(|session| !session.is_empty())
        .unwrap_or(DEFAULT_SESSION_KEY)
        .to_string();

    if request.stream {
        return stream_chat(state, session_key, message);
    }

    match run_chat_turn(&state, &session_key, message, None, None).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ChatSendResponse {
                success: true,
                reply: outcome.reply,
                fragments: outcome.fragments,
                messages: outcome.messages,
            }),
        )
            .into_response(),
        Err(error) => error.into_response(),
    }
}

fn stream_chat(state: Arc<GatewayState>, session_key: String, message: String) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    let delta_tx = tx.clone();
    let on_delta: StreamDeltaHandler = Arc::new(move |delta: String| {
        let _ = delta_tx.send(Event::default().event("delta").data(delta));
    });
    let fragment_tx = tx.clone();
    let on_fragment: FragmentHandler = Arc::new(move |view: ClubView| {
        if let Ok(payload) = serde_json::to_string(&view) {
            let _ = fragment_tx.send(Event::default().event("fragment").data(payload));
        }
    });

    tokio::spawn(async move {
        match run_chat_turn(&state, &session_key, message, Some(on_delta), Some(on_fragment)).await
        {
            Ok(outcome) => {
                let payload = json!({
                    "reply": outcome.reply,
                    "fragments": outcome.fragments,
                    "messageCount": outcome.messages.len(),
                });
                let _ = tx.send(Event::default().event("turn").data(payload.to_string()));
            }
            Err(error) => {
                let _ = tx.send(Event::default().event("error").data(error.message()));
            }
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(Ok::<Event, Infallible>);
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn handle_nominations(
    State(state): State<Arc<GatewayState>>,
    Json(submission): Json<NominationSubmission>,
) -> Response {
    let title = submission.title.trim();
    let artist = submission.artist.trim();
    if title.is_empty() || artist.is_empty() {
        return ApiError::bad_request("missing_fields", "title and artist are required")
            .into_response();
    }

    let nomination = BacklogAlbum {
        id: submission
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_record_id),
        title: title.to_string(),
        artist: artist.to_string(),
        genre: submission.genre.filter(|genre| !genre.trim().is_empty()),
        cover_url: submission
            .cover_url
            .filter(|cover_url| !cover_url.trim().is_empty()),
        created_at: Some(Utc::now()),
    };

    match state.service.add_nomination(nomination) {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
        Err(error) => {
            ApiError::internal(format!("failed to store nomination: {error}")).into_response()
        }
    }
}

async fn handle_ratings(
    State(state): State<Arc<GatewayState>>,
    Json(submission): Json<RatingSubmission>,
) -> Response {
    let album_id = submission.album_id.trim();
    let user = submission.user.trim();
    if album_id.is_empty() || user.is_empty() {
        return ApiError::bad_request("missing_fields", "albumId and user are required")
            .into_response();
    }
    if !(1..=5).contains(&submission.score) {
        return ApiError::bad_request("invalid_score", "score must be between 1 and 5")
            .into_response();
    }

    let rating = Rating {
        album_id: album_id.to_string(),
        user: user.to_string(),
        score: submission.score,
        comment: submission.comment.filter(|comment| !comment.is_empty()),
        created_at: Some(Utc::now()),
    };

    match state.service.add_rating(rating) {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
        Err(error) => {
            ApiError::internal(format!("failed to store rating: {error}")).into_response()
        }
    }
}

async fn handle_pick_next_album(State(state): State<Arc<GatewayState>>) -> Response {
    match state.service.pick_next_album() {
        Ok(album) => (
            StatusCode::OK,
            Json(json!({ "success": true, "album": album })),
        )
            .into_response(),
        Err(PickNextAlbumError::NothingToPick) => ApiError::not_found(
            "nothing_to_pick",
            "no unpicked album or nomination found",
        )
        .into_response(),
        Err(PickNextAlbumError::Storage(error)) => {
            ApiError::internal(format!("failed to persist promotion: {error}")).into_response()
        }
    }
}

async fn handle_status(State(state): State<Arc<GatewayState>>) -> Response {
    let store = state.service.store();
    let session_count = state.sessions.lock().expect("sessions lock").len();
    (
        StatusCode::OK,
        Json(json!({
            "model": state.config.model,
            "data_dir": store.data_dir().display().to_string(),
            "collections": {
                "albums": store.read_albums().len(),
                "ratings": store.read_ratings().len(),
                "backlog": store.read_backlog().len(),
            },
            "sessions": session_count,
            "gateway": {
                "chat_endpoint": CHAT_ENDPOINT,
                "nominations_endpoint": NOMINATIONS_ENDPOINT,
                "ratings_endpoint": RATINGS_ENDPOINT,
                "pick_next_album_endpoint": PICK_NEXT_ALBUM_ENDPOINT,
                "status_endpoint": STATUS_ENDPOINT,
            }
        })),
    )
        .into_response()
}
