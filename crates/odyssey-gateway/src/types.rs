//! Gateway request/response/error types shared across handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use odyssey_ai::Message;
use odyssey_tools::ClubView;

/// Error payload mapped to the gateway's JSON error envelope.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) code: &'static str,
    pub(crate) message: String,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub(crate) fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub(crate) fn gateway_failure(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, "chat_runtime_error", message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub(crate) fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "success": false,
                "error": {
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

/// Body of a chat send request.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatSendRequest {
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) session: Option<String>,
    #[serde(default)]
    pub(crate) stream: bool,
}

/// Non-streaming chat response: reply text, view fragments, updated state.
#[derive(Debug, Serialize)]
pub(crate) struct ChatSendResponse {
    pub(crate) success: bool,
    pub(crate) reply: String,
    pub(crate) fragments: Vec<ClubView>,
    pub(crate) messages: Vec<Message>,
}

/// Body of a nomination submission.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NominationSubmission {
    #[serde(default)]
    pub(crate) id: Option<String>,
    pub(crate) title: String,
    pub(crate) artist: String,
    #[serde(default)]
    pub(crate) genre: Option<String>,
    #[serde(default)]
    pub(crate) cover_url: Option<String>,
}

/// Body of a rating submission.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RatingSubmission {
    pub(crate) album_id: String,
    pub(crate) user: String,
    pub(crate) score: u8,
    #[serde(default)]
    pub(crate) comment: Option<String>,
}
