//! HTTP API endpoints for poll management.
//!
//! Voting itself only happens over the WebSocket; these endpoints create polls
//! and let a page load the current state before joining the room.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::identity::{self, ConnectionContext};
use crate::state::AppState;
use crate::store::StoreError;
use crate::types::{OptionResult, Poll, PollId, PollOption, PollSnapshot};
use crate::ws::MaybeConnectInfo;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 10;
pub const MIN_QUESTION_CHARS: usize = 3;
pub const MAX_QUESTION_CHARS: usize = 500;
pub const MAX_OPTION_CHARS: usize = 200;
/// How many polls the listing endpoint returns
pub const LIST_LIMIT: usize = 50;

/// Options may be sent as bare strings or `{ "text": ... }` objects
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OptionInput {
    Text(String),
    Object { text: String },
}

impl OptionInput {
    fn text(&self) -> &str {
        match self {
            OptionInput::Text(t) | OptionInput::Object { text: t } => t,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub options: Vec<OptionInput>,
    pub created_by: Option<String>,
}

/// Full poll view, without the dedup sets
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub id: PollId,
    pub question: String,
    pub options: Vec<PollOption>,
    pub total_votes: u64,
    pub results: Vec<OptionResult>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_voted: Option<bool>,
}

impl PollView {
    fn from_poll(poll: &Poll, has_voted: Option<bool>) -> Self {
        let snapshot = PollSnapshot::from_poll(poll);
        Self {
            id: poll.id.clone(),
            question: poll.question.clone(),
            options: snapshot.options,
            total_votes: snapshot.total_votes,
            results: snapshot.results,
            created_by: poll.created_by.clone(),
            created_at: poll.created_at,
            has_voted,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    pub id: PollId,
    pub question: String,
    pub total_votes: u64,
    pub created_at: DateTime<Utc>,
}

/// Check a create request, returning the cleaned question and option texts
pub fn validate_poll_data(req: &CreatePollRequest) -> Result<(String, Vec<String>), Vec<String>> {
    let mut errors = Vec::new();

    let question = req.question.trim().to_string();
    let question_len = question.chars().count();
    if question_len < MIN_QUESTION_CHARS {
        errors.push(format!(
            "Question must be at least {} characters long",
            MIN_QUESTION_CHARS
        ));
    } else if question_len > MAX_QUESTION_CHARS {
        errors.push(format!(
            "Question cannot exceed {} characters",
            MAX_QUESTION_CHARS
        ));
    }

    let mut options = Vec::with_capacity(req.options.len());
    if req.options.len() < MIN_OPTIONS {
        errors.push(format!("Poll must have at least {} options", MIN_OPTIONS));
    } else if req.options.len() > MAX_OPTIONS {
        errors.push(format!("Poll cannot have more than {} options", MAX_OPTIONS));
    } else {
        for (i, option) in req.options.iter().enumerate() {
            let text = option.text().trim();
            if text.is_empty() {
                errors.push(format!("Option {} cannot be empty", i + 1));
            } else if text.chars().count() > MAX_OPTION_CHARS {
                errors.push(format!(
                    "Option {} cannot exceed {} characters",
                    i + 1,
                    MAX_OPTION_CHARS
                ));
            } else {
                options.push(text.to_string());
            }
        }
    }

    if errors.is_empty() {
        Ok((question, options))
    } else {
        Err(errors)
    }
}

/// Create a poll.
///
/// POST /api/polls
pub async fn create_poll(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePollRequest>,
) -> Response {
    let (question, options) = match validate_poll_data(&req) {
        Ok(cleaned) => cleaned,
        Err(errors) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "success": false,
                    "message": errors.first().cloned().unwrap_or_default(),
                    "errors": errors,
                })),
            )
                .into_response();
        }
    };

    let created_by = req
        .created_by
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    match state
        .store
        .insert_poll(Poll::new(question, options, created_by))
        .await
    {
        Ok(poll) => {
            tracing::info!(poll_id = %poll.id, options = poll.options.len(), "Poll created");
            (
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "success": true,
                    "message": "Poll created successfully",
                    "poll": PollView::from_poll(&poll, None),
                })),
            )
                .into_response()
        }
        Err(e) => server_error("Failed to create poll", e),
    }
}

/// Fetch one poll, flagging whether the caller's origin already voted.
///
/// GET /api/polls/{id}
pub async fn get_poll(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    MaybeConnectInfo(peer): MaybeConnectInfo,
    headers: HeaderMap,
) -> Response {
    match state.store.find_poll(&id).await {
        Ok(poll) => {
            let origin = identity::resolve(&ConnectionContext::new(headers, peer));
            let has_voted = poll.has_voted_by_origin(&origin);
            Json(serde_json::json!({
                "success": true,
                "poll": PollView::from_poll(&poll, Some(has_voted)),
            }))
            .into_response()
        }
        Err(StoreError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "success": false, "message": "Poll not found" })),
        )
            .into_response(),
        Err(e) => server_error("Failed to fetch poll", e),
    }
}

/// List the newest polls.
///
/// GET /api/polls
pub async fn list_polls(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_polls(LIST_LIMIT).await {
        Ok(polls) => {
            let polls: Vec<PollSummary> = polls
                .into_iter()
                .map(|p| PollSummary {
                    id: p.id,
                    question: p.question,
                    total_votes: p.total_votes,
                    created_at: p.created_at,
                })
                .collect();
            Json(serde_json::json!({
                "success": true,
                "count": polls.len(),
                "polls": polls,
            }))
            .into_response()
        }
        Err(e) => server_error("Failed to fetch polls", e),
    }
}

/// GET /
pub async fn index() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Live polling API",
        "status": "running",
        "endpoints": {
            "createPoll": "POST /api/polls",
            "getPoll": "GET /api/polls/{id}",
            "getAllPolls": "GET /api/polls",
            "realtime": "GET /ws",
        }
    }))
}

fn server_error(message: &str, err: StoreError) -> Response {
    tracing::error!("{}: {}", message, err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "success": false, "message": message })),
    )
        .into_response()
}
