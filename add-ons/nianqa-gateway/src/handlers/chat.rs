//! Chat and history routes.
//!
//! Non-streaming chat runs the whole pipeline through `Conversation::process_query`.
//! Streaming chat plans first, then streams the model branch chunk by chunk and
//! sends knowledge-base answers as a single chunk; either way the turns are
//! recorded once the answer is complete.

use crate::AppState;
use async_stream::stream;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use nianqa_core::{post_process, Conversation, Plan, APOLOGY};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(crate) struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    stream: bool,
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// POST /api/chat
pub(crate) async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "message must not be empty" })),
        )
            .into_response();
    }

    let (session_id, conversation) = state.sessions.get_or_create(req.session_id.as_deref());
    tracing::info!(
        target: "nianqa::gateway",
        session_id = %session_id,
        chars = message.chars().count(),
        stream = req.stream,
        "chat request"
    );

    if req.stream {
        let guard = conversation.lock_owned().await;
        chat_streaming(guard, session_id, message)
    } else {
        let mut conv = conversation.lock().await;
        let response = conv.process_query(&message).await;
        Json(json!({
            "response": response.answer,
            "source": response.source,
            "session_id": session_id,
            "timestamp": now_ms(),
        }))
        .into_response()
    }
}

/// Turn pair of a streamed model answer. Recorded when the stream completes,
/// or with whatever was already sent if the client goes away first.
struct PendingTurn {
    conv: tokio::sync::OwnedMutexGuard<Conversation>,
    question: String,
    shown: String,
    recorded: bool,
}

impl PendingTurn {
    fn new(conv: tokio::sync::OwnedMutexGuard<Conversation>, question: String) -> Self {
        Self {
            conv,
            question,
            shown: String::new(),
            recorded: false,
        }
    }

    fn push(&mut self, chunk: &str) {
        self.shown.push_str(chunk);
    }

    fn record(&mut self) {
        if self.recorded {
            return;
        }
        self.recorded = true;
        // The fixed apology is stored exactly as it was shown.
        let answer = if self.shown == APOLOGY {
            APOLOGY.to_string()
        } else {
            post_process(&self.shown)
        };
        self.conv.record(&self.question, &answer);
    }
}

impl Drop for PendingTurn {
    fn drop(&mut self) {
        if !self.recorded {
            tracing::info!(
                target: "nianqa::gateway",
                chars = self.shown.chars().count(),
                "stream dropped before completion"
            );
            self.record();
        }
    }
}

fn chat_streaming(
    mut conv: tokio::sync::OwnedMutexGuard<Conversation>,
    session_id: String,
    message: String,
) -> Response {
    let plan = conv.plan(&message);
    let source = plan.source();
    let orchestrator = Arc::clone(conv.orchestrator());

    let body_stream = stream! {
        match (plan, orchestrator.llm().cloned()) {
            (Plan::Delegate { question, context }, Some(llm)) => {
                let mut pending = PendingTurn::new(conv, message);
                let mut chunks = Box::pin(llm.stream_answer(&question, context.as_deref()));
                while let Some(chunk) = chunks.next().await {
                    pending.push(&chunk);
                    yield chunk;
                }
                pending.record();
                tracing::info!(target: "nianqa::gateway", chars = pending.shown.chars().count(), "stream complete");
            }
            (plan, _) => {
                let response = orchestrator.resolve(plan).await;
                conv.record(&message, &response.answer);
                yield response.answer;
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-answer-source", source.as_str())
        .header("x-session-id", session_id)
        .body(Body::from_stream(
            body_stream.map(Ok::<_, std::convert::Infallible>),
        ))
        .unwrap_or_else(|err| {
            tracing::error!(target: "nianqa::gateway", error = %err, "could not build stream response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}

/// GET /api/history/:session_id
pub(crate) async fn get_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let history = match state.sessions.get(&session_id) {
        Some(conv) => conv.lock().await.get_history().to_vec(),
        None => Vec::new(),
    };
    Json(json!({ "history": history, "session_id": session_id }))
}

/// DELETE /api/history/:session_id
pub(crate) async fn clear_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if state.sessions.remove(&session_id) {
        Json(json!({ "status": "cleared", "session_id": session_id })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown session", "session_id": session_id })),
        )
            .into_response()
    }
}

/// GET /api/sessions
pub(crate) async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.sessions.ids();
    Json(json!({ "count": sessions.len(), "sessions": sessions }))
}
