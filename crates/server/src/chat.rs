//! Chat transport for the agent runtime.
//!
//! JSON API:
//! - `GET /api/tools` lists the registered tools and their parameters.
//! - `POST /api/chat` runs one user turn. The session is created on first use.
//! - `POST /api/chat/confirm` approves or rejects a pending plan.
//! - `DELETE /api/sessions/{session_id}` destroys a session.
//!
//! WebSocket:
//! - `GET /ws` holds one session per connection. When the socket drops, the running turn is
//!   cancelled and awaited before the session is closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use shopdesk_agent::{AgentRuntime, Reply};
use shopdesk_core::errors::{ApplicationError, InterfaceError};
use shopdesk_core::tools::ToolSpec;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ChatState {
    runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub session_id: String,
    pub plan_id: String,
    pub approve: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub detail: String,
    pub correlation_id: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

/// Frames a WebSocket client may send.
#[derive(Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Message { text: String },
    Confirm { plan_id: String, approve: bool },
    Cancel,
}

/// Out-of-band frames; turn results are sent as plain [`Reply`] values.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlFrame {
    Welcome { session_id: String },
    Cancelled { session_id: String, cancelled: bool },
    Error { error: String, correlation_id: String },
}

enum Turn {
    Message(String),
    Confirm { plan_id: String, approve: bool },
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/api/tools", get(list_tools))
        .route("/api/chat", post(chat))
        .route("/api/chat/confirm", post(confirm))
        .route("/api/sessions/{session_id}", delete(close_session))
        .route("/ws", get(ws_handler))
        .with_state(ChatState { runtime })
}

async fn list_tools(State(state): State<ChatState>) -> Json<Vec<ToolSpec>> {
    Json(state.runtime.registry().specs().cloned().collect())
}

async fn chat(State(state): State<ChatState>, Json(body): Json<ChatRequest>) -> ApiResult<Json<Reply>> {
    if body.text.trim().is_empty() {
        return Err(bad_request("`text` must not be empty"));
    }
    let session_id = match body.session_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id.to_string(),
        None => state.runtime.open_session(None).await,
    };

    let reply = state.runtime.handle_message(&session_id, &body.text).await.map_err(api_error)?;
    info!(
        event_name = "server.chat.turn",
        session_id = %session_id,
        messages = reply.messages.len(),
        "chat turn answered"
    );
    Ok(Json(reply))
}

async fn confirm(State(state): State<ChatState>, Json(body): Json<ConfirmRequest>) -> ApiResult<Json<Reply>> {
    let reply = state
        .runtime
        .handle_confirmation(&body.session_id, &body.plan_id, body.approve)
        .await
        .map_err(api_error)?;
    info!(
        event_name = "server.chat.confirmation",
        session_id = %body.session_id,
        plan_id = %body.plan_id,
        approve = body.approve,
        "plan confirmation handled"
    );
    Ok(Json(reply))
}

async fn close_session(
    Path(session_id): Path<String>,
    State(state): State<ChatState>,
) -> ApiResult<StatusCode> {
    if state.runtime.close_session(&session_id).await {
        info!(event_name = "server.session.closed", session_id = %session_id, "session destroyed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(ApplicationError::UnknownSession(session_id)))
    }
}

async fn ws_handler(State(state): State<ChatState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: ChatState, socket: WebSocket) {
    let session_id = state.runtime.open_session(None).await;
    info!(event_name = "server.ws.connected", session_id = %session_id, "websocket session opened");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (turn_tx, mut turn_rx) = mpsc::unbounded_channel::<Turn>();
    send_frame(&out_tx, &ControlFrame::Welcome { session_id: session_id.clone() });

    let write_task = async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    };

    // Turns run one at a time so replies keep the order the user typed them in.
    let closed = Arc::new(AtomicBool::new(false));
    let turn_closed = closed.clone();
    let turn_runtime = state.runtime.clone();
    let turn_session = session_id.clone();
    let turn_out = out_tx.clone();
    let mut turns = tokio::spawn(async move {
        while let Some(turn) = turn_rx.recv().await {
            if turn_closed.load(Ordering::Acquire) {
                break;
            }
            let result = match turn {
                Turn::Message(text) => turn_runtime.handle_message(&turn_session, &text).await,
                Turn::Confirm { plan_id, approve } => {
                    turn_runtime.handle_confirmation(&turn_session, &plan_id, approve).await
                }
            };
            match result {
                Ok(reply) => send_frame(&turn_out, &reply),
                Err(error) => {
                    let mapped = into_interface(error);
                    send_frame(
                        &turn_out,
                        &ControlFrame::Error {
                            error: mapped.to_string(),
                            correlation_id: mapped.correlation_id().to_string(),
                        },
                    );
                }
            }
        }
    });

    // Cancellation bypasses the turn queue; it has to reach a plan that is mid-execution.
    let read_runtime = state.runtime.clone();
    let read_session = session_id.clone();
    let read_task = async move {
        while let Some(Ok(message)) = ws_stream.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(ClientFrame::Message { text }) => {
                        let _ = turn_tx.send(Turn::Message(text));
                    }
                    Ok(ClientFrame::Confirm { plan_id, approve }) => {
                        let _ = turn_tx.send(Turn::Confirm { plan_id, approve });
                    }
                    Ok(ClientFrame::Cancel) => {
                        let cancelled = read_runtime.cancel(&read_session).await;
                        send_frame(
                            &out_tx,
                            &ControlFrame::Cancelled { session_id: read_session.clone(), cancelled },
                        );
                    }
                    Err(error) => send_frame(
                        &out_tx,
                        &ControlFrame::Error {
                            error: format!("unreadable frame: {error}"),
                            correlation_id: correlation_id(),
                        },
                    ),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    let finished = tokio::select! {
        _ = write_task => None,
        _ = read_task => None,
        joined = &mut turns => Some(joined),
    };

    // Queued turns are dropped; the running one stops after its in-flight step.
    closed.store(true, Ordering::Release);
    let joined = match finished {
        Some(joined) => joined,
        None => {
            state.runtime.cancel(&session_id).await;
            turns.await
        }
    };
    if let Err(error) = joined {
        warn!(event_name = "server.ws.turn_failed", session_id = %session_id, error = %error, "turn task ended abnormally");
    }

    state.runtime.close_session(&session_id).await;
    info!(event_name = "server.ws.disconnected", session_id = %session_id, "websocket session closed");
}

fn send_frame<T: Serialize>(out: &mpsc::UnboundedSender<String>, frame: &T) {
    match serde_json::to_string(frame) {
        Ok(encoded) => {
            let _ = out.send(encoded);
        }
        Err(error) => warn!(event_name = "server.ws.encode_failed", error = %error, "frame dropped"),
    }
}

fn correlation_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn into_interface(error: ApplicationError) -> InterfaceError {
    let mapped = error.into_interface(correlation_id());
    warn!(
        event_name = "server.request.failed",
        correlation_id = %mapped.correlation_id(),
        error = %mapped,
        "request failed"
    );
    mapped
}

fn api_error(error: ApplicationError) -> (StatusCode, Json<ApiError>) {
    let unknown_session = matches!(error, ApplicationError::UnknownSession(_));
    let mapped = into_interface(error);
    let status = match &mapped {
        InterfaceError::BadRequest { .. } if unknown_session => StatusCode::NOT_FOUND,
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            error: mapped.user_message().to_string(),
            detail: mapped.to_string(),
            correlation_id: mapped.correlation_id().to_string(),
        }),
    )
}

fn bad_request(detail: &str) -> (StatusCode, Json<ApiError>) {
    let mapped = InterfaceError::BadRequest { message: detail.to_string(), correlation_id: correlation_id() };
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            error: mapped.user_message().to_string(),
            detail: mapped.to_string(),
            correlation_id: mapped.correlation_id().to_string(),
        }),
    )
}
