//! Session command endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use uuid::Uuid;

use super::ApiState;
use crate::Error;
use crate::session::{SessionHandle, SessionSnapshot};

/// Response to an accepted command
#[derive(Debug, Serialize)]
pub struct CommandAccepted {
    pub session_id: Uuid,
    pub command: &'static str,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Map a command failure to an HTTP response
fn error_response(e: &Error) -> Response {
    let status = match e {
        Error::SessionClosed => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: e.to_string(),
        }),
    )
        .into_response()
}

fn accepted(
    session: &SessionHandle,
    command: &'static str,
    result: crate::Result<()>,
) -> Response {
    match result {
        Ok(()) => {
            tracing::debug!(session_id = %session.id(), command, "command accepted");
            (
                StatusCode::ACCEPTED,
                Json(CommandAccepted {
                    session_id: session.id(),
                    command,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Current session snapshot
async fn snapshot(State(state): State<Arc<ApiState>>) -> Json<SessionSnapshot> {
    Json(state.current().await.snapshot())
}

/// Start the session, replacing it first if the previous one closed
async fn start(State(state): State<Arc<ApiState>>) -> Response {
    let session = state.current_or_fresh().await;
    let result = session.start_session();
    accepted(&session, "start", result)
}

async fn end(State(state): State<Arc<ApiState>>) -> Response {
    let session = state.current().await;
    let result = session.end_session();
    accepted(&session, "end", result)
}

async fn microphone(State(state): State<Arc<ApiState>>) -> Response {
    let session = state.current().await;
    let result = session.toggle_microphone();
    accepted(&session, "microphone", result)
}

async fn camera(State(state): State<Arc<ApiState>>) -> Response {
    let session = state.current().await;
    let result = session.toggle_local_camera();
    accepted(&session, "camera", result)
}

/// Build session router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/session", get(snapshot))
        .route("/session/start", post(start))
        .route("/session/end", post(end))
        .route("/session/microphone", post(microphone))
        .route("/session/camera", post(camera))
        .with_state(state)
}
