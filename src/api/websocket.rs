//! WebSocket notice stream
//!
//! Each connection receives the current session's notices as JSON text frames
//! until the session closes or the client disconnects.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::ApiState;
use crate::session::SessionHandle;

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> Response {
    let session = state.current().await;
    ws.on_upgrade(move |socket| handle_socket(socket, session))
}

async fn handle_socket(socket: WebSocket, session: SessionHandle) {
    let session_id = session.id();
    tracing::info!(%session_id, "notice stream connected");

    let (mut sender, mut receiver) = socket.split();
    let mut notices = BroadcastStream::new(session.subscribe());

    loop {
        tokio::select! {
            biased;

            notice = notices.next() => match notice {
                Some(Ok(notice)) => {
                    let text = match serde_json::to_string(&notice) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to encode notice");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "notice stream lagged");
                }
                None => break,
            },
            () = session.closed() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!(%session_id, "notice stream disconnected");
}

/// Build websocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/session/events", get(ws_handler))
        .with_state(state)
}
