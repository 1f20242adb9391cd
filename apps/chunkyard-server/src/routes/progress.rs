//! Progress channel
//!
//! Served on its own listener. Each WebSocket connection subscribes to one
//! topic and receives `{"uploadId": "...", "progress": n}` text frames:
//! - GET / - every upload
//! - GET /:upload_id - a single upload

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::progress::{Subscription, Topic};
use crate::state::AppState;

/// Create the progress router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(subscribe_all))
        .route("/:upload_id", get(subscribe_upload))
        .with_state(state)
}

async fn subscribe_all(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    upgrade(state, ws, Topic::All)
}

async fn subscribe_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    upgrade(state, ws, Topic::Upload(upload_id))
}

fn upgrade(state: AppState, ws: WebSocketUpgrade, topic: Topic) -> Response {
    ws.on_upgrade(move |socket| {
        let subscription = state.progress().subscribe(topic);
        forward(socket, subscription)
    })
}

/// Relay events until either side goes away
async fn forward(socket: WebSocket, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(subscriber = subscription.id, "Failed to encode progress event: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!(
        subscriber = subscription.id,
        topic = ?subscription.topic,
        "Progress subscriber disconnected"
    );
}
