//! `/ws/progress`: streams committed progress events to notification
//! collaborators and dashboards.
//!
//! Optional `?creator_id=` narrows the stream to one creator.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::AppState;
use crate::engine::ProgressEvent;

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub creator_id: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    info!(creator_id = ?query.creator_id, "Progress stream client connecting");
    // Subscribe before the upgrade completes so no event after the 101 is missed
    let rx = state.engine.subscribe();
    ws.on_upgrade(move |socket| handle_socket(socket, rx, query.creator_id))
}

fn wanted(event: &ProgressEvent, filter: Option<&str>) -> bool {
    filter.is_none_or(|id| event.creator_id() == id)
}

async fn handle_socket(
    mut socket: WebSocket,
    mut rx: tokio::sync::broadcast::Receiver<ProgressEvent>,
    filter: Option<String>,
) {
    let hello = serde_json::json!({ "type": "subscribed", "creator_id": filter });
    if socket
        .send(Message::Text(hello.to_string().into()))
        .await
        .is_err()
    {
        warn!("Failed to send subscription ack, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !wanted(&event, filter.as_deref()) {
                            continue;
                        }
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "Progress stream client lagged behind broadcast");
                        let notice = serde_json::json!({ "type": "lagged", "missed": n });
                        if socket.send(Message::Text(notice.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Progress stream client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    debug!("Progress stream closed");
}
