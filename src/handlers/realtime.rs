//! WebSocket relay. Clients authenticate with `?token=` and then exchange
//! `{"event": ..., "data": ...}` frames.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::hub::{EventKind, HubEvent};
use crate::services::messaging::{self, OutgoingMessage};
use crate::utils::jwt::verify_token;
use crate::AppState;

const DIRECT_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
enum ClientFrame {
    SendMessage(OutgoingMessage),
    Typing { receiver_id: Uuid },
    StopTyping { receiver_id: Uuid },
    MarkRead { message_id: Uuid },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> AppResult<Response> {
    let claims = verify_token(&query.token, &state.config.jwt_secret)?;
    let user_id = claims.sub;

    Ok(ws.on_upgrade(move |socket| session(socket, state, user_id)))
}

async fn session(socket: WebSocket, state: AppState, user_id: Uuid) {
    tracing::info!(user_id = %user_id, "WebSocket connected");

    let (mut sink, mut stream) = socket.split();
    let mut events = state.hub.subscribe(user_id).await;
    // Replies meant only for this session
    let (direct_tx, mut direct_rx) = mpsc::channel::<HubEvent>(DIRECT_BUFFER);

    let forward = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id = %user_id, skipped, "WebSocket session lagging, events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                direct = direct_rx.recv() => match direct {
                    Some(event) => event,
                    None => break,
                },
            };

            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => handle_frame(&state, user_id, text.as_str(), &direct_tx).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    forward.abort();
    let _ = forward.await;
    state.hub.release(user_id).await;

    tracing::info!(user_id = %user_id, "WebSocket disconnected");
}

async fn handle_frame(state: &AppState, user_id: Uuid, text: &str, direct: &mpsc::Sender<HubEvent>) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(user_id = %user_id, "Unreadable WebSocket frame: {}", e);
            reply(direct, EventKind::MessageError, json!({ "error": "Unrecognized event" })).await;
            return;
        }
    };

    match frame {
        ClientFrame::SendMessage(outgoing) => match messaging::send(state, user_id, outgoing).await {
            Ok(message) => reply(direct, EventKind::MessageSent, json!(message)).await,
            Err(e) => reply(direct, EventKind::MessageError, json!({ "error": e.to_string() })).await,
        },
        ClientFrame::Typing { receiver_id } => {
            typing(state, user_id, receiver_id, true).await;
        }
        ClientFrame::StopTyping { receiver_id } => {
            typing(state, user_id, receiver_id, false).await;
        }
        ClientFrame::MarkRead { message_id } => {
            if let Err(e) = messaging::mark_read(state, user_id, message_id).await {
                reply(direct, EventKind::MessageError, json!({ "error": e.to_string() })).await;
            }
        }
    }
}

async fn typing(state: &AppState, user_id: Uuid, receiver_id: Uuid, is_typing: bool) {
    state
        .hub
        .publish(
            receiver_id,
            EventKind::UserTyping,
            json!({ "user_id": user_id, "is_typing": is_typing }),
        )
        .await;
}

async fn reply(direct: &mpsc::Sender<HubEvent>, event: EventKind, data: serde_json::Value) {
    // The session is closing if the forwarder is gone
    let _ = direct.send(HubEvent { event, data }).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_frame() {
        let receiver = Uuid::new_v4();
        let text = format!(
            r#"{{"event":"send-message","data":{{"receiver_id":"{}","content":"Running 5 min late"}}}}"#,
            receiver
        );

        match serde_json::from_str::<ClientFrame>(&text).unwrap() {
            ClientFrame::SendMessage(outgoing) => {
                assert_eq!(outgoing.receiver_id, receiver);
                assert_eq!(outgoing.content, "Running 5 min late");
                assert_eq!(outgoing.ride_id, None);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn typing_frames() {
        let receiver = Uuid::new_v4();
        let start = format!(r#"{{"event":"typing","data":{{"receiver_id":"{}"}}}}"#, receiver);
        let stop = format!(r#"{{"event":"stop-typing","data":{{"receiver_id":"{}"}}}}"#, receiver);

        assert_eq!(
            serde_json::from_str::<ClientFrame>(&start).unwrap(),
            ClientFrame::Typing { receiver_id: receiver }
        );
        assert_eq!(
            serde_json::from_str::<ClientFrame>(&stop).unwrap(),
            ClientFrame::StopTyping { receiver_id: receiver }
        );
    }

    #[test]
    fn unknown_event_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"event":"join-room","data":{}}"#).is_err());
    }
}
