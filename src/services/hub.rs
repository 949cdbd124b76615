use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    NewMessage,
    MessageSent,
    MessageRead,
    MessageError,
    UserTyping,
    NewBooking,
    BookingConfirmed,
    BookingCompleted,
    BookingCancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubEvent {
    pub event: EventKind,
    pub data: serde_json::Value,
}

/// Per-user fan-out to live WebSocket sessions.
///
/// Publishing never fails: a user without a subscribed session simply misses
/// the event and picks the data up later over the REST endpoints.
#[derive(Clone, Default)]
pub struct Hub {
    channels: Arc<RwLock<HashMap<Uuid, broadcast::Sender<HubEvent>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<HubEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Returns the number of sessions the event reached.
    pub async fn publish(&self, user_id: Uuid, event: EventKind, data: impl Serialize) -> usize {
        let data = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(user_id = %user_id, event = ?event, "Failed to encode event: {}", e);
                return 0;
            }
        };

        let channels = self.channels.read().await;
        let Some(sender) = channels.get(&user_id) else {
            tracing::debug!(user_id = %user_id, event = ?event, "No live session for event");
            return 0;
        };

        sender.send(HubEvent { event, data }).unwrap_or(0)
    }

    /// Drop the user's channel once no session is listening.
    pub async fn release(&self, user_id: Uuid) {
        let mut channels = self.channels.write().await;
        if channels
            .get(&user_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(&user_id);
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.channels
            .read()
            .await
            .get(&user_id)
            .is_some_and(|sender| sender.receiver_count() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn publish_reaches_only_the_addressed_user() {
        let hub = Hub::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let mut alice_rx = hub.subscribe(alice).await;
        let mut bob_rx = hub.subscribe(bob).await;

        let delivered = hub
            .publish(alice, EventKind::NewMessage, json!({ "content": "hi" }))
            .await;
        assert_eq!(delivered, 1);

        let event = alice_rx.recv().await.unwrap();
        assert_eq!(event.event, EventKind::NewMessage);
        assert_eq!(event.data["content"], "hi");
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publishing_to_offline_user_is_a_no_op() {
        let hub = Hub::new();
        let delivered = hub
            .publish(Uuid::new_v4(), EventKind::BookingConfirmed, json!({}))
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn every_session_of_a_user_receives_the_event() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let mut phone = hub.subscribe(user).await;
        let mut laptop = hub.subscribe(user).await;

        assert_eq!(hub.publish(user, EventKind::NewBooking, json!({ "seats": 2 })).await, 2);
        assert_eq!(phone.recv().await.unwrap().data["seats"], 2);
        assert_eq!(laptop.recv().await.unwrap().data["seats"], 2);
    }

    #[tokio::test]
    async fn release_keeps_channel_while_sessions_remain() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let first = hub.subscribe(user).await;
        let second = hub.subscribe(user).await;

        drop(first);
        hub.release(user).await;
        assert!(hub.is_online(user).await);

        drop(second);
        hub.release(user).await;
        assert!(!hub.is_online(user).await);
    }

    #[test]
    fn event_names_are_kebab_case() {
        let event = HubEvent {
            event: EventKind::BookingCancelled,
            data: json!(null),
        };
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["event"], "booking-cancelled");
    }
}
