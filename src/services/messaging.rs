use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::entities::{message, user};
use crate::error::{AppError, AppResult};
use crate::services::hub::EventKind;
use crate::services::policy::{self, Action, Resource};
use crate::AppState;

pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutgoingMessage {
    pub receiver_id: Uuid,
    pub content: String,
    pub ride_id: Option<Uuid>,
    pub ride_request_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub counterpart_id: Uuid,
    pub last_message: message::Model,
    pub unread_count: u64,
}

fn check_content(content: &str) -> AppResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Message content is required".to_string()));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::Validation(format!(
            "Message cannot exceed {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(content.to_string())
}

/// Store the message, then push it to the receiver's live sessions.
pub async fn send(state: &AppState, sender: Uuid, outgoing: OutgoingMessage) -> AppResult<message::Model> {
    let content = check_content(&outgoing.content)?;

    if outgoing.receiver_id == sender {
        return Err(AppError::Validation("You cannot message yourself".to_string()));
    }

    user::Entity::find_by_id(outgoing.receiver_id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Receiver not found".to_string()))?;

    let new_message = message::ActiveModel {
        id: Set(Uuid::new_v4()),
        sender_id: Set(sender),
        receiver_id: Set(outgoing.receiver_id),
        ride_id: Set(outgoing.ride_id),
        ride_request_id: Set(outgoing.ride_request_id),
        content: Set(content),
        sent_at: Set(Utc::now().fixed_offset()),
        read_at: Set(None),
    };
    let message = new_message.insert(&*state.db).await?;

    tracing::debug!(message_id = %message.id, sender = %sender, receiver = %message.receiver_id, "Message sent");

    state
        .hub
        .publish(message.receiver_id, EventKind::NewMessage, &message)
        .await;

    Ok(message)
}

/// Mark a message read. Repeated calls keep the first read time.
pub async fn mark_read(state: &AppState, actor: Uuid, message_id: Uuid) -> AppResult<message::Model> {
    let message = message::Entity::find_by_id(message_id)
        .one(&*state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Message not found".to_string()))?;

    policy::authorize(actor, Resource::Message(&message), Action::MarkRead)?;

    if message.read_at.is_some() {
        return Ok(message);
    }

    let mut active: message::ActiveModel = message.into();
    active.read_at = Set(Some(Utc::now().fixed_offset()));
    let message = active.update(&*state.db).await?;

    state
        .hub
        .publish(
            message.sender_id,
            EventKind::MessageRead,
            json!({ "message_id": message.id, "read_at": message.read_at }),
        )
        .await;

    Ok(message)
}

/// Messages exchanged between two users, oldest first.
pub async fn history<C: ConnectionTrait>(db: &C, user_id: Uuid, other_id: Uuid) -> AppResult<Vec<message::Model>> {
    let messages = message::Entity::find()
        .filter(
            Condition::any()
                .add(
                    Condition::all()
                        .add(message::Column::SenderId.eq(user_id))
                        .add(message::Column::ReceiverId.eq(other_id)),
                )
                .add(
                    Condition::all()
                        .add(message::Column::SenderId.eq(other_id))
                        .add(message::Column::ReceiverId.eq(user_id)),
                ),
        )
        .order_by_asc(message::Column::SentAt)
        .all(db)
        .await?;

    Ok(messages)
}

pub async fn conversations<C: ConnectionTrait>(db: &C, user_id: Uuid) -> AppResult<Vec<Conversation>> {
    let messages = message::Entity::find()
        .filter(
            Condition::any()
                .add(message::Column::SenderId.eq(user_id))
                .add(message::Column::ReceiverId.eq(user_id)),
        )
        .order_by_desc(message::Column::SentAt)
        .all(db)
        .await?;

    Ok(group_conversations(user_id, messages))
}

/// Group newest-first messages by counterpart. The result keeps that order.
fn group_conversations(user_id: Uuid, messages: Vec<message::Model>) -> Vec<Conversation> {
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    let mut conversations: Vec<Conversation> = Vec::new();

    for message in messages {
        let counterpart_id = message.counterpart(user_id);
        let unread = message.receiver_id == user_id && message.read_at.is_none();

        match index.get(&counterpart_id) {
            Some(&i) => {
                if unread {
                    conversations[i].unread_count += 1;
                }
            }
            None => {
                index.insert(counterpart_id, conversations.len());
                conversations.push(Conversation {
                    counterpart_id,
                    unread_count: u64::from(unread),
                    last_message: message,
                });
            }
        }
    }

    conversations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(sender: Uuid, receiver: Uuid, minutes_ago: i64, read: bool) -> message::Model {
        let sent_at = (Utc::now() - Duration::minutes(minutes_ago)).fixed_offset();
        message::Model {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: receiver,
            ride_id: None,
            ride_request_id: None,
            content: format!("sent {} minutes ago", minutes_ago),
            sent_at,
            read_at: read.then_some(sent_at),
        }
    }

    #[test]
    fn content_is_trimmed_and_required() {
        assert_eq!(check_content("  hello ").unwrap(), "hello");
        assert!(matches!(check_content(" \n "), Err(AppError::Validation(_))));
        assert!(check_content(&"x".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
    }

    #[test]
    fn conversations_keep_latest_message_and_count_unread() {
        let me = Uuid::new_v4();
        let driver = Uuid::new_v4();
        let rider = Uuid::new_v4();

        // newest first, as loaded
        let messages = vec![
            message(driver, me, 1, false),
            message(me, rider, 2, false),
            message(driver, me, 3, false),
            message(me, driver, 4, false),
            message(rider, me, 5, true),
        ];
        let latest_with_driver = messages[0].id;

        let grouped = group_conversations(me, messages);
        assert_eq!(grouped.len(), 2);

        assert_eq!(grouped[0].counterpart_id, driver);
        assert_eq!(grouped[0].last_message.id, latest_with_driver);
        assert_eq!(grouped[0].unread_count, 2);

        assert_eq!(grouped[1].counterpart_id, rider);
        assert_eq!(grouped[1].unread_count, 0);
    }

    #[test]
    fn own_unread_messages_do_not_count() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let grouped = group_conversations(me, vec![message(me, other, 1, false)]);
        assert_eq!(grouped[0].unread_count, 0);
    }
}
