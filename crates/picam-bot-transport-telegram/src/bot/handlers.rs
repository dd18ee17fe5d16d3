use picam_bot_runtime::event::{
    EventPayload, InboundEvent, IncomingInlineQuery, IncomingMessage, Sender,
};
use picam_bot_runtime::transport::ChatTarget;
use teloxide::types::{InlineQuery, Message, User};

/// Sender built from an optional username and a display name.
///
/// A leading `@` is dropped and an empty username counts as none.
#[must_use]
pub fn sender_from_parts(username: Option<&str>, first_name: &str) -> Sender {
    let username = username
        .map(|name| name.trim_start_matches('@'))
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    let display_name = if first_name.is_empty() {
        "Unknown".to_string()
    } else {
        first_name.to_string()
    };

    Sender {
        username,
        display_name,
    }
}

/// Sender of a Telegram user.
#[must_use]
pub fn sender_from_user(user: &User) -> Sender {
    sender_from_parts(user.username.as_deref(), &user.first_name)
}

/// Pipeline event for a chat message.
///
/// Messages without an author (channel posts) get an anonymous sender and are
/// rejected by the dispatcher.
#[must_use]
pub fn message_event(update_id: u64, msg: &Message) -> InboundEvent {
    let from = msg
        .from
        .as_ref()
        .map_or_else(|| sender_from_parts(None, ""), sender_from_user);

    InboundEvent {
        update_id,
        payload: EventPayload::Message(IncomingMessage {
            from,
            chat: ChatTarget(msg.chat.id.0),
            text: msg.text().map(str::to_string),
        }),
    }
}

/// Pipeline event for an inline query.
#[must_use]
pub fn inline_query_event(update_id: u64, query: &InlineQuery) -> InboundEvent {
    InboundEvent {
        update_id,
        payload: EventPayload::InlineQuery(IncomingInlineQuery {
            id: query.id.0.clone(),
            from: sender_from_user(&query.from),
            query: query.query.clone(),
        }),
    }
}
