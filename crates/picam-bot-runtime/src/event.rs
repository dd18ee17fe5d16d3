//! Inbound events delivered by the polling loop.

use crate::transport::ChatTarget;
use std::collections::HashSet;
use std::fmt;

/// Author of an inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Username, the identity checked against the authorized set
    pub username: Option<String>,
    /// Display name, only used in diagnostics
    pub display_name: String,
}

/// Why a sender was turned away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The account has no username to authorize
    NoUsername(String),
    /// The username is not in the authorized set
    NotAllowed(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoUsername(name) => write!(f, "user not allowed (has no username): {name}"),
            Self::NotAllowed(id) => write!(f, "id not allowed: {id}"),
        }
    }
}

impl Sender {
    /// Returns the authorized identifier of this sender
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] when the sender has no username or is not allowed.
    pub fn authorized_id<'a>(&'a self, allowed: &HashSet<String>) -> Result<&'a str, Rejection> {
        let Some(username) = self.username.as_deref() else {
            return Err(Rejection::NoUsername(self.display_name.clone()));
        };
        if allowed.contains(username) {
            Ok(username)
        } else {
            Err(Rejection::NotAllowed(username.to_string()))
        }
    }
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Author
    pub from: Sender,
    /// Chat to reply to
    pub chat: ChatTarget,
    /// Text, absent for stickers, photos and the like
    pub text: Option<String>,
}

/// An inline query typed in any chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingInlineQuery {
    /// Query identifier used for answering
    pub id: String,
    /// Author
    pub from: Sender,
    /// Text typed after the bot name
    pub query: String,
}

/// Event content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Chat message
    Message(IncomingMessage),
    /// Inline query
    InlineQuery(IncomingInlineQuery),
}

/// One update from the transport, with its ordinal identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Ordinal update identifier, used for de-duplication
    pub update_id: u64,
    /// Content
    pub payload: EventPayload,
}
