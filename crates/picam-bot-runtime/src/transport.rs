//! Outbound side of the chat transport as seen by the pipeline.

use async_trait::async_trait;
use thiserror::Error;

/// Opaque reply destination (a chat)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatTarget(pub i64);

/// Presence indicator shown to the user while work is in progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    /// "typing..."
    Typing,
    /// "sending photo..."
    UploadPhoto,
}

/// How message text should be interpreted by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextFormat {
    /// Telegram HTML subset
    #[default]
    Html,
    /// No markup
    Plain,
}

/// Presentation options attached to outgoing messages and photos
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplyOptions {
    /// Reply keyboard rows, one button label per entry
    pub keyboard: Vec<Vec<String>>,
    /// Ask the client to shrink the keyboard to fit its buttons
    pub resize_keyboard: bool,
    /// Text interpretation
    pub format: TextFormat,
    /// Photo caption
    pub caption: Option<String>,
}

impl ReplyOptions {
    /// Same options with the given caption
    #[must_use]
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }
}

/// A previously delivered photo offered as an inline suggestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinePhoto {
    /// Remote file handle of the photo
    pub file_id: String,
    /// Caption shown with the photo
    pub caption: String,
}

/// Errors reported by transport calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request was rejected or could not be delivered
    #[error("transport request failed: {0}")]
    Request(String),
    /// A photo upload was acknowledged without a usable file handle
    #[error("upload acknowledged without a photo")]
    MissingPhoto,
}

/// Transport adapter used by the dispatcher, the capture worker and the inline
/// answer service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BotTransport: Send + Sync + 'static {
    /// Send a text message
    async fn send_message(
        &self,
        chat: ChatTarget,
        text: &str,
        options: &ReplyOptions,
    ) -> Result<(), TransportError>;

    /// Show a presence indicator
    async fn send_chat_action(
        &self,
        chat: ChatTarget,
        action: ChatAction,
    ) -> Result<(), TransportError>;

    /// Upload an image and return the remote file handle of the stored photo
    async fn send_photo(
        &self,
        chat: ChatTarget,
        image: Vec<u8>,
        options: &ReplyOptions,
    ) -> Result<String, TransportError>;

    /// Answer an inline query with cached photos, in order
    async fn answer_inline_query(
        &self,
        query_id: &str,
        photos: Vec<InlinePhoto>,
    ) -> Result<(), TransportError>;
}
