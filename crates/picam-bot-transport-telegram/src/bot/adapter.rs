use async_trait::async_trait;
use picam_bot_runtime::transport::{
    BotTransport, ChatAction, ChatTarget, InlinePhoto, ReplyOptions, TextFormat, TransportError,
};
use teloxide::prelude::*;
use teloxide::types::{
    ChatAction as TgChatAction, ChatId, FileId, InlineQueryId, InlineQueryResult,
    InlineQueryResultCachedPhoto, InputFile, KeyboardButton, KeyboardMarkup, ParseMode, PhotoSize,
};
use tracing::debug;
use uuid::Uuid;

const PHOTO_FILE_NAME: &str = "capture.jpg";

/// Pipeline transport backed by the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    /// Wrap a bot client.
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Reply keyboard for the given rows, or `None` when there are no buttons.
#[must_use]
pub fn reply_keyboard(rows: &[Vec<String>], resize: bool) -> Option<KeyboardMarkup> {
    if rows.iter().all(Vec::is_empty) {
        return None;
    }

    let keyboard: Vec<Vec<KeyboardButton>> = rows
        .iter()
        .map(|row| row.iter().map(KeyboardButton::new).collect())
        .collect();
    let markup = KeyboardMarkup::new(keyboard);
    Some(if resize { markup.resize_keyboard() } else { markup })
}

/// Bot API parse mode for a text format.
#[must_use]
pub const fn parse_mode(format: TextFormat) -> Option<ParseMode> {
    match format {
        TextFormat::Html => Some(ParseMode::Html),
        TextFormat::Plain => None,
    }
}

/// Inline results offering cached photos, in the given order.
#[must_use]
pub fn inline_results(photos: Vec<InlinePhoto>) -> Vec<InlineQueryResult> {
    photos
        .into_iter()
        .map(|photo| {
            InlineQueryResult::CachedPhoto(
                InlineQueryResultCachedPhoto::new(
                    Uuid::new_v4().to_string(),
                    FileId(photo.file_id),
                )
                .caption(photo.caption),
            )
        })
        .collect()
}

fn largest_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes
        .iter()
        .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
}

fn request_error(e: &teloxide::RequestError) -> TransportError {
    TransportError::Request(e.to_string())
}

#[async_trait]
impl BotTransport for TelegramTransport {
    async fn send_message(
        &self,
        chat: ChatTarget,
        text: &str,
        options: &ReplyOptions,
    ) -> Result<(), TransportError> {
        let mut req = self.bot.send_message(ChatId(chat.0), text);
        if let Some(pm) = parse_mode(options.format) {
            req = req.parse_mode(pm);
        }
        if let Some(keyboard) = reply_keyboard(&options.keyboard, options.resize_keyboard) {
            req = req.reply_markup(keyboard);
        }
        req.await.map(|_| ()).map_err(|e| request_error(&e))
    }

    async fn send_chat_action(
        &self,
        chat: ChatTarget,
        action: ChatAction,
    ) -> Result<(), TransportError> {
        let action = match action {
            ChatAction::Typing => TgChatAction::Typing,
            ChatAction::UploadPhoto => TgChatAction::UploadPhoto,
        };
        self.bot
            .send_chat_action(ChatId(chat.0), action)
            .await
            .map(|_| ())
            .map_err(|e| request_error(&e))
    }

    async fn send_photo(
        &self,
        chat: ChatTarget,
        image: Vec<u8>,
        options: &ReplyOptions,
    ) -> Result<String, TransportError> {
        let photo = InputFile::memory(image).file_name(PHOTO_FILE_NAME);
        let mut req = self.bot.send_photo(ChatId(chat.0), photo);
        if let Some(caption) = &options.caption {
            req = req.caption(caption.clone());
        }
        if let Some(keyboard) = reply_keyboard(&options.keyboard, options.resize_keyboard) {
            req = req.reply_markup(keyboard);
        }

        let sent = req.await.map_err(|e| request_error(&e))?;
        let file_id = sent
            .photo()
            .and_then(largest_photo)
            .map(|size| size.file.id.0.clone())
            .ok_or(TransportError::MissingPhoto)?;

        debug!(chat_id = chat.0, file_id = %file_id, "Photo uploaded");
        Ok(file_id)
    }

    async fn answer_inline_query(
        &self,
        query_id: &str,
        photos: Vec<InlinePhoto>,
    ) -> Result<(), TransportError> {
        self.bot
            .answer_inline_query(InlineQueryId(query_id.to_string()), inline_results(photos))
            .is_personal(true)
            .await
            .map(|_| ())
            .map_err(|e| request_error(&e))
    }
}
