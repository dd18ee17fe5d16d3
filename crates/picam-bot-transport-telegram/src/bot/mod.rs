/// `BotTransport` implementation on top of the Bot API
pub mod adapter;
/// Conversion of Telegram updates into pipeline events
pub mod handlers;

pub use adapter::TelegramTransport;
