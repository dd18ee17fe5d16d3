//! Update dispatcher: authorization, de-duplication and command routing.

use crate::capture::{CaptureQueue, CaptureRequest};
use crate::event::{EventPayload, InboundEvent, IncomingMessage};
use crate::inline::{InlineAnswerService, InlineOutcome};
use crate::session_store::{Admission, SessionStatus, SessionStore};
use crate::transport::{BotTransport, ChatAction, ChatTarget, ReplyOptions, TextFormat};
use picam_bot_core::config::{CameraParams, CameraSettings};
use picam_bot_core::diagnostics::DiagnosticsSink;
use picam_bot_core::utils::ProcessInfo;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// `/start` command
pub const COMMAND_START: &str = "/start";
/// `/capture` command
pub const COMMAND_CAPTURE: &str = "/capture";
/// `/status` command
pub const COMMAND_STATUS: &str = "/status";
/// `/help` command
pub const COMMAND_HELP: &str = "/help";

const MESSAGE_DEFAULT: &str = "Input your command:";
const MESSAGE_UNKNOWN_COMMAND: &str = "Unknown command.";

/// Command recognized from message text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// Greeting
    Start,
    /// Take a photo
    Capture,
    /// Uptime and memory usage
    Status,
    /// Command list
    Help,
    /// Anything else, with the original text
    Unknown(String),
}

impl BotCommand {
    /// Classify text by command prefix
    #[must_use]
    pub fn classify(text: &str) -> Self {
        if text.starts_with(COMMAND_START) {
            Self::Start
        } else if text.starts_with(COMMAND_CAPTURE) {
            Self::Capture
        } else if text.starts_with(COMMAND_STATUS) {
            Self::Status
        } else if text.starts_with(COMMAND_HELP) {
            Self::Help
        } else {
            Self::Unknown(text.to_string())
        }
    }

    /// Name recorded in usage logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => COMMAND_START,
            Self::Capture => COMMAND_CAPTURE,
            Self::Status => COMMAND_STATUS,
            Self::Help => COMMAND_HELP,
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Reply keyboard offered with every answer
#[must_use]
pub fn main_keyboard() -> Vec<Vec<String>> {
    vec![
        vec![COMMAND_CAPTURE.to_string()],
        vec![COMMAND_STATUS.to_string(), COMMAND_HELP.to_string()],
    ]
}

/// Options attached to every reply: HTML text and the resized main keyboard
#[must_use]
pub fn default_reply_options() -> ReplyOptions {
    ReplyOptions {
        keyboard: main_keyboard(),
        resize_keyboard: true,
        format: TextFormat::Html,
        caption: None,
    }
}

/// Static command list
#[must_use]
pub fn help_text() -> String {
    format!(
        "Following commands are supported:\n\n\
         <b>For Raspberry Pi Camera Module</b>\n\n\
         {COMMAND_CAPTURE} : capture a still image with <b>raspistill</b>\n\n\
         <b>Others</b>\n\n\
         {COMMAND_STATUS} : show this bot's status\n\
         {COMMAND_HELP} : show this help message"
    )
}

/// Uptime and memory usage of this process
#[must_use]
pub fn status_text(process: &ProcessInfo) -> String {
    format!(
        "Uptime: {}\nMemory Usage: {}",
        process.uptime_text(),
        process.memory_usage()
    )
}

fn unknown_command_text(text: &str) -> String {
    if text.is_empty() {
        MESSAGE_UNKNOWN_COMMAND.to_string()
    } else {
        format!(
            "<b>{}</b>: {MESSAGE_UNKNOWN_COMMAND}",
            html_escape::encode_text(text)
        )
    }
}

/// Immutable process-wide settings the dispatcher needs
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Authorized usernames
    pub allowed_users: Arc<HashSet<String>>,
    /// Default capture width
    pub image_width: u32,
    /// Default capture height
    pub image_height: u32,
    /// Default capture tool options
    pub camera_params: CameraParams,
    /// Replace captures with the maintenance message
    pub is_in_maintenance: bool,
    /// Text sent instead of photos during maintenance
    pub maintenance_message: String,
}

impl From<&CameraSettings> for DispatchSettings {
    fn from(settings: &CameraSettings) -> Self {
        Self {
            allowed_users: Arc::new(settings.allowed_users()),
            image_width: settings.image_width(),
            image_height: settings.image_height(),
            camera_params: settings.camera_params.clone(),
            is_in_maintenance: settings.is_in_maintenance,
            maintenance_message: settings.maintenance_message().to_string(),
        }
    }
}

/// What happened to one inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A text reply was attempted for the command
    Replied {
        /// Command answered
        command: BotCommand,
        /// Whether the transport accepted the reply
        delivered: bool,
    },
    /// A capture request was queued
    Enqueued,
    /// Capture refused with the maintenance message
    Maintenance,
    /// The worker is gone; the capture was not queued
    QueueClosed,
    /// Sender not authorized; nothing was sent
    Unauthorized,
    /// Authorized sender without a session
    UnknownSession,
    /// Update id repeated; nothing was sent
    Duplicate(u64),
    /// Inline query handled by the inline answer service
    Inline(InlineOutcome),
}

/// Routes inbound events one at a time
pub struct UpdateDispatcher<T: BotTransport> {
    transport: Arc<T>,
    sessions: Arc<SessionStore>,
    queue: CaptureQueue,
    inline: InlineAnswerService<T>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    settings: DispatchSettings,
    process: ProcessInfo,
}

impl<T: BotTransport> UpdateDispatcher<T> {
    /// Create a dispatcher
    pub fn new(
        transport: Arc<T>,
        sessions: Arc<SessionStore>,
        queue: CaptureQueue,
        inline: InlineAnswerService<T>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            transport,
            sessions,
            queue,
            inline,
            diagnostics,
            settings,
            process: ProcessInfo::new(),
        }
    }

    /// Session store backing this dispatcher
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Handle one event to completion
    pub async fn handle_event(&self, event: InboundEvent) -> DispatchOutcome {
        match event.payload {
            EventPayload::Message(message) => self.handle_message(event.update_id, message).await,
            EventPayload::InlineQuery(query) => {
                DispatchOutcome::Inline(self.inline.answer(&query).await)
            }
        }
    }

    async fn handle_message(&self, update_id: u64, message: IncomingMessage) -> DispatchOutcome {
        let user_id = match message.from.authorized_id(&self.settings.allowed_users) {
            Ok(user_id) => user_id,
            Err(rejection) => {
                self.diagnostics.log_error(&format!("Message - {rejection}"));
                return DispatchOutcome::Unauthorized;
            }
        };

        // Held until the reply is sent or the request is queued.
        let mut sessions = self.sessions.lock().await;
        let session = match sessions.admit(user_id, update_id) {
            Admission::Accepted(session) => session,
            Admission::Duplicate(id) => {
                self.diagnostics
                    .log_error(&format!("Duplicated update id: {id}"));
                return DispatchOutcome::Duplicate(id);
            }
            Admission::UnknownUser => {
                self.diagnostics
                    .log_error(&format!("Session does not exist for id: {user_id}"));
                return DispatchOutcome::UnknownSession;
            }
        };

        let text = message.text.as_deref().unwrap_or_default();
        let command = match session.status {
            SessionStatus::Waiting => BotCommand::classify(text),
        };
        self.diagnostics.log_usage(user_id, command.name());
        debug!(user = %user_id, update_id, command = command.name(), "Dispatching command");

        let outcome = match command {
            BotCommand::Capture => self.handle_capture(user_id, message.chat).await,
            BotCommand::Start => self.reply(message.chat, command, MESSAGE_DEFAULT).await,
            BotCommand::Status => {
                let text = status_text(&self.process);
                self.reply(message.chat, command, &text).await
            }
            BotCommand::Help => self.reply(message.chat, command, &help_text()).await,
            BotCommand::Unknown(ref raw) => {
                let text = unknown_command_text(raw);
                self.reply(message.chat, command.clone(), &text).await
            }
        };

        drop(sessions);
        outcome
    }

    async fn handle_capture(&self, user_id: &str, chat: ChatTarget) -> DispatchOutcome {
        self.send_typing(chat).await;

        if self.settings.is_in_maintenance {
            if let Err(e) = self
                .transport
                .send_message(chat, &self.settings.maintenance_message, &default_reply_options())
                .await
            {
                self.diagnostics
                    .log_error(&format!("Failed to send maintenance message: {e}"));
            }
            return DispatchOutcome::Maintenance;
        }

        let request = CaptureRequest {
            requester_id: user_id.to_string(),
            destination: chat,
            width: self.settings.image_width,
            height: self.settings.image_height,
            camera_params: self.settings.camera_params.clone(),
            reply_options: default_reply_options(),
        };

        if self.queue.pending() >= self.queue.capacity() {
            warn!(user = %user_id, "Capture queue is full, waiting for a free slot");
        }

        match self.queue.enqueue(request).await {
            Ok(()) => DispatchOutcome::Enqueued,
            Err(e) => {
                self.diagnostics
                    .log_error(&format!("Failed to queue capture request: {e}"));
                DispatchOutcome::QueueClosed
            }
        }
    }

    async fn reply(&self, chat: ChatTarget, command: BotCommand, text: &str) -> DispatchOutcome {
        self.send_typing(chat).await;

        let delivered = match self
            .transport
            .send_message(chat, text, &default_reply_options())
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.diagnostics
                    .log_error(&format!("Failed to send message: {e}"));
                false
            }
        };

        DispatchOutcome::Replied { command, delivered }
    }

    async fn send_typing(&self, chat: ChatTarget) {
        if let Err(e) = self
            .transport
            .send_chat_action(chat, ChatAction::Typing)
            .await
        {
            debug!(error = %e, "Failed to send typing action");
        }
    }
}
