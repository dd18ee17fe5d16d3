#![deny(missing_docs)]
//! Picam bot runtime.
//!
//! Transport-agnostic request pipeline: session tracking, update dispatch, the
//! bounded capture queue with its single camera worker, and inline answers.

/// Capture queue and worker.
pub mod capture;
/// Update dispatcher.
pub mod dispatcher;
/// Inbound event model.
pub mod event;
/// Inline answer service.
pub mod inline;
/// Pipeline wiring.
pub mod pipeline;
/// Per-user sessions.
pub mod session_store;
/// Outbound transport seam.
pub mod transport;

#[cfg(test)]
mod testing;

pub use capture::{capture_queue, spawn_capture_worker, CaptureQueue, CaptureRequest, CaptureWorker};
pub use dispatcher::{BotCommand, DispatchOutcome, DispatchSettings, UpdateDispatcher};
pub use event::{EventPayload, InboundEvent, IncomingInlineQuery, IncomingMessage, Sender};
pub use inline::{InlineAnswerService, InlineOutcome};
pub use pipeline::{Pipeline, PipelineDeps};
pub use session_store::SessionStore;
pub use transport::{BotTransport, ChatAction, ChatTarget, InlinePhoto, ReplyOptions, TransportError};
