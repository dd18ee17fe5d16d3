//! Inline answers built from previously delivered photos.

use crate::event::IncomingInlineQuery;
use crate::transport::{BotTransport, InlinePhoto};
use picam_bot_core::config::LATEST_PHOTOS_LIMIT;
use picam_bot_core::diagnostics::DiagnosticsSink;
use picam_bot_core::storage::PhotoStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Result of answering one inline query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineOutcome {
    /// Answered with this many photos (possibly zero)
    Answered(usize),
    /// Sender rejected before any store access
    Unauthorized,
    /// The store could not be read
    StoreFailed,
    /// The transport refused the answer
    AnswerFailed,
}

/// Serves cached-photo suggestions, independent of the capture path
pub struct InlineAnswerService<T: BotTransport> {
    transport: Arc<T>,
    store: Arc<dyn PhotoStore>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    allowed: Arc<HashSet<String>>,
    limit: usize,
}

impl<T: BotTransport> InlineAnswerService<T> {
    /// Create a service answering with up to [`LATEST_PHOTOS_LIMIT`] photos
    pub fn new(
        transport: Arc<T>,
        store: Arc<dyn PhotoStore>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        allowed: Arc<HashSet<String>>,
    ) -> Self {
        Self {
            transport,
            store,
            diagnostics,
            allowed,
            limit: LATEST_PHOTOS_LIMIT,
        }
    }

    /// Answer with the requester's most recent photos, newest first
    pub async fn answer(&self, query: &IncomingInlineQuery) -> InlineOutcome {
        let user_id = match query.from.authorized_id(&self.allowed) {
            Ok(user_id) => user_id,
            Err(rejection) => {
                self.diagnostics
                    .log_error(&format!("Inline Query - {rejection}"));
                return InlineOutcome::Unauthorized;
            }
        };

        let records = match self.store.get_photos(user_id, self.limit).await {
            Ok(records) => records,
            Err(e) => {
                self.diagnostics
                    .log_error(&format!("Failed to load photos for inline query: {e}"));
                return InlineOutcome::StoreFailed;
            }
        };

        if records.is_empty() {
            self.diagnostics
                .log_error("No cached photos for inline query.");
        }

        let photos: Vec<InlinePhoto> = records
            .into_iter()
            .map(|record| InlinePhoto {
                file_id: record.file_id,
                caption: record.caption,
            })
            .collect();
        let count = photos.len();
        debug!(user = %user_id, count, "Answering inline query");

        match self.transport.answer_inline_query(&query.id, photos).await {
            Ok(()) => InlineOutcome::Answered(count),
            Err(e) => {
                self.diagnostics
                    .log_error(&format!("Failed to answer inline query: {e}"));
                InlineOutcome::AnswerFailed
            }
        }
    }
}
