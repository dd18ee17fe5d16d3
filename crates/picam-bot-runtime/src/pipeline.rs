//! Wiring of the dispatcher, capture queue and worker.

use crate::capture::{capture_queue, spawn_capture_worker, CaptureStats, CaptureWorker};
use crate::dispatcher::{DispatchSettings, UpdateDispatcher};
use crate::inline::InlineAnswerService;
use crate::session_store::SessionStore;
use crate::transport::BotTransport;
use picam_bot_core::camera::Camera;
use picam_bot_core::config::CAPTURE_QUEUE_CAPACITY;
use picam_bot_core::diagnostics::DiagnosticsSink;
use picam_bot_core::storage::PhotoStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Collaborators shared by every stage
pub struct PipelineDeps<T: BotTransport> {
    /// Outbound transport
    pub transport: Arc<T>,
    /// Capture helper
    pub camera: Arc<dyn Camera>,
    /// Photo metadata store
    pub store: Arc<dyn PhotoStore>,
    /// Diagnostics sink
    pub diagnostics: Arc<dyn DiagnosticsSink>,
}

/// A running pipeline: the dispatcher plus its background capture worker
pub struct Pipeline<T: BotTransport> {
    /// Event entry point
    pub dispatcher: Arc<UpdateDispatcher<T>>,
    worker: JoinHandle<CaptureStats>,
    cancel: CancellationToken,
}

impl<T: BotTransport> Pipeline<T> {
    /// Build every stage and spawn the capture worker.
    ///
    /// One session is created per authorized user.
    pub fn start(
        deps: PipelineDeps<T>,
        settings: DispatchSettings,
        capture_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let (queue, rx) = capture_queue(CAPTURE_QUEUE_CAPACITY);
        let sessions = Arc::new(SessionStore::new(settings.allowed_users.iter().cloned()));

        let worker = CaptureWorker::new(
            deps.transport.clone(),
            deps.camera,
            deps.store.clone(),
            deps.diagnostics.clone(),
            capture_timeout,
        );
        let worker = spawn_capture_worker(worker, rx, cancel.clone());

        let inline = InlineAnswerService::new(
            deps.transport.clone(),
            deps.store,
            deps.diagnostics.clone(),
            settings.allowed_users.clone(),
        );
        let dispatcher = Arc::new(UpdateDispatcher::new(
            deps.transport,
            sessions,
            queue,
            inline,
            deps.diagnostics,
            settings,
        ));

        Self {
            dispatcher,
            worker,
            cancel,
        }
    }

    /// Stop the worker once the requests already queued are served and return
    /// its counters. Later enqueues fail with `QueueClosed`.
    pub async fn shutdown(self) -> CaptureStats {
        self.cancel.cancel();
        drop(self.dispatcher);
        self.worker.await.unwrap_or_default()
    }
}
