//! Bounded capture queue and the single worker that owns the camera.

use crate::transport::{BotTransport, ChatAction, ChatTarget, ReplyOptions, TextFormat};
use chrono::Local;
use picam_bot_core::camera::{Camera, CameraError};
use picam_bot_core::config::CameraParams;
use picam_bot_core::diagnostics::DiagnosticsSink;
use picam_bot_core::storage::PhotoStore;
use picam_bot_core::utils::capture_caption;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One pending capture-and-deliver operation
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    /// Authorized user the photo is recorded for
    pub requester_id: String,
    /// Where the photo or failure message goes
    pub destination: ChatTarget,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Extra options for the capture tool
    pub camera_params: CameraParams,
    /// Presentation options for the reply; the caption is filled in by the worker
    pub reply_options: ReplyOptions,
}

/// The capture worker has stopped and no longer accepts requests
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("capture worker is not running")]
pub struct QueueClosed;

/// Producer side of the bounded capture queue
#[derive(Debug, Clone)]
pub struct CaptureQueue {
    tx: mpsc::Sender<CaptureRequest>,
}

/// Consumer side of the bounded capture queue
pub type CaptureReceiver = mpsc::Receiver<CaptureRequest>;

/// Create a FIFO capture queue holding at most `capacity` pending requests.
///
/// A zero capacity is raised to one.
#[must_use]
pub fn capture_queue(capacity: usize) -> (CaptureQueue, CaptureReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (CaptureQueue { tx }, rx)
}

impl CaptureQueue {
    /// Submit a request, waiting for a free slot while the queue is full
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] when the worker has shut down.
    pub async fn enqueue(&self, request: CaptureRequest) -> Result<(), QueueClosed> {
        self.tx.send(request).await.map_err(|_| QueueClosed)
    }

    /// Maximum number of pending requests
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of requests waiting for the worker
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Terminal outcome of one capture request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Photo uploaded; `recorded` tells whether its metadata was persisted
    Delivered {
        /// Remote handle of the uploaded photo
        file_id: String,
        /// Whether the metadata record was saved
        recorded: bool,
    },
    /// The camera failed; `notified` tells whether the user got the error text
    CaptureFailed {
        /// Underlying camera error
        error: CameraError,
        /// Whether the failure message was delivered
        notified: bool,
    },
    /// The image was captured but could not be uploaded
    DeliveryFailed {
        /// Transport error text
        reason: String,
    },
}

/// Counters accumulated by the worker loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Photos uploaded
    pub delivered: usize,
    /// Camera failures
    pub capture_failed: usize,
    /// Upload failures after a successful capture
    pub delivery_failed: usize,
}

impl CaptureStats {
    fn record(&mut self, outcome: &CaptureOutcome) {
        match outcome {
            CaptureOutcome::Delivered { .. } => self.delivered += 1,
            CaptureOutcome::CaptureFailed { .. } => self.capture_failed += 1,
            CaptureOutcome::DeliveryFailed { .. } => self.delivery_failed += 1,
        }
    }

    /// Requests that reached a terminal outcome
    #[must_use]
    pub fn total(&self) -> usize {
        self.delivered + self.capture_failed + self.delivery_failed
    }
}

/// Performs the capture-and-upload sequence for dequeued requests
pub struct CaptureWorker<T: BotTransport> {
    transport: Arc<T>,
    camera: Arc<dyn Camera>,
    store: Arc<dyn PhotoStore>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    camera_lock: Arc<Mutex<()>>,
    capture_timeout: Duration,
}

impl<T: BotTransport> Clone for CaptureWorker<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            camera: self.camera.clone(),
            store: self.store.clone(),
            diagnostics: self.diagnostics.clone(),
            camera_lock: self.camera_lock.clone(),
            capture_timeout: self.capture_timeout,
        }
    }
}

impl<T: BotTransport> CaptureWorker<T> {
    /// Create a worker with its own camera lock
    pub fn new(
        transport: Arc<T>,
        camera: Arc<dyn Camera>,
        store: Arc<dyn PhotoStore>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        capture_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            camera,
            store,
            diagnostics,
            camera_lock: Arc::new(Mutex::new(())),
            capture_timeout,
        }
    }

    /// Run one request to its terminal outcome.
    ///
    /// The camera lock is held from the first presence indicator until the
    /// metadata record is written.
    pub async fn process(&self, request: CaptureRequest) -> CaptureOutcome {
        let _camera = self.camera_lock.lock().await;
        let chat = request.destination;

        if let Err(e) = self
            .transport
            .send_chat_action(chat, ChatAction::Typing)
            .await
        {
            debug!(error = %e, "Failed to send typing action");
        }

        let captured = match tokio::time::timeout(
            self.capture_timeout,
            self.camera
                .capture(request.width, request.height, &request.camera_params),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CameraError::Timeout(self.capture_timeout)),
        };

        match captured {
            Ok(image) => self.deliver(&request, image).await,
            Err(error) => self.report_failure(&request, error).await,
        }
    }

    async fn deliver(&self, request: &CaptureRequest, image: Vec<u8>) -> CaptureOutcome {
        let chat = request.destination;
        let caption = capture_caption(Local::now());

        if let Err(e) = self
            .transport
            .send_chat_action(chat, ChatAction::UploadPhoto)
            .await
        {
            debug!(error = %e, "Failed to send upload action");
        }

        let options = request.reply_options.clone().with_caption(caption.clone());
        let file_id = match self.transport.send_photo(chat, image, &options).await {
            Ok(file_id) => file_id,
            Err(e) => {
                self.diagnostics
                    .log_error(&format!("Failed to send photo: {e}"));
                return CaptureOutcome::DeliveryFailed {
                    reason: e.to_string(),
                };
            }
        };

        let recorded = match self
            .store
            .save_photo(&request.requester_id, &file_id, &caption)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.diagnostics
                    .log_error(&format!("Failed to save photo record: {e}"));
                false
            }
        };

        info!(user = %request.requester_id, file_id = %file_id, "Photo delivered");
        CaptureOutcome::Delivered { file_id, recorded }
    }

    async fn report_failure(&self, request: &CaptureRequest, error: CameraError) -> CaptureOutcome {
        let message = format!("Image capture failed: {error}");
        self.diagnostics.log_error(&message);

        let text = match request.reply_options.format {
            TextFormat::Html => html_escape::encode_text(&message).into_owned(),
            TextFormat::Plain => message,
        };

        let notified = match self
            .transport
            .send_message(request.destination, &text, &request.reply_options)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.diagnostics
                    .log_error(&format!("Failed to send capture failure: {e}"));
                false
            }
        };

        CaptureOutcome::CaptureFailed { error, notified }
    }
}

/// Spawn the capture worker loop
pub fn spawn_capture_worker<T: BotTransport>(
    worker: CaptureWorker<T>,
    rx: CaptureReceiver,
    cancel: CancellationToken,
) -> JoinHandle<CaptureStats> {
    tokio::spawn(run_capture_loop(worker, rx, cancel))
}

/// Serve requests in arrival order until every sender is dropped or `cancel`
/// fires. On cancellation the queue is closed and requests already accepted
/// are still served.
pub async fn run_capture_loop<T: BotTransport>(
    worker: CaptureWorker<T>,
    mut rx: CaptureReceiver,
    cancel: CancellationToken,
) -> CaptureStats {
    let mut stats = CaptureStats::default();

    loop {
        let request = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            request = rx.recv() => request,
        };

        let Some(request) = request else {
            info!(?stats, "Capture queue closed");
            return stats;
        };

        let outcome = worker.process(request).await;
        stats.record(&outcome);
    }

    rx.close();
    let mut drained = 0_usize;
    while let Some(request) = rx.recv().await {
        let outcome = worker.process(request).await;
        stats.record(&outcome);
        drained += 1;
    }
    if drained > 0 {
        warn!(drained, "Served pending capture requests during shutdown");
    }

    info!(?stats, "Capture worker stopped");
    stats
}
