//! Still image capture through the camera command line tool.
//!
//! The physical camera admits a single user at a time. Callers are expected to
//! serialize access themselves; this module only knows how to run one capture.

use crate::config::CameraParams;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors that can occur while capturing an image
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// The capture process could not be started
    #[error("failed to start camera command: {0}")]
    Spawn(String),
    /// The capture process ran but reported a failure
    #[error("camera device error: {0}")]
    Device(String),
    /// The capture process exited successfully without producing an image
    #[error("camera returned an empty image")]
    EmptyImage,
    /// The capture did not finish within its time budget
    #[error("camera did not respond within {} seconds", .0.as_secs())]
    Timeout(Duration),
}

/// A device that can take a still picture
#[async_trait]
pub trait Camera: Send + Sync {
    /// Capture one image and return its encoded bytes
    async fn capture(
        &self,
        width: u32,
        height: u32,
        params: &CameraParams,
    ) -> Result<Vec<u8>, CameraError>;
}

/// Captures JPEG stills by running `raspistill` (or a compatible tool) with
/// output written to stdout.
pub struct RaspiStill {
    command: String,
}

impl RaspiStill {
    /// Create a capturer that runs the given executable
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

/// Builds the argument list for one capture.
///
/// Parameter keys without a leading dash get `--`. Boolean `true` values become
/// bare flags and `false` values are left out.
#[must_use]
pub fn build_capture_args(width: u32, height: u32, params: &CameraParams) -> Vec<String> {
    let mut args = vec![
        "-w".to_string(),
        width.to_string(),
        "-h".to_string(),
        height.to_string(),
        "-o".to_string(),
        "-".to_string(),
    ];

    for (key, value) in params {
        let flag = if key.starts_with('-') {
            key.clone()
        } else {
            format!("--{key}")
        };

        match value {
            serde_json::Value::Bool(true) => args.push(flag),
            serde_json::Value::Bool(false) | serde_json::Value::Null => {}
            serde_json::Value::String(s) => {
                args.push(flag);
                args.push(s.clone());
            }
            other => {
                args.push(flag);
                args.push(other.to_string());
            }
        }
    }

    args
}

#[async_trait]
impl Camera for RaspiStill {
    async fn capture(
        &self,
        width: u32,
        height: u32,
        params: &CameraParams,
    ) -> Result<Vec<u8>, CameraError> {
        let args = build_capture_args(width, height, params);
        debug!(command = %self.command, ?args, "Running camera command");

        // Dropping the child (e.g. on caller timeout) kills the process
        let child = Command::new(&self.command)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CameraError::Spawn(format!("{}: {e}", self.command)))?;

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CameraError::Device(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                output.status.to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(CameraError::Device(detail));
        }

        if output.stdout.is_empty() {
            return Err(CameraError::EmptyImage);
        }

        debug!(size = output.stdout.len(), "Image captured");
        Ok(output.stdout)
    }
}
