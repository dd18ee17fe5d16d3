//! Best-effort diagnostics side channel.
//!
//! Everything is written through `tracing`. When a Loggly token is configured the
//! same entries are also forwarded to Loggly on a background task. Forwarding
//! failures never reach the caller.

use crate::config::APP_NAME;
use chrono::Utc;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};

const LOGGLY_INPUT_URL: &str = "https://logs-01.loggly.com/inputs";

/// Fire-and-forget diagnostics sink
pub trait DiagnosticsSink: Send + Sync {
    /// Informational event
    fn log_info(&self, message: &str);
    /// Recoverable failure
    fn log_error(&self, message: &str);
    /// Audit entry for an accepted command
    fn log_usage(&self, user_id: &str, command: &str);
}

/// Severity attached to forwarded entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    /// Informational
    Log,
    /// Failure
    Error,
    /// Usage audit
    Verbose,
}

/// Payload of an accepted command
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UsageObject {
    /// Requesting user
    pub username: String,
    /// Resolved command
    pub command: String,
}

/// One entry as sent to Loggly
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Application name
    pub app: &'static str,
    /// Entry severity
    pub severity: Severity,
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Free-form message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured payload
    #[serde(rename = "obj", skip_serializing_if = "Option::is_none")]
    pub object: Option<UsageObject>,
}

impl LogEntry {
    fn new(severity: Severity, message: Option<String>, object: Option<UsageObject>) -> Self {
        Self {
            app: APP_NAME,
            severity,
            timestamp: Utc::now().to_rfc3339(),
            message,
            object,
        }
    }
}

#[derive(Clone)]
struct LogglyForwarder {
    client: reqwest::Client,
    endpoint: String,
}

impl LogglyForwarder {
    fn forward(&self, entry: LogEntry) {
        // Outside a runtime there is nothing to forward with; local logging already happened
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let forwarder = self.clone();
        handle.spawn(async move {
            let result = forwarder
                .client
                .post(&forwarder.endpoint)
                .json(&entry)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            if let Err(e) = result {
                debug!("Failed to forward diagnostics entry: {e}");
            }
        });
    }
}

/// Diagnostics sink writing to `tracing` and, optionally, Loggly
#[derive(Clone, Default)]
pub struct Diagnostics {
    remote: Option<LogglyForwarder>,
}

impl Diagnostics {
    /// Local-only diagnostics
    #[must_use]
    pub fn local() -> Self {
        Self::default()
    }

    /// Diagnostics forwarded to Loggly with the given customer token.
    ///
    /// An empty token yields local-only diagnostics.
    #[must_use]
    pub fn with_loggly(token: &str) -> Self {
        if token.trim().is_empty() {
            return Self::local();
        }
        Self::with_endpoint(format!("{LOGGLY_INPUT_URL}/{token}/tag/http/"))
    }

    /// Diagnostics forwarded to an arbitrary HTTP endpoint
    #[must_use]
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            remote: Some(LogglyForwarder {
                client,
                endpoint: endpoint.into(),
            }),
        }
    }

    /// Whether entries are forwarded to a remote endpoint
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    fn forward(&self, entry: LogEntry) {
        if let Some(remote) = &self.remote {
            remote.forward(entry);
        }
    }
}

impl DiagnosticsSink for Diagnostics {
    fn log_info(&self, message: &str) {
        info!("{message}");
        self.forward(LogEntry::new(Severity::Log, Some(message.to_string()), None));
    }

    fn log_error(&self, message: &str) {
        error!("{message}");
        self.forward(LogEntry::new(Severity::Error, Some(message.to_string()), None));
    }

    fn log_usage(&self, user_id: &str, command: &str) {
        debug!(user_id, command, "Command accepted");
        self.forward(LogEntry::new(
            Severity::Verbose,
            None,
            Some(UsageObject {
                username: user_id.to_string(),
                command: command.to_string(),
            }),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_entry_shape() {
        let entry = LogEntry::new(
            Severity::Verbose,
            None,
            Some(UsageObject {
                username: "alice".to_string(),
                command: "/capture".to_string(),
            }),
        );
        let json = match serde_json::to_value(&entry) {
            Ok(json) => json,
            Err(e) => panic!("entry did not serialize: {e}"),
        };

        assert_eq!(json["app"], APP_NAME);
        assert_eq!(json["severity"], "Verbose");
        assert_eq!(json["obj"]["username"], "alice");
        assert_eq!(json["obj"]["command"], "/capture");
        assert!(json.get("message").is_none());
    }

    #[test]
    fn test_logging_without_runtime_does_not_panic() {
        let diagnostics = Diagnostics::with_endpoint("http://127.0.0.1:9/unreachable");
        diagnostics.log_error("no runtime here");
        diagnostics.log_usage("alice", "/status");
    }

    #[test]
    fn test_empty_token_is_local() {
        assert!(!Diagnostics::with_loggly("  ").is_remote());
        assert!(Diagnostics::with_loggly("token").is_remote());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_swallowed() {
        let diagnostics = Diagnostics::with_endpoint("http://127.0.0.1:9/unreachable");
        diagnostics.log_info("still fine");
        diagnostics.log_usage("bob", "/help");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
