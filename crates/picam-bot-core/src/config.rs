//! Configuration and settings management
//!
//! Loads settings from configuration files and environment variables and defines
//! the constants of the capture pipeline.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use thiserror::Error;

/// Camera option name to value, passed verbatim to the capture helper
pub type CameraParams = BTreeMap<String, serde_json::Value>;

/// Application name reported to the remote diagnostics sink
pub const APP_NAME: &str = "RPiCameraBot";

/// Polling interval used when the configured value is missing or not positive
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 1;
/// Smallest image width the camera is asked for
pub const MIN_IMAGE_WIDTH: u32 = 400;
/// Smallest image height the camera is asked for
pub const MIN_IMAGE_HEIGHT: u32 = 300;
/// Capacity of the pending capture queue
pub const CAPTURE_QUEUE_CAPACITY: usize = 4;
/// Number of cached photos offered in an inline answer
pub const LATEST_PHOTOS_LIMIT: usize = 20;
/// Upper bound for a single camera invocation
pub const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 30;
/// Photo metadata records kept per user before the oldest are pruned
pub const DEFAULT_MAX_PHOTOS_PER_USER: usize = 1000;
/// Executable invoked for still captures
pub const DEFAULT_CAMERA_COMMAND: &str = "raspistill";
/// Local metadata database file
pub const DEFAULT_DB_PATH: &str = "picam-bot.db";
/// Reply used for capture commands while maintenance mode is on
pub const DEFAULT_MAINTENANCE_MESSAGE: &str =
    "Bot is now under maintenance. Please try again later.";

/// Errors raised while validating loaded settings
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Underlying configuration source could not be read
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    /// No authorized user identifiers are configured
    #[error("ALLOWED_USERS is empty: nobody would be able to use the bot")]
    NoAllowedUsers,
    /// The camera command is blank
    #[error("CAMERA_COMMAND must not be empty")]
    EmptyCameraCommand,
    /// Capture timeout of zero would fail every capture
    #[error("CAPTURE_TIMEOUT_SECS must be greater than zero")]
    ZeroCaptureTimeout,
    /// Only part of the R2 credentials were supplied
    #[error("R2 storage is partially configured, missing: {0}")]
    PartialR2(String),
}

/// Camera bot settings loaded from files and environment variables
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CameraSettings {
    /// Comma-separated list of Telegram usernames allowed to use the bot
    #[serde(rename = "allowed_users")]
    pub allowed_users_str: Option<String>,

    /// Seconds between update polls
    #[serde(default)]
    pub monitor_interval: i64,

    /// Requested image width, floored to [`MIN_IMAGE_WIDTH`]
    #[serde(default)]
    pub image_width: i64,
    /// Requested image height, floored to [`MIN_IMAGE_HEIGHT`]
    #[serde(default)]
    pub image_height: i64,

    /// Extra camera options, given as a JSON object
    #[serde(default, deserialize_with = "deserialize_camera_params")]
    pub camera_params: CameraParams,
    /// Capture executable
    pub camera_command: Option<String>,
    /// Time budget for one capture call
    pub capture_timeout_secs: Option<u64>,

    /// Whether capture commands are answered with the maintenance message
    #[serde(default)]
    pub is_in_maintenance: bool,
    /// Message sent instead of capturing while in maintenance
    pub maintenance_message: Option<String>,

    /// Loggly customer token for remote diagnostics
    pub loggly_token: Option<String>,
    /// Enables debug level logging
    #[serde(default)]
    pub is_verbose: bool,

    /// Path of the SQLite metadata database
    pub db_path: Option<String>,
    /// Retention cap for photo metadata records per user
    pub max_photos_per_user: Option<usize>,

    /// R2 Storage access key ID
    pub r2_access_key_id: Option<String>,
    /// R2 Storage secret access key
    pub r2_secret_access_key: Option<String>,
    /// R2 Storage endpoint URL
    pub r2_endpoint_url: Option<String>,
    /// R2 Storage bucket name
    pub r2_bucket_name: Option<String>,
}

fn deserialize_camera_params<'de, D>(deserializer: D) -> Result<CameraParams, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(CameraParams::new()),
        Some(json) => parse_camera_params(json).map_err(serde::de::Error::custom),
    }
}

/// Parses a JSON object of camera options.
///
/// # Errors
///
/// Returns an error if the input is not a JSON object or holds nested values.
pub fn parse_camera_params(json: &str) -> Result<CameraParams, String> {
    let params: CameraParams =
        serde_json::from_str(json).map_err(|e| format!("camera_params is not a JSON object: {e}"))?;
    if let Some((key, _)) = params
        .iter()
        .find(|(_, v)| v.is_object() || v.is_array() || v.is_null())
    {
        return Err(format!(
            "camera_params.{key} must be a string, number or boolean"
        ));
    }
    Ok(params)
}

/// Build the layered configuration shared by every settings struct.
///
/// Sources, later ones overriding earlier ones: `config/default`,
/// `config/{RUN_MODE}`, `config/local`, `APP__*` variables, plain variables.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // UPPER_SNAKE_CASE variables map to snake_case keys; empty ones count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl CameraSettings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use picam_bot_core::config::CameraSettings;
    ///
    /// let settings = CameraSettings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Checks that the settings are complete enough to start serving.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.allowed_users().is_empty() {
            return Err(SettingsError::NoAllowedUsers);
        }
        if self.camera_command().trim().is_empty() {
            return Err(SettingsError::EmptyCameraCommand);
        }
        if self.capture_timeout().is_zero() {
            return Err(SettingsError::ZeroCaptureTimeout);
        }

        let r2_fields = [
            ("R2_ENDPOINT_URL", &self.r2_endpoint_url),
            ("R2_ACCESS_KEY_ID", &self.r2_access_key_id),
            ("R2_SECRET_ACCESS_KEY", &self.r2_secret_access_key),
            ("R2_BUCKET_NAME", &self.r2_bucket_name),
        ];
        let missing: Vec<&str> = r2_fields
            .iter()
            .filter(|(_, value)| value.as_deref().is_none_or(str::is_empty))
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() && missing.len() < r2_fields.len() {
            return Err(SettingsError::PartialR2(missing.join(", ")));
        }

        Ok(())
    }

    /// Returns the set of usernames that are allowed to use the bot
    #[must_use]
    pub fn allowed_users(&self) -> HashSet<String> {
        self.allowed_users_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .map(|token| token.trim_start_matches('@'))
                    .filter(|token| !token.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Seconds between update polls
    #[must_use]
    pub fn monitor_interval_secs(&self) -> u64 {
        u64::try_from(self.monitor_interval)
            .ok()
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_MONITOR_INTERVAL_SECS)
    }

    /// Image width after applying the lower bound
    #[must_use]
    pub fn image_width(&self) -> u32 {
        u32::try_from(self.image_width)
            .unwrap_or(0)
            .max(MIN_IMAGE_WIDTH)
    }

    /// Image height after applying the lower bound
    #[must_use]
    pub fn image_height(&self) -> u32 {
        u32::try_from(self.image_height)
            .unwrap_or(0)
            .max(MIN_IMAGE_HEIGHT)
    }

    /// Capture executable
    #[must_use]
    pub fn camera_command(&self) -> &str {
        self.camera_command
            .as_deref()
            .unwrap_or(DEFAULT_CAMERA_COMMAND)
    }

    /// Time budget for one capture call
    #[must_use]
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(
            self.capture_timeout_secs
                .unwrap_or(DEFAULT_CAPTURE_TIMEOUT_SECS),
        )
    }

    /// Message sent for capture commands during maintenance
    #[must_use]
    pub fn maintenance_message(&self) -> &str {
        match self.maintenance_message.as_deref() {
            Some(message) if !message.is_empty() => message,
            _ => DEFAULT_MAINTENANCE_MESSAGE,
        }
    }

    /// Path of the SQLite metadata database
    #[must_use]
    pub fn db_path(&self) -> &str {
        self.db_path.as_deref().unwrap_or(DEFAULT_DB_PATH)
    }

    /// Retention cap for photo metadata records per user
    #[must_use]
    pub fn max_photos_per_user(&self) -> usize {
        self.max_photos_per_user
            .filter(|max| *max > 0)
            .unwrap_or(DEFAULT_MAX_PHOTOS_PER_USER)
    }

    /// Whether the R2 metadata backend is fully configured
    #[must_use]
    pub fn has_r2(&self) -> bool {
        [
            &self.r2_endpoint_url,
            &self.r2_access_key_id,
            &self.r2_secret_access_key,
            &self.r2_bucket_name,
        ]
        .iter()
        .all(|value| value.as_deref().is_some_and(|v| !v.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_users(users: &str) -> CameraSettings {
        CameraSettings {
            allowed_users_str: Some(users.to_string()),
            ..CameraSettings::default()
        }
    }

    #[test]
    fn test_list_parsing() {
        let mut settings = settings_with_users("alice,bob");
        let allowed = settings.allowed_users();
        assert!(allowed.contains("alice"));
        assert!(allowed.contains("bob"));
        assert_eq!(allowed.len(), 2);

        settings.allowed_users_str = Some("@carol dave".to_string());
        let allowed = settings.allowed_users();
        assert!(allowed.contains("carol"));
        assert!(allowed.contains("dave"));
        assert_eq!(allowed.len(), 2);

        settings.allowed_users_str = Some("erin; frank, ,grace".to_string());
        assert_eq!(settings.allowed_users().len(), 3);

        settings.allowed_users_str = None;
        assert!(settings.allowed_users().is_empty());
    }

    #[test]
    fn test_dimensions_are_floored() {
        let mut settings = CameraSettings::default();
        assert_eq!(settings.image_width(), MIN_IMAGE_WIDTH);
        assert_eq!(settings.image_height(), MIN_IMAGE_HEIGHT);

        settings.image_width = -20;
        settings.image_height = 120;
        assert_eq!(settings.image_width(), MIN_IMAGE_WIDTH);
        assert_eq!(settings.image_height(), MIN_IMAGE_HEIGHT);

        settings.image_width = 1920;
        settings.image_height = 1080;
        assert_eq!(settings.image_width(), 1920);
        assert_eq!(settings.image_height(), 1080);
    }

    #[test]
    fn test_monitor_interval_fallback() {
        let mut settings = CameraSettings::default();
        assert_eq!(settings.monitor_interval_secs(), DEFAULT_MONITOR_INTERVAL_SECS);
        settings.monitor_interval = -3;
        assert_eq!(settings.monitor_interval_secs(), DEFAULT_MONITOR_INTERVAL_SECS);
        settings.monitor_interval = 5;
        assert_eq!(settings.monitor_interval_secs(), 5);
    }

    #[test]
    fn test_maintenance_message_default() {
        let mut settings = CameraSettings::default();
        assert_eq!(settings.maintenance_message(), DEFAULT_MAINTENANCE_MESSAGE);
        settings.maintenance_message = Some(String::new());
        assert_eq!(settings.maintenance_message(), DEFAULT_MAINTENANCE_MESSAGE);
        settings.maintenance_message = Some("Lens cleaning".to_string());
        assert_eq!(settings.maintenance_message(), "Lens cleaning");
    }

    #[test]
    fn test_camera_params_parsing() {
        let params = parse_camera_params(r#"{"--rotation": 180, "-awb": "auto", "-vf": true}"#)
            .expect("valid params");
        assert_eq!(params.len(), 3);
        assert_eq!(params["--rotation"], serde_json::json!(180));

        assert!(parse_camera_params("[1, 2]").is_err());
        assert!(parse_camera_params(r#"{"-ex": {"nested": 1}}"#).is_err());
    }

    #[test]
    fn test_validate_requires_users() {
        let settings = CameraSettings::default();
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::NoAllowedUsers)
        ));
        assert!(settings_with_users("alice").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_partial_r2() {
        let settings = CameraSettings {
            r2_endpoint_url: Some("https://r2.example.com".to_string()),
            ..settings_with_users("alice")
        };
        let Err(SettingsError::PartialR2(missing)) = settings.validate() else {
            panic!("expected partial R2 error");
        };
        assert!(missing.contains("R2_BUCKET_NAME"));
        assert!(!settings.has_r2());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let settings = CameraSettings {
            capture_timeout_secs: Some(0),
            ..settings_with_users("alice")
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::ZeroCaptureTimeout)
        ));
    }
}
