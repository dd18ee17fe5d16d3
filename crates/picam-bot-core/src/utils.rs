//! Process status and caption helpers.

use chrono::{DateTime, Local};
use std::time::{Duration, Instant};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// Caption format stamped on captured photos, e.g. `2024-05-01 (Wed) 13:45:10`
pub const CAPTION_FORMAT: &str = "%Y-%m-%d (%a) %H:%M:%S";

/// Formats a capture timestamp as a photo caption
#[must_use]
pub fn capture_caption(at: DateTime<Local>) -> String {
    at.format(CAPTION_FORMAT).to_string()
}

/// Formats an uptime as `1d 2h 3m 4s`, leaving out leading zero units
#[must_use]
pub fn format_uptime(uptime: Duration) -> String {
    let total = uptime.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Formats a byte count with a binary unit suffix
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Start time and resource usage of the running process
#[derive(Debug, Clone, Copy)]
pub struct ProcessInfo {
    launched: Instant,
}

impl Default for ProcessInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInfo {
    /// Record the current instant as process start
    #[must_use]
    pub fn new() -> Self {
        Self {
            launched: Instant::now(),
        }
    }

    /// Time since process start
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.launched.elapsed()
    }

    /// Human readable uptime
    #[must_use]
    pub fn uptime_text(&self) -> String {
        format_uptime(self.uptime())
    }

    /// Human readable memory usage of this process
    #[must_use]
    pub fn memory_usage(&self) -> String {
        let Ok(pid) = sysinfo::get_current_pid() else {
            return "unavailable".to_string();
        };

        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything(),
        );

        system.process(pid).map_or_else(
            || "unavailable".to_string(),
            |process| {
                format!(
                    "Resident {} / Virtual {}",
                    format_bytes(process.memory()),
                    format_bytes(process.virtual_memory())
                )
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(5)), "5s");
        assert_eq!(format_uptime(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_uptime(Duration::from_secs(3_600)), "1h 0m 0s");
        assert_eq!(
            format_uptime(Duration::from_secs(2 * 86_400 + 3 * 3_600 + 4 * 60 + 5)),
            "2d 3h 4m 5s"
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 + 512 * 1024), "5.5 MiB");
    }

    #[test]
    fn test_capture_caption_format() {
        let at = match Local.with_ymd_and_hms(2024, 5, 1, 13, 45, 10).single() {
            Some(at) => at,
            None => panic!("ambiguous local time"),
        };
        assert_eq!(capture_caption(at), "2024-05-01 (Wed) 13:45:10");
    }

    #[test]
    fn test_memory_usage_is_reported() {
        let info = ProcessInfo::new();
        assert!(info.memory_usage().contains("Resident"));
    }
}
