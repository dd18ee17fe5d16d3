#![deny(missing_docs)]
//! Picam bot core library.
//!
//! Settings, the camera capture helper, photo metadata storage and the
//! diagnostics side channel shared by the runtime and transports.

/// Still image capture.
pub mod camera;
/// Configuration management.
pub mod config;
/// Best-effort diagnostics sink.
pub mod diagnostics;
/// Photo metadata storage (SQLite, R2).
pub mod storage;
/// Utility functions.
pub mod utils;
