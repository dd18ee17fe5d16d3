//! Mocks for the core collaborators used by the pipeline unit tests.

use async_trait::async_trait;
use mockall::mock;
use picam_bot_core::camera::{Camera, CameraError};
use picam_bot_core::config::CameraParams;
use picam_bot_core::diagnostics::DiagnosticsSink;
use picam_bot_core::storage::{PhotoRecord, PhotoStore, StorageError};
use std::sync::Mutex;

mock! {
    pub Camera {}

    #[async_trait]
    impl Camera for Camera {
        async fn capture(
            &self,
            width: u32,
            height: u32,
            params: &CameraParams,
        ) -> Result<Vec<u8>, CameraError>;
    }
}

mock! {
    pub PhotoStore {}

    #[async_trait]
    impl PhotoStore for PhotoStore {
        async fn save_photo(
            &self,
            owner_id: &str,
            file_id: &str,
            caption: &str,
        ) -> Result<(), StorageError>;
        async fn get_photos(
            &self,
            owner_id: &str,
            limit: usize,
        ) -> Result<Vec<PhotoRecord>, StorageError>;
        async fn count_photos(&self, owner_id: &str) -> Result<usize, StorageError>;
        async fn check_connection(&self) -> Result<(), String>;
    }
}

/// Diagnostics sink that keeps every entry in memory
#[derive(Default)]
pub struct CollectingDiagnostics {
    pub infos: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
    pub usage: Mutex<Vec<(String, String)>>,
}

impl CollectingDiagnostics {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn usage(&self) -> Vec<(String, String)> {
        self.usage.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl DiagnosticsSink for CollectingDiagnostics {
    fn log_info(&self, message: &str) {
        if let Ok(mut infos) = self.infos.lock() {
            infos.push(message.to_string());
        }
    }

    fn log_error(&self, message: &str) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message.to_string());
        }
    }

    fn log_usage(&self, user_id: &str, command: &str) {
        if let Ok(mut usage) = self.usage.lock() {
            usage.push((user_id.to_string(), command.to_string()));
        }
    }
}
