//! Storage layer for photo metadata
//!
//! Every photo successfully delivered to a user is recorded with the remote file
//! handle Telegram returned for it, so it can be offered again in inline
//! answers without touching the camera. Two backends are provided: a local
//! SQLite database and Cloudflare R2 / AWS S3.

use crate::config::CameraSettings;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::RequestChecksumCalculation;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio_rusqlite::Connection;
use tracing::{error, info, warn};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error<rusqlite::Error>),
    /// Error retrieving object from S3
    #[error("S3 Get error: {0}")]
    S3Get(Box<SdkError<GetObjectError>>),
    /// Error putting object into S3
    #[error("S3 put error: {0}")]
    S3Put(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration error (missing credentials, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Metadata of one delivered photo
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PhotoRecord {
    /// Username of the requester
    pub owner_id: String,
    /// Remote file handle returned by the transport after upload
    pub file_id: String,
    /// Capture timestamp caption
    pub caption: String,
    /// When the record was written
    pub created_at: DateTime<Utc>,
}

/// Interface for photo metadata stores
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Record a delivered photo
    async fn save_photo(
        &self,
        owner_id: &str,
        file_id: &str,
        caption: &str,
    ) -> Result<(), StorageError>;
    /// Most recent photos of a user, newest first
    async fn get_photos(&self, owner_id: &str, limit: usize)
        -> Result<Vec<PhotoRecord>, StorageError>;
    /// Number of stored photos of a user
    async fn count_photos(&self, owner_id: &str) -> Result<usize, StorageError>;
    /// Check connection to storage
    async fn check_connection(&self) -> Result<(), String>;
}

/// SQLite-backed photo metadata store
///
/// Insertion order is kept by the autoincrement row id, which also defines
/// recency. Every statement runs on the connection's single background thread.
pub struct SqlitePhotoStore {
    conn: Connection,
    max_per_user: usize,
}

impl SqlitePhotoStore {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be created.
    pub async fn open<P: AsRef<Path>>(path: P, max_per_user: usize) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path).await.map_err(tokio_rusqlite::Error::Error)?, max_per_user).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory(max_per_user: usize) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory().await.map_err(tokio_rusqlite::Error::Error)?, max_per_user).await
    }

    async fn from_connection(conn: Connection, max_per_user: usize) -> Result<Self, StorageError> {
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS photos (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id TEXT NOT NULL,
                    file_id TEXT NOT NULL,
                    caption TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_photos_owner ON photos (owner_id, id);",
            )
        })
        .await?;

        Ok(Self { conn, max_per_user })
    }
}

#[async_trait]
impl PhotoStore for SqlitePhotoStore {
    async fn save_photo(
        &self,
        owner_id: &str,
        file_id: &str,
        caption: &str,
    ) -> Result<(), StorageError> {
        let owner_id = owner_id.to_string();
        let file_id = file_id.to_string();
        let caption = caption.to_string();
        let max_per_user = self.max_per_user;

        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO photos (owner_id, file_id, caption, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![owner_id, file_id, caption, Utc::now().to_rfc3339()],
                )?;
                // Retention: keep only the newest `max_per_user` rows of this owner
                tx.execute(
                    "DELETE FROM photos WHERE owner_id = ?1 AND id NOT IN (
                        SELECT id FROM photos WHERE owner_id = ?1 ORDER BY id DESC LIMIT ?2
                    )",
                    params![owner_id, i64::try_from(max_per_user).unwrap_or(i64::MAX)],
                )?;
                tx.commit()
            })
            .await?;
        Ok(())
    }

    async fn get_photos(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<PhotoRecord>, StorageError> {
        let owner_id = owner_id.to_string();

        let photos = self
            .conn
            .call(move |conn| -> Result<Vec<PhotoRecord>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT owner_id, file_id, caption, created_at FROM photos
                     WHERE owner_id = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(
                    params![owner_id, i64::try_from(limit).unwrap_or(i64::MAX)],
                    |row| {
                        let created_at: String = row.get(3)?;
                        Ok(PhotoRecord {
                            owner_id: row.get(0)?,
                            file_id: row.get(1)?,
                            caption: row.get(2)?,
                            created_at: DateTime::parse_from_rfc3339(&created_at)
                                .map(|dt| dt.with_timezone(&Utc))
                                .unwrap_or_default(),
                        })
                    },
                )?;
                let photos = rows.collect::<Result<Vec<_>, _>>()?;
                Ok(photos)
            })
            .await?;
        Ok(photos)
    }

    async fn count_photos(&self, owner_id: &str) -> Result<usize, StorageError> {
        let owner_id = owner_id.to_string();

        let count = self
            .conn
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "SELECT COUNT(*) FROM photos WHERE owner_id = ?1",
                    params![owner_id],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn check_connection(&self) -> Result<(), String> {
        self.conn
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row("SELECT 1", [], |row| row.get(0))
            })
            .await
            .map(|_| ())
            .map_err(|e| {
                let err_msg = format!("SQLite connectivity test failed: {e}");
                error!("{}", err_msg);
                err_msg
            })
    }
}

/// R2-backed photo metadata store
///
/// Keeps one JSON array per user, oldest first.
pub struct R2PhotoStore {
    client: Client,
    bucket: String,
    cache: Cache<String, Arc<Vec<u8>>>,
    max_per_user: usize,
    // Serializes read-modify-write of the per-user arrays
    write_lock: AsyncMutex<()>,
}

impl R2PhotoStore {
    /// Create a new R2 storage instance
    ///
    /// # Errors
    ///
    /// Returns an error if R2 configuration is missing.
    pub async fn new(settings: &CameraSettings) -> Result<Self, StorageError> {
        let endpoint_url = settings
            .r2_endpoint_url
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ENDPOINT_URL is missing".into()))?;
        let access_key = settings
            .r2_access_key_id
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ACCESS_KEY_ID is missing".into()))?;
        let secret_key = settings
            .r2_secret_access_key
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_SECRET_ACCESS_KEY is missing".into()))?;
        let bucket = settings
            .r2_bucket_name
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_BUCKET_NAME is missing".into()))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "r2-storage");

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint_url)
            .force_path_style(true)
            // R2 rejects the default streaming checksums on PutObject
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .build();

        let cache = Cache::builder()
            .max_capacity(1_000)
            .time_to_live(Duration::from_secs(60 * 60))
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.clone(),
            cache,
            max_per_user: settings.max_photos_per_user(),
            write_lock: AsyncMutex::new(()),
        })
    }

    async fn save_json<T: Serialize + Sync>(&self, key: &str, data: &T) -> Result<(), StorageError> {
        let body_bytes = serde_json::to_vec(data)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body_bytes.clone()))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;

        // Cached only once the bucket holds it
        self.cache
            .insert(key.to_string(), Arc::new(body_bytes))
            .await;

        Ok(())
    }

    async fn load_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        if let Some(cached_data) = self.cache.get(key).await {
            match serde_json::from_slice(&cached_data) {
                Ok(data) => return Ok(Some(data)),
                Err(e) => {
                    warn!("Cache deserialization failed for {}: {}", key, e);
                    self.cache.invalidate(key).await;
                }
            }
        }

        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
                    .into_bytes();

                self.cache
                    .insert(key.to_string(), Arc::new(data.to_vec()))
                    .await;

                Ok(Some(serde_json::from_slice(&data)?))
            }
            Err(SdkError::ServiceError(err)) if err.err().is_no_such_key() => Ok(None),
            Err(e) => Err(StorageError::S3Get(Box::new(e))),
        }
    }

    async fn load_records(&self, owner_id: &str) -> Result<Vec<PhotoRecord>, StorageError> {
        Ok(self
            .load_json(&user_photos_key(owner_id))
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl PhotoStore for R2PhotoStore {
    async fn save_photo(
        &self,
        owner_id: &str,
        file_id: &str,
        caption: &str,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.load_records(owner_id).await?;
        records.push(PhotoRecord {
            owner_id: owner_id.to_string(),
            file_id: file_id.to_string(),
            caption: caption.to_string(),
            created_at: Utc::now(),
        });
        let overflow = records.len().saturating_sub(self.max_per_user);
        records.drain(..overflow);

        self.save_json(&user_photos_key(owner_id), &records).await
    }

    async fn get_photos(
        &self,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<PhotoRecord>, StorageError> {
        let records = self.load_records(owner_id).await?;
        Ok(records.into_iter().rev().take(limit).collect())
    }

    async fn count_photos(&self, owner_id: &str) -> Result<usize, StorageError> {
        Ok(self.load_records(owner_id).await?.len())
    }

    async fn check_connection(&self) -> Result<(), String> {
        match self.client.list_buckets().send().await {
            Ok(_) => {
                info!("Successfully connected to R2 storage.");
                Ok(())
            }
            Err(e) => {
                let err_msg = format!("R2 connectivity test failed: {e:#?}");
                error!("{}", err_msg);
                Err(err_msg)
            }
        }
    }
}

/// Returns the R2 key for a user's photo metadata file
#[must_use]
pub fn user_photos_key(owner_id: &str) -> String {
    format!("users/{owner_id}/photos.json")
}
