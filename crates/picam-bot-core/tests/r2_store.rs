use picam_bot_core::config::CameraSettings;
use picam_bot_core::storage::{user_photos_key, PhotoRecord, PhotoStore, R2PhotoStore, StorageError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const BUCKET: &str = "photos";

/// In-memory S3-compatible bucket served over plain HTTP/1.1
#[derive(Default)]
struct FakeBucket {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    reject_puts: AtomicBool,
}

struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

impl FakeBucket {
    fn respond(&self, request: Request) -> (u16, &'static str, Vec<u8>) {
        let key = request
            .path
            .trim_start_matches('/')
            .strip_prefix(BUCKET)
            .map(|key| key.trim_start_matches('/').to_string())
            .unwrap_or_default();

        match request.method.as_str() {
            "PUT" if self.reject_puts.load(Ordering::SeqCst) => {
                (403, "Forbidden", error_xml("AccessDenied", "Access Denied"))
            }
            "PUT" => {
                if let Ok(mut objects) = self.objects.lock() {
                    objects.insert(key, request.body);
                }
                (200, "OK", Vec::new())
            }
            "GET" => match self.object(&key) {
                Some(body) => (200, "OK", body),
                None => (
                    404,
                    "Not Found",
                    error_xml("NoSuchKey", "The specified key does not exist."),
                ),
            },
            _ => (405, "Method Not Allowed", Vec::new()),
        }
    }

    fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    fn stored_records(&self, owner_id: &str) -> Vec<PhotoRecord> {
        self.object(&user_photos_key(owner_id))
            .and_then(|body| serde_json::from_slice(&body).ok())
            .unwrap_or_default()
    }
}

fn error_xml(code: &str, message: &str) -> Vec<u8> {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Error><Code>{code}</Code><Message>{message}</Message>\
         <RequestId>fake</RequestId></Error>"
    )
    .into_bytes()
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn read_more(stream: &mut TcpStream, buf: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; 4096];
    match stream.read(&mut chunk).await {
        Ok(0) | Err(_) => false,
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            true
        }
    }
}

async fn read_request(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<Request> {
    let head_end = loop {
        if let Some(end) = find_header_end(buf) {
            break end;
        }
        if !read_more(stream, buf).await {
            return None;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let body_start = head_end + 4;
    while buf.len() < body_start + content_length {
        if !read_more(stream, buf).await {
            return None;
        }
    }
    let body = buf[body_start..body_start + content_length].to_vec();
    buf.drain(..body_start + content_length);

    let path = target.split('?').next().unwrap_or_default().to_string();
    Some(Request { method, path, body })
}

async fn serve_connection(mut stream: TcpStream, bucket: Arc<FakeBucket>) {
    let mut buf = Vec::new();
    while let Some(request) = read_request(&mut stream, &mut buf).await {
        let (status, reason, body) = bucket.respond(request);
        let head = format!(
            "HTTP/1.1 {status} {reason}\r\n\
             Content-Type: application/xml\r\n\
             Content-Length: {}\r\n\
             ETag: \"fake-etag\"\r\n\
             x-amz-request-id: fake\r\n\r\n",
            body.len()
        );
        if stream.write_all(head.as_bytes()).await.is_err() || stream.write_all(&body).await.is_err()
        {
            break;
        }
    }
}

/// Serve `bucket` on an ephemeral local port and return its endpoint URL
async fn start_fake_r2(bucket: Arc<FakeBucket>) -> Result<String, std::io::Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = format!("http://{}", listener.local_addr()?);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream, bucket.clone()));
        }
    });

    Ok(endpoint)
}

fn r2_settings(endpoint: &str, max_photos_per_user: usize) -> CameraSettings {
    CameraSettings {
        r2_access_key_id: Some("test-access-key".to_string()),
        r2_secret_access_key: Some("test-secret-key".to_string()),
        r2_endpoint_url: Some(endpoint.to_string()),
        r2_bucket_name: Some(BUCKET.to_string()),
        max_photos_per_user: Some(max_photos_per_user),
        ..CameraSettings::default()
    }
}

fn file_ids(records: &[PhotoRecord]) -> Vec<&str> {
    records.iter().map(|r| r.file_id.as_str()).collect()
}

#[tokio::test]
async fn rejected_upload_leaves_no_visible_record() -> TestResult {
    let bucket = Arc::new(FakeBucket::default());
    let endpoint = start_fake_r2(bucket.clone()).await?;
    let store = R2PhotoStore::new(&r2_settings(&endpoint, 100)).await?;

    bucket.reject_puts.store(true, Ordering::SeqCst);
    let result = store.save_photo("alice", "file-x", "caption").await;
    assert!(matches!(result, Err(StorageError::S3Put(_))));

    assert!(store.get_photos("alice", 20).await?.is_empty());
    assert_eq!(store.count_photos("alice").await?, 0);

    bucket.reject_puts.store(false, Ordering::SeqCst);
    store.save_photo("alice", "file-y", "caption").await?;
    assert_eq!(file_ids(&store.get_photos("alice", 20).await?), vec!["file-y"]);
    assert_eq!(file_ids(&bucket.stored_records("alice")), vec!["file-y"]);
    Ok(())
}

#[tokio::test]
async fn photos_come_back_newest_first_within_retention() -> TestResult {
    let bucket = Arc::new(FakeBucket::default());
    let endpoint = start_fake_r2(bucket.clone()).await?;
    let store = R2PhotoStore::new(&r2_settings(&endpoint, 3)).await?;

    for i in 0..5 {
        store
            .save_photo("alice", &format!("file-{i}"), &format!("caption-{i}"))
            .await?;
    }

    let latest = store.get_photos("alice", 2).await?;
    assert_eq!(file_ids(&latest), vec!["file-4", "file-3"]);
    assert_eq!(latest[0].caption, "caption-4");

    assert_eq!(
        file_ids(&store.get_photos("alice", 20).await?),
        vec!["file-4", "file-3", "file-2"]
    );
    // The bucket copy is trimmed too, kept oldest first
    assert_eq!(
        file_ids(&bucket.stored_records("alice")),
        vec!["file-2", "file-3", "file-4"]
    );
    Ok(())
}

#[tokio::test]
async fn missing_object_reads_as_no_photos() -> TestResult {
    let bucket = Arc::new(FakeBucket::default());
    let endpoint = start_fake_r2(bucket).await?;
    let store = R2PhotoStore::new(&r2_settings(&endpoint, 100)).await?;

    assert!(store.get_photos("carol", 20).await?.is_empty());
    assert_eq!(store.count_photos("carol").await?, 0);
    Ok(())
}

#[tokio::test]
async fn saved_photos_are_read_back_from_the_bucket() -> TestResult {
    let bucket = Arc::new(FakeBucket::default());
    let endpoint = start_fake_r2(bucket).await?;

    let writer = R2PhotoStore::new(&r2_settings(&endpoint, 100)).await?;
    writer.save_photo("alice", "a1", "c").await?;
    writer.save_photo("bob", "b1", "c").await?;

    // Fresh cache, so every read goes to the bucket
    let reader = R2PhotoStore::new(&r2_settings(&endpoint, 100)).await?;
    assert_eq!(file_ids(&reader.get_photos("alice", 20).await?), vec!["a1"]);
    assert_eq!(file_ids(&reader.get_photos("bob", 20).await?), vec!["b1"]);
    Ok(())
}
