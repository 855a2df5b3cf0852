//! Integration tests for archive assembly
//!
//! Every test assembles into a store, reads the committed object back and
//! extracts it with the reader in `common`, so the properties are checked on
//! real archive bytes rather than on the writer's own bookkeeping.

mod common;

use async_trait::async_trait;
use bucket_zip::backend::{BackendResult, ObjectKey, ReadStream, WriteSession};
use bucket_zip::config::MIN_PART_SIZE;
use bucket_zip::error::{ArchiveError, AssembleError, FetchError, SinkError};
use bucket_zip::{
    ArchiveRequest, Assembler, CompressionType, MemoryClient, ObjectClient, ObjectStoreClient,
    StoreProvider, ZipConfig,
};
use common::{read_zip, test_config};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const CODE_JS: &[u8] = b"console.log('zip me');\n";
const DATE_JSON: &[u8] = br#"{"date": "2019-04-01"}"#;
const HELLO_TXT: &[u8] = b"Hello World";

fn zipfodder(client: &MemoryClient) {
    client.insert("bucket", "zipfodder/hello.txt", HELLO_TXT);
    client.insert("bucket", "zipfodder/code.js", CODE_JS);
    client.insert("bucket", "zipfodder/date.json", DATE_JSON);
    client.insert("bucket", "zipfodder/md5.json", b"{}");
    client.insert("bucket", "unrelated/file.txt", b"not archived");
}

fn assembler(client: &MemoryClient) -> Assembler {
    Assembler::new(Arc::new(client.clone()), test_config())
}

fn zipfodder_request() -> ArchiveRequest {
    ArchiveRequest::new("bucket", "zipfodder", "bucket", "zipped/zip.zip")
}

#[tokio::test]
async fn test_zipfodder_roundtrip() {
    let client = MemoryClient::new();
    zipfodder(&client);

    let report = assembler(&client).assemble(&zipfodder_request()).await.unwrap();
    assert!(client.exists("bucket", "zipped/zip.zip").await.unwrap());

    let archive = client.get("bucket", "zipped/zip.zip").unwrap();
    assert_eq!(report.archive_size, archive.len() as u64);

    let entries = read_zip(&archive).unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["zipfodder/code.js", "zipfodder/date.json", "zipfodder/hello.txt"]
    );
    assert_eq!(entries[0].data, CODE_JS);
    assert_eq!(entries[1].data, DATE_JSON);
    assert_eq!(entries[2].data, HELLO_TXT);
    assert!(entries.iter().all(|e| e.method == 0));
}

#[tokio::test]
async fn test_deflate_roundtrip() {
    let client = MemoryClient::new();
    zipfodder(&client);
    let big = b"repetitive payload ".repeat(4096);
    client.insert("bucket", "zipfodder/big.txt", &big);

    let config = bucket_zip::ZipConfig {
        compression: CompressionType::Deflate { level: 6 },
        ..test_config()
    };
    Assembler::new(Arc::new(client.clone()), config)
        .assemble(&zipfodder_request())
        .await
        .unwrap();

    let archive = client.get("bucket", "zipped/zip.zip").unwrap();
    assert!(archive.len() < big.len());

    let entries = read_zip(&archive).unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0].name, "zipfodder/big.txt");
    assert_eq!(entries[0].data, big);
    assert!(entries.iter().all(|e| e.method == 8));
}

#[tokio::test]
async fn test_many_objects_keep_listing_order() {
    let client = MemoryClient::new();
    client.set_chunk_size(7);
    for i in (0..60).rev() {
        let key = format!("batch/obj-{:03}", i);
        client.insert("bucket", &key, format!("content of object {}", i));
    }
    let config = bucket_zip::ZipConfig {
        concurrency: 3,
        ..test_config()
    };

    let request = ArchiveRequest::new("bucket", "batch", "out", "batch.zip");
    Assembler::new(Arc::new(client.clone()), config)
        .assemble(&request)
        .await
        .unwrap();

    let entries = read_zip(&client.get("out", "batch.zip").unwrap()).unwrap();
    assert_eq!(entries.len(), 60);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.name, format!("batch/obj-{:03}", i));
        assert_eq!(entry.data, format!("content of object {}", i).as_bytes());
    }
}

#[tokio::test]
async fn test_archive_spanning_several_parts() {
    let client = MemoryClient::new();
    let large: Vec<u8> = (0..MIN_PART_SIZE + MIN_PART_SIZE / 2)
        .map(|i| (i % 251) as u8)
        .collect();
    client.insert("bucket", "large/blob.bin", &large);
    client.insert("bucket", "large/small.txt", b"small");

    let config = bucket_zip::ZipConfig {
        part_size: MIN_PART_SIZE,
        ..test_config()
    };
    let request = ArchiveRequest::new("bucket", "large", "bucket", "out/large.zip");
    let report = Assembler::new(Arc::new(client.clone()), config)
        .assemble(&request)
        .await
        .unwrap();
    assert!(report.archive_size > MIN_PART_SIZE as u64);

    let entries = read_zip(&client.get("bucket", "out/large.zip").unwrap()).unwrap();
    assert_eq!(entries[0].data, large);
    assert_eq!(entries[1].data, b"small");
}

#[tokio::test]
async fn test_object_deleted_after_listing_fails_assembly() {
    let client = MemoryClient::new();
    zipfodder(&client);
    client.vanish_after_list("zipfodder/date.json");

    let err = assembler(&client)
        .assemble(&zipfodder_request())
        .await
        .unwrap_err();

    match err {
        AssembleError::Fetch(fetch) => assert!(fetch.is_not_found()),
        other => panic!("expected fetch failure, got {other}"),
    }
    assert!(!client.exists("bucket", "zipped/zip.zip").await.unwrap());
    assert_eq!(client.aborted_sessions(), 1);
}

#[tokio::test]
async fn test_failed_rerun_keeps_previous_archive() {
    let client = MemoryClient::new();
    zipfodder(&client);
    assembler(&client).assemble(&zipfodder_request()).await.unwrap();
    let first = client.get("bucket", "zipped/zip.zip").unwrap();

    client.fail_reads("zipfodder/hello.txt", 100);
    let err = assembler(&client)
        .assemble(&zipfodder_request())
        .await
        .unwrap_err();

    assert!(matches!(err, AssembleError::Fetch(FetchError::Permanent { attempts: 3, .. })));
    assert_eq!(client.get("bucket", "zipped/zip.zip").unwrap(), first);
}

#[tokio::test]
async fn test_reassembly_overwrites_destination() {
    let client = MemoryClient::new();
    zipfodder(&client);

    assembler(&client).assemble(&zipfodder_request()).await.unwrap();
    let first = read_zip(&client.get("bucket", "zipped/zip.zip").unwrap()).unwrap();
    assert_eq!(first[2].data, HELLO_TXT);

    client.insert("bucket", "zipfodder/hello.txt", b"Hello again");
    assembler(&client).assemble(&zipfodder_request()).await.unwrap();
    let second = read_zip(&client.get("bucket", "zipped/zip.zip").unwrap()).unwrap();

    assert_eq!(second.len(), 3);
    assert_eq!(second[2].data, b"Hello again");
}

#[tokio::test]
async fn test_identical_sources_give_identical_archives() {
    let client = MemoryClient::new();
    zipfodder(&client);

    assembler(&client).assemble(&zipfodder_request()).await.unwrap();
    let first = client.get("bucket", "zipped/zip.zip").unwrap();
    assembler(&client).assemble(&zipfodder_request()).await.unwrap();
    let second = client.get("bucket", "zipped/zip.zip").unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_keep_local_copy() {
    let dir = tempfile::tempdir().unwrap();
    let keep = dir.path().join("zip.zip");
    let client = MemoryClient::new();
    zipfodder(&client);

    let request = zipfodder_request().with_keep(&keep);
    assembler(&client).assemble(&request).await.unwrap();

    let local = std::fs::read(&keep).unwrap();
    assert_eq!(local, client.get("bucket", "zipped/zip.zip").unwrap().as_ref());
}

#[tokio::test]
async fn test_object_store_client_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let client = ObjectStoreClient::new(StoreProvider::Local {
        root: dir.path().to_path_buf(),
    });
    for (key, data) in [
        ("zipfodder/code.js", CODE_JS),
        ("zipfodder/date.json", DATE_JSON),
        ("zipfodder/hello.txt", HELLO_TXT),
    ] {
        let mut session = client.open_write("bucket", key).await.unwrap();
        session.write_part(bytes::Bytes::from_static(data)).await.unwrap();
        session.commit().await.unwrap();
    }

    let client = Arc::new(client);
    Assembler::new(client.clone(), test_config())
        .assemble(&zipfodder_request())
        .await
        .unwrap();

    let archive = std::fs::read(dir.path().join("bucket/zipped/zip.zip")).unwrap();
    let entries = read_zip(&archive).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1].data, DATE_JSON);
}

/// Delegating client that cancels a token when a given key is opened
struct CancellingClient {
    inner: MemoryClient,
    cancel: CancellationToken,
    trigger: String,
}

#[async_trait]
impl ObjectClient for CancellingClient {
    async fn list(&self, bucket: &str, prefix: &str) -> BackendResult<Vec<ObjectKey>> {
        self.inner.list(bucket, prefix).await
    }

    async fn open_read(&self, bucket: &str, key: &str, offset: u64) -> BackendResult<ReadStream> {
        if key == self.trigger {
            self.cancel.cancel();
        }
        self.inner.open_read(bucket, key, offset).await
    }

    async fn open_write(&self, bucket: &str, key: &str) -> BackendResult<Box<dyn WriteSession>> {
        self.inner.open_write(bucket, key).await
    }

    async fn exists(&self, bucket: &str, key: &str) -> BackendResult<bool> {
        self.inner.exists(bucket, key).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> BackendResult<()> {
        self.inner.delete(bucket, key).await
    }

    fn backend_name(&self) -> &str {
        "cancelling"
    }
}

#[tokio::test]
async fn test_cancellation_mid_run_aborts_upload() {
    let inner = MemoryClient::new();
    zipfodder(&inner);
    let cancel = CancellationToken::new();
    let client = Arc::new(CancellingClient {
        inner: inner.clone(),
        cancel: cancel.clone(),
        trigger: "zipfodder/date.json".to_string(),
    });

    let err = Assembler::new(client, test_config())
        .assemble_with_cancel(&zipfodder_request(), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, AssembleError::Cancelled));
    assert!(inner.get("bucket", "zipped/zip.zip").is_none());
    assert_eq!(inner.aborted_sessions(), 1);
}

#[tokio::test]
async fn test_failed_part_upload_aborts_assembly() {
    let client = MemoryClient::new();
    let large: Vec<u8> = (0..2 * MIN_PART_SIZE).map(|i| (i % 253) as u8).collect();
    client.insert("bucket", "large/blob.bin", &large);
    client.fail_writes_after(1);

    let config = ZipConfig {
        part_size: MIN_PART_SIZE,
        ..test_config()
    };
    let request = ArchiveRequest::new("bucket", "large", "bucket", "out/large.zip");
    let err = Assembler::new(Arc::new(client.clone()), config)
        .assemble(&request)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AssembleError::Archive(ArchiveError::Sink(SinkError::Write { .. }))
    ));
    assert!(client.get("bucket", "out/large.zip").is_none());
    assert_eq!(client.aborted_sessions(), 1);
}

#[tokio::test]
async fn test_failed_commit_aborts_upload_and_local_copy() {
    let dir = tempfile::tempdir().unwrap();
    let keep = dir.path().join("zip.zip");
    let client = MemoryClient::new();
    zipfodder(&client);
    client.fail_commits();

    let request = zipfodder_request().with_keep(&keep);
    let err = assembler(&client).assemble(&request).await.unwrap_err();

    assert!(matches!(err, AssembleError::Sink(SinkError::Write { .. })));
    assert_eq!(client.aborted_sessions(), 1);
    assert!(client.get("bucket", "zipped/zip.zip").is_none());
    assert!(!keep.exists());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_upload_times_out() {
    let client = MemoryClient::new();
    zipfodder(&client);
    client.stall_writes();

    let config = ZipConfig {
        flush_timeout_secs: 2,
        ..test_config()
    };
    let err = Assembler::new(Arc::new(client.clone()), config)
        .assemble(&zipfodder_request())
        .await
        .unwrap_err();

    match err {
        AssembleError::Sink(SinkError::Timeout { timeout_ms, .. }) => assert_eq!(timeout_ms, 2000),
        other => panic!("expected flush timeout, got {other}"),
    }
    assert!(client.get("bucket", "zipped/zip.zip").is_none());
    assert_eq!(client.aborted_sessions(), 1);
}

/// Delegating client with fixed latency per open and per chunk
struct SlowClient {
    inner: MemoryClient,
    open_delay: Duration,
    chunk_delay: Duration,
    start: Instant,
    opened: Mutex<Vec<(String, Duration)>>,
}

impl SlowClient {
    fn new(inner: MemoryClient, open_delay: Duration, chunk_delay: Duration) -> Self {
        Self {
            inner,
            open_delay,
            chunk_delay,
            start: Instant::now(),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// (key, time since creation) for every finished open
    fn opened(&self) -> Vec<(String, Duration)> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectClient for SlowClient {
    async fn list(&self, bucket: &str, prefix: &str) -> BackendResult<Vec<ObjectKey>> {
        self.inner.list(bucket, prefix).await
    }

    async fn open_read(&self, bucket: &str, key: &str, offset: u64) -> BackendResult<ReadStream> {
        tokio::time::sleep(self.open_delay).await;
        let stream = self.inner.open_read(bucket, key, offset).await?;
        self.opened
            .lock()
            .unwrap()
            .push((key.to_string(), self.start.elapsed()));

        let delay = self.chunk_delay;
        Ok(stream
            .then(move |chunk| async move {
                tokio::time::sleep(delay).await;
                chunk
            })
            .boxed())
    }

    async fn open_write(&self, bucket: &str, key: &str) -> BackendResult<Box<dyn WriteSession>> {
        self.inner.open_write(bucket, key).await
    }

    async fn exists(&self, bucket: &str, key: &str) -> BackendResult<bool> {
        self.inner.exists(bucket, key).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> BackendResult<()> {
        self.inner.delete(bucket, key).await
    }

    fn backend_name(&self) -> &str {
        "slow"
    }
}

#[tokio::test(start_paused = true)]
async fn test_opens_overlap_with_writing() {
    let inner = MemoryClient::new();
    inner.set_chunk_size(1);
    for i in 0..4 {
        inner.insert("bucket", &format!("p/{}", i), b"12345");
    }
    // 100 ms per open, 5 x 20 ms per body
    let client = Arc::new(SlowClient::new(
        inner.clone(),
        Duration::from_millis(100),
        Duration::from_millis(20),
    ));
    let config = ZipConfig {
        concurrency: 4,
        ..test_config()
    };

    let start = Instant::now();
    Assembler::new(client.clone(), config)
        .assemble(&ArchiveRequest::new("bucket", "p", "out", "p.zip"))
        .await
        .unwrap();
    let elapsed = start.elapsed();

    // Every open finished before the first body was fully written
    let opened = client.opened();
    assert_eq!(opened.len(), 4);
    for (key, at) in &opened {
        assert!(*at < Duration::from_millis(150), "{key} opened at {at:?}");
    }
    // One open latency plus four bodies; sequential opens would take 800 ms
    assert!(elapsed < Duration::from_millis(600), "assembly took {elapsed:?}");

    let entries = read_zip(&inner.get("out", "p.zip").unwrap()).unwrap();
    assert_eq!(entries.len(), 4);
    assert!(entries.iter().all(|e| e.data == b"12345"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_one_opens_in_sequence() {
    let inner = MemoryClient::new();
    inner.set_chunk_size(1);
    for i in 0..3 {
        inner.insert("bucket", &format!("p/{}", i), b"12345");
    }
    let client = Arc::new(SlowClient::new(
        inner.clone(),
        Duration::from_millis(100),
        Duration::from_millis(20),
    ));
    let config = ZipConfig {
        concurrency: 1,
        ..test_config()
    };

    Assembler::new(client.clone(), config)
        .assemble(&ArchiveRequest::new("bucket", "p", "out", "p.zip"))
        .await
        .unwrap();

    // Each open waits for the previous object to be written
    let opened: Vec<_> = client.opened().into_iter().map(|(_, at)| at).collect();
    assert_eq!(opened.len(), 3);
    for pair in opened.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(200), "{opened:?}");
    }
}
