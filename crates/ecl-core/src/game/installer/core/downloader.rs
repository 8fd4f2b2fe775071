use crate::game::installer::config::DownloadConfig;
use crate::game::installer::core::throughput::ThroughputMonitor;
use crate::game::installer::types::{CancelToken, DownloadTask};
use crate::utils::hash::{hashes_match, sha1_file, sha1_handle};
use fs4::FileExt;
use futures::StreamExt;
use rand::Rng;
use reqwest::header::RANGE;
use reqwest::{Client, Response, StatusCode};
use sha1::{Digest, Sha1};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs::{create_dir_all, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("SHA1 mismatch for {url}: expected {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("size mismatch for {url}: expected {expected} bytes, got {actual}")]
    Size {
        url: String,
        expected: u64,
        actual: u64,
    },

    #[error("transfer from {url} stalled ({observed_bytes_per_sec} B/s over {window:?})")]
    Stall {
        url: String,
        observed_bytes_per_sec: u64,
        window: Duration,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("download of {url} cancelled")]
    Cancelled { url: String },

    #[error("failed to download {url} after {attempts} attempts: {cause}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        cause: Box<FetchError>,
    },
}

impl FetchError {
    /// Transient failures worth another attempt. Local I/O problems and
    /// cancellation are not.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            FetchError::Network { .. }
                | FetchError::Status { .. }
                | FetchError::Integrity { .. }
                | FetchError::Size { .. }
                | FetchError::Stall { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled { .. })
    }

    fn io(path: &Path, source: io::Error) -> Self {
        FetchError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Destination already held a valid file; no request was made
    Cached,
    Downloaded { bytes: u64, resumed_from: u64 },
}

/// How often a run waiting on another run's `.part` file retries the lock
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Build the shared HTTP client. One client per run keeps a single
/// connection pool across every fetch.
pub fn build_http_client(config: &DownloadConfig) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(config.connect_timeout())
        .pool_max_idle_per_host(config.concurrency.max(1))
        .build()
}

/// `<dest>.part`, where in-flight and resumable bytes live
pub fn part_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    dest.with_file_name(format!("{}.part", name))
}

enum Sink<'a> {
    File(&'a mut File),
    Memory(&'a mut Vec<u8>),
}

impl Sink<'_> {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self {
            Sink::File(file) => file.write_all(chunk).await,
            Sink::Memory(buf) => {
                buf.extend_from_slice(chunk);
                Ok(())
            }
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::File(file) => file.flush().await,
            Sink::Memory(_) => Ok(()),
        }
    }
}

/// Fetches one URL to one path with resume, retry, stall detection and
/// SHA1 verification. Clones share the connection pool.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    config: Arc<DownloadConfig>,
}

impl Fetcher {
    pub fn new(config: DownloadConfig) -> reqwest::Result<Self> {
        let client = build_http_client(&config)?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: DownloadConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Make sure `task.dest` holds the requested content.
    ///
    /// The `.part` file is held under an exclusive lock for the whole fetch,
    /// so concurrent runs sharing a destination take turns; a run that waited
    /// usually finds the file already verified.
    pub async fn fetch(
        &self,
        task: &DownloadTask,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome, FetchError> {
        let url = self.config.source.rewrite(&task.url);

        if self.existing_is_valid(task).await? {
            log::debug!("File exists and is valid, skipping: {:?}", task.dest);
            return Ok(FetchOutcome::Cached);
        }
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled { url });
        }

        if let Some(parent) = task.dest.parent() {
            create_dir_all(parent)
                .await
                .map_err(|e| FetchError::io(parent, e))?;
        }

        let part = part_path(&task.dest);
        let lock = self.lock_part(&url, &part, cancel).await?;

        if self.existing_is_valid(task).await? {
            log::debug!("Completed by another run while waiting: {:?}", task.dest);
            if lock.metadata().map(|m| m.len() == 0).unwrap_or(false) {
                discard_part(&part).await;
            }
            return Ok(FetchOutcome::Cached);
        }

        log::debug!("Downloading: {} -> {:?}", url, task.dest);
        let result = self
            .with_retries(&url, cancel, |_| {
                self.fetch_once(&url, task, &part, &lock, cancel)
            })
            .await;

        // A cancelled transfer stays resumable; anything else is dropped
        if matches!(&result, Err(e) if !e.is_cancelled()) {
            discard_part(&part).await;
        }
        result
    }

    /// Fetch a small document into memory, verifying its SHA1 when given.
    pub async fn fetch_bytes(
        &self,
        url: &str,
        expected_sha1: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, FetchError> {
        let url = self.config.source.rewrite(url);
        log::debug!("Downloading to memory: {}", url);
        self.with_retries(&url, cancel, |_| {
            self.fetch_bytes_once(&url, expected_sha1, cancel)
        })
        .await
    }

    async fn with_retries<T, F, Fut>(
        &self,
        url: &str,
        cancel: &CancelToken,
        mut attempt_once: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled {
                    url: url.to_string(),
                });
            }

            match attempt_once(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retriable() => return Err(e),
                Err(e) => {
                    if attempt >= max_attempts {
                        log::error!("Download failed after {} attempts: {}", attempt, e);
                        return Err(FetchError::Exhausted {
                            url: url.to_string(),
                            attempts: attempt,
                            cause: Box::new(e),
                        });
                    }

                    let delay = self.backoff(attempt);
                    log::warn!(
                        "Download failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(FetchError::Cancelled { url: url.to_string() });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Linear backoff with up to a quarter of the base delay as jitter
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff_ms;
        let jitter = if base >= 4 {
            rand::rng().random_range(0..=base / 4)
        } else {
            0
        };
        Duration::from_millis(base * attempt as u64 + jitter)
    }

    /// Whether `task.dest` already holds the requested content. A mismatching
    /// file is left alone; the promoted download replaces it.
    async fn existing_is_valid(&self, task: &DownloadTask) -> Result<bool, FetchError> {
        let meta = match tokio::fs::metadata(&task.dest).await {
            Ok(meta) if meta.is_file() => meta,
            _ => return Ok(false),
        };

        if let Some(expected) = &task.sha1 {
            let actual = sha1_file(&task.dest)
                .await
                .map_err(|e| FetchError::io(&task.dest, e))?;
            if hashes_match(&actual, expected) {
                return Ok(true);
            }
            log::info!(
                "File exists but hash mismatches ({} != {}), re-downloading: {:?}",
                actual,
                expected,
                task.dest
            );
            return Ok(false);
        }

        match task.size {
            Some(size) => Ok(meta.len() == size),
            None => Ok(true),
        }
    }

    /// Open `part` and wait for an exclusive lock on it. If the holder
    /// promoted or discarded the file meanwhile, start over on the new path.
    async fn lock_part(
        &self,
        url: &str,
        part: &Path,
        cancel: &CancelToken,
    ) -> Result<std::fs::File, FetchError> {
        let mut waiting = false;
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(part)
                .await
                .map_err(|e| FetchError::io(part, e))?
                .into_std()
                .await;

            loop {
                match file.try_lock_exclusive() {
                    Ok(()) => break,
                    Err(e) if is_contended(&e) => {
                        if !waiting {
                            log::debug!("Waiting for another download of {:?}", part);
                            waiting = true;
                        }
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                return Err(FetchError::Cancelled { url: url.to_string() });
                            }
                            _ = tokio::time::sleep(LOCK_POLL_INTERVAL) => {}
                        }
                    }
                    Err(e) => return Err(FetchError::io(part, e)),
                }
            }

            if still_at_path(&file, part)
                .await
                .map_err(|e| FetchError::io(part, e))?
            {
                return Ok(file);
            }
        }
    }

    /// One attempt. A retriable failure empties the partial file so the
    /// next attempt starts from scratch.
    async fn fetch_once(
        &self,
        url: &str,
        task: &DownloadTask,
        part: &Path,
        lock: &std::fs::File,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome, FetchError> {
        let result = self.transfer(url, task, part, lock, cancel).await;
        if let Err(e) = &result {
            if e.is_retriable() {
                if let Err(e) = lock.set_len(0) {
                    log::warn!("Failed to reset partial file {:?}: {}", part, e);
                }
            }
        }
        result
    }

    async fn transfer(
        &self,
        url: &str,
        task: &DownloadTask,
        part: &Path,
        lock: &std::fs::File,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome, FetchError> {
        let start = Instant::now();
        let existing = lock.metadata().map(|m| m.len()).unwrap_or(0);

        // A previous run may have received every byte but stopped before verifying
        if existing > 0 && task.size == Some(existing) {
            log::debug!("Partial file already complete, verifying: {:?}", part);
            self.verify_and_promote(url, task, part, lock).await?;
            return Ok(FetchOutcome::Downloaded {
                bytes: 0,
                resumed_from: existing,
            });
        }

        let mut request = self.client.get(url);
        if existing > 0 {
            log::debug!("Resuming {} from byte {}", url, existing);
            request = request.header(RANGE, format!("bytes={}-", existing));
        }
        let response = self.send(url, request, cancel).await?;

        let handle = lock.try_clone().map_err(|e| FetchError::io(part, e))?;
        let mut file = File::from_std(handle);
        let status = response.status();
        let resumed_from = if status == StatusCode::PARTIAL_CONTENT && existing > 0 {
            file.seek(io::SeekFrom::End(0))
                .await
                .map_err(|e| FetchError::io(part, e))?;
            existing
        } else if status.is_success() {
            file.set_len(0).await.map_err(|e| FetchError::io(part, e))?;
            file.seek(io::SeekFrom::Start(0))
                .await
                .map_err(|e| FetchError::io(part, e))?;
            0
        } else {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        };

        let (received, chunks) = self
            .stream_body(url, response, &mut Sink::File(&mut file), None, part, cancel)
            .await?;
        file.sync_all()
            .await
            .map_err(|e| FetchError::io(part, e))?;
        drop(file);

        self.verify_and_promote(url, task, part, lock).await?;

        let secs = start.elapsed().as_secs_f64();
        let throughput = (received as f64 / 1024.0 / 1024.0) / secs.max(0.001);
        log::info!(
            "Download stats: url={}, size={} bytes, resumed_from={}, chunks={}, time={:.2}s, throughput={:.2} MB/s",
            url,
            received,
            resumed_from,
            chunks,
            secs,
            throughput
        );

        Ok(FetchOutcome::Downloaded {
            bytes: received,
            resumed_from,
        })
    }

    async fn fetch_bytes_once(
        &self,
        url: &str,
        expected_sha1: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, FetchError> {
        let response = self.send(url, self.client.get(url), cancel).await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let capacity = response.content_length().unwrap_or(0) as usize;
        let mut bytes = Vec::with_capacity(capacity);
        let mut hasher = Sha1::new();
        self.stream_body(
            url,
            response,
            &mut Sink::Memory(&mut bytes),
            Some(&mut hasher),
            Path::new(url),
            cancel,
        )
        .await?;

        if let Some(expected) = expected_sha1 {
            let actual = format!("{:x}", hasher.finalize());
            if !hashes_match(&actual, expected) {
                return Err(FetchError::Integrity {
                    url: url.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        Ok(bytes)
    }

    async fn send(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
        cancel: &CancelToken,
    ) -> Result<Response, FetchError> {
        let read_timeout = self.config.read_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled { url: url.to_string() }),
            result = tokio::time::timeout(read_timeout, request.send()) => match result {
                Err(_) => Err(FetchError::Stall {
                    url: url.to_string(),
                    observed_bytes_per_sec: 0,
                    window: read_timeout,
                }),
                Ok(Err(source)) => Err(FetchError::Network { url: url.to_string(), source }),
                Ok(Ok(response)) => Ok(response),
            },
        }
    }

    /// Drain the response body into `sink`. Returns (bytes, chunks).
    /// On cancellation the sink is flushed so a file sink stays cleanly partial.
    async fn stream_body(
        &self,
        url: &str,
        response: Response,
        sink: &mut Sink<'_>,
        mut hasher: Option<&mut Sha1>,
        sink_path: &Path,
        cancel: &CancelToken,
    ) -> Result<(u64, u64), FetchError> {
        let read_timeout = self.config.read_timeout();
        let window = self.config.stall_window();
        let tick = window.min(read_timeout) / 4;
        let mut ticker = tokio::time::interval(
            tick.clamp(Duration::from_millis(10), Duration::from_secs(1)),
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut monitor =
            ThroughputMonitor::new(window, self.config.stall_floor_bytes_per_sec, Instant::now());
        let mut last_chunk = Instant::now();
        let mut received: u64 = 0;
        let mut chunks: u64 = 0;
        let mut stream = response.bytes_stream();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Err(e) = sink.flush().await {
                        log::warn!("Failed to flush partial download {:?}: {}", sink_path, e);
                    }
                    log::warn!("Download cancelled after {} bytes: {}", received, url);
                    return Err(FetchError::Cancelled { url: url.to_string() });
                }
                next = stream.next() => match next {
                    Some(Ok(chunk)) => {
                        sink.write(&chunk)
                            .await
                            .map_err(|e| FetchError::io(sink_path, e))?;
                        if let Some(hasher) = hasher.as_mut() {
                            hasher.update(&chunk);
                        }
                        received += chunk.len() as u64;
                        chunks += 1;

                        let now = Instant::now();
                        last_chunk = now;
                        monitor.record(chunk.len() as u64, now);
                        if let Some(rate) = monitor.check(now) {
                            return Err(FetchError::Stall {
                                url: url.to_string(),
                                observed_bytes_per_sec: rate,
                                window,
                            });
                        }
                    }
                    Some(Err(source)) => {
                        return Err(FetchError::Network { url: url.to_string(), source });
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if now.duration_since(last_chunk) >= read_timeout {
                        return Err(FetchError::Stall {
                            url: url.to_string(),
                            observed_bytes_per_sec: 0,
                            window: read_timeout,
                        });
                    }
                    if let Some(rate) = monitor.check(now) {
                        return Err(FetchError::Stall {
                            url: url.to_string(),
                            observed_bytes_per_sec: rate,
                            window,
                        });
                    }
                }
            }
        }

        sink.flush()
            .await
            .map_err(|e| FetchError::io(sink_path, e))?;
        Ok((received, chunks))
    }

    /// Check what actually landed on disk, then move it into place.
    async fn verify_and_promote(
        &self,
        url: &str,
        task: &DownloadTask,
        part: &Path,
        lock: &std::fs::File,
    ) -> Result<(), FetchError> {
        if let Some(expected) = &task.sha1 {
            let actual = sha1_handle(lock)
                .await
                .map_err(|e| FetchError::io(part, e))?;
            if !hashes_match(&actual, expected) {
                return Err(FetchError::Integrity {
                    url: url.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
            log::debug!("SHA1 validated: {}", actual);
        } else if let Some(expected) = task.size {
            let actual = lock
                .metadata()
                .map_err(|e| FetchError::io(part, e))?
                .len();
            if expected != actual {
                return Err(FetchError::Size {
                    url: url.to_string(),
                    expected,
                    actual,
                });
            }
        }

        tokio::fs::rename(part, &task.dest)
            .await
            .map_err(|e| FetchError::io(&task.dest, e))
    }
}

/// Whether `locked` is still the file at `path`
async fn still_at_path(locked: &std::fs::File, path: &Path) -> io::Result<bool> {
    let on_disk = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let held = locked.metadata()?;
        Ok(held.dev() == on_disk.dev() && held.ino() == on_disk.ino())
    }
    #[cfg(not(unix))]
    {
        let _ = (locked, on_disk);
        Ok(true)
    }
}

/// `ERROR_LOCK_VIOLATION`
const LOCK_VIOLATION: i32 = 33;

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || (cfg!(windows) && e.raw_os_error() == Some(LOCK_VIOLATION))
}

async fn discard_part(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await {
        if e.kind() != io::ErrorKind::NotFound {
            log::warn!("Failed to discard partial file {:?}: {}", part, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::installer::types::TaskKind;
    use crate::utils::hash::sha1_bytes;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &[u8] = b"the quick brown fox jumps over the lazy dog";

    fn fetcher(max_retries: u32) -> Fetcher {
        Fetcher::new(DownloadConfig {
            max_retries,
            retry_backoff_ms: 0,
            ..DownloadConfig::default()
        })
        .unwrap()
    }

    fn task(server: &MockServer, dest: &Path) -> DownloadTask {
        DownloadTask::new(format!("{}/file.bin", server.uri()), dest, TaskKind::Library)
            .with_sha1(sha1_bytes(BODY))
    }

    #[tokio::test]
    async fn valid_existing_file_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        std::fs::write(&dest, BODY).unwrap();

        let outcome = fetcher(0)
            .fetch(&task(&server, &dest), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Cached);
    }

    #[tokio::test]
    async fn downloads_and_promotes_verified_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("nested").join("file.bin");

        let outcome = fetcher(0)
            .fetch(&task(&server, &dest), &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Downloaded {
                bytes: BODY.len() as u64,
                resumed_from: 0
            }
        );
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn corrupt_existing_file_is_replaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        std::fs::write(&dest, b"garbage").unwrap();

        fetcher(0)
            .fetch(&task(&server, &dest), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
    }

    #[tokio::test]
    async fn hash_mismatch_leaves_no_file_behind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("file.bin");

        let err = fetcher(1)
            .fetch(&task(&server, &dest), &CancelToken::never())
            .await
            .unwrap_err();

        match err {
            FetchError::Exhausted { attempts, cause, .. } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*cause, FetchError::Integrity { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn resumes_from_partial_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Range", "bytes=10-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(&BODY[10..]))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        std::fs::write(part_path(&dest), &BODY[..10]).unwrap();

        let outcome = fetcher(0)
            .fetch(&task(&server, &dest), &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FetchOutcome::Downloaded {
                bytes: (BODY.len() - 10) as u64,
                resumed_from: 10
            }
        );
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
    }

    #[tokio::test]
    async fn full_response_to_range_request_rewrites_from_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        std::fs::write(part_path(&dest), b"stale-prefix").unwrap();

        let outcome = fetcher(0)
            .fetch(&task(&server, &dest), &CancelToken::never())
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            FetchOutcome::Downloaded { resumed_from: 0, .. }
        ));
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
    }

    #[tokio::test]
    async fn http_errors_exhaust_the_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("file.bin");

        let err = fetcher(2)
            .fetch(&task(&server, &dest), &CancelToken::never())
            .await
            .unwrap_err();

        match err {
            FetchError::Exhausted { attempts, cause, .. } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*cause, FetchError::Status { status: 404, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn slow_origin_hits_read_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(BODY)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let fetcher = Fetcher::new(DownloadConfig {
            max_retries: 0,
            retry_backoff_ms: 0,
            read_timeout_ms: 100,
            ..DownloadConfig::default()
        })
        .unwrap();

        let err = fetcher
            .fetch(&task(&server, &dest), &CancelToken::never())
            .await
            .unwrap_err();

        match err {
            FetchError::Exhausted { cause, .. } => {
                assert!(matches!(*cause, FetchError::Stall { .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let (handle, token) = CancelToken::pair();
        handle.cancel();

        let err = fetcher(3)
            .fetch(&task(&server, &dest), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn fetch_bytes_verifies_checksum() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc.json"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .mount(&server)
            .await;

        let url = format!("{}/doc.json", server.uri());
        let fetcher = fetcher(0);

        let bytes = fetcher
            .fetch_bytes(&url, Some(&sha1_bytes(BODY)), &CancelToken::never())
            .await
            .unwrap();
        assert_eq!(bytes, BODY);

        let err = fetcher
            .fetch_bytes(&url, Some("0000"), &CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn complete_but_corrupt_partial_is_refetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        // Right length, wrong bytes: only a check of the file itself catches this
        std::fs::write(part_path(&dest), vec![0u8; BODY.len()]).unwrap();
        let task = task(&server, &dest).with_size(BODY.len() as u64);

        let outcome = fetcher(1).fetch(&task, &CancelToken::never()).await.unwrap();

        assert!(matches!(
            outcome,
            FetchOutcome::Downloaded { resumed_from: 0, .. }
        ));
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
    }

    #[tokio::test]
    async fn concurrent_fetches_of_one_destination_take_turns() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(BODY)
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("objects").join("ab").join("obj");
        let task = task(&server, &dest);
        let (first, second) = (fetcher(0), fetcher(0));

        let (cancel_a, cancel_b) = (CancelToken::never(), CancelToken::never());
        let (a, b) = tokio::join!(
            first.fetch(&task, &cancel_a),
            second.fetch(&task, &cancel_b)
        );
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, FetchOutcome::Cached));

        assert_eq!(
            outcomes,
            vec![
                FetchOutcome::Downloaded {
                    bytes: BODY.len() as u64,
                    resumed_from: 0
                },
                FetchOutcome::Cached,
            ]
        );
        assert_eq!(std::fs::read(&dest).unwrap(), BODY);
        assert!(!part_path(&dest).exists());
    }

    /// Plain HTTP origin that sends `body` in slices and honours `Range: bytes=N-`.
    /// Records the start offset of every request.
    async fn trickling_origin(body: Arc<Vec<u8>>, offsets: Arc<Mutex<Vec<u64>>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let body = body.clone();
                let offsets = offsets.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }

                    let head = String::from_utf8_lossy(&request).to_ascii_lowercase();
                    let from = head
                        .lines()
                        .find_map(|l| l.strip_prefix("range: bytes="))
                        .and_then(|r| r.trim().trim_end_matches('-').parse::<u64>().ok())
                        .unwrap_or(0);
                    offsets.lock().unwrap().push(from);

                    let len = body.len() as u64;
                    let status = if from > 0 {
                        format!(
                            "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {}-{}/{}\r\n",
                            from,
                            len - 1,
                            len
                        )
                    } else {
                        "HTTP/1.1 200 OK\r\n".to_string()
                    };
                    let response = format!(
                        "{}Content-Length: {}\r\nConnection: close\r\n\r\n",
                        status,
                        len - from
                    );
                    if socket.write_all(response.as_bytes()).await.is_err() {
                        return;
                    }
                    for slice in body[from as usize..].chunks(64 * 1024) {
                        if socket.write_all(slice).await.is_err() {
                            return;
                        }
                        tokio::time::sleep(Duration::from_millis(2)).await;
                    }
                });
            }
        });

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn interrupted_download_resumes_without_refetching() {
        const SIZE: usize = 10 * 1024 * 1024;
        const HALF: u64 = (SIZE / 2) as u64;

        let body: Arc<Vec<u8>> = Arc::new((0..SIZE).map(|i| (i % 251) as u8).collect());
        let offsets = Arc::new(Mutex::new(Vec::new()));
        let origin = trickling_origin(body.clone(), offsets.clone()).await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("client.jar");
        let part = part_path(&dest);
        let task = DownloadTask::new(format!("{}/client.jar", origin), &dest, TaskKind::ClientJar)
            .with_sha1(sha1_bytes(&body))
            .with_size(SIZE as u64);
        let fetcher = fetcher(0);

        // Stop the first run once half the file is on disk
        let (handle, token) = CancelToken::pair();
        let watcher = tokio::spawn({
            let part = part.clone();
            async move {
                loop {
                    let len = tokio::fs::metadata(&part).await.map(|m| m.len()).unwrap_or(0);
                    if len >= HALF {
                        handle.cancel();
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        });
        let err = fetcher.fetch(&task, &token).await.unwrap_err();
        watcher.await.unwrap();
        assert!(err.is_cancelled());

        // Cleanly partial: a prefix of the body, never promoted
        assert!(!dest.exists());
        let partial = std::fs::read(&part).unwrap();
        let resumed = partial.len() as u64;
        assert!(resumed >= HALF && resumed < SIZE as u64);
        assert_eq!(&partial[..], &body[..partial.len()]);

        let outcome = fetcher.fetch(&task, &CancelToken::never()).await.unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::Downloaded {
                bytes: SIZE as u64 - resumed,
                resumed_from: resumed
            }
        );
        assert_eq!(sha1_file(&dest).await.unwrap(), sha1_bytes(&body));
        assert!(!part.exists());
        assert_eq!(*offsets.lock().unwrap(), vec![0, resumed]);
    }

    #[test]
    fn part_path_is_a_sibling() {
        assert_eq!(
            part_path(Path::new("/mc/libraries/a/b.jar")),
            Path::new("/mc/libraries/a/b.jar.part")
        );
    }
}
