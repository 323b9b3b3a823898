//! Parallel download engine with size and SHA-1 verification.
//!
//! A [`Batch`] collects pending [`Download`] entries and fetches them all at once on
//! a fixed pool of worker tasks that drain a shared queue. Content is streamed to a
//! temporary sibling file and renamed over the destination only once verification
//! passed, so a destination either holds the complete declared bytes or nothing.
//! Entries failing verification or a transient fault are retried a bounded number
//! of times with a short backoff, persistent failures are collected into the batch
//! failure list. A single dispatcher aggregates byte and entry counters and reports
//! them at a bounded rate, and polls the handler for cancellation, which workers
//! observe at chunk boundaries.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use std::path::{Path, PathBuf};
use std::io::{self, Read, Seek};
use std::sync::Arc;
use std::fmt;

use sha1::{Digest, Sha1};

use reqwest::{header, Client, StatusCode};

use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tokio::sync::mpsc;


/// How many times an entry is attempted before giving up on it.
const ATTEMPT_LIMIT: u32 = 3;

/// Base delay between two attempts of the same entry, multiplied by the number of
/// attempts already made.
const RETRY_BACKOFF: Duration = Duration::from_millis(400);

/// Minimum delay between two intermediate progress reports.
const PROGRESS_PERIOD: Duration = Duration::from_millis(100);

/// A single pending download: a source URL, a destination file and the optional
/// expected size and SHA-1 used to verify the received content.
#[derive(Debug)]
pub struct Download {
    url: Box<str>,
    file: Box<Path>,
    size: Option<u32>,
    sha1: Option<[u8; 20]>,
    revalidate: bool,
    keep_open: bool,
}

impl Download {

    /// A download of the given URL into the given destination file.
    pub fn new(url: impl Into<Box<str>>, file: impl Into<Box<Path>>) -> Self {
        Self {
            url: url.into(),
            file: file.into(),
            size: None,
            sha1: None,
            revalidate: false,
            keep_open: false,
        }
    }

    /// A download of the given URL into the user cache directory, revalidated with
    /// conditional requests on later fetches (see [`Self::revalidate`]). The
    /// destination name is the hash of the URL, under a `portablemc-cache`
    /// directory in the user cache (or temporary) directory.
    pub fn cached(url: impl Into<Box<str>>) -> Self {

        let url = url.into();
        let name = {
            let mut digest = Sha1::new();
            digest.update(url.as_bytes());
            codec_hex(&digest.finalize())
        };

        let file = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("portablemc-cache")
            .join(name);

        Self::new(url, file).revalidate()

    }

    /// Declare the exact size the received content must have.
    pub fn expect_size(mut self, size: Option<u32>) -> Self {
        self.size = size;
        self
    }

    /// Declare the SHA-1 the received content must hash to.
    pub fn expect_sha1(mut self, sha1: Option<[u8; 20]>) -> Self {
        self.sha1 = sha1;
        self
    }

    /// Keep a read handle on the destination after a successful fetch, retrievable
    /// through [`Fetched::take_handle`].
    pub fn keep_open(mut self) -> Self {
        self.keep_open = true;
        self
    }

    /// Track the entity tag and last modification date of the remote content in a
    /// sibling `.cache` file and send conditional requests on later fetches: if the
    /// remote has not changed, or if it cannot be reached at all, the local copy is
    /// used as-is.
    pub fn revalidate(mut self) -> Self {
        self.revalidate = true;
        self
    }

    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[inline]
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// The temporary sibling the content is streamed into before the final rename.
    fn part_file(&self) -> PathBuf {
        sibling(&self.file, ".part")
    }

    /// The sibling file storing revalidation state.
    fn cache_file(&self) -> PathBuf {
        sibling(&self.file, ".cache")
    }

    /// Fetch this single download, blocking until it is done or failed.
    pub fn fetch(self, mut handler: impl Handler) -> Result<Fetched, Error> {

        let mut outcome = run(&mut handler, vec![self])?;

        match outcome.results.pop().unwrap() {
            Ok(fetched) => Ok(fetched),
            Err(failure) if matches!(failure.reason, Reason::Cancelled) => Err(Error::Cancelled),
            Err(failure) => Err(Error::Failed(vec![failure])),
        }

    }

}

/// An ordered list of downloads fetched together, forming one install batch.
#[derive(Debug, Default)]
pub struct Batch {
    pending: Vec<Download>,
}

impl Batch {

    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue a download into this batch.
    pub fn add(&mut self, download: Download) {
        self.pending.push(download);
    }

    /// Fetch every queued download, blocking until the whole batch settled. The
    /// batch succeeds only if every entry succeeded, otherwise the error carries
    /// the failure list; cancellation wins over any individual failure. The queue
    /// is drained in every case.
    pub fn fetch(&mut self, mut handler: impl Handler) -> Result<(), Error> {

        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let outcome = run(&mut handler, pending)?;

        if outcome.cancelled {
            return Err(Error::Cancelled);
        }

        let failures = outcome.results.into_iter()
            .filter_map(Result::err)
            .collect::<Vec<_>>();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Failed(failures))
        }

    }

}

/// Details about one successfully fetched entry.
#[derive(Debug)]
pub struct Fetched {
    size: u32,
    sha1: [u8; 20],
    handle: Option<std::fs::File>,
}

impl Fetched {

    /// The byte size of the received content.
    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The SHA-1 of the received content.
    #[inline]
    pub fn sha1(&self) -> &[u8; 20] {
        &self.sha1
    }

    /// The read handle on the destination, present once if the download was
    /// configured with [`Download::keep_open`].
    pub fn take_handle(&mut self) -> Option<std::fs::File> {
        self.handle.take()
    }

}

/// The error of a batch or single fetch.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The handler requested cancellation: entries already renamed stay on disk,
    /// temporary files of interrupted entries are removed.
    #[error("cancelled")]
    Cancelled,
    /// One or more entries definitively failed, the rest of the batch completed.
    #[error("{} failed entries", .0.len())]
    Failed(Vec<Failure>),
    /// The shared HTTP client could not be built.
    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A failed entry with the reason of its last attempt.
#[derive(thiserror::Error, Debug)]
#[error("{url} -> {}: {reason}", file.display())]
pub struct Failure {
    pub url: Box<str>,
    pub file: Box<Path>,
    pub reason: Reason,
}

/// Why an entry failed.
#[derive(thiserror::Error, Debug)]
pub enum Reason {
    /// The server answered with an unexpected status code.
    #[error("unexpected status {0}")]
    Status(u16),
    /// The received content has not the declared size.
    #[error("size mismatch, received {actual} bytes")]
    Size { actual: u32 },
    /// The received content does not hash to the declared SHA-1.
    #[error("sha1 mismatch")]
    Sha1 { actual: [u8; 20] },
    /// The entry was interrupted by cancellation.
    #[error("cancelled")]
    Cancelled,
    /// A local filesystem error.
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// A network or protocol error.
    #[error("request: {0}")]
    Request(#[source] reqwest::Error),
}

impl Reason {

    /// Whether another attempt of the entry may succeed: verification mismatches,
    /// server-side errors and transport faults qualify.
    fn transient(&self) -> bool {
        match self {
            Reason::Size { .. } | Reason::Sha1 { .. } => true,
            Reason::Status(code) => (500..600).contains(code),
            Reason::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Reason::Cancelled | Reason::Io(_) => false,
        }
    }

}

/// Aggregated counters of a running batch, reported at a bounded rate.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    /// Settled entries, the batch is done when this reaches `total_count`.
    pub count: u32,
    /// Total number of entries in the batch.
    pub total_count: u32,
    /// Bytes received so far, may exceed `total_bytes` when sizes are undeclared.
    pub bytes: u64,
    /// Sum of the declared entry sizes.
    pub total_bytes: u64,
}

/// Observer of a running fetch.
pub trait Handler {

    /// Called with the aggregated counters, at least once at the start and once at
    /// the end of the batch.
    fn on_progress(&mut self, progress: Progress);

    /// Polled by the dispatcher between reports, return true to abort the batch.
    fn is_cancelled(&mut self) -> bool {
        false
    }

}

impl<H: Handler + ?Sized> Handler for &mut H {

    fn on_progress(&mut self, progress: Progress) {
        (**self).on_progress(progress)
    }

    fn is_cancelled(&mut self) -> bool {
        (**self).is_cancelled()
    }

}

impl Handler for () {
    fn on_progress(&mut self, progress: Progress) {
        let _ = progress;
    }
}

// ======================= //
//  Engine implementation  //
// ======================= //

/// Settled state of a whole batch.
struct BatchOutcome {
    results: Vec<Result<Fetched, Failure>>,
    cancelled: bool,
}

/// State shared between the dispatcher and the workers.
struct Pool {
    queue: Vec<Download>,
    /// Index of the next queue entry to be claimed by a worker.
    cursor: AtomicUsize,
    /// Raised by the dispatcher when the handler asks for cancellation.
    abort: AtomicBool,
}

/// Message from a worker to the dispatcher.
enum Note {
    /// Bytes received since the last note.
    Gained(u64),
    /// Bytes discarded because an attempt is being retried.
    Lost(u64),
    /// The entry at the given queue index settled.
    Settled(usize, Result<Fetched, Reason>),
}

/// The number of worker tasks: a small multiple of the CPU count, capped so remote
/// hosts are not hammered.
fn pool_size(queue_len: usize) -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(8)
        .min(16)
        .min(queue_len.max(1))
}

/// Entry point of the engine: fetch the whole queue and return per-entry results
/// in queue order.
fn run(handler: &mut dyn Handler, queue: Vec<Download>) -> Result<BatchOutcome, Error> {
    let client = crate::net::client()?;
    Ok(crate::net::block_on(dispatch(client, handler, queue)))
}

async fn dispatch(client: Client, handler: &mut dyn Handler, queue: Vec<Download>) -> BatchOutcome {

    let total_count = queue.len() as u32;
    let total_bytes = queue.iter()
        .map(|dl| dl.size.unwrap_or(0) as u64)
        .sum::<u64>();

    // Report again when at least 1% more bytes arrived, or when the period elapsed.
    let bytes_step = (total_bytes / 100).max(1);

    let pool = Arc::new(Pool {
        queue,
        cursor: AtomicUsize::new(0),
        abort: AtomicBool::new(false),
    });

    // An already-requested cancellation aborts the batch before anything runs.
    if handler.is_cancelled() {
        pool.abort.store(true, Ordering::Relaxed);
    }

    let (note_tx, mut note_rx) = mpsc::channel::<Note>(64);

    let mut workers = JoinSet::new();
    for _ in 0..pool_size(pool.queue.len()) {
        workers.spawn(worker(client.clone(), Arc::clone(&pool), note_tx.clone()));
    }

    // The dispatcher only reads the receiving end, once every worker has dropped
    // its sender the channel closes and the loop below ends.
    drop(note_tx);

    let mut progress = Progress { count: 0, total_count, bytes: 0, total_bytes };
    handler.on_progress(progress);

    let mut settled: Vec<Option<Result<Fetched, Reason>>> = Vec::new();
    settled.resize_with(pool.queue.len(), || None);

    let mut last_report = Instant::now();
    let mut last_bytes = 0u64;

    while let Some(note) = note_rx.recv().await {

        if handler.is_cancelled() {
            pool.abort.store(true, Ordering::Relaxed);
        }

        let entry_settled = match note {
            Note::Gained(bytes) => {
                progress.bytes += bytes;
                false
            }
            Note::Lost(bytes) => {
                progress.bytes = progress.bytes.saturating_sub(bytes);
                false
            }
            Note::Settled(index, result) => {
                progress.count += 1;
                settled[index] = Some(result);
                true
            }
        };

        if entry_settled
            || progress.bytes - last_bytes >= bytes_step
            || last_report.elapsed() >= PROGRESS_PERIOD
        {
            handler.on_progress(progress);
            last_report = Instant::now();
            last_bytes = progress.bytes;
        }

    }

    while workers.join_next().await.is_some() {}

    // Every queue entry now has a result: claimed ones settled through the channel,
    // unclaimed ones can only remain when the batch was aborted.
    let cancelled = pool.abort.load(Ordering::Relaxed);
    let pool = Arc::into_inner(pool).unwrap();

    let results = pool.queue.into_iter()
        .zip(settled)
        .map(|(download, result)| {
            match result.unwrap_or(Err(Reason::Cancelled)) {
                Ok(fetched) => Ok(fetched),
                Err(reason) => Err(Failure {
                    url: download.url,
                    file: download.file,
                    reason,
                }),
            }
        })
        .collect::<Vec<_>>();

    let cancelled = cancelled || results.iter()
        .any(|res| matches!(res, Err(Failure { reason: Reason::Cancelled, .. })));

    BatchOutcome {
        results,
        cancelled,
    }

}

/// A worker task: claim queue entries until none is left, fetching each with
/// bounded retry.
async fn worker(client: Client, pool: Arc<Pool>, note_tx: mpsc::Sender<Note>) {

    loop {

        let index = pool.cursor.fetch_add(1, Ordering::Relaxed);
        let Some(download) = pool.queue.get(index) else {
            return;
        };

        let result = if pool.abort.load(Ordering::Relaxed) {
            Err(Reason::Cancelled)
        } else {
            fetch_with_retry(&client, download, &note_tx, &pool.abort).await
        };

        if note_tx.send(Note::Settled(index, result)).await.is_err() {
            return;
        }

    }

}

async fn fetch_with_retry(
    client: &Client,
    download: &Download,
    note_tx: &mpsc::Sender<Note>,
    abort: &AtomicBool,
) -> Result<Fetched, Reason> {

    let mut attempt = 0;
    loop {

        attempt += 1;

        match fetch_once(client, download, note_tx, abort).await {
            Ok(fetched) => return Ok(fetched),
            Err(reason) if attempt < ATTEMPT_LIMIT && reason.transient() => {
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            Err(reason) => {

                // Give up: nothing of this entry should stay behind, except on
                // cancellation where an already published file is kept.
                let _ = tokio::fs::remove_file(download.part_file()).await;
                if !matches!(reason, Reason::Cancelled) {
                    let _ = tokio::fs::remove_file(&*download.file).await;
                    let _ = tokio::fs::remove_file(download.cache_file()).await;
                }

                return Err(reason);

            }
        }

    }

}

/// One attempt at fetching an entry: stream to the `.part` sibling, verify, then
/// atomically publish with a rename.
async fn fetch_once(
    client: &Client,
    download: &Download,
    note_tx: &mpsc::Sender<Note>,
    abort: &AtomicBool,
) -> Result<Fetched, Reason> {

    if abort.load(Ordering::Relaxed) {
        return Err(Reason::Cancelled);
    }

    // Check the local copy against the revalidation state, if any.
    let mut local = None;
    if download.revalidate {
        local = read_revalidation_state(&download.file, &download.cache_file())?;
    }

    let mut request = client.get(&*download.url);
    if let Some(local) = &local {
        if let Some(etag) = &local.state.etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }
        if let Some(date) = &local.state.last_modified {
            request = request.header(header::IF_MODIFIED_SINCE, date);
        }
    }

    let mut response = match request.send().await {
        Ok(response) => response,
        Err(e) if local.is_some() && (e.is_timeout() || e.is_connect() || e.is_request()) => {
            // Unreachable remote, fall back on the valid local copy.
            let local = local.unwrap();
            return Ok(Fetched {
                size: local.state.size,
                sha1: local.state.sha1.0,
                handle: download.keep_open.then_some(local.handle),
            });
        }
        Err(e) => return Err(Reason::Request(e)),
    };

    match response.status() {
        StatusCode::NOT_MODIFIED if local.is_some() => {
            let local = local.unwrap();
            return Ok(Fetched {
                size: local.state.size,
                sha1: local.state.sha1.0,
                handle: download.keep_open.then_some(local.handle),
            });
        }
        StatusCode::OK => (),
        status => return Err(Reason::Status(status.as_u16())),
    }

    drop(local);

    if let Some(dir) = download.file.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    let part_file = download.part_file();
    let mut part = tokio::fs::File::create(&part_file).await?;

    let mut received = 0u64;
    let mut digest = Sha1::new();

    let streamed: Result<(), Reason> = loop {

        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break Ok(()),
            Err(e) => break Err(Reason::Request(e)),
        };

        if abort.load(Ordering::Relaxed) {
            break Err(Reason::Cancelled);
        }

        if let Err(e) = part.write_all(&chunk).await {
            break Err(Reason::Io(e));
        }

        digest.update(&chunk);
        received += chunk.len() as u64;
        let _ = note_tx.send(Note::Gained(chunk.len() as u64)).await;

    };

    let flushed = match streamed {
        Ok(()) => part.flush().await.map_err(Reason::Io),
        Err(e) => Err(e),
    };

    drop(part);

    // Verification: exact size when declared, then the hash.
    let verified = flushed.and_then(|()| {

        let actual = u32::try_from(received)
            .map_err(|_| Reason::Size { actual: u32::MAX })?;

        if download.size.is_some_and(|expected| expected != actual) {
            return Err(Reason::Size { actual });
        }

        let sha1: [u8; 20] = digest.finalize().into();
        if download.sha1.is_some_and(|expected| expected != sha1) {
            return Err(Reason::Sha1 { actual: sha1 });
        }

        Ok((actual, sha1))

    });

    let (size, sha1) = match verified {
        Ok(ret) => ret,
        Err(reason) => {
            let _ = tokio::fs::remove_file(&part_file).await;
            let _ = note_tx.send(Note::Lost(received)).await;
            return Err(reason);
        }
    };

    // Verification passed, publish the bytes.
    tokio::fs::rename(&part_file, &*download.file).await?;

    if download.revalidate {
        write_revalidation_state(download, size, sha1, &response).await;
    }

    let handle = if download.keep_open {
        Some(std::fs::File::open(&*download.file)?)
    } else {
        None
    };

    Ok(Fetched {
        size,
        sha1,
        handle,
    })

}

/// A local copy that matched its recorded revalidation state, with an already open
/// read handle so the content cannot change between the check and its use.
struct LocalCopy {
    handle: std::fs::File,
    state: state::Revalidation,
}

/// Load the recorded revalidation state and verify the local copy against it,
/// returning none when there is no state or the copy was altered.
fn read_revalidation_state(file: &Path, cache_file: &Path) -> io::Result<Option<LocalCopy>> {

    let state = match std::fs::read(cache_file) {
        Ok(raw) => match serde_json::from_slice::<state::Revalidation>(&raw) {
            Ok(state) => state,
            Err(_) => return Ok(None),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut handle = match std::fs::File::open(file) {
        Ok(handle) => handle,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    if handle.metadata()?.len() != state.size as u64 {
        return Ok(None);
    }

    let mut digest = Sha1::new();
    let mut buffer = [0u8; 32 * 1024];
    loop {
        let read = handle.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        digest.update(&buffer[..read]);
    }

    if <[u8; 20]>::from(digest.finalize()) != state.sha1.0 {
        return Ok(None);
    }

    handle.rewind()?;

    Ok(Some(LocalCopy { handle, state }))

}

/// Record the revalidation state of a fresh download, silently skipped when the
/// response carries no validator at all.
async fn write_revalidation_state(download: &Download, size: u32, sha1: [u8; 20], response: &reqwest::Response) {

    let header_string = |name| response.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let state = state::Revalidation {
        url: download.url.to_string(),
        size,
        sha1: crate::codec::Sha1Hash(sha1),
        etag: header_string(header::ETAG),
        last_modified: header_string(header::LAST_MODIFIED),
    };

    if state.etag.is_none() && state.last_modified.is_none() {
        return;
    }

    if let Ok(raw) = serde_json::to_vec(&state) {
        let _ = tokio::fs::write(download.cache_file(), raw).await;
    }

}

/// Derive a sibling path by appending a suffix to the file name.
fn sibling(file: &Path, suffix: &str) -> PathBuf {
    let mut buf = file.to_path_buf();
    buf.as_mut_os_string().push(suffix);
    buf
}

/// Hex rendering of a raw digest, used for cache file names.
fn codec_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut acc, byte| {
        acc.push_str(&format!("{byte:02x}"));
        acc
    })
}

/// On-disk schema of the revalidation state file.
mod state {

    use crate::codec::Sha1Hash;

    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    pub struct Revalidation {
        /// Informative only, the URL the state was recorded for.
        pub url: String,
        /// Size of the local copy when the state was recorded.
        pub size: u32,
        /// SHA-1 of the local copy when the state was recorded.
        pub sha1: Sha1Hash,
        /// The entity tag of the remote content, if sent.
        pub etag: Option<String>,
        /// The modification date of the remote content, if sent.
        pub last_modified: Option<String>,
    }

}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} entries, {}/{} bytes", self.count, self.total_count, self.bytes, self.total_bytes)
    }
}
