use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

// top bit of the byte counter marks it frozen, no update may move it after that
const FROZEN: u64 = 1 << 63;

/// lifecycle of one upload, everything but Running is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum UploadStatus {
    Running = 0,
    Success = 1,
    Canceled = 2,
    Error = 3,
}

impl UploadStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => UploadStatus::Success,
            2 => UploadStatus::Canceled,
            3 => UploadStatus::Error,
            _ => UploadStatus::Running,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != UploadStatus::Running
    }
}

/// progress tracker bound to one upload request
///
/// the streaming task is the only caller of `update` and `finish`, any other
/// task may read the counters or call `set_exception` concurrently. none of
/// these take a lock on the hot path.
#[derive(Debug)]
pub struct UploadListener {
    session_id: String,
    created_at: DateTime<Utc>,
    delay: Duration,
    bytes_read: AtomicU64,
    content_length: AtomicI64,
    item_index: AtomicUsize,
    status: AtomicU8,
    error: OnceLock<UploadError>,
    item_name: Mutex<Option<String>>,
}

/// plain-data projection of a listener, safe to persist outside the process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSnapshot {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub delay_ms: u64,
    pub bytes_read: u64,
    pub content_length: i64,
    pub percent: u8,
    pub status: UploadStatus,
    pub error: Option<UploadError>,
    pub item_index: usize,
    pub item_name: Option<String>,
}

impl UploadListener {
    /// create a running listener, `content_length` is -1 when unknown
    pub fn new(session_id: impl Into<String>, content_length: i64, delay: Duration) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            delay,
            bytes_read: AtomicU64::new(0),
            content_length: AtomicI64::new(content_length.max(-1)),
            item_index: AtomicUsize::new(0),
            status: AtomicU8::new(UploadStatus::Running as u8),
            error: OnceLock::new(),
            item_name: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// record absolute progress without throttling
    ///
    /// returns false once the counters are frozen. a value lower than the
    /// current one is ignored so the counter never goes backwards.
    pub fn record(&self, bytes_read: u64, content_length: i64, item_index: usize) -> bool {
        if self.bytes_read.load(Ordering::Acquire) & FROZEN != 0 {
            return false;
        }
        self.content_length.store(content_length.max(-1), Ordering::Release);
        self.item_index.store(item_index, Ordering::Release);

        let target = bytes_read.min(FROZEN - 1);
        self.bytes_read
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current & FROZEN != 0 {
                    None
                } else {
                    Some(current.max(target))
                }
            })
            .is_ok()
    }

    /// record progress, then hold the calling (uploading) task for the configured delay
    pub async fn update(&self, bytes_read: u64, content_length: i64, item_index: usize) {
        let advanced = self.record(bytes_read, content_length, item_index);
        if advanced && !self.delay.is_zero() {
            tracing::trace!("Throttling upload {} for {:?}", self.session_id, self.delay);
            tokio::time::sleep(self.delay).await;
        }
    }

    pub fn set_item_name(&self, name: Option<String>) {
        *self.item_name.lock().unwrap_or_else(|e| e.into_inner()) = name;
    }

    /// move to ERROR (or CANCELED for a cancellation) and freeze the counters
    ///
    /// the first error wins, later calls return false and change nothing
    pub fn set_exception(&self, err: UploadError) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        let next = if err.is_cancellation() {
            UploadStatus::Canceled
        } else {
            UploadStatus::Error
        };
        if self.error.set(err).is_err() {
            return false;
        }
        self.bytes_read.fetch_or(FROZEN, Ordering::AcqRel);
        self.transition(next)
    }

    /// move RUNNING -> SUCCESS once the body has been consumed
    pub fn finish(&self) -> bool {
        let content_length = self.content_length.load(Ordering::Acquire);
        if content_length > 0 {
            // a cleanly ended stream means the whole declared body went through
            self.record(content_length as u64, content_length, self.item_index());
        }
        if self.status().is_terminal() {
            return false;
        }
        self.bytes_read.fetch_or(FROZEN, Ordering::AcqRel);
        self.transition(UploadStatus::Success)
    }

    fn transition(&self, next: UploadStatus) -> bool {
        self.status
            .compare_exchange(
                UploadStatus::Running as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn status(&self) -> UploadStatus {
        UploadStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Acquire) & !FROZEN
    }

    pub fn content_length(&self) -> i64 {
        self.content_length.load(Ordering::Acquire)
    }

    pub fn item_index(&self) -> usize {
        self.item_index.load(Ordering::Acquire)
    }

    pub fn item_name(&self) -> Option<String> {
        self.item_name.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// bytes_read * 100 / content_length clamped to 0..=100, 0 while the length is unknown
    pub fn percent(&self) -> u8 {
        percent_of(self.bytes_read(), self.content_length(), self.status())
    }

    /// the recorded error, visible only once the status says CANCELED or ERROR
    pub fn exception(&self) -> Option<&UploadError> {
        match self.status() {
            UploadStatus::Canceled | UploadStatus::Error => self.error.get(),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> ListenerSnapshot {
        let status = self.status();
        let bytes_read = self.bytes_read();
        let content_length = self.content_length();
        ListenerSnapshot {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            delay_ms: self.delay.as_millis() as u64,
            bytes_read,
            content_length,
            percent: percent_of(bytes_read, content_length, status),
            status,
            error: self.exception().cloned(),
            item_index: self.item_index(),
            item_name: self.item_name(),
        }
    }

    /// rebuild a listener from its persisted projection
    pub fn from_snapshot(snapshot: ListenerSnapshot) -> Self {
        let frozen = if snapshot.status.is_terminal() { FROZEN } else { 0 };
        let error = OnceLock::new();
        if matches!(snapshot.status, UploadStatus::Canceled | UploadStatus::Error) {
            let err = snapshot
                .error
                .unwrap_or_else(|| UploadError::storage("unknown error"));
            let _ = error.set(err);
        }
        Self {
            session_id: snapshot.session_id,
            created_at: snapshot.created_at,
            delay: Duration::from_millis(snapshot.delay_ms),
            bytes_read: AtomicU64::new(snapshot.bytes_read.min(FROZEN - 1) | frozen),
            content_length: AtomicI64::new(snapshot.content_length),
            item_index: AtomicUsize::new(snapshot.item_index),
            status: AtomicU8::new(snapshot.status as u8),
            error,
            item_name: Mutex::new(snapshot.item_name),
        }
    }
}

fn percent_of(bytes_read: u64, content_length: i64, status: UploadStatus) -> u8 {
    if content_length <= 0 {
        return if content_length == 0 && status == UploadStatus::Success { 100 } else { 0 };
    }
    let percent = bytes_read as u128 * 100 / content_length as u128;
    percent.min(100) as u8
}
