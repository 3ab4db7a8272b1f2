//! Scan history: the ordered ledger of completed runs for this session.
//!
//! History lives in process memory only. The orchestrator is the sole writer
//! of new entries; removal is an explicit user action. Readers always receive
//! snapshots, never references into the store.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Where the text of a [`ScanItem`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Document,
    Camera,
    Image,
    Pdf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Completed,
    Failed,
}

/// One entry in the history. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanItem {
    pub id: String,
    pub title: String,
    /// Local time, `YYYY-MM-DD HH:MM:SS`.
    pub date: String,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub status: ScanStatus,
    pub text: String,
    pub uri: String,
}

impl ScanItem {
    /// A completed entry for `text` recognized from `uri`.
    pub fn new(text: impl Into<String>, uri: impl Into<String>, scan_type: ScanType) -> Self {
        Self::with_status(text.into(), uri.into(), scan_type, ScanStatus::Completed)
    }

    /// An entry for a run that produced no text.
    pub fn failed(uri: impl Into<String>, scan_type: ScanType) -> Self {
        Self::with_status(String::new(), uri.into(), scan_type, ScanStatus::Failed)
    }

    fn with_status(text: String, uri: String, scan_type: ScanType, status: ScanStatus) -> Self {
        let title = match scan_type {
            ScanType::Document => "Imported PDF",
            _ => "Camera Scan",
        };
        Self {
            id: next_id(),
            title: title.to_string(),
            date: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            scan_type,
            status,
            text,
            uri,
        }
    }
}

static LAST_MILLIS: AtomicU64 = AtomicU64::new(0);

/// `<millis>-<8 hex>`. The millisecond part never repeats or goes backwards
/// within a process, so ids stay unique even when two items are created in
/// the same millisecond.
fn next_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let millis = match LAST_MILLIS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        Some(now.max(last + 1))
    }) {
        Ok(last) | Err(last) => now.max(last + 1),
    };
    format!("{millis}-{:08x}", rand::random::<u32>())
}

// ── Storage ──────────────────────────────────────────────────────────────

/// Storage capability for scan history.
///
/// Implementations must keep the list most-recent-first and must never hand
/// out live references.
pub trait HistoryStorage: Send + Sync {
    /// Insert at the head.
    fn add(&self, item: ScanItem);

    /// Remove the item with `id`. Unknown ids are ignored.
    fn remove(&self, id: &str);

    /// Snapshot of every item, most recent first.
    fn list(&self) -> Vec<ScanItem>;

    fn get(&self, id: &str) -> Option<ScanItem>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryHistory {
    items: Mutex<VecDeque<ScanItem>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<ScanItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HistoryStorage for InMemoryHistory {
    fn add(&self, item: ScanItem) {
        debug!("History add {} ({:?})", item.id, item.scan_type);
        self.items().push_front(item);
    }

    fn remove(&self, id: &str) {
        let mut items = self.items();
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            debug!("History remove: no item {}", id);
        }
    }

    fn list(&self) -> Vec<ScanItem> {
        self.items().iter().cloned().collect()
    }

    fn get(&self, id: &str) -> Option<ScanItem> {
        self.items().iter().find(|item| item.id == id).cloned()
    }

    fn len(&self) -> usize {
        self.items().len()
    }
}
