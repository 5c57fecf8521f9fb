//! Thread-safe registry of in-flight and finished downloads with change
//! notification for UI refresh.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    fn rank(self) -> u8 {
        match self {
            DownloadStatus::Queued => 0,
            DownloadStatus::Downloading => 1,
            DownloadStatus::Completed | DownloadStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub status: DownloadStatus,
    pub progress: f32,
    pub error_message: Option<String>,
    pub download_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSummary {
    pub queued: usize,
    pub downloading: usize,
    pub completed: usize,
    pub failed: usize,
}

type ChangeCallback = Box<dyn Fn() + Send>;

/// All mutation goes through the single item mutex; the change callback is
/// invoked after the lock is released so it may re-enter the getters.
#[derive(Default)]
pub struct DownloadTracker {
    items: Mutex<HashMap<String, DownloadItem>>,
    on_change: Mutex<Option<ChangeCallback>>,
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_download(&self, id: &str, title: &str, artist: &str) -> DownloadItem {
        let item = DownloadItem {
            id: id.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            status: DownloadStatus::Queued,
            progress: 0.0,
            error_message: None,
            download_path: None,
            created_at: Utc::now(),
        };
        {
            let mut items = self.items.lock().expect("tracker mutex poisoned");
            items.insert(id.to_string(), item.clone());
        }
        self.notify_change();
        item
    }

    /// Moves an item forward. Backward transitions and edits to terminal
    /// items are ignored: status flow is strictly
    /// Queued -> Downloading -> {Completed|Failed}.
    pub fn update_status(&self, id: &str, status: DownloadStatus) {
        let changed = {
            let mut items = self.items.lock().expect("tracker mutex poisoned");
            match items.get_mut(id) {
                Some(item)
                    if !item.status.is_terminal() && status.rank() >= item.status.rank() =>
                {
                    item.status = status;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.notify_change();
        }
    }

    pub fn update_progress(&self, id: &str, progress: f32) {
        let changed = {
            let mut items = self.items.lock().expect("tracker mutex poisoned");
            match items.get_mut(id) {
                Some(item) => {
                    item.progress = progress.clamp(0.0, 1.0);
                    true
                }
                None => false,
            }
        };
        if changed {
            self.notify_change();
        }
    }

    pub fn set_error(&self, id: &str, message: &str) {
        let changed = {
            let mut items = self.items.lock().expect("tracker mutex poisoned");
            match items.get_mut(id) {
                Some(item) if !item.status.is_terminal() => {
                    item.status = DownloadStatus::Failed;
                    item.error_message = Some(message.to_string());
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.notify_change();
        }
    }

    pub fn set_completed(&self, id: &str, path: Option<PathBuf>) {
        let changed = {
            let mut items = self.items.lock().expect("tracker mutex poisoned");
            match items.get_mut(id) {
                Some(item) if !item.status.is_terminal() => {
                    item.status = DownloadStatus::Completed;
                    item.progress = 1.0;
                    item.download_path = path;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.notify_change();
        }
    }

    pub fn get_download(&self, id: &str) -> Option<DownloadItem> {
        let items = self.items.lock().expect("tracker mutex poisoned");
        items.get(id).cloned()
    }

    pub fn get_all_downloads(&self) -> Vec<DownloadItem> {
        let items = self.items.lock().expect("tracker mutex poisoned");
        items.values().cloned().collect()
    }

    pub fn get_downloads_by_status(&self, status: DownloadStatus) -> Vec<DownloadItem> {
        let items = self.items.lock().expect("tracker mutex poisoned");
        items
            .values()
            .filter(|item| item.status == status)
            .cloned()
            .collect()
    }

    pub fn get_summary(&self) -> StatusSummary {
        let items = self.items.lock().expect("tracker mutex poisoned");
        let mut summary = StatusSummary::default();
        for item in items.values() {
            match item.status {
                DownloadStatus::Queued => summary.queued += 1,
                DownloadStatus::Downloading => summary.downloading += 1,
                DownloadStatus::Completed => summary.completed += 1,
                DownloadStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    /// Registers the single on-change callback. Runs synchronously on the
    /// mutating thread; UI consumers must hop to their own thread.
    pub fn set_on_change(&self, callback: impl Fn() + Send + 'static) {
        let mut slot = self.on_change.lock().expect("callback mutex poisoned");
        *slot = Some(Box::new(callback));
    }

    fn notify_change(&self) {
        let slot = self.on_change.lock().expect("callback mutex poisoned");
        if let Some(callback) = slot.as_ref() {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                warn!("Tracker change callback panicked; ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn lifecycle_moves_forward_only() {
        let tracker = DownloadTracker::new();
        tracker.add_download("1", "Song", "Artist");
        tracker.update_status("1", DownloadStatus::Downloading);
        tracker.update_status("1", DownloadStatus::Queued);
        assert_eq!(
            tracker.get_download("1").unwrap().status,
            DownloadStatus::Downloading
        );

        tracker.set_completed("1", Some(PathBuf::from("/tmp/x.mp3")));
        tracker.update_status("1", DownloadStatus::Downloading);
        tracker.set_error("1", "late failure");
        let item = tracker.get_download("1").unwrap();
        assert_eq!(item.status, DownloadStatus::Completed);
        assert!(item.error_message.is_none());
    }

    #[test]
    fn set_error_marks_failed_with_message() {
        let tracker = DownloadTracker::new();
        tracker.add_download("1", "Song", "Artist");
        tracker.set_error("1", "no match found");
        let item = tracker.get_download("1").unwrap();
        assert_eq!(item.status, DownloadStatus::Failed);
        assert_eq!(item.error_message.as_deref(), Some("no match found"));
    }

    #[test]
    fn summary_counts_by_status() {
        let tracker = DownloadTracker::new();
        tracker.add_download("1", "A", "X");
        tracker.add_download("2", "B", "X");
        tracker.add_download("3", "C", "X");
        tracker.update_status("2", DownloadStatus::Downloading);
        tracker.set_completed("3", None);

        let summary = tracker.get_summary();
        assert_eq!(summary.queued, 1);
        assert_eq!(summary.downloading, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn change_callback_fires_once_per_mutation() {
        let tracker = DownloadTracker::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        tracker.set_on_change(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tracker.add_download("1", "Song", "Artist");
        tracker.update_status("1", DownloadStatus::Downloading);
        tracker.update_progress("1", 0.5);
        tracker.set_completed("1", None);
        assert_eq!(count.load(Ordering::SeqCst), 4);

        // Ignored mutations do not fire the callback.
        tracker.update_status("1", DownloadStatus::Queued);
        tracker.update_progress("missing", 0.1);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn callback_may_reenter_tracker_getters() {
        let tracker = Arc::new(DownloadTracker::new());
        let inner = tracker.clone();
        tracker.set_on_change(move || {
            let _ = inner.get_summary();
        });
        tracker.add_download("1", "Song", "Artist");
        tracker.set_completed("1", None);
    }

    #[test]
    fn progress_is_clamped() {
        let tracker = DownloadTracker::new();
        tracker.add_download("1", "Song", "Artist");
        tracker.update_progress("1", 1.7);
        assert_eq!(tracker.get_download("1").unwrap().progress, 1.0);
    }
}
