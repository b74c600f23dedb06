//! Upload progress tracking
//!
//! `ProgressTracker` owns the per-file progress map. The upload orchestrator is
//! the only writer; readers take snapshots or subscribe to a `watch` receiver
//! and see every change.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProgress {
    pub key: String,
    pub filename: String,
    pub status: UploadStatus,
    /// 0-100, never decreases
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tracked entries in insertion order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub entries: Vec<FileProgress>,
}

impl ProgressSnapshot {
    pub fn get(&self, key: &str) -> Option<&FileProgress> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Mean percent over all entries; 0 when nothing is tracked.
    pub fn overall_percent(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.entries.iter().map(|e| e.percent as u64).sum();
        sum as f64 / self.entries.len() as f64
    }

    /// Mean percent over `keys` only. Keys no longer tracked count as 0.
    pub fn overall_percent_of(&self, keys: &[String]) -> f64 {
        if keys.is_empty() {
            return 0.0;
        }
        let sum: u64 = keys
            .iter()
            .filter_map(|key| self.get(key))
            .map(|e| e.percent as u64)
            .sum();
        sum as f64 / keys.len() as f64
    }

    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|e| e.status.is_terminal())
    }

    pub fn count(&self, status: UploadStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    fn entry_mut(&mut self, key: &str) -> Option<&mut FileProgress> {
        self.entries.iter_mut().find(|e| e.key == key)
    }
}

/// `round(100 * loaded / total)`, capped at 100
pub fn progress_percent(loaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (loaded as f64 * 100.0 / total as f64).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Shared, observable progress map. Cloning shares the same state.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    state: Arc<watch::Sender<ProgressSnapshot>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ProgressSnapshot::default());
        Self {
            state: Arc::new(state),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.borrow().clone()
    }

    pub fn overall_percent(&self) -> f64 {
        self.state.borrow().overall_percent()
    }

    pub fn overall_percent_of(&self, keys: &[String]) -> f64 {
        self.state.borrow().overall_percent_of(keys)
    }

    pub fn is_complete(&self) -> bool {
        self.state.borrow().is_complete()
    }

    /// Start tracking `key` as pending. Re-tracking an existing key is a no-op.
    pub fn track(&self, key: &str, filename: &str) {
        self.state.send_if_modified(|snapshot| {
            if snapshot.get(key).is_some() {
                return false;
            }
            snapshot.entries.push(FileProgress {
                key: key.to_string(),
                filename: filename.to_string(),
                status: UploadStatus::Pending,
                percent: 0,
                error: None,
            });
            true
        });
    }

    pub fn start(&self, key: &str) {
        self.modify(key, |entry| {
            entry.status = UploadStatus::Uploading;
            true
        });
    }

    /// Raise the percent of an in-flight entry. Lower values are ignored.
    pub fn update(&self, key: &str, percent: u8) {
        let percent = percent.min(100);
        self.modify(key, |entry| {
            if percent <= entry.percent {
                return false;
            }
            entry.percent = percent;
            true
        });
    }

    pub fn complete(&self, key: &str) {
        self.modify(key, |entry| {
            entry.status = UploadStatus::Completed;
            entry.percent = 100;
            true
        });
    }

    pub fn fail(&self, key: &str, error: &str) {
        self.modify(key, |entry| {
            entry.status = UploadStatus::Failed;
            entry.error = Some(error.to_string());
            true
        });
    }

    /// Forget `key`. Unknown keys are ignored.
    pub fn remove(&self, key: &str) {
        self.state.send_if_modified(|snapshot| {
            let before = snapshot.entries.len();
            snapshot.entries.retain(|e| e.key != key);
            snapshot.entries.len() != before
        });
    }

    /// Forget every key in `keys` with a single notification.
    pub fn remove_all(&self, keys: &[String]) {
        self.state.send_if_modified(|snapshot| {
            let before = snapshot.entries.len();
            snapshot.entries.retain(|e| !keys.contains(&e.key));
            snapshot.entries.len() != before
        });
    }

    /// Drop every terminal entry, keeping in-flight ones.
    pub fn clear_finished(&self) {
        self.state.send_if_modified(|snapshot| {
            let before = snapshot.entries.len();
            snapshot.entries.retain(|e| !e.status.is_terminal());
            snapshot.entries.len() != before
        });
    }

    pub fn clear(&self) {
        self.state.send_if_modified(|snapshot| {
            let changed = !snapshot.entries.is_empty();
            snapshot.entries.clear();
            changed
        });
    }

    /// Apply `f` to a live entry. Terminal and unknown entries stay untouched.
    fn modify(&self, key: &str, f: impl FnOnce(&mut FileProgress) -> bool) {
        self.state.send_if_modified(|snapshot| match snapshot.entry_mut(key) {
            Some(entry) if !entry.status.is_terminal() => f(entry),
            _ => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 100), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(150, 100), 100);
        assert_eq!(progress_percent(5, 0), 0);
    }

    #[test]
    fn test_percent_is_monotone() {
        let tracker = ProgressTracker::new();
        tracker.track("a", "a.jpg");
        tracker.start("a");
        tracker.update("a", 40);
        tracker.update("a", 20);
        assert_eq!(tracker.snapshot().get("a").unwrap().percent, 40);

        tracker.update("a", 250);
        assert_eq!(tracker.snapshot().get("a").unwrap().percent, 100);
    }

    #[test]
    fn test_terminal_entries_ignore_updates() {
        let tracker = ProgressTracker::new();
        tracker.track("a", "a.jpg");
        tracker.fail("a", "Upload failed");
        tracker.update("a", 90);
        tracker.complete("a");

        let entry = tracker.snapshot().get("a").cloned().unwrap();
        assert_eq!(entry.status, UploadStatus::Failed);
        assert_eq!(entry.percent, 0);
        assert_eq!(entry.error.as_deref(), Some("Upload failed"));
    }

    #[test]
    fn test_overall_is_mean_with_pending_as_zero() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.overall_percent(), 0.0);

        tracker.track("a", "a.jpg");
        tracker.track("b", "b.jpg");
        tracker.track("c", "c.jpg");
        tracker.complete("a");
        tracker.start("b");
        tracker.update("b", 50);

        assert_eq!(tracker.overall_percent(), 50.0);
        assert!(!tracker.is_complete());
    }

    #[test]
    fn test_remove_is_idempotent_and_late_updates_ignored() {
        let tracker = ProgressTracker::new();
        tracker.track("a", "a.jpg");
        tracker.remove("a");
        tracker.remove("a");
        tracker.update("a", 10);
        tracker.complete("a");

        assert!(tracker.snapshot().entries.is_empty());
        assert!(tracker.is_complete());
    }

    #[test]
    fn test_overall_of_keys_ignores_other_entries() {
        let tracker = ProgressTracker::new();
        tracker.track("old", "old.pdf");
        tracker.complete("old");
        tracker.track("a", "a.pdf");
        tracker.track("b", "b.pdf");
        tracker.start("a");
        tracker.update("a", 30);

        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(tracker.overall_percent_of(&keys), 15.0);
        assert_eq!(tracker.overall_percent_of(&[]), 0.0);

        tracker.remove_all(&keys);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].key, "old");
    }

    #[test]
    fn test_clear_finished_keeps_in_flight() {
        let tracker = ProgressTracker::new();
        tracker.track("a", "a.jpg");
        tracker.track("b", "b.jpg");
        tracker.complete("a");
        tracker.clear_finished();

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].key, "b");
    }

    #[tokio::test]
    async fn test_subscribers_observe_changes() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();

        tracker.track("a", "a.jpg");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().entries.len(), 1);

        tracker.update("a", 0);
        assert!(!rx.has_changed().unwrap());

        tracker.start("a");
        tracker.update("a", 10);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().get("a").unwrap().percent, 10);
    }
}
