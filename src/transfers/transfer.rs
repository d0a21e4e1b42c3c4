use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::events::{ItemAction, ItemType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Started,
    InProgress,
    Completed,
}

/// One file or directory being (or having been) synchronized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileTransfer {
    pub folder_id: String,
    pub path: String,
    pub item_type: ItemType,
    pub action: ItemAction,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Throughput between the two most recent progress samples.
    pub bytes_per_second: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub is_new_error: bool,
    #[serde(skip)]
    last_sample: Option<(DateTime<Utc>, u64)>,
}

impl FileTransfer {
    pub(crate) fn new(
        folder_id: &str,
        path: &str,
        item_type: ItemType,
        action: ItemAction,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            folder_id: folder_id.to_string(),
            path: path.to_string(),
            item_type,
            action,
            status: TransferStatus::Started,
            bytes_transferred: 0,
            total_bytes: 0,
            bytes_per_second: None,
            started_at: now,
            finished_at: None,
            error: None,
            is_new_error: false,
            last_sample: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransferStatus::Completed
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.is_completed() { 100.0 } else { 0.0 };
        }
        ((self.bytes_transferred as f64 / self.total_bytes as f64) * 100.0).clamp(0.0, 100.0)
    }

    pub(crate) fn record_progress(&mut self, bytes_done: u64, bytes_total: u64, now: DateTime<Utc>) {
        if let Some((sampled_at, sampled_bytes)) = self.last_sample {
            let elapsed = (now - sampled_at).num_milliseconds();
            if elapsed > 0 {
                let delta = bytes_done.saturating_sub(sampled_bytes);
                self.bytes_per_second = Some(delta as f64 * 1000.0 / elapsed as f64);
            }
        }
        self.last_sample = Some((now, bytes_done));
        self.bytes_transferred = bytes_done;
        self.total_bytes = bytes_total;
        self.status = TransferStatus::InProgress;
    }

    pub(crate) fn complete(&mut self, error: Option<String>, is_new_error: bool, now: DateTime<Utc>) {
        self.status = TransferStatus::Completed;
        self.bytes_transferred = self.total_bytes;
        self.bytes_per_second = None;
        self.finished_at = Some(now);
        self.error = error;
        self.is_new_error = is_new_error;
    }
}

/// The latest error of an item that is currently failing to synchronize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailingTransfer {
    pub folder_id: String,
    pub path: String,
    pub error: String,
    pub is_new_error: bool,
    pub failed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn first_sample_has_no_rate() {
        let mut transfer = FileTransfer::new("f", "a", ItemType::File, ItemAction::Update, at(0));
        transfer.record_progress(100, 1000, at(1));
        assert_eq!(transfer.bytes_per_second, None);
        assert_eq!(transfer.status, TransferStatus::InProgress);
    }

    #[test]
    fn rate_uses_previous_sample() {
        let mut transfer = FileTransfer::new("f", "a", ItemType::File, ItemAction::Update, at(0));
        transfer.record_progress(100, 1000, at(1));
        transfer.record_progress(600, 1000, at(3));
        assert_eq!(transfer.bytes_per_second, Some(250.0));

        transfer.record_progress(700, 1000, at(3) + Duration::milliseconds(500));
        assert_eq!(transfer.bytes_per_second, Some(200.0));
        assert_eq!(transfer.progress_percent(), 70.0);
    }

    #[test]
    fn completion_fills_bytes_and_drops_rate() {
        let mut transfer = FileTransfer::new("f", "a", ItemType::File, ItemAction::Update, at(0));
        transfer.record_progress(10, 40, at(1));
        transfer.record_progress(20, 40, at(2));
        transfer.complete(None, false, at(3));

        assert_eq!(transfer.bytes_transferred, 40);
        assert_eq!(transfer.bytes_per_second, None);
        assert_eq!(transfer.finished_at, Some(at(3)));
        assert_eq!(transfer.progress_percent(), 100.0);
    }
}
