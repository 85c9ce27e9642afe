//! Byte-level progress tracking for archive uploads.

use std::time::{Duration, Instant};

/// Snapshot of an upload in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Speed over the last update window
    pub bytes_per_second: u64,
    pub eta_seconds: u64,
    /// 0-100
    pub percent_complete: f64,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            bytes_per_second: 0,
            eta_seconds: 0,
            percent_complete: 0.0,
        }
    }

    fn set_transferred(&mut self, transferred_bytes: u64) {
        self.transferred_bytes = transferred_bytes;
        self.percent_complete = if self.total_bytes > 0 {
            ((transferred_bytes as f64 / self.total_bytes as f64) * 100.0).min(100.0)
        } else {
            100.0
        };
    }

    pub fn is_complete(&self) -> bool {
        self.transferred_bytes >= self.total_bytes
    }
}

/// Turns a stream of cumulative byte counts into speed and ETA figures.
pub struct ProgressTracker {
    start_time: Instant,
    last_update_time: Instant,
    last_bytes: u64,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update_time: now,
            last_bytes: 0,
            progress: TransferProgress::new(total_bytes),
        }
    }

    /// Record the cumulative byte count sent so far.
    pub fn update(&mut self, transferred_bytes: u64) -> &TransferProgress {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();

        if elapsed > 0.0 {
            let bytes_diff = transferred_bytes.saturating_sub(self.last_bytes);
            self.progress.bytes_per_second = (bytes_diff as f64 / elapsed) as u64;
        }

        self.progress.eta_seconds = if self.progress.bytes_per_second > 0 {
            self.progress.total_bytes.saturating_sub(transferred_bytes) / self.progress.bytes_per_second
        } else {
            0
        };

        self.progress.set_transferred(transferred_bytes);
        self.last_update_time = now;
        self.last_bytes = transferred_bytes;

        &self.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average speed since the tracker was created.
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.progress.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_tracker_percent_and_completion() {
        let mut tracker = ProgressTracker::new(1000);
        assert!(!tracker.progress().is_complete());

        let prog = tracker.update(250);
        assert!((prog.percent_complete - 25.0).abs() < 0.01);

        let prog = tracker.update(1000);
        assert!(prog.is_complete());
        assert!((prog.percent_complete - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_empty_upload_is_complete() {
        let mut tracker = ProgressTracker::new(0);
        let prog = tracker.update(0);
        assert!(prog.is_complete());
        assert_eq!(prog.percent_complete, 100.0);
    }

    #[test]
    fn test_tracker_speed() {
        let mut tracker = ProgressTracker::new(10_000);
        tracker.update(100);

        thread::sleep(Duration::from_millis(100));
        let prog = tracker.update(5_000);
        assert!(prog.bytes_per_second > 0);
        assert!(prog.eta_seconds < 10);
        assert!(tracker.average_speed() > 0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(300 * 1024 * 1024), "300.00 MB");
    }

    #[test]
    fn test_format_speed_and_duration() {
        assert_eq!(format_speed(1024 * 1024), "1.00 MB/s");
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }
}
