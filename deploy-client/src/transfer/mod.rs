//! Upload progress reporting.

pub mod progress;
pub mod progress_stream;

pub use progress::{format_bytes, format_duration, format_speed, ProgressTracker, TransferProgress};
pub use progress_stream::{ProgressCallback, ProgressStream};
