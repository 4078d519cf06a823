//! Watched directory of captured frames, handled by the daemon.

mod discovery;
mod hashing;
mod processor;

use chrono::NaiveTime;

pub use discovery::{discover_captures, FAILED_DIR, PROCESSED_DIR};
pub use hashing::hash_file;
pub use processor::{InboxProcessor, InboxSummary};

/// Whether `now` falls inside the configured hours of operation.
///
/// No hours configured means always. A start later than the end wraps past
/// midnight.
pub fn within_hours(start: Option<u8>, end: Option<u8>, now: NaiveTime) -> bool {
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) => (s, e),
        _ => return true,
    };

    let start_time = NaiveTime::from_hms_opt(start as u32, 0, 0).unwrap_or(NaiveTime::MIN);
    let end_time = NaiveTime::from_hms_opt(end as u32, 0, 0).unwrap_or(NaiveTime::MIN);

    if start <= end {
        now >= start_time && now < end_time
    } else {
        now >= start_time || now < end_time
    }
}
