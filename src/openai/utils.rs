use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the UNIX epoch, used for `created` fields.
pub fn get_created_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
