//! Shared utility functions.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Current UTC time.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Time elapsed between `since` and `now`, zero if `since` is in the future.
pub fn elapsed_between(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

/// Generate a fresh identifier for a session host or log folder.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_between() {
        let now = now_utc();
        let earlier = now - chrono::Duration::seconds(30);
        assert_eq!(elapsed_between(earlier, now), Duration::from_secs(30));
        // Clock skew never yields a negative duration
        assert_eq!(elapsed_between(now, earlier), Duration::ZERO);
    }

    #[test]
    fn test_new_id_is_unique() {
        assert_ne!(new_id(), new_id());
    }
}
