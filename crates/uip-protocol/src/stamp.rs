//! Identifiers and timestamps stamped onto events, intents and frames.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, as carried in `meta.timestamp` and
/// transport frames. Clocks before the epoch read as zero.
pub fn unix_timestamp_ms() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Fresh v4 identifier for interaction, intent, trace and message ids.
pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{new_uuid, unix_timestamp_ms};

    #[test]
    fn unit_timestamp_tracks_wall_clock_in_millis() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock after epoch")
            .as_secs();
        let stamped = unix_timestamp_ms();
        assert!(stamped / 1_000 >= before);
        assert!(stamped / 1_000 <= before + 1);
    }

    #[test]
    fn unit_new_uuid_is_unique_and_hyphenated() {
        let a = new_uuid();
        let b = new_uuid();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
        assert_eq!(a.matches('-').count(), 4);
    }
}
