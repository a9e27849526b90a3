use time::{Duration, OffsetDateTime};

/// A device that has not been heard from for longer than this is offline.
pub const STALE_THRESHOLD_MS: i64 = 60_000;

/// `true` when there is no record at all, or the record is older than
/// [`STALE_THRESHOLD_MS`]. A record exactly at the threshold is still online.
pub fn is_offline(last_seen: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
    match last_seen {
        None => true,
        Some(seen) => now - seen > Duration::milliseconds(STALE_THRESHOLD_MS),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-06-01 12:00:00 UTC);

    #[test]
    fn missing_record_is_offline() {
        assert!(is_offline(None, NOW));
    }

    #[test]
    fn just_past_threshold_is_offline() {
        let seen = NOW - Duration::milliseconds(60_001);
        assert!(is_offline(Some(seen), NOW));
    }

    #[test]
    fn just_inside_threshold_is_online() {
        let seen = NOW - Duration::milliseconds(59_999);
        assert!(!is_offline(Some(seen), NOW));
    }

    #[test]
    fn exactly_at_threshold_is_online() {
        let seen = NOW - Duration::milliseconds(STALE_THRESHOLD_MS);
        assert!(!is_offline(Some(seen), NOW));
    }

    #[test]
    fn five_minutes_ago_is_offline() {
        assert!(is_offline(Some(NOW - Duration::minutes(5)), NOW));
    }

    #[test]
    fn future_timestamp_is_online() {
        // Clock skew between hub and client must not flag a live device.
        assert!(!is_offline(Some(NOW + Duration::seconds(3)), NOW));
    }

    #[test]
    fn boundary_sweep() {
        for ms in [0, 1, 1_000, 30_000, 59_999, 60_000] {
            assert!(!is_offline(Some(NOW - Duration::milliseconds(ms)), NOW), "{ms}");
        }
        for ms in [60_001, 61_000, 120_000, 86_400_000] {
            assert!(is_offline(Some(NOW - Duration::milliseconds(ms)), NOW), "{ms}");
        }
    }
}
