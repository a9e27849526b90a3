//! Remaining pump run time, derived from the last authoritative snapshot.

use time::OffsetDateTime;

/// Whole seconds left in the current cycle, assuming it started at
/// `last_seen`. Elapsed time is floored and the result clamped to
/// `[0, duration]`, so a future `last_seen` (clock skew) never inflates the
/// countdown past the requested duration.
pub fn remaining_secs(
    pump_status: bool,
    duration: i64,
    last_seen: OffsetDateTime,
    now: OffsetDateTime,
) -> u32 {
    if !pump_status || duration <= 0 {
        return 0;
    }
    let elapsed = (now - last_seen).whole_milliseconds().div_euclid(1000);
    let duration = i128::from(duration);
    let remaining = (duration - elapsed).clamp(0, duration);
    u32::try_from(remaining).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    const START: OffsetDateTime = datetime!(2025-06-01 12:00:00 UTC);

    #[test]
    fn idle_pump_has_nothing_left() {
        assert_eq!(remaining_secs(false, 30, START, START), 0);
    }

    #[test]
    fn counts_down_from_cycle_start() {
        assert_eq!(remaining_secs(true, 30, START, START), 30);
        assert_eq!(remaining_secs(true, 30, START, START + Duration::seconds(10)), 20);
    }

    #[test]
    fn partial_seconds_are_floored() {
        let now = START + Duration::milliseconds(10_999);
        assert_eq!(remaining_secs(true, 30, START, now), 20);
    }

    #[test]
    fn finished_cycle_is_zero() {
        let now = START + Duration::seconds(45);
        assert_eq!(remaining_secs(true, 30, START, now), 0);
    }

    #[test]
    fn future_last_seen_does_not_exceed_duration() {
        let now = START - Duration::seconds(5);
        assert_eq!(remaining_secs(true, 30, START, now), 30);
    }

    #[test]
    fn non_positive_duration_is_zero() {
        assert_eq!(remaining_secs(true, 0, START, START), 0);
        assert_eq!(remaining_secs(true, -4, START, START), 0);
    }
}
