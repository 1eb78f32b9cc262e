//! ---
//! dbd_section: "01-core-functionality"
//! dbd_subsection: "module"
//! dbd_type: "source"
//! dbd_scope: "code"
//! dbd_description: "Deadline arithmetic for bounded waits."
//! dbd_version: "v0.0.0-prealpha"
//! dbd_owner: "tbd"
//! ---
use std::time::{Duration, Instant};

const NANOS_PER_MILLI: u128 = 1_000_000;

/// Capture an instant suitable for deadline comparisons.
pub fn monotonic_now() -> Instant {
    Instant::now()
}

/// Milliseconds elapsed since `start`, rounded to the nearest millisecond.
pub fn elapsed_millis(start: Instant) -> i64 {
    elapsed_millis_at(start, Instant::now())
}

/// Same as [`elapsed_millis`] but measured against an explicit `now`.
///
/// A `now` earlier than `start` counts as zero elapsed time.
pub fn elapsed_millis_at(start: Instant, now: Instant) -> i64 {
    let nanos = now.saturating_duration_since(start).as_nanos();
    let rounded = (nanos + NANOS_PER_MILLI / 2) / NANOS_PER_MILLI;
    i64::try_from(rounded).unwrap_or(i64::MAX)
}

/// Budget left after subtracting the time elapsed since `start`.
///
/// The result may be negative. Callers must treat anything `<= 0` as an
/// expired deadline and never block on it.
pub fn remaining_millis(budget_ms: i64, start: Instant) -> i64 {
    remaining_millis_at(budget_ms, start, Instant::now())
}

/// Same as [`remaining_millis`] but measured against an explicit `now`.
pub fn remaining_millis_at(budget_ms: i64, start: Instant, now: Instant) -> i64 {
    budget_ms.saturating_sub(elapsed_millis_at(start, now))
}

/// Convert a remaining budget into a wait duration; expired budgets map to zero.
pub fn wait_duration(remaining_ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(remaining_ms).unwrap_or(0))
}

/// Convert a duration into whole milliseconds, saturating at `i64::MAX`.
pub fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_rounds_to_nearest_millisecond() {
        let start = Instant::now();
        assert_eq!(elapsed_millis_at(start, start), 0);
        assert_eq!(elapsed_millis_at(start, start + Duration::from_micros(499)), 0);
        assert_eq!(elapsed_millis_at(start, start + Duration::from_micros(500)), 1);
        assert_eq!(elapsed_millis_at(start, start + Duration::from_micros(1_499)), 1);
        assert_eq!(elapsed_millis_at(start, start + Duration::from_millis(2_000)), 2_000);
    }

    #[test]
    fn clock_running_backwards_counts_as_no_elapsed_time() {
        let now = Instant::now();
        let later = now + Duration::from_millis(10);
        assert_eq!(elapsed_millis_at(later, now), 0);
    }

    #[test]
    fn remaining_is_never_positive_once_budget_is_spent() {
        let start = Instant::now();
        for budget in [0_i64, 1, 17, 250, 2_000, 5_000] {
            for overshoot in [0_u64, 1, 3, 999] {
                let elapsed = Duration::from_millis(budget as u64 + overshoot);
                let left = remaining_millis_at(budget, start, start + elapsed);
                assert!(left <= 0, "budget={budget} overshoot={overshoot} left={left}");
            }
        }
    }

    #[test]
    fn remaining_counts_down_from_budget() {
        let start = Instant::now();
        assert_eq!(remaining_millis_at(5_000, start, start), 5_000);
        assert_eq!(
            remaining_millis_at(5_000, start, start + Duration::from_millis(1_000)),
            4_000
        );
        assert_eq!(
            remaining_millis_at(5_000, start, start + Duration::from_millis(6_000)),
            -1_000
        );
    }

    #[test]
    fn expired_budgets_never_block() {
        assert_eq!(wait_duration(-40), Duration::ZERO);
        assert_eq!(wait_duration(0), Duration::ZERO);
        assert_eq!(wait_duration(25), Duration::from_millis(25));
    }

    #[test]
    fn live_clock_remaining_does_not_exceed_budget() {
        let start = monotonic_now();
        assert!(remaining_millis(100, start) <= 100);
        assert!(elapsed_millis(start) >= 0);
    }
}
