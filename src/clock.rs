use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Wall-clock milliseconds, used only to compute/align `captureTime`
/// window boundaries. Never used on the `TraceMetric` hot path.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("system clock is before the epoch")
            .as_millis() as i64
    }
}

/// A clock a test can set by hand, to pin down window alignment without
/// waiting on real wall-clock time.
#[derive(Clone, Default)]
pub struct FakeClock {
    now_millis: Arc<AtomicI64>,
}

impl FakeClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now_millis: Arc::new(AtomicI64::new(start_millis)),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now_millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_millis: i64) -> i64 {
        self.now_millis.fetch_add(delta_millis, Ordering::SeqCst) + delta_millis
    }
}

impl Clock for FakeClock {
    fn now_millis(&self) -> i64 {
        self.now_millis.load(Ordering::SeqCst)
    }
}

/// Rounds `now_millis` up to the next multiple of `interval_millis`,
/// i.e. `ceil(now / interval) * interval`.
pub fn align_up(now_millis: i64, interval_millis: i64) -> i64 {
    debug_assert!(interval_millis > 0);
    let remainder = now_millis.rem_euclid(interval_millis);
    if remainder == 0 {
        now_millis
    } else {
        now_millis + (interval_millis - remainder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_up_to_the_next_boundary() {
        assert_eq!(align_up(5, 10), 10);
        assert_eq!(align_up(12, 10), 20);
    }

    #[test]
    fn align_up_is_identity_on_boundary() {
        assert_eq!(align_up(10, 10), 10);
        assert_eq!(align_up(0, 10), 0);
    }

    #[test]
    fn fake_clock_reports_what_it_is_set_to() {
        let clock = FakeClock::new(5);
        assert_eq!(clock.now_millis(), 5);
        clock.set(12);
        assert_eq!(clock.now_millis(), 12);
        assert_eq!(align_up(clock.now_millis(), 10), 20);
    }
}
