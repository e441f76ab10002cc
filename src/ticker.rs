use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use quanta::Clock;

/// A monotonic nanosecond clock.
///
/// `TraceMetric` never reads the wall clock on the hot path; every
/// duration it records comes from differencing two [`Ticker::now`]
/// values.
pub trait Ticker: Send + Sync {
    fn now(&self) -> i64;
}

/// The production ticker, backed by [`quanta::Clock`].
///
/// `quanta` is used here (rather than hand-rolling `Instant` arithmetic)
/// because it is cheap to call on the hot path and, via
/// [`SystemTicker::mocked`], cheap to fake out in tests without touching
/// the real clock.
#[derive(Clone)]
pub struct SystemTicker {
    clock: Clock,
    epoch: quanta::Instant,
}

impl SystemTicker {
    pub fn new() -> Self {
        let clock = Clock::new();
        let epoch = clock.now();
        Self { clock, epoch }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for SystemTicker {
    fn now(&self) -> i64 {
        self.clock.now().duration_since(self.epoch).as_nanos() as i64
    }
}

/// A ticker a test can advance by hand, so tests can assert exact
/// durations instead of racing the real clock.
#[derive(Clone, Default)]
pub struct FakeTicker {
    now: Arc<AtomicI64>,
}

impl FakeTicker {
    pub fn new(start: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn set(&self, value: i64) {
        self.now.store(value, Ordering::SeqCst);
    }

    pub fn advance(&self, delta: i64) -> i64 {
        self.now.fetch_add(delta, Ordering::SeqCst) + delta
    }
}

impl Ticker for FakeTicker {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_ticker_advances_deterministically() {
        let ticker = FakeTicker::new(100);
        assert_eq!(ticker.now(), 100);
        ticker.set(150);
        assert_eq!(ticker.now(), 150);
        assert_eq!(ticker.advance(50), 200);
        assert_eq!(ticker.now(), 200);
    }

    #[test]
    fn system_ticker_is_nondecreasing() {
        let ticker = SystemTicker::new();
        let a = ticker.now();
        let b = ticker.now();
        assert!(b >= a);
    }
}
