//! Clock and sleep seams
//!
//! Every component that stamps records or waits between retries takes one of
//! these instead of calling `chrono` or `std::thread::sleep` directly, so tests
//! can pin the time and observe retry delays without actually waiting.

use parking_lot::Mutex;
use std::time::Duration;

/// Source of Unix timestamps in whole seconds
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock frozen at a single instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_unix(&self) -> i64 {
        self.0
    }
}

/// Blocking wait between retries and poll iterations
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Records requested sleeps and returns immediately
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// All durations requested so far, in call order
    pub fn calls(&self) -> Vec<Duration> {
        self.calls.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.calls.lock().push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_is_frozen() {
        let clock = FixedClock(1_700_000_000);
        assert_eq!(clock.now_unix(), 1_700_000_000);
        assert_eq!(clock.now_unix(), 1_700_000_000);
    }

    #[test]
    fn test_system_clock_is_after_2023() {
        assert!(SystemClock.now_unix() > 1_700_000_000);
    }

    #[test]
    fn test_recording_sleeper_keeps_order() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_millis(100));
        sleeper.sleep(Duration::from_secs(5));

        assert_eq!(sleeper.count(), 2);
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(100), Duration::from_secs(5)]
        );
    }
}
