use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A source of monotonic time.
///
/// Readings are offsets from an arbitrary, fixed origin. Only differences
/// between two readings of the same clock are meaningful.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall-clock backed [`Clock`] built on [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A [`Clock`] that only moves when told to.
///
/// Useful for driving idle checks and trial durations deterministically.
/// Readings have nanosecond resolution and saturate at `u64::MAX` nanoseconds.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

fn as_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self {
            now_ns: AtomicU64::new(as_nanos(start)),
        }
    }

    pub fn set(&self, now: Duration) {
        self.now_ns.store(as_nanos(now), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = as_nanos(by);
        let _ = self
            .now_ns
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| {
                Some(now.saturating_add(by))
            });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.now_ns.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(5));
        assert_eq!(clock.now(), Duration::from_secs(5));

        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), Duration::from_millis(6500));

        clock.set(Duration::ZERO);
        assert_eq!(clock.now(), Duration::ZERO);
    }

    #[test]
    fn manual_clock_keeps_sub_millisecond_steps() {
        let clock = ManualClock::new(Duration::ZERO);
        for _ in 0..4 {
            clock.advance(Duration::from_micros(250));
        }
        assert_eq!(clock.now(), Duration::from_millis(1));

        clock.set(Duration::from_nanos(1));
        assert_eq!(clock.now(), Duration::from_nanos(1));

        clock.advance(Duration::MAX);
        assert_eq!(clock.now(), Duration::from_nanos(u64::MAX));
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
