use crate::clock::Clock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default delay between two consecutive idle probes.
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_secs(1);
/// Default grace period before the first idle probe of a trial.
pub const DEFAULT_INIT_DELAY: Duration = Duration::from_secs(60);

/// Reports whether the target has stopped making forward progress.
///
/// The `threshold` is handed through untouched from the [`IdleChecker`]; its
/// meaning (for example a CPU usage percentage) belongs to the probe.
pub trait IdleProbe {
    fn is_idle(&mut self, threshold: u8) -> bool;
}

impl<F> IdleProbe for F
where
    F: FnMut(u8) -> bool,
{
    fn is_idle(&mut self, threshold: u8) -> bool {
        self(threshold)
    }
}

/// Parameters used to build an [`IdleChecker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleSettings {
    pub threshold: u8,
    pub init_delay: Duration,
    pub poll_delay: Duration,
}

impl IdleSettings {
    pub fn new(threshold: u8, init_delay: Duration) -> Self {
        Self {
            threshold,
            init_delay,
            poll_delay: DEFAULT_POLL_DELAY,
        }
    }
}

/// Rate limits an expensive [`IdleProbe`].
///
/// The probe is only consulted once the scheduled poll time has been reached.
/// The first poll of a trial is scheduled `init_delay` out so that startup
/// noise is not mistaken for idleness; later polls are `poll_delay` apart.
pub struct IdleChecker {
    probe: Box<dyn IdleProbe>,
    threshold: u8,
    init_delay: Duration,
    poll_delay: Duration,
    next_poll: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl IdleChecker {
    pub fn new(
        probe: impl IdleProbe + 'static,
        threshold: u8,
        init_delay: Duration,
        poll_delay: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            probe: Box::new(probe),
            threshold,
            init_delay,
            poll_delay,
            next_poll: None,
            clock,
        }
    }

    pub fn from_settings(
        probe: impl IdleProbe + 'static,
        settings: &IdleSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            probe,
            settings.threshold,
            settings.init_delay,
            settings.poll_delay,
            clock,
        )
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn init_delay(&self) -> Duration {
        self.init_delay
    }

    pub fn poll_delay(&self) -> Duration {
        self.poll_delay
    }

    /// Time of the next permitted probe, `None` until a poll is scheduled.
    pub fn next_poll(&self) -> Option<Duration> {
        self.next_poll
    }

    pub fn schedule_poll(&mut self, initial: bool) {
        let delay = if initial {
            self.init_delay
        } else {
            self.poll_delay
        };
        self.next_poll = Some(deadline(self.clock.now(), delay));
    }

    /// Returns the probe's verdict if a poll is due, `false` otherwise.
    pub fn is_idle(&mut self) -> bool {
        let now = self.clock.now();
        match self.next_poll {
            Some(next_poll) if now >= next_poll => {
                self.next_poll = Some(deadline(now, self.poll_delay));
                self.probe.is_idle(self.threshold)
            }
            _ => false,
        }
    }
}

/// `now + delay`, saturating at [`Duration::MAX`].
fn deadline(now: Duration, delay: Duration) -> Duration {
    now.checked_add(delay).unwrap_or(Duration::MAX)
}

impl fmt::Debug for IdleChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleChecker")
            .field("threshold", &self.threshold)
            .field("init_delay", &self.init_delay)
            .field("poll_delay", &self.poll_delay)
            .field("next_poll", &self.next_poll)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::Cell;
    use std::rc::Rc;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn schedule_poll_uses_init_then_poll_delay() {
        let clock = Arc::new(ManualClock::new(Duration::ZERO));
        let mut checker = IdleChecker::new(|_: u8| false, 95, secs(10), secs(1), clock.clone());
        assert_eq!(checker.threshold(), 95);
        assert_eq!(checker.init_delay(), secs(10));
        assert_eq!(checker.poll_delay(), secs(1));
        assert_eq!(checker.next_poll(), None);

        checker.schedule_poll(true);
        assert_eq!(checker.next_poll(), Some(secs(10)));

        checker.schedule_poll(false);
        assert_eq!(checker.next_poll(), Some(secs(1)));

        clock.set(secs(4));
        checker.schedule_poll(false);
        assert_eq!(checker.next_poll(), Some(secs(5)));
    }

    #[test]
    fn is_idle_rate_limits_the_probe() {
        let clock = Arc::new(ManualClock::new(Duration::ZERO));
        let calls = Rc::new(Cell::new(0u32));
        let verdict = Rc::new(Cell::new(false));
        let probe = {
            let calls = calls.clone();
            let verdict = verdict.clone();
            move |threshold: u8| {
                assert_eq!(threshold, 99);
                calls.set(calls.get() + 1);
                verdict.get()
            }
        };
        let mut checker = IdleChecker::new(probe, 99, secs(10), secs(1), clock.clone());

        checker.schedule_poll(false);
        assert!(!checker.is_idle(), "poll is not due yet");
        assert_eq!(calls.get(), 0);

        clock.set(secs(10));
        assert!(!checker.is_idle());
        assert_eq!(checker.next_poll(), Some(secs(11)));
        assert_eq!(calls.get(), 1);

        verdict.set(true);
        clock.set(secs(11));
        assert!(checker.is_idle());
        assert_eq!(calls.get(), 2);
        assert_eq!(checker.next_poll(), Some(secs(12)));
    }

    #[test]
    fn is_idle_before_any_schedule_never_probes() {
        let clock = Arc::new(ManualClock::new(secs(1000)));
        let calls = Rc::new(Cell::new(0u32));
        let probe = {
            let calls = calls.clone();
            move |_: u8| {
                calls.set(calls.get() + 1);
                true
            }
        };
        let mut checker = IdleChecker::new(probe, 50, secs(10), secs(1), clock);
        assert!(!checker.is_idle());
        assert_eq!(calls.get(), 0);
        assert_eq!(checker.next_poll(), None);
    }

    #[test]
    fn initial_schedule_holds_off_early_probes() {
        let clock = Arc::new(ManualClock::new(Duration::ZERO));
        let calls = Rc::new(Cell::new(0u32));
        let probe = {
            let calls = calls.clone();
            move |_: u8| {
                calls.set(calls.get() + 1);
                true
            }
        };
        let settings = IdleSettings::new(20, secs(10));
        let mut checker = IdleChecker::from_settings(probe, &settings, clock.clone());
        assert_eq!(checker.poll_delay(), DEFAULT_POLL_DELAY);

        checker.schedule_poll(true);
        for t in 0..10 {
            clock.set(secs(t));
            assert!(!checker.is_idle());
        }
        assert_eq!(calls.get(), 0);

        clock.set(secs(10));
        assert!(checker.is_idle());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn huge_delays_saturate_instead_of_overflowing() {
        let clock = Arc::new(ManualClock::new(secs(5)));
        let calls = Rc::new(Cell::new(0u32));
        let probe = {
            let calls = calls.clone();
            move |_: u8| {
                calls.set(calls.get() + 1);
                false
            }
        };
        let mut checker = IdleChecker::new(probe, 10, secs(u64::MAX), secs(u64::MAX), clock.clone());

        checker.schedule_poll(true);
        assert_eq!(checker.next_poll(), Some(Duration::MAX));
        checker.schedule_poll(false);
        assert_eq!(checker.next_poll(), Some(Duration::MAX));
        assert!(!checker.is_idle());
        assert_eq!(calls.get(), 0);

        let mut checker = IdleChecker::new(|_: u8| false, 10, Duration::ZERO, secs(u64::MAX), clock);
        checker.schedule_poll(true);
        assert!(!checker.is_idle());
        assert_eq!(checker.next_poll(), Some(Duration::MAX));
    }
}
