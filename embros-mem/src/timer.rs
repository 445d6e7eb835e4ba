//! Deadline-driven timers.

use embros_core::{Error, RawTimer, Result, Waitable};
use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

struct TimerState {
    next: Instant,
    canceled: bool,
}

/// A periodic timer. The user callback lives on the timer itself; the
/// executor fires it through [`RawTimer::call`].
pub struct Timer {
    period: Duration,
    state: Mutex<TimerState>,
    callback: Mutex<Box<dyn FnMut() + Send>>,
}

impl Timer {
    pub(crate) fn new(period: Duration, callback: Box<dyn FnMut() + Send>) -> Result<Arc<Self>> {
        if period.is_zero() {
            return Err(Error::InvalidArgument("timer period must be non-zero"));
        }
        Ok(Arc::new(Self {
            period,
            state: Mutex::new(TimerState {
                next: Instant::now() + period,
                canceled: false,
            }),
            callback: Mutex::new(callback),
        }))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stops the timer. Subsequent `call`s return `TimerCanceled` and the
    /// timer no longer becomes ready.
    pub fn cancel(&self) {
        self.state.lock().canceled = true;
    }

    pub fn is_canceled(&self) -> bool {
        self.state.lock().canceled
    }

    /// Re-arms the timer one period from now.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.next = Instant::now() + self.period;
        state.canceled = false;
    }
}

impl Waitable for Timer {
    fn ready(&self) -> bool {
        let state = self.state.lock();
        !state.canceled && Instant::now() >= state.next
    }
}

impl RawTimer for Timer {
    fn call(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.canceled {
                return Err(Error::TimerCanceled);
            }
            // Keep phase when on time; re-anchor after a missed window so a
            // stall does not burst-fire the backlog.
            let now = Instant::now();
            let mut next = state.next + self.period;
            if next <= now {
                next = now + self.period;
            }
            state.next = next;
        }
        let mut callback = self.callback.lock();
        (*callback)();
        Ok(())
    }

    fn next_deadline(&self) -> Option<Instant> {
        let state = self.state.lock();
        if state.canceled { None } else { Some(state.next) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_becomes_ready_after_period() {
        let timer = Timer::new(Duration::from_millis(10), Box::new(|| ())).unwrap();
        assert!(!timer.ready());
        thread::sleep(Duration::from_millis(15));
        assert!(timer.ready());
    }

    #[test]
    fn test_call_invokes_and_rearms() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let timer = Timer::new(
            Duration::from_millis(10),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(15));
        timer.call().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.ready());
    }

    #[test]
    fn test_canceled() {
        let timer = Timer::new(Duration::from_millis(1), Box::new(|| ())).unwrap();
        timer.cancel();
        assert!(!timer.ready());
        assert!(timer.next_deadline().is_none());
        assert!(matches!(timer.call(), Err(Error::TimerCanceled)));
    }

    #[test]
    fn test_zero_period_rejected() {
        assert!(Timer::new(Duration::ZERO, Box::new(|| ())).is_err());
    }
}
