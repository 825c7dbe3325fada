//! Per-loop timer set.
//!
//! Timers are ordered by `(expire_ms, id)` with ids drawn from a process-wide
//! counter, so two timers due at the same millisecond fire in creation order.
//! All operations are internally synchronized; callbacks are invoked outside
//! the lock so they may re-enter the timer (cancel, re-arm, add).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{OnceLock, RwLock};
use std::time::{Duration, Instant};

/// Identifier of a scheduled timer, unique for the lifetime of the process.
pub type TimerId = u64;

type TimerCallback = Box<dyn FnMut(TimerId) + Send + Sync>;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Milliseconds since an arbitrary process-local epoch, monotonic.
fn now_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u64
}

struct TimerEntry {
    callback: TimerCallback,
    /// Re-arm period; `None` for one-shot timers.
    period: Option<u64>,
}

#[derive(Default)]
struct TimerInner {
    queue: BTreeMap<(u64, TimerId), TimerEntry>,
    /// id -> expire, so cancellation can reconstruct the queue key.
    index: HashMap<TimerId, u64>,
}

/// Ordered timer set with one-shot and recurring entries.
#[derive(Default)]
pub struct Timer {
    inner: RwLock<TimerInner>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `callback` to run once, `delay_ms` from now.
    pub fn add<F>(&self, delay_ms: u64, callback: F) -> TimerId
    where
        F: FnMut(TimerId) + Send + Sync + 'static,
    {
        self.insert(delay_ms, Box::new(callback), None)
    }

    /// Schedule `callback` to run every `period_ms`, starting one period from
    /// now. The entry re-arms itself after each firing, keeping its id.
    pub fn add_recurring<F>(&self, period_ms: u64, callback: F) -> TimerId
    where
        F: FnMut(TimerId) + Send + Sync + 'static,
    {
        self.insert(period_ms, Box::new(callback), Some(period_ms))
    }

    fn insert(&self, delay_ms: u64, callback: TimerCallback, period: Option<u64>) -> TimerId {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let expire = now_ms() + delay_ms;
        let mut inner = self.inner.write().unwrap();
        inner.queue.insert((expire, id), TimerEntry { callback, period });
        inner.index.insert(id, expire);
        id
    }

    /// Cancel a pending timer. Returns whether an entry was removed.
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some(expire) = inner.index.remove(&id) else {
            return false;
        };
        inner.queue.remove(&(expire, id)).is_some()
    }

    /// Fire every entry whose deadline has passed.
    ///
    /// Due entries are collected under the lock, then invoked after it is
    /// released; recurring entries are re-inserted afterwards with a fresh
    /// deadline and their original id.
    pub fn check(&self) {
        let now = now_ms();
        let mut due = Vec::new();
        {
            let mut inner = self.inner.write().unwrap();
            while let Some((&(expire, id), _)) = inner.queue.first_key_value() {
                if expire > now {
                    break;
                }
                let entry = inner.queue.remove(&(expire, id)).unwrap();
                inner.index.remove(&id);
                due.push((id, entry));
            }
        }
        for (id, mut entry) in due {
            (entry.callback)(id);
            if let Some(period) = entry.period {
                let expire = now_ms() + period;
                let mut inner = self.inner.write().unwrap();
                inner.queue.insert((expire, id), entry);
                inner.index.insert(id, expire);
            }
        }
    }

    /// Time until the earliest deadline, clamped at zero; `None` when no
    /// timer is pending.
    pub fn time_to_sleep(&self) -> Option<Duration> {
        let inner = self.inner.read().unwrap();
        let (&(expire, _), _) = inner.queue.first_key_value()?;
        Some(Duration::from_millis(expire.saturating_sub(now_ms())))
    }

    /// Drop every pending entry. Used at loop teardown so callbacks holding
    /// connection references do not outlive the loop.
    pub(crate) fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.queue.clear();
        inner.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_one_shot_fires_once() {
        let timer = Timer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        timer.add(0, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timer.check();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Already consumed; nothing fires again.
        timer.check();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timer.time_to_sleep().is_none());
    }

    #[test]
    fn test_not_due_yet() {
        let timer = Timer::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        timer.add(10_000, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timer.check();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let sleep = timer.time_to_sleep().unwrap();
        assert!(sleep <= Duration::from_millis(10_000));
        assert!(sleep > Duration::from_millis(8_000));
    }

    #[test]
    fn test_cancel_accounting() {
        let timer = Timer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let mut ids = Vec::new();
        for _ in 0..5 {
            let counter = Arc::clone(&fired);
            ids.push(timer.add(0, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert!(timer.cancel(ids[1]));
        assert!(timer.cancel(ids[3]));
        // Cancelling twice, or a never-issued id, reports false.
        assert!(!timer.cancel(ids[1]));
        assert!(!timer.cancel(u64::MAX));

        timer.check();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_same_deadline_fires_in_creation_order() {
        let timer = Timer::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut ids = Vec::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            ids.push(timer.add(0, move |_| order.lock().unwrap().push(i)));
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        timer.check();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_recurring_rearms_with_same_id() {
        let timer = Timer::new();
        let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&fired);
        let id = timer.add_recurring(0, move |fired_id| {
            seen.lock().unwrap().push(fired_id);
        });

        timer.check();
        thread::sleep(Duration::from_millis(2));
        timer.check();

        let seen = fired.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|&fired_id| fired_id == id));
        // Still armed for the next period.
        assert!(timer.time_to_sleep().is_some());
    }

    #[test]
    fn test_callback_may_reenter() {
        let timer = Arc::new(Timer::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let inner_timer = Arc::clone(&timer);
        let inner_fired = Arc::clone(&fired);
        timer.add(0, move |_| {
            inner_fired.fetch_add(1, Ordering::SeqCst);
            let counter = Arc::clone(&inner_fired);
            // Re-entrant add must not deadlock.
            inner_timer.add(10_000, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        timer.check();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timer.time_to_sleep().is_some());
    }
}
