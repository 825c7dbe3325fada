//! Single-threaded readiness loop.
//!
//! One `EventLoop` owns an epoll instance (via mio `Poll`), an eventfd-backed
//! waker, the fd→context table, a pending-task queue and a timer. The loop
//! thread is the only mutator of the fd table; other threads affect loop
//! state exclusively through [`EventLoop::run_in_loop`], which enqueues the
//! task and then wakes the poll — in that order, so wakeups cannot be missed.

use crate::core::socket::SocketContext;
use crate::core::timer::{Timer, TimerId};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use tracing::{debug, error, warn};

const MAX_EVENTS: usize = 1024;
const WAKER_TOKEN: Token = Token(usize::MAX);

type Task = Box<dyn FnOnce() + Send>;

/// A readiness loop bound to one thread, multiplexing a set of sockets and a
/// timer.
pub struct EventLoop {
    poll: Mutex<Poll>,
    registry: Registry,
    waker: Waker,
    quit: AtomicBool,
    /// Thread currently running [`EventLoop::run`]; tasks posted from this
    /// thread execute inline.
    owner: Mutex<Option<ThreadId>>,
    pending: Mutex<Vec<Task>>,
    timer: Timer,
    contexts: Mutex<HashMap<RawFd, Arc<dyn SocketContext>>>,
}

impl EventLoop {
    /// Create the loop. Failure to set up the poll or waker is fatal: no
    /// loop is returned and the server cannot start.
    pub fn new() -> io::Result<Arc<Self>> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        Ok(Arc::new(Self {
            poll: Mutex::new(poll),
            registry,
            waker,
            quit: AtomicBool::new(false),
            owner: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            timer: Timer::new(),
            contexts: Mutex::new(HashMap::new()),
        }))
    }

    /// Run the loop on the calling thread until [`EventLoop::stop`].
    ///
    /// Each iteration waits for readiness (bounded by the next timer
    /// deadline), dispatches ready fds, drains the pending-task queue, then
    /// fires expired timers.
    pub fn run(self: &Arc<Self>) {
        *self.owner.lock().unwrap() = Some(thread::current().id());
        let mut poll = self.poll.lock().unwrap();
        let mut events = Events::with_capacity(MAX_EVENTS);

        while !self.quit.load(Ordering::Acquire) {
            if let Err(e) = poll.poll(&mut events, self.timer.time_to_sleep()) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "poll failed");
                break;
            }

            for event in events.iter() {
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                let fd = event.token().0 as RawFd;
                // A context removed earlier in this batch no longer exists;
                // stale events for its fd are dropped here.
                let Some(ctx) = self.contexts.lock().unwrap().get(&fd).cloned() else {
                    continue;
                };

                if event.is_error() {
                    error!(fd, "error event");
                    self.remove_socket(fd);
                    continue;
                }

                if event.is_writable() {
                    if !ctx.handle_write() {
                        error!(fd, "write flush failed");
                        self.remove_socket(fd);
                    } else if !ctx.need_write() {
                        if ctx.is_closing() {
                            self.remove_socket(fd);
                        } else {
                            self.update_socket(fd, ctx.clear_writable());
                        }
                    }
                }

                // The writable branch may have removed the context.
                if !self.contexts.lock().unwrap().contains_key(&fd) {
                    continue;
                }

                if event.is_readable() || event.is_priority() || event.is_read_closed() {
                    if !ctx.is_closing() && !Arc::clone(&ctx).handle_read() {
                        self.remove_socket(fd);
                    }
                }
            }

            self.drain_pending();
            self.timer.check();
        }

        drop(poll);
        self.teardown();
    }

    /// Request the loop to exit at its next wakeup. Idempotent. In-flight
    /// callbacks complete; queued tasks are not guaranteed to run.
    pub fn stop(&self) {
        if self.quit.swap(true, Ordering::AcqRel) {
            return;
        }
        self.wake();
    }

    pub fn is_quit(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    /// Interrupt the poll wait.
    pub fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "wakeup failed");
        }
    }

    /// Execute `task` on the loop thread: inline when already there,
    /// otherwise enqueued for the current iteration's drain phase.
    pub fn run_in_loop<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if *self.owner.lock().unwrap() == Some(thread::current().id()) {
            task();
        } else {
            self.pending.lock().unwrap().push(Box::new(task));
            self.wake();
        }
    }

    /// Register a context with the loop. Posted through [`run_in_loop`]
    /// because it mutates the fd table.
    ///
    /// [`run_in_loop`]: EventLoop::run_in_loop
    pub(crate) fn add_socket(self: &Arc<Self>, ctx: Arc<dyn SocketContext>) {
        let this = Arc::clone(self);
        self.run_in_loop(move || {
            let fd = ctx.fd();
            if fd < 0 {
                return;
            }
            {
                let mut contexts = this.contexts.lock().unwrap();
                if contexts.contains_key(&fd) {
                    warn!(fd, "fd already registered");
                    return;
                }
                contexts.insert(fd, Arc::clone(&ctx));
            }
            if let Err(e) =
                this.registry
                    .register(&mut SourceFd(&fd), Token(fd as usize), ctx.interest())
            {
                this.contexts.lock().unwrap().remove(&fd);
                error!(fd, error = %e, "epoll add failed");
                return;
            }
            debug!(fd, "added to epoll");
        });
    }

    /// Change the watched events of a registered fd. Callers are already on
    /// the loop thread; failure schedules removal.
    pub(crate) fn update_socket(self: &Arc<Self>, fd: RawFd, interest: Interest) {
        if !self.contexts.lock().unwrap().contains_key(&fd) {
            return;
        }
        if let Err(e) = self
            .registry
            .reregister(&mut SourceFd(&fd), Token(fd as usize), interest)
        {
            error!(fd, error = %e, "epoll modify failed");
            self.remove_socket(fd);
        }
    }

    /// Deregister and drop the loop's reference to a context. Posted through
    /// [`run_in_loop`]; the fd itself closes when the last outstanding
    /// reference drops, which is always after the deregistration here.
    ///
    /// [`run_in_loop`]: EventLoop::run_in_loop
    pub(crate) fn remove_socket(self: &Arc<Self>, fd: RawFd) {
        let this = Arc::clone(self);
        self.run_in_loop(move || {
            // The table may hold the last reference; `removed` keeps the
            // context (and its fd) alive until after the deregistration.
            let removed = this.contexts.lock().unwrap().remove(&fd);
            if removed.is_some() {
                if let Err(e) = this.registry.deregister(&mut SourceFd(&fd)) {
                    warn!(fd, error = %e, "epoll del failed");
                }
                debug!(fd, "closed");
            }
        });
    }

    /// Schedule a one-shot timer on this loop. The callback runs on the loop
    /// thread. The loop is woken so a cross-thread add re-derives the poll
    /// timeout.
    pub fn add_timer<F>(&self, delay_ms: u64, callback: F) -> TimerId
    where
        F: FnMut(TimerId) + Send + Sync + 'static,
    {
        let id = self.timer.add(delay_ms, callback);
        self.wake();
        id
    }

    /// Schedule a recurring timer on this loop.
    pub fn add_recurring_timer<F>(&self, period_ms: u64, callback: F) -> TimerId
    where
        F: FnMut(TimerId) + Send + Sync + 'static,
    {
        let id = self.timer.add_recurring(period_ms, callback);
        self.wake();
        id
    }

    /// Cancel a timer scheduled on this loop. Best-effort: a callback already
    /// collected for firing is not recalled.
    pub fn remove_timer(&self, id: TimerId) -> bool {
        self.timer.cancel(id)
    }

    fn drain_pending(&self) {
        let tasks = std::mem::take(&mut *self.pending.lock().unwrap());
        for task in tasks {
            task();
        }
    }

    /// Drop every context, queued task and timer at loop exit, breaking the
    /// context→loop reference cycles deterministically.
    fn teardown(&self) {
        let contexts: Vec<_> = self.contexts.lock().unwrap().drain().collect();
        for (fd, _ctx) in contexts {
            let _ = self.registry.deregister(&mut SourceFd(&fd));
            debug!(fd, "closed");
        }
        self.pending.lock().unwrap().clear();
        self.timer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_run_in_loop_cross_thread() {
        let event_loop = EventLoop::new().unwrap();
        let worker = {
            let event_loop = Arc::clone(&event_loop);
            thread::spawn(move || event_loop.run())
        };

        let (tx, rx) = mpsc::channel();
        event_loop.run_in_loop(move || {
            tx.send(thread::current().id()).unwrap();
        });

        let loop_tid = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_ne!(loop_tid, thread::current().id());

        event_loop.stop();
        worker.join().unwrap();
    }

    #[test]
    fn test_run_in_loop_inline_on_owner_thread() {
        let event_loop = EventLoop::new().unwrap();
        let worker = {
            let event_loop = Arc::clone(&event_loop);
            thread::spawn(move || event_loop.run())
        };

        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&event_loop);
        event_loop.run_in_loop(move || {
            // Posting from the loop thread itself must execute synchronously,
            // before the outer task returns.
            let ran = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&ran);
            inner.run_in_loop(move || flag.store(true, Ordering::SeqCst));
            tx.send(ran.load(Ordering::SeqCst)).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        event_loop.stop();
        worker.join().unwrap();
    }

    #[test]
    fn test_timer_fires_on_loop_thread() {
        let event_loop = EventLoop::new().unwrap();
        let worker = {
            let event_loop = Arc::clone(&event_loop);
            thread::spawn(move || event_loop.run())
        };

        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        event_loop.add_timer(20, move |_| {
            tx.send(thread::current().id()).unwrap();
        });

        let loop_tid = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_ne!(loop_tid, thread::current().id());

        event_loop.stop();
        worker.join().unwrap();
    }

    #[test]
    fn test_cancelled_timer_does_not_fire() {
        let event_loop = EventLoop::new().unwrap();
        let worker = {
            let event_loop = Arc::clone(&event_loop);
            thread::spawn(move || event_loop.run())
        };

        let (tx, rx) = mpsc::channel::<()>();
        let id = event_loop.add_timer(50, move |_| {
            tx.send(()).unwrap();
        });
        assert!(event_loop.remove_timer(id));
        assert!(!event_loop.remove_timer(id));

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        event_loop.stop();
        worker.join().unwrap();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let event_loop = EventLoop::new().unwrap();
        let worker = {
            let event_loop = Arc::clone(&event_loop);
            thread::spawn(move || event_loop.run())
        };

        event_loop.stop();
        event_loop.stop();
        worker.join().unwrap();
        assert!(event_loop.is_quit());
    }
}
