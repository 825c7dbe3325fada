//! Main/sub reactor composition.
//!
//! One main loop runs the acceptor on the caller's thread; `N` sub loops run
//! on their own threads and receive accepted connections round-robin. With
//! `N = 0` everything shares the main loop.

use crate::core::event_loop::EventLoop;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{error, info};

fn num_cpus() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

/// A main event loop plus zero or more sub loops on worker threads.
pub struct Reactor {
    main: Arc<EventLoop>,
    subs: Vec<Arc<EventLoop>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    /// Round-robin cursor for fd assignment.
    cursor: AtomicUsize,
}

impl Reactor {
    /// Create a reactor with `min(sub_count, hardware parallelism)` sub
    /// loops. Loop construction failures are fatal.
    pub fn new(sub_count: usize) -> io::Result<Arc<Self>> {
        let sub_count = sub_count.min(num_cpus());
        let main = EventLoop::new()?;
        let mut subs = Vec::with_capacity(sub_count);
        for _ in 0..sub_count {
            subs.push(EventLoop::new()?);
        }
        Ok(Arc::new(Self {
            main,
            subs,
            threads: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }))
    }

    pub fn main_loop(&self) -> &Arc<EventLoop> {
        &self.main
    }

    /// Spawn the sub-loop threads, then run the main loop on the calling
    /// thread. Blocks until [`Reactor::stop`].
    pub fn start(&self) -> io::Result<()> {
        info!(sub_loops = self.subs.len(), "starting reactor");
        {
            let mut threads = self.threads.lock().unwrap();
            for (i, event_loop) in self.subs.iter().enumerate() {
                let event_loop = Arc::clone(event_loop);
                let handle = thread::Builder::new()
                    .name(format!("sub-loop-{i}"))
                    .spawn(move || event_loop.run())?;
                threads.push(handle);
            }
        }
        self.main.run();
        Ok(())
    }

    /// Stop every loop and join the sub threads. Idempotent.
    pub fn stop(&self) {
        if self.main.is_quit() {
            return;
        }
        self.main.stop();
        for event_loop in &self.subs {
            event_loop.stop();
        }
        for handle in self.threads.lock().unwrap().drain(..) {
            if handle.join().is_err() {
                error!("sub loop thread panicked");
            }
        }
    }

    /// Pick the loop for the next accepted connection: sub loops round-robin,
    /// or the main loop when there are none. Only the acceptor thread calls
    /// this on the hot path; the atomic cursor keeps it well-defined for any
    /// caller.
    pub fn next_loop(&self) -> Arc<EventLoop> {
        if self.subs.is_empty() {
            return Arc::clone(&self.main);
        }
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        Arc::clone(&self.subs[i % self.subs.len()])
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_subs_falls_back_to_main() {
        let reactor = Reactor::new(0).unwrap();
        assert!(Arc::ptr_eq(&reactor.next_loop(), reactor.main_loop()));
        assert!(Arc::ptr_eq(&reactor.next_loop(), reactor.main_loop()));
    }

    #[test]
    fn test_round_robin_assignment() {
        let reactor = Reactor::new(2.min(num_cpus())).unwrap();
        if reactor.subs.len() < 2 {
            return; // single-core machine
        }
        let a = reactor.next_loop();
        let b = reactor.next_loop();
        let c = reactor.next_loop();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert!(!Arc::ptr_eq(&a, reactor.main_loop()));
    }

    #[test]
    fn test_start_stop_joins() {
        let reactor = Reactor::new(1).unwrap();
        let runner = {
            let reactor = Arc::clone(&reactor);
            thread::spawn(move || reactor.start().unwrap())
        };
        // Give the main loop a moment to enter its poll.
        thread::sleep(std::time::Duration::from_millis(20));
        reactor.stop();
        runner.join().unwrap();
        assert!(reactor.main_loop().is_quit());
    }
}
