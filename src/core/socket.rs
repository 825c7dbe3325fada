//! Per-fd context driven by an event loop.

use mio::Interest;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Interest mask for contexts that only consume input: readable plus
/// urgent/priority data. mio registrations are edge-triggered, so readers
/// must drain until `WouldBlock`.
pub(crate) const READ_INTEREST: Interest = Interest::READABLE.add(Interest::PRIORITY);

/// State attached to one kernel file descriptor inside an event loop.
///
/// Contexts are shared: the loop's fd table holds the primary reference and
/// callbacks hold short-lived clones. The fd is closed exactly once, when the
/// last reference drops — always after the loop has deregistered it.
pub(crate) trait SocketContext: Send + Sync {
    fn fd(&self) -> RawFd;

    /// Events this context is currently registered for.
    fn interest(&self) -> Interest;

    /// Consume read readiness. Returning `false` tells the loop to remove the
    /// context (peer closed or hard error).
    fn handle_read(self: Arc<Self>) -> bool;

    /// Flush buffered output, consuming whatever the kernel accepted.
    /// Returning `false` tells the loop to remove the context.
    fn handle_write(&self) -> bool {
        true
    }

    /// Whether buffered output is still pending.
    fn need_write(&self) -> bool {
        false
    }

    /// Whether the context is draining toward removal; readable events are
    /// ignored and the context is removed once the write buffer empties.
    fn is_closing(&self) -> bool {
        false
    }

    /// Drop write interest from the watched mask, returning the new mask.
    fn clear_writable(&self) -> Interest {
        READ_INTEREST
    }
}
