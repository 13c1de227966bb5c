//! Runtime contract checking.
//!
//! Contract violations elsewhere in the crate are ordinary `assert!`s or
//! `debug_assert!`s at the public entry points. The two helpers here cover
//! the patterns an assertion at a single call site cannot: counting live
//! dependent objects, and latching a fatal error so that later entries into
//! a dead object are caught.

use std::cell::Cell;

/// Counts live objects that reference a container.
///
/// The container embeds a counter and asserts on drop (in debug builds)
/// that every dependent object was freed first.
#[derive(Debug, Default)]
pub struct DebugCounter {
    count: Cell<usize>,
}

impl DebugCounter {
    pub fn new() -> DebugCounter {
        DebugCounter {
            count: Cell::new(0),
        }
    }

    pub fn increment(&self) {
        self.count.set(self.count.get() + 1);
    }

    pub fn decrement(&self) {
        debug_assert!(self.count.get() > 0, "counter underflow");
        self.count.set(self.count.get().saturating_sub(1));
    }

    pub fn count(&self) -> usize {
        self.count.get()
    }
}

impl Drop for DebugCounter {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert_eq!(self.count.get(), 0, "dependent objects still live");
        }
    }
}

/// Latches the first fatal error on a node.
///
/// Once set, any further entry into the node (checked with [`check`]) is a
/// contract violation in debug builds.
///
/// [`check`]: ErrorLatch::check
#[derive(Debug, Default)]
pub struct ErrorLatch {
    errored: Cell<bool>,
}

impl ErrorLatch {
    pub fn new() -> ErrorLatch {
        ErrorLatch {
            errored: Cell::new(false),
        }
    }

    /// Records the error. Must be called at most once.
    pub fn set(&self) {
        debug_assert!(!self.errored.get(), "error reported twice");
        self.errored.set(true);
    }

    pub fn is_set(&self) -> bool {
        self.errored.get()
    }

    /// Asserts the node has not errored.
    pub fn check(&self) {
        debug_assert!(!self.errored.get(), "operation on errored object");
    }
}

#[cfg(test)]
mod tests {
    use super::{DebugCounter, ErrorLatch};

    #[test]
    fn counter() {
        let ctr = DebugCounter::new();
        ctr.increment();
        ctr.increment();
        assert_eq!(ctr.count(), 2);
        ctr.decrement();
        ctr.decrement();
        assert_eq!(ctr.count(), 0);
    }

    #[test]
    fn latch() {
        let latch = ErrorLatch::new();
        latch.check();
        assert!(!latch.is_set());
        latch.set();
        assert!(latch.is_set());
    }
}
