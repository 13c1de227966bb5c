use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::reactor::{Core, TimerEntry};
use crate::slab::Key;
use crate::Handle;

/// A one-shot timer dispatched by the reactor.
///
/// A timer is constructed with a default interval and is either armed (its
/// deadline is in the reactor's timer set) or idle. Arming an armed timer
/// re-deadlines it. When the deadline is reached the timer becomes idle
/// before the handler runs, so the handler may re-arm it.
///
/// Timers fire in deadline order; two timers with equal deadlines fire in
/// the order they were armed.
pub struct Timer {
    core: Rc<RefCell<Core>>,
    key: Key,
}

impl Timer {
    /// Registers a timer, initially idle.
    pub fn new<F>(handle: &Handle, interval: Duration, handler: F) -> Timer
    where
        F: FnMut() + 'static,
    {
        let key = handle.core().borrow_mut().timers.insert(TimerEntry {
            handler: Rc::new(RefCell::new(handler)),
            interval,
            deadline: None,
        });
        Timer {
            core: handle.core().clone(),
            key,
        }
    }

    /// Arms the timer to fire after its default interval.
    pub fn set(&self) {
        let interval = self
            .core
            .borrow()
            .timers
            .get(self.key)
            .expect("timer unregistered")
            .interval;
        self.set_after(interval);
    }

    /// Arms the timer to fire after `delay`.
    pub fn set_after(&self, delay: Duration) {
        self.set_absolute(Instant::now() + delay);
    }

    /// Arms the timer to fire at `deadline`.
    pub fn set_absolute(&self, deadline: Instant) {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        let entry = core.timers.get_mut(self.key).expect("timer unregistered");
        if let Some(old) = entry.deadline.take() {
            core.timer_queue.remove(&old);
        }
        core.timer_seq = core.timer_seq.wrapping_add(1);
        let slot = (deadline, core.timer_seq);
        entry.deadline = Some(slot);
        core.timer_queue.insert(slot, self.key);
    }

    /// Disarms the timer. No-op if idle. The handler is guaranteed not to
    /// run until the next arming.
    pub fn unset(&self) {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        let entry = core.timers.get_mut(self.key).expect("timer unregistered");
        if let Some(old) = entry.deadline.take() {
            core.timer_queue.remove(&old);
        }
    }

    pub fn is_set(&self) -> bool {
        self.core
            .borrow()
            .timers
            .get(self.key)
            .map(|entry| entry.deadline.is_some())
            .unwrap_or(false)
    }

    /// The default interval given at construction.
    pub fn interval(&self) -> Duration {
        self.core
            .borrow()
            .timers
            .get(self.key)
            .expect("timer unregistered")
            .interval
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        if let Some(entry) = core.timers.remove(self.key) {
            if let Some(old) = entry.deadline {
                core.timer_queue.remove(&old);
            }
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Timer")
            .field("set", &self.is_set())
            .finish()
    }
}
