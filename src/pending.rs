use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::reactor::{Core, JobEntry};
use crate::slab::Key;
use crate::Handle;

/// A deferred job: a zero-delay callback drained by the reactor before it
/// blocks for I/O or timers.
///
/// Every interface operation and completion in the flow layer goes through a
/// pending job rather than a direct call. This turns what would otherwise be
/// deep recursive call chains through a pipeline into a flat dispatch loop,
/// and lets a provider complete an operation from within the operation call
/// without re-entering its caller.
///
/// A job is either idle or set. [`set`] appends it to the reactor's FIFO; a
/// job that is already set is moved to the tail. [`unset`] makes it idle
/// again and guarantees the handler will not run until the next `set`.
/// Dispatch marks the job idle before invoking the handler, so the handler
/// may re-set its own job.
///
/// Dropping the job unregisters it; the handler will not be invoked
/// afterwards.
///
/// [`set`]: Pending::set
/// [`unset`]: Pending::unset
pub struct Pending {
    core: Rc<RefCell<Core>>,
    key: Key,
}

impl Pending {
    /// Registers a job with the reactor, initially idle.
    pub fn new<F>(handle: &Handle, handler: F) -> Pending
    where
        F: FnMut() + 'static,
    {
        let key = handle.core().borrow_mut().jobs.insert(JobEntry {
            handler: Rc::new(RefCell::new(handler)),
            queued: false,
            epoch: 0,
        });
        Pending {
            core: handle.core().clone(),
            key,
        }
    }

    /// Schedules the job at the tail of the queue. If it is already set it
    /// is moved to the tail.
    pub fn set(&self) {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        let entry = core.jobs.get_mut(self.key).expect("job unregistered");
        entry.epoch = entry.epoch.wrapping_add(1);
        entry.queued = true;
        core.job_queue.push_back((self.key, entry.epoch));
    }

    /// Makes the job idle. No-op if it is not set.
    pub fn unset(&self) {
        let mut core = self.core.borrow_mut();
        let entry = core.jobs.get_mut(self.key).expect("job unregistered");
        entry.epoch = entry.epoch.wrapping_add(1);
        entry.queued = false;
    }

    pub fn is_set(&self) -> bool {
        self.core
            .borrow()
            .jobs
            .get(self.key)
            .map(|entry| entry.queued)
            .unwrap_or(false)
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        self.core.borrow_mut().jobs.remove(self.key);
    }
}

impl fmt::Debug for Pending {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Pending")
            .field("set", &self.is_set())
            .finish()
    }
}
