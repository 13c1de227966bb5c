use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::debug::DebugCounter;
use crate::slab::{Key, Slab};
use crate::{Handle, Pending};

/// FIFO mutual exclusion expressed in reactor jobs.
///
/// Consumers create an [`EventLockJob`] referencing the lock and call
/// [`wait`]; when the job reaches the head of the queue its handler is
/// invoked and the job holds the lock until [`release`]. Strict FIFO
/// service with a single holder and no threads; ordering is purely
/// cooperative.
///
/// [`wait`]: EventLockJob::wait
/// [`release`]: EventLockJob::release
pub struct EventLock {
    state: Rc<RefCell<LockState>>,
}

struct LockState {
    waiters: Slab<Waiter>,
    queue: VecDeque<Key>,
    exec_job: Pending,
    jobs: DebugCounter,
}

struct Waiter {
    handler: Rc<RefCell<dyn FnMut()>>,
    queued: bool,
}

impl EventLock {
    pub fn new(handle: &Handle) -> EventLock {
        let state = Rc::new_cyclic(|weak: &Weak<RefCell<LockState>>| {
            let w = weak.clone();
            RefCell::new(LockState {
                waiters: Slab::new(),
                queue: VecDeque::new(),
                exec_job: Pending::new(handle, move || exec(&w)),
                jobs: DebugCounter::new(),
            })
        });
        EventLock { state }
    }
}

impl Drop for EventLock {
    fn drop(&mut self) {
        debug_assert!(
            self.state.borrow().waiters.is_empty(),
            "lock dropped with live jobs",
        );
    }
}

impl fmt::Debug for EventLock {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.borrow();
        fmt.debug_struct("EventLock")
            .field("waiting", &s.queue.len())
            .finish()
    }
}

/// A consumer of an [`EventLock`].
///
/// The job is idle after construction. [`wait`] queues it; the handler
/// runs when the lock is acquired, and the job then holds the lock until
/// [`release`] (which also aborts a wait that has not been served yet).
/// Dropping the job releases as needed.
///
/// [`wait`]: EventLockJob::wait
/// [`release`]: EventLockJob::release
pub struct EventLockJob {
    lock: Rc<RefCell<LockState>>,
    key: Key,
}

impl EventLockJob {
    pub fn new<F>(lock: &EventLock, handler: F) -> EventLockJob
    where
        F: FnMut() + 'static,
    {
        let mut s = lock.state.borrow_mut();
        s.jobs.increment();
        let key = s.waiters.insert(Waiter {
            handler: Rc::new(RefCell::new(handler)),
            queued: false,
        });
        EventLockJob {
            lock: lock.state.clone(),
            key,
        }
    }

    /// Requests the lock. The job must be idle.
    pub fn wait(&self) {
        let mut s = self.lock.borrow_mut();
        let waiter = s.waiters.get_mut(self.key).expect("job unregistered");
        assert!(!waiter.queued, "job already waiting");
        waiter.queued = true;
        s.queue.push_back(self.key);
        if s.queue.len() == 1 {
            s.exec_job.set();
        }
    }

    /// Aborts the wait or releases the held lock. The job must be waiting
    /// or holding.
    pub fn release(&self) {
        let mut s = self.lock.borrow_mut();
        release_key(&mut s, self.key);
    }

    /// Whether the job is waiting for or holding the lock.
    pub fn is_waiting(&self) -> bool {
        self.lock
            .borrow()
            .waiters
            .get(self.key)
            .map(|w| w.queued)
            .unwrap_or(false)
    }
}

impl Drop for EventLockJob {
    fn drop(&mut self) {
        let mut s = self.lock.borrow_mut();
        if s.waiters.get(self.key).map(|w| w.queued).unwrap_or(false) {
            release_key(&mut s, self.key);
        }
        s.waiters.remove(self.key);
        s.jobs.decrement();
    }
}

impl fmt::Debug for EventLockJob {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("EventLockJob")
            .field("waiting", &self.is_waiting())
            .finish()
    }
}

fn release_key(s: &mut LockState, key: Key) {
    let waiter = s.waiters.get_mut(key).expect("job unregistered");
    assert!(waiter.queued, "job is idle");
    waiter.queued = false;
    let was_head = s.queue.front() == Some(&key);
    s.queue.retain(|queued| *queued != key);
    if was_head {
        if s.queue.is_empty() {
            s.exec_job.unset();
        } else {
            s.exec_job.set();
        }
    }
}

fn exec(weak: &Weak<RefCell<LockState>>) {
    let Some(state) = weak.upgrade() else { return };
    let handler = {
        let s = state.borrow();
        let key = *s.queue.front().expect("lock queue empty");
        s.waiters
            .get(key)
            .expect("waiter unregistered")
            .handler
            .clone()
    };
    // The head waiter now holds the lock; it stays queued until release.
    (handler.borrow_mut())();
}
