use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::fmt;
use std::time::{Duration, Instant};

use log::trace;

use crate::slab::{Key, Slab};
use crate::sys;
use crate::Readiness;

/// The single-threaded event reactor.
///
/// A `Reactor` owns a monotone clock origin, a set of [`Timer`]s ordered by
/// deadline, a set of [`FdWatcher`]s with a requested-events mask each, and
/// a FIFO queue of [`Pending`] jobs. Everything registered with one reactor
/// runs on the thread that calls [`run`]; there is no locking and no
/// concurrent access.
///
/// [`run`] drives the loop: pending jobs drain fully before any timer or
/// I/O is considered, due timers fire in deadline order (ties in arming
/// order), and only then does the reactor block on the OS selector. Buffered
/// readiness is dispatched one watcher at a time, draining pending jobs in
/// between, so a handler that schedules follow-up work always sees it run
/// before the next handler.
///
/// Handlers are plain closures. A handler runs to completion and must leave
/// any remaining work attached to a job, a timer or a watcher; there is no
/// implicit suspension. A handler must not drop the object it is running
/// inside of; tear down from a scheduled job instead.
///
/// # Examples
///
/// ```
/// use flowio::{Pending, Reactor};
///
/// let mut reactor = Reactor::new().unwrap();
/// let handle = reactor.handle();
///
/// let quit = handle.clone();
/// let job = Pending::new(&handle, move || quit.quit(7));
/// job.set();
///
/// assert_eq!(reactor.run().unwrap(), 7);
/// ```
///
/// [`Timer`]: crate::Timer
/// [`FdWatcher`]: crate::FdWatcher
/// [`Pending`]: crate::Pending
/// [`run`]: Reactor::run
pub struct Reactor {
    core: Rc<RefCell<Core>>,
}

/// Cloneable accessor to a [`Reactor`].
///
/// Components keep a `Handle` to register jobs, timers and watchers, and to
/// request the loop to quit. Handles are cheap reference-counted clones; the
/// reactor state lives until the `Reactor` and every `Handle` (and every
/// object created from one) is gone.
#[derive(Clone)]
pub struct Handle {
    core: Rc<RefCell<Core>>,
}

pub(crate) struct Core {
    selector: sys::Selector,
    events: sys::SysEvents,

    pub(crate) jobs: Slab<JobEntry>,
    pub(crate) job_queue: VecDeque<(Key, u64)>,

    pub(crate) timers: Slab<TimerEntry>,
    pub(crate) timer_queue: BTreeMap<(Instant, u64), Key>,
    pub(crate) timer_seq: u64,

    pub(crate) fds: Slab<FdEntry>,
    ready: VecDeque<(Key, Readiness)>,

    quit: Option<i32>,
}

pub(crate) struct JobEntry {
    pub(crate) handler: Rc<RefCell<dyn FnMut()>>,
    pub(crate) queued: bool,
    pub(crate) epoch: u64,
}

pub(crate) struct TimerEntry {
    pub(crate) handler: Rc<RefCell<dyn FnMut()>>,
    pub(crate) interval: Duration,
    pub(crate) deadline: Option<(Instant, u64)>,
}

pub(crate) struct FdEntry {
    pub(crate) fd: std::os::fd::RawFd,
    pub(crate) handler: Rc<RefCell<dyn FnMut(Readiness)>>,
    pub(crate) wanted: Readiness,
}

enum Step {
    Quit(i32),
    Job(Rc<RefCell<dyn FnMut()>>),
    Timer(Rc<RefCell<dyn FnMut()>>),
    Fd(Rc<RefCell<dyn FnMut(Readiness)>>, Readiness),
    Select,
}

impl Reactor {
    /// Creates a reactor, making a syscall to create the OS selector.
    pub fn new() -> io::Result<Reactor> {
        let selector = sys::Selector::new()?;
        Ok(Reactor {
            core: Rc::new(RefCell::new(Core {
                selector,
                events: sys::SysEvents::with_capacity(64),
                jobs: Slab::new(),
                job_queue: VecDeque::new(),
                timers: Slab::new(),
                timer_queue: BTreeMap::new(),
                timer_seq: 0,
                fds: Slab::new(),
                ready: VecDeque::new(),
                quit: None,
            })),
        })
    }

    /// Returns a handle for registering work with this reactor.
    pub fn handle(&self) -> Handle {
        Handle {
            core: self.core.clone(),
        }
    }

    /// Runs the loop until [`Handle::quit`] is called, returning the quit
    /// code.
    ///
    /// Errors from the OS selector are returned; `EINTR` is handled
    /// internally by recomputing the timeout and retrying.
    pub fn run(&mut self) -> io::Result<i32> {
        loop {
            let step = self.next_step();
            match step {
                Step::Quit(code) => {
                    trace!("reactor quitting with code {}", code);
                    return Ok(code);
                }
                Step::Job(handler) => (handler.borrow_mut())(),
                Step::Timer(handler) => (handler.borrow_mut())(),
                Step::Fd(handler, readiness) => (handler.borrow_mut())(readiness),
                Step::Select => self.select()?,
            }
        }
    }

    /// Picks the next dispatch without holding the core borrow across the
    /// handler call.
    fn next_step(&self) -> Step {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;

        if let Some(code) = core.quit {
            return Step::Quit(code);
        }

        // Pending jobs drain before anything else.
        while let Some((key, epoch)) = core.job_queue.pop_front() {
            if let Some(entry) = core.jobs.get_mut(key) {
                if entry.queued && entry.epoch == epoch {
                    entry.queued = false;
                    entry.epoch = entry.epoch.wrapping_add(1);
                    return Step::Job(entry.handler.clone());
                }
            }
        }

        // Expire the earliest due timer.
        if let Some((&(deadline, seq), &key)) = core.timer_queue.iter().next() {
            if deadline <= Instant::now() {
                core.timer_queue.remove(&(deadline, seq));
                let entry = core.timers.get_mut(key).expect("timer queue out of sync");
                entry.deadline = None;
                return Step::Timer(entry.handler.clone());
            }
        }

        // Dispatch one buffered readiness event. Watchers unregistered (or
        // re-registered) since the select are skipped via the stale key, and
        // events are masked with the currently wanted set.
        while let Some((key, readiness)) = core.ready.pop_front() {
            if let Some(entry) = core.fds.get(key) {
                let deliver = readiness
                    .intersection(entry.wanted | Readiness::ERROR | Readiness::HUP);
                if !deliver.is_empty() {
                    return Step::Fd(entry.handler.clone(), deliver);
                }
            }
        }

        Step::Select
    }

    fn select(&self) -> io::Result<()> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;

        let timeout = core
            .timer_queue
            .keys()
            .next()
            .map(|&(deadline, _)| deadline.saturating_duration_since(Instant::now()));

        match core.selector.select(&mut core.events, timeout) {
            Ok(()) => {}
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err),
        }

        for (raw, readiness) in core.events.iter() {
            core.ready.push_back((Key::from_raw(raw), readiness));
        }
        Ok(())
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Reactor").finish()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Handle").finish()
    }
}

impl Handle {
    /// Requests the loop to return `code`. The first call wins; the request
    /// takes effect before any further handler dispatch.
    pub fn quit(&self, code: i32) {
        let mut core = self.core.borrow_mut();
        if core.quit.is_none() {
            core.quit = Some(code);
        }
    }

    /// The current monotone time, as used for timer deadlines.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    pub(crate) fn core(&self) -> &Rc<RefCell<Core>> {
        &self.core
    }
}

impl Core {
    /// Registers a watcher with the selector. Rolls the arena entry back on
    /// selector failure.
    pub(crate) fn register_fd(&mut self, entry: FdEntry) -> io::Result<Key> {
        let fd = entry.fd;
        let key = self.fds.insert(entry);
        if let Err(err) = self.selector.register(fd, key.into_raw(), Readiness::EMPTY) {
            self.fds.remove(key);
            return Err(err);
        }
        Ok(key)
    }

    pub(crate) fn reregister_fd(&mut self, key: Key, wanted: Readiness) -> io::Result<()> {
        let raw = key.into_raw();
        let entry = self.fds.get_mut(key).expect("watcher not registered");
        entry.wanted = wanted;
        self.selector.reregister(entry.fd, raw, wanted)
    }

    pub(crate) fn deregister_fd(&mut self, key: Key) {
        if let Some(entry) = self.fds.remove(key) {
            // Failure here means the descriptor was already closed; either
            // way it no longer delivers events.
            let _ = self.selector.deregister(entry.fd);
        }
    }
}
