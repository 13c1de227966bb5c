//! Hand CPU-bound work to worker threads; completions come back through the
//! reactor.
//!
//! This is the only place the framework tolerates preemption. A work
//! function runs on a worker thread, concurrently with the reactor thread;
//! its completion handler is always delivered from the reactor thread, at
//! most once, and never after the [`Work`] has been dropped. With zero
//! workers the dispatcher degrades to running work functions synchronously
//! inside a reactor job, which keeps callers oblivious to the difference.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::rc::{Rc, Weak};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use log::trace;

use crate::{FdWatcher, Handle, Pending, Readiness};

type WorkId = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WorkState {
    Queued,
    Running,
    Finished,
}

/// Cross-thread queue state guarded by one mutex.
struct Queues {
    pending: VecDeque<WorkId>,
    funcs: HashMap<WorkId, Box<dyn FnOnce() + Send>>,
    states: HashMap<WorkId, WorkState>,
    finished: Vec<WorkId>,
    quit: bool,
}

struct Shared {
    queues: Mutex<Queues>,
    cond: Condvar,
    // Written by workers to wake the reactor; short write, never blocks.
    wake_tx: OwnedFd,
}

/// Reactor-side per-work record.
struct ReactorWork {
    handler_done: Box<dyn FnOnce()>,
}

struct DispatcherState {
    works: HashMap<WorkId, ReactorWork>,
    next_id: WorkId,
}

/// Dispatches work functions to worker threads.
///
/// See the [module docs][self] for the delivery contract.
pub struct WorkDispatcher {
    state: Rc<RefCell<DispatcherState>>,
    shared: Option<Arc<Shared>>,
    threads: Vec<thread::JoinHandle<()>>,
    // Kept registered for the dispatcher's lifetime (threaded mode).
    _watcher: Option<FdWatcher>,
    _wake_rx: Option<OwnedFd>,
    handle: Handle,
}

impl WorkDispatcher {
    /// Creates a dispatcher with `num_threads` workers; zero means work
    /// functions run synchronously in reactor jobs.
    pub fn new(handle: &Handle, num_threads: usize) -> io::Result<WorkDispatcher> {
        let state = Rc::new(RefCell::new(DispatcherState {
            works: HashMap::new(),
            next_id: 0,
        }));

        if num_threads == 0 {
            return Ok(WorkDispatcher {
                state,
                shared: None,
                threads: Vec::new(),
                _watcher: None,
                _wake_rx: None,
                handle: handle.clone(),
            });
        }

        let (wake_rx, wake_tx) = crate::sys::pipe()?;
        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues {
                pending: VecDeque::new(),
                funcs: HashMap::new(),
                states: HashMap::new(),
                finished: Vec::new(),
                quit: false,
            }),
            cond: Condvar::new(),
            wake_tx,
        });

        let watcher = FdWatcher::new(handle, wake_rx.as_raw_fd(), {
            let weak = Rc::downgrade(&state);
            let shared = shared.clone();
            let fd = wake_rx.as_raw_fd();
            move |_readiness: Readiness| drain_finished(&weak, &shared, fd)
        })?;
        watcher.set_events(Readiness::READABLE)?;

        let mut threads = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            let shared = shared.clone();
            threads.push(thread::spawn(move || worker_loop(&shared)));
        }

        Ok(WorkDispatcher {
            state,
            shared: Some(shared),
            threads,
            _watcher: Some(watcher),
            _wake_rx: Some(wake_rx),
            handle: handle.clone(),
        })
    }

    /// Whether worker threads are in use.
    pub fn using_threads(&self) -> bool {
        self.shared.is_some()
    }
}

impl Drop for WorkDispatcher {
    fn drop(&mut self) {
        debug_assert!(
            self.state.borrow().works.is_empty(),
            "dispatcher dropped with live works",
        );
        if let Some(shared) = &self.shared {
            shared.queues.lock().unwrap().quit = true;
            shared.cond.notify_all();
        }
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl fmt::Debug for WorkDispatcher {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("WorkDispatcher")
            .field("threads", &self.threads.len())
            .finish()
    }
}

/// A unit of work submitted to a [`WorkDispatcher`].
///
/// The work function starts as soon as a worker is free. Dropping the work
/// guarantees the function has either fully executed or will never run,
/// blocking briefly if a worker is executing it right now, and that the
/// completion handler will not be called afterwards.
pub struct Work {
    dispatcher: Rc<RefCell<DispatcherState>>,
    shared: Option<Arc<Shared>>,
    id: WorkId,
    // Synchronous mode runs the work inside this job.
    _job: Option<Pending>,
}

impl Work {
    pub fn new<W, D>(dispatcher: &WorkDispatcher, work_func: W, handler_done: D) -> Work
    where
        W: FnOnce() + Send + 'static,
        D: FnOnce() + 'static,
    {
        let id = {
            let mut state = dispatcher.state.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            state.works.insert(
                id,
                ReactorWork {
                    handler_done: Box::new(handler_done),
                },
            );
            id
        };

        match &dispatcher.shared {
            Some(shared) => {
                {
                    let mut queues = shared.queues.lock().unwrap();
                    queues.funcs.insert(id, Box::new(work_func));
                    queues.states.insert(id, WorkState::Queued);
                    queues.pending.push_back(id);
                }
                shared.cond.notify_one();
                Work {
                    dispatcher: dispatcher.state.clone(),
                    shared: Some(shared.clone()),
                    id,
                    _job: None,
                }
            }
            None => {
                // Synchronous mode: run the work from a reactor job, then
                // complete like a worker would.
                let job = Pending::new(&dispatcher.handle, {
                    let weak = Rc::downgrade(&dispatcher.state);
                    let mut work_func = Some(work_func);
                    move || {
                        if let Some(func) = work_func.take() {
                            func();
                        }
                        complete(&weak, id);
                    }
                });
                job.set();
                Work {
                    dispatcher: dispatcher.state.clone(),
                    shared: None,
                    id,
                    _job: Some(job),
                }
            }
        }
    }
}

impl Drop for Work {
    fn drop(&mut self) {
        // Forget the completion first; nothing can call it past this point.
        self.dispatcher.borrow_mut().works.remove(&self.id);

        let Some(shared) = &self.shared else { return };
        let mut queues = shared.queues.lock().unwrap();
        match queues.states.get(&self.id).copied() {
            Some(WorkState::Queued) => {
                queues.pending.retain(|id| *id != self.id);
                queues.funcs.remove(&self.id);
                queues.states.remove(&self.id);
            }
            Some(WorkState::Running) => {
                // Block until the worker is done with the function.
                while queues.states.get(&self.id) == Some(&WorkState::Running) {
                    queues = shared.cond.wait(queues).unwrap();
                }
                queues.states.remove(&self.id);
                queues.finished.retain(|id| *id != self.id);
            }
            Some(WorkState::Finished) => {
                queues.states.remove(&self.id);
                queues.finished.retain(|id| *id != self.id);
            }
            None => {}
        }
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Work").field("id", &self.id).finish()
    }
}

fn worker_loop(shared: &Shared) {
    let mut queues = shared.queues.lock().unwrap();
    loop {
        if queues.quit {
            return;
        }
        let Some(id) = queues.pending.pop_front() else {
            queues = shared.cond.wait(queues).unwrap();
            continue;
        };
        let func = queues.funcs.remove(&id).expect("queued work without func");
        queues.states.insert(id, WorkState::Running);
        drop(queues);

        func();

        queues = shared.queues.lock().unwrap();
        queues.states.insert(id, WorkState::Finished);
        queues.finished.push(id);
        // Wake droppers waiting on the state change and the reactor.
        shared.cond.notify_all();
        let _ = crate::sys::write(shared.wake_tx.as_raw_fd(), &[1]);
    }
}

fn drain_finished(weak: &Weak<RefCell<DispatcherState>>, shared: &Arc<Shared>, fd: i32) {
    let mut scratch = [0u8; 64];
    while let Ok(n) = crate::sys::read(fd, &mut scratch) {
        if n < scratch.len() {
            break;
        }
    }

    let finished = {
        let mut queues = shared.queues.lock().unwrap();
        let finished = std::mem::take(&mut queues.finished);
        for id in &finished {
            queues.states.remove(id);
        }
        finished
    };

    for id in finished {
        complete(weak, id);
    }
}

fn complete(weak: &Weak<RefCell<DispatcherState>>, id: WorkId) {
    let Some(state) = weak.upgrade() else { return };
    // The work may have been dropped between finishing and delivery.
    let Some(work) = state.borrow_mut().works.remove(&id) else {
        trace!("work {} completed after being dropped", id);
        return;
    };
    (work.handler_done)();
}
