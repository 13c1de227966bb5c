use std::cell::RefCell;
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

use crate::reactor::{Core, FdEntry};
use crate::slab::Key;
use crate::{Handle, Readiness};

/// A file-descriptor watcher.
///
/// Registers a descriptor with the reactor's selector at construction; the
/// handler is invoked with the ready kinds whenever the descriptor becomes
/// ready for one of the requested events. Registration starts with no
/// requested events; call [`set_events`] to ask for readiness.
///
/// Error and hang-up readiness are always delivered, whether requested or
/// not, as long as at least one event kind is requested or the condition
/// coincides with a requested kind; the watcher stays registered and policy
/// is the handler's.
///
/// The watcher does not own the descriptor; the descriptor must stay open
/// for as long as the watcher is registered. Dropping the watcher
/// deregisters it synchronously and guarantees the handler will not be
/// invoked afterwards.
///
/// [`set_events`]: FdWatcher::set_events
pub struct FdWatcher {
    core: Rc<RefCell<Core>>,
    key: Key,
}

impl FdWatcher {
    /// Registers `fd` with the reactor. Fails on selector resource
    /// exhaustion or if `fd` is not pollable.
    pub fn new<F>(handle: &Handle, fd: RawFd, handler: F) -> io::Result<FdWatcher>
    where
        F: FnMut(Readiness) + 'static,
    {
        let key = handle.core().borrow_mut().register_fd(FdEntry {
            fd,
            handler: Rc::new(RefCell::new(handler)),
            wanted: Readiness::EMPTY,
        })?;
        Ok(FdWatcher {
            core: handle.core().clone(),
            key,
        })
    }

    /// Sets the requested events, replacing the previous set. Only
    /// [`Readiness::READABLE`] and [`Readiness::WRITABLE`] may be requested.
    pub fn set_events(&self, events: Readiness) -> io::Result<()> {
        debug_assert!(
            events
                .remove(Readiness::READABLE | Readiness::WRITABLE)
                .is_empty(),
            "only READABLE and WRITABLE may be requested",
        );
        self.core.borrow_mut().reregister_fd(self.key, events)
    }

    /// The currently requested events.
    pub fn events(&self) -> Readiness {
        self.core
            .borrow()
            .fds
            .get(self.key)
            .map(|entry| entry.wanted)
            .unwrap_or(Readiness::EMPTY)
    }

    /// The watched descriptor.
    pub fn fd(&self) -> RawFd {
        self.core
            .borrow()
            .fds
            .get(self.key)
            .map(|entry| entry.fd)
            .unwrap_or(-1)
    }
}

impl Drop for FdWatcher {
    fn drop(&mut self) {
        self.core.borrow_mut().deregister_fd(self.key);
    }
}

impl fmt::Debug for FdWatcher {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("FdWatcher")
            .field("fd", &self.fd())
            .field("events", &self.events())
            .finish()
    }
}
