//! Socket plumbing for the flow adapters.
//!
//! A [`Socket`] owns a non-blocking descriptor and one reactor watcher, and
//! splits readiness between the two half-duplex directions so that a sink
//! and a source can drive the same descriptor independently: each adapter
//! attaches to one direction and enables events only while it is parked on
//! would-block.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::{Rc, Weak};

use log::error;

use crate::{FdWatcher, Handle, Readiness};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// A non-blocking descriptor registered with the reactor.
///
/// Construct one from any owned socket (`UdpSocket`, `TcpStream`,
/// `UnixStream`, a seqpacket socket...) and hand it to the flow adapters in
/// [`crate::flow`]; at most one adapter may attach per direction. The
/// descriptor is switched to non-blocking mode and closed on drop.
pub struct Socket {
    inner: Rc<RefCell<Inner>>,
}

impl Clone for Socket {
    fn clone(&self) -> Socket {
        Socket {
            inner: self.inner.clone(),
        }
    }
}

struct Inner {
    fd: OwnedFd,
    watcher: Option<FdWatcher>,
    enabled: Readiness,
    read_handler: Option<Rc<RefCell<dyn FnMut(Readiness)>>>,
    write_handler: Option<Rc<RefCell<dyn FnMut(Readiness)>>>,
}

impl Socket {
    /// Registers `io` with the reactor. The descriptor is made
    /// non-blocking.
    pub fn new<T: Into<OwnedFd>>(handle: &Handle, io: T) -> io::Result<Socket> {
        let fd = io.into();
        crate::sys::set_nonblocking(fd.as_raw_fd())?;

        let inner = Rc::new(RefCell::new(Inner {
            fd,
            watcher: None,
            enabled: Readiness::EMPTY,
            read_handler: None,
            write_handler: None,
        }));

        let watcher = FdWatcher::new(handle, inner.borrow().fd.as_raw_fd(), {
            let weak = Rc::downgrade(&inner);
            move |readiness| dispatch(&weak, readiness)
        })?;
        inner.borrow_mut().watcher = Some(watcher);

        Ok(Socket { inner })
    }

    pub(crate) fn add_handler<F>(&self, dir: Direction, handler: F)
    where
        F: FnMut(Readiness) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let slot = match dir {
            Direction::Read => &mut inner.read_handler,
            Direction::Write => &mut inner.write_handler,
        };
        assert!(slot.is_none(), "direction already has an adapter");
        *slot = Some(Rc::new(RefCell::new(handler)));
    }

    pub(crate) fn remove_handler(&self, dir: Direction) {
        let mut inner = self.inner.borrow_mut();
        match dir {
            Direction::Read => inner.read_handler = None,
            Direction::Write => inner.write_handler = None,
        }
        update_events(&mut inner, dir, false);
    }

    /// Starts delivering the direction's readiness to its handler.
    pub(crate) fn enable(&self, dir: Direction) {
        let mut inner = self.inner.borrow_mut();
        update_events(&mut inner, dir, true);
    }

    pub(crate) fn disable(&self, dir: Direction) {
        let mut inner = self.inner.borrow_mut();
        update_events(&mut inner, dir, false);
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.inner.borrow().fd.as_raw_fd()
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Socket")
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}

fn update_events(inner: &mut Inner, dir: Direction, on: bool) {
    let bit = match dir {
        Direction::Read => Readiness::READABLE,
        Direction::Write => Readiness::WRITABLE,
    };
    let enabled = if on {
        inner.enabled | bit
    } else {
        inner.enabled.remove(bit)
    };
    if enabled == inner.enabled {
        return;
    }
    inner.enabled = enabled;
    if let Some(watcher) = &inner.watcher {
        if let Err(err) = watcher.set_events(enabled) {
            // Only plausible with a closed or invalid descriptor; the next
            // I/O attempt will surface the real error to the adapter.
            error!("updating socket events failed: {}", err);
        }
    }
}

fn dispatch(weak: &Weak<RefCell<Inner>>, readiness: Readiness) {
    let Some(inner) = weak.upgrade() else { return };

    let hard = readiness.is_error() || readiness.is_hup();

    let read_handler = {
        let inner = inner.borrow();
        if inner.enabled.is_readable() && (readiness.is_readable() || hard) {
            inner.read_handler.clone()
        } else {
            None
        }
    };
    if let Some(handler) = read_handler {
        (handler.borrow_mut())(readiness);
    }

    // Re-check: the read handler may have detached or disabled the writer.
    let write_handler = {
        let inner = inner.borrow();
        if inner.enabled.is_writable() && (readiness.is_writable() || hard) {
            inner.write_handler.clone()
        } else {
            None
        }
    };
    if let Some(handler) = write_handler {
        (handler.borrow_mut())(readiness);
    }
}
