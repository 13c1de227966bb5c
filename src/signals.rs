//! OS signals as reactor events.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use log::{debug, error};

use crate::{sys, FdWatcher, Handle, Readiness};

/// Delivers Unix signals as reactor-thread callbacks.
///
/// The given signals are blocked for the process and routed through a
/// `signalfd` descriptor watched by the reactor. Signals arrive in order;
/// each readiness event reads exactly one pending signal, so a burst is
/// spread across loop iterations like any other event source. The handler
/// runs on the reactor thread with ordinary cooperative semantics.
///
/// In a multi-threaded process create this before spawning threads, so
/// every thread inherits the blocked mask and delivery cannot race into a
/// thread that would take the signal asynchronously.
///
/// Dropping unblocks the signals again.
pub struct UnixSignals {
    // Field order: deregister the watcher before closing the descriptor.
    _watcher: FdWatcher,
    _fd: OwnedFd,
    sigset: libc::sigset_t,
}

impl UnixSignals {
    /// Blocks `signals` and arranges for `handler` to be called with each
    /// delivered signal number.
    pub fn new<F>(handle: &Handle, signals: &[libc::c_int], handler: F) -> io::Result<UnixSignals>
    where
        F: FnMut(libc::c_int) + 'static,
    {
        let sigset = sys::sigset(signals)?;
        let fd = sys::signalfd(&sigset)?;

        let watcher = FdWatcher::new(handle, fd.as_raw_fd(), {
            let raw = fd.as_raw_fd();
            let mut handler = handler;
            move |_readiness: Readiness| read_one(raw, &mut handler)
        })?;
        watcher.set_events(Readiness::READABLE)?;

        sys::sigprocmask(libc::SIG_BLOCK, &sigset)?;

        Ok(UnixSignals {
            _watcher: watcher,
            _fd: fd,
            sigset,
        })
    }
}

impl Drop for UnixSignals {
    fn drop(&mut self) {
        if let Err(err) = sys::sigprocmask(libc::SIG_UNBLOCK, &self.sigset) {
            error!("unblocking signals failed: {}", err);
        }
    }
}

impl std::fmt::Debug for UnixSignals {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("UnixSignals").finish()
    }
}

/// Reads one pending signal, if any, and dispatches it.
fn read_one(fd: RawFd, handler: &mut dyn FnMut(libc::c_int)) {
    match sys::read_siginfo(fd) {
        Ok(info) => {
            let signal = info.ssi_signo as libc::c_int;
            debug!("dispatching signal {}", signal);
            handler(signal);
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
        Err(err) => error!("signalfd read failed: {}", err),
    }
}
