use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use crate::Readiness;

/// epoll-backed readiness selector.
#[derive(Debug)]
pub(crate) struct Selector {
    epfd: OwnedFd,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        Ok(Selector {
            epfd: unsafe { OwnedFd::from_raw_fd(epfd) },
        })
    }

    /// Waits for events for at most `timeout` (forever if `None`).
    ///
    /// `EINTR` is returned to the caller; the reactor recomputes its timeout
    /// and retries.
    pub(crate) fn select(&self, events: &mut SysEvents, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|to| i32::try_from(millis(to)).unwrap_or(i32::MAX))
            .unwrap_or(-1);

        events.events.clear();
        let cnt = syscall!(epoll_wait(
            self.epfd.as_raw_fd(),
            events.events.as_mut_ptr(),
            events.events.capacity() as i32,
            timeout_ms,
        ))?;
        unsafe { events.events.set_len(cnt as usize) };
        Ok(())
    }

    pub(crate) fn register(&self, fd: RawFd, key: u64, interests: Readiness) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interests_to_epoll(interests),
            u64: key,
        };
        syscall!(epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)).map(|_| ())
    }

    pub(crate) fn reregister(&self, fd: RawFd, key: u64, interests: Readiness) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interests_to_epoll(interests),
            u64: key,
        };
        syscall!(epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_MOD, fd, &mut event)).map(|_| ())
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        // The event argument is ignored for EPOLL_CTL_DEL but must be
        // non-null on old kernels.
        let mut event = libc::epoll_event { events: 0, u64: 0 };
        syscall!(epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, &mut event)).map(|_| ())
    }
}

fn interests_to_epoll(interests: Readiness) -> u32 {
    let mut kind = 0;
    if interests.is_readable() {
        kind |= libc::EPOLLIN;
    }
    if interests.is_writable() {
        kind |= libc::EPOLLOUT;
    }
    kind as u32
}

pub(crate) struct SysEvents {
    events: Vec<libc::epoll_event>,
}

impl SysEvents {
    pub(crate) fn with_capacity(capacity: usize) -> SysEvents {
        SysEvents {
            events: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, Readiness)> + '_ {
        self.events.iter().map(|event| {
            let epoll = event.events as libc::c_int;
            let mut kind = Readiness::EMPTY;
            if epoll & libc::EPOLLIN != 0 {
                kind |= Readiness::READABLE;
            }
            if epoll & libc::EPOLLOUT != 0 {
                kind |= Readiness::WRITABLE;
            }
            if epoll & libc::EPOLLERR != 0 {
                kind |= Readiness::ERROR;
            }
            if epoll & (libc::EPOLLHUP | libc::EPOLLRDHUP) != 0 {
                kind |= Readiness::HUP;
            }
            (event.u64, kind)
        })
    }
}

const NANOS_PER_MILLI: u32 = 1_000_000;
const MILLIS_PER_SEC: u64 = 1_000;

/// Converts a `Duration` to milliseconds, rounding up and saturating at
/// `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    let millis = (duration.subsec_nanos() + NANOS_PER_MILLI - 1) / NANOS_PER_MILLI;
    duration
        .as_secs()
        .saturating_mul(MILLIS_PER_SEC)
        .saturating_add(u64::from(millis))
}
