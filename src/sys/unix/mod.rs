/// Helper macro to execute a system call that returns an `io::Result`.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

mod selector;
pub(crate) use self::selector::{Selector, SysEvents};

pub(crate) mod net;

use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = syscall!(fcntl(fd, libc::F_GETFL))?;
    if flags & libc::O_NONBLOCK == 0 {
        syscall!(fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
    }
    Ok(())
}

/// Creates a non-blocking close-on-exec pipe; returns `(read, write)`.
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1, -1];
    syscall!(pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC))?;
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

pub(crate) fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    syscall!(read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())).map(|n| n as usize)
}

pub(crate) fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    syscall!(write(fd, buf.as_ptr() as *const libc::c_void, buf.len())).map(|n| n as usize)
}

/// Builds a signal set from signal numbers.
pub(crate) fn sigset(signals: &[libc::c_int]) -> io::Result<libc::sigset_t> {
    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut set);
        for signal in signals {
            if libc::sigaddset(&mut set, *signal) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(set)
}

/// Creates a non-blocking close-on-exec signalfd for the set.
pub(crate) fn signalfd(set: &libc::sigset_t) -> io::Result<OwnedFd> {
    let fd = syscall!(signalfd(-1, set, libc::SFD_NONBLOCK | libc::SFD_CLOEXEC))?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub(crate) fn sigprocmask(how: libc::c_int, set: &libc::sigset_t) -> io::Result<()> {
    syscall!(sigprocmask(how, set, std::ptr::null_mut())).map(|_| ())
}

/// Reads one pending siginfo from a signalfd, if any.
pub(crate) fn read_siginfo(fd: RawFd) -> io::Result<libc::signalfd_siginfo> {
    let mut info: libc::signalfd_siginfo = unsafe { std::mem::zeroed() };
    let n = syscall!(read(
        fd,
        &mut info as *mut libc::signalfd_siginfo as *mut libc::c_void,
        std::mem::size_of::<libc::signalfd_siginfo>(),
    ))?;
    if n as usize != std::mem::size_of::<libc::signalfd_siginfo>() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "short signalfd read",
        ));
    }
    Ok(info)
}
