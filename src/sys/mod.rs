//! OS-specific bits: the readiness selector and thin syscall wrappers.

#[cfg(unix)]
pub(crate) mod unix;
#[cfg(unix)]
pub(crate) use self::unix::*;

#[cfg(not(unix))]
compile_error!("flowio only supports Unix platforms with epoll (Linux, Android)");
