//! Stream socket adapters.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::rc::{Rc, Weak};

use crate::debug::ErrorLatch;
use crate::flow::{StreamPassInterface, StreamRecvInterface};
use crate::net::{Direction, Socket};
use crate::sys;
use crate::{Buffer, Handle, Readiness};

/// Errors a [`StreamSocketSink`] reports.
#[derive(Debug)]
pub enum StreamSinkError {
    /// The write failed.
    Io(io::Error),
}

impl fmt::Display for StreamSinkError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSinkError::Io(err) => write!(fmt, "write failed: {}", err),
        }
    }
}

impl std::error::Error for StreamSinkError {}

/// Byte sink writing to the stream socket.
///
/// Provides a [`StreamPassInterface`] input with ordinary short-write
/// semantics: each completed operation consumes however many bytes the OS
/// accepted. A failed write is reported once through the error handler,
/// leaving the in-flight operation unfinished; the owner must drop the
/// adapter (and the pipeline above it).
pub struct StreamSocketSink {
    input: StreamPassInterface,
    state: Rc<RefCell<SinkState>>,
}

struct SinkState {
    socket: Socket,
    input: Option<StreamPassInterface>,
    buf: Option<Buffer>,
    on_error: Option<Box<dyn FnMut(StreamSinkError)>>,
    latch: ErrorLatch,
}

impl StreamSocketSink {
    /// Attaches to the write direction of `socket`.
    pub fn new<F>(handle: &Handle, socket: &Socket, on_error: F) -> StreamSocketSink
    where
        F: FnMut(StreamSinkError) + 'static,
    {
        let state = Rc::new(RefCell::new(SinkState {
            socket: socket.clone(),
            input: None,
            buf: None,
            on_error: Some(Box::new(on_error)),
            latch: ErrorLatch::new(),
        }));

        socket.add_handler(Direction::Write, {
            let weak = Rc::downgrade(&state);
            move |readiness| sink_writable(&weak, readiness)
        });

        let input = StreamPassInterface::new(handle, {
            let weak = Rc::downgrade(&state);
            move |buf| sink_send(&weak, buf)
        });
        state.borrow_mut().input = Some(input.clone());

        StreamSocketSink { input, state }
    }

    pub fn input(&self) -> &StreamPassInterface {
        &self.input
    }
}

impl Drop for StreamSocketSink {
    fn drop(&mut self) {
        let socket = self.state.borrow().socket.clone();
        socket.remove_handler(Direction::Write);
    }
}

fn sink_send(weak: &Weak<RefCell<SinkState>>, buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    s.latch.check();
    debug_assert!(s.buf.is_none());
    s.buf = Some(buf);
    sink_try_send(s);
}

fn sink_writable(weak: &Weak<RefCell<SinkState>>, _readiness: Readiness) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow_mut();
    debug_assert!(s.buf.is_some());
    s.socket.disable(Direction::Write);
    sink_try_send(s);
}

fn sink_try_send(mut s: std::cell::RefMut<'_, SinkState>) {
    let fd = s.socket.as_raw_fd();
    let buf = s.buf.as_ref().expect("no send in flight");
    match sys::net::send(fd, buf.bytes()) {
        Ok(n) => {
            debug_assert!(n > 0);
            let buf = s.buf.take().expect("no send in flight");
            let input = s.input.clone().expect("not wired");
            drop(s);
            input.done(buf, n);
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            s.socket.enable(Direction::Write);
        }
        Err(err) => {
            s.latch.set();
            let mut handler = s.on_error.take().expect("error handler missing");
            drop(s);
            handler(StreamSinkError::Io(err));
        }
    }
}

/// Errors a [`StreamSocketSource`] reports.
#[derive(Debug)]
pub enum StreamSourceError {
    /// The peer closed the stream in an orderly fashion.
    Closed,
    /// The read failed.
    Io(io::Error),
}

impl fmt::Display for StreamSourceError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSourceError::Closed => write!(fmt, "stream closed by peer"),
            StreamSourceError::Io(err) => write!(fmt, "read failed: {}", err),
        }
    }
}

impl std::error::Error for StreamSourceError {}

/// Byte source reading from the stream socket.
///
/// Provides a [`StreamRecvInterface`] output with short-read semantics:
/// each completed operation appends however many bytes the OS had. An
/// orderly close reports [`StreamSourceError::Closed`]; any failure leaves
/// the in-flight operation unfinished and the owner must drop the adapter.
pub struct StreamSocketSource {
    output: StreamRecvInterface,
    state: Rc<RefCell<SourceState>>,
}

struct SourceState {
    socket: Socket,
    output: Option<StreamRecvInterface>,
    buf: Option<Buffer>,
    on_error: Option<Box<dyn FnMut(StreamSourceError)>>,
    latch: ErrorLatch,
}

impl StreamSocketSource {
    /// Attaches to the read direction of `socket`.
    pub fn new<F>(handle: &Handle, socket: &Socket, on_error: F) -> StreamSocketSource
    where
        F: FnMut(StreamSourceError) + 'static,
    {
        let state = Rc::new(RefCell::new(SourceState {
            socket: socket.clone(),
            output: None,
            buf: None,
            on_error: Some(Box::new(on_error)),
            latch: ErrorLatch::new(),
        }));

        socket.add_handler(Direction::Read, {
            let weak = Rc::downgrade(&state);
            move |readiness| source_readable(&weak, readiness)
        });

        let output = StreamRecvInterface::new(handle, {
            let weak = Rc::downgrade(&state);
            move |buf| source_recv(&weak, buf)
        });
        state.borrow_mut().output = Some(output.clone());

        StreamSocketSource { output, state }
    }

    pub fn output(&self) -> &StreamRecvInterface {
        &self.output
    }
}

impl Drop for StreamSocketSource {
    fn drop(&mut self) {
        let socket = self.state.borrow().socket.clone();
        socket.remove_handler(Direction::Read);
    }
}

fn source_recv(weak: &Weak<RefCell<SourceState>>, buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    s.latch.check();
    debug_assert!(s.buf.is_none());
    s.buf = Some(buf);
    source_try_recv(s);
}

fn source_readable(weak: &Weak<RefCell<SourceState>>, _readiness: Readiness) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow_mut();
    debug_assert!(s.buf.is_some());
    s.socket.disable(Direction::Read);
    source_try_recv(s);
}

fn source_try_recv(mut s: std::cell::RefMut<'_, SourceState>) {
    let fd = s.socket.as_raw_fd();
    let buf = s.buf.as_mut().expect("no receive in flight");
    let res = sys::net::recv(fd, buf.spare_mut());
    match res {
        Ok(0) => {
            s.latch.set();
            let mut handler = s.on_error.take().expect("error handler missing");
            drop(s);
            handler(StreamSourceError::Closed);
        }
        Ok(n) => {
            let mut buf = s.buf.take().expect("no receive in flight");
            buf.add_len(n);
            let output = s.output.clone().expect("not wired");
            drop(s);
            output.done(buf, n);
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            s.socket.enable(Direction::Read);
        }
        Err(err) => {
            s.latch.set();
            let mut handler = s.on_error.take().expect("error handler missing");
            drop(s);
            handler(StreamSourceError::Io(err));
        }
    }
}
