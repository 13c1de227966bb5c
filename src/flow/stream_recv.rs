use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::{Buffer, Handle, Pending};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Idle,
    OperationPending,
    Busy,
    DonePending,
}

/// Pull-mode byte stream with short-read semantics.
///
/// Like [`PacketRecvInterface`] but byte-oriented and without an MTU: a
/// single [`recv`] into a buffer with N bytes of spare capacity may complete
/// having appended any `1 ≤ len ≤ N` bytes. The buffer may already contain
/// data; the provider only ever appends.
///
/// [`PacketRecvInterface`]: crate::flow::PacketRecvInterface
/// [`recv`]: StreamRecvInterface::recv
pub struct StreamRecvInterface {
    shared: Rc<RefCell<Shared>>,
}

struct Shared {
    state: State,
    buf: Option<Buffer>,
    base_len: usize,
    done_len: usize,
    handler_recv: Option<Box<dyn FnMut(Buffer)>>,
    handler_done: Option<Box<dyn FnMut(Buffer, usize)>>,
    has_receiver: bool,
    job_operation: Pending,
    job_done: Pending,
}

impl StreamRecvInterface {
    /// Creates the provider side. `handler_recv` receives the buffer; the
    /// provider appends at least one byte into the spare capacity and
    /// completes with [`done`].
    ///
    /// [`done`]: StreamRecvInterface::done
    pub fn new<F>(handle: &Handle, handler_recv: F) -> StreamRecvInterface
    where
        F: FnMut(Buffer) + 'static,
    {
        let shared = Rc::new_cyclic(|weak: &Weak<RefCell<Shared>>| {
            let w_op = weak.clone();
            let w_done = weak.clone();
            RefCell::new(Shared {
                state: State::Idle,
                buf: None,
                base_len: 0,
                done_len: 0,
                handler_recv: Some(Box::new(handler_recv)),
                handler_done: None,
                has_receiver: false,
                job_operation: Pending::new(handle, move || job_operation(&w_op)),
                job_done: Pending::new(handle, move || job_done(&w_done)),
            })
        });
        StreamRecvInterface { shared }
    }

    /// Provider side: completes the in-flight operation having appended
    /// `len ≥ 1` bytes.
    pub fn done(&self, buf: Buffer, len: usize) {
        let mut s = self.shared.borrow_mut();
        assert_eq!(s.state, State::Busy, "done without in-flight operation");
        assert!(len >= 1, "stream completion must make progress");
        debug_assert_eq!(
            buf.len(),
            s.base_len + len,
            "provider appended a different length than reported",
        );
        s.done_len = len;
        s.buf = Some(buf);
        s.state = State::DonePending;
        s.job_done.set();
    }

    /// User side: attaches the completion handler, which receives the
    /// buffer back along with the appended length. Must be called exactly
    /// once, before the first [`recv`].
    ///
    /// [`recv`]: StreamRecvInterface::recv
    pub fn init_receiver<F>(&self, handler_done: F)
    where
        F: FnMut(Buffer, usize) + 'static,
    {
        let mut s = self.shared.borrow_mut();
        assert!(!s.has_receiver, "receiver already initialised");
        s.has_receiver = true;
        s.handler_done = Some(Box::new(handler_done));
    }

    /// User side: requests bytes into `buf`'s spare capacity, which must be
    /// non-empty.
    pub fn recv(&self, buf: Buffer) {
        let mut s = self.shared.borrow_mut();
        assert_eq!(s.state, State::Idle, "operation already in progress");
        assert!(buf.spare_len() >= 1, "no spare capacity to receive into");
        debug_assert!(s.has_receiver, "receiver not initialised");
        s.base_len = buf.len();
        s.buf = Some(buf);
        s.state = State::OperationPending;
        s.job_operation.set();
    }
}

impl Clone for StreamRecvInterface {
    fn clone(&self) -> StreamRecvInterface {
        StreamRecvInterface {
            shared: self.shared.clone(),
        }
    }
}

impl fmt::Debug for StreamRecvInterface {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.shared.borrow();
        fmt.debug_struct("StreamRecvInterface")
            .field("state", &s.state)
            .finish()
    }
}

fn job_operation(weak: &Weak<RefCell<Shared>>) {
    let Some(shared) = weak.upgrade() else { return };
    let (mut handler, buf) = {
        let mut s = shared.borrow_mut();
        debug_assert_eq!(s.state, State::OperationPending);
        s.state = State::Busy;
        let handler = s.handler_recv.take().expect("recv handler missing");
        let buf = s.buf.take().expect("buffer missing");
        (handler, buf)
    };
    handler(buf);
    shared.borrow_mut().handler_recv = Some(handler);
}

fn job_done(weak: &Weak<RefCell<Shared>>) {
    let Some(shared) = weak.upgrade() else { return };
    let (mut handler, buf, len) = {
        let mut s = shared.borrow_mut();
        debug_assert_eq!(s.state, State::DonePending);
        s.state = State::Idle;
        let handler = s.handler_done.take().expect("done handler missing");
        let buf = s.buf.take().expect("buffer missing");
        (handler, buf, s.done_len)
    };
    handler(buf, len);
    shared.borrow_mut().handler_done = Some(handler);
}
