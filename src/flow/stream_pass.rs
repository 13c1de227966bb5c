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

/// Push-mode byte stream with short-write semantics.
///
/// Like [`PacketPassInterface`] but byte-oriented and without an MTU or
/// cancellation: a single [`send`] of N bytes may complete having consumed
/// any `1 ≤ len ≤ N` of them. The interface advances the buffer's read
/// cursor by the consumed length before handing it back; the user re-issues
/// the send while the buffer is non-empty. This mirrors OS stream sockets.
///
/// [`PacketPassInterface`]: crate::flow::PacketPassInterface
/// [`send`]: StreamPassInterface::send
pub struct StreamPassInterface {
    shared: Rc<RefCell<Shared>>,
}

struct Shared {
    state: State,
    buf: Option<Buffer>,
    base_len: usize,
    done_len: usize,
    handler_send: Option<Box<dyn FnMut(Buffer)>>,
    handler_done: Option<Box<dyn FnMut(Buffer, usize)>>,
    has_sender: bool,
    job_operation: Pending,
    job_done: Pending,
}

impl StreamPassInterface {
    /// Creates the provider side. `handler_send` receives the buffer; the
    /// provider consumes a non-empty prefix of its readable window and
    /// completes with [`done`].
    ///
    /// [`done`]: StreamPassInterface::done
    pub fn new<F>(handle: &Handle, handler_send: F) -> StreamPassInterface
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
                handler_send: Some(Box::new(handler_send)),
                handler_done: None,
                has_sender: false,
                job_operation: Pending::new(handle, move || job_operation(&w_op)),
                job_done: Pending::new(handle, move || job_done(&w_done)),
            })
        });
        StreamPassInterface { shared }
    }

    /// Provider side: completes the in-flight operation having consumed
    /// `len` bytes, `1 ≤ len ≤` the sent length. The provider must not move
    /// the buffer's cursors itself; the interface advances the read cursor.
    pub fn done(&self, mut buf: Buffer, len: usize) {
        let mut s = self.shared.borrow_mut();
        assert_eq!(s.state, State::Busy, "done without in-flight operation");
        assert!(len >= 1, "stream completion must make progress");
        assert!(len <= s.base_len, "completion exceeds sent length");
        debug_assert_eq!(buf.len(), s.base_len, "provider moved the buffer cursors");
        buf.advance(len);
        s.done_len = len;
        s.buf = Some(buf);
        s.state = State::DonePending;
        s.job_done.set();
    }

    /// User side: attaches the completion handler, which receives the
    /// buffer back along with the consumed length. Must be called exactly
    /// once, before the first [`send`].
    ///
    /// [`send`]: StreamPassInterface::send
    pub fn init_sender<F>(&self, handler_done: F)
    where
        F: FnMut(Buffer, usize) + 'static,
    {
        let mut s = self.shared.borrow_mut();
        assert!(!s.has_sender, "sender already initialised");
        s.has_sender = true;
        s.handler_done = Some(Box::new(handler_done));
    }

    /// User side: submits the buffer's readable window, which must be
    /// non-empty.
    pub fn send(&self, buf: Buffer) {
        let mut s = self.shared.borrow_mut();
        assert_eq!(s.state, State::Idle, "operation already in progress");
        assert!(!buf.is_empty(), "empty stream send");
        debug_assert!(s.has_sender, "sender not initialised");
        s.base_len = buf.len();
        s.buf = Some(buf);
        s.state = State::OperationPending;
        s.job_operation.set();
    }
}

impl Clone for StreamPassInterface {
    fn clone(&self) -> StreamPassInterface {
        StreamPassInterface {
            shared: self.shared.clone(),
        }
    }
}

impl fmt::Debug for StreamPassInterface {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.shared.borrow();
        fmt.debug_struct("StreamPassInterface")
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
        let handler = s.handler_send.take().expect("send handler missing");
        let buf = s.buf.take().expect("buffer missing");
        (handler, buf)
    };
    handler(buf);
    shared.borrow_mut().handler_send = Some(handler);
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
