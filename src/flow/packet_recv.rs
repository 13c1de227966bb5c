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

/// Pull-mode packet transport between two nodes.
///
/// The *provider* constructs the interface with the receive handler; the
/// *user* attaches a completion handler with [`init_receiver`] and then
/// requests packets with [`recv`], supplying a [`Buffer`] with at least MTU
/// bytes of spare capacity. The provider appends the packet to the buffer
/// and completes with [`done`], reporting the appended length.
///
/// At most one operation is outstanding at a time; both the operation and
/// the completion are dispatched through reactor jobs.
///
/// [`init_receiver`]: PacketRecvInterface::init_receiver
/// [`recv`]: PacketRecvInterface::recv
/// [`done`]: PacketRecvInterface::done
pub struct PacketRecvInterface {
    shared: Rc<RefCell<Shared>>,
}

struct Shared {
    mtu: usize,
    state: State,
    packet: Option<Buffer>,
    base_len: usize,
    done_len: usize,
    handler_recv: Option<Box<dyn FnMut(Buffer)>>,
    handler_done: Option<Box<dyn FnMut(Buffer, usize)>>,
    has_receiver: bool,
    job_operation: Pending,
    job_done: Pending,
}

impl PacketRecvInterface {
    /// Creates the provider side. `handler_recv` receives the destination
    /// buffer for each request; the provider appends at most MTU bytes and
    /// completes with [`done`].
    ///
    /// [`done`]: PacketRecvInterface::done
    pub fn new<F>(handle: &Handle, mtu: usize, handler_recv: F) -> PacketRecvInterface
    where
        F: FnMut(Buffer) + 'static,
    {
        let shared = Rc::new_cyclic(|weak: &Weak<RefCell<Shared>>| {
            let w_op = weak.clone();
            let w_done = weak.clone();
            RefCell::new(Shared {
                mtu,
                state: State::Idle,
                packet: None,
                base_len: 0,
                done_len: 0,
                handler_recv: Some(Box::new(handler_recv)),
                handler_done: None,
                has_receiver: false,
                job_operation: Pending::new(handle, move || job_operation(&w_op)),
                job_done: Pending::new(handle, move || job_done(&w_done)),
            })
        });
        PacketRecvInterface { shared }
    }

    /// The maximum packet length.
    pub fn mtu(&self) -> usize {
        self.shared.borrow().mtu
    }

    /// Provider side: completes the in-flight operation. The provider must
    /// have appended exactly `len` bytes (`len ≤ MTU`) to the buffer.
    pub fn done(&self, packet: Buffer, len: usize) {
        let mut s = self.shared.borrow_mut();
        assert_eq!(s.state, State::Busy, "done without in-flight operation");
        assert!(len <= s.mtu, "completion exceeds MTU");
        debug_assert_eq!(
            packet.len(),
            s.base_len + len,
            "provider appended a different length than reported",
        );
        s.done_len = len;
        s.packet = Some(packet);
        s.state = State::DonePending;
        s.job_done.set();
    }

    /// User side: attaches the completion handler, which receives the
    /// buffer back along with the received length. Must be called exactly
    /// once, before the first [`recv`].
    ///
    /// [`recv`]: PacketRecvInterface::recv
    pub fn init_receiver<F>(&self, handler_done: F)
    where
        F: FnMut(Buffer, usize) + 'static,
    {
        let mut s = self.shared.borrow_mut();
        assert!(!s.has_receiver, "receiver already initialised");
        s.has_receiver = true;
        s.handler_done = Some(Box::new(handler_done));
    }

    /// User side: requests a packet into `packet`'s spare capacity, which
    /// must be at least the MTU.
    pub fn recv(&self, packet: Buffer) {
        let mut s = self.shared.borrow_mut();
        assert_eq!(s.state, State::Idle, "operation already in progress");
        assert!(packet.spare_len() >= s.mtu, "destination smaller than MTU");
        debug_assert!(s.has_receiver, "receiver not initialised");
        s.base_len = packet.len();
        s.packet = Some(packet);
        s.state = State::OperationPending;
        s.job_operation.set();
    }
}

impl Clone for PacketRecvInterface {
    fn clone(&self) -> PacketRecvInterface {
        PacketRecvInterface {
            shared: self.shared.clone(),
        }
    }
}

impl fmt::Debug for PacketRecvInterface {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.shared.borrow();
        fmt.debug_struct("PacketRecvInterface")
            .field("mtu", &s.mtu)
            .field("state", &s.state)
            .finish()
    }
}

fn job_operation(weak: &Weak<RefCell<Shared>>) {
    let Some(shared) = weak.upgrade() else { return };
    let (mut handler, packet) = {
        let mut s = shared.borrow_mut();
        debug_assert_eq!(s.state, State::OperationPending);
        s.state = State::Busy;
        let handler = s.handler_recv.take().expect("recv handler missing");
        let packet = s.packet.take().expect("packet missing");
        (handler, packet)
    };
    handler(packet);
    shared.borrow_mut().handler_recv = Some(handler);
}

fn job_done(weak: &Weak<RefCell<Shared>>) {
    let Some(shared) = weak.upgrade() else { return };
    let (mut handler, packet, len) = {
        let mut s = shared.borrow_mut();
        debug_assert_eq!(s.state, State::DonePending);
        s.state = State::Idle;
        let handler = s.handler_done.take().expect("done handler missing");
        let packet = s.packet.take().expect("packet missing");
        (handler, packet, s.done_len)
    };
    handler(packet, len);
    shared.borrow_mut().handler_done = Some(handler);
}
