use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::{Buffer, Handle, Pending};

/// State machine shared by all interface kinds.
///
/// ```text
/// Idle --send/recv--> OperationPending --(job)--> Busy --done--> DonePending --(job)--> Idle
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Idle,
    OperationPending,
    Busy,
    DonePending,
}

/// Push-mode packet transport between two nodes.
///
/// The *provider* constructs the interface with the packet handler (and
/// optionally a cancel handler); the *user* attaches a completion handler
/// with [`init_sender`] and then submits packets with [`send`].
///
/// A `send` transfers the [`Buffer`] to the provider for the duration of the
/// operation; the provider hands the same allocation back with [`done`].
/// The provider may consume the buffer's readable window; the user owns the
/// allocation again after its completion handler runs. At most one
/// operation is outstanding at a time, and both the operation and the
/// completion are dispatched through reactor jobs, never as direct calls.
///
/// If the provider supports cancellation it advertises it with
/// [`enable_cancel`]; [`request_cancel`] then asks for the in-flight
/// operation to complete promptly. A cancelled operation still completes
/// with `done`; it is never silently dropped.
///
/// Cloning yields another handle to the same interface.
///
/// [`init_sender`]: PacketPassInterface::init_sender
/// [`send`]: PacketPassInterface::send
/// [`done`]: PacketPassInterface::done
/// [`enable_cancel`]: PacketPassInterface::enable_cancel
/// [`request_cancel`]: PacketPassInterface::request_cancel
pub struct PacketPassInterface {
    shared: Rc<RefCell<Shared>>,
}

struct Shared {
    mtu: usize,
    state: State,
    packet: Option<Buffer>,
    handler_send: Option<Box<dyn FnMut(Buffer)>>,
    handler_cancel: Option<Box<dyn FnMut()>>,
    handler_done: Option<Box<dyn FnMut(Buffer)>>,
    has_sender: bool,
    has_cancel: bool,
    cancel_requested: bool,
    job_operation: Pending,
    job_done: Pending,
}

impl PacketPassInterface {
    /// Creates the provider side. `handler_send` receives each submitted
    /// packet; the provider completes it with [`done`], synchronously or
    /// later.
    ///
    /// [`done`]: PacketPassInterface::done
    pub fn new<F>(handle: &Handle, mtu: usize, handler_send: F) -> PacketPassInterface
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
                handler_send: Some(Box::new(handler_send)),
                handler_cancel: None,
                handler_done: None,
                has_sender: false,
                has_cancel: false,
                cancel_requested: false,
                job_operation: Pending::new(handle, move || job_operation(&w_op)),
                job_done: Pending::new(handle, move || job_done(&w_done)),
            })
        });
        PacketPassInterface { shared }
    }

    /// Advertises cancellation support. Must be called before the user
    /// attaches.
    pub fn enable_cancel<F>(&self, handler_cancel: F)
    where
        F: FnMut() + 'static,
    {
        let mut s = self.shared.borrow_mut();
        debug_assert!(!s.has_cancel, "cancel already enabled");
        debug_assert!(!s.has_sender, "cancel must be enabled before the sender attaches");
        s.has_cancel = true;
        s.handler_cancel = Some(Box::new(handler_cancel));
    }

    /// Whether the provider supports [`request_cancel`].
    ///
    /// [`request_cancel`]: PacketPassInterface::request_cancel
    pub fn has_cancel(&self) -> bool {
        self.shared.borrow().has_cancel
    }

    /// The maximum packet length.
    pub fn mtu(&self) -> usize {
        self.shared.borrow().mtu
    }

    /// Provider side: completes the in-flight operation, returning the
    /// buffer to the user.
    pub fn done(&self, packet: Buffer) {
        let mut s = self.shared.borrow_mut();
        assert_eq!(s.state, State::Busy, "done without in-flight operation");
        s.cancel_requested = false;
        s.packet = Some(packet);
        s.state = State::DonePending;
        s.job_done.set();
    }

    /// User side: attaches the completion handler. Must be called exactly
    /// once, before the first [`send`].
    ///
    /// [`send`]: PacketPassInterface::send
    pub fn init_sender<F>(&self, handler_done: F)
    where
        F: FnMut(Buffer) + 'static,
    {
        let mut s = self.shared.borrow_mut();
        assert!(!s.has_sender, "sender already initialised");
        s.has_sender = true;
        s.handler_done = Some(Box::new(handler_done));
    }

    /// User side: submits a packet. `packet.len()` must not exceed the MTU
    /// and no other operation may be in flight.
    pub fn send(&self, packet: Buffer) {
        let mut s = self.shared.borrow_mut();
        assert_eq!(s.state, State::Idle, "operation already in progress");
        assert!(packet.len() <= s.mtu, "packet exceeds MTU");
        debug_assert!(s.has_sender, "sender not initialised");
        s.packet = Some(packet);
        s.state = State::OperationPending;
        s.job_operation.set();
    }

    /// User side: asks the provider to complete the in-flight operation
    /// promptly. Requires [`has_cancel`] and an operation in flight.
    ///
    /// If the operation has not yet reached the provider it is completed
    /// internally without the provider ever seeing it.
    ///
    /// [`has_cancel`]: PacketPassInterface::has_cancel
    pub fn request_cancel(&self) {
        let mut s = self.shared.borrow_mut();
        assert!(s.has_cancel, "provider does not support cancel");
        match s.state {
            State::Idle => panic!("cancel without operation"),
            State::OperationPending => {
                s.job_operation.unset();
                s.state = State::DonePending;
                s.job_done.set();
            }
            State::Busy => {
                if !s.cancel_requested {
                    s.cancel_requested = true;
                    let mut handler = s.handler_cancel.take().expect("cancel handler missing");
                    drop(s);
                    handler();
                    self.shared.borrow_mut().handler_cancel = Some(handler);
                }
            }
            // Already completing; the done job will run.
            State::DonePending => {}
        }
    }
}

impl Clone for PacketPassInterface {
    fn clone(&self) -> PacketPassInterface {
        PacketPassInterface {
            shared: self.shared.clone(),
        }
    }
}

impl fmt::Debug for PacketPassInterface {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.shared.borrow();
        fmt.debug_struct("PacketPassInterface")
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
        let handler = s.handler_send.take().expect("send handler missing");
        let packet = s.packet.take().expect("packet missing");
        (handler, packet)
    };
    handler(packet);
    shared.borrow_mut().handler_send = Some(handler);
}

fn job_done(weak: &Weak<RefCell<Shared>>) {
    let Some(shared) = weak.upgrade() else { return };
    let (mut handler, packet) = {
        let mut s = shared.borrow_mut();
        debug_assert_eq!(s.state, State::DonePending);
        s.state = State::Idle;
        let handler = s.handler_done.take().expect("done handler missing");
        let packet = s.packet.take().expect("packet missing");
        (handler, packet)
    };
    handler(packet);
    shared.borrow_mut().handler_done = Some(handler);
}
