//! Late-binding identity nodes.
//!
//! A connector provides one side of an interface immediately; the other
//! side is attached later and may be detached and re-attached. An operation
//! issued while detached is parked in the node and forwarded on attach.
//! This enables late binding in pipelines whose downstream (or upstream)
//! comes and goes, for example a peer datapath whose transport is replaced.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::flow::{PacketPassInterface, PacketRecvInterface};
use crate::{Buffer, Handle};

/// Push connector: a permanent [`PacketPassInterface`] input whose output
/// is attached later.
///
/// If the output is detached while a packet is in flight on it, the packet
/// completes through the old output and the completion is delivered
/// upstream as usual.
pub struct PacketPassConnector {
    input: PacketPassInterface,
    state: Rc<RefCell<PassState>>,
}

struct PassState {
    input: Option<PacketPassInterface>,
    output: Option<PacketPassInterface>,
    // Parked while detached.
    packet: Option<Buffer>,
}

impl PacketPassConnector {
    pub fn new(handle: &Handle, mtu: usize) -> PacketPassConnector {
        let state = Rc::new(RefCell::new(PassState {
            input: None,
            output: None,
            packet: None,
        }));
        let input = PacketPassInterface::new(handle, mtu, {
            let weak = Rc::downgrade(&state);
            move |packet| pass_input_send(&weak, packet)
        });
        state.borrow_mut().input = Some(input.clone());
        PacketPassConnector { input, state }
    }

    /// The permanent input.
    pub fn input(&self) -> &PacketPassInterface {
        &self.input
    }

    /// Attaches `output`. Its MTU must cover the connector's, nothing may
    /// be attached yet, and `output` must not have had a sender before. A
    /// parked packet is forwarded immediately.
    pub fn connect_output(&self, output: &PacketPassInterface) {
        let mut s = self.state.borrow_mut();
        assert!(s.output.is_none(), "output already connected");
        assert!(output.mtu() >= self.input.mtu(), "output MTU too small");
        output.init_sender({
            let weak = Rc::downgrade(&self.state);
            move |packet| pass_output_done(&weak, packet)
        });
        s.output = Some(output.clone());
        if let Some(packet) = s.packet.take() {
            let output = output.clone();
            drop(s);
            output.send(packet);
        }
    }

    /// Detaches the output. A packet already in flight on it completes
    /// normally.
    pub fn disconnect_output(&self) {
        let mut s = self.state.borrow_mut();
        assert!(s.output.is_some(), "no output connected");
        s.output = None;
    }
}

fn pass_input_send(weak: &Weak<RefCell<PassState>>, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    debug_assert!(s.packet.is_none());
    match s.output.clone() {
        Some(output) => {
            drop(s);
            output.send(packet);
        }
        None => s.packet = Some(packet),
    }
}

fn pass_output_done(weak: &Weak<RefCell<PassState>>, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow_mut();
    let input = s.input.clone().expect("not wired");
    drop(s);
    input.done(packet);
}

/// Pull connector: a permanent [`PacketRecvInterface`] output whose input
/// is attached later.
///
/// A `recv` issued while detached parks the destination buffer; attaching
/// an input forwards the request. A request already forwarded to an input
/// that is then detached completes through that input.
pub struct PacketRecvConnector {
    output: PacketRecvInterface,
    state: Rc<RefCell<RecvState>>,
}

struct RecvState {
    output: Option<PacketRecvInterface>,
    input: Option<PacketRecvInterface>,
    // Parked while detached.
    buf: Option<Buffer>,
}

impl PacketRecvConnector {
    pub fn new(handle: &Handle, mtu: usize) -> PacketRecvConnector {
        let state = Rc::new(RefCell::new(RecvState {
            output: None,
            input: None,
            buf: None,
        }));
        let output = PacketRecvInterface::new(handle, mtu, {
            let weak = Rc::downgrade(&state);
            move |buf| recv_output_recv(&weak, buf)
        });
        state.borrow_mut().output = Some(output.clone());
        PacketRecvConnector { output, state }
    }

    /// The permanent output.
    pub fn output(&self) -> &PacketRecvInterface {
        &self.output
    }

    /// Attaches `input`. Its MTU must not exceed the connector's, nothing
    /// may be attached yet, and `input` must not have had a receiver
    /// before. A parked request is forwarded immediately.
    pub fn connect_input(&self, input: &PacketRecvInterface) {
        let mut s = self.state.borrow_mut();
        assert!(s.input.is_none(), "input already connected");
        assert!(input.mtu() <= self.output.mtu(), "input MTU too large");
        input.init_receiver({
            let weak = Rc::downgrade(&self.state);
            move |buf, len| recv_input_done(&weak, buf, len)
        });
        s.input = Some(input.clone());
        if let Some(buf) = s.buf.take() {
            let input = input.clone();
            drop(s);
            input.recv(buf);
        }
    }

    /// Detaches the input. A request already in flight on it completes
    /// normally.
    pub fn disconnect_input(&self) {
        let mut s = self.state.borrow_mut();
        assert!(s.input.is_some(), "no input connected");
        s.input = None;
    }
}

fn recv_output_recv(weak: &Weak<RefCell<RecvState>>, buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    debug_assert!(s.buf.is_none());
    match s.input.clone() {
        Some(input) => {
            drop(s);
            input.recv(buf);
        }
        None => s.buf = Some(buf),
    }
}

fn recv_input_done(weak: &Weak<RefCell<RecvState>>, buf: Buffer, len: usize) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow_mut();
    let output = s.output.clone().expect("not wired");
    drop(s);
    output.done(buf, len);
}
