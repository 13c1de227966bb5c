use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::flow::{PacketPassInterface, PacketRecvInterface};
use crate::{Buffer, Handle};

/// Rendezvous between a push input and a pull output of the same MTU.
///
/// The copier provides both a [`PacketPassInterface`] input and a
/// [`PacketRecvInterface`] output. When both sides have an operation in
/// flight it copies the input packet into the output buffer and completes
/// both. Used wherever a push half and a pull half of a pipeline must meet.
///
/// The input supports cancellation: a cancelled packet that has not yet
/// been copied is dropped and completed.
pub struct PacketCopier {
    input: PacketPassInterface,
    output: PacketRecvInterface,
    #[allow(dead_code)]
    state: Rc<RefCell<State>>,
}

struct State {
    input: Option<PacketPassInterface>,
    output: Option<PacketRecvInterface>,
    // Parked operation from whichever side arrived first.
    in_pkt: Option<Buffer>,
    out_buf: Option<Buffer>,
}

impl PacketCopier {
    pub fn new(handle: &Handle, mtu: usize) -> PacketCopier {
        let state = Rc::new(RefCell::new(State {
            input: None,
            output: None,
            in_pkt: None,
            out_buf: None,
        }));

        let input = PacketPassInterface::new(handle, mtu, {
            let weak = Rc::downgrade(&state);
            move |packet| input_send(&weak, packet)
        });
        input.enable_cancel({
            let weak = Rc::downgrade(&state);
            move || input_cancel(&weak)
        });
        let output = PacketRecvInterface::new(handle, mtu, {
            let weak = Rc::downgrade(&state);
            move |buf| output_recv(&weak, buf)
        });

        {
            let mut s = state.borrow_mut();
            s.input = Some(input.clone());
            s.output = Some(output.clone());
        }

        PacketCopier {
            input,
            output,
            state,
        }
    }

    /// The push input. Connect a sender to it.
    pub fn input(&self) -> &PacketPassInterface {
        &self.input
    }

    /// The pull output. Connect a receiver to it.
    pub fn output(&self) -> &PacketRecvInterface {
        &self.output
    }
}

fn input_send(weak: &Weak<RefCell<State>>, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    debug_assert!(s.in_pkt.is_none());

    let Some(mut out) = s.out_buf.take() else {
        s.in_pkt = Some(packet);
        return;
    };

    let len = packet.len();
    out.append(packet.bytes());
    let input = s.input.clone().expect("not wired");
    let output = s.output.clone().expect("not wired");
    drop(s);
    output.done(out, len);
    input.done(packet);
}

fn input_cancel(weak: &Weak<RefCell<State>>) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    // The packet can only be parked here: once copied, the operation has
    // already completed.
    let packet = s.in_pkt.take().expect("cancel without parked packet");
    let input = s.input.clone().expect("not wired");
    drop(s);
    input.done(packet);
}

fn output_recv(weak: &Weak<RefCell<State>>, mut buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    debug_assert!(s.out_buf.is_none());

    let Some(packet) = s.in_pkt.take() else {
        s.out_buf = Some(buf);
        return;
    };

    let len = packet.len();
    buf.append(packet.bytes());
    let input = s.input.clone().expect("not wired");
    let output = s.output.clone().expect("not wired");
    drop(s);
    input.done(packet);
    output.done(buf, len);
}
