use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::flow::{PacketPassInterface, StreamPassInterface};
use crate::{Buffer, Handle};

/// Sends packets as a byte stream.
///
/// Provides a [`PacketPassInterface`] input and writes each packet's bytes
/// to the given [`StreamPassInterface`] output, re-issuing after short
/// writes until the packet is fully consumed. A zero-length packet
/// completes without touching the output.
///
/// Framing is the caller's concern; compose with
/// [`PacketProtoEncoder`] to delimit packets on the stream.
///
/// [`PacketProtoEncoder`]: crate::flow::PacketProtoEncoder
pub struct PacketStreamSender {
    input: PacketPassInterface,
    #[allow(dead_code)]
    state: Rc<RefCell<State>>,
}

struct State {
    input: Option<PacketPassInterface>,
    output: StreamPassInterface,
}

impl PacketStreamSender {
    pub fn new(handle: &Handle, output: &StreamPassInterface, mtu: usize) -> PacketStreamSender {
        let state = Rc::new(RefCell::new(State {
            input: None,
            output: output.clone(),
        }));

        let input = PacketPassInterface::new(handle, mtu, {
            let weak = Rc::downgrade(&state);
            move |packet| input_send(&weak, packet)
        });
        output.init_sender({
            let weak = Rc::downgrade(&state);
            move |buf, _len| output_done(&weak, buf)
        });
        state.borrow_mut().input = Some(input.clone());

        PacketStreamSender { input, state }
    }

    pub fn input(&self) -> &PacketPassInterface {
        &self.input
    }
}

fn input_send(weak: &Weak<RefCell<State>>, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow();
    if packet.is_empty() {
        let input = s.input.clone().expect("not wired");
        drop(s);
        input.done(packet);
    } else {
        let output = s.output.clone();
        drop(s);
        output.send(packet);
    }
}

fn output_done(weak: &Weak<RefCell<State>>, buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow();
    if buf.is_empty() {
        let input = s.input.clone().expect("not wired");
        drop(s);
        input.done(buf);
    } else {
        // Short write; send the remainder.
        let output = s.output.clone();
        drop(s);
        output.send(buf);
    }
}
