use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::flow::{PacketPassInterface, StreamPassInterface};
use crate::{Buffer, Handle};

/// Sends a byte stream as packets.
///
/// Provides a [`StreamPassInterface`] input and forwards each send to the
/// given [`PacketPassInterface`] output, clamping to the output MTU: a send
/// larger than the MTU completes short, and the sender re-issues the
/// remainder as usual for a stream.
///
/// Packet boundaries carry no meaning to the stream side; the receiving end
/// must treat consecutive packets as a contiguous byte sequence.
pub struct StreamPacketSender {
    input: StreamPassInterface,
    #[allow(dead_code)]
    state: Rc<RefCell<State>>,
}

struct State {
    input: Option<StreamPassInterface>,
    output: PacketPassInterface,
    // Packet being sent; the stream buffer is parked meanwhile.
    packet: Option<Buffer>,
    parked: Option<Buffer>,
    sending_len: usize,
}

impl StreamPacketSender {
    pub fn new(handle: &Handle, output: &PacketPassInterface) -> StreamPacketSender {
        assert!(output.mtu() > 0, "output MTU must be positive");

        let state = Rc::new(RefCell::new(State {
            input: None,
            output: output.clone(),
            packet: Some(Buffer::with_capacity(output.mtu())),
            parked: None,
            sending_len: 0,
        }));

        let input = StreamPassInterface::new(handle, {
            let weak = Rc::downgrade(&state);
            move |buf| input_send(&weak, buf)
        });
        output.init_sender({
            let weak = Rc::downgrade(&state);
            move |packet| output_done(&weak, packet)
        });
        state.borrow_mut().input = Some(input.clone());

        StreamPacketSender { input, state }
    }

    pub fn input(&self) -> &StreamPassInterface {
        &self.input
    }
}

fn input_send(weak: &Weak<RefCell<State>>, buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    let mut packet = s.packet.take().expect("packet buffer in flight");
    let len = buf.len().min(packet.capacity());
    packet.clear();
    packet.append(&buf.bytes()[..len]);
    s.sending_len = len;
    s.parked = Some(buf);
    let output = s.output.clone();
    drop(s);
    output.send(packet);
}

fn output_done(weak: &Weak<RefCell<State>>, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    s.packet = Some(packet);
    let buf = s.parked.take().expect("no parked stream buffer");
    let len = s.sending_len;
    let input = s.input.clone().expect("not wired");
    drop(s);
    input.done(buf, len);
}
