use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::flow::{PacketPassInterface, PacketRecvInterface};
use crate::{Buffer, Handle};

/// One-slot pump between a pull input and a push output.
///
/// Owns a single buffer sized to the input MTU and loops: receive into the
/// buffer, send the received packet, receive again. Pure coupling with no
/// decoupling capacity; see [`PacketBuffer`] for the many-slot variant.
///
/// The receive is started at construction.
///
/// [`PacketBuffer`]: crate::flow::PacketBuffer
pub struct SinglePacketBuffer {
    #[allow(dead_code)]
    state: Rc<RefCell<State>>,
}

struct State {
    input: PacketRecvInterface,
    output: PacketPassInterface,
}

impl SinglePacketBuffer {
    /// Wires `input` to `output`. The output MTU must cover the input MTU.
    pub fn new(
        handle: &Handle,
        input: &PacketRecvInterface,
        output: &PacketPassInterface,
    ) -> SinglePacketBuffer {
        assert!(output.mtu() >= input.mtu(), "output MTU too small");
        let _ = handle;

        let state = Rc::new(RefCell::new(State {
            input: input.clone(),
            output: output.clone(),
        }));

        input.init_receiver({
            let weak = Rc::downgrade(&state);
            move |buf, _len| input_done(&weak, buf)
        });
        output.init_sender({
            let weak = Rc::downgrade(&state);
            move |buf| output_done(&weak, buf)
        });

        input.recv(Buffer::with_capacity(input.mtu()));

        SinglePacketBuffer { state }
    }
}

fn input_done(weak: &Weak<RefCell<State>>, buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let output = state.borrow().output.clone();
    output.send(buf);
}

fn output_done(weak: &Weak<RefCell<State>>, mut buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let input = state.borrow().input.clone();
    buf.clear();
    input.recv(buf);
}
