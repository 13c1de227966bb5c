use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::flow::{PacketPassInterface, PacketRecvInterface};
use crate::{Buffer, Handle};

/// Many-slot shock absorber between a pull input and a push output.
///
/// Owns `num_packets` buffers, each sized to the input MTU. The input and
/// output sides advance independently: a receive is outstanding whenever a
/// free slot exists, a send whenever a filled slot exists. Use it to absorb
/// bursts from a producer whose consumer is intermittently slow, or to
/// decouple latency between pipeline stages.
///
/// The first receive is started at construction.
pub struct PacketBuffer {
    #[allow(dead_code)]
    state: Rc<RefCell<State>>,
}

struct State {
    input: PacketRecvInterface,
    output: PacketPassInterface,
    free: Vec<Buffer>,
    filled: VecDeque<Buffer>,
    recv_busy: bool,
    send_busy: bool,
}

impl PacketBuffer {
    /// Wires `input` to `output` through `num_packets` slots. The output
    /// MTU must cover the input MTU and `num_packets` must be positive.
    pub fn new(
        handle: &Handle,
        input: &PacketRecvInterface,
        output: &PacketPassInterface,
        num_packets: usize,
    ) -> PacketBuffer {
        assert!(output.mtu() >= input.mtu(), "output MTU too small");
        assert!(num_packets > 0, "buffer needs at least one slot");
        let _ = handle;

        let mtu = input.mtu();
        let mut free = Vec::with_capacity(num_packets);
        for _ in 0..num_packets {
            free.push(Buffer::with_capacity(mtu));
        }

        let state = Rc::new(RefCell::new(State {
            input: input.clone(),
            output: output.clone(),
            free,
            filled: VecDeque::new(),
            recv_busy: false,
            send_busy: false,
        }));

        input.init_receiver({
            let weak = Rc::downgrade(&state);
            move |buf, _len| input_done(&weak, buf)
        });
        output.init_sender({
            let weak = Rc::downgrade(&state);
            move |buf| output_done(&weak, buf)
        });

        {
            let mut s = state.borrow_mut();
            let buf = s.free.pop().expect("no slots");
            s.recv_busy = true;
            drop(s);
            input.recv(buf);
        }

        PacketBuffer { state }
    }
}

fn input_done(weak: &Weak<RefCell<State>>, buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    s.recv_busy = false;
    s.filled.push_back(buf);
    pump(&mut s);
}

fn output_done(weak: &Weak<RefCell<State>>, mut buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    s.send_busy = false;
    buf.clear();
    s.free.push(buf);
    pump(&mut s);
}

// Interface calls only schedule jobs, so holding the state borrow across
// them is fine.
fn pump(s: &mut State) {
    if !s.send_busy {
        if let Some(buf) = s.filled.pop_front() {
            s.send_busy = true;
            s.output.send(buf);
        }
    }
    if !s.recv_busy {
        if let Some(buf) = s.free.pop() {
            s.recv_busy = true;
            s.input.recv(buf);
        }
    }
}
