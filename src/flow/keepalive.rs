use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::flow::PacketRecvInterface;
use crate::proto::scproto;
use crate::{Buffer, Handle};

/// Produces a keepalive frame every time it is asked.
///
/// A [`PacketRecvInterface`] provider with MTU 1 that completes each
/// receive immediately with the one-byte keepalive frame. Feed it into the
/// keepalive path of a [`PacketPassInactivityMonitor`]-guarded pipeline.
///
/// [`PacketPassInactivityMonitor`]: crate::flow::PacketPassInactivityMonitor
pub struct KeepaliveSource {
    output: PacketRecvInterface,
    #[allow(dead_code)]
    state: Rc<RefCell<State>>,
}

struct State {
    output: Option<PacketRecvInterface>,
}

impl KeepaliveSource {
    pub fn new(handle: &Handle) -> KeepaliveSource {
        let state = Rc::new(RefCell::new(State { output: None }));
        let output = PacketRecvInterface::new(handle, scproto::HEADER_LEN, {
            let weak = Rc::downgrade(&state);
            move |buf| output_recv(&weak, buf)
        });
        state.borrow_mut().output = Some(output.clone());
        KeepaliveSource { output, state }
    }

    pub fn output(&self) -> &PacketRecvInterface {
        &self.output
    }
}

fn output_recv(weak: &Weak<RefCell<State>>, mut buf: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let output = state.borrow().output.clone().expect("not wired");
    buf.append(&[scproto::MSG_KEEPALIVE]);
    output.done(buf, scproto::HEADER_LEN);
}
