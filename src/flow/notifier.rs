use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::flow::PacketPassInterface;
use crate::{Buffer, Handle};

/// Identity pass-through that lets an observer see every packet.
///
/// The notifier provides a [`PacketPassInterface`] input with the same MTU
/// as the given output and forwards every packet unchanged, invoking the
/// observer (if set) with the packet contents first. Cancellation is
/// forwarded iff the output supports it.
pub struct PacketPassNotifier {
    input: PacketPassInterface,
    state: Rc<RefCell<State>>,
}

struct State {
    input: Option<PacketPassInterface>,
    output: PacketPassInterface,
    handler: Option<Box<dyn FnMut(&[u8])>>,
}

impl PacketPassNotifier {
    pub fn new(handle: &Handle, output: &PacketPassInterface) -> PacketPassNotifier {
        let state = Rc::new(RefCell::new(State {
            input: None,
            output: output.clone(),
            handler: None,
        }));

        let input = PacketPassInterface::new(handle, output.mtu(), {
            let weak = Rc::downgrade(&state);
            move |packet| input_send(&weak, packet)
        });
        if output.has_cancel() {
            input.enable_cancel({
                let weak = Rc::downgrade(&state);
                move || input_cancel(&weak)
            });
        }
        output.init_sender({
            let weak = Rc::downgrade(&state);
            move |packet| output_done(&weak, packet)
        });
        state.borrow_mut().input = Some(input.clone());

        PacketPassNotifier { input, state }
    }

    pub fn input(&self) -> &PacketPassInterface {
        &self.input
    }

    /// Sets (or replaces) the observer called with each packet before it is
    /// forwarded.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: FnMut(&[u8]) + 'static,
    {
        self.state.borrow_mut().handler = Some(Box::new(handler));
    }
}

fn input_send(weak: &Weak<RefCell<State>>, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    if let Some(mut handler) = s.handler.take() {
        drop(s);
        handler(packet.bytes());
        let mut s = state.borrow_mut();
        if s.handler.is_none() {
            s.handler = Some(handler);
        }
        let output = s.output.clone();
        drop(s);
        output.send(packet);
    } else {
        let output = s.output.clone();
        drop(s);
        output.send(packet);
    }
}

fn input_cancel(weak: &Weak<RefCell<State>>) {
    let Some(state) = weak.upgrade() else { return };
    let output = state.borrow().output.clone();
    output.request_cancel();
}

fn output_done(weak: &Weak<RefCell<State>>, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let input = state.borrow().input.clone().expect("not wired");
    input.done(packet);
}
