use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::flow::PacketPassInterface;
use crate::{Buffer, Handle, Timer};

/// Fires a handler after a period without traffic.
///
/// An identity wrapper around a [`PacketPassInterface`]: packets pass
/// through unchanged, and a timer of the given interval is re-armed on
/// every completion. While a send is in flight the timer is stopped. If
/// the interval elapses with no traffic, the handler fires and the timer
/// re-arms, so a silent pipeline fires periodically.
///
/// Used to generate keepalives (the handler submits one on a parallel
/// path) and to detect peer silence. [`force`] fires the handler as if the
/// interval had just expired.
///
/// Cancellation is forwarded iff the output supports it; a cancelled send
/// restarts the timer.
///
/// [`force`]: PacketPassInactivityMonitor::force
pub struct PacketPassInactivityMonitor {
    input: PacketPassInterface,
    state: Rc<RefCell<State>>,
}

struct State {
    input: Option<PacketPassInterface>,
    output: PacketPassInterface,
    timer: Option<Timer>,
    handler: Option<Rc<RefCell<dyn FnMut()>>>,
}

impl PacketPassInactivityMonitor {
    pub fn new(
        handle: &Handle,
        output: &PacketPassInterface,
        interval: Duration,
    ) -> PacketPassInactivityMonitor {
        let state = Rc::new(RefCell::new(State {
            input: None,
            output: output.clone(),
            timer: None,
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

        let timer = Timer::new(handle, interval, {
            let weak = Rc::downgrade(&state);
            move || timer_fired(&weak)
        });
        timer.set();

        {
            let mut s = state.borrow_mut();
            s.input = Some(input.clone());
            s.timer = Some(timer);
        }

        PacketPassInactivityMonitor { input, state }
    }

    pub fn input(&self) -> &PacketPassInterface {
        &self.input
    }

    /// Sets (or replaces) the inactivity handler.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: FnMut() + 'static,
    {
        self.state.borrow_mut().handler = Some(Rc::new(RefCell::new(handler)));
    }

    /// Fires the handler as if the interval had just expired.
    pub fn force(&self) {
        let s = self.state.borrow();
        s.timer
            .as_ref()
            .expect("not wired")
            .set_after(Duration::ZERO);
    }
}

fn input_send(weak: &Weak<RefCell<State>>, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow();
    s.timer.as_ref().expect("not wired").unset();
    let output = s.output.clone();
    drop(s);
    output.send(packet);
}

fn input_cancel(weak: &Weak<RefCell<State>>) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow();
    s.timer.as_ref().expect("not wired").set();
    let output = s.output.clone();
    drop(s);
    output.request_cancel();
}

fn output_done(weak: &Weak<RefCell<State>>, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow();
    s.timer.as_ref().expect("not wired").set();
    let input = s.input.clone().expect("not wired");
    drop(s);
    input.done(packet);
}

fn timer_fired(weak: &Weak<RefCell<State>>) {
    let Some(state) = weak.upgrade() else { return };
    let s = state.borrow();
    s.timer.as_ref().expect("not wired").set();
    let handler = s.handler.clone();
    drop(s);
    if let Some(handler) = handler {
        (handler.borrow_mut())();
    }
}
