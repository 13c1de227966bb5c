use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::flow::PacketPassInterface;
use crate::slab::{Key, Slab};
use crate::{Buffer, Handle, Pending};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum FlowState {
    Idle,
    Waiting,
    Sending,
}

/// Strict-priority multiplexer from many packet inputs onto one packet
/// output.
///
/// Each [`PacketPassPriorityQueueFlow`] provides its own
/// [`PacketPassInterface`] input with the output's MTU and carries a fixed
/// integer priority; the waiting flow with the numerically smallest
/// priority is always scheduled next, FIFO among equals. Use it to keep
/// control traffic ahead of bulk traffic on a shared egress.
///
/// The current send always runs to completion; a higher-priority arrival
/// waits for it. A busy flow must not be dropped, except after
/// [`prepare_free`] or a completed
/// [`PacketPassPriorityQueueFlow::request_cancel`].
///
/// [`prepare_free`]: PacketPassPriorityQueue::prepare_free
pub struct PacketPassPriorityQueue {
    state: Rc<RefCell<QueueState>>,
    handle: Handle,
}

struct QueueState {
    output: PacketPassInterface,
    schedule_job: Pending,
    flows: Slab<FlowEntry>,
    sending: Option<Key>,
    cancelling: bool,
    freeing: bool,
    arrive_seq: u64,
    use_cancel: bool,
}

struct FlowEntry {
    iface: Option<PacketPassInterface>,
    packet: Option<Buffer>,
    state: FlowState,
    priority: i32,
    arrive_seq: u64,
    busy_handler: Option<Rc<RefCell<dyn FnMut()>>>,
}

impl PacketPassPriorityQueue {
    pub fn new(handle: &Handle, output: &PacketPassInterface) -> PacketPassPriorityQueue {
        let use_cancel = output.has_cancel();
        let state = Rc::new_cyclic(|weak: &Weak<RefCell<QueueState>>| {
            let w = weak.clone();
            RefCell::new(QueueState {
                output: output.clone(),
                schedule_job: Pending::new(handle, move || schedule(&w)),
                flows: Slab::new(),
                sending: None,
                cancelling: false,
                freeing: false,
                arrive_seq: 0,
                use_cancel,
            })
        });
        output.init_sender({
            let weak = Rc::downgrade(&state);
            move |packet| output_done(&weak, packet)
        });
        PacketPassPriorityQueue {
            state,
            handle: handle.clone(),
        }
    }

    /// The output MTU, which is also every flow's input MTU.
    pub fn mtu(&self) -> usize {
        self.state.borrow().output.mtu()
    }

    /// Enters bulk-teardown mode: flows may be dropped even while busy and
    /// no further scheduling happens.
    pub fn prepare_free(&self) {
        let mut s = self.state.borrow_mut();
        s.freeing = true;
        s.schedule_job.unset();
    }
}

impl fmt::Debug for PacketPassPriorityQueue {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.borrow();
        fmt.debug_struct("PacketPassPriorityQueue")
            .field("flows", &s.flows.len())
            .finish()
    }
}

impl Drop for PacketPassPriorityQueue {
    fn drop(&mut self) {
        debug_assert!(
            self.state.borrow().flows.is_empty(),
            "queue dropped with live flows",
        );
    }
}

/// A flow handle of a [`PacketPassPriorityQueue`].
pub struct PacketPassPriorityQueueFlow {
    queue: Rc<RefCell<QueueState>>,
    key: Key,
    input: PacketPassInterface,
}

impl PacketPassPriorityQueueFlow {
    pub fn new(queue: &PacketPassPriorityQueue, priority: i32) -> PacketPassPriorityQueueFlow {
        let mtu = queue.mtu();
        let key = queue.state.borrow_mut().flows.insert(FlowEntry {
            iface: None,
            packet: None,
            state: FlowState::Idle,
            priority,
            arrive_seq: 0,
            busy_handler: None,
        });
        let input = PacketPassInterface::new(&queue.handle, mtu, {
            let weak = Rc::downgrade(&queue.state);
            move |packet| flow_send(&weak, key, packet)
        });
        queue
            .state
            .borrow_mut()
            .flows
            .get_mut(key)
            .expect("flow entry missing")
            .iface = Some(input.clone());
        PacketPassPriorityQueueFlow {
            queue: queue.state.clone(),
            key,
            input,
        }
    }

    /// The flow's packet input.
    pub fn input(&self) -> &PacketPassInterface {
        &self.input
    }

    /// Whether the flow's packet is the one currently being sent.
    pub fn is_busy(&self) -> bool {
        self.queue.borrow().sending == Some(self.key)
    }

    /// Asks for the flow's in-flight send to be cancelled. Requires output
    /// cancel support and a busy flow.
    pub fn request_cancel(&self) {
        let mut s = self.queue.borrow_mut();
        assert_eq!(s.sending, Some(self.key), "flow is not busy");
        assert!(s.use_cancel, "output does not support cancel");
        if !s.cancelling {
            s.cancelling = true;
            let output = s.output.clone();
            drop(s);
            output.request_cancel();
        }
    }

    /// Sets a handler invoked when the flow stops being busy.
    pub fn set_busy_handler<F>(&self, handler: F)
    where
        F: FnMut() + 'static,
    {
        let mut s = self.queue.borrow_mut();
        let entry = s.flows.get_mut(self.key).expect("flow entry missing");
        entry.busy_handler = Some(Rc::new(RefCell::new(handler)));
    }
}

impl Drop for PacketPassPriorityQueueFlow {
    fn drop(&mut self) {
        let mut s = self.queue.borrow_mut();
        if !s.freeing {
            debug_assert!(s.sending != Some(self.key), "busy flow dropped");
        }
        if s.sending == Some(self.key) {
            s.sending = None;
        }
        s.flows.remove(self.key);
    }
}

impl fmt::Debug for PacketPassPriorityQueueFlow {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("PacketPassPriorityQueueFlow")
            .field("busy", &self.is_busy())
            .finish()
    }
}

fn flow_send(weak: &Weak<RefCell<QueueState>>, key: Key, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    debug_assert!(!s.freeing, "send into a queue being torn down");
    s.arrive_seq = s.arrive_seq.wrapping_add(1);
    let arrive_seq = s.arrive_seq;
    let entry = s.flows.get_mut(key).expect("flow entry missing");
    debug_assert_eq!(entry.state, FlowState::Idle);
    entry.arrive_seq = arrive_seq;
    entry.packet = Some(packet);
    entry.state = FlowState::Waiting;
    if s.sending.is_none() {
        s.schedule_job.set();
    }
}

fn schedule(weak: &Weak<RefCell<QueueState>>) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    if s.freeing || s.sending.is_some() {
        return;
    }

    let winner = s
        .flows
        .iter()
        .filter(|(_, e)| e.state == FlowState::Waiting)
        .min_by_key(|(_, e)| (e.priority, e.arrive_seq))
        .map(|(key, _)| key);
    let Some(key) = winner else { return };

    let entry = s.flows.get_mut(key).expect("flow entry missing");
    entry.state = FlowState::Sending;
    let packet = entry.packet.take().expect("waiting flow without packet");
    s.sending = Some(key);
    let output = s.output.clone();
    drop(s);
    output.send(packet);
}

fn output_done(weak: &Weak<RefCell<QueueState>>, packet: Buffer) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    s.cancelling = false;
    let Some(key) = s.sending.take() else {
        return;
    };

    let mut busy_handler = None;
    if let Some(entry) = s.flows.get_mut(key) {
        entry.state = FlowState::Idle;
        busy_handler = entry.busy_handler.clone();
        let iface = entry.iface.clone().expect("flow not wired");
        s.schedule_job.set();
        drop(s);
        iface.done(packet);
    } else {
        s.schedule_job.set();
    }

    if let Some(handler) = busy_handler {
        (handler.borrow_mut())();
    }
}
