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

/// Fair multiplexer from many packet inputs onto one packet output.
///
/// Each [`PacketPassFairQueueFlow`] provides its own
/// [`PacketPassInterface`] input with the output's MTU. Flows are scheduled
/// by virtual finish time: a packet submitted on a flow is stamped
/// `max(flow time, queue time) + len`, the waiting flow with the smallest
/// stamp wins, and the queue time advances to the stamp of each completed
/// send. Backlogged flows therefore drain within one maximum packet size of
/// each other's byte counts, and ties go in arrival order.
///
/// If the output supports cancellation, a newly submitted packet that
/// would win over the one currently being sent preempts it: the in-flight
/// send is cancelled, completes through the flow it came from, and the
/// queue reschedules. Without output cancellation the current send always
/// runs to completion.
///
/// A flow that is currently being sent is *busy* and must not be dropped,
/// except after [`prepare_free`]. Use [`PacketPassFairQueueFlow::request_cancel`]
/// (requires output cancel support) to force a busy flow out.
///
/// [`prepare_free`]: PacketPassFairQueue::prepare_free
pub struct PacketPassFairQueue {
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
    vtime: u64,
    arrive_seq: u64,
    use_cancel: bool,
}

struct FlowEntry {
    iface: Option<PacketPassInterface>,
    packet: Option<Buffer>,
    state: FlowState,
    time: u64,
    arrive_seq: u64,
    busy_handler: Option<Rc<RefCell<dyn FnMut()>>>,
}

impl PacketPassFairQueue {
    pub fn new(handle: &Handle, output: &PacketPassInterface) -> PacketPassFairQueue {
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
                vtime: 0,
                arrive_seq: 0,
                use_cancel,
            })
        });
        output.init_sender({
            let weak = Rc::downgrade(&state);
            move |packet| output_done(&weak, packet)
        });
        PacketPassFairQueue {
            state,
            handle: handle.clone(),
        }
    }

    /// The output MTU, which is also every flow's input MTU.
    pub fn mtu(&self) -> usize {
        self.state.borrow().output.mtu()
    }

    /// Enters bulk-teardown mode: flows may be dropped even while busy.
    /// No further scheduling happens; the queue itself must be dropped
    /// next.
    pub fn prepare_free(&self) {
        let mut s = self.state.borrow_mut();
        s.freeing = true;
        s.schedule_job.unset();
    }
}

impl fmt::Debug for PacketPassFairQueue {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.state.borrow();
        fmt.debug_struct("PacketPassFairQueue")
            .field("flows", &s.flows.len())
            .finish()
    }
}

impl Drop for PacketPassFairQueue {
    fn drop(&mut self) {
        debug_assert!(
            self.state.borrow().flows.is_empty(),
            "queue dropped with live flows",
        );
    }
}

/// A flow handle of a [`PacketPassFairQueue`].
pub struct PacketPassFairQueueFlow {
    queue: Rc<RefCell<QueueState>>,
    key: Key,
    input: PacketPassInterface,
}

impl PacketPassFairQueueFlow {
    pub fn new(queue: &PacketPassFairQueue) -> PacketPassFairQueueFlow {
        let mtu = queue.mtu();
        let key = queue.state.borrow_mut().flows.insert(FlowEntry {
            iface: None,
            packet: None,
            state: FlowState::Idle,
            time: 0,
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
        PacketPassFairQueueFlow {
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
    /// cancel support and a busy flow. Completion is reported through the
    /// flow's interface (and the busy handler, if set).
    pub fn request_cancel(&self) {
        let s = self.queue.borrow_mut();
        assert_eq!(s.sending, Some(self.key), "flow is not busy");
        assert!(s.use_cancel, "output does not support cancel");
        request_output_cancel(s);
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

impl Drop for PacketPassFairQueueFlow {
    fn drop(&mut self) {
        let mut s = self.queue.borrow_mut();
        if !s.freeing {
            debug_assert!(s.sending != Some(self.key), "busy flow dropped");
        }
        if s.sending == Some(self.key) {
            // prepare_free teardown; the output completion, if it ever
            // arrives, finds the entry gone and does nothing further.
            s.sending = None;
        }
        s.flows.remove(self.key);
    }
}

impl fmt::Debug for PacketPassFairQueueFlow {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("PacketPassFairQueueFlow")
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
    let vtime = s.vtime;
    let entry = s.flows.get_mut(key).expect("flow entry missing");
    debug_assert_eq!(entry.state, FlowState::Idle);
    entry.time = entry.time.max(vtime).saturating_add(packet.len() as u64);
    entry.arrive_seq = arrive_seq;
    entry.packet = Some(packet);
    entry.state = FlowState::Waiting;
    let time = entry.time;

    if let Some(sending) = s.sending {
        // Preempt the in-flight send if this flow would win and the output
        // can cancel.
        let sending_time = s.flows.get(sending).map(|e| e.time);
        if s.use_cancel && !s.cancelling && sending_time.is_some_and(|t| time < t) {
            request_output_cancel(s);
        }
    } else {
        s.schedule_job.set();
    }
}

fn request_output_cancel(mut s: std::cell::RefMut<'_, QueueState>) {
    s.cancelling = true;
    let output = s.output.clone();
    drop(s);
    output.request_cancel();
}

fn schedule(weak: &Weak<RefCell<QueueState>>) {
    let Some(state) = weak.upgrade() else { return };
    let mut s = state.borrow_mut();
    if s.freeing || s.sending.is_some() {
        return;
    }

    // Pick the waiting flow with the smallest virtual time, FIFO on ties.
    let winner = s
        .flows
        .iter()
        .filter(|(_, e)| e.state == FlowState::Waiting)
        .min_by_key(|(_, e)| (e.time, e.arrive_seq))
        .map(|(key, _)| key);
    let Some(key) = winner else { return };

    let entry = s.flows.get_mut(key).expect("flow entry missing");
    entry.state = FlowState::Sending;
    let packet = entry.packet.take().expect("waiting flow without packet");
    // The queue clock advances only on completion, so a later arrival can
    // still undercut this send and preempt it.
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
        // The sending flow was dropped during prepare_free teardown.
        return;
    };

    let mut busy_handler = None;
    if let Some(entry) = s.flows.get_mut(key) {
        entry.state = FlowState::Idle;
        busy_handler = entry.busy_handler.clone();
        let iface = entry.iface.clone().expect("flow not wired");
        // Completed (or cancelled) sends advance the queue clock.
        s.vtime = s.flows.get(key).expect("flow entry missing").time;
        reset_clock_if_idle(&mut s);
        s.schedule_job.set();
        drop(s);
        iface.done(packet);
    } else {
        // Flow dropped while sending (freeing mode); nobody to complete to.
        s.schedule_job.set();
    }

    if let Some(handler) = busy_handler {
        (handler.borrow_mut())();
    }
}

/// When nothing is queued or in flight the virtual clock restarts from
/// zero, keeping the arithmetic far from overflow.
fn reset_clock_if_idle(s: &mut QueueState) {
    let any_active = s
        .flows
        .iter()
        .any(|(_, e)| e.state != FlowState::Idle);
    if !any_active && s.sending.is_none() {
        s.vtime = 0;
        for (_, entry) in s.flows.iter_mut() {
            entry.time = 0;
        }
    }
}
