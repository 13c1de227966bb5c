// Not all helpers are used by all tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;

use flowio::flow::{PacketPassInterface, PacketRecvInterface};
use flowio::{Buffer, Handle, Reactor};

pub fn init() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        env_logger::try_init().expect("unable to initialise logger");
    })
}

pub fn init_with_reactor() -> (Reactor, Handle) {
    init();

    let reactor = Reactor::new().expect("unable to create reactor");
    let handle = reactor.handle();
    (reactor, handle)
}

/// Runs the reactor to completion and asserts the quit code; tests quit
/// from their own handlers.
pub fn run_expect(reactor: &mut Reactor, code: i32) {
    assert_eq!(reactor.run().expect("reactor failed"), code);
}

/// A packet sink that records every packet it swallows and completes
/// immediately.
pub struct RecordingSink {
    pub input: PacketPassInterface,
    packets: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl RecordingSink {
    pub fn new(handle: &Handle, mtu: usize) -> RecordingSink {
        let packets: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
        let input = Rc::new(RefCell::new(None::<PacketPassInterface>));
        let iface = PacketPassInterface::new(handle, mtu, {
            let packets = packets.clone();
            let input = input.clone();
            move |packet: Buffer| {
                packets.borrow_mut().push(packet.bytes().to_vec());
                let iface = input.borrow().clone().expect("sink not wired");
                iface.done(packet);
            }
        });
        *input.borrow_mut() = Some(iface.clone());
        RecordingSink {
            input: iface,
            packets,
        }
    }

    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.packets.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.packets.borrow().len()
    }
}

/// A packet source that yields queued packets and then stalls.
pub struct ScriptedSource {
    pub output: PacketRecvInterface,
    queue: Rc<RefCell<ScriptedState>>,
}

struct ScriptedState {
    output: Option<PacketRecvInterface>,
    queued: Vec<Vec<u8>>,
    // A receive that arrived while the script was empty.
    parked: Option<Buffer>,
}

impl ScriptedSource {
    pub fn new(handle: &Handle, mtu: usize) -> ScriptedSource {
        let queue = Rc::new(RefCell::new(ScriptedState {
            output: None,
            queued: Vec::new(),
            parked: None,
        }));
        let output = PacketRecvInterface::new(handle, mtu, {
            let queue = queue.clone();
            move |mut buf: Buffer| {
                let mut q = queue.borrow_mut();
                if q.queued.is_empty() {
                    q.parked = Some(buf);
                    return;
                }
                let packet = q.queued.remove(0);
                buf.append(&packet);
                let output = q.output.clone().expect("source not wired");
                drop(q);
                output.done(buf, packet.len());
            }
        });
        queue.borrow_mut().output = Some(output.clone());
        ScriptedSource { output, queue }
    }

    /// Queues a packet, serving a parked receive if one is waiting.
    pub fn push(&self, packet: &[u8]) {
        let mut q = self.queue.borrow_mut();
        q.queued.push(packet.to_vec());
        if let Some(mut buf) = q.parked.take() {
            let packet = q.queued.remove(0);
            buf.append(&packet);
            let output = q.output.clone().expect("source not wired");
            drop(q);
            output.done(buf, packet.len());
        }
    }
}
