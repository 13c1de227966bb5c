use std::cell::RefCell;
use std::rc::Rc;

use flowio::flow::{PacketStreamSender, StreamPacketSender, StreamPassInterface};
use flowio::{Buffer, Handle};

mod util;
use util::{init_with_reactor, run_expect, RecordingSink};

/// A stream sink accepting at most `per_op` bytes per operation.
struct SlowStreamSink {
    input: StreamPassInterface,
    written: Rc<RefCell<Vec<u8>>>,
    ops: Rc<RefCell<usize>>,
}

impl SlowStreamSink {
    fn new(handle: &Handle, per_op: usize) -> SlowStreamSink {
        let written: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
        let ops = Rc::new(RefCell::new(0));
        let iface = Rc::new(RefCell::new(None::<StreamPassInterface>));
        let input = StreamPassInterface::new(handle, {
            let written = written.clone();
            let ops = ops.clone();
            let iface = iface.clone();
            move |buf: Buffer| {
                let len = buf.len().min(per_op);
                written.borrow_mut().extend_from_slice(&buf.bytes()[..len]);
                *ops.borrow_mut() += 1;
                iface.borrow().as_ref().unwrap().done(buf, len);
            }
        });
        *iface.borrow_mut() = Some(input.clone());
        SlowStreamSink {
            input,
            written,
            ops,
        }
    }
}

#[test]
fn packet_stream_sender_reissues_after_short_writes() {
    let (mut reactor, handle) = init_with_reactor();

    let sink = SlowStreamSink::new(&handle, 1);
    let sender = PacketStreamSender::new(&handle, &sink.input, 32);

    sender.input().init_sender({
        let handle = handle.clone();
        move |_packet| handle.quit(0)
    });
    sender.input().send(Buffer::from_slice(b"stream me"));

    run_expect(&mut reactor, 0);
    assert_eq!(&*sink.written.borrow(), b"stream me");
    // One byte per operation means one operation per byte.
    assert_eq!(*sink.ops.borrow(), b"stream me".len());
}

#[test]
fn packet_stream_sender_completes_empty_packets_without_output() {
    let (mut reactor, handle) = init_with_reactor();

    let sink = SlowStreamSink::new(&handle, 8);
    let sender = PacketStreamSender::new(&handle, &sink.input, 32);

    sender.input().init_sender({
        let handle = handle.clone();
        move |_packet| handle.quit(0)
    });
    sender.input().send(Buffer::with_capacity(32));

    run_expect(&mut reactor, 0);
    assert!(sink.written.borrow().is_empty());
    assert_eq!(*sink.ops.borrow(), 0);
}

#[test]
fn stream_packet_sender_clamps_to_the_output_mtu() {
    let (mut reactor, handle) = init_with_reactor();

    let sink = RecordingSink::new(&handle, 4);
    let sender = StreamPacketSender::new(&handle, &sink.input);

    sender.input().init_sender({
        let input = sender.input().clone();
        let handle = handle.clone();
        move |buf: Buffer, _len| {
            if buf.is_empty() {
                handle.quit(0);
            } else {
                input.send(buf);
            }
        }
    });
    sender.input().send(Buffer::from_slice(b"0123456789"));

    run_expect(&mut reactor, 0);
    assert_eq!(
        sink.packets(),
        vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()],
    );
}
