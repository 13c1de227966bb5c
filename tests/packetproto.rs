use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use flowio::flow::{
    PacketPassInterface, PacketProtoDecoder, PacketProtoDecoderError, PacketProtoEncoder,
    StreamRecvInterface,
};
use flowio::{Buffer, Handle};

mod util;
use util::{init_with_reactor, run_expect, ScriptedSource};

/// A stream source yielding its bytes in fixed-size pieces, one piece per
/// receive. Stalls once drained.
struct ChunkedStreamSource {
    output: StreamRecvInterface,
}

impl ChunkedStreamSource {
    fn new(handle: &Handle, data: &[u8], piece: usize) -> ChunkedStreamSource {
        let pending: Rc<RefCell<VecDeque<u8>>> = Rc::new(RefCell::new(data.iter().copied().collect()));
        let iface = Rc::new(RefCell::new(None::<StreamRecvInterface>));
        let output = StreamRecvInterface::new(handle, {
            let pending = pending.clone();
            let iface = iface.clone();
            move |mut buf: Buffer| {
                let mut pending = pending.borrow_mut();
                if pending.is_empty() {
                    return; // stall forever
                }
                let mut fed = 0;
                while fed < piece && buf.spare_len() > 0 {
                    match pending.pop_front() {
                        Some(byte) => {
                            buf.append(&[byte]);
                            fed += 1;
                        }
                        None => break,
                    }
                }
                let iface = iface.borrow().clone().expect("source not wired");
                drop(pending);
                iface.done(buf, fed);
            }
        });
        *iface.borrow_mut() = Some(output.clone());
        ChunkedStreamSource { output }
    }
}

/// Drives the encoder's pull output and collects the emitted byte stream.
fn collect_encoded(handle: &Handle, encoder: &PacketProtoEncoder, frames: usize) -> Rc<RefCell<Vec<u8>>> {
    let collected: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let output = encoder.output().clone();
    output.init_receiver({
        let collected = collected.clone();
        let output = output.clone();
        let handle = handle.clone();
        let mut seen = 0;
        move |mut buf: Buffer, _len| {
            collected.borrow_mut().extend_from_slice(buf.bytes());
            seen += 1;
            if seen == frames {
                handle.quit(0);
            } else {
                buf.clear();
                output.recv(buf);
            }
        }
    });
    output.recv(Buffer::with_capacity(output.mtu()));
    collected
}

#[test]
fn encoder_emits_the_expected_stream() {
    let (mut reactor, handle) = init_with_reactor();

    let source = ScriptedSource::new(&handle, 16);
    let encoder = PacketProtoEncoder::new(&handle, &source.output);
    let collected = collect_encoded(&handle, &encoder, 3);

    source.push(&[0x41]);
    source.push(&[]);
    source.push(&[0x42, 0x43]);

    run_expect(&mut reactor, 0);
    assert_eq!(
        *collected.borrow(),
        vec![0x01, 0x00, 0x41, 0x00, 0x00, 0x02, 0x00, 0x42, 0x43],
    );
}

#[test]
fn decoder_handles_one_byte_chunking() {
    let (mut reactor, handle) = init_with_reactor();

    let stream = [0x01, 0x00, 0x41, 0x00, 0x00, 0x02, 0x00, 0x42, 0x43];
    let source = ChunkedStreamSource::new(&handle, &stream, 1);

    let packets: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
    let iface = Rc::new(RefCell::new(None::<PacketPassInterface>));
    let output = PacketPassInterface::new(&handle, 16, {
        let packets = packets.clone();
        let iface = iface.clone();
        let handle = handle.clone();
        move |packet: Buffer| {
            let mut packets = packets.borrow_mut();
            packets.push(packet.bytes().to_vec());
            if packets.len() == 3 {
                handle.quit(0);
            }
            drop(packets);
            iface.borrow().as_ref().unwrap().done(packet);
        }
    });
    *iface.borrow_mut() = Some(output.clone());

    let _decoder = PacketProtoDecoder::new(&handle, &source.output, &output, |err| {
        panic!("unexpected decoder error: {}", err)
    });

    run_expect(&mut reactor, 0);
    assert_eq!(
        *packets.borrow(),
        vec![vec![0x41], vec![], vec![0x42, 0x43]],
    );
}

#[test]
fn decoder_round_trips_various_chunkings() {
    for piece in [1usize, 2, 3, 5, 9] {
        let (mut reactor, handle) = init_with_reactor();

        let frames: Vec<Vec<u8>> = vec![
            b"hello".to_vec(),
            Vec::new(),
            vec![0xFF; 12],
            b"x".to_vec(),
        ];
        let mut stream = Vec::new();
        for frame in &frames {
            stream.extend_from_slice(&(frame.len() as u16).to_le_bytes());
            stream.extend_from_slice(frame);
        }

        let source = ChunkedStreamSource::new(&handle, &stream, piece);

        let packets: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
        let iface = Rc::new(RefCell::new(None::<PacketPassInterface>));
        let want = frames.len();
        let output = PacketPassInterface::new(&handle, 16, {
            let packets = packets.clone();
            let iface = iface.clone();
            let handle = handle.clone();
            move |packet: Buffer| {
                let mut packets = packets.borrow_mut();
                packets.push(packet.bytes().to_vec());
                if packets.len() == want {
                    handle.quit(0);
                }
                drop(packets);
                iface.borrow().as_ref().unwrap().done(packet);
            }
        });
        *iface.borrow_mut() = Some(output.clone());

        let _decoder = PacketProtoDecoder::new(&handle, &source.output, &output, |err| {
            panic!("unexpected decoder error: {}", err)
        });

        run_expect(&mut reactor, 0);
        assert_eq!(*packets.borrow(), frames, "piece size {}", piece);
    }
}

#[test]
fn oversize_length_is_a_fatal_error() {
    let (mut reactor, handle) = init_with_reactor();

    // Header declares 100 bytes; the downstream MTU is 16.
    let source = ChunkedStreamSource::new(&handle, &[100, 0x00, 1, 2, 3], 5);

    let output = PacketPassInterface::new(&handle, 16, |_packet| {
        panic!("no packet should be extracted")
    });

    let errored = Rc::new(RefCell::new(None));
    let _decoder = PacketProtoDecoder::new(&handle, &source.output, &output, {
        let errored = errored.clone();
        let handle = handle.clone();
        move |err| {
            *errored.borrow_mut() = Some(err);
            handle.quit(7);
        }
    });

    run_expect(&mut reactor, 7);
    assert_eq!(
        *errored.borrow(),
        Some(PacketProtoDecoderError::PacketTooLong),
    );
}
