use std::cell::RefCell;
use std::net::UdpSocket;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

use flowio::flow::{
    DatagramSocketSink, DatagramSocketSource, StreamSocketSink, StreamSocketSource,
};
use flowio::net::Socket;
use flowio::Buffer;

mod util;
use util::{init_with_reactor, run_expect};

#[test]
fn datagrams_flow_between_two_sockets() {
    let (mut reactor, handle) = init_with_reactor();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    let receiver_addr = receiver.local_addr().unwrap();
    let sender_addr = sender.local_addr().unwrap();

    let sender_socket = Socket::new(&handle, sender).unwrap();
    let receiver_socket = Socket::new(&handle, receiver).unwrap();

    let sink = DatagramSocketSink::new(
        &handle,
        &sender_socket,
        1024,
        Some(receiver_addr),
        |err| panic!("sink error: {}", err),
    );
    let source = DatagramSocketSource::new(&handle, &receiver_socket, 1024, |err| {
        panic!("source error: {}", err)
    });

    let received: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
    source.output().init_receiver({
        let received = received.clone();
        let output = source.output().clone();
        let handle = handle.clone();
        move |mut buf: Buffer, len| {
            received.borrow_mut().push(buf.bytes()[buf.len() - len..].to_vec());
            if received.borrow().len() == 2 {
                handle.quit(0);
            } else {
                buf.clear();
                output.recv(buf);
            }
        }
    });
    source.output().recv(Buffer::with_capacity(1024));

    let pending: Rc<RefCell<Vec<Vec<u8>>>> =
        Rc::new(RefCell::new(vec![b"second datagram".to_vec()]));
    sink.input().init_sender({
        let pending = pending.clone();
        let input = sink.input().clone();
        move |mut packet: Buffer| {
            let mut pending = pending.borrow_mut();
            if !pending.is_empty() {
                let next = pending.remove(0);
                packet.clear();
                packet.append(&next);
                drop(pending);
                input.send(packet);
            }
        }
    });

    let mut first = Buffer::with_capacity(1024);
    first.append(b"first datagram");
    sink.input().send(first);

    run_expect(&mut reactor, 0);
    assert_eq!(
        *received.borrow(),
        vec![b"first datagram".to_vec(), b"second datagram".to_vec()],
    );
    assert_eq!(source.last_remote(), Some(sender_addr));
}

#[test]
fn streams_carry_bytes_with_short_transfers() {
    let (mut reactor, handle) = init_with_reactor();

    let (write_end, read_end) = UnixStream::pair().unwrap();
    let write_socket = Socket::new(&handle, write_end).unwrap();
    let read_socket = Socket::new(&handle, read_end).unwrap();

    let sink = StreamSocketSink::new(&handle, &write_socket, |err| {
        panic!("sink error: {}", err)
    });
    let source = StreamSocketSource::new(&handle, &read_socket, |err| {
        panic!("source error: {}", err)
    });

    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

    // Writer: re-issue until the whole payload is consumed.
    sink.input().init_sender({
        let input = sink.input().clone();
        move |buf: Buffer, _len| {
            if !buf.is_empty() {
                input.send(buf);
            }
        }
    });
    sink.input().send(Buffer::from_slice(&payload));

    // Reader: accumulate in small pieces until everything arrived.
    let collected: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let want = payload.len();
    source.output().init_receiver({
        let collected = collected.clone();
        let output = source.output().clone();
        let handle = handle.clone();
        move |mut buf: Buffer, _len| {
            collected.borrow_mut().extend_from_slice(buf.bytes());
            buf.clear();
            if collected.borrow().len() >= want {
                handle.quit(0);
            } else {
                output.recv(buf);
            }
        }
    });
    source.output().recv(Buffer::with_capacity(128));

    run_expect(&mut reactor, 0);
    assert_eq!(*collected.borrow(), payload);
}

/// A sink without a remote address uses plain `send` on a connected
/// socket, the same shape a seqpacket socket presents.
#[test]
fn connected_mode_uses_plain_send() {
    let (mut reactor, handle) = init_with_reactor();

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.connect(receiver.local_addr().unwrap()).unwrap();

    let sender_socket = Socket::new(&handle, sender).unwrap();
    let receiver_socket = Socket::new(&handle, receiver).unwrap();

    let sink = DatagramSocketSink::new(&handle, &sender_socket, 64, None, |err| {
        panic!("sink error: {}", err)
    });
    let source = DatagramSocketSource::new(&handle, &receiver_socket, 64, |err| {
        panic!("source error: {}", err)
    });

    source.output().init_receiver({
        let handle = handle.clone();
        move |buf: Buffer, _len| {
            assert_eq!(buf.bytes(), b"connected");
            handle.quit(0);
        }
    });
    source.output().recv(Buffer::with_capacity(64));

    sink.input().init_sender(|_packet| {});
    sink.input().send(Buffer::from_slice(b"connected"));

    run_expect(&mut reactor, 0);
}
