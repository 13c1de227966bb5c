use std::cell::RefCell;
use std::rc::Rc;

use flowio::flow::{PacketPassInterface, PacketRecvInterface, StreamPassInterface};
use flowio::Buffer;

mod util;
use util::{init_with_reactor, run_expect};

#[test]
fn send_completes_through_jobs() {
    let (mut reactor, handle) = init_with_reactor();
    let provider_saw = Rc::new(RefCell::new(Vec::new()));

    let iface = Rc::new(RefCell::new(None::<PacketPassInterface>));
    let provider = PacketPassInterface::new(&handle, 16, {
        let provider_saw = provider_saw.clone();
        let iface = iface.clone();
        move |packet: Buffer| {
            provider_saw.borrow_mut().push(packet.bytes().to_vec());
            iface.borrow().as_ref().unwrap().done(packet);
        }
    });
    *iface.borrow_mut() = Some(provider.clone());

    provider.init_sender({
        let handle = handle.clone();
        move |packet: Buffer| {
            // The buffer comes back to the sender once done.
            assert_eq!(packet.capacity(), 3);
            handle.quit(0);
        }
    });
    provider.send(Buffer::from_slice(&[1, 2, 3]));

    run_expect(&mut reactor, 0);
    assert_eq!(*provider_saw.borrow(), vec![vec![1, 2, 3]]);
}

#[test]
fn zero_length_packet_is_legal() {
    let (mut reactor, handle) = init_with_reactor();

    let iface = Rc::new(RefCell::new(None::<PacketPassInterface>));
    let provider = PacketPassInterface::new(&handle, 16, {
        let iface = iface.clone();
        move |packet: Buffer| {
            assert!(packet.is_empty());
            iface.borrow().as_ref().unwrap().done(packet);
        }
    });
    *iface.borrow_mut() = Some(provider.clone());

    provider.init_sender({
        let handle = handle.clone();
        move |_packet| handle.quit(0)
    });
    provider.send(Buffer::with_capacity(16));

    run_expect(&mut reactor, 0);
}

#[test]
#[should_panic(expected = "operation already in progress")]
fn double_send_asserts() {
    let (_reactor, handle) = init_with_reactor();

    let provider = PacketPassInterface::new(&handle, 16, |_packet| {});
    provider.init_sender(|_packet| {});
    provider.send(Buffer::from_slice(&[1]));
    provider.send(Buffer::from_slice(&[2]));
}

#[test]
#[should_panic(expected = "packet exceeds MTU")]
fn oversize_send_asserts() {
    let (_reactor, handle) = init_with_reactor();

    let provider = PacketPassInterface::new(&handle, 2, |_packet| {});
    provider.init_sender(|_packet| {});
    provider.send(Buffer::from_slice(&[1, 2, 3]));
}

#[test]
fn cancel_before_the_provider_sees_the_packet() {
    let (mut reactor, handle) = init_with_reactor();
    let provider_called = Rc::new(RefCell::new(false));

    let provider = PacketPassInterface::new(&handle, 16, {
        let provider_called = provider_called.clone();
        move |_packet| *provider_called.borrow_mut() = true
    });
    provider.enable_cancel(|| panic!("cancel handler for an unseen packet"));

    let done = Rc::new(RefCell::new(0));
    provider.init_sender({
        let done = done.clone();
        let handle = handle.clone();
        move |_packet| {
            *done.borrow_mut() += 1;
            handle.quit(0);
        }
    });

    provider.send(Buffer::from_slice(&[9]));
    // Still OPERATION_PENDING: the job has not run yet.
    provider.request_cancel();

    run_expect(&mut reactor, 0);
    assert!(!*provider_called.borrow());
    assert_eq!(*done.borrow(), 1);
}

#[test]
fn cancel_while_busy_reaches_the_provider() {
    let (mut reactor, handle) = init_with_reactor();

    let iface = Rc::new(RefCell::new(None::<PacketPassInterface>));
    let parked = Rc::new(RefCell::new(None::<Buffer>));
    let cancelled = Rc::new(RefCell::new(false));

    let provider = PacketPassInterface::new(&handle, 16, {
        let parked = parked.clone();
        move |packet| *parked.borrow_mut() = Some(packet)
    });
    provider.enable_cancel({
        let parked = parked.clone();
        let cancelled = cancelled.clone();
        let iface = iface.clone();
        move || {
            *cancelled.borrow_mut() = true;
            let packet = parked.borrow_mut().take().expect("nothing parked");
            iface.borrow().as_ref().unwrap().done(packet);
        }
    });
    *iface.borrow_mut() = Some(provider.clone());

    let done = Rc::new(RefCell::new(0));
    provider.init_sender({
        let done = done.clone();
        let handle = handle.clone();
        move |_packet| {
            *done.borrow_mut() += 1;
            handle.quit(0);
        }
    });

    provider.send(Buffer::from_slice(&[9]));
    // Cancel once the operation is BUSY, from inside the loop.
    let canceller = flowio::Pending::new(&handle, {
        let provider = provider.clone();
        move || provider.request_cancel()
    });
    canceller.set();

    run_expect(&mut reactor, 0);
    assert!(*cancelled.borrow());
    assert_eq!(*done.borrow(), 1);
}

#[test]
fn packet_recv_appends_into_the_buffer() {
    let (mut reactor, handle) = init_with_reactor();

    let iface = Rc::new(RefCell::new(None::<PacketRecvInterface>));
    let provider = PacketRecvInterface::new(&handle, 4, {
        let iface = iface.clone();
        move |mut buf: Buffer| {
            buf.append(&[7, 8]);
            iface.borrow().as_ref().unwrap().done(buf, 2);
        }
    });
    *iface.borrow_mut() = Some(provider.clone());

    provider.init_receiver({
        let handle = handle.clone();
        move |buf: Buffer, len| {
            assert_eq!(len, 2);
            // Pre-existing contents stay put; the packet is appended.
            assert_eq!(buf.bytes(), &[0xFF, 7, 8]);
            handle.quit(0);
        }
    });

    let mut buf = Buffer::with_capacity(8);
    buf.append(&[0xFF]);
    provider.recv(buf);

    run_expect(&mut reactor, 0);
}

#[test]
fn stream_send_advances_by_the_consumed_length() {
    let (mut reactor, handle) = init_with_reactor();
    let consumed = Rc::new(RefCell::new(Vec::new()));

    let iface = Rc::new(RefCell::new(None::<StreamPassInterface>));
    let provider = StreamPassInterface::new(&handle, {
        let consumed = consumed.clone();
        let iface = iface.clone();
        move |buf: Buffer| {
            // A short write of one byte per operation.
            consumed.borrow_mut().push(buf.bytes()[0]);
            iface.borrow().as_ref().unwrap().done(buf, 1);
        }
    });
    *iface.borrow_mut() = Some(provider.clone());

    provider.init_sender({
        let provider = provider.clone();
        let handle = handle.clone();
        move |buf: Buffer, len| {
            assert_eq!(len, 1);
            if buf.is_empty() {
                handle.quit(0);
            } else {
                provider.send(buf);
            }
        }
    });
    provider.send(Buffer::from_slice(&[10, 11, 12]));

    run_expect(&mut reactor, 0);
    assert_eq!(*consumed.borrow(), vec![10, 11, 12]);
}
