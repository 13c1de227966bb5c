use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use flowio::flow::{
    PacketBuffer, PacketCopier, PacketPassNotifier, PacketRecvConnector, SinglePacketBuffer,
};
use flowio::{Buffer, Handle, Timer};

mod util;
use util::{init_with_reactor, run_expect, RecordingSink, ScriptedSource};

/// Quits after a grace period of real time; for pipelines whose completion
/// cascades fan out instead of ending in one place.
fn quit_after(handle: &Handle, millis: u64) -> Timer {
    let timer = Timer::new(handle, Duration::from_millis(millis), {
        let handle = handle.clone();
        move || handle.quit(0)
    });
    timer.set();
    timer
}

#[test]
fn copier_rendezvouses_push_and_pull() {
    let (mut reactor, handle) = init_with_reactor();

    let copier = PacketCopier::new(&handle, 16);
    let sink = RecordingSink::new(&handle, 16);
    let _pump = SinglePacketBuffer::new(&handle, copier.output(), &sink.input);

    let sent = Rc::new(RefCell::new(0));
    copier.input().init_sender({
        let copier_input = copier.input().clone();
        let sent = sent.clone();
        move |mut packet: Buffer| {
            let mut sent = sent.borrow_mut();
            *sent += 1;
            if *sent < 3 {
                packet.clear();
                packet.append(&[*sent as u8 + 1, 0xAA]);
                copier_input.send(packet);
            }
        }
    });
    copier.input().send(Buffer::from_slice(&[0x01, 0xAA]));

    let _quitter = quit_after(&handle, 30);
    run_expect(&mut reactor, 0);
    assert_eq!(
        sink.packets(),
        vec![vec![0x01, 0xAA], vec![0x02, 0xAA], vec![0x03, 0xAA]],
    );
}

#[test]
fn copier_composed_with_itself_is_a_copier() {
    let (mut reactor, handle) = init_with_reactor();

    // push -> copier -> pump -> copier -> pump -> sink is observationally
    // one copier.
    let first = PacketCopier::new(&handle, 8);
    let second = PacketCopier::new(&handle, 8);
    let sink = RecordingSink::new(&handle, 8);
    let _pump_a = SinglePacketBuffer::new(&handle, first.output(), second.input());
    let _pump_b = SinglePacketBuffer::new(&handle, second.output(), &sink.input);

    first.input().init_sender(|_packet| {});
    first.input().send(Buffer::from_slice(&[0xDE, 0xAD]));

    let _quitter = quit_after(&handle, 30);
    run_expect(&mut reactor, 0);
    assert_eq!(sink.packets(), vec![vec![0xDE, 0xAD]]);
}

#[test]
fn notifier_observes_every_packet() {
    let (mut reactor, handle) = init_with_reactor();

    let sink = RecordingSink::new(&handle, 8);
    let notifier = PacketPassNotifier::new(&handle, &sink.input);

    let seen = Rc::new(RefCell::new(Vec::new()));
    notifier.set_handler({
        let seen = seen.clone();
        move |bytes: &[u8]| seen.borrow_mut().push(bytes.to_vec())
    });

    notifier.input().init_sender({
        let handle = handle.clone();
        move |_packet| handle.quit(0)
    });
    notifier.input().send(Buffer::from_slice(&[5, 6, 7]));

    run_expect(&mut reactor, 0);
    assert_eq!(*seen.borrow(), vec![vec![5, 6, 7]]);
    assert_eq!(sink.packets(), vec![vec![5, 6, 7]]);
}

#[test]
fn recv_connector_forwards_a_parked_request_on_attach() {
    let (mut reactor, handle) = init_with_reactor();

    let connector = PacketRecvConnector::new(&handle, 64);

    let got = Rc::new(RefCell::new(Vec::new()));
    connector.output().init_receiver({
        let got = got.clone();
        let handle = handle.clone();
        move |buf: Buffer, len| {
            got.borrow_mut().push(buf.bytes()[buf.len() - len..].to_vec());
            handle.quit(0);
        }
    });

    // Request while detached; the buffer parks in the connector.
    connector.output().recv(Buffer::with_capacity(64));

    // Attaching an input forwards the parked request.
    let source = ScriptedSource::new(&handle, 64);
    source.push(b"late bound");
    connector.connect_input(&source.output);

    run_expect(&mut reactor, 0);
    assert_eq!(*got.borrow(), vec![b"late bound".to_vec()]);
}

#[test]
fn single_packet_buffer_pumps_packets() {
    let (mut reactor, handle) = init_with_reactor();

    let source = ScriptedSource::new(&handle, 8);
    let sink = RecordingSink::new(&handle, 8);
    let _pump = SinglePacketBuffer::new(&handle, &source.output, &sink.input);

    source.push(&[1]);
    source.push(&[2, 2]);
    source.push(&[]);

    let _quitter = quit_after(&handle, 30);
    run_expect(&mut reactor, 0);
    assert_eq!(sink.packets(), vec![vec![1], vec![2, 2], vec![]]);
}

#[test]
fn packet_buffer_absorbs_a_burst() {
    let (mut reactor, handle) = init_with_reactor();

    let source = ScriptedSource::new(&handle, 4);
    let sink = RecordingSink::new(&handle, 4);
    let _buffer = PacketBuffer::new(&handle, &source.output, &sink.input, 4);

    for index in 0..8u8 {
        source.push(&[index]);
    }

    let _quitter = quit_after(&handle, 30);
    run_expect(&mut reactor, 0);
    let packets = sink.packets();
    assert_eq!(packets.len(), 8);
    for (index, packet) in packets.iter().enumerate() {
        assert_eq!(packet, &vec![index as u8]);
    }
}
