use std::cell::RefCell;
use std::net::UdpSocket;
use std::os::fd::AsRawFd;
use std::rc::Rc;

use flowio::{FdWatcher, Readiness};

mod util;
use util::{init_with_reactor, run_expect};

#[test]
fn watcher_delivers_readable() {
    let (mut reactor, handle) = init_with_reactor();

    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver.set_nonblocking(true).unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.connect(receiver.local_addr().unwrap()).unwrap();

    let got = Rc::new(RefCell::new(Vec::new()));
    let watcher = {
        let got = got.clone();
        let handle = handle.clone();
        let receiver = Rc::new(receiver);
        let receiver2 = receiver.clone();
        let watcher = FdWatcher::new(&handle.clone(), receiver.as_raw_fd(), move |readiness: Readiness| {
            assert!(readiness.is_readable());
            let mut buf = [0u8; 64];
            let n = receiver2.recv(&mut buf).unwrap();
            got.borrow_mut().extend_from_slice(&buf[..n]);
            handle.quit(0);
        })
        .unwrap();
        watcher.set_events(Readiness::READABLE).unwrap();
        watcher
    };

    sender.send(b"ping").unwrap();

    run_expect(&mut reactor, 0);
    assert_eq!(&*got.borrow(), b"ping");
    drop(watcher);
}

#[test]
fn events_can_be_changed_and_cleared() {
    let (mut reactor, handle) = init_with_reactor();

    let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
    receiver.set_nonblocking(true).unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.connect(receiver.local_addr().unwrap()).unwrap();

    let fired = Rc::new(RefCell::new(false));
    let watcher = FdWatcher::new(&handle, receiver.as_raw_fd(), {
        let fired = fired.clone();
        move |_readiness| *fired.borrow_mut() = true
    })
    .unwrap();
    // Readable data with no requested events stays silent.
    watcher.set_events(Readiness::READABLE).unwrap();
    watcher.set_events(Readiness::EMPTY).unwrap();
    assert_eq!(watcher.events(), Readiness::EMPTY);

    sender.send(b"x").unwrap();

    // Give the reactor a moment of real time, then stop.
    let quitter = flowio::Timer::new(&handle, std::time::Duration::from_millis(30), {
        let handle = handle.clone();
        move || handle.quit(0)
    });
    quitter.set();

    run_expect(&mut reactor, 0);
    assert!(!*fired.borrow());
}
