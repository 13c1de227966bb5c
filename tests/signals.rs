use std::cell::RefCell;
use std::rc::Rc;

use flowio::UnixSignals;

mod util;
use util::{init_with_reactor, run_expect};

#[test]
fn blocked_signal_is_delivered_through_the_reactor() {
    let (mut reactor, handle) = init_with_reactor();

    let got = Rc::new(RefCell::new(Vec::new()));
    let signals = UnixSignals::new(&handle, &[libc::SIGUSR1], {
        let got = got.clone();
        let handle = handle.clone();
        move |signal| {
            got.borrow_mut().push(signal);
            handle.quit(0);
        }
    })
    .unwrap();

    // SIGUSR1 is blocked now; raising it leaves it pending on the
    // signalfd until the reactor reads it.
    unsafe {
        libc::pthread_kill(libc::pthread_self(), libc::SIGUSR1);
    }

    run_expect(&mut reactor, 0);
    assert_eq!(*got.borrow(), vec![libc::SIGUSR1]);
    drop(signals);
}
