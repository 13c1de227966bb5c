use std::cell::RefCell;
use std::rc::Rc;

use flowio::{EventLock, EventLockJob};

mod util;
use util::{init_with_reactor, run_expect};

#[test]
fn waiters_are_served_in_fifo_order() {
    let (mut reactor, handle) = init_with_reactor();

    let lock = EventLock::new(&handle);
    let order = Rc::new(RefCell::new(Vec::new()));

    // Each job records its turn and releases from a follow-up job, like a
    // node that holds the lock for one round of work.
    let jobs: Rc<RefCell<Vec<EventLockJob>>> = Rc::new(RefCell::new(Vec::new()));
    let releasers = Rc::new(RefCell::new(Vec::new()));
    for index in 0..3 {
        let job = EventLockJob::new(&lock, {
            let order = order.clone();
            let releasers = releasers.clone();
            let jobs = jobs.clone();
            let handle = handle.clone();
            move || {
                order.borrow_mut().push(index);
                let release = flowio::Pending::new(&handle, {
                    let jobs = jobs.clone();
                    let handle = handle.clone();
                    let order = order.clone();
                    move || {
                        jobs.borrow()[index].release();
                        if order.borrow().len() == 3 {
                            handle.quit(0);
                        }
                    }
                });
                release.set();
                releasers.borrow_mut().push(release);
            }
        });
        jobs.borrow_mut().push(job);
    }

    for job in jobs.borrow().iter() {
        job.wait();
    }

    run_expect(&mut reactor, 0);
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

#[test]
fn aborting_a_waiter_skips_it() {
    let (mut reactor, handle) = init_with_reactor();

    let lock = EventLock::new(&handle);
    let order = Rc::new(RefCell::new(Vec::new()));

    let holder = EventLockJob::new(&lock, {
        let order = order.clone();
        move || order.borrow_mut().push("holder")
    });
    let aborted = EventLockJob::new(&lock, || panic!("aborted job must not run"));
    let last = EventLockJob::new(&lock, {
        let order = order.clone();
        let handle = handle.clone();
        move || {
            order.borrow_mut().push("last");
            handle.quit(0);
        }
    });

    holder.wait();
    aborted.wait();
    last.wait();
    // Abort the middle waiter before it is served.
    aborted.release();

    // Let the holder give the lock up once it has it.
    let release_holder = flowio::Timer::new(&handle, std::time::Duration::from_millis(10), {
        move || holder.release()
    });
    release_holder.set();

    run_expect(&mut reactor, 0);
    assert_eq!(*order.borrow(), vec!["holder", "last"]);
    last.release();
}

#[test]
fn dropping_the_head_passes_the_lock_on() {
    let (mut reactor, handle) = init_with_reactor();

    let lock = EventLock::new(&handle);
    let served = Rc::new(RefCell::new(false));

    let head = EventLockJob::new(&lock, || {});
    let next = EventLockJob::new(&lock, {
        let served = served.clone();
        let handle = handle.clone();
        move || {
            *served.borrow_mut() = true;
            handle.quit(0);
        }
    });

    head.wait();
    next.wait();
    drop(head);

    run_expect(&mut reactor, 0);
    assert!(*served.borrow());
    next.release();
}
