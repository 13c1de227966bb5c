use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flowio::threadwork::{Work, WorkDispatcher};

mod util;
use util::{init_with_reactor, run_expect};

#[test]
fn completions_arrive_on_the_reactor_thread() {
    let (mut reactor, handle) = init_with_reactor();
    let dispatcher = WorkDispatcher::new(&handle, 2).unwrap();
    assert!(dispatcher.using_threads());

    let computed = Arc::new(AtomicUsize::new(0));
    let delivered = Rc::new(RefCell::new(0));

    let works: Vec<Work> = (0..4)
        .map(|index| {
            let computed = computed.clone();
            let delivered = delivered.clone();
            let handle = handle.clone();
            Work::new(
                &dispatcher,
                move || {
                    // Worker thread: CPU-ish work, no reactor access.
                    computed.fetch_add(index * index, Ordering::SeqCst);
                },
                move || {
                    let mut delivered = delivered.borrow_mut();
                    *delivered += 1;
                    if *delivered == 4 {
                        handle.quit(0);
                    }
                },
            )
        })
        .collect();

    run_expect(&mut reactor, 0);
    assert_eq!(computed.load(Ordering::SeqCst), 0 + 1 + 4 + 9);
    assert_eq!(*delivered.borrow(), 4);
    drop(works);
}

#[test]
fn zero_threads_runs_work_in_reactor_jobs() {
    let (mut reactor, handle) = init_with_reactor();
    let dispatcher = WorkDispatcher::new(&handle, 0).unwrap();
    assert!(!dispatcher.using_threads());

    let computed = Rc::new(RefCell::new(0));
    let _work = Work::new(
        &dispatcher,
        {
            // With no workers this runs on the reactor thread, but the
            // closure still satisfies the Send bound.
            let value = 21;
            move || {
                let _ = value * 2;
            }
        },
        {
            let computed = computed.clone();
            let handle = handle.clone();
            move || {
                *computed.borrow_mut() = 42;
                handle.quit(0);
            }
        },
    );

    run_expect(&mut reactor, 0);
    assert_eq!(*computed.borrow(), 42);
}

#[test]
fn dropping_a_work_prevents_its_completion() {
    let (mut reactor, handle) = init_with_reactor();
    let dispatcher = WorkDispatcher::new(&handle, 1).unwrap();

    let blocked_done = Rc::new(RefCell::new(false));
    let work = Work::new(
        &dispatcher,
        || {},
        {
            let blocked_done = blocked_done.clone();
            move || *blocked_done.borrow_mut() = true
        },
    );
    // Dropping blocks until the function has run or never will, and
    // guarantees the completion handler is not called.
    drop(work);

    let survivor_done = Rc::new(RefCell::new(false));
    let _survivor = Work::new(
        &dispatcher,
        || {},
        {
            let survivor_done = survivor_done.clone();
            let handle = handle.clone();
            move || {
                *survivor_done.borrow_mut() = true;
                handle.quit(0);
            }
        },
    );

    run_expect(&mut reactor, 0);
    assert!(!*blocked_done.borrow());
    assert!(*survivor_done.borrow());
}
