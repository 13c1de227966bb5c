use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use flowio::Timer;

mod util;
use util::{init_with_reactor, run_expect};

#[test]
fn timers_fire_in_deadline_order() {
    let (mut reactor, handle) = init_with_reactor();
    let order = Rc::new(RefCell::new(Vec::new()));

    let slow = Timer::new(&handle, Duration::from_millis(40), {
        let order = order.clone();
        let handle = handle.clone();
        move || {
            order.borrow_mut().push("slow");
            handle.quit(0);
        }
    });
    let fast = Timer::new(&handle, Duration::from_millis(5), {
        let order = order.clone();
        move || order.borrow_mut().push("fast")
    });

    // Armed in the "wrong" order; deadlines decide.
    slow.set();
    fast.set();

    run_expect(&mut reactor, 0);
    assert_eq!(*order.borrow(), vec!["fast", "slow"]);
}

#[test]
fn equal_deadlines_fire_in_arming_order() {
    let (mut reactor, handle) = init_with_reactor();
    let order = Rc::new(RefCell::new(Vec::new()));

    let deadline = Instant::now() + Duration::from_millis(10);
    let mut timers = Vec::new();
    for index in 0..3 {
        let order = order.clone();
        let handle = handle.clone();
        timers.push(Timer::new(&handle.clone(), Duration::from_millis(10), move || {
            order.borrow_mut().push(index);
            if index == 2 {
                handle.quit(0);
            }
        }));
    }
    for timer in &timers {
        timer.set_absolute(deadline);
    }

    run_expect(&mut reactor, 0);
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

#[test]
fn rearming_moves_the_deadline() {
    let (mut reactor, handle) = init_with_reactor();
    let fired_at = Rc::new(RefCell::new(None));

    let start = Instant::now();
    let timer = Timer::new(&handle, Duration::from_millis(30), {
        let fired_at = fired_at.clone();
        let handle = handle.clone();
        move || {
            *fired_at.borrow_mut() = Some(start.elapsed());
            handle.quit(0);
        }
    });
    timer.set_after(Duration::from_millis(1));
    // Re-arming replaces the earlier deadline outright.
    timer.set();
    assert!(timer.is_set());

    run_expect(&mut reactor, 0);
    let elapsed = fired_at.borrow().expect("timer never fired");
    assert!(elapsed >= Duration::from_millis(30), "fired at {:?}", elapsed);
}

#[test]
fn unset_timer_does_not_fire() {
    let (mut reactor, handle) = init_with_reactor();
    let cancelled_fired = Rc::new(RefCell::new(false));

    let cancelled = Timer::new(&handle, Duration::from_millis(5), {
        let cancelled_fired = cancelled_fired.clone();
        move || *cancelled_fired.borrow_mut() = true
    });
    cancelled.set();
    cancelled.unset();

    let quitter = Timer::new(&handle, Duration::from_millis(20), {
        let handle = handle.clone();
        move || handle.quit(0)
    });
    quitter.set();

    run_expect(&mut reactor, 0);
    assert!(!*cancelled_fired.borrow());
}

#[test]
fn handler_may_rearm_its_own_timer() {
    let (mut reactor, handle) = init_with_reactor();
    let count = Rc::new(RefCell::new(0));

    let timer: Rc<RefCell<Option<Timer>>> = Rc::new(RefCell::new(None));
    let inner = Timer::new(&handle, Duration::from_millis(2), {
        let count = count.clone();
        let timer = timer.clone();
        let handle = handle.clone();
        move || {
            let mut count = count.borrow_mut();
            *count += 1;
            if *count < 3 {
                timer.borrow().as_ref().unwrap().set();
            } else {
                handle.quit(0);
            }
        }
    });
    inner.set();
    *timer.borrow_mut() = Some(inner);

    run_expect(&mut reactor, 0);
    assert_eq!(*count.borrow(), 3);
}
