use reactive_core::{
    create_effect, create_runtime, create_signal, pause_tracking, reset_tracking, untrack,
    SignalGet, SignalGetUntracked, SignalSet,
};
use std::{cell::RefCell, rc::Rc};

#[test]
fn untracked_reads_do_not_subscribe() {
    let runtime = create_runtime();
    let (tracked, set_tracked) = create_signal(1);
    let (peeked, set_peeked) = create_signal(10);

    let log = Rc::new(RefCell::new(Vec::new()));
    create_effect({
        let log = Rc::clone(&log);
        move |_| {
            log.borrow_mut()
                .push(tracked.get() + peeked.get_untracked());
        }
    });
    assert_eq!(*log.borrow(), vec![11]);

    set_peeked.set(20);
    assert_eq!(*log.borrow(), vec![11]);

    // the next legitimate rerun sees the newer peeked value
    set_tracked.set(2);
    assert_eq!(*log.borrow(), vec![11, 22]);

    runtime.dispose();
}

#[test]
fn untrack_suspends_tracking_for_a_closure() {
    let runtime = create_runtime();
    let (a, _) = create_signal(1);
    let (b, set_b) = create_signal(2);

    let runs = Rc::new(RefCell::new(0));
    create_effect({
        let runs = Rc::clone(&runs);
        move |_| {
            *runs.borrow_mut() += 1;
            a.get();
            untrack(|| b.get());
        }
    });
    assert_eq!(*runs.borrow(), 1);

    set_b.set(3);
    assert_eq!(*runs.borrow(), 1);

    runtime.dispose();
}

#[test]
fn pause_and_reset_tracking_nest() {
    let runtime = create_runtime();
    let (a, set_a) = create_signal(1);
    let (b, set_b) = create_signal(2);

    let runs = Rc::new(RefCell::new(0));
    create_effect({
        let runs = Rc::clone(&runs);
        move |_| {
            *runs.borrow_mut() += 1;
            pause_tracking();
            a.get();
            reset_tracking();
            b.get();
        }
    });
    assert_eq!(*runs.borrow(), 1);

    set_a.set(10);
    assert_eq!(*runs.borrow(), 1);

    set_b.set(20);
    assert_eq!(*runs.borrow(), 2);

    runtime.dispose();
}
