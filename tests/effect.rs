use reactive_core::{
    create_effect, create_effect_with, create_runtime, create_signal, EffectOptions, Scheduling,
    SignalGet, SignalSet,
};
use std::{cell::RefCell, rc::Rc};

#[test]
fn effect_runs_immediately_and_reruns_on_change() {
    let runtime = create_runtime();
    let (count, set_count) = create_signal(0);

    let log = Rc::new(RefCell::new(Vec::new()));
    create_effect({
        let log = Rc::clone(&log);
        move |_| log.borrow_mut().push(count.get())
    });
    assert_eq!(*log.borrow(), vec![0]);

    set_count.set(1);
    assert_eq!(*log.borrow(), vec![0, 1]);

    // same value: nobody is notified
    set_count.set(1);
    assert_eq!(*log.borrow(), vec![0, 1]);

    runtime.dispose();
}

#[test]
fn conditional_reads_switch_dependencies() {
    let runtime = create_runtime();
    let (flag, set_flag) = create_signal(true);
    let (a, set_a) = create_signal("A".to_string());
    let (b, set_b) = create_signal("B".to_string());

    let log = Rc::new(RefCell::new(Vec::new()));
    create_effect({
        let log = Rc::clone(&log);
        move |_| {
            let value = if flag.get() { a.get() } else { b.get() };
            log.borrow_mut().push(value);
        }
    });
    assert_eq!(*log.borrow(), vec!["A"]);

    // b is not a dependency while the flag is set
    set_b.set("B2".to_string());
    assert_eq!(*log.borrow(), vec!["A"]);

    set_flag.set(false);
    assert_eq!(*log.borrow(), vec!["A", "B2"]);

    // and after the switch, a no longer is one
    set_a.set("A2".to_string());
    assert_eq!(*log.borrow(), vec!["A", "B2"]);

    runtime.dispose();
}

#[test]
fn repeated_reads_subscribe_once() {
    let runtime = create_runtime();
    let (x, set_x) = create_signal(1);

    let runs = Rc::new(RefCell::new(0));
    create_effect({
        let runs = Rc::clone(&runs);
        move |_| {
            *runs.borrow_mut() += 1;
            x.get() + x.get()
        }
    });
    assert_eq!(*runs.borrow(), 1);

    set_x.set(2);
    assert_eq!(*runs.borrow(), 2);

    runtime.dispose();
}

#[test]
fn nested_effects_collect_their_own_deps() {
    let runtime = create_runtime();
    let (a, set_a) = create_signal(0);
    let (b, set_b) = create_signal(0);

    let outer_runs = Rc::new(RefCell::new(0));
    let inner_runs = Rc::new(RefCell::new(0));
    create_effect({
        let outer_runs = Rc::clone(&outer_runs);
        let inner_runs = Rc::clone(&inner_runs);
        move |prev: Option<()>| {
            *outer_runs.borrow_mut() += 1;
            a.get();
            if prev.is_none() {
                create_effect({
                    let inner_runs = Rc::clone(&inner_runs);
                    move |_| {
                        *inner_runs.borrow_mut() += 1;
                        b.get();
                    }
                });
            }
        }
    });
    assert_eq!((*outer_runs.borrow(), *inner_runs.borrow()), (1, 1));

    // the inner effect's reads did not leak into the outer one
    set_b.set(1);
    assert_eq!((*outer_runs.borrow(), *inner_runs.borrow()), (1, 2));

    set_a.set(1);
    assert_eq!((*outer_runs.borrow(), *inner_runs.borrow()), (2, 2));

    runtime.dispose();
}

#[test]
fn stopped_effects_never_rerun() {
    let runtime = create_runtime();
    let (x, set_x) = create_signal(0);

    let runs = Rc::new(RefCell::new(0));
    let stopped = Rc::new(RefCell::new(false));
    let effect = create_effect_with(
        {
            let runs = Rc::clone(&runs);
            move |_| {
                *runs.borrow_mut() += 1;
                x.get();
            }
        },
        EffectOptions {
            on_stop: Some(Box::new({
                let stopped = Rc::clone(&stopped);
                move || *stopped.borrow_mut() = true
            })),
            ..Default::default()
        },
    );
    assert_eq!(*runs.borrow(), 1);

    effect.stop();
    assert!(*stopped.borrow());
    assert!(!effect.is_active());

    set_x.set(1);
    assert_eq!(*runs.borrow(), 1);

    runtime.dispose();
}

#[test]
fn lazy_effects_run_on_demand() {
    let runtime = create_runtime();
    let (x, set_x) = create_signal(10);

    let runs = Rc::new(RefCell::new(0));
    let effect = create_effect_with(
        {
            let runs = Rc::clone(&runs);
            move |_| {
                *runs.borrow_mut() += 1;
                x.get()
            }
        },
        EffectOptions {
            lazy: true,
            ..Default::default()
        },
    );
    assert_eq!(*runs.borrow(), 0);

    assert_eq!(effect.run(), 10);
    assert_eq!(*runs.borrow(), 1);

    // once seeded, it behaves like any other effect
    set_x.set(11);
    assert_eq!(*runs.borrow(), 2);

    runtime.dispose();
}

#[test]
fn self_write_without_recursion_runs_once_per_mutation() {
    let runtime = create_runtime();
    let (x, set_x) = create_signal(0);

    let log = Rc::new(RefCell::new(Vec::new()));
    create_effect({
        let log = Rc::clone(&log);
        move |_| {
            let value = x.get();
            log.borrow_mut().push(value);
            if value < 10 {
                set_x.set(value + 1);
            }
        }
    });
    // the write from inside the run does not re-trigger the running effect
    assert_eq!(*log.borrow(), vec![0]);

    set_x.set(5);
    assert_eq!(*log.borrow(), vec![0, 5]);

    set_x.set(8);
    assert_eq!(*log.borrow(), vec![0, 5, 8]);

    runtime.dispose();
}

#[test]
fn allow_recurse_cascades_until_quiescent() {
    let runtime = create_runtime();
    let (x, set_x) = create_signal(0);

    let log = Rc::new(RefCell::new(Vec::new()));
    create_effect_with(
        {
            let log = Rc::clone(&log);
            move |_| {
                let value = x.get();
                log.borrow_mut().push(value);
                if value < 5 {
                    set_x.set(value + 1);
                }
            }
        },
        EffectOptions {
            allow_recurse: true,
            scheduling: Scheduling::Inline,
            ..Default::default()
        },
    );
    assert_eq!(*log.borrow(), vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(x.get(), 5);

    runtime.dispose();
}
