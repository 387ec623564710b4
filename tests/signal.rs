use reactive_core::{
    create_runtime, create_rw_signal, create_signal, SignalGet, SignalSet, SignalUpdate,
    SignalWith,
};

#[test]
fn basic_signal() {
    let runtime = create_runtime();
    let (a, set_a) = create_signal(0);
    assert_eq!(a.get(), 0);
    set_a.set(5);
    assert_eq!(a.get(), 5);
    runtime.dispose();
}

#[test]
fn derived_signals() {
    let runtime = create_runtime();
    let (a, set_a) = create_signal(0);
    let (b, set_b) = create_signal(0);
    let c = move || a.get() + b.get();
    assert_eq!(c(), 0);
    set_a.set(5);
    assert_eq!(c(), 5);
    set_b.set(1);
    assert_eq!(c(), 6);
    runtime.dispose();
}

#[test]
fn update_mutates_in_place() {
    let runtime = create_runtime();
    let names = create_rw_signal(vec!["alice".to_string()]);
    names.update(|names| names.push("bob".to_string()));
    names.with(|names| assert_eq!(names.len(), 2));
    runtime.dispose();
}

#[test]
fn rw_signal_split_shares_state() {
    let runtime = create_runtime();
    let count = create_rw_signal(0);
    let (get_count, set_count) = count.split();
    assert_eq!(count.get(), 0);
    set_count.set(1);
    assert_eq!(count.get(), 1);
    assert_eq!(get_count.get(), 1);
    count.set(2);
    assert_eq!(get_count.get(), 2);
    runtime.dispose();
}

#[test]
fn try_accessors_survive_disposal() {
    let runtime = create_runtime();
    let (a, set_a) = create_signal(1);
    runtime.dispose();
    assert_eq!(a.try_get(), None);
    // the value comes back when it could not be written
    assert_eq!(set_a.try_set(2), Some(2));
}
