use reactive_core::{
    create_effect, create_runtime, create_signal, register_target, track, trigger, DepKey,
    SignalGet, SignalSet, TargetKind, TrackOp, TriggerOp,
};
use std::{cell::Cell, rc::Rc};

fn counting_effect(f: impl Fn() + 'static) -> Rc<Cell<usize>> {
    let runs = Rc::new(Cell::new(0));
    create_effect({
        let runs = Rc::clone(&runs);
        move |_| {
            runs.set(runs.get() + 1);
            f();
        }
    });
    runs
}

#[test]
fn keyed_reads_retrigger_on_matching_writes() {
    let runtime = create_runtime();
    let target = register_target(TargetKind::Plain);

    let runs = counting_effect(move || track(target, TrackOp::Get, DepKey::key("name")));
    assert_eq!(runs.get(), 1);

    trigger(target, TriggerOp::Set, Some(DepKey::key("name")), None);
    assert_eq!(runs.get(), 2);

    // an unrelated key leaves the effect alone
    trigger(target, TriggerOp::Set, Some(DepKey::key("age")), None);
    assert_eq!(runs.get(), 2);

    runtime.dispose();
}

#[test]
fn iteration_deps_fire_on_shape_changes() {
    let runtime = create_runtime();
    let target = register_target(TargetKind::Plain);

    let runs = counting_effect(move || track(target, TrackOp::Iterate, DepKey::Iterate));
    assert_eq!(runs.get(), 1);

    trigger(target, TriggerOp::Add, Some(DepKey::key("x")), None);
    assert_eq!(runs.get(), 2);

    trigger(target, TriggerOp::Delete, Some(DepKey::key("x")), None);
    assert_eq!(runs.get(), 3);

    // plain objects do not iterate differently when a value is replaced
    trigger(target, TriggerOp::Set, Some(DepKey::key("x")), None);
    assert_eq!(runs.get(), 3);

    runtime.dispose();
}

#[test]
fn map_value_writes_invalidate_iteration_but_not_keys() {
    let runtime = create_runtime();
    let target = register_target(TargetKind::Map);

    let entries = counting_effect(move || track(target, TrackOp::Iterate, DepKey::Iterate));
    let keys = counting_effect(move || track(target, TrackOp::Iterate, DepKey::MapKeyIterate));
    assert_eq!((entries.get(), keys.get()), (1, 1));

    // replacing a value changes the entries, not the key set
    trigger(target, TriggerOp::Set, Some(DepKey::key("k")), None);
    assert_eq!((entries.get(), keys.get()), (2, 1));

    trigger(target, TriggerOp::Add, Some(DepKey::key("k2")), None);
    assert_eq!((entries.get(), keys.get()), (3, 2));

    runtime.dispose();
}

#[test]
fn shrinking_a_list_hits_truncated_indices_and_length() {
    let runtime = create_runtime();
    let target = register_target(TargetKind::List);

    let head = counting_effect(move || track(target, TrackOp::Get, DepKey::Index(0)));
    let tail = counting_effect(move || track(target, TrackOp::Get, DepKey::Index(2)));
    let len = counting_effect(move || track(target, TrackOp::Get, DepKey::Length));
    assert_eq!((head.get(), tail.get(), len.get()), (1, 1, 1));

    trigger(target, TriggerOp::Set, Some(DepKey::Length), Some(1));
    assert_eq!((head.get(), tail.get(), len.get()), (1, 2, 2));

    runtime.dispose();
}

#[test]
fn appending_to_a_list_invalidates_length() {
    let runtime = create_runtime();
    let target = register_target(TargetKind::List);

    let len = counting_effect(move || track(target, TrackOp::Get, DepKey::Length));
    assert_eq!(len.get(), 1);

    trigger(target, TriggerOp::Add, Some(DepKey::Index(5)), None);
    assert_eq!(len.get(), 2);

    runtime.dispose();
}

#[test]
fn clear_notifies_every_key() {
    let runtime = create_runtime();
    let target = register_target(TargetKind::Map);

    let value = counting_effect(move || track(target, TrackOp::Get, DepKey::key("k")));
    let entries = counting_effect(move || track(target, TrackOp::Iterate, DepKey::Iterate));
    assert_eq!((value.get(), entries.get()), (1, 1));

    trigger(target, TriggerOp::Clear, None, None);
    assert_eq!((value.get(), entries.get()), (2, 2));

    runtime.dispose();
}

#[test]
fn abandoned_keys_stop_delivering() {
    let runtime = create_runtime();
    let target = register_target(TargetKind::Plain);
    let (use_a, set_use_a) = create_signal(true);

    let runs = counting_effect(move || {
        if use_a.get() {
            track(target, TrackOp::Get, DepKey::key("a"));
        } else {
            track(target, TrackOp::Get, DepKey::key("b"));
        }
    });
    assert_eq!(runs.get(), 1);

    set_use_a.set(false);
    assert_eq!(runs.get(), 2);

    // the edge to "a" was pruned by the re-run
    trigger(target, TriggerOp::Set, Some(DepKey::key("a")), None);
    assert_eq!(runs.get(), 2);

    trigger(target, TriggerOp::Set, Some(DepKey::key("b")), None);
    assert_eq!(runs.get(), 3);

    runtime.dispose();
}

#[test]
fn deregistered_targets_are_silent() {
    let runtime = create_runtime();
    let target = register_target(TargetKind::Plain);

    let runs = counting_effect(move || track(target, TrackOp::Get, DepKey::key("k")));
    assert_eq!(runs.get(), 1);

    reactive_core::deregister_target(target);
    trigger(target, TriggerOp::Set, Some(DepKey::key("k")), None);
    assert_eq!(runs.get(), 1);

    runtime.dispose();
}
