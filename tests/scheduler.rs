use futures::executor::block_on;
use reactive_core::{
    create_effect_with, create_runtime, create_signal, flush_pre_flush_cbs, invalidate_job,
    next_tick, queue_job, queue_post_flush_cb, set_error_handler, watch, EffectOptions,
    ErrorKind, InstanceId, Job, SchedulerJob, Scheduling, SignalGet, SignalSet, WatchOptions,
};
use std::{cell::RefCell, rc::Rc};

fn logging_job(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Job {
    let log = Rc::clone(log);
    SchedulerJob::new(move || log.borrow_mut().push(name))
}

#[test]
fn next_tick_awaits_the_flush() {
    let runtime = create_runtime();
    let log = Rc::new(RefCell::new(Vec::new()));

    queue_job(&logging_job(&log, "a"));
    assert!(log.borrow().is_empty());

    block_on(next_tick());
    assert_eq!(*log.borrow(), vec!["a"]);

    // nothing pending: the next await settles with no extra flush
    block_on(next_tick());
    assert_eq!(*log.borrow(), vec!["a"]);

    runtime.dispose();
}

#[test]
fn jobs_run_in_id_order_with_missing_ids_last() {
    let runtime = create_runtime();
    let log = Rc::new(RefCell::new(Vec::new()));

    let anonymous = logging_job(&log, "anonymous");
    let child = logging_job(&log, "child");
    child.set_id(Some(2));
    let parent = logging_job(&log, "parent");
    parent.set_id(Some(1));

    queue_job(&anonymous);
    queue_job(&child);
    queue_job(&parent);

    block_on(next_tick());
    assert_eq!(*log.borrow(), vec!["parent", "child", "anonymous"]);

    runtime.dispose();
}

#[test]
fn queueing_twice_runs_once() {
    let runtime = create_runtime();
    let log = Rc::new(RefCell::new(Vec::new()));

    let job = logging_job(&log, "once");
    queue_job(&job);
    queue_job(&job);
    queue_job(&job);

    block_on(next_tick());
    assert_eq!(*log.borrow(), vec!["once"]);

    runtime.dispose();
}

#[test]
fn invalidated_jobs_do_not_run() {
    let runtime = create_runtime();
    let log = Rc::new(RefCell::new(Vec::new()));

    queue_job(&logging_job(&log, "kept"));
    let doomed = logging_job(&log, "doomed");
    queue_job(&doomed);
    invalidate_job(&doomed);

    block_on(next_tick());
    assert_eq!(*log.borrow(), vec!["kept"]);

    runtime.dispose();
}

#[test]
fn inactive_jobs_are_skipped() {
    let runtime = create_runtime();
    let log = Rc::new(RefCell::new(Vec::new()));

    let unmounted = logging_job(&log, "unmounted");
    queue_job(&unmounted);
    unmounted.set_active(false);

    block_on(next_tick());
    assert!(log.borrow().is_empty());

    runtime.dispose();
}

#[test]
fn jobs_queued_during_the_flush_run_in_the_same_tick() {
    let runtime = create_runtime();
    let log = Rc::new(RefCell::new(Vec::new()));

    let second = logging_job(&log, "second");
    let first = SchedulerJob::new({
        let log = Rc::clone(&log);
        let second = Rc::clone(&second);
        move || {
            log.borrow_mut().push("first");
            queue_job(&second);
        }
    });
    queue_job(&first);

    block_on(next_tick());
    assert_eq!(*log.borrow(), vec!["first", "second"]);

    runtime.dispose();
}

#[test]
fn post_flush_cbs_run_after_main_jobs_in_id_order() {
    let runtime = create_runtime();
    let log = Rc::new(RefCell::new(Vec::new()));

    let post_late = logging_job(&log, "post 2");
    post_late.set_id(Some(2));
    let post_early = logging_job(&log, "post 1");
    post_early.set_id(Some(1));

    queue_post_flush_cb(&post_late);
    queue_post_flush_cb(&post_early);
    queue_job(&logging_job(&log, "main"));

    block_on(next_tick());
    assert_eq!(*log.borrow(), vec!["main", "post 1", "post 2"]);

    runtime.dispose();
}

#[test]
fn pre_watcher_runs_before_render_job_of_same_instance() {
    let runtime = create_runtime();
    let (n, set_n) = create_signal(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    create_effect_with(
        {
            let log = Rc::clone(&log);
            move |_| {
                n.get();
                log.borrow_mut().push("render");
            }
        },
        EffectOptions {
            scheduling: Scheduling::Queued {
                id: Some(1),
                pre: false,
                instance: Some(InstanceId(1)),
            },
            ..Default::default()
        },
    );
    watch(
        move || n.get(),
        {
            let log = Rc::clone(&log);
            move |_, _, _| log.borrow_mut().push("watch")
        },
        WatchOptions {
            instance: Some(InstanceId(1)),
            ..Default::default()
        },
    );
    log.borrow_mut().clear();

    set_n.set(1);
    block_on(next_tick());
    assert_eq!(*log.borrow(), vec!["watch", "render"]);

    runtime.dispose();
}

#[test]
fn post_watcher_runs_after_render_job() {
    let runtime = create_runtime();
    let (n, set_n) = create_signal(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    create_effect_with(
        {
            let log = Rc::clone(&log);
            move |_| {
                n.get();
                log.borrow_mut().push("render");
            }
        },
        EffectOptions {
            scheduling: Scheduling::Queued {
                id: Some(1),
                pre: false,
                instance: Some(InstanceId(1)),
            },
            ..Default::default()
        },
    );
    watch(
        move || n.get(),
        {
            let log = Rc::clone(&log);
            move |_, _, _| log.borrow_mut().push("watch")
        },
        WatchOptions {
            instance: Some(InstanceId(1)),
            flush: reactive_core::FlushMode::Post,
            ..Default::default()
        },
    );
    log.borrow_mut().clear();

    set_n.set(1);
    block_on(next_tick());
    assert_eq!(*log.borrow(), vec!["render", "watch"]);

    runtime.dispose();
}

#[test]
fn parent_jobs_run_before_child_jobs() {
    let runtime = create_runtime();
    let (n, set_n) = create_signal(0);
    let log = Rc::new(RefCell::new(Vec::new()));

    // child created first, but its larger uid sorts it after the parent
    for (uid, name) in [(7_u64, "child"), (3, "parent")] {
        create_effect_with(
            {
                let log = Rc::clone(&log);
                move |_| {
                    n.get();
                    log.borrow_mut().push(name);
                }
            },
            EffectOptions {
                scheduling: Scheduling::Queued {
                    id: Some(uid),
                    pre: false,
                    instance: Some(InstanceId(uid)),
                },
                ..Default::default()
            },
        );
    }
    log.borrow_mut().clear();

    set_n.set(1);
    block_on(next_tick());
    assert_eq!(*log.borrow(), vec!["parent", "child"]);

    runtime.dispose();
}

#[test]
fn flush_pre_flush_cbs_pulls_matching_instance_forward() {
    let runtime = create_runtime();
    let log = Rc::new(RefCell::new(Vec::new()));

    let mine = logging_job(&log, "mine");
    mine.set_id(Some(1));
    mine.set_pre(true);
    mine.set_instance(Some(InstanceId(1)));
    let other = logging_job(&log, "other");
    other.set_id(Some(2));
    other.set_pre(true);
    other.set_instance(Some(InstanceId(2)));

    queue_job(&mine);
    queue_job(&other);

    flush_pre_flush_cbs(Some(InstanceId(1)));
    assert_eq!(*log.borrow(), vec!["mine"]);

    block_on(next_tick());
    assert_eq!(*log.borrow(), vec!["mine", "other"]);

    runtime.dispose();
}

#[test]
fn job_panics_are_attributed_and_do_not_abort_the_flush() {
    let runtime = create_runtime();
    let log = Rc::new(RefCell::new(Vec::new()));

    let errors = Rc::new(RefCell::new(Vec::new()));
    set_error_handler({
        let errors = Rc::clone(&errors);
        move |error| errors.borrow_mut().push((error.kind, error.instance))
    });

    let failing = SchedulerJob::new(|| panic!("job exploded"));
    failing.set_id(Some(1));
    failing.set_instance(Some(InstanceId(1)));
    queue_job(&failing);
    queue_job(&logging_job(&log, "after"));

    block_on(next_tick());
    assert_eq!(*log.borrow(), vec!["after"]);
    assert_eq!(
        *errors.borrow(),
        vec![(ErrorKind::ComponentUpdate, Some(InstanceId(1)))]
    );

    runtime.dispose();
}

#[test]
fn recursion_limit_fires_once_and_terminates_the_flush() {
    let runtime = create_runtime();

    let errors = Rc::new(RefCell::new(Vec::new()));
    set_error_handler({
        let errors = Rc::clone(&errors);
        move |error| errors.borrow_mut().push(error.kind)
    });

    let runs = Rc::new(RefCell::new(0));
    let slot: Rc<RefCell<Option<Job>>> = Rc::new(RefCell::new(None));
    let job = SchedulerJob::new({
        let runs = Rc::clone(&runs);
        let slot = Rc::clone(&slot);
        move || {
            *runs.borrow_mut() += 1;
            let job = slot.borrow().clone().unwrap();
            queue_job(&job);
        }
    });
    job.set_allow_recurse(true);
    *slot.borrow_mut() = Some(Rc::clone(&job));

    queue_job(&job);
    block_on(next_tick());

    assert_eq!(*runs.borrow(), 100);
    assert_eq!(*errors.borrow(), vec![ErrorKind::RecursionLimit]);

    runtime.dispose();
}

#[test]
fn effect_feedback_loop_is_capped() {
    let runtime = create_runtime();
    let (x, set_x) = create_signal(0_i64);

    let errors = Rc::new(RefCell::new(Vec::new()));
    set_error_handler({
        let errors = Rc::clone(&errors);
        move |error| errors.borrow_mut().push(error.kind)
    });

    let runs = Rc::new(RefCell::new(0));
    create_effect_with(
        {
            let runs = Rc::clone(&runs);
            move |_| {
                *runs.borrow_mut() += 1;
                // never reaches a fixed point
                let value = x.get();
                set_x.set(value + 1);
            }
        },
        EffectOptions {
            allow_recurse: true,
            scheduling: Scheduling::Queued {
                id: None,
                pre: false,
                instance: None,
            },
            ..Default::default()
        },
    );
    assert_eq!(*runs.borrow(), 1);

    block_on(next_tick());
    assert_eq!(*errors.borrow(), vec![ErrorKind::RecursionLimit]);
    assert!(*runs.borrow() <= 101);

    runtime.dispose();
}

#[test]
fn clamped_feedback_settles_within_the_budget() {
    let runtime = create_runtime();
    let (x, set_x) = create_signal(0);

    let runs = Rc::new(RefCell::new(0));
    create_effect_with(
        {
            let runs = Rc::clone(&runs);
            move |_| {
                *runs.borrow_mut() += 1;
                let value = x.get();
                if value < 5 {
                    set_x.set(value + 1);
                }
            }
        },
        EffectOptions {
            allow_recurse: true,
            scheduling: Scheduling::Queued {
                id: None,
                pre: false,
                instance: None,
            },
            ..Default::default()
        },
    );

    block_on(next_tick());
    assert_eq!(x.get(), 5);
    assert_eq!(*runs.borrow(), 6);

    runtime.dispose();
}
