use crate::{
    effect::{AnyComputation, AnyEffect, EffectScheduler, EffectState},
    error::{payload_message, report_error, ErrorKind},
    runtime::{current_runtime, with_runtime, RuntimeId},
    scheduler::{InstanceId, SchedulerJob},
    traverse::Traverse,
};
use std::{
    any::Any,
    cell::RefCell,
    marker::PhantomData,
    panic::{catch_unwind, AssertUnwindSafe},
    rc::Rc,
};

/// When a watcher's callback runs relative to the tick.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FlushMode {
    /// Before the main jobs of the next tick.
    #[default]
    Pre,
    /// After the main jobs of the next tick.
    Post,
    /// Synchronously, as soon as the mutation finishes notifying.
    Sync,
}

/// Options accepted by [`watch`].
#[derive(Default)]
pub struct WatchOptions {
    /// Run the callback once immediately, with `None` as the old value.
    pub immediate: bool,
    /// Traverse the watched value so every nested reactive source becomes a
    /// dependency, and fire the callback on any notification.
    pub deep: bool,
    pub flush: FlushMode,
    /// Stop the watcher after the first callback.
    pub once: bool,
    /// Owning component instance; used for scheduling order and error
    /// attribution.
    pub instance: Option<InstanceId>,
    /// Explicit job id; defaults to the owning instance's uid.
    pub id: Option<u64>,
}

/// Registers cleanup to run before the watcher's next callback and when the
/// watcher stops.
#[derive(Clone)]
pub struct OnCleanup {
    slot: Rc<RefCell<Option<Box<dyn FnOnce()>>>>,
}

impl OnCleanup {
    pub fn register(&self, f: impl FnOnce() + 'static) {
        *self.slot.borrow_mut() = Some(Box::new(f));
    }
}

type CleanupSlot = Rc<RefCell<Option<Box<dyn FnOnce()>>>>;

fn run_cleanup(runtime: RuntimeId, instance: Option<InstanceId>, slot: &CleanupSlot) {
    if let Some(cleanup) = slot.borrow_mut().take() {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| cleanup())) {
            report_error(
                runtime,
                ErrorKind::WatchCleanup,
                instance,
                payload_message(payload.as_ref()),
            );
        }
    }
}

/// The tracked read behind a watcher. Getter failures are reported and keep
/// the previous value instead of poisoning the effect.
struct WatchComputation<W, F>
where
    W: 'static,
    F: Fn() -> W,
{
    f: F,
    runtime: RuntimeId,
    instance: Option<InstanceId>,
    ty: PhantomData<W>,
}

impl<W, F> AnyComputation for WatchComputation<W, F>
where
    W: 'static,
    F: Fn() -> W,
{
    fn run(&self, value: &Rc<RefCell<dyn Any>>) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.f)())) {
            Ok(new_value) => {
                *value
                    .borrow_mut()
                    .downcast_mut::<Option<W>>()
                    .expect("to downcast watcher value") = Some(new_value);
                true
            }
            Err(payload) => {
                report_error(
                    self.runtime,
                    ErrorKind::WatchGetter,
                    self.instance,
                    payload_message(payload.as_ref()),
                );
                false
            }
        }
    }
}

/// Watches the reactive sources read by `getter` and invokes `callback`
/// with the new and previous values whenever one of them changes.
///
/// The getter is the watch source: watching a signal is `move || sig.get()`,
/// watching several is a getter returning a tuple. The callback itself is
/// not tracked. Returns a stop handle.
///
/// ```
/// # use reactive_core::*;
/// # use std::{cell::RefCell, rc::Rc};
/// # let runtime = create_runtime();
/// let (name, set_name) = create_signal("Alice".to_string());
/// let seen = Rc::new(RefCell::new(Vec::new()));
///
/// let log = Rc::clone(&seen);
/// let stop = watch(
///     move || name.get(),
///     move |name, prev, _| {
///         log.borrow_mut().push(format!("{prev:?} -> {name}"));
///     },
///     WatchOptions {
///         flush: FlushMode::Sync,
///         ..Default::default()
///     },
/// );
///
/// set_name.set("Bob".to_string());
/// assert_eq!(seen.borrow().as_slice(), ["Some(\"Alice\") -> Bob"]);
///
/// stop();
/// set_name.set("Carol".to_string());
/// assert_eq!(seen.borrow().len(), 1);
/// # runtime.dispose();
/// ```
pub fn watch<W, C>(
    getter: impl Fn() -> W + 'static,
    callback: C,
    options: WatchOptions,
) -> impl Fn() + Clone
where
    W: Traverse + Clone + PartialEq + 'static,
    C: Fn(&W, Option<&W>, OnCleanup) + 'static,
{
    let runtime =
        current_runtime().expect("tried to create a watcher outside a reactive runtime");
    let WatchOptions {
        immediate,
        deep,
        flush,
        once,
        instance,
        id,
    } = options;

    let cleanup: CleanupSlot = Rc::new(RefCell::new(None));
    let old_value: Rc<RefCell<Option<W>>> = Rc::new(RefCell::new(None));

    let tracked = move || {
        let value = getter();
        if deep {
            value.traverse(usize::MAX);
        }
        value
    };

    let effect_id = with_runtime(runtime, |rt| {
        let mut state = EffectState::new(
            Rc::new(WatchComputation {
                f: tracked,
                runtime,
                instance,
                ty: PhantomData,
            }),
            Rc::new(RefCell::new(None::<W>)),
        );
        state.on_stop = Some({
            let cleanup = Rc::clone(&cleanup);
            Box::new(move || run_cleanup(runtime, instance, &cleanup))
        });
        rt.effects.borrow_mut().insert(state)
    })
    .expect("tried to create a watcher in a runtime that has been disposed");
    let handle = AnyEffect {
        runtime,
        id: effect_id,
    };

    let job_impl: Rc<dyn Fn()> = Rc::new({
        let cleanup = Rc::clone(&cleanup);
        let old_value = Rc::clone(&old_value);
        move || {
            if !handle.is_active() || !handle.is_dirty() {
                return;
            }
            handle.run();
            let new_value: Option<W> = with_runtime(runtime, |rt| {
                rt.effects.borrow().get(effect_id).and_then(|state| {
                    state
                        .value
                        .borrow()
                        .downcast_ref::<Option<W>>()
                        .and_then(|value| value.clone())
                })
            })
            .ok()
            .flatten();
            let Some(new_value) = new_value else {
                // the getter has failed on every run so far
                return;
            };
            let old: Option<W> = old_value.borrow().clone();
            let fire = deep || old.is_none() || old.as_ref() != Some(&new_value);
            if fire {
                run_cleanup(runtime, instance, &cleanup);
                let register = OnCleanup {
                    slot: Rc::clone(&cleanup),
                };
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| {
                    callback(&new_value, old.as_ref(), register)
                })) {
                    report_error(
                        runtime,
                        ErrorKind::WatchCallback,
                        instance,
                        payload_message(payload.as_ref()),
                    );
                }
                *old_value.borrow_mut() = Some(new_value);
                if once {
                    handle.stop();
                }
            }
        }
    });

    let scheduler = wire_scheduler(flush, id.or(instance.map(|i| i.0)), instance, &job_impl);
    _ = with_runtime(runtime, |rt| {
        if let Some(state) = rt.effects.borrow_mut().get_mut(effect_id) {
            state.scheduler = Some(scheduler);
        }
    });

    if immediate {
        job_impl();
    } else {
        // seed the old value and collect the initial dependency set
        handle.run();
        let seeded: Option<W> = with_runtime(runtime, |rt| {
            rt.effects.borrow().get(effect_id).and_then(|state| {
                state
                    .value
                    .borrow()
                    .downcast_ref::<Option<W>>()
                    .and_then(|value| value.clone())
            })
        })
        .ok()
        .flatten();
        *old_value.borrow_mut() = seeded;
    }

    move || handle.stop()
}

/// A watcher without a callback: `f` itself is the tracked computation,
/// re-run before the main jobs of the tick whenever a dependency changes.
pub fn watch_effect(f: impl Fn(OnCleanup) + 'static) -> impl Fn() + Clone {
    watch_effect_with(f, FlushMode::Pre)
}

/// Like [`watch_effect`], but re-runs after the main jobs of the tick.
pub fn watch_post_effect(f: impl Fn(OnCleanup) + 'static) -> impl Fn() + Clone {
    watch_effect_with(f, FlushMode::Post)
}

/// Like [`watch_effect`], but re-runs synchronously on every notification.
pub fn watch_sync_effect(f: impl Fn(OnCleanup) + 'static) -> impl Fn() + Clone {
    watch_effect_with(f, FlushMode::Sync)
}

fn watch_effect_with(f: impl Fn(OnCleanup) + 'static, flush: FlushMode) -> impl Fn() + Clone {
    let runtime =
        current_runtime().expect("tried to create a watcher outside a reactive runtime");

    let cleanup: CleanupSlot = Rc::new(RefCell::new(None));
    let tracked = {
        let cleanup = Rc::clone(&cleanup);
        move || {
            run_cleanup(runtime, None, &cleanup);
            f(OnCleanup {
                slot: Rc::clone(&cleanup),
            });
        }
    };

    let effect_id = with_runtime(runtime, |rt| {
        let mut state = EffectState::new(
            Rc::new(WatchComputation {
                f: tracked,
                runtime,
                instance: None,
                ty: PhantomData,
            }),
            Rc::new(RefCell::new(None::<()>)),
        );
        state.on_stop = Some({
            let cleanup = Rc::clone(&cleanup);
            Box::new(move || run_cleanup(runtime, None, &cleanup))
        });
        rt.effects.borrow_mut().insert(state)
    })
    .expect("tried to create a watcher in a runtime that has been disposed");
    let handle = AnyEffect {
        runtime,
        id: effect_id,
    };

    let job_impl: Rc<dyn Fn()> = Rc::new(move || {
        if handle.is_active() && handle.is_dirty() {
            handle.run();
        }
    });

    let scheduler = wire_scheduler(flush, None, None, &job_impl);
    _ = with_runtime(runtime, |rt| {
        if let Some(state) = rt.effects.borrow_mut().get_mut(effect_id) {
            state.scheduler = Some(scheduler);
        }
    });

    handle.run();

    move || handle.stop()
}

fn wire_scheduler(
    flush: FlushMode,
    id: Option<u64>,
    instance: Option<InstanceId>,
    job_impl: &Rc<dyn Fn()>,
) -> EffectScheduler {
    match flush {
        FlushMode::Sync => EffectScheduler::Custom({
            let job_impl = Rc::clone(job_impl);
            Rc::new(move |_| job_impl())
        }),
        FlushMode::Pre | FlushMode::Post => {
            let job = SchedulerJob::new({
                let job_impl = Rc::clone(job_impl);
                move || job_impl()
            });
            job.set_id(id);
            job.set_instance(instance);
            if flush == FlushMode::Pre {
                job.set_pre(true);
                EffectScheduler::Job(job)
            } else {
                EffectScheduler::Post(job)
            }
        }
    }
}
