use crate::{
    dep::{DepId, DepOwner},
    runtime::{current_runtime, with_runtime, Runtime, RuntimeId},
    scheduler::{InstanceId, Job, SchedulerJob},
    signal::SourceId,
};
use std::{any::Any, cell::RefCell, marker::PhantomData, rc::Rc};

slotmap::new_key_type! {
    /// Unique ID assigned to an effect.
    pub(crate) struct EffectId;
}

/// How stale an effect's last result is known to be.
///
/// The ordering is load-bearing: the engine only ever compares levels with
/// `<` and `>=`, never by case equality on the ordered states.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum DirtyLevel {
    NotDirty,
    /// Reentrancy guard held while a `MaybeDirty` state is being resolved.
    QueryingDirty,
    /// Possibly stale because an upstream computed has side effects.
    MaybeDirtyComputedSideEffect,
    /// Possibly stale; resolved by forcing upstream computeds.
    MaybeDirty,
    Dirty,
}

pub(crate) trait AnyComputation {
    /// Runs the computation against its value slot, returning whether the
    /// stored value changed.
    fn run(&self, value: &Rc<RefCell<dyn Any>>) -> bool;
}

pub(crate) struct EffectComputation<T, F>
where
    T: 'static,
    F: Fn(Option<T>) -> T,
{
    pub f: F,
    pub ty: PhantomData<T>,
}

impl<T, F> AnyComputation for EffectComputation<T, F>
where
    T: 'static,
    F: Fn(Option<T>) -> T,
{
    fn run(&self, value: &Rc<RefCell<dyn Any>>) -> bool {
        // take and release the borrow around the user function, in case the
        // function reaches back into this same slot
        let curr_value = {
            let mut value = value.borrow_mut();
            let value = value
                .downcast_mut::<Option<T>>()
                .expect("to downcast effect value");
            value.take()
        };

        let new_value = (self.f)(curr_value);

        let mut value = value.borrow_mut();
        let value = value
            .downcast_mut::<Option<T>>()
            .expect("to downcast effect value");
        *value = Some(new_value);

        true
    }
}

/// How a notified effect actually re-runs.
#[derive(Clone)]
pub(crate) enum EffectScheduler {
    /// Synchronously, once the outermost trigger has finished notifying.
    Inline,
    /// Via a job on the tick queue.
    Job(Job),
    /// Via a post-flush callback of the tick.
    Post(Job),
    /// Handed to a caller-supplied scheduler.
    Custom(Rc<dyn Fn(AnyEffect)>),
}

pub(crate) struct EffectState {
    pub computation: Rc<dyn AnyComputation>,
    pub value: Rc<RefCell<dyn Any>>,
    /// `None` only for computed-owned effects, which are notified through
    /// their owner instead of being scheduled.
    pub scheduler: Option<EffectScheduler>,
    pub active: bool,
    /// Deps collected by the current or most recent run, in read order.
    pub deps: Vec<DepId>,
    /// How many entries of `deps` the current run has confirmed so far.
    pub deps_len: usize,
    /// Bumped at the start of each run; distinguishes edges collected in the
    /// current run from stale ones.
    pub track_id: u64,
    pub runnings: u32,
    pub dirty: DirtyLevel,
    /// Latch set when leaving `NotDirty`, cleared once a scheduler has been
    /// enqueued for the notification.
    pub should_schedule: bool,
    pub allow_recurse: bool,
    /// The computed this effect recomputes, if any.
    pub owner: Option<SourceId>,
    pub on_stop: Option<Box<dyn FnOnce()>>,
}

impl EffectState {
    pub fn new(computation: Rc<dyn AnyComputation>, value: Rc<RefCell<dyn Any>>) -> Self {
        Self {
            computation,
            value,
            scheduler: None,
            active: true,
            deps: Vec::new(),
            deps_len: 0,
            track_id: 0,
            runnings: 0,
            // created stale, so the first run always executes
            dirty: DirtyLevel::Dirty,
            should_schedule: false,
            allow_recurse: false,
            owner: None,
            on_stop: None,
        }
    }
}

// Restores the dep list, run counter, and tracking cursor on every exit path
// of a run, including unwinding.
struct RunGuard<'a> {
    runtime: &'a Runtime,
    id: EffectId,
    prev_observer: Option<EffectId>,
    prev_track: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let stale = {
            let mut effects = self.runtime.effects.borrow_mut();
            match effects.get_mut(self.id) {
                Some(state) => {
                    let stale = state.deps.split_off(state.deps_len);
                    state.runnings -= 1;
                    stale
                }
                None => Vec::new(),
            }
        };
        for dep in stale {
            self.runtime.clean_dep_effect(dep, self.id);
        }
        self.runtime.observer.set(self.prev_observer);
        self.runtime.should_track.set(self.prev_track);
    }
}

impl Runtime {
    /// Re-runs an effect, re-collecting its dependencies from scratch and
    /// pruning any edge the run did not confirm.
    pub(crate) fn run_effect(&self, id: EffectId) -> bool {
        let (computation, value, active) = {
            let mut effects = self.effects.borrow_mut();
            let Some(state) = effects.get_mut(id) else {
                return false;
            };
            state.dirty = DirtyLevel::NotDirty;
            (
                Rc::clone(&state.computation),
                Rc::clone(&state.value),
                state.active,
            )
        };

        if !active {
            // stopped effects still execute when run explicitly, but collect
            // nothing
            return computation.run(&value);
        }

        let prev_track = self.should_track.replace(true);
        let prev_observer = self.observer.replace(Some(id));
        {
            let mut effects = self.effects.borrow_mut();
            if let Some(state) = effects.get_mut(id) {
                state.runnings += 1;
                state.track_id = state.track_id.wrapping_add(1);
                state.deps_len = 0;
            }
        }
        let _guard = RunGuard {
            runtime: self,
            id,
            prev_observer,
            prev_track,
        };
        computation.run(&value)
    }

    /// Records the edge between the given effect and dep, reusing the dep
    /// slot at the current cursor position when possible.
    pub(crate) fn track_effect(&self, effect_id: EffectId, dep_id: DepId) {
        let track_id = match self.effects.borrow().get(effect_id) {
            Some(state) => state.track_id,
            None => return,
        };

        {
            let mut deps = self.deps.borrow_mut();
            let Some(dep) = deps.get_mut(dep_id) else {
                return;
            };
            if dep.entries.get(&effect_id) == Some(&track_id) {
                // already recorded by the current run, e.g. `x + x`
                return;
            }
            dep.entries.insert(effect_id, track_id);
        }

        let mut stale = None;
        {
            let mut effects = self.effects.borrow_mut();
            let Some(state) = effects.get_mut(effect_id) else {
                return;
            };
            let position = state.deps_len;
            match state.deps.get(position).copied() {
                Some(old) if old == dep_id => {}
                old => {
                    stale = old;
                    if position < state.deps.len() {
                        state.deps[position] = dep_id;
                    } else {
                        state.deps.push(dep_id);
                    }
                }
            }
            state.deps_len += 1;
        }
        if let Some(old) = stale {
            self.clean_dep_effect(old, effect_id);
        }
    }

    /// Removes an effect from a dep, cleaning the dep up if it became empty.
    pub(crate) fn clean_dep_effect(&self, dep_id: DepId, effect_id: EffectId) {
        let owner = {
            let mut deps = self.deps.borrow_mut();
            let Some(dep) = deps.get_mut(dep_id) else {
                return;
            };
            dep.entries.shift_remove(&effect_id);
            if !dep.entries.is_empty() {
                return;
            }
            deps.remove(dep_id).map(|dep| dep.owner)
        };
        match owner {
            Some(DepOwner::Target { target, key }) => {
                let mut targets = self.targets.borrow_mut();
                if let Some(entry) = targets.get_mut(target) {
                    entry.keys.remove(&key);
                }
            }
            Some(DepOwner::Source(source)) => {
                let mut sources = self.sources.borrow_mut();
                if let Some(state) = sources.get_mut(source) {
                    state.dep = None;
                }
            }
            None => {}
        }
    }

    fn edge_current(&self, dep_id: DepId, effect_id: EffectId, track_id: u64) -> bool {
        self.deps
            .borrow()
            .get(dep_id)
            .map(|dep| dep.entries.get(&effect_id) == Some(&track_id))
            .unwrap_or(false)
    }

    /// Notifies every effect subscribed to a dep, raising it to the target
    /// dirty level and collecting schedulers for the outermost resume.
    pub(crate) fn trigger_effects(&self, dep_id: DepId, level: DirtyLevel) {
        self.pause_scheduling();

        let subscribers: Vec<EffectId> = {
            let deps = self.deps.borrow();
            match deps.get(dep_id) {
                Some(dep) => dep.entries.keys().copied().collect(),
                None => Vec::new(),
            }
        };

        for effect_id in subscribers {
            // computed lazily, at most once per effect, and only after the
            // dirty lift had a chance to run
            let mut tracking: Option<bool> = None;

            {
                let mut effects = self.effects.borrow_mut();
                let Some(state) = effects.get_mut(effect_id) else {
                    continue;
                };
                if state.dirty < level {
                    let track_id = state.track_id;
                    let is_current = *tracking
                        .get_or_insert_with(|| self.edge_current(dep_id, effect_id, track_id));
                    if is_current {
                        if state.dirty == DirtyLevel::NotDirty {
                            state.should_schedule = true;
                        }
                        state.dirty = level;
                    }
                }
            }

            let (should_schedule, track_id, owner, dirty) = {
                let effects = self.effects.borrow();
                let Some(state) = effects.get(effect_id) else {
                    continue;
                };
                (
                    state.should_schedule,
                    state.track_id,
                    state.owner,
                    state.dirty,
                )
            };
            if !should_schedule {
                continue;
            }
            let is_current =
                *tracking.get_or_insert_with(|| self.edge_current(dep_id, effect_id, track_id));
            if !is_current {
                continue;
            }

            // a computed's notification propagates possible staleness to its
            // own subscribers
            if let Some(source) = owner {
                let propagated = if dirty == DirtyLevel::MaybeDirtyComputedSideEffect {
                    DirtyLevel::MaybeDirtyComputedSideEffect
                } else {
                    DirtyLevel::MaybeDirty
                };
                self.trigger_source(source, propagated);
            }

            let scheduler = {
                let mut effects = self.effects.borrow_mut();
                match effects.get_mut(effect_id) {
                    Some(state)
                        if (state.runnings == 0 || state.allow_recurse)
                            && state.dirty != DirtyLevel::MaybeDirtyComputedSideEffect =>
                    {
                        state.should_schedule = false;
                        state.scheduler.clone()
                    }
                    _ => None,
                }
            };
            if let Some(scheduler) = scheduler {
                self.pending_schedulers
                    .borrow_mut()
                    .push_back((effect_id, scheduler));
            }
        }

        self.reset_scheduling();
    }

    /// Resolves `MaybeDirty` states by forcing the evaluation of upstream
    /// computeds, then reports whether the effect is definitely stale.
    pub(crate) fn effect_dirty(&self, id: EffectId) -> bool {
        let level = match self.effects.borrow().get(id) {
            Some(state) => state.dirty,
            None => return false,
        };

        if matches!(
            level,
            DirtyLevel::MaybeDirtyComputedSideEffect | DirtyLevel::MaybeDirty
        ) {
            {
                let mut effects = self.effects.borrow_mut();
                if let Some(state) = effects.get_mut(id) {
                    state.dirty = DirtyLevel::QueryingDirty;
                }
            }
            self.pause_tracking();
            let deps: Vec<DepId> = {
                let effects = self.effects.borrow();
                match effects.get(id) {
                    Some(state) => state.deps[..state.deps_len].to_vec(),
                    None => Vec::new(),
                }
            };
            for dep_id in deps {
                let computed = self.deps.borrow().get(dep_id).and_then(|dep| dep.computed);
                if let Some(source) = computed {
                    self.update_computed(source);
                    let now = self
                        .effects
                        .borrow()
                        .get(id)
                        .map(|state| state.dirty)
                        .unwrap_or(DirtyLevel::NotDirty);
                    if now >= DirtyLevel::Dirty {
                        break;
                    }
                }
            }
            {
                let mut effects = self.effects.borrow_mut();
                if let Some(state) = effects.get_mut(id) {
                    if state.dirty == DirtyLevel::QueryingDirty {
                        state.dirty = DirtyLevel::NotDirty;
                    }
                }
            }
            self.reset_tracking();
        }

        self.effects
            .borrow()
            .get(id)
            .map(|state| state.dirty >= DirtyLevel::Dirty)
            .unwrap_or(false)
    }

    /// Deactivates an effect: drops every edge it holds and runs `on_stop`.
    pub(crate) fn stop_effect(&self, id: EffectId) {
        let (deps, on_stop) = {
            let mut effects = self.effects.borrow_mut();
            let Some(state) = effects.get_mut(id) else {
                return;
            };
            if !state.active {
                return;
            }
            state.active = false;
            state.deps_len = 0;
            (std::mem::take(&mut state.deps), state.on_stop.take())
        };
        for dep in deps {
            self.clean_dep_effect(dep, id);
        }
        if let Some(on_stop) = on_stop {
            on_stop();
        }
    }

    pub(crate) fn create_effect_state(
        &self,
        computation: Rc<dyn AnyComputation>,
        value: Rc<RefCell<dyn Any>>,
        options: EffectOptions,
    ) -> EffectId {
        let id = {
            let mut effects = self.effects.borrow_mut();
            let mut state = EffectState::new(computation, value);
            state.allow_recurse = options.allow_recurse;
            state.on_stop = options.on_stop;
            effects.insert(state)
        };
        let scheduler = match options.scheduling {
            Scheduling::Inline => EffectScheduler::Inline,
            Scheduling::Queued { id: job_id, pre, instance } => EffectScheduler::Job(
                self.effect_job(id, job_id, pre, instance, options.allow_recurse),
            ),
            Scheduling::Post { id: job_id, instance } => EffectScheduler::Post(
                self.effect_job(id, job_id, false, instance, options.allow_recurse),
            ),
            Scheduling::Custom(scheduler) => EffectScheduler::Custom(scheduler),
        };
        self.effects.borrow_mut()[id].scheduler = Some(scheduler);
        if !options.lazy {
            self.run_effect(id);
        }
        id
    }

    fn effect_job(
        &self,
        effect: EffectId,
        id: Option<u64>,
        pre: bool,
        instance: Option<InstanceId>,
        allow_recurse: bool,
    ) -> Job {
        let handle = AnyEffect {
            runtime: self.id,
            id: effect,
        };
        let job = SchedulerJob::new(move || {
            if handle.is_active() && handle.is_dirty() {
                handle.run();
            }
        });
        job.set_id(id);
        job.set_pre(pre);
        job.set_instance(instance);
        job.set_allow_recurse(allow_recurse);
        job
    }
}

/// When a notified effect actually re-runs.
#[derive(Clone, Default)]
pub enum Scheduling {
    /// Synchronously, as soon as the outermost trigger has finished
    /// notifying its dep set.
    #[default]
    Inline,
    /// As a job on the tick queue, ordered by `(id, pre)`.
    Queued {
        id: Option<u64>,
        pre: bool,
        instance: Option<InstanceId>,
    },
    /// As a post-flush callback of the tick.
    Post {
        id: Option<u64>,
        instance: Option<InstanceId>,
    },
    /// Handed to a caller-supplied scheduler, which receives the untyped
    /// effect handle and decides when to run it.
    Custom(Rc<dyn Fn(AnyEffect)>),
}

/// Options accepted by [`create_effect_with`].
#[derive(Default)]
pub struct EffectOptions {
    /// Skip the initial run; the effect first executes when its runner is
    /// invoked or a dependency changes.
    pub lazy: bool,
    /// Permit this effect to be scheduled again while it is running.
    pub allow_recurse: bool,
    pub scheduling: Scheduling,
    pub on_stop: Option<Box<dyn FnOnce()>>,
}

/// Handle to a reactive effect created with [`create_effect`].
pub struct Effect<T>
where
    T: 'static,
{
    pub(crate) runtime: RuntimeId,
    pub(crate) id: EffectId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for Effect<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Effect<T> {}

impl<T> std::fmt::Debug for Effect<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Effect");
        s.field("id", &self.id);
        #[cfg(debug_assertions)]
        s.field("defined_at", &self.defined_at);
        s.finish()
    }
}

impl<T> Effect<T> {
    /// The type-erased handle to the same effect.
    pub fn to_any(&self) -> AnyEffect {
        AnyEffect {
            runtime: self.runtime,
            id: self.id,
        }
    }

    /// Forces a re-run and returns the new value.
    pub fn run(&self) -> T
    where
        T: Clone,
    {
        self.try_run()
            .expect("tried to run an effect in a runtime that has been disposed")
    }

    /// Forces a re-run, returning `None` if the runtime or effect is gone.
    pub fn try_run(&self) -> Option<T>
    where
        T: Clone,
    {
        with_runtime(self.runtime, |runtime| {
            runtime.run_effect(self.id);
            let value = runtime
                .effects
                .borrow()
                .get(self.id)
                .map(|state| Rc::clone(&state.value))?;
            let value = value.borrow();
            value.downcast_ref::<Option<T>>().and_then(|value| value.clone())
        })
        .ok()
        .flatten()
    }

    /// Stops the effect: it is removed from every dep and never re-runs.
    pub fn stop(&self) {
        self.to_any().stop()
    }

    pub fn is_active(&self) -> bool {
        self.to_any().is_active()
    }
}

/// Type-erased handle to a reactive effect, used by custom schedulers.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AnyEffect {
    pub(crate) runtime: RuntimeId,
    pub(crate) id: EffectId,
}

impl AnyEffect {
    pub fn run(&self) {
        _ = with_runtime(self.runtime, |runtime| {
            runtime.run_effect(self.id);
        });
    }

    pub fn stop(&self) {
        _ = with_runtime(self.runtime, |runtime| runtime.stop_effect(self.id));
    }

    pub fn is_active(&self) -> bool {
        with_runtime(self.runtime, |runtime| {
            runtime
                .effects
                .borrow()
                .get(self.id)
                .map(|state| state.active)
                .unwrap_or(false)
        })
        .unwrap_or(false)
    }

    /// Whether the effect is definitely stale, resolving any `MaybeDirty`
    /// state on the way.
    pub fn is_dirty(&self) -> bool {
        with_runtime(self.runtime, |runtime| runtime.effect_dirty(self.id)).unwrap_or(false)
    }
}

/// Creates an effect that runs immediately, subscribes to every reactive
/// value it reads, and re-runs whenever one of them changes.
///
/// The function receives its own previous return value, `None` on the first
/// run. By default re-runs happen synchronously when the mutation that
/// invalidated the effect finishes notifying; pass a different
/// [`Scheduling`] through [`create_effect_with`] to defer them to the tick
/// queue instead.
#[track_caller]
pub fn create_effect<T>(f: impl Fn(Option<T>) -> T + 'static) -> Effect<T>
where
    T: 'static,
{
    create_effect_with(f, EffectOptions::default())
}

/// Creates an effect with explicit [`EffectOptions`].
#[track_caller]
pub fn create_effect_with<T>(
    f: impl Fn(Option<T>) -> T + 'static,
    options: EffectOptions,
) -> Effect<T>
where
    T: 'static,
{
    #[cfg(debug_assertions)]
    let defined_at = std::panic::Location::caller();
    let runtime =
        current_runtime().expect("tried to create an effect outside a reactive runtime");
    let id = with_runtime(runtime, |rt| {
        rt.create_effect_state(
            Rc::new(EffectComputation { f, ty: PhantomData }),
            Rc::new(RefCell::new(None::<T>)),
            options,
        )
    })
    .expect("tried to create an effect in a runtime that has been disposed");
    Effect {
        runtime,
        id,
        ty: PhantomData,
        #[cfg(debug_assertions)]
        defined_at,
    }
}
