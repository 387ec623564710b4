use crate::{
    dep::{Dep, DepId},
    effect::{EffectId, EffectScheduler, EffectState},
    error::ReactiveError,
    graph::{TargetEntry, TargetId},
    macros::debug_warn,
    scheduler::Job,
    signal::{SourceId, SourceState},
};
use slotmap::SlotMap;
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt::Debug,
    rc::Rc,
};

slotmap::new_key_type! {
    /// Unique ID assigned to a reactive runtime.
    pub struct RuntimeId;
}

thread_local! {
    pub(crate) static RUNTIMES: RefCell<SlotMap<RuntimeId, Runtime>> = Default::default();
    pub(crate) static CURRENT_RUNTIME: Cell<Option<RuntimeId>> = const { Cell::new(None) };
}

// The data structure that owns all the effects, deps, sources, and scheduler
// queues of one reactive system. Strictly single-threaded: one executor per
// runtime, no locks anywhere.
pub(crate) struct Runtime {
    pub id: RuntimeId,
    pub effects: RefCell<SlotMap<EffectId, EffectState>>,
    pub deps: RefCell<SlotMap<DepId, Dep>>,
    pub sources: RefCell<SlotMap<SourceId, SourceState>>,
    pub targets: RefCell<SlotMap<TargetId, TargetEntry>>,

    /// The effect currently collecting dependencies, if any.
    pub observer: Cell<Option<EffectId>>,
    pub should_track: Cell<bool>,
    pub track_stack: RefCell<Vec<bool>>,

    /// Depth of nested `pause_scheduling` brackets. Pending schedulers drain
    /// only when the outermost bracket resumes.
    pub scheduling_depth: Cell<usize>,
    pub pending_schedulers: RefCell<VecDeque<(EffectId, EffectScheduler)>>,

    // tick scheduler state
    pub queue: RefCell<Vec<Job>>,
    pub flush_index: Cell<usize>,
    pub pending_post_cbs: RefCell<Vec<Job>>,
    pub active_post_cbs: RefCell<Option<Vec<Job>>>,
    pub post_flush_index: Cell<usize>,
    pub is_flushing: Cell<bool>,
    pub is_flush_pending: Cell<bool>,

    pub error_handler: RefCell<Option<Rc<dyn Fn(&ReactiveError)>>>,
}

impl Runtime {
    fn new(id: RuntimeId) -> Self {
        Self {
            id,
            effects: Default::default(),
            deps: Default::default(),
            sources: Default::default(),
            targets: Default::default(),
            observer: Cell::new(None),
            should_track: Cell::new(true),
            track_stack: Default::default(),
            scheduling_depth: Cell::new(0),
            pending_schedulers: Default::default(),
            queue: Default::default(),
            flush_index: Cell::new(0),
            pending_post_cbs: Default::default(),
            active_post_cbs: RefCell::new(None),
            post_flush_index: Cell::new(0),
            is_flushing: Cell::new(false),
            is_flush_pending: Cell::new(false),
            error_handler: RefCell::new(None),
        }
    }

    pub(crate) fn pause_tracking(&self) {
        self.track_stack
            .borrow_mut()
            .push(self.should_track.replace(false));
    }

    pub(crate) fn enable_tracking(&self) {
        self.track_stack
            .borrow_mut()
            .push(self.should_track.replace(true));
    }

    pub(crate) fn reset_tracking(&self) {
        let last = self.track_stack.borrow_mut().pop();
        self.should_track.set(last.unwrap_or(true));
    }

    pub(crate) fn pause_scheduling(&self) {
        self.scheduling_depth.set(self.scheduling_depth.get() + 1);
    }

    pub(crate) fn reset_scheduling(&self) {
        let depth = self.scheduling_depth.get().saturating_sub(1);
        self.scheduling_depth.set(depth);

        // drain only at the outermost bracket, so one `trigger` call
        // notifies its whole dep set atomically
        while self.scheduling_depth.get() == 0 {
            let next = self.pending_schedulers.borrow_mut().pop_front();
            let Some((effect_id, scheduler)) = next else {
                break;
            };
            match scheduler {
                EffectScheduler::Inline => {
                    let active = self
                        .effects
                        .borrow()
                        .get(effect_id)
                        .map(|state| state.active)
                        .unwrap_or(false);
                    if active && self.effect_dirty(effect_id) {
                        self.run_effect(effect_id);
                    }
                }
                EffectScheduler::Job(job) => self.queue_job(&job),
                EffectScheduler::Post(job) => self.queue_post_flush_cb(job),
                EffectScheduler::Custom(scheduler) => {
                    scheduler(crate::effect::AnyEffect {
                        runtime: self.id,
                        id: effect_id,
                    })
                }
            }
        }
    }
}

impl Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id)
            .field("observer", &self.observer)
            .field("effects", &self.effects.borrow().len())
            .field("deps", &self.deps.borrow().len())
            .field("sources", &self.sources.borrow().len())
            .field("queued_jobs", &self.queue.borrow().len())
            .finish()
    }
}

impl PartialEq for Runtime {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for Runtime {}

/// Creates a new reactive runtime and makes it current for this thread.
///
/// Every signal, effect, computed, and scheduler queue lives inside a
/// runtime; dropping the runtime with [`RuntimeId::dispose`] releases all of
/// them at once.
#[must_use = "Runtime will leak memory if RuntimeId::dispose() is never called."]
pub fn create_runtime() -> RuntimeId {
    let id = RUNTIMES.with(|runtimes| runtimes.borrow_mut().insert_with_key(Runtime::new));
    CURRENT_RUNTIME.with(|current| current.set(Some(id)));
    id
}

impl RuntimeId {
    /// Removes the runtime and everything it owns.
    pub fn dispose(self) {
        let runtime = RUNTIMES.with(|runtimes| runtimes.borrow_mut().remove(self));
        if runtime.is_none() {
            debug_warn!("tried to dispose of a reactive runtime that was not found");
        }
        CURRENT_RUNTIME.with(|current| {
            if current.get() == Some(self) {
                current.set(None);
            }
        });
    }

    /// Makes this runtime the current one for the calling thread.
    pub fn make_current(self) {
        CURRENT_RUNTIME.with(|current| current.set(Some(self)));
    }
}

pub(crate) fn current_runtime() -> Option<RuntimeId> {
    CURRENT_RUNTIME.with(Cell::get)
}

#[inline(always)] // it monomorphizes anyway
pub(crate) fn with_runtime<T>(id: RuntimeId, f: impl FnOnce(&Runtime) -> T) -> Result<T, ()> {
    RUNTIMES.with(|runtimes| {
        let runtimes = runtimes.borrow();
        match runtimes.get(id) {
            None => Err(()),
            Some(runtime) => Ok(f(runtime)),
        }
    })
}

pub(crate) fn with_current_runtime<T>(f: impl FnOnce(&Runtime) -> T) -> Option<T> {
    current_runtime().and_then(|id| with_runtime(id, f).ok())
}

/// Suspends dependency tracking on the current runtime.
///
/// Pushes the previous tracking flag onto a stack, so
/// [`pause_tracking`]/[`enable_tracking`] brackets compose; restore with
/// [`reset_tracking`].
pub fn pause_tracking() {
    _ = with_current_runtime(Runtime::pause_tracking);
}

/// Re-enables dependency tracking; restore with [`reset_tracking`].
pub fn enable_tracking() {
    _ = with_current_runtime(Runtime::enable_tracking);
}

/// Restores the tracking flag saved by the matching
/// [`pause_tracking`]/[`enable_tracking`] call.
pub fn reset_tracking() {
    _ = with_current_runtime(Runtime::reset_tracking);
}

/// Defers effect scheduling until the matching [`reset_scheduling`] call.
///
/// Brackets nest; notifications collected inside run only when the outermost
/// bracket resumes.
pub fn pause_scheduling() {
    _ = with_current_runtime(Runtime::pause_scheduling);
}

/// Resumes effect scheduling paused by [`pause_scheduling`].
pub fn reset_scheduling() {
    _ = with_current_runtime(Runtime::reset_scheduling);
}

/// Runs `f` with dependency tracking suspended, so reactive reads inside it
/// do not subscribe the running effect.
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    struct ResetOnDrop;

    impl Drop for ResetOnDrop {
        fn drop(&mut self) {
            reset_tracking();
        }
    }

    pause_tracking();
    let _reset = ResetOnDrop;
    f()
}
