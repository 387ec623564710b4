#![forbid(unsafe_code)]

//! A fine-grained reactive system paired with a batched tick scheduler.
//!
//! The engine tracks which computations depend on which mutable state,
//! recomputes them when that state changes, and orders the recomputations
//! deterministically across a single logical tick. It is rendering-agnostic:
//! anything that must re-evaluate derived values when inputs change can sit
//! on top of it.
//!
//! Three pieces cooperate:
//!
//! 1. A **dependency graph**: signals, computeds, and externally registered
//!    targets each own deps, the ordered sets of effects subscribed to them.
//!    Edges are re-collected on every run, so conditional reads never leave
//!    stale subscriptions behind.
//! 2. **Effects** with a dirty-level protocol: a notification raises an
//!    effect to `Dirty` or just "maybe dirty" (when it arrives through a
//!    computed), and maybe-dirty states are resolved lazily by forcing the
//!    upstream computeds before deciding to re-run.
//! 3. A **tick scheduler**: mutations enqueue jobs, deduplicated by
//!    identity and ordered by `(id, pre)`; [`next_tick`] is the tick
//!    boundary that flushes pre, main, then post jobs to quiescence.
//!
//! ```
//! use reactive_core::*;
//!
//! let runtime = create_runtime();
//!
//! let (count, set_count) = create_signal(0);
//! let double = create_computed(move |_| count.get() * 2);
//!
//! let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
//! let seen = std::rc::Rc::clone(&log);
//! create_effect(move |_| seen.borrow_mut().push(double.get()));
//!
//! set_count.set(2);
//! assert_eq!(*log.borrow(), vec![0, 4]);
//!
//! // writing the same value again notifies nobody
//! set_count.set(2);
//! assert_eq!(*log.borrow(), vec![0, 4]);
//!
//! runtime.dispose();
//! ```
//!
//! The engine is strictly single-threaded: all state lives in a
//! thread-local runtime created with [`create_runtime`]. Handles are `Copy`
//! ids into that runtime, so they can be moved freely into closures.

mod computed;
mod dep;
mod effect;
mod error;
mod graph;
mod macros;
mod runtime;
mod scheduler;
mod signal;
mod traverse;
mod watch;

pub use computed::{create_computed, create_writable_computed, Computed};
pub use dep::DepKey;
pub use effect::{
    create_effect, create_effect_with, AnyEffect, Effect, EffectOptions, Scheduling,
};
pub use error::{set_error_handler, ErrorKind, ReactiveError};
pub use graph::{
    deregister_target, register_target, track, trigger, TargetId, TargetKind, TrackOp, TriggerOp,
};
pub use runtime::{
    create_runtime, enable_tracking, pause_scheduling, pause_tracking, reset_scheduling,
    reset_tracking, untrack, RuntimeId,
};
pub use scheduler::{
    flush_pre_flush_cbs, invalidate_job, next_tick, next_tick_with, queue_job,
    queue_post_flush_cb, queue_post_flush_cbs, InstanceId, Job, NextTick, SchedulerJob,
};
pub use signal::{
    create_rw_signal, create_signal, ReadSignal, RwSignal, SignalGet, SignalGetUntracked,
    SignalSet, SignalUpdate, SignalWith, SignalWithUntracked, WriteSignal,
};
pub use traverse::{traverse, Raw, Traverse};
pub use watch::{
    watch, watch_effect, watch_post_effect, watch_sync_effect, FlushMode, OnCleanup,
    WatchOptions,
};
