use crate::{
    effect::{AnyComputation, DirtyLevel, EffectState},
    macros::debug_warn,
    runtime::{current_runtime, with_runtime, Runtime, RuntimeId},
    signal::{
        SignalGet, SignalGetUntracked, SignalSet, SignalWith, SignalWithUntracked, SourceId,
        SourceNode,
    },
};
use std::{any::Any, cell::RefCell, fmt::Debug, marker::PhantomData, rc::Rc};

cfg_if::cfg_if! {
    if #[cfg(feature = "ssr")] {
        // server rendering evaluates everything once; caching would only
        // pin stale values across the single pass
        const CACHEABLE: bool = false;
    } else {
        const CACHEABLE: bool = true;
    }
}

/// The recomputation behind a computed: runs the getter against the previous
/// value and reports whether the cache changed.
pub(crate) struct MemoComputation<T, F>
where
    T: PartialEq + 'static,
    F: Fn(Option<&T>) -> T,
{
    pub f: F,
    pub ty: PhantomData<T>,
}

impl<T, F> AnyComputation for MemoComputation<T, F>
where
    T: PartialEq + 'static,
    F: Fn(Option<&T>) -> T,
{
    fn run(&self, value: &Rc<RefCell<dyn Any>>) -> bool {
        // release the borrow around the user getter so nested reactive reads
        // stay legal
        let curr_value = {
            let mut value = value.borrow_mut();
            let value = value
                .downcast_mut::<Option<T>>()
                .expect("to downcast computed value");
            value.take()
        };

        let new_value = (self.f)(curr_value.as_ref());
        let changed = curr_value.as_ref() != Some(&new_value);

        let mut value = value.borrow_mut();
        let value = value
            .downcast_mut::<Option<T>>()
            .expect("to downcast computed value");
        *value = Some(new_value);

        changed
    }
}

pub(crate) struct SetterWrap<T>(pub Box<dyn Fn(T)>);

impl Runtime {
    /// Brings a computed's cache up to date: resolves its effect's dirty
    /// state, re-runs the getter when needed, and propagates changes to
    /// subscribers.
    pub(crate) fn update_computed(&self, id: SourceId) {
        let Some((effect, cacheable)) = ({
            let sources = self.sources.borrow();
            sources.get(id).and_then(|state| match state.node {
                SourceNode::Computed {
                    effect, cacheable, ..
                } => Some((effect, cacheable)),
                SourceNode::Signal => None,
            })
        }) else {
            return;
        };

        // update before subscribing the reader: the change notification for
        // this very read must not reach the effect that is consuming it
        if !cacheable || self.effect_dirty(effect) {
            let changed = self.run_effect(effect);
            if changed {
                self.trigger_source(id, DirtyLevel::Dirty);
            }
        }

        self.track_source(id);

        // a getter that wrote one of its own deps leaves this marker; keep
        // downstream subscribers suspicious rather than wrongly clean
        let residue = self
            .effects
            .borrow()
            .get(effect)
            .map(|state| state.dirty)
            .unwrap_or(DirtyLevel::NotDirty);
        if residue >= DirtyLevel::MaybeDirtyComputedSideEffect {
            self.trigger_source(id, DirtyLevel::MaybeDirtyComputedSideEffect);
        }
    }
}

/// A lazily recomputed, cached derived value.
///
/// Unlike a derived closure, a computed runs its getter at most once per
/// change of its dependencies, no matter how often it is read, and notifies
/// its own subscribers only when the computed value actually changed.
///
/// The getter receives the previous value, `None` on the first run.
pub struct Computed<T>
where
    T: PartialEq + 'static,
{
    pub(crate) runtime: RuntimeId,
    pub(crate) id: SourceId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T: PartialEq> Clone for Computed<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: PartialEq> Copy for Computed<T> {}

impl<T: PartialEq> Debug for Computed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Computed");
        s.field("id", &self.id);
        #[cfg(debug_assertions)]
        s.field("defined_at", &self.defined_at);
        s.finish()
    }
}

impl<T: PartialEq> PartialEq for Computed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.runtime == other.runtime && self.id == other.id
    }
}

impl<T: PartialEq> Eq for Computed<T> {}

impl<T: PartialEq + Clone> SignalGet<T> for Computed<T> {
    fn get(&self) -> T {
        self.with(Clone::clone)
    }

    fn try_get(&self) -> Option<T> {
        self.try_with(Clone::clone)
    }
}

impl<T: PartialEq> SignalWith<T> for Computed<T> {
    fn with<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        self.try_with(f)
            .expect("tried to access a computed in a runtime that has been disposed")
    }

    fn try_with<O>(&self, f: impl FnOnce(&T) -> O) -> Option<O> {
        with_runtime(self.runtime, |rt| {
            rt.update_computed(self.id);
            let value = rt.source_value(self.id)?;
            let value = value.borrow();
            value.downcast_ref::<Option<T>>()?.as_ref().map(f)
        })
        .ok()
        .flatten()
    }
}

impl<T: PartialEq + Clone> SignalGetUntracked<T> for Computed<T> {
    fn get_untracked(&self) -> T {
        self.with_untracked(Clone::clone)
    }

    fn try_get_untracked(&self) -> Option<T> {
        self.try_with_untracked(Clone::clone)
    }
}

impl<T: PartialEq> SignalWithUntracked<T> for Computed<T> {
    fn with_untracked<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        self.try_with_untracked(f)
            .expect("tried to access a computed in a runtime that has been disposed")
    }

    fn try_with_untracked<O>(&self, f: impl FnOnce(&T) -> O) -> Option<O> {
        with_runtime(self.runtime, |rt| {
            rt.pause_tracking();
            rt.update_computed(self.id);
            rt.reset_tracking();
            let value = rt.source_value(self.id)?;
            let value = value.borrow();
            value.downcast_ref::<Option<T>>()?.as_ref().map(f)
        })
        .ok()
        .flatten()
    }
}

impl<T: PartialEq> SignalSet<T> for Computed<T> {
    /// Writes through the computed's setter. Read-only computeds warn in
    /// debug builds and drop the value.
    fn set(&self, new_value: T) {
        if self.try_set(new_value).is_some() {
            debug_warn!("write operation failed: computed value is read-only");
        }
    }

    fn try_set(&self, new_value: T) -> Option<T> {
        let setter = with_runtime(self.runtime, |rt| {
            rt.sources.borrow().get(self.id).and_then(|state| match &state.node {
                SourceNode::Computed { setter, .. } => setter.clone(),
                SourceNode::Signal => None,
            })
        })
        .ok()
        .flatten();
        match setter.and_then(|setter| setter.downcast::<SetterWrap<T>>().ok()) {
            Some(setter) => {
                (setter.0)(new_value);
                None
            }
            None => Some(new_value),
        }
    }
}

/// Creates a lazily evaluated, cached derived value.
///
/// The getter runs on first read and again only after a dependency changed;
/// consecutive reads in between return the cache without re-running it.
///
/// ```
/// # use reactive_core::*;
/// # let runtime = create_runtime();
/// let (value, set_value) = create_signal(2);
/// let doubled = create_computed(move |_| value.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// set_value.set(5);
/// assert_eq!(doubled.get(), 10);
/// # runtime.dispose();
/// ```
#[track_caller]
pub fn create_computed<T>(f: impl Fn(Option<&T>) -> T + 'static) -> Computed<T>
where
    T: PartialEq + 'static,
{
    create_computed_inner(f, None)
}

/// Creates a computed with a write path: reading goes through `get`, writing
/// through `set`, which typically forwards to the underlying signals.
#[track_caller]
pub fn create_writable_computed<T>(
    get: impl Fn(Option<&T>) -> T + 'static,
    set: impl Fn(T) + 'static,
) -> Computed<T>
where
    T: PartialEq + 'static,
{
    create_computed_inner(get, Some(Rc::new(SetterWrap(Box::new(set))) as Rc<dyn Any>))
}

#[track_caller]
fn create_computed_inner<T>(
    f: impl Fn(Option<&T>) -> T + 'static,
    setter: Option<Rc<dyn Any>>,
) -> Computed<T>
where
    T: PartialEq + 'static,
{
    #[cfg(debug_assertions)]
    let defined_at = std::panic::Location::caller();
    let runtime =
        current_runtime().expect("tried to create a computed outside a reactive runtime");
    let id = with_runtime(runtime, |rt| {
        let value: Rc<RefCell<dyn Any>> = Rc::new(RefCell::new(None::<T>));
        let effect = rt.effects.borrow_mut().insert(EffectState::new(
            Rc::new(MemoComputation { f, ty: PhantomData }),
            Rc::clone(&value),
        ));
        let id = rt.create_source(
            value,
            SourceNode::Computed {
                effect,
                cacheable: CACHEABLE,
                setter,
            },
        );
        rt.effects.borrow_mut()[effect].owner = Some(id);
        id
    })
    .expect("tried to create a computed in a runtime that has been disposed");
    Computed {
        runtime,
        id,
        ty: PhantomData,
        #[cfg(debug_assertions)]
        defined_at,
    }
}
