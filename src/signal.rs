use crate::{
    dep::{Dep, DepId, DepOwner},
    effect::{DirtyLevel, EffectId},
    macros::debug_warn,
    runtime::{current_runtime, with_runtime, Runtime, RuntimeId},
};
use std::{any::Any, cell::RefCell, fmt::Debug, marker::PhantomData, rc::Rc};
use thiserror::Error;

slotmap::new_key_type! {
    /// Unique ID assigned to a signal or computed cell.
    pub(crate) struct SourceId;
}

/// One reactive source cell: a signal's value, or a computed's cache.
pub(crate) struct SourceState {
    pub value: Rc<RefCell<dyn Any>>,
    /// Subscriber dep, created lazily on first tracked read.
    pub dep: Option<DepId>,
    pub node: SourceNode,
}

pub(crate) enum SourceNode {
    Signal,
    Computed {
        effect: EffectId,
        /// When false the getter re-runs on every read (eager mode).
        cacheable: bool,
        setter: Option<Rc<dyn Any>>,
    },
}

#[derive(Debug, Error)]
pub(crate) enum AccessError {
    #[error("tried to access a signal in a runtime that has been disposed")]
    RuntimeDisposed,
    #[error("tried to access a signal that has been disposed")]
    Disposed,
    #[error("error casting signal to type {0}")]
    Type(&'static str),
}

impl Runtime {
    pub(crate) fn create_source(&self, value: Rc<RefCell<dyn Any>>, node: SourceNode) -> SourceId {
        self.sources.borrow_mut().insert(SourceState {
            value,
            dep: None,
            node,
        })
    }

    /// Subscribes the running effect to a source cell.
    pub(crate) fn track_source(&self, id: SourceId) {
        if !self.should_track.get() {
            return;
        }
        let Some(observer) = self.observer.get() else {
            return;
        };
        let dep_id = {
            let mut sources = self.sources.borrow_mut();
            let Some(state) = sources.get_mut(id) else {
                return;
            };
            match state.dep {
                Some(dep_id) => dep_id,
                None => {
                    let computed =
                        matches!(state.node, SourceNode::Computed { .. }).then_some(id);
                    let dep_id = self
                        .deps
                        .borrow_mut()
                        .insert(Dep::new(DepOwner::Source(id), computed));
                    state.dep = Some(dep_id);
                    dep_id
                }
            }
        };
        self.track_effect(observer, dep_id);
    }

    /// Notifies a source cell's subscribers at the given dirty level.
    pub(crate) fn trigger_source(&self, id: SourceId, level: DirtyLevel) {
        let dep = self.sources.borrow().get(id).and_then(|state| state.dep);
        if let Some(dep_id) = dep {
            self.trigger_effects(dep_id, level);
        }
    }

    pub(crate) fn source_value(&self, id: SourceId) -> Option<Rc<RefCell<dyn Any>>> {
        self.sources.borrow().get(id).map(|state| Rc::clone(&state.value))
    }
}

impl SourceId {
    pub(crate) fn try_with<T, O>(
        self,
        runtime: RuntimeId,
        f: impl FnOnce(&T) -> O,
    ) -> Result<O, AccessError>
    where
        T: 'static,
    {
        with_runtime(runtime, |rt| {
            rt.track_source(self);
            self.read(rt, f)
        })
        .map_err(|_| AccessError::RuntimeDisposed)?
    }

    pub(crate) fn try_with_untracked<T, O>(
        self,
        runtime: RuntimeId,
        f: impl FnOnce(&T) -> O,
    ) -> Result<O, AccessError>
    where
        T: 'static,
    {
        with_runtime(runtime, |rt| self.read(rt, f))
            .map_err(|_| AccessError::RuntimeDisposed)?
    }

    fn read<T, O>(self, rt: &Runtime, f: impl FnOnce(&T) -> O) -> Result<O, AccessError>
    where
        T: 'static,
    {
        let value = rt.source_value(self).ok_or(AccessError::Disposed)?;
        let value = value.borrow();
        let value = value
            .downcast_ref::<T>()
            .ok_or(AccessError::Type(std::any::type_name::<T>()))?;
        Ok(f(value))
    }

    /// Writes a new value, notifying subscribers only when it differs from
    /// the current one. Returns the value back when the cell is gone.
    pub(crate) fn try_set<T>(self, runtime: RuntimeId, new_value: T) -> Option<T>
    where
        T: PartialEq + 'static,
    {
        let mut new_value = Some(new_value);
        _ = with_runtime(runtime, |rt| {
            let Some(value) = rt.source_value(self) else {
                return;
            };
            let changed = {
                let mut value = value.borrow_mut();
                match value.downcast_mut::<T>() {
                    Some(slot) => {
                        let candidate = new_value
                            .take()
                            .expect("signal value to be written at most once");
                        if *slot != candidate {
                            *slot = candidate;
                            true
                        } else {
                            false
                        }
                    }
                    None => {
                        debug_warn!(
                            "[Signal::set] failed when downcasting to Signal<{}>",
                            std::any::type_name::<T>()
                        );
                        false
                    }
                }
            };
            if changed {
                rt.trigger_source(self, DirtyLevel::Dirty);
            }
        });
        new_value
    }

    /// Mutates the value in place and notifies subscribers unconditionally.
    pub(crate) fn try_update<T, O>(
        self,
        runtime: RuntimeId,
        f: impl FnOnce(&mut T) -> O,
    ) -> Option<O>
    where
        T: 'static,
    {
        with_runtime(runtime, |rt| {
            let value = rt.source_value(self)?;
            let result = {
                let mut value = value.borrow_mut();
                let value = value.downcast_mut::<T>()?;
                f(value)
            };
            rt.trigger_source(self, DirtyLevel::Dirty);
            Some(result)
        })
        .ok()
        .flatten()
    }
}

/// Clones the current value out of a reactive source, subscribing the
/// running effect to it.
pub trait SignalGet<T> {
    /// Clones and returns the value, and subscribes the running effect.
    ///
    /// # Panics
    /// Panics if the signal's runtime has been disposed.
    #[track_caller]
    fn get(&self) -> T;

    /// Clones and returns the value, or `None` if the signal is gone.
    fn try_get(&self) -> Option<T>;
}

/// Borrows the current value of a reactive source, subscribing the running
/// effect to it.
pub trait SignalWith<T> {
    /// Applies `f` to the value, and subscribes the running effect.
    ///
    /// # Panics
    /// Panics if the signal's runtime has been disposed.
    #[track_caller]
    fn with<O>(&self, f: impl FnOnce(&T) -> O) -> O;

    /// Applies `f` to the value, or returns `None` if the signal is gone.
    fn try_with<O>(&self, f: impl FnOnce(&T) -> O) -> Option<O>;
}

/// Replaces the value of a writable reactive source.
pub trait SignalSet<T> {
    /// Sets the value and notifies subscribers if it actually changed.
    #[track_caller]
    fn set(&self, new_value: T);

    /// Sets the value if the signal is still alive. Returns the value back
    /// when it could not be written.
    fn try_set(&self, new_value: T) -> Option<T>;
}

/// Mutates the value of a writable reactive source in place.
pub trait SignalUpdate<T> {
    /// Applies `f` to the value and notifies subscribers.
    ///
    /// Unlike [`SignalSet::set`] this cannot compare old and new values, so
    /// it notifies unconditionally.
    #[track_caller]
    fn update(&self, f: impl FnOnce(&mut T));

    /// Applies `f` to the value and notifies subscribers, returning what `f`
    /// returned, or `None` if the signal is gone.
    fn try_update<O>(&self, f: impl FnOnce(&mut T) -> O) -> Option<O>;
}

/// Clones the current value without subscribing the running effect.
pub trait SignalGetUntracked<T> {
    #[track_caller]
    fn get_untracked(&self) -> T;

    fn try_get_untracked(&self) -> Option<T>;
}

/// Borrows the current value without subscribing the running effect.
pub trait SignalWithUntracked<T> {
    #[track_caller]
    fn with_untracked<O>(&self, f: impl FnOnce(&T) -> O) -> O;

    fn try_with_untracked<O>(&self, f: impl FnOnce(&T) -> O) -> Option<O>;
}

/// The getter half of a signal.
pub struct ReadSignal<T>
where
    T: 'static,
{
    pub(crate) runtime: RuntimeId,
    pub(crate) id: SourceId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ReadSignal<T> {}

impl<T> Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("ReadSignal");
        s.field("id", &self.id);
        #[cfg(debug_assertions)]
        s.field("defined_at", &self.defined_at);
        s.finish()
    }
}

impl<T> PartialEq for ReadSignal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.runtime == other.runtime && self.id == other.id
    }
}

impl<T> Eq for ReadSignal<T> {}

impl<T: Clone> SignalGet<T> for ReadSignal<T> {
    fn get(&self) -> T {
        self.with(Clone::clone)
    }

    fn try_get(&self) -> Option<T> {
        self.try_with(Clone::clone)
    }
}

impl<T> SignalWith<T> for ReadSignal<T> {
    fn with<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        match self.id.try_with(self.runtime, f) {
            Ok(o) => o,
            Err(err) => panic!("{err}"),
        }
    }

    fn try_with<O>(&self, f: impl FnOnce(&T) -> O) -> Option<O> {
        self.id.try_with(self.runtime, f).ok()
    }
}

impl<T: Clone> SignalGetUntracked<T> for ReadSignal<T> {
    fn get_untracked(&self) -> T {
        self.with_untracked(Clone::clone)
    }

    fn try_get_untracked(&self) -> Option<T> {
        self.try_with_untracked(Clone::clone)
    }
}

impl<T> SignalWithUntracked<T> for ReadSignal<T> {
    fn with_untracked<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        match self.id.try_with_untracked(self.runtime, f) {
            Ok(o) => o,
            Err(err) => panic!("{err}"),
        }
    }

    fn try_with_untracked<O>(&self, f: impl FnOnce(&T) -> O) -> Option<O> {
        self.id.try_with_untracked(self.runtime, f).ok()
    }
}

/// The setter half of a signal.
pub struct WriteSignal<T>
where
    T: 'static,
{
    pub(crate) runtime: RuntimeId,
    pub(crate) id: SourceId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for WriteSignal<T> {}

impl<T> Debug for WriteSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("WriteSignal");
        s.field("id", &self.id);
        #[cfg(debug_assertions)]
        s.field("defined_at", &self.defined_at);
        s.finish()
    }
}

impl<T> PartialEq for WriteSignal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.runtime == other.runtime && self.id == other.id
    }
}

impl<T> Eq for WriteSignal<T> {}

impl<T: PartialEq> SignalSet<T> for WriteSignal<T> {
    fn set(&self, new_value: T) {
        self.try_set(new_value);
    }

    fn try_set(&self, new_value: T) -> Option<T> {
        self.id.try_set(self.runtime, new_value)
    }
}

impl<T> SignalUpdate<T> for WriteSignal<T> {
    fn update(&self, f: impl FnOnce(&mut T)) {
        if self.try_update(f).is_none() {
            debug_warn!("attempted to update a signal after it was disposed");
        }
    }

    fn try_update<O>(&self, f: impl FnOnce(&mut T) -> O) -> Option<O> {
        self.id.try_update(self.runtime, f)
    }
}

/// A signal that can be both read and written through one handle.
pub struct RwSignal<T>
where
    T: 'static,
{
    pub(crate) runtime: RuntimeId,
    pub(crate) id: SourceId,
    pub(crate) ty: PhantomData<T>,
    #[cfg(debug_assertions)]
    pub(crate) defined_at: &'static std::panic::Location<'static>,
}

impl<T> Clone for RwSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RwSignal<T> {}

impl<T> Debug for RwSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("RwSignal");
        s.field("id", &self.id);
        #[cfg(debug_assertions)]
        s.field("defined_at", &self.defined_at);
        s.finish()
    }
}

impl<T> PartialEq for RwSignal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.runtime == other.runtime && self.id == other.id
    }
}

impl<T> Eq for RwSignal<T> {}

impl<T: Clone> SignalGet<T> for RwSignal<T> {
    fn get(&self) -> T {
        self.with(Clone::clone)
    }

    fn try_get(&self) -> Option<T> {
        self.try_with(Clone::clone)
    }
}

impl<T> SignalWith<T> for RwSignal<T> {
    fn with<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        match self.id.try_with(self.runtime, f) {
            Ok(o) => o,
            Err(err) => panic!("{err}"),
        }
    }

    fn try_with<O>(&self, f: impl FnOnce(&T) -> O) -> Option<O> {
        self.id.try_with(self.runtime, f).ok()
    }
}

impl<T: Clone> SignalGetUntracked<T> for RwSignal<T> {
    fn get_untracked(&self) -> T {
        self.with_untracked(Clone::clone)
    }

    fn try_get_untracked(&self) -> Option<T> {
        self.try_with_untracked(Clone::clone)
    }
}

impl<T> SignalWithUntracked<T> for RwSignal<T> {
    fn with_untracked<O>(&self, f: impl FnOnce(&T) -> O) -> O {
        match self.id.try_with_untracked(self.runtime, f) {
            Ok(o) => o,
            Err(err) => panic!("{err}"),
        }
    }

    fn try_with_untracked<O>(&self, f: impl FnOnce(&T) -> O) -> Option<O> {
        self.id.try_with_untracked(self.runtime, f).ok()
    }
}

impl<T: PartialEq> SignalSet<T> for RwSignal<T> {
    fn set(&self, new_value: T) {
        self.try_set(new_value);
    }

    fn try_set(&self, new_value: T) -> Option<T> {
        self.id.try_set(self.runtime, new_value)
    }
}

impl<T> SignalUpdate<T> for RwSignal<T> {
    fn update(&self, f: impl FnOnce(&mut T)) {
        if self.try_update(f).is_none() {
            debug_warn!("attempted to update a signal after it was disposed");
        }
    }

    fn try_update<O>(&self, f: impl FnOnce(&mut T) -> O) -> Option<O> {
        self.id.try_update(self.runtime, f)
    }
}

impl<T> RwSignal<T> {
    /// Splits this signal into its getter and setter halves.
    #[track_caller]
    pub fn split(&self) -> (ReadSignal<T>, WriteSignal<T>) {
        (
            ReadSignal {
                runtime: self.runtime,
                id: self.id,
                ty: PhantomData,
                #[cfg(debug_assertions)]
                defined_at: std::panic::Location::caller(),
            },
            WriteSignal {
                runtime: self.runtime,
                id: self.id,
                ty: PhantomData,
                #[cfg(debug_assertions)]
                defined_at: std::panic::Location::caller(),
            },
        )
    }

    /// A read-only handle to the same signal.
    #[track_caller]
    pub fn read_only(&self) -> ReadSignal<T> {
        self.split().0
    }

    /// A write-only handle to the same signal.
    #[track_caller]
    pub fn write_only(&self) -> WriteSignal<T> {
        self.split().1
    }
}

/// Creates a reactive value, returning a `(getter, setter)` pair.
///
/// Reads through the getter subscribe the running effect; writes through
/// the setter notify subscribers when the value actually changed.
#[track_caller]
pub fn create_signal<T>(value: T) -> (ReadSignal<T>, WriteSignal<T>)
where
    T: 'static,
{
    let runtime =
        current_runtime().expect("tried to create a signal outside a reactive runtime");
    let id = with_runtime(runtime, |rt| {
        rt.create_source(
            Rc::new(RefCell::new(value)) as Rc<RefCell<dyn Any>>,
            SourceNode::Signal,
        )
    })
    .expect("tried to create a signal in a runtime that has been disposed");
    (
        ReadSignal {
            runtime,
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        },
        WriteSignal {
            runtime,
            id,
            ty: PhantomData,
            #[cfg(debug_assertions)]
            defined_at: std::panic::Location::caller(),
        },
    )
}

/// Creates a reactive value with a single read-write handle.
#[track_caller]
pub fn create_rw_signal<T>(value: T) -> RwSignal<T>
where
    T: 'static,
{
    let runtime =
        current_runtime().expect("tried to create a signal outside a reactive runtime");
    let id = with_runtime(runtime, |rt| {
        rt.create_source(
            Rc::new(RefCell::new(value)) as Rc<RefCell<dyn Any>>,
            SourceNode::Signal,
        )
    })
    .expect("tried to create a signal in a runtime that has been disposed");
    RwSignal {
        runtime,
        id,
        ty: PhantomData,
        #[cfg(debug_assertions)]
        defined_at: std::panic::Location::caller(),
    }
}
