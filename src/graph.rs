use crate::{
    dep::{Dep, DepId, DepKey, DepOwner},
    effect::DirtyLevel,
    runtime::{with_current_runtime, Runtime},
};
use rustc_hash::FxHashMap;

slotmap::new_key_type! {
    /// Stable handle registered for one external reactive object.
    pub struct TargetId;
}

/// Container semantics of an external target, declared at registration.
///
/// Replaces dynamic shape checks in the trigger path: lists get length
/// semantics, keyed collections get key-iteration deps.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TargetKind {
    Plain,
    List,
    Map,
}

pub(crate) struct TargetEntry {
    pub kind: TargetKind,
    pub keys: FxHashMap<DepKey, DepId>,
}

/// The kind of read being tracked.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TrackOp {
    Get,
    Has,
    Iterate,
}

/// The kind of write being signalled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriggerOp {
    Set,
    Add,
    Delete,
    Clear,
}

/// Registers an external reactive object, returning the stable handle its
/// proxy layer passes to [`track`] and [`trigger`].
pub fn register_target(kind: TargetKind) -> TargetId {
    with_current_runtime(|runtime| {
        runtime.targets.borrow_mut().insert(TargetEntry {
            kind,
            keys: FxHashMap::default(),
        })
    })
    .expect("tried to register a reactive target outside a reactive runtime")
}

/// Drops a target and every dep hanging off it. Must be called when the
/// reactive wrapper for the target goes away.
pub fn deregister_target(target: TargetId) {
    _ = with_current_runtime(|runtime| runtime.deregister_target(target));
}

/// Records that the running effect read `key` of `target`.
///
/// Called by external reactive proxies on every observable read. A no-op
/// when tracking is paused or no effect is running.
pub fn track(target: TargetId, op: TrackOp, key: DepKey) {
    _ = with_current_runtime(|runtime| runtime.track_target(target, op, key));
}

/// Notifies every effect affected by a write to `target`.
///
/// Called by external reactive proxies on every observable write. `new_len`
/// is only meaningful when a list's `Length` key is set, and prunes
/// index deps at or past the new length.
pub fn trigger(target: TargetId, op: TriggerOp, key: Option<DepKey>, new_len: Option<usize>) {
    _ = with_current_runtime(|runtime| runtime.trigger_target(target, op, key, new_len));
}

impl Runtime {
    pub(crate) fn track_target(&self, target: TargetId, op: TrackOp, key: DepKey) {
        if !self.should_track.get() {
            return;
        }
        let Some(observer) = self.observer.get() else {
            return;
        };
        tracing::trace!(?op, ?key, "tracking target read");

        let dep_id = {
            let mut targets = self.targets.borrow_mut();
            let Some(entry) = targets.get_mut(target) else {
                return;
            };
            match entry.keys.get(&key) {
                Some(dep_id) => *dep_id,
                None => {
                    let dep_id = self.deps.borrow_mut().insert(Dep::new(
                        DepOwner::Target {
                            target,
                            key: key.clone(),
                        },
                        None,
                    ));
                    entry.keys.insert(key, dep_id);
                    dep_id
                }
            }
        };
        self.track_effect(observer, dep_id);
    }

    pub(crate) fn trigger_target(
        &self,
        target: TargetId,
        op: TriggerOp,
        key: Option<DepKey>,
        new_len: Option<usize>,
    ) {
        let to_notify: Vec<DepId> = {
            let targets = self.targets.borrow();
            let Some(entry) = targets.get(target) else {
                return;
            };
            let mut found = Vec::new();
            if op == TriggerOp::Clear {
                // every key of the collection is affected
                found.extend(entry.keys.values().copied());
            } else if entry.kind == TargetKind::List && key == Some(DepKey::Length) {
                let new_len = new_len.unwrap_or(0);
                for (key, dep_id) in &entry.keys {
                    match key {
                        DepKey::Length => found.push(*dep_id),
                        DepKey::Index(index) if *index >= new_len => found.push(*dep_id),
                        _ => {}
                    }
                }
            } else {
                if let Some(key) = &key {
                    if let Some(dep_id) = entry.keys.get(key) {
                        found.push(*dep_id);
                    }
                }
                match op {
                    TriggerOp::Add => {
                        if entry.kind != TargetKind::List {
                            if let Some(dep_id) = entry.keys.get(&DepKey::Iterate) {
                                found.push(*dep_id);
                            }
                            if entry.kind == TargetKind::Map {
                                if let Some(dep_id) = entry.keys.get(&DepKey::MapKeyIterate) {
                                    found.push(*dep_id);
                                }
                            }
                        } else if matches!(key, Some(DepKey::Index(_))) {
                            // adding an indexed element grows the list
                            if let Some(dep_id) = entry.keys.get(&DepKey::Length) {
                                found.push(*dep_id);
                            }
                        }
                    }
                    TriggerOp::Delete => {
                        if entry.kind != TargetKind::List {
                            if let Some(dep_id) = entry.keys.get(&DepKey::Iterate) {
                                found.push(*dep_id);
                            }
                            if entry.kind == TargetKind::Map {
                                if let Some(dep_id) = entry.keys.get(&DepKey::MapKeyIterate) {
                                    found.push(*dep_id);
                                }
                            }
                        }
                    }
                    TriggerOp::Set => {
                        if entry.kind == TargetKind::Map {
                            if let Some(dep_id) = entry.keys.get(&DepKey::Iterate) {
                                found.push(*dep_id);
                            }
                        }
                    }
                    TriggerOp::Clear => {}
                }
            }
            found
        };

        tracing::trace!(?op, ?key, deps = to_notify.len(), "triggering target write");

        // one bracket around the whole collection makes the notification
        // atomic: schedulers run only after every dep has been raised
        self.pause_scheduling();
        for dep_id in to_notify {
            self.trigger_effects(dep_id, DirtyLevel::Dirty);
        }
        self.reset_scheduling();
    }

    pub(crate) fn deregister_target(&self, target: TargetId) {
        let entry = self.targets.borrow_mut().remove(target);
        if let Some(entry) = entry {
            let mut deps = self.deps.borrow_mut();
            for dep_id in entry.keys.into_values() {
                deps.remove(dep_id);
            }
        }
    }
}
