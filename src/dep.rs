use crate::{effect::EffectId, graph::TargetId, signal::SourceId};
use core::hash::BuildHasherDefault;
use indexmap::IndexMap;
use rustc_hash::FxHasher;
use std::borrow::Cow;

pub(crate) type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

slotmap::new_key_type! {
    /// Unique ID assigned to a [`Dep`].
    pub(crate) struct DepId;
}

/// The set of effects subscribed to one reactive slot, in subscription
/// order.
///
/// Each entry pairs an effect with the trackId at which the edge was last
/// confirmed; an entry whose trackId no longer matches the effect's current
/// one is a stale edge and is ignored by notification.
pub(crate) struct Dep {
    pub entries: FxIndexMap<EffectId, u64>,
    pub owner: DepOwner,
    /// Back-reference to the computed this dep belongs to, if any. Used by
    /// the dirty-resolution walk to force upstream computeds.
    pub computed: Option<SourceId>,
}

impl Dep {
    pub fn new(owner: DepOwner, computed: Option<SourceId>) -> Self {
        Self {
            entries: FxIndexMap::default(),
            owner,
            computed,
        }
    }
}

/// Where a dep is registered, so it can unregister itself once its last
/// subscriber is gone.
pub(crate) enum DepOwner {
    /// A keyed slot on an external reactive target.
    Target { target: TargetId, key: DepKey },
    /// A signal or computed cell.
    Source(SourceId),
}

/// Key of one tracked slot on an external reactive target.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DepKey {
    /// A named property.
    Key(Cow<'static, str>),
    /// An integer index into a list.
    Index(usize),
    /// The length of a list.
    Length,
    /// Reserved key recording iteration over a whole collection.
    Iterate,
    /// Reserved key recording iteration over a keyed collection's keys.
    MapKeyIterate,
}

impl DepKey {
    pub fn key(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Key(name.into())
    }
}
