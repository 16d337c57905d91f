//! Change-tracked containers.
//!
//! Lists, sets, maps and LinkBags stored in record properties record every
//! mutation as a [`ChangeEvent`] on a per-property [`Timeline`]. The index
//! maintenance engine replays these timelines instead of recomputing the
//! full key set of large collections.
//!
//! A container knows its owner only through an [`OwnerLink`]: the owning
//! record's identity plus the property name. It never holds a reference to
//! the record itself; the record marks itself dirty through the mutable
//! accessor guards in [`crate::record`].
//!
//! Tracking states of a container:
//!
//! | owner | timeline | meaning |
//! |-------|----------|---------|
//! | none  | none     | detached (standalone or cloned) |
//! | some  | some     | tracking since load or last checkpoint |
//! | some  | none     | assigned as a new instance; full diff required |

pub use event::{ChangeEvent, ChangeKind, DeltaCounter, EventKey, Timeline};
pub use link_bag::{LinkBag, LinkBagEntry, DEFAULT_TREE_THRESHOLD};
pub use list::TrackedList;
pub use map::TrackedMap;
pub use set::TrackedSet;

use crate::types::RecordId;

/// Non-owning back-reference from a container to the property holding it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerLink {
    /// Owning record.
    pub record: RecordId,
    /// Property name inside the record.
    pub property: String,
}

/// Tracking metadata shared by all container kinds.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    owner: Option<OwnerLink>,
    timeline: Option<Timeline>,
    modifications: u64,
}

impl Tracker {
    pub(crate) fn record(&mut self, event: ChangeEvent) {
        self.modifications += 1;
        if let Some(timeline) = &mut self.timeline {
            timeline.push(event);
        }
    }

    /// Counts a mutation that is not reported as an event.
    pub(crate) fn touch(&mut self) {
        self.modifications += 1;
    }

    pub(crate) fn modifications(&self) -> u64 {
        self.modifications
    }

    pub(crate) fn owner(&self) -> Option<&OwnerLink> {
        self.owner.as_ref()
    }

    pub(crate) fn timeline(&self) -> Option<&Timeline> {
        self.timeline.as_ref()
    }

    /// Attaches with a fresh, empty timeline.
    pub(crate) fn start_tracking(&mut self, owner: OwnerLink) {
        self.owner = Some(owner);
        self.timeline = Some(Timeline::default());
    }

    /// Attaches as a wholesale replacement: no timeline until the next checkpoint.
    pub(crate) fn attach_replaced(&mut self, owner: OwnerLink) {
        self.owner = Some(owner);
        self.timeline = None;
    }

    /// Starts a new timeline for an attached container.
    pub(crate) fn checkpoint(&mut self) {
        if self.owner.is_some() {
            self.timeline = Some(Timeline::default());
        }
    }
}

impl Clone for Tracker {
    /// A clone is a new, detached instance.
    fn clone(&self) -> Self {
        Self::default()
    }
}

/// Operations every tracked container supports, used by records to attach
/// and checkpoint containers without knowing their kind.
pub(crate) trait Tracked {
    fn tracker(&self) -> &Tracker;
    fn tracker_mut(&mut self) -> &mut Tracker;
}

macro_rules! impl_tracked {
    ($ty:ty) => {
        impl $crate::tracked::Tracked for $ty {
            fn tracker(&self) -> &$crate::tracked::Tracker {
                &self.tracker
            }

            fn tracker_mut(&mut self) -> &mut $crate::tracked::Tracker {
                &mut self.tracker
            }
        }

        impl $ty {
            /// Returns the changes recorded since the container was attached
            /// to its record, or `None` if it was replaced wholesale since
            /// then or was never attached.
            #[must_use]
            pub fn change_timeline(&self) -> Option<&$crate::tracked::Timeline> {
                self.tracker.timeline()
            }

            /// Returns the owning record and property, if attached.
            #[must_use]
            pub fn owner(&self) -> Option<&$crate::tracked::OwnerLink> {
                self.tracker.owner()
            }

            /// Number of mutations applied to this instance.
            #[must_use]
            pub fn modification_count(&self) -> u64 {
                self.tracker.modifications()
            }
        }
    };
}

mod event;
mod link_bag;
mod list;
mod map;
mod set;

/// Applies `f` to the tracker of a container value; no-op for scalars.
pub(crate) fn with_tracker(value: &mut crate::value::Value, f: impl FnOnce(&mut Tracker)) {
    use crate::value::Value;
    match value {
        Value::List(l) => f(l.tracker_mut()),
        Value::Set(s) => f(s.tracker_mut()),
        Value::Map(m) => f(m.tracker_mut()),
        Value::LinkBag(b) => f(b.tracker_mut()),
        _ => {}
    }
}

/// Returns the tracker of a container value.
pub(crate) fn tracker_of(value: &crate::value::Value) -> Option<&Tracker> {
    use crate::value::Value;
    match value {
        Value::List(l) => Some(l.tracker()),
        Value::Set(s) => Some(s.tracker()),
        Value::Map(m) => Some(m.tracker()),
        Value::LinkBag(b) => Some(b.tracker()),
        _ => None,
    }
}

/// Detached copy of a container as it was before the events of `timeline`.
pub(crate) fn rewind(value: &crate::value::Value, timeline: &Timeline) -> crate::value::Value {
    use crate::value::Value;
    let mut value = value.clone();
    for event in timeline.events().iter().rev() {
        match &mut value {
            Value::List(l) => l.undo(event),
            Value::Set(s) => s.undo(event),
            Value::Map(m) => m.undo(event),
            Value::LinkBag(b) => b.undo(event),
            _ => {}
        }
    }
    value
}
