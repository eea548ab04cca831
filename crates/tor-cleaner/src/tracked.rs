//! Non-owning handles onto tracked objects

use crate::internal_prelude::*;

/// A non-owning handle onto an object whose reachability is being tracked
///
/// Holding a `Tracked` never keeps the object alive.
/// The cleaner itself never looks through it;
/// it exists so that a [`Reclaimer`] can tell when the object has gone.
///
/// All clones refer to the same object.
#[derive(Clone)]
pub struct Tracked(Weak<dyn Any + Send + Sync>);

impl Tracked {
    /// Track the object inside `arc`
    pub fn new<T: Any + Send + Sync>(arc: &Arc<T>) -> Self {
        let weak: Weak<T> = Arc::downgrade(arc);
        Tracked::from_weak(weak)
    }

    /// Track the object behind an existing `Weak`
    ///
    /// If `weak` is already dangling, the result is immediately [gone](Tracked::is_gone).
    pub fn from_weak<T: Any + Send + Sync>(weak: Weak<T>) -> Self {
        Tracked(weak)
    }

    /// Has the tracked object been dropped?
    ///
    /// Once this returns `true` it will always return `true`.
    pub fn is_gone(&self) -> bool {
        self.0.strong_count() == 0
    }

    /// Do `self` and `other` track the same object?
    pub fn same_object(&self, other: &Tracked) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for Tracked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracked")
            .field("gone", &self.is_gone())
            .finish()
    }
}
