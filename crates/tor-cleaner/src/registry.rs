//! The registry of live records
//!
//! ## Data structure
//!
//!  * [`Registry`] is an arena ([`SlotMap`]) of [`Record`]s,
//!    plus one [`ListHead`] per [`Strength`].
//!  * Each `Record` is a member of the doubly-linked list for its strength.
//!    The links are arena keys, not references.
//!  * A record which has been detached is simply absent from the arena.
//!    Its [`RecordKey`] carries the slotmap key (whose version changes when the
//!    slot is reused) and a registration serial, which must both match.
//!    So a stale key can never reach a later record in the same slot.
//!
//! The whole `Registry` sits inside one `Mutex`, in [`Shared`].
//!
//! ## Actions
//!
//! Nothing here runs, or drops, a cleanup action.
//! [`Registry::detach`] hands the action back; the caller disposes of it
//! after releasing the lock.

use crate::internal_prelude::*;

/// Reachability strength class of a record
///
/// An opaque tag, threaded through to the [`Reclaimer`].
/// Ordered loosely from the strongest retention to the weakest:
/// a `Soft` object may outlive a `Weak` one, which may outlive a `Phantom` one.
/// What each class means is up to the reclaimer.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Display)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(clippy::exhaustive_enums)] // The registry has exactly one list per class
pub enum Strength {
    /// Soft reachability
    #[display("soft")]
    Soft,
    /// Weak reachability
    #[display("weak")]
    Weak,
    /// Phantom reachability
    #[display("phantom")]
    Phantom,
}

/// Number of strength classes, and so of lists in a [`Registry`]
const N_STRENGTHS: usize = 3;

impl Strength {
    /// All the strength classes
    pub const ALL: [Strength; N_STRENGTHS] = [Strength::Soft, Strength::Weak, Strength::Phantom];

    /// Index of this class's list in `Registry.lists`
    fn index(self) -> usize {
        match self {
            Strength::Soft => 0,
            Strength::Weak => 1,
            Strength::Phantom => 2,
        }
    }
}

slotmap::new_key_type! {
    /// Identifies a slot in a `Registry`'s arena
    pub(crate) struct RecordId;
}

/// Identifies one registration in a [`Registry`]
///
/// Cheap to copy.  Stale keys are detected, not misdirected.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub(crate) struct RecordKey {
    /// Arena slot
    id: RecordId,
    /// Registration serial, unique within the registry
    serial: u64,
}

/// One live registration, within `Registry.records`
#[derive(Educe)]
#[educe(Debug)]
struct Record {
    /// Serial number assigned at insertion; see [`RecordKey`]
    serial: u64,
    /// Which list this record is on
    strength: Strength,
    /// Previous record on the same list, or `None` if we're first
    prev: Option<RecordId>,
    /// Next record on the same list, or `None` if we're last
    next: Option<RecordId>,
    /// The object whose reachability triggers this record
    tracked: Tracked,
    /// What to do when cleaned
    #[educe(Debug(ignore))]
    action: Box<dyn CleanupAction>,
}

/// Head of one strength class's list
#[derive(Debug, Default)]
struct ListHead {
    /// First record, or `None` if the list is empty
    first: Option<RecordId>,
    /// Number of records on the list
    len: usize,
}

/// A record removed from the registry, whose action now belongs to the caller
#[derive(Educe)]
#[educe(Debug)]
#[must_use = "the action must be run or dropped, outside the registry lock"]
pub(crate) struct Detached {
    /// The class it was registered with
    pub(crate) strength: Strength,
    /// The object it was tracking
    pub(crate) tracked: Tracked,
    /// Its action
    #[educe(Debug(ignore))]
    pub(crate) action: Box<dyn CleanupAction>,
}

/// All the live records of one cleaner
///
/// See the [module-level documentation](self).
#[derive(Debug, Default)]
pub(crate) struct Registry {
    /// The records themselves
    records: SlotMap<RecordId, Record>,
    /// One list per `Strength`, indexed by `Strength::index`
    lists: [ListHead; N_STRENGTHS],
    /// Serial number for the next insertion
    next_serial: u64,
}

impl Registry {
    /// Insert a new record at the head of the list for `strength`
    pub(crate) fn insert(
        &mut self,
        strength: Strength,
        tracked: Tracked,
        action: Box<dyn CleanupAction>,
    ) -> RecordKey {
        let serial = self.next_serial;
        // u64: would take centuries to wrap at any plausible registration rate
        self.next_serial = self.next_serial.wrapping_add(1);

        let head = &mut self.lists[strength.index()];
        let old_first = head.first;
        let id = self.records.insert(Record {
            serial,
            strength,
            prev: None,
            next: old_first,
            tracked,
            action,
        });
        if let Some(old_first) = old_first {
            if let Some(old) = self.records.get_mut(old_first) {
                old.prev = Some(id);
            }
        }
        head.first = Some(id);
        head.len += 1;

        RecordKey { id, serial }
    }

    /// Remove the record `key` from its list, if it is still there
    ///
    /// Returns `None` if it has already been detached (by anyone).
    /// Exactly one call for any given key can return `Some`.
    pub(crate) fn detach(&mut self, key: RecordKey) -> Option<Detached> {
        if !self.contains(key) {
            return None;
        }
        let record = self.records.remove(key.id)?;

        match record.prev {
            Some(prev) => {
                if let Some(prev) = self.records.get_mut(prev) {
                    prev.next = record.next;
                }
            }
            None => self.lists[record.strength.index()].first = record.next,
        }
        if let Some(next) = record.next {
            if let Some(next) = self.records.get_mut(next) {
                next.prev = record.prev;
            }
        }
        let head = &mut self.lists[record.strength.index()];
        head.len = head.len.saturating_sub(1);

        Some(Detached {
            strength: record.strength,
            tracked: record.tracked,
            action: record.action,
        })
    }

    /// Is the record `key` still registered?
    pub(crate) fn contains(&self, key: RecordKey) -> bool {
        self.records
            .get(key.id)
            .is_some_and(|r| r.serial == key.serial)
    }

    /// Is the list for `strength` empty?
    pub(crate) fn is_empty(&self, strength: Strength) -> bool {
        self.lists[strength.index()].first.is_none()
    }

    /// Number of records on the list for `strength`
    pub(crate) fn len(&self, strength: Strength) -> usize {
        self.lists[strength.index()].len
    }

    /// Are all the lists empty?
    pub(crate) fn is_drained(&self) -> bool {
        Strength::ALL.iter().all(|s| self.is_empty(*s))
    }

    /// Check every invariant of the data structure, panicking if one is violated
    #[cfg(test)]
    pub(crate) fn check_consistency(&self) {
        let mut seen = std::collections::HashSet::new();
        let mut total = 0;
        for strength in Strength::ALL {
            let head = &self.lists[strength.index()];
            let mut prev = None;
            let mut cursor = head.first;
            let mut n = 0;
            while let Some(id) = cursor {
                assert!(seen.insert(id), "{id:?} reachable twice");
                let record = self.records.get(id).expect("list links to a vacant slot");
                assert_eq!(record.strength, strength, "{id:?} on the wrong list");
                assert_eq!(record.prev, prev, "{id:?} has a bad prev link");
                n += 1;
                assert!(n <= self.records.len(), "cycle in {strength} list");
                prev = Some(id);
                cursor = record.next;
            }
            assert_eq!(n, head.len, "{strength} list length");
            total += n;
        }
        assert_eq!(total, self.records.len(), "records not on any list");
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->

    use super::*;
    use rand::Rng as _;

    fn untracked() -> Tracked {
        Tracked::from_weak(Weak::<()>::new())
    }

    fn add(reg: &mut Registry, strength: Strength, log: &Arc<Mutex<Vec<u32>>>, n: u32) -> RecordKey {
        let log = log.clone();
        reg.insert(
            strength,
            untracked(),
            Box::new(move || log.lock().unwrap().push(n)),
        )
    }

    #[test]
    fn insert_and_detach() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut reg = Registry::default();
        assert!(reg.is_drained());

        let a = add(&mut reg, Strength::Weak, &log, 1);
        let b = add(&mut reg, Strength::Weak, &log, 2);
        let c = add(&mut reg, Strength::Weak, &log, 3);
        let d = add(&mut reg, Strength::Phantom, &log, 4);
        reg.check_consistency();
        assert_eq!(reg.len(Strength::Weak), 3);
        assert_eq!(reg.len(Strength::Phantom), 1);
        assert!(reg.is_empty(Strength::Soft));

        // middle, then head, then tail
        for key in [b, c, a] {
            let detached = reg.detach(key).unwrap();
            assert_eq!(detached.strength, Strength::Weak);
            detached.action.run();
            reg.check_consistency();
        }
        assert!(reg.is_empty(Strength::Weak));
        assert!(!reg.is_drained());
        assert_eq!(*log.lock().unwrap(), [2, 3, 1]);

        assert!(reg.detach(d).is_some());
        assert!(reg.is_drained());
        reg.check_consistency();
    }

    #[test]
    fn detach_twice() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut reg = Registry::default();
        let a = add(&mut reg, Strength::Soft, &log, 1);
        assert!(reg.contains(a));
        assert!(reg.detach(a).is_some());
        assert!(!reg.contains(a));
        assert!(reg.detach(a).is_none());
        reg.check_consistency();
    }

    #[test]
    fn stale_key_in_reused_slot() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut reg = Registry::default();
        let a = add(&mut reg, Strength::Soft, &log, 1);
        drop(reg.detach(a).unwrap());
        let b = add(&mut reg, Strength::Soft, &log, 2);

        // Forge a key pointing at b's slot but carrying a's serial:
        // the serial check must still refuse it.
        let forged = RecordKey {
            id: b.id,
            serial: a.serial,
        };
        assert!(reg.detach(forged).is_none());
        assert!(reg.detach(a).is_none());
        assert!(reg.contains(b));
        reg.check_consistency();
    }

    #[test]
    fn random_operations() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut reg = Registry::default();
        let mut live: Vec<RecordKey> = vec![];
        let mut dead: Vec<RecordKey> = vec![];
        let mut rng = rand::rng();

        for n in 0..2000 {
            if live.is_empty() || rng.random_bool(0.55) {
                let strength = Strength::ALL[rng.random_range(0..N_STRENGTHS)];
                live.push(add(&mut reg, strength, &log, n));
            } else {
                let key = live.swap_remove(rng.random_range(0..live.len()));
                assert!(reg.detach(key).is_some());
                dead.push(key);
            }
            if n % 100 == 0 {
                reg.check_consistency();
            }
        }
        reg.check_consistency();
        assert!(dead.iter().all(|k| reg.detach(*k).is_none()));
        assert!(live.iter().all(|k| reg.contains(*k)));
        let total: usize = Strength::ALL.iter().map(|s| reg.len(*s)).sum();
        assert_eq!(total, live.len());
    }

    #[test]
    fn strength_names() {
        assert_eq!(Strength::Phantom.to_string(), "phantom");
        assert_eq!(
            serde_json::to_string(&Strength::Soft).unwrap(),
            r#""soft""#
        );
        let w: Strength = serde_json::from_str(r#""weak""#).unwrap();
        assert_eq!(w, Strength::Weak);
    }
}
