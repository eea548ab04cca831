//! Interface to the reclamation subsystem, and a simple implementation
//!
//! The cleaner does not itself decide when objects are unreachable.
//! Something else, a [`Reclaimer`], is told about each registration,
//! and fires the record's [`Notifier`] once the tracked object has gone.
//!
//! [`WeakPoller`] is a reclaimer for values held in `Arc`s.

use crate::internal_prelude::*;

/// A reclamation subsystem, which reports when tracked objects become unreachable
///
/// Implemented by the user of [`Cleaner`] (or use [`WeakPoller`]).
///
/// # Contract
///
/// For each call to [`watch`](Reclaimer::watch), the implementation should
/// eventually call [`Notifier::notify`], once it has determined that `tracked`
/// is no longer reachable at `strength` (or stronger).
/// `notify` consumes the `Notifier`, so each record is notified at most once.
///
/// It's fine to notify for a record which has since been cleaned manually;
/// that notification is ignored.
/// It's also fine to simply drop a `Notifier`, if the object will never be
/// considered unreachable; the record then stays registered until it is
/// cleaned manually.
/// A reclaimer which holds on to notifiers for a long time can use
/// [`Notifier::is_live`] to forget records which were cleaned some other way.
///
/// # Reentrancy
///
/// `watch` is called from within [`Cleaner::register`], on the registering
/// thread, without any of the cleaner's locks held.
/// It should be quick.
pub trait Reclaimer: Debug + Send + Sync + 'static {
    /// Start watching `tracked`
    fn watch(&self, tracked: Tracked, strength: Strength, notifier: Notifier);
}

/// Handle for reporting one record's tracked object as unreachable
///
/// Given to [`Reclaimer::watch`].
#[derive(Debug)]
#[must_use = "dropping a Notifier means the record will only ever be cleaned manually"]
pub struct Notifier {
    /// The record to report
    key: RecordKey,
    /// Where to report it
    tx: NotifySender,
    /// The registry the record lives in
    registry: Weak<Shared>,
}

impl Notifier {
    /// Make a new `Notifier`
    pub(crate) fn new(key: RecordKey, tx: NotifySender, registry: Weak<Shared>) -> Self {
        Notifier { key, tx, registry }
    }

    /// Report that the tracked object is no longer reachable
    ///
    /// The record will be cleaned in due course by the cleaner's worker thread.
    pub fn notify(self) {
        if self.tx.push(self.key).is_err() {
            warn!("cleanup notification dropped: cleaner worker is not running");
        }
    }

    /// Is the record still registered?
    ///
    /// Once this returns `false`, notifying is pointless,
    /// and a reclaimer may simply drop the `Notifier`.
    /// (It might return `true`, and the record be removed immediately afterwards.)
    pub fn is_live(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|shared| shared.contains(self.key))
    }

    /// The record this notifier is for
    #[cfg(test)]
    pub(crate) fn key(&self) -> RecordKey {
        self.key
    }
}

/// One registration being watched by a [`WeakPoller`]
#[derive(Debug)]
struct Watch {
    /// The object
    tracked: Tracked,
    /// The record's class (kept for logging only)
    strength: Strength,
    /// How to report it
    notifier: Notifier,
}

/// Reclaimer which notices when `Arc`-held values have been dropped
///
/// Each [`poll`](WeakPoller::poll) notifies every watched record whose
/// [`Tracked`] object has no strong references left,
/// and forgets records which have been cleaned or cleared meanwhile.
/// All strengths are treated alike.
///
/// Use [`WeakPoller::spawn`] to have a background thread poll periodically,
/// or call `poll` yourself.
#[derive(Debug, Default)]
pub struct WeakPoller {
    /// Registrations whose objects were still alive at the last poll
    watches: Mutex<Vec<Watch>>,
}

impl WeakPoller {
    /// Make a new `WeakPoller` with no background thread
    pub fn new() -> Arc<Self> {
        Arc::new(WeakPoller::default())
    }

    /// Make a new `WeakPoller`, polling every `config`'s `poll_interval`
    ///
    /// The polling thread exits once the returned `Arc` (and every clone of it)
    /// has been dropped, and every watched object has been reported.
    pub fn spawn(config: &Config) -> crate::Result<Arc<Self>> {
        let poller = WeakPoller::new();
        let name = config
            .thread_name
            .as_ref()
            .map_or_else(|| "Cleaner-poller".to_owned(), |n| format!("{n}-poller"));
        let interval = config.poll_interval;

        let for_thread = poller.clone();
        let _: JoinHandle<()> = InnocuousThreadFactory::from_config(config)
            .spawn_worker(&name, Box::new(move || poll_loop(&for_thread, interval)))?;

        Ok(poller)
    }

    /// Notify every watched record whose object has gone
    ///
    /// Watches for records no longer registered are discarded.
    /// Returns the number of records notified.
    pub fn poll(&self) -> usize {
        // Checking liveness can drop a registry, so do it without the lock.
        let watches = mem::take(&mut *self.lock());
        let mut alive = vec![];
        let mut gone = vec![];
        let mut stale = vec![];
        for watch in watches {
            if !watch.notifier.is_live() {
                stale.push(watch);
            } else if watch.tracked.is_gone() {
                gone.push(watch);
            } else {
                alive.push(watch);
            }
        }
        self.lock().extend(alive);

        if !stale.is_empty() {
            trace!("weak poller: forgetting {} removed records", stale.len());
        }
        drop(stale);

        let n_gone = gone.len();
        for watch in gone {
            trace!("weak poller: {} record unreachable", watch.strength);
            watch.notifier.notify();
        }
        n_gone
    }

    /// Number of registrations still being watched
    pub fn n_watching(&self) -> usize {
        self.lock().len()
    }

    /// Obtain the lock on the watch list
    //
    // Nothing which can panic runs with this held, so poisoning can only
    // follow a panic inside std; the list itself is still intact.
    fn lock(&self) -> MutexGuard<'_, Vec<Watch>> {
        self.watches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Reclaimer for WeakPoller {
    fn watch(&self, tracked: Tracked, strength: Strength, notifier: Notifier) {
        self.lock().push(Watch {
            tracked,
            strength,
            notifier,
        });
    }
}

/// Body of the thread started by [`WeakPoller::spawn`]
fn poll_loop(poller: &Arc<WeakPoller>, interval: Duration) {
    debug!("weak poller started, interval {:?}", interval);
    loop {
        thread::sleep(interval);
        let _: usize = poller.poll();

        // Nobody else can make new clones once only ours is left.
        if Arc::strong_count(poller) == 1 && poller.n_watching() == 0 {
            break;
        }
    }
    debug!("weak poller finished");
}
