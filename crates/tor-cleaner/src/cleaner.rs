//! The cleaner engine: registration, manual triggering, and the worker
//!
//! ## Data structure
//!
//!  * [`Cleaner`] is the engine handle.  It owns the sending side of the
//!    notification channel, and (until started) the receiving side.
//!  * [`Shared`] holds the [`Registry`] inside a `Mutex`.
//!    It is shared by the engine, every [`Cleanable`], and the worker thread.
//!  * [`Cleanable`] is the caller's handle onto one record.
//!
//! Nothing in `Shared` refers back to the `Cleaner`.
//! So the worker, and outstanding `Cleanable`s, don't keep the engine alive.
//!
//! ## Removal
//!
//! Every way a record can leave the registry (manual [`clean`](Cleanable::clean),
//! [`clear`](Cleanable::clear), or the worker acting on a notification)
//! goes through [`Registry::detach`], under the lock.
//! At most one of them gets the action; the others see `false`.
//! The winner runs (or drops) the action after the lock is released.
//!
//! ## Lifetime of the worker
//!
//! [`Cleaner::start`] first registers a no-op `Phantom` record tracking the
//! `Cleaner` itself, so the worker has something to wait for until the engine
//! is unreachable.  The worker exits once every list is empty.

use crate::action::{drop_isolated, run_isolated};
use crate::channel::channel;
use crate::internal_prelude::*;
use crate::registry::Detached;
use crate::worker::Worker;


/// Counter for default worker thread names
static NEXT_CLEANER_NUMBER: AtomicUsize = AtomicUsize::new(0);

/// Reference-triggered cleanup engine
///
/// Register an object and a cleanup action with [`register`](Cleaner::register).
/// The action runs at most once: either when the returned [`Cleanable`] is
/// [cleaned](Cleanable::clean) manually, or, after the engine is
/// [started](Cleaner::start), on the worker thread once the [`Reclaimer`]
/// reports the object unreachable.
#[derive(Educe)]
#[educe(Debug)]
pub struct Cleaner {
    /// State shared with the worker and the `Cleanable`s
    shared: Arc<Shared>,

    /// The reclamation subsystem, told about each registration
    reclaimer: Arc<dyn Reclaimer>,

    /// Sending side of the notification channel, cloned into each `Notifier`
    #[educe(Debug(ignore))]
    tx: NotifySender,

    /// Configuration
    config: Config,

    /// Worker state
    worker: Mutex<WorkerSlot>,
}

assert_impl_all!(Cleaner: Send, Sync);

/// State of a [`Cleaner`]'s worker
#[derive(Debug)]
enum WorkerSlot {
    /// Not started; we hold the receiving end of the channel
    Idle(NotifyReceiver),
    /// `start` is in progress on some thread
    Starting,
    /// Worker spawned
    Running {
        /// The worker thread
        handle: JoinHandle<()>,
        /// The record tracking the `Cleaner` itself
        self_record: Cleanable,
    },
}

/// Parts of a [`Cleaner`] shared with the worker and with each [`Cleanable`]
#[derive(Debug)]
pub(crate) struct Shared {
    /// The records
    registry: Mutex<Registry>,
    /// Name of the worker thread, also used in log messages
    name: String,
}

/// Handle onto one registered record
///
/// Returned by [`Cleaner::register`].
/// Clones refer to the same record.
///
/// Dropping a `Cleanable` does not unregister anything:
/// the record stays until it is cleaned, cleared, or the reclaimer reports
/// its object unreachable.
#[derive(Clone)]
pub struct Cleanable {
    /// The registry the record lives in
    shared: Arc<Shared>,
    /// The record
    key: RecordKey,
    /// The class it was registered with
    strength: Strength,
}

assert_impl_all!(Cleanable: Send, Sync);

impl Shared {
    /// Obtain the registry lock
    fn lock(&self) -> Result<MutexGuard<'_, Registry>, RegistryCorrupted> {
        Ok(self.registry.lock()?)
    }

    /// Name of the worker thread
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Remove the record from the registry, returning its action
    ///
    /// The lock is released before returning.
    /// A corrupted registry is logged, and treated as having nothing to remove.
    pub(crate) fn detach(&self, key: RecordKey) -> Option<Detached> {
        match self.lock() {
            Ok(mut registry) => registry.detach(key),
            Err(e) => {
                error!("{}: {}", self.name, e);
                None
            }
        }
    }

    /// Remove the record and run its action, if it's still registered
    ///
    /// Returns `true` iff this call removed it.
    /// The action having panicked doesn't change that.
    pub(crate) fn clean(&self, key: RecordKey) -> bool {
        let Some(detached) = self.detach(key) else {
            return false;
        };
        trace!("{}: cleaning {} record", self.name, detached.strength);
        let _: bool = run_isolated(&self.name, detached.strength, detached.action);
        true
    }

    /// Remove the record and drop its action without running it
    ///
    /// Returns `true` iff this call removed it.
    pub(crate) fn clear(&self, key: RecordKey) -> bool {
        let Some(detached) = self.detach(key) else {
            return false;
        };
        trace!("{}: clearing {} record", self.name, detached.strength);
        drop_isolated(&self.name, detached.strength, detached.action);
        true
    }

    /// Is the record still registered?
    ///
    /// A corrupted registry counts as holding nothing.
    pub(crate) fn contains(&self, key: RecordKey) -> bool {
        self.lock().is_ok_and(|registry| registry.contains(key))
    }

    /// Are all the lists empty?
    pub(crate) fn is_drained(&self) -> Result<bool, RegistryCorrupted> {
        Ok(self.lock()?.is_drained())
    }

    /// Run `f` on the registry (test code only)
    #[cfg(test)]
    pub(crate) fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        f(&self.registry.lock().expect("poisoned"))
    }
}

impl Cleaner {
    /// Make a new engine, with no worker
    ///
    /// Records can be registered and cleaned manually straight away.
    /// Notifications are queued until the worker is [started](Cleaner::start).
    pub fn create(config: Config, reclaimer: Arc<dyn Reclaimer>) -> Arc<Self> {
        let name = config.thread_name.clone().unwrap_or_else(|| {
            let n = NEXT_CLEANER_NUMBER.fetch_add(1, Ordering::Relaxed);
            format!("Cleaner-{n}")
        });
        let (tx, rx) = channel();
        Arc::new(Cleaner {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                name,
            }),
            reclaimer,
            tx,
            config,
            worker: Mutex::new(WorkerSlot::Idle(rx)),
        })
    }

    /// Make a new engine and start its worker on a low-priority thread
    ///
    /// Uses [`InnocuousThreadFactory`], configured from `config`.
    pub fn launch(config: Config, reclaimer: Arc<dyn Reclaimer>) -> crate::Result<Arc<Self>> {
        let factory = InnocuousThreadFactory::from_config(&config);
        let cleaner = Cleaner::create(config, reclaimer);
        cleaner.start(&factory)?;
        Ok(cleaner)
    }

    /// Start the worker thread, using `factory`
    ///
    /// Fails with [`Error::AlreadyStarted`] if it has been started before
    /// (or is being started concurrently).
    /// If `factory` fails, the engine is left unstarted and this may be retried.
    pub fn start(self: &Arc<Self>, factory: &dyn ThreadFactory) -> crate::Result<()> {
        let previous = mem::replace(&mut *self.lock_worker(), WorkerSlot::Starting);
        let rx = match previous {
            WorkerSlot::Idle(rx) => rx,
            other @ (WorkerSlot::Starting | WorkerSlot::Running { .. }) => {
                *self.lock_worker() = other;
                return Err(Error::AlreadyStarted);
            }
        };

        let self_record = match self.register(Strength::Phantom, Tracked::new(self), || {}) {
            Ok(r) => r,
            Err(e) => {
                *self.lock_worker() = WorkerSlot::Idle(rx);
                return Err(e);
            }
        };

        let worker = Worker::new(self.shared.clone(), rx.clone(), self.config.drain_timeout);
        match factory.spawn_worker(&self.shared.name, Box::new(move || worker.run())) {
            Ok(handle) => {
                debug!("{}: cleaner started", self.shared.name);
                // Our clone of `rx` is dropped here, so that notifying
                // fails visibly once the worker has gone.
                *self.lock_worker() = WorkerSlot::Running {
                    handle,
                    self_record,
                };
                Ok(())
            }
            Err(e) => {
                let _: bool = self_record.clear();
                *self.lock_worker() = WorkerSlot::Idle(rx);
                Err(e.into())
            }
        }
    }

    /// Register `action` to run once `tracked` becomes unreachable
    ///
    /// The record goes on the list for `strength`,
    /// and the reclaimer is asked to [`watch`](Reclaimer::watch) it.
    ///
    /// This may be called from inside a cleanup action.
    pub fn register(
        &self,
        strength: Strength,
        tracked: Tracked,
        action: impl CleanupAction,
    ) -> crate::Result<Cleanable> {
        let key = self
            .shared
            .lock()?
            .insert(strength, tracked.clone(), Box::new(action));
        trace!("{}: registered {} record", self.shared.name, strength);

        let notifier = Notifier::new(key, self.tx.clone(), Arc::downgrade(&self.shared));
        self.reclaimer.watch(tracked, strength, notifier);

        Ok(Cleanable {
            shared: self.shared.clone(),
            key,
            strength,
        })
    }

    /// Clean `handle` now, if it's still registered
    ///
    /// Equivalent to [`handle.clean()`](Cleanable::clean),
    /// except that a handle from a different engine is refused (`false`).
    pub fn trigger(&self, handle: &Cleanable) -> bool {
        if !Arc::ptr_eq(&self.shared, &handle.shared) {
            warn!(
                "{}: refusing to clean a record belonging to {}",
                self.shared.name, handle.shared.name
            );
            return false;
        }
        handle.clean()
    }

    /// Is the list for `strength` empty?
    ///
    /// Once started, the `Phantom` list contains the engine's own record.
    pub fn is_empty(&self, strength: Strength) -> crate::Result<bool> {
        Ok(self.shared.lock()?.is_empty(strength))
    }

    /// Number of records currently on the list for `strength`
    pub fn len(&self, strength: Strength) -> crate::Result<usize> {
        Ok(self.shared.lock()?.len(strength))
    }

    /// Has the worker been started?
    pub fn is_started(&self) -> bool {
        matches!(*self.lock_worker(), WorkerSlot::Running { .. })
    }

    /// The worker thread's name, also used in log messages
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    /// The worker thread, if started
    ///
    /// The thread may since have exited.
    pub fn worker_thread(&self) -> Option<thread::Thread> {
        match &*self.lock_worker() {
            WorkerSlot::Running { handle, .. } => Some(handle.thread().clone()),
            WorkerSlot::Idle(_) | WorkerSlot::Starting => None,
        }
    }

    /// Obtain the lock on the worker state
    //
    // Nothing which can panic runs with this held, so poisoning can only
    // follow a panic inside std; the state itself is still intact.
    fn lock_worker(&self) -> MutexGuard<'_, WorkerSlot> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared state (test code only)
    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// The record tracking the engine itself, if started (test code only)
    #[cfg(test)]
    pub(crate) fn self_record(&self) -> Option<Cleanable> {
        match &*self.lock_worker() {
            WorkerSlot::Running { self_record, .. } => Some(self_record.clone()),
            WorkerSlot::Idle(_) | WorkerSlot::Starting => None,
        }
    }

    /// Has the worker thread exited? (test code only)
    #[cfg(test)]
    pub(crate) fn worker_finished(&self) -> bool {
        match &*self.lock_worker() {
            WorkerSlot::Running { handle, .. } => handle.is_finished(),
            WorkerSlot::Idle(_) | WorkerSlot::Starting => false,
        }
    }
}

impl Cleanable {
    /// Remove the record and run its action now, if it's still registered
    ///
    /// Returns `true` iff this call removed the record
    /// (and so ran the action, before returning).
    /// Every later call, on this handle or any clone, returns `false`,
    /// as does a call racing with another removal which wins.
    ///
    /// If the action panics, the panic is caught and logged;
    /// the record is still cleaned, and this still returns `true`.
    pub fn clean(&self) -> bool {
        self.shared.clean(self.key)
    }

    /// Remove the record without running its action, if it's still registered
    ///
    /// The action is dropped.
    /// Returns `true` iff this call removed the record.
    pub fn clear(&self) -> bool {
        self.shared.clear(self.key)
    }

    /// Is the record still registered?
    ///
    /// Becomes `false` as soon as a removal commits,
    /// even if the action hasn't finished running yet.
    /// Also `false` if the registry is corrupted.
    pub fn is_registered(&self) -> bool {
        self.shared.contains(self.key)
    }

    /// The class this record was registered with
    pub fn strength(&self) -> Strength {
        self.strength
    }

    /// The record's key (test code only)
    #[cfg(test)]
    pub(crate) fn key(&self) -> RecordKey {
        self.key
    }
}

impl Debug for Cleanable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanable")
            .field("cleaner", &self.shared.name)
            .field("strength", &self.strength)
            .field("key", &self.key)
            .finish()
    }
}
