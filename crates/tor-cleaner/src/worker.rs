//! The worker loop
//!
//! One per started [`Cleaner`], on its own thread.
//! Pops notifications and cleans the records they name,
//! until every list in the registry is empty.

use crate::action::run_isolated;
use crate::internal_prelude::*;

/// Everything the worker thread needs
#[derive(Debug)]
pub(crate) struct Worker {
    /// The engine's registry
    shared: Arc<Shared>,
    /// Where notifications arrive
    rx: NotifyReceiver,
    /// How long to wait for each notification before rechecking for exit
    timeout: Duration,
}

impl Worker {
    /// Prepare a worker
    pub(crate) fn new(shared: Arc<Shared>, rx: NotifyReceiver, timeout: Duration) -> Self {
        Worker {
            shared,
            rx,
            timeout,
        }
    }

    /// Run until the registry is drained
    ///
    /// Also returns if the registry turns out to be corrupted,
    /// or if no notification can ever arrive.
    pub(crate) fn run(self) {
        let name = self.shared.name();
        debug!("{name}: worker started");
        let mut n_cleaned: u64 = 0;

        loop {
            match self.shared.is_drained() {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    error!("{name}: worker stopping: {e}");
                    break;
                }
            }

            match self.rx.pop(self.timeout) {
                Popped::Record(key) => {
                    if self.clean_notified(key) {
                        n_cleaned += 1;
                    }
                }
                Popped::TimedOut => trace!("{name}: no notifications, rechecking"),
                Popped::Closed => {
                    // Every Notifier, and the Cleaner, have gone: remaining
                    // records can only be cleaned manually, which needs no worker.
                    debug!("{name}: notification channel closed");
                    break;
                }
            }
        }

        debug!(
            "{name}: worker exiting, cleaned {n_cleaned} records, {} notifications pending",
            self.rx.len()
        );
    }

    /// Act on a notification for `key`
    ///
    /// Returns `true` if the record was still registered (and so has now been cleaned).
    fn clean_notified(&self, key: RecordKey) -> bool {
        let name = self.shared.name();
        let Some(detached) = self.shared.detach(key) else {
            trace!("{name}: notified record already removed");
            return false;
        };
        if !detached.tracked.is_gone() {
            // Legitimate for reclaimers with their own notion of reachability.
            debug!("{name}: {} record notified while still referenced", detached.strength);
        }
        trace!("{name}: cleaning notified {} record", detached.strength);
        let _: bool = run_isolated(name, detached.strength, detached.action);
        true
    }
}
