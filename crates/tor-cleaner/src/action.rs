//! One-shot cleanup actions

use crate::internal_prelude::*;

/// A cleanup action, which can be run exactly once
///
/// Implemented for every `FnOnce() + Send + 'static` closure,
/// so callers normally just pass a closure to [`Cleaner::register`].
///
/// # Reentrancy
///
/// Actions are always run (and, if never run, dropped) without any of the
/// cleaner's locks held.
/// An action may therefore register new records, or trigger unrelated ones,
/// on the same [`Cleaner`].
///
/// # Panics
///
/// If `run` panics, the panic is caught and logged.
/// The record is still considered cleaned, and the action is not retried.
pub trait CleanupAction: Send + 'static {
    /// Perform the cleanup
    fn run(self: Box<Self>);
}

impl<F> CleanupAction for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (*self)();
    }
}

/// Run a detached record's action, isolating any panic
///
/// Returns `false` if the action panicked.
pub(crate) fn run_isolated(who: &str, strength: Strength, action: Box<dyn CleanupAction>) -> bool {
    match catch_unwind(AssertUnwindSafe(move || action.run())) {
        Ok(()) => true,
        Err(_panicked) => {
            // _panicked is of a useless type
            error!("{who}: cleanup action ({strength} record) panicked");
            false
        }
    }
}

/// Drop a detached record's action without running it, isolating any panic
pub(crate) fn drop_isolated(who: &str, strength: Strength, action: Box<dyn CleanupAction>) {
    if catch_unwind(AssertUnwindSafe(move || drop(action))).is_err() {
        error!("{who}: dropping cleanup action ({strength} record) panicked");
    }
}
