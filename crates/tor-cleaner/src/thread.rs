//! Spawning worker threads

use crate::internal_prelude::*;

/// Code to run on a new worker thread
pub type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Something which can start threads for a [`Cleaner`]
///
/// Passed to [`Cleaner::start`].
/// An implementation must start exactly one new thread running `body`,
/// or return an error (in which case `body` must not be run).
pub trait ThreadFactory {
    /// Spawn a thread called `name`, running `body`
    fn spawn_worker(&self, name: &str, body: WorkerBody) -> io::Result<JoinHandle<()>>;
}

/// Thread factory making low-priority threads with no inherited context
///
/// This is the factory used by [`Cleaner::launch`] and [`CleanerProvider`](crate::CleanerProvider).
///
/// The threads it makes:
///  * run at lowered scheduling priority (on Linux; elsewhere, at normal priority),
///    unless configured otherwise;
///  * don't inherit the spawning thread's scoped `tracing` dispatcher,
///    so events from cleanup actions go to the global default subscriber.
#[derive(Debug, Clone)]
pub struct InnocuousThreadFactory {
    /// Stack size, if not the platform default
    stack_size: Option<usize>,
    /// Whether to lower the priority of the new thread
    low_priority: bool,
}

/// Thread factory whose threads carry on with the spawning thread's logging
///
/// The new thread runs under whichever `tracing` dispatcher was the default
/// on the thread which called `spawn_worker`.
/// Thread priority is left unchanged.
#[derive(Debug, Clone, Default)]
pub struct InheritingThreadFactory {
    /// Stack size, if not the platform default
    stack_size: Option<usize>,
}

impl InnocuousThreadFactory {
    /// Make a factory with the thread settings from `config`
    pub fn from_config(config: &Config) -> Self {
        InnocuousThreadFactory {
            stack_size: config.stack_size,
            low_priority: config.low_priority,
        }
    }
}

impl Default for InnocuousThreadFactory {
    fn default() -> Self {
        InnocuousThreadFactory::from_config(&Config::default())
    }
}

impl InheritingThreadFactory {
    /// Make a factory with the stack size from `config`
    pub fn from_config(config: &Config) -> Self {
        InheritingThreadFactory {
            stack_size: config.stack_size,
        }
    }
}

/// Make a `thread::Builder` with `name` and (maybe) `stack_size`
fn builder(name: &str, stack_size: Option<usize>) -> thread::Builder {
    let builder = thread::Builder::new().name(name.to_owned());
    match stack_size {
        Some(size) => builder.stack_size(size),
        None => builder,
    }
}

impl ThreadFactory for InnocuousThreadFactory {
    fn spawn_worker(&self, name: &str, body: WorkerBody) -> io::Result<JoinHandle<()>> {
        let low_priority = self.low_priority;
        builder(name, self.stack_size).spawn(move || {
            if low_priority {
                lower_priority();
            }
            body();
        })
    }
}

impl ThreadFactory for InheritingThreadFactory {
    fn spawn_worker(&self, name: &str, body: WorkerBody) -> io::Result<JoinHandle<()>> {
        let dispatch = tracing::dispatcher::get_default(tracing::Dispatch::clone);
        builder(name, self.stack_size)
            .spawn(move || tracing::dispatcher::with_default(&dispatch, body))
    }
}

/// Niceness we ask for, for low-priority threads
#[cfg(target_os = "linux")]
const LOW_PRIORITY_NICENESS: libc::c_int = 10;

/// Lower the scheduling priority of the calling thread, if we can
///
/// Failure is logged and otherwise ignored.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn lower_priority() {
    // On Linux, PRIO_PROCESS with `who == 0` applies to the calling thread only.
    // SAFETY: setpriority takes no pointers and has no memory-safety preconditions.
    let r = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, LOW_PRIORITY_NICENESS) };
    if r != 0 {
        warn!(
            "could not lower cleaner thread priority: {}",
            io::Error::last_os_error()
        );
    }
}

/// Lower the scheduling priority of the calling thread, if we can
///
/// Not supported on this platform, so does nothing.
#[cfg(not(target_os = "linux"))]
fn lower_priority() {}

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

    fn name_of_spawned(factory: &dyn ThreadFactory) -> String {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let body: WorkerBody = Box::new(move || {
            let name = thread::current().name().map(str::to_owned);
            tx.send(name).unwrap();
        });
        let handle = factory.spawn_worker("test-worker", body).unwrap();
        handle.join().unwrap();
        rx.recv().unwrap().unwrap()
    }

    #[test]
    fn innocuous_names() {
        let factory = InnocuousThreadFactory::default();
        assert_eq!(name_of_spawned(&factory), "test-worker");
    }

    #[test]
    fn inheriting_names() {
        let config = Config::builder().stack_size(256 * 1024).build().unwrap();
        let factory = InheritingThreadFactory::from_config(&config);
        assert_eq!(name_of_spawned(&factory), "test-worker");
    }

    #[test]
    fn not_lowered_when_disabled() {
        let config = Config::builder().low_priority(false).build().unwrap();
        let factory = InnocuousThreadFactory::from_config(&config);
        assert!(!factory.low_priority);
        assert_eq!(name_of_spawned(&factory), "test-worker");
    }
}
