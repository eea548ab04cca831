//! A lazily-started engine, shared by a whole program

use crate::internal_prelude::*;

use once_cell::sync::OnceCell;

/// Worker thread name for the shared engine
const SHARED_THREAD_NAME: &str = "Common-Cleaner";

/// Provider of one shared, lazily-started [`Cleaner`]
///
/// Whatever assembles the program owns one of these,
/// and hands `&CleanerProvider` to the components that want a cleaner.
///
/// The engine is created on the first call to [`shared`](CleanerProvider::shared).
/// Its worker runs on an [`InnocuousThreadFactory`] thread named `Common-Cleaner`,
/// and its reclaimer is a [`WeakPoller`](crate::WeakPoller) with its own thread.
#[derive(Debug)]
pub struct CleanerProvider {
    /// Configuration for the engine, and its poller
    config: Config,
    /// The engine, once made
    cell: OnceCell<Arc<Cleaner>>,
}

impl CleanerProvider {
    /// Make a provider which will use `config`
    ///
    /// Any `thread_name` in `config` is overridden.
    pub fn new(config: Config) -> Self {
        let config = Config {
            thread_name: Some(SHARED_THREAD_NAME.into()),
            ..config
        };
        CleanerProvider {
            config,
            cell: OnceCell::new(),
        }
    }

    /// Get the shared engine, creating and starting it if need be
    ///
    /// Every successful call returns the same engine.
    /// If creating it fails, the error is returned,
    /// and the next call tries again.
    pub fn shared(&self) -> crate::Result<Arc<Cleaner>> {
        self.cell
            .get_or_try_init(|| {
                let reclaimer = crate::WeakPoller::spawn(&self.config)?;
                let cleaner = Cleaner::launch(self.config.clone(), reclaimer)?;
                debug!("{}: shared cleaner created", cleaner.name());
                Ok::<_, Error>(cleaner)
            })
            .cloned()
    }
}

impl Default for CleanerProvider {
    fn default() -> Self {
        CleanerProvider::new(Config::default())
    }
}
