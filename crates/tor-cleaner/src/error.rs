//! Errors arising from the cleaner

use crate::internal_prelude::*;

/// An error occurring when operating a [`Cleaner`]
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// [`Cleaner::start`] was called on a cleaner whose worker is already running
    #[error("cleaner worker already started")]
    AlreadyStarted,

    /// The thread factory could not spawn the worker thread
    #[error("couldn't spawn cleaner worker thread")]
    Spawn(#[source] Arc<io::Error>),

    /// Previous bug, cleaner registry is corrupted
    #[error("{RegistryCorrupted}")]
    RegistryCorrupted,
}

/// Registry corrupted
///
/// The cleaner's registry mutex was poisoned.
/// No further records can be registered or cleaned on this cleaner.
//
// Separate type so we don't expose `PoisonError -> crate::Error` conversion
#[derive(Debug, Clone, Error)]
#[error("cleaner registry is corrupted due to previous bug")]
pub struct RegistryCorrupted;

impl<T> From<PoisonError<T>> for RegistryCorrupted {
    fn from(_: PoisonError<T>) -> RegistryCorrupted {
        RegistryCorrupted
    }
}

impl From<RegistryCorrupted> for Error {
    fn from(_: RegistryCorrupted) -> Error {
        Error::RegistryCorrupted
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Spawn(Arc::new(e))
    }
}

impl HasKind for Error {
    fn kind(&self) -> ErrorKind {
        use Error as E;
        use ErrorKind as EK;
        match self {
            E::AlreadyStarted => EK::BadApiUsage,
            E::Spawn(_) => EK::Other,
            E::RegistryCorrupted => EK::Internal,
        }
    }
}

impl HasKind for RegistryCorrupted {
    fn kind(&self) -> ErrorKind {
        use ErrorKind as EK;
        match self {
            RegistryCorrupted => EK::Internal,
        }
    }
}
