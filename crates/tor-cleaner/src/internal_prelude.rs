//! Internal prelude
//!
//! This file contains most of the imports we wish to use, throughout this crate.
//!
//! Every module does `use crate::internal_prelude::*;`
//!
//! Exceptions:
//!
//!  * Names that are private to a module and its submodules
//!    are imported to the sub-modules via `use super::*`.
//!    (Thus, the sub-module inherits the prelude from its parent.)

#![allow(unused_imports)]

pub(crate) use std::{
    any::Any,
    fmt::{self, Debug},
    io, mem,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

pub(crate) use {
    derive_more::{Deref, Display},
    educe::Educe,
    serde::{Deserialize, Serialize},
    slotmap::SlotMap,
    static_assertions::assert_impl_all,
    thiserror::Error,
    tor_config::ConfigBuildError,
    tor_error::{ErrorKind, HasKind},
    tracing::{debug, error, info, trace, warn},
};

pub(crate) use crate::{
    action::CleanupAction,
    channel::{NotifyReceiver, NotifySender, Popped},
    cleaner::{Cleanable, Cleaner, Shared},
    config::Config,
    error::{Error, RegistryCorrupted},
    reclaim::{Notifier, Reclaimer},
    registry::{RecordKey, Registry, Strength},
    thread::{InnocuousThreadFactory, ThreadFactory, WorkerBody},
    tracked::Tracked,
};
