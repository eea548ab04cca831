//! Configuration (private module)

use crate::internal_prelude::*;

/// Default for `drain_timeout`
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default for `poll_interval`
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Longest permitted `drain_timeout`
///
/// A worker whose cleaner has gone away can linger this long before exiting.
const MAX_DRAIN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Smallest permitted explicit `stack_size`
const MIN_STACK_SIZE: usize = 64 * 1024;

/// Configuration for a [`Cleaner`]
///
/// Obtained from [`ConfigBuilder::build`].
/// The `Default` value is the same as building a default `ConfigBuilder`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Config {
    /// How long the worker waits for a notification before rechecking whether it's done
    pub(crate) drain_timeout: Duration,

    /// Worker thread name; `None` means `Cleaner-N`
    pub(crate) thread_name: Option<String>,

    /// Worker thread stack size; `None` means the platform default
    pub(crate) stack_size: Option<usize>,

    /// Whether threads we spawn should run at lowered priority
    pub(crate) low_priority: bool,

    /// How often a spawned [`WeakPoller`](crate::WeakPoller) checks its objects
    pub(crate) poll_interval: Duration,
}

/// Configuration for a [`Cleaner`] (builder)
//
// Written by hand, rather than derived, so that the validation rules
// live next to the fields they constrain.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq, Default)]
pub struct ConfigBuilder {
    /// How long the worker waits for each notification
    ///
    /// After each wait the worker rechecks whether it has anything left to do.
    /// This bounds how long a worker can outlive the last of its records,
    /// when that record was cleaned manually.
    ///
    /// Default is 60 seconds.
    #[serde(default, with = "humantime_serde")]
    drain_timeout: Option<Duration>,

    /// Name for the worker thread
    ///
    /// Default is `Cleaner-N`, with `N` counting up from 0 in each process.
    thread_name: Option<String>,

    /// Stack size for the worker thread, in bytes
    ///
    /// Default is the platform's default for new threads.
    stack_size: Option<usize>,

    /// Whether to lower the scheduling priority of the worker thread
    ///
    /// Only has an effect on Linux.  Default is `true`.
    low_priority: Option<bool>,

    /// Polling interval for a [`WeakPoller`](crate::WeakPoller) made with this configuration
    ///
    /// Default is 1 second.
    #[serde(default, with = "humantime_serde")]
    poll_interval: Option<Duration>,
}

impl Config {
    /// Start building a [`Config`]
    ///
    /// Returns a fresh default [`ConfigBuilder`].
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// How long the worker waits for each notification
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            thread_name: None,
            stack_size: None,
            low_priority: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ConfigBuilder {
    /// How long the worker waits for each notification
    ///
    /// (Setter method.)
    pub fn drain_timeout(&mut self, value: Duration) -> &mut Self {
        self.drain_timeout = Some(value);
        self
    }

    /// Name for the worker thread
    ///
    /// (Setter method.)
    pub fn thread_name(&mut self, value: impl Into<String>) -> &mut Self {
        self.thread_name = Some(value.into());
        self
    }

    /// Stack size for the worker thread, in bytes
    ///
    /// (Setter method.)
    pub fn stack_size(&mut self, value: usize) -> &mut Self {
        self.stack_size = Some(value);
        self
    }

    /// Whether to lower the scheduling priority of the worker thread
    ///
    /// (Setter method.)
    pub fn low_priority(&mut self, value: bool) -> &mut Self {
        self.low_priority = Some(value);
        self
    }

    /// Polling interval for a [`WeakPoller`](crate::WeakPoller)
    ///
    /// (Setter method.)
    pub fn poll_interval(&mut self, value: Duration) -> &mut Self {
        self.poll_interval = Some(value);
        self
    }

    /// Builds a new `Config` from a builder
    ///
    /// Returns an error if the field values are invalid or inconsistent.
    pub fn build(&self) -> Result<Config, ConfigBuildError> {
        let invalid = |field: &str, problem: String| ConfigBuildError::Invalid {
            field: field.into(),
            problem,
        };

        let drain_timeout = self.drain_timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        if drain_timeout.is_zero() {
            return Err(invalid("drain_timeout", "must be nonzero".into()));
        }
        if drain_timeout > MAX_DRAIN_TIMEOUT {
            return Err(invalid(
                "drain_timeout",
                format!("must be at most {:?}", MAX_DRAIN_TIMEOUT),
            ));
        }

        if let Some(name) = &self.thread_name {
            if name.is_empty() {
                return Err(invalid("thread_name", "must not be empty".into()));
            }
            if name.contains('\0') {
                return Err(invalid("thread_name", "must not contain NUL".into()));
            }
        }

        if let Some(stack_size) = self.stack_size {
            if stack_size < MIN_STACK_SIZE {
                return Err(invalid(
                    "stack_size",
                    format!("must be at least {MIN_STACK_SIZE}"),
                ));
            }
        }

        let poll_interval = self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        if poll_interval.is_zero() {
            return Err(invalid("poll_interval", "must be nonzero".into()));
        }
        if self.poll_interval.is_some() && poll_interval > drain_timeout {
            return Err(ConfigBuildError::Inconsistent {
                fields: vec!["poll_interval".into(), "drain_timeout".into()],
                problem: "poll_interval must not exceed drain_timeout".into(),
            });
        }
        // An explicitly short drain_timeout implies frequent polling too.
        let poll_interval = poll_interval.min(drain_timeout);

        Ok(Config {
            drain_timeout,
            thread_name: self.thread_name.clone(),
            stack_size: self.stack_size,
            low_priority: self.low_priority.unwrap_or(true),
            poll_interval,
        })
    }
}
