//! Notification channel, from the reclaimer to the worker
//!
//! Multi-producer (every [`Notifier`]), single-consumer (the worker).
//! Unbounded, so that notifying never blocks the reclaimer.

use crate::internal_prelude::*;

use crossbeam_channel::RecvTimeoutError;

/// Sending half of a notification channel
#[derive(Debug, Clone)]
pub(crate) struct NotifySender(crossbeam_channel::Sender<RecordKey>);

/// Receiving half of a notification channel
///
/// Clones share one queue: each notification is popped by exactly one of them.
#[derive(Debug, Clone)]
pub(crate) struct NotifyReceiver(crossbeam_channel::Receiver<RecordKey>);

/// Outcome of [`NotifyReceiver::pop`]
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Popped {
    /// A record has been reported unreachable
    Record(RecordKey),
    /// Nothing arrived within the timeout
    TimedOut,
    /// Every sender has gone away
    Closed,
}

/// Error returned by [`NotifySender::push`] when the receiver has gone
#[derive(Debug, Clone, Error)]
#[error("cleaner worker has gone away")]
pub(crate) struct ReceiverGone;

/// Make a new notification channel
pub(crate) fn channel() -> (NotifySender, NotifyReceiver) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (NotifySender(tx), NotifyReceiver(rx))
}

impl NotifySender {
    /// Enqueue `key`
    ///
    /// Never blocks, since the channel is unbounded.
    pub(crate) fn push(&self, key: RecordKey) -> Result<(), ReceiverGone> {
        self.0.send(key).map_err(|_| ReceiverGone)
    }
}

impl NotifyReceiver {
    /// Wait up to `timeout` for a notification
    pub(crate) fn pop(&self, timeout: Duration) -> Popped {
        match self.0.recv_timeout(timeout) {
            Ok(key) => Popped::Record(key),
            Err(RecvTimeoutError::Timeout) => Popped::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Popped::Closed,
        }
    }

    /// Number of notifications waiting
    pub(crate) fn len(&self) -> usize {
        self.0.len()
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

    fn some_key() -> RecordKey {
        let mut reg = Registry::default();
        reg.insert(
            Strength::Weak,
            Tracked::from_weak(Weak::<()>::new()),
            Box::new(|| {}),
        )
    }

    #[test]
    fn push_pop() {
        let (tx, rx) = channel();
        let key = some_key();
        assert_eq!(rx.pop(Duration::from_millis(1)), Popped::TimedOut);
        tx.push(key).unwrap();
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.pop(Duration::from_millis(1)), Popped::Record(key));
        drop(tx);
        assert_eq!(rx.pop(Duration::from_secs(10)), Popped::Closed);
    }

    #[test]
    fn receiver_gone() {
        let (tx, rx) = channel();
        drop(rx);
        assert!(tx.push(some_key()).is_err());
    }
}
