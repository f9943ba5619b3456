//! Producers of topic values and the handles they publish through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::server::Shared;

/// A producer registered against one topic.
///
/// The server never holds a lock while calling into a publisher, so
/// implementations may call back into the server.
pub trait RtdPublisher: Send + Sync {
    fn topic(&self) -> &str;

    /// Subscriber count after a connect.
    fn connect(&self, subscribers: usize);

    /// Subscriber count after a disconnect. Return `true` once the publisher
    /// has nothing left to do for the topic (normally when `subscribers`
    /// reaches zero); the server then stops it and removes the topic.
    fn disconnect(&self, subscribers: usize) -> bool;

    /// Request cooperative cancellation. Must be idempotent.
    fn stop(&self);

    /// Whether all work (including any threads) has finished.
    fn done(&self) -> bool;

    /// Wait for owned threads to exit. Called only once `done()` is true or
    /// the server is shutting down.
    fn join(&self) {}
}

/// Shared cancellation flag between a publisher and its running task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Whether both tokens belong to the same producer.
    pub(crate) fn same(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Handed to a running task so it can publish values to its topic.
pub struct RtdNotifier<V> {
    topic: Arc<str>,
    server: Weak<Shared<V>>,
    token: CancelToken,
}

impl<V> Clone for RtdNotifier<V> {
    fn clone(&self) -> Self {
        Self {
            topic: Arc::clone(&self.topic),
            server: Weak::clone(&self.server),
            token: self.token.clone(),
        }
    }
}

impl<V> RtdNotifier<V> {
    pub(crate) fn new(topic: Arc<str>, server: Weak<Shared<V>>, token: CancelToken) -> Self {
        Self {
            topic,
            server,
            token,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// True once the task was stopped, either explicitly or because every
    /// subscriber disconnected. Long-running tasks should poll this.
    pub fn cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl<V: Send + Sync + 'static> RtdNotifier<V> {
    /// Publish a new value. Returns `false` once the task is stopped or the
    /// server has shut down.
    ///
    /// The value is tagged with this task's token; the worker discards it if
    /// another producer has been installed for the topic by the time it is
    /// processed.
    pub fn publish(&self, value: impl Into<V>) -> bool {
        if self.cancelled() {
            return false;
        }
        match self.server.upgrade() {
            Some(server) => server.publish(
                &self.topic,
                Some(Arc::new(value.into())),
                Some(self.token.clone()),
            ),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared_and_sticky() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn notifier_without_server_publishes_nothing() {
        let notifier: RtdNotifier<i32> =
            RtdNotifier::new(Arc::from("t"), Weak::new(), CancelToken::new());
        assert!(!notifier.publish(1));
        assert_eq!(notifier.topic(), "t");
        assert!(!notifier.cancelled());
    }

    #[test]
    fn tokens_compare_by_identity() {
        let token = CancelToken::new();
        assert!(token.same(&token.clone()));
        assert!(!token.same(&CancelToken::new()));
    }
}
