use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::publisher::{CancelToken, RtdPublisher};

/// Host-assigned subscriber (RTD topic) id.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub i64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SubscriberId {
    fn from(id: i64) -> Self {
        SubscriberId(id)
    }
}

/// Producer state of a topic as seen by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicState {
    /// Topic exists but nothing is installed to produce values for it.
    NoProducer,
    /// A producer is installed (it may already have finished publishing).
    Running,
    /// A producer was stopped and has not finished yet.
    Stopping,
}

pub(crate) struct TopicRecord<V> {
    pub publisher: Option<Arc<dyn RtdPublisher>>,
    // Token of the installed task publisher; tagged values must match it
    pub producer: Option<CancelToken>,
    pub subscribers: FxHashSet<SubscriberId>,
    // Written by the worker under the table read lock
    pub value: Mutex<Option<Arc<V>>>,
}

impl<V> Default for TopicRecord<V> {
    fn default() -> Self {
        Self {
            publisher: None,
            producer: None,
            subscribers: FxHashSet::default(),
            value: Mutex::new(None),
        }
    }
}

impl<V> TopicRecord<V> {
    /// No producer and nobody listening: the record can go.
    pub fn is_vacant(&self) -> bool {
        self.publisher.is_none() && self.subscribers.is_empty()
    }
}
