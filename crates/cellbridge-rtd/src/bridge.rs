//! Turns a worksheet function call into a background task whose result
//! arrives later through the RTD server.
//!
//! Every recalculation re-invokes the function. The bridge keeps the task
//! started by the first call and only restarts it when the new request is not
//! the same work, so a volatile recalc does not spin up duplicate tasks.
//! Entries for tasks the server has since stopped are dropped by
//! [`AsyncTaskBridge::prune`], which the owner calls once per recalculation.

use std::sync::Arc;

use cellbridge_common::{CallerAddress, WorkbookScoped};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::server::RtdServer;
use crate::task::{RtdTask, TaskPublisher};
use crate::value::TopicValue;

struct BridgeEntry<V> {
    workbook: Option<String>,
    publisher: Arc<TaskPublisher<V>>,
}

pub struct AsyncTaskBridge<V> {
    server: Arc<RtdServer<V>>,
    entries: Mutex<FxHashMap<String, BridgeEntry<V>>>,
}

impl<V: TopicValue> AsyncTaskBridge<V> {
    pub fn new(server: Arc<RtdServer<V>>) -> Self {
        Self {
            server,
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn server(&self) -> &Arc<RtdServer<V>> {
        &self.server
    }

    /// Start `task` on `topic` unless an equivalent task is already running,
    /// then return the topic's latest value or [`TopicValue::pending`].
    pub fn request<T: RtdTask<V>>(&self, topic: &str, task: T) -> Result<Arc<V>> {
        self.request_tagged(topic, None, Arc::new(task))
    }

    /// As [`request`](Self::request), keyed by the calling cell and dropped
    /// when its workbook closes.
    pub fn request_at<T: RtdTask<V>>(&self, caller: &CallerAddress, task: T) -> Result<Arc<V>> {
        self.request_tagged(
            &caller.to_string(),
            Some(caller.workbook().to_owned()),
            Arc::new(task),
        )
    }

    fn request_tagged(
        &self,
        topic: &str,
        workbook: Option<String>,
        task: Arc<dyn RtdTask<V>>,
    ) -> Result<Arc<V>> {
        let previous = {
            // Held across the decision and the start, so equal concurrent
            // requests start the task once
            let mut entries = self.entries.lock();
            let reuse = entries.get(topic).is_some_and(|entry| {
                !entry.publisher.is_stopped() && entry.publisher.task().same_work(&*task)
            });
            if reuse {
                None
            } else {
                // Supersedes (and stops) whatever the server had for the topic
                let publisher = self.server.start_task(topic, task)?;
                entries.insert(topic.to_owned(), BridgeEntry { workbook, publisher })
            }
        };
        // Old publisher is still tracked by the server until reaped
        drop(previous);

        Ok(self
            .server
            .value(topic)
            .unwrap_or_else(|| Arc::new(V::pending())))
    }

    /// Forget tasks the server has stopped: superseded, dropped, or left by
    /// their last subscriber. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let stale: Vec<BridgeEntry<V>> = {
            let mut entries = self.entries.lock();
            let topics: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.publisher.is_stopped())
                .map(|(topic, _)| topic.clone())
                .collect();
            topics.iter().filter_map(|topic| entries.remove(topic)).collect()
        };
        if !stale.is_empty() {
            tracing::trace!(pruned = stale.len(), "rtd bridge pruned stopped tasks");
        }
        stale.len()
    }

    /// Whether a running task is being tracked for `topic`.
    pub fn is_tracking(&self, topic: &str) -> bool {
        self.entries
            .lock()
            .get(topic)
            .is_some_and(|entry| !entry.publisher.is_stopped())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every tracked topic.
    pub fn clear(&self) -> usize {
        let drained: Vec<String> = self.entries.lock().drain().map(|(topic, _)| topic).collect();
        for topic in &drained {
            self.server.drop_topic(topic);
        }
        drained.len()
    }
}

impl<V: TopicValue> WorkbookScoped for AsyncTaskBridge<V> {
    fn close_workbook(&self, workbook: &str) -> usize {
        let topics: Vec<String> = {
            let mut entries = self.entries.lock();
            let topics: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.workbook.as_deref() == Some(workbook))
                .map(|(topic, _)| topic.clone())
                .collect();
            for topic in &topics {
                entries.remove(topic);
            }
            topics
        };
        for topic in &topics {
            self.server.drop_topic(topic);
        }
        tracing::debug!(workbook, dropped = topics.len(), "rtd workbook closed");
        topics.len()
    }
}
