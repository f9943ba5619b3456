//! Topic table and the worker thread that batches updates for the host.
//!
//! Producers publish from any thread into a narrow value queue. A single
//! worker drains it, records each topic's most recent value, collects the
//! subscribers to refresh and hands them to the host as one batch. The host
//! takes the batch with [`RtdServer::pull_ready_updates`]; until it does, new
//! ready subscribers accumulate in the worker rather than queueing batches.

use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Result, RtdError};
use crate::publisher::{CancelToken, RtdPublisher};
use crate::task::{RtdTask, TaskPublisher};
use crate::topic::{SubscriberId, TopicRecord, TopicState};
use crate::value::TopicValue;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtdConfig {
    /// Name of the worker thread; task threads get a `-task` suffix.
    pub thread_name: String,
    /// How often the worker re-checks stopped producers that have not
    /// finished yet. Unused while none are outstanding.
    pub reap_interval: Duration,
}

impl Default for RtdConfig {
    fn default() -> Self {
        Self {
            thread_name: "cellbridge-rtd".to_string(),
            reap_interval: Duration::from_millis(50),
        }
    }
}

// Topic, value, and the token of the task that published it, if any
type PendingValue<V> = (String, Option<Arc<V>>, Option<CancelToken>);

struct ValueQueue<V> {
    values: Vec<PendingValue<V>>,
    // Lives under the same mutex the worker waits on, so a notify between the
    // worker's check and its wait cannot be lost.
    work_pending: bool,
}

#[derive(Default)]
struct SubscriptionQueue {
    connects: Vec<(SubscriberId, String)>,
    disconnects: Vec<SubscriberId>,
}

struct TopicTable<V> {
    records: FxHashMap<String, TopicRecord<V>>,
    active: FxHashMap<SubscriberId, String>,
    // Stopped producers still winding down, with their topic
    cancelled: Vec<(String, Arc<dyn RtdPublisher>)>,
}

impl<V> Default for TopicTable<V> {
    fn default() -> Self {
        Self {
            records: FxHashMap::default(),
            active: FxHashMap::default(),
            cancelled: Vec::new(),
        }
    }
}

pub(crate) struct Shared<V> {
    config: RtdConfig,
    running: AtomicBool,
    queue: Mutex<ValueQueue<V>>,
    wake: Condvar,
    subscriptions: Mutex<SubscriptionQueue>,
    table: RwLock<TopicTable<V>>,
    ready: Mutex<Option<Vec<SubscriberId>>>,
    update_notify: Box<dyn Fn() + Send + Sync>,
}

/// Extract a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a publisher or host callback, logging and swallowing any panic.
fn guarded<R>(what: &'static str, topic: &str, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => Some(r),
        Err(payload) => {
            tracing::warn!(
                topic,
                panic = %panic_message(&*payload),
                "rtd {what} panicked"
            );
            None
        }
    }
}

impl<V: Send + Sync + 'static> Shared<V> {
    pub(crate) fn thread_name(&self) -> &str {
        &self.config.thread_name
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn notify(&self) {
        self.queue.lock().work_pending = true;
        self.wake.notify_one();
    }

    pub(crate) fn publish(
        &self,
        topic: &str,
        value: Option<Arc<V>>,
        producer: Option<CancelToken>,
    ) -> bool {
        if !self.is_running() {
            return false;
        }
        {
            let mut queue = self.queue.lock();
            queue.values.push((topic.to_owned(), value, producer));
            queue.work_pending = true;
        }
        self.wake.notify_one();
        true
    }

    /// Block until there is work. `None` means quit.
    fn wait_for_work(&self) -> Option<Vec<PendingValue<V>>> {
        let reaping = !self.table.read().cancelled.is_empty();
        let mut queue = self.queue.lock();
        while !queue.work_pending && self.is_running() {
            if reaping {
                if self
                    .wake
                    .wait_for(&mut queue, self.config.reap_interval)
                    .timed_out()
                {
                    break;
                }
            } else {
                self.wake.wait(&mut queue);
            }
        }
        queue.work_pending = false;
        if !self.is_running() {
            return None;
        }
        Some(mem::take(&mut queue.values))
    }

    fn worker_main(&self) {
        tracing::debug!(thread = %self.config.thread_name, "rtd worker started");
        let mut ready: FxHashSet<SubscriberId> = FxHashSet::default();

        while let Some(values) = self.wait_for_work() {
            if !values.is_empty() {
                let table = self.table.read();
                for (topic, value, producer) in values {
                    let Some(record) = table.records.get(&topic) else {
                        continue;
                    };
                    if let Some(producer) = &producer {
                        // Published by a task that has since been replaced
                        if !record.producer.as_ref().is_some_and(|t| t.same(producer)) {
                            continue;
                        }
                    }
                    *record.value.lock() = value;
                    ready.extend(record.subscribers.iter().copied());
                }
            }

            if !ready.is_empty() {
                let handed_off = {
                    let mut slot = self.ready.lock();
                    // A batch still sitting in the slot means the host has not
                    // caught up; keep accumulating until it does.
                    if slot.is_none() {
                        *slot = Some(ready.drain().collect());
                        true
                    } else {
                        false
                    }
                };
                if handed_off {
                    guarded("update notification", "", || (self.update_notify)());
                }
            }

            let SubscriptionQueue {
                connects,
                disconnects,
            } = mem::take(&mut *self.subscriptions.lock());
            for (id, topic) in connects {
                self.connect_topic(id, topic);
            }
            for id in disconnects {
                self.disconnect_topic(id);
            }

            self.reap();
        }

        self.shutdown();
        tracing::debug!(thread = %self.config.thread_name, "rtd worker exited");
    }

    fn connect_topic(&self, id: SubscriberId, topic: String) {
        tracing::trace!(%id, topic = %topic, "rtd connect");
        let (publisher, subscribers) = {
            let mut table = self.table.write();
            let record = table.records.entry(topic.clone()).or_default();
            record.subscribers.insert(id);
            let found = (record.publisher.clone(), record.subscribers.len());
            table.active.insert(id, topic);
            found
        };
        if let Some(publisher) = publisher {
            guarded("connect", publisher.topic(), || {
                publisher.connect(subscribers)
            });
        }
    }

    fn disconnect_topic(&self, id: SubscriberId) {
        tracing::trace!(%id, "rtd disconnect");
        let (topic, publisher, subscribers) = {
            let mut table = self.table.write();
            let Some(topic) = table.active.remove(&id) else {
                tracing::warn!(%id, "rtd disconnect for unknown subscriber");
                return;
            };
            let Some(record) = table.records.get_mut(&topic) else {
                return;
            };
            record.subscribers.remove(&id);
            let found = (record.publisher.clone(), record.subscribers.len());
            if record.is_vacant() {
                table.records.remove(&topic);
            }
            (topic, found.0, found.1)
        };

        let Some(publisher) = publisher else {
            return;
        };
        let finished = guarded("disconnect", &topic, || publisher.disconnect(subscribers));
        if finished != Some(true) {
            return;
        }

        let done = guarded("done", &topic, || publisher.done()).unwrap_or(true);
        if !done {
            guarded("stop", &topic, || publisher.stop());
        }
        tracing::debug!(topic = %topic, done, "rtd producer finished with topic");

        let mut table = self.table.write();
        let still_ours = table.records.get(&topic).is_some_and(|record| {
            record.subscribers.is_empty()
                && record
                    .publisher
                    .as_ref()
                    .is_some_and(|p| Arc::ptr_eq(p, &publisher))
        });
        if still_ours {
            table.records.remove(&topic);
        }
        if !done {
            table.cancelled.push((topic, publisher));
        }
    }

    /// Join stopped producers that have now finished.
    fn reap(&self) {
        let candidates = {
            let mut table = self.table.write();
            if table.cancelled.is_empty() {
                return;
            }
            mem::take(&mut table.cancelled)
        };
        let (finished, pending): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|(topic, p)| guarded("done", topic, || p.done()).unwrap_or(true));
        if !pending.is_empty() {
            self.table.write().cancelled.extend(pending);
        }
        for (topic, publisher) in finished {
            tracing::debug!(topic = %topic, "rtd producer reaped");
            guarded("join", &topic, || publisher.join());
        }
    }

    fn shutdown(&self) {
        let publishers: Vec<(String, Arc<dyn RtdPublisher>)> = {
            let mut table = self.table.write();
            let mut all = mem::take(&mut table.cancelled);
            for (topic, record) in table.records.drain() {
                if let Some(publisher) = record.publisher {
                    all.push((topic, publisher));
                }
            }
            table.active.clear();
            all
        };
        for (topic, publisher) in &publishers {
            guarded("stop", topic, || publisher.stop());
        }
        for (topic, publisher) in &publishers {
            guarded("join", topic, || publisher.join());
        }
        tracing::debug!(stopped = publishers.len(), "rtd producers shut down");
    }
}

/// Publish/subscribe server backed by one worker thread.
pub struct RtdServer<V> {
    shared: Arc<Shared<V>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<V: Send + Sync + 'static> RtdServer<V> {
    /// Start the worker. `update_notify` is called (from the worker thread)
    /// whenever a new batch is ready for [`pull_ready_updates`](Self::pull_ready_updates).
    pub fn spawn(config: RtdConfig, update_notify: impl Fn() + Send + Sync + 'static) -> Result<Self> {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            queue: Mutex::new(ValueQueue {
                values: Vec::new(),
                work_pending: false,
            }),
            wake: Condvar::new(),
            subscriptions: Mutex::new(SubscriptionQueue::default()),
            table: RwLock::new(TopicTable::default()),
            ready: Mutex::new(None),
            update_notify: Box::new(update_notify),
            config,
        });
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(shared.config.thread_name.clone())
                .spawn(move || shared.worker_main())?
        };
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn config(&self) -> &RtdConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Subscribe host id `id` to `topic`.
    pub fn connect(&self, id: SubscriberId, topic: impl Into<String>) {
        self.shared
            .subscriptions
            .lock()
            .connects
            .push((id, topic.into()));
        self.shared.notify();
    }

    pub fn disconnect(&self, id: SubscriberId) {
        self.shared.subscriptions.lock().disconnects.push(id);
        self.shared.notify();
    }

    /// Queue a new value for `topic`. Values for topics nobody has connected
    /// to or started are dropped by the worker. Returns `false` once the
    /// server has quit.
    pub fn publish(&self, topic: &str, value: V) -> bool {
        self.shared.publish(topic, Some(Arc::new(value)), None)
    }

    /// Take the outstanding batch of subscribers whose topics changed.
    pub fn pull_ready_updates(&self) -> Option<Vec<SubscriberId>> {
        let batch = self.shared.ready.lock().take();
        self.shared.notify();
        batch
    }

    /// Install `publisher` for its topic, stopping whatever it replaces.
    pub fn start(&self, publisher: Arc<dyn RtdPublisher>) -> Result<()> {
        self.install(publisher, None)
    }

    fn install(&self, publisher: Arc<dyn RtdPublisher>, producer: Option<CancelToken>) -> Result<()> {
        if !self.is_running() {
            return Err(RtdError::NotRunning);
        }
        let topic = publisher.topic().to_owned();
        let previous = {
            let mut table = self.shared.table.write();
            let record = table.records.entry(topic.clone()).or_default();
            record.producer = producer;
            let previous = record.publisher.replace(publisher);
            if let Some(previous) = &previous {
                table.cancelled.push((topic.clone(), Arc::clone(previous)));
            }
            previous
        };
        if let Some(previous) = previous {
            tracing::debug!(topic = %topic, "rtd producer superseded");
            guarded("stop", &topic, || previous.stop());
            // Wake the worker so it starts reaping
            self.shared.notify();
        }
        Ok(())
    }

    /// Stop and detach the producer of `topic`, then publish an empty value
    /// so subscribers refresh. `false` if the topic is unknown.
    pub fn drop_topic(&self, topic: &str) -> bool {
        let publisher = {
            let mut table = self.shared.table.write();
            let Some(record) = table.records.get_mut(topic) else {
                return false;
            };
            let publisher = record.publisher.take();
            record.producer = None;
            if record.is_vacant() {
                table.records.remove(topic);
            }
            if let Some(publisher) = &publisher {
                table.cancelled.push((topic.to_owned(), Arc::clone(publisher)));
            }
            publisher
        };
        if let Some(publisher) = publisher {
            guarded("stop", topic, || publisher.stop());
        }
        tracing::debug!(topic, "rtd topic dropped");
        self.shared.publish(topic, None, None);
        true
    }

    /// Uninstall `publisher` if it is still the producer for `topic`.
    fn withdraw(&self, topic: &str, publisher: &Arc<dyn RtdPublisher>) {
        let mut table = self.shared.table.write();
        let Some(record) = table.records.get_mut(topic) else {
            return;
        };
        if record.publisher.as_ref().is_some_and(|p| Arc::ptr_eq(p, publisher)) {
            record.publisher = None;
            record.producer = None;
            if record.is_vacant() {
                table.records.remove(topic);
            }
        }
    }

    /// Most recent value published to `topic`.
    pub fn value(&self, topic: &str) -> Option<Arc<V>> {
        let table = self.shared.table.read();
        let value = table.records.get(topic)?.value.lock().clone();
        value
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.shared.table.read().records.contains_key(topic)
    }

    /// `None` if the server knows nothing about `topic`.
    pub fn topic_state(&self, topic: &str) -> Option<TopicState> {
        let table = self.shared.table.read();
        match table.records.get(topic) {
            Some(record) if record.publisher.is_some() => Some(TopicState::Running),
            _ if table.cancelled.iter().any(|(t, _)| t == topic) => Some(TopicState::Stopping),
            Some(_) => Some(TopicState::NoProducer),
            None => None,
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared
            .table
            .read()
            .records
            .get(topic)
            .map_or(0, |record| record.subscribers.len())
    }

    /// Ask the worker to stop. Producers are stopped and joined on the worker
    /// thread; use [`join`](Self::join) to wait for that.
    pub fn quit(&self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            self.shared.notify();
        }
    }

    pub fn join(&self) {
        self.quit();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::warn!("rtd worker thread panicked");
            }
        }
    }
}

impl<V: TopicValue> RtdServer<V> {
    /// Run `task` on its own thread as the producer for `topic`.
    pub fn start_task(&self, topic: &str, task: Arc<dyn RtdTask<V>>) -> Result<Arc<TaskPublisher<V>>> {
        if !self.is_running() {
            return Err(RtdError::NotRunning);
        }
        let publisher = TaskPublisher::new(topic, task, &self.shared);
        self.install(publisher.clone(), Some(publisher.token().clone()))?;
        // Installed before launch: a task that publishes at once finds its topic
        if let Err(err) = publisher.launch(self.shared.thread_name()) {
            let installed: Arc<dyn RtdPublisher> = publisher.clone();
            self.withdraw(topic, &installed);
            return Err(err);
        }
        Ok(publisher)
    }
}

impl<V> Drop for RtdServer<V> {
    fn drop(&mut self) {
        if self.shared.running.swap(false, Ordering::AcqRel) {
            self.shared.queue.lock().work_pending = true;
            self.shared.wake.notify_one();
        }
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::RtdNotifier;
    use crate::task::ArgsTask;
    use cellbridge_common::{CellValue, ExcelError};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn server() -> (RtdServer<i32>, Arc<AtomicUsize>) {
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let server = RtdServer::spawn(RtdConfig::default(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("spawn worker");
        (server, notified)
    }

    #[test]
    fn connect_then_publish_produces_one_batch() {
        let (server, notified) = server();
        server.connect(SubscriberId(1), "t");
        assert!(wait_until(|| server.subscriber_count("t") == 1));

        assert!(server.publish("t", 5));
        assert!(wait_until(|| notified.load(Ordering::SeqCst) == 1));
        assert_eq!(server.pull_ready_updates(), Some(vec![SubscriberId(1)]));
        assert_eq!(server.value("t").as_deref(), Some(&5));
        assert_eq!(server.pull_ready_updates(), None);
        assert_eq!(server.topic_state("t"), Some(TopicState::NoProducer));
    }

    #[test]
    fn publish_to_unknown_topic_is_dropped() {
        let (server, notified) = server();
        server.publish("nobody", 1);
        server.connect(SubscriberId(1), "t");
        assert!(wait_until(|| server.has_topic("t")));
        assert!(!server.has_topic("nobody"));
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disconnect_removes_producerless_topic() {
        let (server, _) = server();
        server.connect(SubscriberId(1), "t");
        server.connect(SubscriberId(2), "t");
        assert!(wait_until(|| server.subscriber_count("t") == 2));
        server.disconnect(SubscriberId(1));
        assert!(wait_until(|| server.subscriber_count("t") == 1));
        server.disconnect(SubscriberId(2));
        assert!(wait_until(|| !server.has_topic("t")));
        assert_eq!(server.topic_state("t"), None);
    }

    #[test]
    fn quit_refuses_further_work() {
        let (server, _) = server();
        server.join();
        assert!(!server.is_running());
        assert!(!server.publish("t", 1));
    }

    #[test]
    fn panicking_notify_is_swallowed() {
        let server: RtdServer<i32> =
            RtdServer::spawn(RtdConfig::default(), || panic!("host exploded")).expect("spawn");
        server.connect(SubscriberId(1), "t");
        assert!(wait_until(|| server.has_topic("t")));
        server.publish("t", 1);
        assert!(wait_until(|| server.pull_ready_updates().is_some()));

        // Worker survived
        server.connect(SubscriberId(2), "u");
        assert!(wait_until(|| server.has_topic("u")));
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*payload), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }

    fn idle_task() -> Arc<dyn RtdTask<CellValue>> {
        Arc::new(ArgsTask::new(
            (),
            |_: &(), n: &RtdNotifier<CellValue>| -> std::result::Result<(), ExcelError> {
                while !n.cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(())
            },
        ))
    }

    #[test]
    fn values_from_a_replaced_task_are_discarded() {
        let server: RtdServer<CellValue> = RtdServer::spawn(RtdConfig::default(), || {}).expect("spawn");
        server.connect(SubscriberId(1), "u");
        assert!(wait_until(|| server.has_topic("u")));

        let old = server.start_task("t", idle_task()).expect("start");
        let stale = old.token().clone();
        let current = server.start_task("t", idle_task()).expect("start");

        // Queued by the old task just before it saw the cancel
        server.shared.publish("t", Some(Arc::new(CellValue::Int(1))), Some(stale));
        server.publish("u", CellValue::Int(0));
        assert!(wait_until(|| server.value("u").is_some()));
        assert_eq!(server.value("t"), None);

        let token = current.token().clone();
        server.shared.publish("t", Some(Arc::new(CellValue::Int(3))), Some(token));
        assert!(wait_until(|| server.value("t").as_deref() == Some(&CellValue::Int(3))));
    }

    #[test]
    fn task_release_on_last_disconnect_leaves_stopping_to_the_server() {
        let server: RtdServer<CellValue> = RtdServer::spawn(RtdConfig::default(), || {}).expect("spawn");
        let publisher = TaskPublisher::new("t", idle_task(), &server.shared);
        assert!(!publisher.disconnect(1));
        assert!(publisher.disconnect(0));
        assert!(!publisher.is_stopped());
        publisher.stop();
        assert!(publisher.is_stopped());
    }
}
