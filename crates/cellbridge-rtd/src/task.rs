//! Tasks run on their own thread and publish through an [`RtdNotifier`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use cellbridge_common::{ExcelError, ExcelErrorKind};
use parking_lot::Mutex;

use crate::error::Result;
use crate::publisher::{CancelToken, RtdNotifier, RtdPublisher};
use crate::server::{Shared, panic_message};
use crate::value::TopicValue;

pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A unit of asynchronous work producing values for one topic.
pub trait RtdTask<V>: AsAny + Send + Sync {
    /// Run to completion, publishing through `notifier`. An `Err` is
    /// published as the topic's value.
    fn run(&self, notifier: &RtdNotifier<V>) -> std::result::Result<(), ExcelError>;

    /// Whether `other` would compute the same thing, in which case a running
    /// instance of `self` is reused rather than restarted.
    fn same_work(&self, _other: &dyn RtdTask<V>) -> bool {
        false
    }
}

/// Task built from a function and its arguments.
///
/// Two `ArgsTask`s are the same work when they have the same concrete type
/// (so the same function) and equal arguments.
pub struct ArgsTask<A, F> {
    args: A,
    func: F,
}

impl<A, F> ArgsTask<A, F> {
    pub fn new(args: A, func: F) -> Self {
        Self { args, func }
    }

    pub fn args(&self) -> &A {
        &self.args
    }
}

impl<V, A, F> RtdTask<V> for ArgsTask<A, F>
where
    V: 'static,
    A: PartialEq + Send + Sync + 'static,
    F: Fn(&A, &RtdNotifier<V>) -> std::result::Result<(), ExcelError> + Send + Sync + 'static,
{
    fn run(&self, notifier: &RtdNotifier<V>) -> std::result::Result<(), ExcelError> {
        (self.func)(&self.args, notifier)
    }

    fn same_work(&self, other: &dyn RtdTask<V>) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| other.args == self.args)
    }
}

/// Publisher that runs an [`RtdTask`] on a dedicated thread.
///
/// Created idle; the server installs it for its topic and only then launches
/// the thread, so nothing the task publishes can arrive before the topic
/// exists. The thread is owned: it is joined when the publisher is reaped,
/// and as a last resort when the publisher is dropped.
pub struct TaskPublisher<V> {
    task: Arc<dyn RtdTask<V>>,
    notifier: RtdNotifier<V>,
    finished: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<V: TopicValue> TaskPublisher<V> {
    pub(crate) fn new(topic: &str, task: Arc<dyn RtdTask<V>>, server: &Arc<Shared<V>>) -> Arc<Self> {
        let notifier = RtdNotifier::new(Arc::from(topic), Arc::downgrade(server), CancelToken::new());
        Arc::new(Self {
            task,
            notifier,
            finished: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        })
    }

    /// Start the task thread. On failure the publisher is left stopped and
    /// done, so the server can discard it.
    pub(crate) fn launch(&self, thread_name: &str) -> Result<()> {
        let task = Arc::clone(&self.task);
        let notifier = self.notifier.clone();
        let finished = Arc::clone(&self.finished);
        let spawned = thread::Builder::new()
            .name(format!("{thread_name}-task"))
            .spawn(move || {
                run_task(&*task, &notifier);
                finished.store(true, Ordering::Release);
            });
        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                tracing::debug!(topic = self.notifier.topic(), "rtd task started");
                Ok(())
            }
            Err(err) => {
                self.notifier.token().cancel();
                self.finished.store(true, Ordering::Release);
                Err(err.into())
            }
        }
    }
}

impl<V> TaskPublisher<V> {
    pub fn task(&self) -> &dyn RtdTask<V> {
        &*self.task
    }

    /// Whether `stop` was called, by the server or because the topic was
    /// superseded or dropped.
    pub fn is_stopped(&self) -> bool {
        self.notifier.cancelled()
    }

    pub(crate) fn token(&self) -> &CancelToken {
        self.notifier.token()
    }

    fn join_thread(&self) {
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            // Panics were already caught and published by the thread
            let _ = handle.join();
        }
    }
}

fn run_task<V: TopicValue>(task: &dyn RtdTask<V>, notifier: &RtdNotifier<V>) {
    let failure = match panic::catch_unwind(AssertUnwindSafe(|| task.run(notifier))) {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(payload) => {
            let message = panic_message(&*payload);
            tracing::warn!(topic = notifier.topic(), panic = %message, "rtd task panicked");
            ExcelError::new(ExcelErrorKind::Value).with_message(message)
        }
    };
    // Discarded if the task was stopped meanwhile
    notifier.publish(V::from(failure));
}

impl<V: Send + Sync + 'static> RtdPublisher for TaskPublisher<V> {
    fn topic(&self) -> &str {
        self.notifier.topic()
    }

    fn connect(&self, _subscribers: usize) {}

    fn disconnect(&self, subscribers: usize) -> bool {
        subscribers == 0
    }

    fn stop(&self) {
        self.notifier.token().cancel();
    }

    fn done(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn join(&self) {
        self.join_thread();
    }
}

impl<V> Drop for TaskPublisher<V> {
    fn drop(&mut self) {
        self.notifier.token().cancel();
        self.join_thread();
    }
}
