//! One place that owns the caches and the RTD server for a host session and
//! wires them to host events.

use std::any::Any;
use std::sync::{Arc, Weak};

use cellbridge_cache::{CacheError, GenerationClock, ObjectCache, ValueCache};
use cellbridge_common::{CallerAddress, CellValue, WorkbookScoped};
use cellbridge_rtd::{AsyncTaskBridge, RtdServer, RtdTask};

use crate::config::ContextConfig;
use crate::error::Result;
use crate::host::Host;

/// Anything a cell can return by handle.
pub type Object = Arc<dyn Any + Send + Sync>;

pub struct Context {
    host: Arc<dyn Host>,
    clock: Arc<GenerationClock>,
    objects: Arc<ObjectCache<Object>>,
    values: Arc<ValueCache>,
    rtd: Arc<RtdServer<CellValue>>,
    bridge: Arc<AsyncTaskBridge<CellValue>>,
}

impl Context {
    /// Build the caches, start the RTD worker and register with `host`.
    pub fn new(host: Arc<dyn Host>, config: ContextConfig) -> Result<Self> {
        let ContextConfig {
            object_cache,
            value_cache,
            rtd,
        } = config;

        if object_cache.uniquifier == value_cache.uniquifier {
            tracing::warn!(
                uniquifier = %object_cache.uniquifier,
                "object and value caches share a uniquifier; handles will be ambiguous"
            );
        }

        let clock = Arc::new(GenerationClock::new());
        let objects = Arc::new(ObjectCache::with_clock(object_cache, Arc::clone(&clock)));
        let values: Arc<ValueCache> = Arc::new(ObjectCache::with_clock(value_cache, Arc::clone(&clock)));

        let notify_host = Arc::downgrade(&host);
        let rtd = Arc::new(RtdServer::spawn(rtd, move || {
            if let Some(host) = notify_host.upgrade() {
                host.notify_ready_topics();
            }
        })?);
        let bridge = Arc::new(AsyncTaskBridge::new(Arc::clone(&rtd)));

        let weak_clock = Arc::downgrade(&clock);
        let weak_bridge = Arc::downgrade(&bridge);
        host.on_calculation_end(Box::new(move || {
            if let Some(clock) = weak_clock.upgrade() {
                clock.advance();
            }
            if let Some(bridge) = weak_bridge.upgrade() {
                bridge.prune();
            }
        }));

        let scoped: Vec<Weak<dyn WorkbookScoped>> = vec![
            Arc::downgrade(&objects) as Weak<dyn WorkbookScoped>,
            Arc::downgrade(&values) as Weak<dyn WorkbookScoped>,
            Arc::downgrade(&bridge) as Weak<dyn WorkbookScoped>,
        ];
        host.on_workbook_closed(Box::new(move |workbook| {
            let released: usize = scoped
                .iter()
                .filter_map(Weak::upgrade)
                .map(|scope| scope.close_workbook(workbook))
                .sum();
            tracing::debug!(workbook, released, "workbook closed");
        }));

        Ok(Self {
            host,
            clock,
            objects,
            values,
            rtd,
            bridge,
        })
    }

    fn caller(&self) -> std::result::Result<CallerAddress, CacheError> {
        self.host.caller_address().ok_or(CacheError::NoCaller)
    }

    /// Cache `obj` against the calling cell and return its handle.
    pub fn insert_object<T: Any + Send + Sync>(&self, obj: T) -> Result<String> {
        let caller = self.caller()?;
        Ok(self.objects.insert(Arc::new(obj) as Object, &caller))
    }

    /// Resolve a handle to an object of type `T`; `None` if the handle is
    /// unknown or holds something else.
    pub fn fetch_object<T: Any + Send + Sync>(&self, handle: &str) -> Option<Arc<T>> {
        self.objects.fetch(handle)?.downcast::<T>().ok()
    }

    pub fn erase_object(&self, handle: &str) -> bool {
        self.objects.erase(handle)
    }

    /// Cache a host value (typically a large array) against the calling cell.
    pub fn insert_value(&self, value: CellValue) -> Result<String> {
        let caller = self.caller()?;
        Ok(self.values.insert(Arc::new(value), &caller))
    }

    /// Replace a value-cache handle with the value it refers to.
    pub fn expand(&self, value: &CellValue) -> CellValue {
        self.values.expand(value)
    }

    /// Run `task` in the background for the calling cell. Returns the latest
    /// published value, or `CellValue::Pending` until there is one.
    pub fn request_async<T: RtdTask<CellValue>>(&self, task: T) -> Result<Arc<CellValue>> {
        let caller = self.caller()?;
        Ok(self.bridge.request_at(&caller, task)?)
    }

    pub fn objects(&self) -> &Arc<ObjectCache<Object>> {
        &self.objects
    }

    pub fn values(&self) -> &Arc<ValueCache> {
        &self.values
    }

    pub fn rtd(&self) -> &Arc<RtdServer<CellValue>> {
        &self.rtd
    }

    pub fn bridge(&self) -> &Arc<AsyncTaskBridge<CellValue>> {
        &self.bridge
    }

    pub fn generation(&self) -> u64 {
        self.clock.current()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let dropped = self.bridge.clear();
        self.rtd.join();
        tracing::debug!(dropped, "context shut down");
    }
}
