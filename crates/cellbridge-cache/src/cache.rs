//! Address-scoped object cache.
//!
//! A cell "returns" a native object by inserting it here and handing the
//! resulting handle string back to the host. Objects are keyed by the
//! calling cell; re-evaluating that cell in a later recalculation replaces
//! what it cached before, which is how stale objects are released without
//! a sweep.

use std::sync::Arc;

use cellbridge_common::{CallerAddress, WorkbookScoped};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arena::{ObjectArena, ObjectId};
use crate::error::{CacheError, Result};
use crate::generation::GenerationClock;
use crate::handle::{is_reference, parse_handle, write_handle};
use crate::slot::{CellSlot, SlotIds};

/// Uniquifier used by caches that do not configure their own.
pub const DEFAULT_UNIQUIFIER: char = '\u{6B23}';

/// Supplies the address of the cell currently being evaluated.
pub trait CallerSource: Send + Sync {
    fn caller_address(&self) -> Option<CallerAddress>;
}

impl<F> CallerSource for F
where
    F: Fn() -> Option<CallerAddress> + Send + Sync,
{
    fn caller_address(&self) -> Option<CallerAddress> {
        (self)()
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// First character of every handle; pick one unlikely to start real text.
    pub uniquifier: char,
    /// Maintain an id -> handle map so callers can find an object's handle.
    pub reverse_lookup: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            uniquifier: DEFAULT_UNIQUIFIER,
            reverse_lookup: false,
        }
    }
}

impl CacheConfig {
    pub fn with_uniquifier(uniquifier: char) -> Self {
        Self {
            uniquifier,
            ..Self::default()
        }
    }
}

type WorkbookSlots = FxHashMap<String, CellSlot>;

struct CacheState<T> {
    workbooks: FxHashMap<String, WorkbookSlots>,
    arena: ObjectArena<T>,
}

impl<T> CacheState<T> {
    fn release(&mut self, ids: &[ObjectId]) -> Vec<T> {
        ids.iter().filter_map(|id| self.arena.remove(*id)).collect()
    }
}

pub struct ObjectCache<T> {
    config: CacheConfig,
    clock: Arc<GenerationClock>,
    state: Mutex<CacheState<T>>,
    // Separate lock so reverse bookkeeping never lengthens the map lock
    reverse: Mutex<FxHashMap<ObjectId, String>>,
}

impl<T: Clone> ObjectCache<T> {
    /// Cache with its own generation clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(GenerationClock::new()))
    }

    /// Cache sharing a generation clock with other caches.
    pub fn with_clock(config: CacheConfig, clock: Arc<GenerationClock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(CacheState {
                workbooks: FxHashMap::default(),
                arena: ObjectArena::new(),
            }),
            reverse: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn uniquifier(&self) -> char {
        self.config.uniquifier
    }

    pub fn clock(&self) -> &Arc<GenerationClock> {
        &self.clock
    }

    /// Cheap test whether `text` looks like one of this cache's handles.
    pub fn is_reference(&self, text: &str) -> bool {
        is_reference(text, self.config.uniquifier)
    }

    /// Advance the generation; call at the end of each recalculation.
    pub fn expire(&self) -> u64 {
        self.clock.advance()
    }

    /// Cache `obj` against `caller`, returning its handle.
    pub fn insert(&self, obj: T, caller: &CallerAddress) -> String {
        self.insert_with_id(obj, caller).0
    }

    /// Cache against whatever cell `source` reports as executing.
    pub fn insert_from(&self, obj: T, source: &dyn CallerSource) -> Result<String> {
        let caller = source.caller_address().ok_or(CacheError::NoCaller)?;
        Ok(self.insert(obj, &caller))
    }

    /// Cache against caller text of the form `[workbook]reference`.
    pub fn insert_at(&self, obj: T, caller: &str) -> Result<String> {
        let caller = CallerAddress::parse(caller)?;
        Ok(self.insert(obj, &caller))
    }

    pub fn insert_with_id(&self, obj: T, caller: &CallerAddress) -> (String, ObjectId) {
        let generation = self.clock.current();

        let mut state = self.state.lock();
        let CacheState { workbooks, arena } = &mut *state;
        let slots = workbooks.entry(caller.workbook().to_owned()).or_default();
        let slot = slots.entry(caller.reference().to_owned()).or_default();

        let stale_ids: SlotIds = slot.take_stale(generation).unwrap_or_default();
        let stale_objects: Vec<T> = stale_ids
            .iter()
            .filter_map(|stale| arena.remove(*stale))
            .collect();
        let id = arena.insert(obj);
        let index = slot.push(id);

        let handle = write_handle(
            self.config.uniquifier,
            caller.workbook(),
            caller.reference(),
            index,
        );

        if self.config.reverse_lookup {
            // Under the map lock: `id` must not be evicted before it is recorded
            let mut reverse = self.reverse.lock();
            for stale in &stale_ids {
                reverse.remove(stale);
            }
            reverse.insert(id, handle.clone());
        }
        drop(state);

        // Previous generation's objects are dropped here, outside both locks
        drop(stale_objects);
        (handle, id)
    }

    /// Resolve a handle. Malformed or unknown handles are `None`.
    pub fn fetch(&self, handle: &str) -> Option<T> {
        self.fetch_with_id(handle).map(|(_, obj)| obj)
    }

    pub fn fetch_with_id(&self, handle: &str) -> Option<(ObjectId, T)> {
        let parts = parse_handle(handle, self.config.uniquifier)?;
        let state = self.state.lock();
        let id = state
            .workbooks
            .get(parts.workbook)?
            .get(parts.reference)?
            .get(parts.index)?;
        state.arena.get(id).map(|obj| (id, obj.clone()))
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.fetch_with_id(handle).is_some()
    }

    pub fn get_by_id(&self, id: ObjectId) -> Option<T> {
        self.state.lock().arena.get(id).cloned()
    }

    /// Handle of a live object. Always `None` unless `reverse_lookup` is on.
    pub fn find_key(&self, id: ObjectId) -> Option<String> {
        let key = self.reverse.lock().get(&id).cloned()?;
        self.state.lock().arena.get(id).is_some().then_some(key)
    }

    /// Remove every object cached at the handle's address.
    ///
    /// The `,index` suffix is ignored: erasing addresses the cell, not one
    /// object in it.
    pub fn erase(&self, handle: &str) -> bool {
        let Some(parts) = parse_handle(handle, self.config.uniquifier) else {
            return false;
        };
        let released = {
            let mut state = self.state.lock();
            let Some(slots) = state.workbooks.get_mut(parts.workbook) else {
                return false;
            };
            let Some(slot) = slots.remove(parts.reference) else {
                return false;
            };
            if slots.is_empty() {
                state.workbooks.remove(parts.workbook);
            }
            let ids = slot.into_ids();
            self.forget(&ids);
            state.release(&ids)
        };
        drop(released);
        true
    }

    /// Every live handle, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut out = Vec::with_capacity(state.arena.len());
        for (workbook, slots) in &state.workbooks {
            for (reference, slot) in slots {
                for index in 0..slot.len() {
                    out.push(write_handle(
                        self.config.uniquifier,
                        workbook,
                        reference,
                        index,
                    ));
                }
            }
        }
        out
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.state.lock().arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop reverse entries; callers hold the map lock (map before reverse).
    fn forget(&self, ids: &[ObjectId]) {
        if !self.config.reverse_lookup || ids.is_empty() {
            return;
        }
        let mut reverse = self.reverse.lock();
        for id in ids {
            reverse.remove(id);
        }
    }
}

impl<T: Clone + Send> WorkbookScoped for ObjectCache<T> {
    fn close_workbook(&self, workbook: &str) -> usize {
        let objects = {
            let mut state = self.state.lock();
            let Some(slots) = state.workbooks.remove(workbook) else {
                return 0;
            };
            let ids: Vec<ObjectId> = slots
                .into_values()
                .flat_map(|slot| slot.into_ids())
                .collect();
            self.forget(&ids);
            state.release(&ids)
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(workbook, released = objects.len(), "cache workbook closed");

        objects.len()
    }
}

#[cfg(test)]
impl<T> ObjectCache<T> {
    fn reverse_len(&self) -> usize {
        self.reverse.lock().len()
    }
}
