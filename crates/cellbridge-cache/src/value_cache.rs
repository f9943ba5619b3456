//! Cache of host-native values.
//!
//! Lets a cell return a large array (or any value) by handle so other cells
//! can consume it without the host materialising it in between.

use std::sync::Arc;

use cellbridge_common::CellValue;

use crate::cache::{CacheConfig, ObjectCache};
use crate::generation::GenerationClock;

/// Uniquifier reserved for the value cache.
pub const VALUE_CACHE_UNIQUIFIER: char = '\u{6C38}';

pub type ValueCache = ObjectCache<Arc<CellValue>>;

/// Build a value cache on a shared clock.
pub fn value_cache(clock: Arc<GenerationClock>) -> ValueCache {
    ObjectCache::with_clock(
        CacheConfig::with_uniquifier(VALUE_CACHE_UNIQUIFIER),
        clock,
    )
}

impl ValueCache {
    /// If `value` is a handle into this cache, return the cached value;
    /// otherwise return `value` unchanged.
    pub fn expand(&self, value: &CellValue) -> CellValue {
        self.expand_ref(value)
            .map(|cached| (*cached).clone())
            .unwrap_or_else(|| value.clone())
    }

    /// Shared-pointer form of [`expand`](Self::expand); `None` when `value`
    /// is not a resolvable handle.
    pub fn expand_ref(&self, value: &CellValue) -> Option<Arc<CellValue>> {
        let text = value.as_text()?;
        if !self.is_reference(text) {
            return None;
        }
        self.fetch(text)
    }
}
