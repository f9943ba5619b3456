use std::sync::atomic::{AtomicU64, Ordering};

/// Recalculation counter, advanced once per host recalculation pass.
///
/// Slots remember the generation they were filled in; an insert that sees a
/// different value discards the slot's previous contents. Advancing is driven
/// by a single host event, so no lock is needed beyond the atomic itself.
#[derive(Debug)]
pub struct GenerationClock {
    current: AtomicU64,
}

/// Generation a fresh slot carries. The clock never reports it, so the first
/// insert into any slot always opens a new generation.
pub const UNSET_GENERATION: u64 = 0;

impl GenerationClock {
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(UNSET_GENERATION + 1),
        }
    }

    /// Get the current generation
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Advance to the next generation, returning it.
    ///
    /// Wraps on overflow, skipping `UNSET_GENERATION`.
    pub fn advance(&self) -> u64 {
        let mut next = self.current.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        if next == UNSET_GENERATION {
            next = self.current.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(generation = next, "cache generation advanced");
        next
    }
}

impl Default for GenerationClock {
    fn default() -> Self {
        Self::new()
    }
}
