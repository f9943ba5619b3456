use smallvec::SmallVec;

use crate::arena::ObjectId;
use crate::generation::UNSET_GENERATION;

/// Ids held by one slot; almost every cell caches a single object.
pub type SlotIds = SmallVec<[ObjectId; 2]>;

/// Objects cached by one (workbook, address) during one generation.
pub struct CellSlot {
    generation: u64,
    objects: SlotIds,
}

impl CellSlot {
    pub fn new() -> Self {
        Self {
            generation: UNSET_GENERATION,
            objects: SlotIds::new(),
        }
    }

    /// If `generation` differs from the slot's, start a fresh generation and
    /// hand back the previous contents for disposal.
    pub fn take_stale(&mut self, generation: u64) -> Option<SlotIds> {
        if self.generation == generation {
            return None;
        }
        self.generation = generation;
        Some(std::mem::take(&mut self.objects))
    }

    /// Append to the current generation, returning the object's slot index.
    pub fn push(&mut self, id: ObjectId) -> usize {
        self.objects.push(id);
        self.objects.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<ObjectId> {
        self.objects.get(index).copied()
    }

    pub fn ids(&self) -> &[ObjectId] {
        &self.objects
    }

    pub fn into_ids(self) -> SlotIds {
        self.objects
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for CellSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ObjectArena;

    #[test]
    fn same_generation_appends() {
        let mut arena = ObjectArena::new();
        let mut slot = CellSlot::new();
        assert!(slot.take_stale(1).is_some_and(|s| s.is_empty()));
        assert_eq!(slot.push(arena.insert(10)), 0);
        assert!(slot.take_stale(1).is_none());
        assert_eq!(slot.push(arena.insert(11)), 1);
        assert_eq!(slot.len(), 2);
    }

    #[test]
    fn new_generation_swaps_out_previous() {
        let mut arena = ObjectArena::new();
        let mut slot = CellSlot::new();
        slot.take_stale(1);
        let a = arena.insert("a");
        let b = arena.insert("b");
        slot.push(a);
        slot.push(b);

        let stale = slot.take_stale(2).expect("generation changed");
        assert_eq!(stale.as_slice(), &[a, b]);
        assert!(slot.is_empty());
        assert_eq!(slot.generation(), 2);
    }
}
