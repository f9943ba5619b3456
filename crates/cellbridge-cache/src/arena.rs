//! Generational arena holding cached objects.
//!
//! Slots and the reverse-lookup map refer to objects by [`ObjectId`]
//! rather than by address. When an object is removed its slot is reused
//! with a bumped version, so an old id can never resolve to a newer object.

/// Stable identity of a cached object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
    index: u32,
    version: u32,
}

impl ObjectId {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn version(self) -> u32 {
        self.version
    }
}

struct ArenaSlot<T> {
    version: u32,
    value: Option<T>,
}

pub struct ObjectArena<T> {
    slots: Vec<ArenaSlot<T>>,
    free_list: Vec<u32>,
    live: usize,
}

impl<T> ObjectArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> ObjectId {
        self.live += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return ObjectId {
                index,
                version: slot.version,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(ArenaSlot {
            version: 0,
            value: Some(value),
        });
        ObjectId { index, version: 0 }
    }

    /// Returns None if the id is stale.
    pub fn get(&self, id: ObjectId) -> Option<&T> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.version != id.version {
            return None;
        }
        slot.value.as_ref()
    }

    /// Remove and return the object; the slot's version is bumped for reuse.
    pub fn remove(&mut self, id: ObjectId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.version != id.version {
            return None;
        }
        let value = slot.value.take()?;
        slot.version = slot.version.wrapping_add(1);
        self.free_list.push(id.index);
        self.live -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<T> Default for ObjectArena<T> {
    fn default() -> Self {
        Self::new()
    }
}
