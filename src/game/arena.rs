//! Slot storage for entities
//!
//! A [`SlotArena`] keeps entities in a growable slot vector with a stack of
//! free indices and a key → slot map. Removed entities go back to an
//! [`ObjectPool`] so their heap buffers (names, ids) are reused by the next
//! insert instead of being dropped.

use std::collections::HashMap;
use std::hash::Hash;

/// Returns an object to its canonical inactive state before pooling
pub trait Resettable {
    fn reset(&mut self);
}

/// Free list of reusable objects
#[derive(Debug)]
pub struct ObjectPool<T> {
    free: Vec<T>,
    created: usize,
}

impl<T: Resettable + Default> ObjectPool<T> {
    pub fn new() -> Self {
        Self {
            free: Vec::new(),
            created: 0,
        }
    }

    /// Pre-build `count` objects
    pub fn with_capacity(count: usize) -> Self {
        let mut pool = Self::new();
        for _ in 0..count {
            pool.free.push(T::default());
            pool.created += 1;
        }
        pool
    }

    pub fn acquire(&mut self) -> T {
        match self.free.pop() {
            Some(item) => item,
            None => {
                self.created += 1;
                T::default()
            }
        }
    }

    pub fn release(&mut self, mut item: T) {
        item.reset();
        self.free.push(item);
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Objects ever constructed by this pool
    pub fn created(&self) -> usize {
        self.created
    }
}

impl<T: Resettable + Default> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct Slot<K, T> {
    key: K,
    value: T,
}

/// Fixed-slot entity storage addressed by key externally and by slot index
/// internally.
#[derive(Debug)]
pub struct SlotArena<K, T> {
    slots: Vec<Option<Slot<K, T>>>,
    free_slots: Vec<usize>,
    index: HashMap<K, usize>,
    pool: ObjectPool<T>,
}

impl<K, T> SlotArena<K, T>
where
    K: Eq + Hash + Clone,
    T: Resettable + Default,
{
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            index: HashMap::new(),
            pool: ObjectPool::new(),
        }
    }

    /// Arena whose pool already holds `count` objects
    pub fn with_capacity(count: usize) -> Self {
        Self {
            pool: ObjectPool::with_capacity(count),
            ..Self::new()
        }
    }

    /// Install a pooled object under `key`. Returns the slot, or `None` when
    /// the key is already mapped.
    pub fn insert(&mut self, key: K) -> Option<usize> {
        if self.index.contains_key(&key) {
            return None;
        }
        let value = self.pool.acquire();
        let entry = Slot {
            key: key.clone(),
            value,
        };
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        Some(slot)
    }

    /// Free the slot mapped to `key`
    pub fn remove(&mut self, key: &K) -> Option<usize> {
        let slot = self.index.get(key).copied()?;
        self.release_slot(slot);
        Some(slot)
    }

    /// Free a slot by index, returning the key that was mapped to it
    pub fn release_slot(&mut self, slot: usize) -> Option<K> {
        let entry = self.slots.get_mut(slot)?.take()?;
        self.index.remove(&entry.key);
        self.free_slots.push(slot);
        self.pool.release(entry.value);
        Some(entry.key)
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        self.slots.get(slot)?.as_ref().map(|s| &s.value)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        self.slots.get_mut(slot)?.as_mut().map(|s| &mut s.value)
    }

    pub fn slot_of(&self, key: &K) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn get_by_key(&self, key: &K) -> Option<&T> {
        self.get(self.slot_of(key)?)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Active entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &K, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|e| (slot, &e.key, &e.value)))
    }

    /// Number of active entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Slot vector length (active + free)
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn pool(&self) -> &ObjectPool<T> {
        &self.pool
    }

    /// Release every active slot
    pub fn clear(&mut self) {
        for slot in 0..self.slots.len() {
            self.release_slot(slot);
        }
    }
}

impl<K, T> Default for SlotArena<K, T>
where
    K: Eq + Hash + Clone,
    T: Resettable + Default,
{
    fn default() -> Self {
        Self::new()
    }
}
