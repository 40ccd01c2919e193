//! Insertion-ordered map whose removals leave tombstones.
//!
//! Region states are mutated while they are being walked: a completed
//! retain/release match erases its pointer's entry in the middle of a pass.
//! [`BlotMapVector`] keeps every key at a fixed slot so erasing ("blotting")
//! never shifts the entries after it. A blotted slot reads as absent; a later
//! insert of the same key fills the same slot again instead of growing the
//! vector.

use std::fmt;
use std::hash::Hash;

use rustc_hash::FxHashMap;

/// Map from `K` to `V` with stable slots and tombstoned removal.
#[derive(Clone)]
pub struct BlotMapVector<K, V> {
    /// Key → slot position. Blotted keys keep their entry.
    index: FxHashMap<K, usize>,
    /// Slots in first-insertion order. `None` is a tombstone.
    slots: Vec<Option<(K, V)>>,
    /// Number of occupied slots.
    live: usize,
}

impl<K, V> Default for BlotMapVector<K, V> {
    fn default() -> Self {
        Self {
            index: FxHashMap::default(),
            slots: Vec::new(),
            live: 0,
        }
    }
}

impl<K: Copy + Eq + Hash, V> BlotMapVector<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            index: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            slots: Vec::with_capacity(capacity),
            live: 0,
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots, tombstones included.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Allocated slot capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let &slot = self.index.get(key)?;
        self.slots[slot].as_ref().map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let &slot = self.index.get(key)?;
        self.slots[slot].as_mut().map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite `key`, returning the previous live value.
    ///
    /// A key that was blotted earlier is revived in its old slot.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&slot) = self.index.get(&key) {
            let previous = self.slots[slot].replace((key, value));
            if previous.is_none() {
                self.live += 1;
            }
            return previous.map(|(_, v)| v);
        }
        self.index.insert(key, self.slots.len());
        self.slots.push(Some((key, value)));
        self.live += 1;
        None
    }

    /// Get the value for `key`, inserting `make()` first if it is absent.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        let slot = match self.index.get(&key) {
            Some(&slot) => {
                if self.slots[slot].is_none() {
                    self.slots[slot] = Some((key, make()));
                    self.live += 1;
                }
                slot
            }
            None => {
                let slot = self.slots.len();
                self.index.insert(key, slot);
                self.slots.push(Some((key, make())));
                self.live += 1;
                slot
            }
        };
        match &mut self.slots[slot] {
            Some((_, v)) => v,
            None => unreachable!("slot {slot} was filled above"),
        }
    }

    /// Tombstone `key`'s slot, returning the value it held.
    pub fn blot(&mut self, key: &K) -> Option<V> {
        let &slot = self.index.get(key)?;
        let (_, value) = self.slots[slot].take()?;
        self.live -= 1;
        Some(value)
    }

    /// Live entries in first-insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots.iter().flatten().map(|(k, v)| (k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.slots.iter_mut().flatten().map(|(k, v)| (&*k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    /// Drop every entry, keeping the allocations.
    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.live = 0;
    }

    /// Drop tombstones and renumber the remaining slots.
    pub fn compact(&mut self) {
        if self.live == self.slots.len() {
            return;
        }
        self.slots.retain(Option::is_some);
        self.index.clear();
        for (slot, entry) in self.slots.iter().enumerate() {
            if let Some((key, _)) = entry {
                self.index.insert(*key, slot);
            }
        }
    }
}

/// Two maps are equal when their live entries match in order.
impl<K: Copy + Eq + Hash, V: PartialEq> PartialEq for BlotMapVector<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.live == other.live && self.iter().eq(other.iter())
    }
}

impl<K: Copy + Eq + Hash, V: Eq> Eq for BlotMapVector<K, V> {}

impl<K: Copy + Eq + Hash + fmt::Debug, V: fmt::Debug> fmt::Debug for BlotMapVector<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Copy + Eq + Hash, V> FromIterator<(K, V)> for BlotMapVector<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}
