//! Index-based storage for instructions and blocks.
//!
//! Every IR entity lives in an [`Arena`] owned by the graph and is referred
//! to through a typed [`Id`]. Removal never frees a slot: removed entities are
//! flagged by their owner, so ids stay stable across passes and can be used
//! as keys in [`SecondaryMap`] side tables and [`BitSet`]s.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed ID
// =============================================================================

/// A typed index into an [`Arena`].
///
/// `T` only tags the id, so the marker uses `fn() -> T` and the common traits
/// are implemented by hand to avoid requiring them on `T`.
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Id<T> {
    /// Sentinel for "no entity".
    pub const INVALID: Self = Id {
        index: u32::MAX,
        _marker: PhantomData,
    };

    #[inline]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "#{}", self.index)
        } else {
            f.write_str("#INVALID")
        }
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Append-only storage addressed by [`Id`].
#[derive(Debug, Clone)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    #[inline]
    pub fn new() -> Self {
        Arena { items: Vec::new() }
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Store an item and hand back its id.
    #[inline]
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let index = self.items.len() as u32;
        self.items.push(item);
        Id::new(index)
    }

    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.items.get(id.as_usize())
    }

    #[inline]
    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        self.items.get_mut(id.as_usize())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (Id::new(i as u32), item))
    }

    pub fn ids(&self) -> impl Iterator<Item = Id<T>> {
        (0..self.items.len() as u32).map(Id::new)
    }

    /// The id the next [`Arena::alloc`] will return.
    #[inline]
    pub fn next_id(&self) -> Id<T> {
        Id::new(self.items.len() as u32)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &Self::Output {
        &self.items[id.as_usize()]
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        &mut self.items[id.as_usize()]
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Dense side table keyed by the ids of another arena.
///
/// Reads of ids past the end yield `None`; writes grow the table and fill the
/// gap with `V::default()`.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    _marker: PhantomData<fn() -> K>,
}

impl<K, V: Default + Clone> SecondaryMap<K, V> {
    pub fn new() -> Self {
        SecondaryMap {
            values: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        SecondaryMap {
            values: vec![V::default(); capacity],
            _marker: PhantomData,
        }
    }

    pub fn resize(&mut self, len: usize) {
        if len > self.values.len() {
            self.values.resize(len, V::default());
        }
    }

    #[inline]
    pub fn get(&self, id: Id<K>) -> Option<&V> {
        self.values.get(id.as_usize())
    }

    /// Mutable access, growing the table when `id` is past the end.
    pub fn entry(&mut self, id: Id<K>) -> &mut V {
        self.resize(id.as_usize() + 1);
        &mut self.values[id.as_usize()]
    }

    pub fn set(&mut self, id: Id<K>, value: V) {
        *self.entry(id) = value;
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl<K, V: Default + Clone> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: Default + Clone> Index<Id<K>> for SecondaryMap<K, V> {
    type Output = V;

    fn index(&self, id: Id<K>) -> &Self::Output {
        &self.values[id.as_usize()]
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// Growable bit set over arena indices (loop bodies, visited marks).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        BitSet { words: Vec::new() }
    }

    pub fn with_capacity(bits: usize) -> Self {
        BitSet {
            words: vec![0; bits.div_ceil(64)],
        }
    }

    /// Set a bit, returning `true` if it was previously clear.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << (index % 64);
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    #[inline]
    pub fn remove(&mut self, index: usize) {
        if let Some(word) = self.words.get_mut(index / 64) {
            *word &= !(1u64 << (index % 64));
        }
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }

    pub fn union_with(&mut self, other: &BitSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= *src;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate set indices in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_idx, &word)| {
                (0..64)
                    .filter(move |bit| word & (1u64 << bit) != 0)
                    .map(move |bit| word_idx * 64 + bit)
            })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Slot(i32);

    #[test]
    fn test_arena_ids_are_dense() {
        let mut arena: Arena<Slot> = Arena::new();
        let a = arena.alloc(Slot(10));
        let b = arena.alloc(Slot(20));

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena.next_id().index(), 2);
        arena[b].0 = 200;
        assert_eq!(arena[b].0, 200);
        assert_eq!(arena.iter().map(|(_, s)| s.0).collect::<Vec<_>>(), vec![10, 200]);
    }

    #[test]
    fn test_secondary_map_grows_on_write() {
        let mut map: SecondaryMap<Slot, u32> = SecondaryMap::new();
        assert!(map.get(Id::new(7)).is_none());
        map.set(Id::new(7), 3);
        *map.entry(Id::new(2)) += 5;
        assert_eq!(map[Id::new(7)], 3);
        assert_eq!(map[Id::new(2)], 5);
        assert_eq!(map[Id::new(0)], 0);
    }

    #[test]
    fn test_bit_set_insert_reports_fresh() {
        let mut set = BitSet::new();
        assert!(set.insert(64));
        assert!(!set.insert(64));
        assert!(set.insert(3));
        assert!(set.contains(3));
        assert!(!set.contains(4));
        assert!(!set.contains(1000));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 64]);
        set.remove(3);
        assert_eq!(set.count(), 1);
    }

    #[test]
    fn test_bit_set_union() {
        let mut a = BitSet::with_capacity(8);
        a.insert(1);
        let mut b = BitSet::new();
        b.insert(130);
        a.union_with(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 130]);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_invalid_id() {
        let id: Id<Slot> = Id::default();
        assert!(!id.is_valid());
        assert!(Id::<Slot>::new(0).is_valid());
    }
}
