//! Generational slab arena with an intrusive free list.
//!
//! Backs both the object tree and the timer wheel. Freeing a slot bumps its
//! generation, so a key taken before the free can never reach whatever value
//! reuses the slot later.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::num::NonZeroUsize;

/// Index plus generation, typed by the slab's value to prevent cross-slab misuse.
pub struct SlabKey<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

// Manual impls: derives would put bounds on T, but T only appears in a marker.
impl<T> Copy for SlabKey<T> {}

impl<T> Clone for SlabKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for SlabKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for SlabKey<T> {}

impl<T> Hash for SlabKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for SlabKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlabKey({}v{})", self.index, self.generation)
    }
}

impl<T> SlabKey<T> {
    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index inside the slab.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the slot had when this key was issued.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// Slot in the slab.
enum Entry<T> {
    Occupied { value: T, generation: u32 },
    Free { next: Option<u32>, generation: u32 },
}

/// Growable slab with an optional hard limit on live entries.
pub struct Slab<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    len: usize,
    limit: Option<NonZeroUsize>,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slab<T> {
    /// Creates an empty, unbounded slab.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            len: 0,
            limit: None,
        }
    }

    /// Creates an unbounded slab with room for `cap` entries before reallocating.
    #[must_use]
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            entries: Vec::with_capacity(cap),
            ..Self::new()
        }
    }

    /// Creates a slab that refuses inserts beyond `limit` live entries.
    #[must_use]
    pub fn bounded(limit: NonZeroUsize) -> Self {
        Self {
            entries: Vec::with_capacity(limit.get()),
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// Number of live entries.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `value`, reusing the most recently freed slot first.
    ///
    /// Returns `None` when the slab is bounded and full, or when the slot
    /// count would exceed `u32::MAX`.
    pub fn insert(&mut self, value: T) -> Option<SlabKey<T>> {
        if self.limit.is_some_and(|limit| self.len >= limit.get()) {
            return None;
        }

        let key = match self.free_head {
            Some(head) => {
                let slot = &mut self.entries[head as usize];
                let (next, generation) = match *slot {
                    Entry::Free { next, generation } => (next, generation),
                    Entry::Occupied { .. } => unreachable!("free_head must point to a free slot"),
                };
                *slot = Entry::Occupied { value, generation };
                self.free_head = next;
                SlabKey::new(head, generation)
            }
            None => {
                let index = u32::try_from(self.entries.len()).ok()?;
                self.entries.push(Entry::Occupied {
                    value,
                    generation: 0,
                });
                SlabKey::new(index, 0)
            }
        };
        self.len += 1;
        Some(key)
    }

    /// Removes the value behind `key`; `None` if the key is stale.
    pub fn remove(&mut self, key: SlabKey<T>) -> Option<T> {
        let slot = self.entries.get_mut(key.index as usize)?;
        match slot {
            Entry::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }
        let freed = core::mem::replace(
            slot,
            Entry::Free {
                next: self.free_head,
                generation: key.generation.wrapping_add(1),
            },
        );
        self.free_head = Some(key.index);
        self.len -= 1;
        match freed {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Free { .. } => None,
        }
    }

    /// Returns true while `key` refers to a live entry.
    #[must_use]
    pub fn contains(&self, key: SlabKey<T>) -> bool {
        self.get(key).is_some()
    }

    #[must_use]
    pub fn get(&self, key: SlabKey<T>) -> Option<&T> {
        match self.entries.get(key.index as usize)? {
            Entry::Occupied { value, generation } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: SlabKey<T>) -> Option<&mut T> {
        match self.entries.get_mut(key.index as usize)? {
            Entry::Occupied { value, generation } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Iterates over live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SlabKey<T>, &T)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Entry::Occupied { value, generation } => {
                    // Index fits: insert never pushes past u32::MAX slots.
                    Some((SlabKey::new(index as u32, *generation), value))
                }
                Entry::Free { .. } => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut slab = Slab::new();
        let a = slab.insert("a").unwrap();
        let b = slab.insert("b").unwrap();
        assert_eq!(slab.get(a), Some(&"a"));
        assert_eq!(slab.get(b), Some(&"b"));
        assert_eq!(slab.len(), 2);
    }

    #[test]
    fn remove_invalidates_key() {
        let mut slab = Slab::new();
        let a = slab.insert(1u32).unwrap();
        assert_eq!(slab.remove(a), Some(1));
        assert!(!slab.contains(a));
        assert_eq!(slab.remove(a), None, "double remove must be rejected");
        assert!(slab.is_empty());
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let mut slab = Slab::new();
        let old = slab.insert(1u32).unwrap();
        slab.remove(old);
        let new = slab.insert(2u32).unwrap();
        assert_eq!(old.index(), new.index(), "freed slot is reused");
        assert_ne!(old.generation(), new.generation());
        assert_eq!(slab.get(old), None);
        assert_eq!(slab.get(new), Some(&2));
    }

    #[test]
    fn bounded_slab_refuses_when_full() {
        let mut slab = Slab::bounded(NonZeroUsize::new(1).unwrap());
        let a = slab.insert(1u8).unwrap();
        assert!(slab.insert(2u8).is_none(), "should fail when slab is full");
        slab.remove(a);
        assert!(slab.insert(3u8).is_some(), "freed slot is available again");
    }

    #[test]
    fn iter_skips_free_slots() {
        let mut slab = Slab::new();
        let a = slab.insert('a').unwrap();
        let _b = slab.insert('b').unwrap();
        let _c = slab.insert('c').unwrap();
        slab.remove(a);
        let values: Vec<char> = slab.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec!['b', 'c']);
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut slab = Slab::new();
        let key = slab.insert(String::from("x")).unwrap();
        slab.get_mut(key).unwrap().push('y');
        assert_eq!(slab.get(key).map(String::as_str), Some("xy"));
    }
}
