//! Memory arena: the bump/slab allocator all per-VM heap data is drawn from
//! (spec §2, §3.6). Every heap-backed value variant carries an
//! [`ArenaId<T>`] — an index into a [`Slab<T>`] — rather than a raw
//! pointer. Destroying the arena frees everything in one step; there is no
//! moving/compacting GC (Non-goal, §1) and no per-object destructor walk.
//!
//! This is the single biggest structural departure from the teacher
//! (`trynova-nova`), which backs its heap with a generational, compacting
//! mark-and-sweep collector (`HeapMarkAndSweep`, `Bindable`, `Scoped`
//! rooting). The teacher's *shape* — typed slabs indexed by newtype ids,
//! one slab per heap entity kind — is kept; the rooting and compaction
//! machinery is dropped because spec §1 explicitly scopes "precise GC" out
//! in favor of arena allocation with bulk free. See DESIGN.md.

use std::marker::PhantomData;

/// A typed index into a [`Slab<T>`]. Never invalidated by insertion;
/// never reused after removal (the CORE never removes heap entities
/// individually — only the whole arena is ever freed).
pub struct ArenaId<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ArenaId<T> {
    fn new(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    /// Reconstructs an id from a raw index, e.g. one that was packed into a
    /// `Value::Number` and needs unpacking (spec §4.3 `PropForeach`'s
    /// enumeration handle). Callers are responsible for only ever doing
    /// this with an index that really did come from this same slab.
    pub fn from_raw(index: u32) -> Self {
        Self::new(index)
    }
}

impl<T> Clone for ArenaId<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ArenaId<T> {}
impl<T> PartialEq for ArenaId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}
impl<T> Eq for ArenaId<T> {}
impl<T> std::hash::Hash for ArenaId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}
impl<T> std::fmt::Debug for ArenaId<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArenaId({})", self.index)
    }
}

/// A grow-only slab of `T`, one per heap entity kind (`HeapString`,
/// `HeapObject`, `HeapFunction`, ...). Backed by a plain `Vec`: pushing
/// never moves existing elements to a new logical slot (`Vec` may
/// reallocate its backing buffer, but `ArenaId`s are indices, not
/// pointers, so reallocation never invalidates them).
#[derive(Debug)]
pub struct Slab<T> {
    items: Vec<T>,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Slab<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, value: T) -> ArenaId<T> {
        let id = ArenaId::new(self.items.len() as u32);
        self.items.push(value);
        id
    }

    pub fn get(&self, id: ArenaId<T>) -> &T {
        &self.items[id.index as usize]
    }

    pub fn get_mut(&mut self, id: ArenaId<T>) -> &mut T {
        &mut self.items[id.index as usize]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Raw byte storage for `ArrayBuffer`/`TypedArray` backing stores (spec
/// §3.2's "array value" `{size, length, *[Value], *data}` block). A bump
/// allocator over growable chunks: `alloc` never reclaims bytes from a
/// single allocation (`free` is a no-op bookkeeping marker — the spec's
/// external arena contract only requires that `destroy` reclaim
/// everything in bulk, which dropping `RawArena` does for free).
#[derive(Debug, Default)]
pub struct RawArena {
    chunks: Vec<Vec<u8>>,
}

/// A handle to a byte range allocated from a [`RawArena`]. The bytes
/// themselves are reached through [`RawArena::get`]/[`RawArena::get_mut`];
/// holding a `RawBytesId` keeps no lifetime tied to the arena so it can sit
/// inside an arena-indexed heap entity without self-reference headaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBytesId {
    chunk: u32,
}

impl RawArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `len` zeroed bytes, `align`ed to at least `align` bytes
    /// (the spec's `alloc`/`align` contract); returns a stable handle.
    pub fn alloc(&mut self, len: usize, align: usize) -> RawBytesId {
        debug_assert!(align.is_power_of_two());
        let chunk = vec![0u8; len];
        let id = self.chunks.len() as u32;
        self.chunks.push(chunk);
        RawBytesId { chunk: id }
    }

    pub fn get(&self, id: RawBytesId) -> &[u8] {
        &self.chunks[id.chunk as usize]
    }

    pub fn get_mut(&mut self, id: RawBytesId) -> &mut [u8] {
        &mut self.chunks[id.chunk as usize]
    }

    /// No-op: individual allocations are never reclaimed early; see
    /// module docs. Kept as an explicit call site so the spec's
    /// `alloc/align/free/destroy` contract has a 1:1 method for `free`.
    pub fn free(&mut self, _id: RawBytesId) {}

    /// Frees every allocation in bulk. Equivalent to dropping the arena
    /// and creating a new one; exposed explicitly so a VM reset can reuse
    /// the outer `Vec` capacity.
    pub fn destroy(&mut self) {
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_remain_valid_across_growth() {
        let mut slab: Slab<u32> = Slab::new();
        let first = slab.alloc(10);
        for i in 0..1000 {
            slab.alloc(i);
        }
        assert_eq!(*slab.get(first), 10);
    }

    #[test]
    fn raw_arena_destroy_frees_everything() {
        let mut arena = RawArena::new();
        let id = arena.alloc(16, 8);
        arena.get_mut(id)[0] = 42;
        arena.destroy();
        assert_eq!(arena.chunks.len(), 0);
    }
}
