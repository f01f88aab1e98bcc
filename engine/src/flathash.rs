//! Insertion-ordered hash map keyed on [`Atom`] ids, with whiteout
//! tombstones (spec §3.3 `Whiteout`, §9 glossary "FlatHash").
//!
//! Property lookup must be O(1) by atom id (§3.5: "every property lookup
//! works on atom IDs, not string bytes") while `Object.keys`/`for…in` must
//! still observe insertion order with deleted slots skipped (§8.1 "Property
//! order"). A `Vec<Entry<V>>` carries the order; a side `HashMap<Atom,
//! usize>` (via `ahash`, matching the teacher's hasher choice for
//! identifier-keyed maps) gives the O(1) lookup. Deleting a slot does not
//! remove it from the `Vec` — it is overwritten with [`Slot::Whiteout`] so
//! later re-insertion of the same atom can reactivate the slot in place
//! (§8.1 "Whiteout round-trip").

use ahash::RandomState;
use hashbrown::HashMap;

use crate::atom::Atom;

#[derive(Debug, Clone)]
enum Slot<V> {
    Occupied(V),
    Whiteout,
}

#[derive(Debug, Clone)]
struct Entry<V> {
    atom: Atom,
    slot: Slot<V>,
}

/// An insertion-ordered, atom-keyed map with whiteout tombstones.
#[derive(Debug)]
pub struct FlatHash<V> {
    entries: Vec<Entry<V>>,
    index: HashMap<Atom, usize, RandomState>,
}

impl<V> Default for FlatHash<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::default(),
        }
    }
}

impl<V> FlatHash<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, atom: Atom) -> Option<&V> {
        let &idx = self.index.get(&atom)?;
        match &self.entries[idx].slot {
            Slot::Occupied(v) => Some(v),
            Slot::Whiteout => None,
        }
    }

    pub fn get_mut(&mut self, atom: Atom) -> Option<&mut V> {
        let idx = *self.index.get(&atom)?;
        match &mut self.entries[idx].slot {
            Slot::Occupied(v) => Some(v),
            Slot::Whiteout => None,
        }
    }

    pub fn contains(&self, atom: Atom) -> bool {
        self.get(atom).is_some()
    }

    /// Inserts `value` at `atom`. If a live entry already exists it is
    /// overwritten in place (order preserved); if a whiteout exists for
    /// this atom it is reactivated in its existing slot (§3.6: "re-inserting
    /// the same key with a put reuses and re-activates it"); otherwise a
    /// fresh entry is appended at the tail.
    pub fn insert(&mut self, atom: Atom, value: V) -> Option<V> {
        if let Some(&idx) = self.index.get(&atom) {
            let old = std::mem::replace(&mut self.entries[idx].slot, Slot::Occupied(value));
            return match old {
                Slot::Occupied(v) => Some(v),
                Slot::Whiteout => None,
            };
        }
        let idx = self.entries.len();
        self.entries.push(Entry {
            atom,
            slot: Slot::Occupied(value),
        });
        self.index.insert(atom, idx);
        None
    }

    /// Removes the whiteout slot for `atom` (if any) and pushes a brand new
    /// entry at the tail, for the `defineProperty`-on-a-non-configurable
    /// reinsert path that must move to the tail rather than reactivate in
    /// place (spec §9 Open Questions resolution; see DESIGN.md).
    pub fn reinsert_at_tail(&mut self, atom: Atom, value: V) {
        if let Some(&idx) = self.index.get(&atom) {
            self.entries[idx].slot = Slot::Whiteout;
        }
        let idx = self.entries.len();
        self.entries.push(Entry {
            atom,
            slot: Slot::Occupied(value),
        });
        self.index.insert(atom, idx);
    }

    /// Marks the entry as a whiteout tombstone. Returns `true` if a live
    /// entry was present.
    pub fn remove(&mut self, atom: Atom) -> bool {
        let Some(&idx) = self.index.get(&atom) else {
            return false;
        };
        match std::mem::replace(&mut self.entries[idx].slot, Slot::Whiteout) {
            Slot::Occupied(_) => true,
            Slot::Whiteout => false,
        }
    }

    /// `true` if `atom` names a whiteout (a deleted-but-tombstoned slot).
    pub fn is_whiteout(&self, atom: Atom) -> bool {
        match self.index.get(&atom) {
            Some(&idx) => matches!(self.entries[idx].slot, Slot::Whiteout),
            None => false,
        }
    }

    /// Iterates live entries in insertion order, skipping whiteouts (§8.1
    /// "Property order").
    pub fn iter(&self) -> impl Iterator<Item = (Atom, &V)> {
        self.entries.iter().filter_map(|e| match &e.slot {
            Slot::Occupied(v) => Some((e.atom, v)),
            Slot::Whiteout => None,
        })
    }

    /// Number of live (non-whiteout) entries.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomTable;

    #[test]
    fn preserves_insertion_order_with_whiteouts_skipped() {
        let mut atoms = AtomTable::new();
        let a = atoms.intern("a");
        let b = atoms.intern("b");
        let c = atoms.intern("c");

        let mut map: FlatHash<i32> = FlatHash::new();
        map.insert(a, 1);
        map.insert(b, 2);
        map.insert(c, 3);
        map.remove(b);
        map.insert(b, 2);

        let keys: Vec<&str> = map.iter().map(|(atom, _)| atoms.resolve(atom)).collect();
        assert_eq!(keys, vec!["a", "c", "b"]);
    }

    #[test]
    fn whiteout_round_trip_matches_fresh_insert() {
        let mut atoms = AtomTable::new();
        let a = atoms.intern("a");
        let b = atoms.intern("b");
        let b2 = atoms.intern("b2");

        let mut with_whiteout: FlatHash<i32> = FlatHash::new();
        with_whiteout.insert(a, 1);
        with_whiteout.insert(b, 2);
        with_whiteout.remove(b);
        with_whiteout.insert(b, 9);

        let mut fresh: FlatHash<i32> = FlatHash::new();
        fresh.insert(a, 1);
        fresh.insert(b2, 9);

        let lhs: Vec<i32> = with_whiteout.iter().map(|(_, v)| *v).collect();
        let rhs: Vec<i32> = fresh.iter().map(|(_, v)| *v).collect();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn reinsert_at_tail_moves_slot() {
        let mut atoms = AtomTable::new();
        let a = atoms.intern("a");
        let b = atoms.intern("b");
        let c = atoms.intern("c");

        let mut map: FlatHash<i32> = FlatHash::new();
        map.insert(a, 1);
        map.insert(b, 2);
        map.insert(c, 3);
        map.remove(b);
        map.reinsert_at_tail(b, 20);

        let keys: Vec<&str> = map.iter().map(|(atom, _)| atoms.resolve(atom)).collect();
        assert_eq!(keys, vec!["a", "c", "b"]);
    }
}
