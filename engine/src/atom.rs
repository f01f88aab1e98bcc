//! Atom table: interns every string/symbol key ever hashed by a VM into a
//! 32-bit [`Atom`] id (spec data model §3.5).
//!
//! Two tables exist, mirroring the teacher's split between a process-wide
//! immutable intrinsics table and a per-`Agent` extension table: a
//! `static` table seeded once with every built-in member name (cheap,
//! shared, never mutated again) and a per-VM growable extension. IDs never
//! collide between the two because the static table's ids are even and the
//! per-VM table's ids are odd; callers never need to know which table an
//! [`Atom`] came from to compare two atoms for equality.

use hashbrown::HashMap;
use std::sync::OnceLock;

/// A 32-bit interned string/symbol key. Two atoms are the same key iff
/// their ids are equal — lookups never compare string bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

impl Atom {
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Names njs-style property keys ("length", "prototype", "__proto__", ...)
/// that every VM needs at startup. Interned once into the static table so
/// every freshly created `Agent` gets O(1) lookups for them without paying
/// for a table rebuild.
pub const WELL_KNOWN_ATOMS: &[&str] = &[
    "length",
    "prototype",
    "constructor",
    "__proto__",
    "name",
    "message",
    "stack",
    "value",
    "writable",
    "enumerable",
    "configurable",
    "get",
    "set",
    "next",
    "done",
    "toString",
    "valueOf",
    "hasOwnProperty",
];

struct StaticTable {
    by_str: HashMap<Box<str>, Atom>,
    by_id: Vec<Box<str>>,
}

fn static_table() -> &'static StaticTable {
    static TABLE: OnceLock<StaticTable> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut by_str = HashMap::new();
        let mut by_id = Vec::new();
        for name in WELL_KNOWN_ATOMS {
            let id = (by_id.len() as u32) << 1; // even ids
            by_id.push((*name).into());
            by_str.insert((*name).into(), Atom(id));
        }
        StaticTable { by_str, by_id }
    })
}

/// Per-`Agent` atom extension table. Lookups fall through the static table
/// first; anything not found there gets assigned the next odd id.
#[derive(Debug, Default)]
pub struct AtomTable {
    by_str: HashMap<Box<str>, Atom>,
    by_id: Vec<Box<str>>,
}

impl AtomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `s`, returning its atom id. Two calls with equal `s` within
    /// the same `Agent` (and across any VM, for well-known names) return
    /// the same [`Atom`] (§8.1 atom-identity invariant).
    pub fn intern(&mut self, s: &str) -> Atom {
        if let Some(atom) = static_table().by_str.get(s) {
            return *atom;
        }
        if let Some(atom) = self.by_str.get(s) {
            return *atom;
        }
        let id = ((self.by_id.len() as u32) << 1) | 1; // odd ids
        self.by_id.push(s.into());
        let atom = Atom(id);
        self.by_str.insert(s.into(), atom);
        atom
    }

    pub fn resolve(&self, atom: Atom) -> &str {
        if atom.0 & 1 == 0 {
            &static_table().by_id[(atom.0 >> 1) as usize]
        } else {
            &self.by_id[(atom.0 >> 1) as usize]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_same_atom() {
        let mut table = AtomTable::new();
        let a = table.intern("frobnicate");
        let b = table.intern("frobnicate");
        assert_eq!(a, b);
    }

    #[test]
    fn well_known_atoms_are_shared_across_tables() {
        let t1 = AtomTable::new();
        let t2 = AtomTable::new();
        let mut t1 = t1;
        let mut t2 = t2;
        assert_eq!(t1.intern("length"), t2.intern("length"));
    }

    #[test]
    fn resolves_back_to_the_same_bytes() {
        let mut table = AtomTable::new();
        let atom = table.intern("custom_key");
        assert_eq!(table.resolve(atom), "custom_key");
    }
}
