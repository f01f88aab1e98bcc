//! Scope layout (spec §3.4, §4.2.3): the packed `(offset, scope_kind)`
//! index, and the parser-time `ParserScope` tree used to resolve variable
//! references to one of the nine scope arrays.
//!
//! §9 "Design notes" explicitly offers implementers a choice between the
//! packed integer and "explicit struct fields paying a small dispatch
//! overhead"; §3.7 resolves this for the engine in favor of the packed
//! form, since it is what spec §3.4's own arithmetic (`scopes[idx & MASK] +
//! (idx >> 4)`) is testable against.

use hashbrown::HashMap;

use crate::atom::Atom;

/// The nine scope kinds (spec §3.4), packed into the low 4 bits of an
/// [`Index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScopeKind {
    Absolute = 0,
    Local = 1,
    Global = 2,
    CalleeArgs = 3,
    Args = 4,
    Closure = 5,
    ParentLocal = 6,
    ParentArgs = 7,
    ParentClosure = 8,
}

impl ScopeKind {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => ScopeKind::Absolute,
            1 => ScopeKind::Local,
            2 => ScopeKind::Global,
            3 => ScopeKind::CalleeArgs,
            4 => ScopeKind::Args,
            5 => ScopeKind::Closure,
            6 => ScopeKind::ParentLocal,
            7 => ScopeKind::ParentArgs,
            _ => ScopeKind::ParentClosure,
        }
    }
}

/// A packed `(offset, scope_kind)` reference into one of the nine scope
/// arrays (spec §3.4). Reading operand `idx` is `*(scopes[idx & MASK] +
/// (idx >> 4))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Index(u32);

const KIND_MASK: u32 = 0xF;

impl Index {
    pub fn new(offset: u32, kind: ScopeKind) -> Self {
        debug_assert!(offset < (1 << 28));
        Index((offset << 4) | kind as u32)
    }

    pub fn offset(self) -> u32 {
        self.0 >> 4
    }

    pub fn kind(self) -> ScopeKind {
        ScopeKind::from_u8((self.0 & KIND_MASK) as u8)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// A declared variable's resolution (spec §4.2.3 `VariableNode`).
#[derive(Debug, Clone, Copy)]
pub struct VariableBinding {
    pub index: Index,
    pub is_const: bool,
    /// Set once any nested function body is found to read this variable;
    /// drives closure promotion at code-generation time (spec §3.6, §4.6).
    pub captured: bool,
}

/// What a `ParserScope` denotes (function body, block, top-level).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFlavor {
    Global,
    Function,
    Block,
}

/// A lexical scope the parser pushes at a function body, a `for`-with-
/// binding, and any `let`/`const`-introducing block (spec §4.2.3).
#[derive(Debug)]
pub struct ParserScope {
    pub parent: Option<usize>,
    pub flavor: ScopeFlavor,
    pub variables: HashMap<Atom, VariableBinding>,
    /// Number of non-closure value slots this scope needs; the code
    /// generator allocates one value slot per entry.
    pub items: u32,
}

impl ParserScope {
    fn new(parent: Option<usize>, flavor: ScopeFlavor) -> Self {
        Self {
            parent,
            flavor,
            variables: HashMap::new(),
            items: 0,
        }
    }
}

/// The parser's scope arena: a `Vec<ParserScope>` addressed by index rather
/// than a separately heap-allocated tree, so scope lookups during codegen
/// don't need their own lifetime management.
#[derive(Debug)]
pub struct ScopeTree {
    scopes: Vec<ParserScope>,
    current: usize,
}

impl ScopeTree {
    pub fn new() -> Self {
        Self {
            scopes: vec![ParserScope::new(None, ScopeFlavor::Global)],
            current: 0,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn push(&mut self, flavor: ScopeFlavor) -> usize {
        let idx = self.scopes.len();
        self.scopes.push(ParserScope::new(Some(self.current), flavor));
        self.current = idx;
        idx
    }

    pub fn pop(&mut self) {
        if let Some(parent) = self.scopes[self.current].parent {
            self.current = parent;
        }
    }

    pub fn get(&self, idx: usize) -> &ParserScope {
        &self.scopes[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut ParserScope {
        &mut self.scopes[idx]
    }

    /// Declares `name` as a new local, allocating the next local slot from
    /// the *owning function's* counter rather than the current block's —
    /// block scopes (`let`/`const` in a nested `{}`, a `for`-binding) share
    /// their enclosing function's single flat frame-local array (spec
    /// §3.4's "local holds the current frame's locals"), so each block
    /// scope only contributes a name-to-slot mapping, never its own counter.
    /// Returns the binding's `Index` (always `Local`/`Global` scope_kind at
    /// declaration time; `codegen.rs` retargets reads that cross a function
    /// boundary to `Closure` once it finds the variable captured).
    pub fn declare(&mut self, name: Atom, is_const: bool) -> Index {
        let current = self.current;
        let func_scope = self.function_scope_of(current);
        let offset = self.scopes[func_scope].items;
        self.scopes[func_scope].items += 1;
        let kind = if self.scopes[func_scope].flavor == ScopeFlavor::Global {
            ScopeKind::Global
        } else {
            ScopeKind::Local
        };
        let index = Index::new(offset, kind);
        self.scopes[current].variables.insert(name, VariableBinding { index, is_const, captured: false });
        index
    }

    /// Walks outward from `idx` to the nearest `Function`/`Global` scope —
    /// the scope whose local-slot counter a nested block scope borrows.
    pub fn function_scope_of(&self, mut idx: usize) -> usize {
        loop {
            let scope = &self.scopes[idx];
            if scope.flavor != ScopeFlavor::Block {
                return idx;
            }
            match scope.parent {
                Some(parent) => idx = parent,
                None => return idx,
            }
        }
    }

    /// Resolves `name`, walking outward from `from`. Returns the owning
    /// scope index and binding.
    pub fn resolve(&self, from: usize, name: Atom) -> Option<(usize, VariableBinding)> {
        let mut current = Some(from);
        while let Some(idx) = current {
            let scope = &self.scopes[idx];
            if let Some(binding) = scope.variables.get(&name) {
                return Some((idx, *binding));
            }
            current = scope.parent;
        }
        None
    }

    pub fn mark_captured(&mut self, scope_idx: usize, name: Atom) {
        if let Some(binding) = self.scopes[scope_idx].variables.get_mut(&name) {
            binding.captured = true;
        }
    }

    /// Allocates a slot from `func_scope`'s counter without naming it —
    /// used by the code generator for scratch values an expression needs
    /// mid-evaluation (spec §4.3's records write every intermediate result
    /// to a real slot; there is no implicit expression stack).
    pub fn alloc_slot(&mut self, func_scope: usize) -> Index {
        let offset = self.scopes[func_scope].items;
        self.scopes[func_scope].items += 1;
        let kind = if self.scopes[func_scope].flavor == ScopeFlavor::Global {
            ScopeKind::Global
        } else {
            ScopeKind::Local
        };
        Index::new(offset, kind)
    }

    /// Declares `name` directly in `scope_idx`, bypassing `current` — used
    /// for implicit global bindings created by an undeclared assignment
    /// (spec §4.2.3 allows this the way top-level `var` does).
    pub fn declare_at(&mut self, scope_idx: usize, name: Atom, is_const: bool) -> Index {
        let offset = self.scopes[scope_idx].items;
        self.scopes[scope_idx].items += 1;
        let kind = if self.scopes[scope_idx].flavor == ScopeFlavor::Global {
            ScopeKind::Global
        } else {
            ScopeKind::Local
        };
        let index = Index::new(offset, kind);
        self.scopes[scope_idx].variables.insert(name, VariableBinding { index, is_const, captured: false });
        index
    }

    /// Binds a parameter name to the function's `Args` array (spec §3.4):
    /// offset 0 is reserved for `this`, so declared parameters start at 1.
    /// Unlike `declare`, this never touches the `items`/local-slot counter —
    /// `Args` is sized by `nargs + 1`, not by the function's local count.
    pub fn declare_param(&mut self, name: Atom, offset: u32) -> Index {
        let current = self.current;
        let index = Index::new(offset, ScopeKind::Args);
        self.scopes[current].variables.insert(name, VariableBinding { index, is_const: false, captured: false });
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips_offset_and_kind() {
        let idx = Index::new(12, ScopeKind::Closure);
        assert_eq!(idx.offset(), 12);
        assert!(matches!(idx.kind(), ScopeKind::Closure));
    }

    #[test]
    fn resolve_walks_outward() {
        let mut atoms = crate::atom::AtomTable::new();
        let x = atoms.intern("x");
        let mut tree = ScopeTree::new();
        tree.declare(x, false);
        let fn_scope = tree.push(ScopeFlavor::Function);
        let resolved = tree.resolve(fn_scope, x);
        assert!(resolved.is_some());
        assert_eq!(resolved.unwrap().0, 0);
    }
}
