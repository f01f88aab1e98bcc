//! Realm: the set of intrinsic prototypes and the global object a fresh
//! `Agent` starts with (spec §4.8 "Minimal builtin surface", §5
//! "SharedState cloning with copy-on-write").
//!
//! The teacher keeps one `SharedState` shared (via `Rc`/clone-on-write)
//! across every `Agent` spawned from the same origin, so built-in
//! prototypes are allocated once and only privately copied on write
//! (§3.6). This engine's single-`Agent`-per-`Vm` embedding shape (§6.5)
//! doesn't need cross-agent sharing, but keeps the same CoW *mechanism* at
//! the object level — `ObjectData::shared_hash` — so a later multi-agent
//! host could adopt real `SharedState` reuse without touching
//! `object.rs`'s property protocol.

use crate::agent::Heap;
use crate::atom::AtomTable;
use crate::error::ErrorKind;
use crate::object::ObjectId;
use hashbrown::HashMap;

pub struct Realm {
    pub object_proto: ObjectId,
    pub function_proto: ObjectId,
    pub array_proto: ObjectId,
    pub string_proto: ObjectId,
    pub number_proto: ObjectId,
    pub boolean_proto: ObjectId,
    pub promise_proto: ObjectId,
    pub typed_array_proto: ObjectId,
    pub error_protos: HashMap<ErrorKindKey, ObjectId>,
    pub global_object: ObjectId,
}

/// `ErrorKind` isn't `Hash`/`Eq` (it's a plain classification enum in
/// `error.rs`); this newtype gives the realm's prototype table a key
/// without adding derives to `error.rs` that only this table needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorKindKey(u8);

impl From<ErrorKind> for ErrorKindKey {
    fn from(k: ErrorKind) -> Self {
        ErrorKindKey(k as u8)
    }
}

impl Realm {
    pub fn error_proto(&self, kind: ErrorKind) -> ObjectId {
        self.error_protos[&ErrorKindKey::from(kind)]
    }

    /// Builds every intrinsic prototype + the global object and installs
    /// the minimal builtin surface (spec §4.8) onto them. Runs once per
    /// `Agent::new`.
    pub fn bootstrap(heap: &mut Heap, atoms: &mut AtomTable) -> Self {
        use crate::object::ObjectData;

        let object_proto = heap.objects.alloc(ObjectData::ordinary(None));
        let function_proto = heap.objects.alloc(ObjectData::ordinary(Some(object_proto)));
        let array_proto = heap.objects.alloc(ObjectData::ordinary(Some(object_proto)));
        let string_proto = heap.objects.alloc(ObjectData::ordinary(Some(object_proto)));
        let number_proto = heap.objects.alloc(ObjectData::ordinary(Some(object_proto)));
        let boolean_proto = heap.objects.alloc(ObjectData::ordinary(Some(object_proto)));
        let promise_proto = heap.objects.alloc(ObjectData::ordinary(Some(object_proto)));
        let typed_array_proto = heap.objects.alloc(ObjectData::ordinary(Some(object_proto)));
        let global_object = heap.objects.alloc(ObjectData::ordinary(Some(object_proto)));

        let mut error_protos = HashMap::new();
        for &kind in &[
            ErrorKind::Syntax,
            ErrorKind::Reference,
            ErrorKind::Type,
            ErrorKind::Range,
            ErrorKind::Uri,
            ErrorKind::Eval,
            ErrorKind::Internal,
            ErrorKind::Memory,
        ] {
            let proto = heap.objects.alloc(ObjectData::ordinary(Some(object_proto)));
            error_protos.insert(ErrorKindKey::from(kind), proto);
        }

        let mut realm = Realm {
            object_proto,
            function_proto,
            array_proto,
            string_proto,
            number_proto,
            boolean_proto,
            promise_proto,
            typed_array_proto,
            error_protos,
            global_object,
        };

        crate::builtin::object::install(heap, atoms, &realm);
        crate::builtin::array::install(heap, atoms, &realm);
        crate::builtin::function::install(heap, atoms, &realm);
        crate::builtin::error::install(heap, atoms, &mut realm);
        crate::builtin::json::install(heap, atoms, &realm);
        crate::builtin::typed_array::install(heap, atoms, &realm);
        crate::builtin::promise::install(heap, atoms, &realm);
        crate::builtin::number::install(heap, atoms, &realm);
        crate::builtin::boolean::install(heap, atoms, &realm);
        crate::builtin::string::install(heap, atoms, &realm);
        realm
    }

    /// Allocates a fresh native function object bound to `proto` and
    /// inserts it as a named property of `owner` (used by every
    /// `builtin::*::install`). Returns the new function's own `ObjectId`
    /// (e.g. so a constructor's static methods can be attached to it in a
    /// follow-up call).
    pub fn install_native(
        heap: &mut Heap,
        atoms: &mut AtomTable,
        function_proto: ObjectId,
        owner: ObjectId,
        name: &str,
        f: crate::function::NativeFn,
    ) -> ObjectId {
        use crate::property::StoredProperty;

        let object_id = heap.objects.alloc(crate::object::ObjectData::ordinary(Some(function_proto)));
        let function_id = heap.functions.alloc(crate::function::FunctionData::native(object_id, f));
        let atom = atoms.intern(name);
        heap.objects
            .get_mut(owner)
            .hash
            .insert(atom, StoredProperty::data(crate::value::Value::Function(function_id), true, false, true));
        object_id
    }
}
