//! The `Agent`: one execution agent's heap, atom table and realm state
//! (spec §4.5's `VmState` plus the object/string/array/function slabs
//! every other module is written against).
//!
//! The teacher threads a `&mut Agent` (paired with a `GcScope` for
//! rooting) through almost every operation that can allocate or run user
//! code; this engine keeps exactly that calling convention — nearly every
//! function in `object.rs`/`function.rs`/`vm.rs` takes `agent: &mut Agent`
//! as its first argument — but drops the `GcScope` half since there is no
//! moving collector to root against (§3.7).

use hashbrown::HashMap;

use crate::array::{ArrayData, ArrayId};
use crate::atom::{Atom, AtomTable};
use crate::builtin::promise::{PromiseData, PromiseId};
use crate::builtin::typed_array::{ArrayBufferData, ArrayBufferId, DataViewData, DataViewId, TypedArrayData, TypedArrayId};
use crate::error::ErrorKind;
use crate::function::{ClosureCellId, FunctionData, FunctionId};
use crate::object::{ObjectData, ObjectId};
use crate::realm::Realm;
use crate::string::HeapStringData;
use crate::value::{ExternalData, ExternalId, StringValue, SymbolData, SymbolId, Value};

/// Every per-entity-kind slab (spec §3.6/§3.7): one `Slab<T>` or auxiliary
/// map per heap entity kind, exactly the shape `object.rs`'s forward
/// references assume.
#[derive(Default)]
pub struct Heap {
    pub objects: crate::arena::Slab<ObjectData>,
    pub arrays: crate::arena::Slab<ArrayData>,
    pub functions: crate::arena::Slab<FunctionData>,
    pub strings: crate::arena::Slab<HeapStringData>,
    pub symbols: crate::arena::Slab<SymbolData>,
    pub externals: crate::arena::Slab<ExternalData>,
    pub promises: crate::arena::Slab<PromiseData>,
    pub array_buffers: crate::arena::Slab<ArrayBufferData>,
    pub data_views: crate::arena::Slab<DataViewData>,
    pub typed_arrays: crate::arena::Slab<TypedArrayData>,
    /// Links a fast-array object's `ObjectId` to its backing `ArrayId`
    /// until `demote_fast_array` severs it (spec §4.4).
    pub object_fast_array: HashMap<ObjectId, ArrayId>,
    pub object_typed_array: HashMap<ObjectId, TypedArrayId>,
    /// Reverse of the two maps above: every fast array/typed array's
    /// owning `ObjectId`, so a bare `Value::Array`/`Value::TypedArray`
    /// (which only carries the backing-store id) can still be routed
    /// through the ordinary property protocol in `object.rs` for anything
    /// beyond the indexed/`length` fast paths.
    pub array_object: HashMap<ArrayId, ObjectId>,
    pub typed_array_object: HashMap<TypedArrayId, ObjectId>,
    /// Promoted closure-variable cells (spec §3.6 "any value that still
    /// lives on the enclosing frame is promoted to an arena-allocated cell
    /// ... on capture").
    pub closure_cells: crate::arena::Slab<std::cell::Cell<Value>>,
    /// Live `for-in`/`for-of` cursors (spec §4.3 `PropForeach`/`PropNext`):
    /// a snapshot of keys or elements taken once, at enumeration start, so
    /// mutating the subject mid-loop can't desync the cursor from the
    /// property table.
    pub enumerations: crate::arena::Slab<crate::vm::EnumerationState>,
}

/// Staging area for the `function_frame`/`method_frame` → `move` (into
/// `CalleeArgs`) → `function_call` opcode sequence (spec §4.5 "CalleeArgs is
/// the outgoing argument vector of a call frame under construction"). Not
/// re-entrant across a single in-flight call build-up, which is always true
/// here since nested call expressions fully resolve into a temporary local
/// before their enclosing call's own argument-staging begins.
pub struct PendingCall {
    pub callee: Value,
    pub this: Value,
    pub args: Vec<Value>,
}

impl PendingCall {
    pub fn new() -> Self {
        Self {
            callee: Value::Undefined,
            this: Value::Undefined,
            args: Vec::new(),
        }
    }
}

/// One execution agent: heap, atom table, realm (globals/prototypes),
/// pending exception and call-frame stack (spec §4.5 `VmState`, split
/// across this struct and `frame.rs`'s `Frame`/`NativeFrame`).
pub struct Agent {
    pub heap: Heap,
    pub atoms: AtomTable,
    pub realm: Realm,
    pub exception: Option<Value>,
    pub frames: Vec<crate::frame::Frame>,
    /// Bound on `frames.len()` (spec §4.5 "Frames are allocated from a
    /// single growable spare-stack region; when it is full a call returns
    /// `RangeError`").
    pub max_frames: usize,
    pub microtasks: crate::microtask::MicrotaskQueue,
    /// The script's top-level variable slots (spec §3.4 "global holds
    /// top-level variables"), one flat array shared by every frame rather
    /// than scoped to any single call.
    pub globals: Vec<Value>,
    /// Global slots promoted to heap cells because a lambda captured them
    /// (spec §3.6), mirroring `Frame::promoted_locals` so a captured global
    /// and a later direct `Operand{Global, ..}` write never diverge.
    pub global_promoted: HashMap<u32, ClosureCellId>,
    /// `vm_bind_handler` globals (spec §6.1), keyed by the `Global`-scope
    /// offset `embedding::Vm::bind_handler` declared the name at. Consulted
    /// by `vm.rs`'s `Global` read/write arms ahead of the plain
    /// `globals`/`global_promoted` slot.
    pub global_handlers: HashMap<u32, crate::property::GlobalHandlerFn>,
    pub pending_call: PendingCall,
    /// The value `OpKind::Return` most recently wrote, handed back to
    /// `vm::call_lambda`'s caller once its frame pops (spec §4.5: a
    /// `Return` instruction ends the frame, so there is no surviving
    /// frame-local slot to read the value back out of).
    pub last_return: Option<Value>,
    /// Host-supplied diagnostics sink (`Agent::set_trace_hook`), the same
    /// "host supplies the sink" shape `embedding::Vm::set_module_loader`/
    /// `set_rejection_tracker` already use. Fired on frame push/pop and on
    /// every `throw` — the teacher instruments the VM with DTrace probes
    /// instead, which aren't portable ambient infra for a plain library
    /// crate, so this is the nearest equivalent a host-attached callback
    /// can give.
    pub trace_hook: Option<Box<dyn FnMut(TraceEvent)>>,
}

/// One observable VM event `Agent::set_trace_hook`'s callback receives.
#[derive(Debug, Clone, Copy)]
pub enum TraceEvent {
    Call { depth: usize, native: bool },
    Return { depth: usize },
    Throw(Value),
}

impl Agent {
    pub fn new() -> Self {
        let mut heap = Heap::default();
        let mut atoms = AtomTable::new();
        let realm = Realm::bootstrap(&mut heap, &mut atoms);
        let globals = seed_globals(&heap, &mut atoms, &realm);
        Self {
            heap,
            atoms,
            realm,
            exception: None,
            frames: Vec::new(),
            max_frames: 4096,
            microtasks: crate::microtask::MicrotaskQueue::new(),
            globals,
            global_promoted: HashMap::new(),
            global_handlers: HashMap::new(),
            pending_call: PendingCall::new(),
            last_return: None,
            trace_hook: None,
        }
    }

    /// Attaches a diagnostics sink observing frame push/pop and thrown
    /// exceptions. Passing a new hook replaces any previous one; there is
    /// no multi-subscriber fan-out, matching `set_rejection_tracker`'s own
    /// single-sink shape.
    pub fn set_trace_hook(&mut self, hook: impl FnMut(TraceEvent) + 'static) {
        self.trace_hook = Some(Box::new(hook));
    }

    pub(crate) fn trace(&mut self, event: TraceEvent) {
        if let Some(hook) = self.trace_hook.as_mut() {
            hook(event);
        }
    }

    pub fn intern_heap_string(&mut self, s: &str) -> Value {
        if let Some(v) = Value::short_string(s) {
            return v;
        }
        let id = self.heap.strings.alloc(HeapStringData::new(s));
        Value::String(StringValue::Heap(id))
    }

    /// Lossy `&Agent -> String` projection used by property-key coercion,
    /// `ToString`-adjacent diagnostics and `+` concatenation's string arm
    /// (spec §4.7). Object-kind values fall back to `"[object Object]"`-
    /// style tags rather than invoking user `toString` — callers that need
    /// the full `ToString` abstract operation go through `vm.rs` instead.
    pub fn value_to_string_lossy(&mut self, value: Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Undefined => "undefined".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => crate::string::number_to_string(n),
            Value::String(StringValue::Small(s)) => s.as_str().to_string(),
            Value::String(StringValue::Heap(id)) => self.heap.strings.get(id).to_string_lossy(),
            Value::Symbol(id) => format!("Symbol({})", self.atoms.resolve(self.heap.symbols.get(id).atom)),
            Value::Array(_) => "[object Array]".to_string(),
            Value::Function(_) => "[object Function]".to_string(),
            _ => "[object Object]".to_string(),
        }
    }

    fn intern_well_known(&mut self, name: &str) -> Atom {
        self.atoms.intern(name)
    }

    /// Allocates a new `Error`-kind object (spec §7), matching the shape
    /// `Object.ordinary` plus `error_data = true` and a prototype chosen
    /// from `Realm`'s per-kind prototype table.
    pub fn make_error(&mut self, kind: ErrorKind, message: &str) -> Value {
        let proto = self.realm.error_proto(kind);
        let object_id = self.heap.objects.alloc(ObjectData::ordinary(Some(proto)));
        self.heap.objects.get_mut(object_id).error_data = true;
        let message_value = self.intern_heap_string(message);
        let name_value = self.intern_heap_string(kind.name());
        let trace = crate::error::format_error_display(kind.name(), message) + "\n" + &crate::frame::capture_stack_trace(self);
        let stack_value = self.intern_heap_string(&trace);
        let message_atom = self.intern_well_known("message");
        let name_atom = self.atoms.intern("name");
        let stack_atom = self.atoms.intern("stack");
        self.heap
            .objects
            .get_mut(object_id)
            .hash
            .insert(message_atom, crate::property::StoredProperty::data(message_value, true, false, true));
        self.heap
            .objects
            .get_mut(object_id)
            .hash
            .insert(name_atom, crate::property::StoredProperty::data(name_value, true, false, true));
        self.heap
            .objects
            .get_mut(object_id)
            .hash
            .insert(stack_atom, crate::property::StoredProperty::data(stack_value, true, false, true));
        Value::Object(object_id)
    }

    pub fn make_type_error(&mut self, message: &str) -> Value {
        self.make_error(ErrorKind::Type, message)
    }

    pub fn make_range_error(&mut self, message: &str) -> Value {
        self.make_error(ErrorKind::Range, message)
    }

    pub fn make_reference_error(&mut self, message: &str) -> Value {
        self.make_error(ErrorKind::Reference, message)
    }

    pub fn make_syntax_error(&mut self, message: &str) -> Value {
        self.make_error(ErrorKind::Syntax, message)
    }

    pub fn make_uri_error(&mut self, message: &str) -> Value {
        self.make_error(ErrorKind::Uri, message)
    }

    pub fn make_eval_error(&mut self, message: &str) -> Value {
        self.make_error(ErrorKind::Eval, message)
    }

    pub fn make_internal_error(&mut self, message: &str) -> Value {
        self.make_error(ErrorKind::Internal, message)
    }

    pub fn alloc_plain_object(&mut self) -> Value {
        let id = self.heap.objects.alloc(ObjectData::ordinary(Some(self.realm.object_proto)));
        Value::Object(id)
    }

    pub fn alloc_array(&mut self, elements: Vec<Value>) -> Value {
        let array_id = self.heap.arrays.alloc(ArrayData::from_vec(elements));
        let object_id = self.heap.objects.alloc(ObjectData::ordinary(Some(self.realm.array_proto)));
        self.heap.object_fast_array.insert(object_id, array_id);
        self.heap.array_object.insert(array_id, object_id);
        Value::Array(array_id)
    }

    pub fn alloc_array_buffer(&mut self, byte_length: u32) -> (ArrayBufferId, Value) {
        let id = self.heap.array_buffers.alloc(ArrayBufferData::new(byte_length));
        (id, Value::ArrayBuffer(id))
    }

    pub fn alloc_typed_array(&mut self, buffer: ArrayBufferId, byte_offset: u32, length: u32, kind: crate::builtin::typed_array::ElementKind) -> Value {
        let backing = self.heap.array_buffers.get(buffer).clone();
        let id = self.heap.typed_arrays.alloc(TypedArrayData::new(buffer, &backing, byte_offset, length, kind));
        let object_id = self.heap.objects.alloc(ObjectData::ordinary(Some(self.realm.typed_array_proto)));
        self.heap.object_typed_array.insert(object_id, id);
        self.heap.typed_array_object.insert(id, object_id);
        Value::TypedArray(id)
    }

    /// Resolves any object-kind `Value` to the `ObjectId` the `object.rs`
    /// property protocol operates on — the reverse direction of
    /// `object_fast_array`/`object_typed_array` for values that only carry
    /// their backing-store id (spec §3.2).
    pub fn receiver_of(&self, value: Value) -> Option<ObjectId> {
        match value {
            Value::Object(id) | Value::RegExp(id) | Value::Date(id) | Value::ObjectValue(id) => Some(id),
            Value::Array(id) => self.heap.array_object.get(&id).copied(),
            Value::TypedArray(id) => self.heap.typed_array_object.get(&id).copied(),
            Value::Function(id) => Some(self.heap.functions.get(id).object),
            _ => None,
        }
    }

    pub fn alloc_data_view(&mut self, buffer: ArrayBufferId, byte_offset: u32, byte_length: u32) -> Value {
        let backing = self.heap.array_buffers.get(buffer).clone();
        let id = self.heap.data_views.alloc(DataViewData::new(buffer, &backing, byte_offset, byte_length));
        Value::DataView(id)
    }

    pub fn alloc_promise(&mut self) -> PromiseId {
        self.heap.promises.alloc(PromiseData::pending())
    }

    /// Throws `value`: records it as the pending exception and returns the
    /// `ThrowCompletion` callers propagate with `?` (spec §7
    /// "Propagation").
    pub fn throw(&mut self, value: Value) -> crate::error::ThrowCompletion {
        self.exception = Some(value);
        self.trace(TraceEvent::Throw(value));
        crate::error::ThrowCompletion(value)
    }
}

/// Builds the initial value for `Agent::globals`, one entry per name in
/// `codegen::GLOBAL_BUILTIN_NAMES`, read back off `realm.global_object`
/// (spec §4.8): `compile_program` pre-declares those same names, in the
/// same order, into `Global` scope offset 0.. before any user statement,
/// so the two lists must never drift apart.
fn seed_globals(heap: &Heap, atoms: &mut AtomTable, realm: &Realm) -> Vec<Value> {
    crate::codegen::GLOBAL_BUILTIN_NAMES
        .iter()
        .map(|name| {
            let atom = atoms.intern(name);
            match heap.objects.get(realm.global_object).hash.get(atom) {
                Some(prop) => match &prop.kind {
                    crate::property::PropertyKind::Prop(v) => *v,
                    _ => Value::Undefined,
                },
                None => Value::Undefined,
            }
        })
        .collect()
}

impl Default for Agent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_type_error_carries_name_and_message() {
        let mut agent = Agent::new();
        let err = agent.make_type_error("bad thing");
        let Value::Object(id) = err else { panic!("expected object") };
        assert!(agent.heap.objects.get(id).error_data);
    }

    #[test]
    fn intern_heap_string_roundtrips_long_strings() {
        let mut agent = Agent::new();
        let long = "x".repeat(64);
        let v = agent.intern_heap_string(&long);
        assert_eq!(agent.value_to_string_lossy(v), long);
    }

    #[test]
    fn short_strings_skip_the_heap_slab() {
        let mut agent = Agent::new();
        let v = agent.intern_heap_string("hi");
        assert!(matches!(v, Value::String(StringValue::Small(_))));
    }
}
