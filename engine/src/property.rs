//! Property records and descriptors (spec §3.3).
//!
//! A stored property's `Prop | Accessor | Ref | PlaceRef | TypedArrayRef |
//! Handler | Whiteout` type tag from spec §3.3 is split across two Rust
//! types here: [`PropertyKind`] covers the five "this slot holds data or
//! redirects to one" shapes, and the `Whiteout` tag is instead represented
//! at the map level by [`crate::flathash::FlatHash`]'s own tombstone slot.
//! Spec §3.3 encodes "deleted but order-preserving" as one more value of
//! the same `type` field the data variants live in; `FlatHash` already has
//! to track exactly that state generically for *any* value type it stores,
//! so folding it into `PropertyKind` as a sixth arm would just require
//! every `match` on `PropertyKind` to carry a impossible-to-construct
//! `Whiteout` arm. The observable semantics — a deleted own property is
//! unreachable by get/iteration but keeps its atom's slot — are identical
//! either way.

use crate::array::ArrayId;
use crate::function::FunctionId;
use crate::object::ObjectId;
use crate::value::Value;
use std::rc::Rc;

/// Where a `Ref`/`PlaceRef`/`TypedArrayRef` property actually writes (spec
/// §3.3, resolved per §3.7/§9: a tagged enum, not raw pointer arithmetic).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyRef {
    ArrayElement { array: ArrayId, index: u32 },
    TypedArrayElement { typed_array: crate::builtin::typed_array::TypedArrayId, index: u32 },
}

/// Which operation a [`PropertyKind::Handler`] hook is being invoked for
/// (spec §3.3: "invoked for get, set, delete, all three via one hook that
/// interprets its mode parameter").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    Get,
    Set,
    Delete,
}

/// A native property handler hook (spec §3.3 `Handler`, §6.1
/// `vm_bind_handler`). Takes the receiver object and, for `Set`, the value
/// being written; returns the read value for `Get`, the written value for
/// `Set`, and a boolean-as-`Value` for `Delete`.
pub type HandlerFn = Rc<dyn Fn(ObjectId, HandlerMode, Value) -> crate::error::JsResult<Value>>;

/// A `vm_bind_handler` global (spec §6.1: "add a global whose reads/writes
/// call the handler, the same shape as an object exotic slot"). Drops the
/// receiver [`ObjectId`] [`HandlerFn`] carries — a bare global binding has
/// no owning object to pass.
pub type GlobalHandlerFn = Rc<dyn Fn(HandlerMode, Value) -> crate::error::JsResult<Value>>;

/// The five live property shapes (spec §3.3 minus `Whiteout` — see module
/// docs).
#[derive(Clone)]
pub enum PropertyKind {
    /// An ordinary data property.
    Prop(Value),
    /// `getter`/`setter` are `None` when absent (spec: "may be NULL").
    Accessor {
        getter: Option<FunctionId>,
        setter: Option<FunctionId>,
    },
    /// Points into a fast array's backing vector.
    Ref(PropertyRef),
    /// Like `Ref`, but additionally signals the slot was just created and
    /// the backing store resized to fit it.
    PlaceRef(PropertyRef),
    /// Points into a typed array's raw byte buffer.
    TypedArrayRef(PropertyRef),
    /// A single native hook serving get/set/delete.
    Handler(HandlerFn),
}

impl std::fmt::Debug for PropertyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyKind::Prop(v) => f.debug_tuple("Prop").field(v).finish(),
            PropertyKind::Accessor { getter, setter } => f
                .debug_struct("Accessor")
                .field("getter", getter)
                .field("setter", setter)
                .finish(),
            PropertyKind::Ref(r) => f.debug_tuple("Ref").field(r).finish(),
            PropertyKind::PlaceRef(r) => f.debug_tuple("PlaceRef").field(r).finish(),
            PropertyKind::TypedArrayRef(r) => f.debug_tuple("TypedArrayRef").field(r).finish(),
            PropertyKind::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// A resolved, stored property attribute — always a concrete `true`/`false`
/// once a property exists (spec §3.6: "generic descriptors ... only appear
/// transiently in `defineProperty`").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyEntry {
    pub kind_is_accessor: bool,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

/// A stored property: key identity lives in the owning `FlatHash`'s atom
/// key, so this only carries the kind and the three boolean attributes.
#[derive(Clone, Debug)]
pub struct StoredProperty {
    pub kind: PropertyKind,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl StoredProperty {
    pub fn data(value: Value, writable: bool, enumerable: bool, configurable: bool) -> Self {
        Self {
            kind: PropertyKind::Prop(value),
            writable,
            enumerable,
            configurable,
        }
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self.kind, PropertyKind::Accessor { .. })
    }

    pub fn is_data(&self) -> bool {
        matches!(
            self.kind,
            PropertyKind::Prop(_) | PropertyKind::Ref(_) | PropertyKind::PlaceRef(_) | PropertyKind::TypedArrayRef(_)
        )
    }
}

/// A tri-state attribute for an input descriptor (spec §3.3 `Attribute`):
/// `Unset` means "not mentioned in this descriptor, leave untouched",
/// distinct from an explicit `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    False,
    True,
    Unset,
}

impl Attribute {
    pub fn or_default(self, default: bool) -> bool {
        match self {
            Attribute::True => true,
            Attribute::False => false,
            Attribute::Unset => default,
        }
    }

    pub fn or_existing(self, existing: bool) -> bool {
        self.or_default(existing)
    }
}

impl From<bool> for Attribute {
    fn from(b: bool) -> Self {
        if b {
            Attribute::True
        } else {
            Attribute::False
        }
    }
}

/// The user-facing property descriptor `Object.defineProperty` builds from
/// a descriptor object: each field may be absent (spec §4.4
/// `ValidateAndApplyPropertyDescriptor`).
#[derive(Debug, Clone, Default)]
pub struct PropertyDescriptor {
    pub value: Option<Value>,
    pub get: Option<Value>,
    pub set: Option<Value>,
    pub writable: Option<Attribute>,
    pub enumerable: Option<Attribute>,
    pub configurable: Option<Attribute>,
}

impl PropertyDescriptor {
    /// Per spec §3.6: `is_accessor_descriptor XOR is_data_descriptor` must
    /// hold for every *stored* property; a descriptor with neither `get`/
    /// `set` nor `value`/`writable` is the transient "generic descriptor"
    /// case.
    pub fn is_accessor_descriptor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }

    pub fn is_data_descriptor(&self) -> bool {
        self.value.is_some() || self.writable.is_some()
    }

    pub fn is_generic_descriptor(&self) -> bool {
        !self.is_accessor_descriptor() && !self.is_data_descriptor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_unset_falls_back_to_existing() {
        assert!(Attribute::Unset.or_existing(true));
        assert!(!Attribute::Unset.or_existing(false));
        assert!(Attribute::True.or_existing(false));
        assert!(!Attribute::False.or_existing(true));
    }

    #[test]
    fn descriptor_classification() {
        let generic = PropertyDescriptor::default();
        assert!(generic.is_generic_descriptor());

        let data = PropertyDescriptor {
            value: Some(Value::Number(1.0)),
            ..Default::default()
        };
        assert!(data.is_data_descriptor());
        assert!(!data.is_accessor_descriptor());
    }
}
