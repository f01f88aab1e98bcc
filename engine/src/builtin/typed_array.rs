//! `ArrayBuffer`/`DataView`/`TypedArray` (spec §4.8 minimal builtin surface).
//!
//! Backing bytes are `Rc<RefCell<Vec<u8>>>` rather than the generic
//! `arena::RawArena` bump allocator the rest of the heap uses: a
//! `TypedArray` and a `DataView` constructed over the same `ArrayBuffer`
//! must observe each other's writes, which needs one shared, interior-
//! mutable byte vector reachable from more than one heap entity at once —
//! exactly what `Rc<RefCell<_>>` is for, and a poor fit for a grow-only
//! single-owner bump arena (spec §3.7 already departs from the teacher's
//! GC for the rest of the heap; this is a second, narrower departure
//! scoped to just these three builtins).

use std::cell::RefCell;
use std::rc::Rc;

use crate::agent::Heap;
use crate::arena::ArenaId;
use crate::atom::AtomTable;
use crate::error::ThrowCompletion;
use crate::realm::Realm;
use crate::value::Value;

pub type ArrayBufferId = ArenaId<ArrayBufferData>;
pub type DataViewId = ArenaId<DataViewData>;
pub type TypedArrayId = ArenaId<TypedArrayData>;

type Bytes = Rc<RefCell<Vec<u8>>>;

#[derive(Clone)]
pub struct ArrayBufferData {
    bytes: Bytes,
}

impl ArrayBufferData {
    pub fn new(byte_length: u32) -> Self {
        Self {
            bytes: Rc::new(RefCell::new(vec![0u8; byte_length as usize])),
        }
    }

    pub fn byte_length(&self) -> u32 {
        self.bytes.borrow().len() as u32
    }

    pub fn read_slice(&self, offset: u32, len: u32) -> Vec<u8> {
        self.bytes.borrow()[offset as usize..(offset + len) as usize].to_vec()
    }

    pub fn write_slice(&self, offset: u32, data: &[u8]) {
        self.bytes.borrow_mut()[offset as usize..offset as usize + data.len()].copy_from_slice(data);
    }

    fn handle(&self) -> Bytes {
        self.bytes.clone()
    }
}

#[derive(Clone)]
pub struct DataViewData {
    pub buffer: ArrayBufferId,
    bytes: Bytes,
    pub byte_offset: u32,
    pub byte_length: u32,
}

impl DataViewData {
    pub fn new(buffer: ArrayBufferId, backing: &ArrayBufferData, byte_offset: u32, byte_length: u32) -> Self {
        Self {
            buffer,
            bytes: backing.handle(),
            byte_offset,
            byte_length,
        }
    }

    pub fn get(&self, kind: ElementKind, offset: u32, little_endian: bool) -> f64 {
        let start = (self.byte_offset + offset) as usize;
        let size = kind.byte_size() as usize;
        let mut bytes = self.bytes.borrow()[start..start + size].to_vec();
        if !little_endian {
            bytes.reverse();
        }
        decode(kind, &bytes)
    }

    pub fn set(&self, kind: ElementKind, offset: u32, value: f64, little_endian: bool) {
        let mut bytes = encode(kind, value);
        if !little_endian {
            bytes.reverse();
        }
        let start = (self.byte_offset + offset) as usize;
        self.bytes.borrow_mut()[start..start + bytes.len()].copy_from_slice(&bytes);
    }
}

/// Element kind (spec §4.8 "a couple of integer/float kinds"). Only the
/// common numeric kinds are supported; `BigInt64`/`BigUint64` are excluded
/// per Non-goals (no `BigInt`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    I8,
    U8,
    U8Clamped,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ElementKind {
    pub fn byte_size(self) -> u32 {
        match self {
            ElementKind::I8 | ElementKind::U8 | ElementKind::U8Clamped => 1,
            ElementKind::I16 | ElementKind::U16 => 2,
            ElementKind::I32 | ElementKind::U32 | ElementKind::F32 => 4,
            ElementKind::F64 => 8,
        }
    }
}

#[derive(Clone)]
pub struct TypedArrayData {
    pub buffer: ArrayBufferId,
    bytes: Bytes,
    pub byte_offset: u32,
    pub length: u32,
    pub kind: ElementKind,
}

impl TypedArrayData {
    pub fn new(buffer: ArrayBufferId, backing: &ArrayBufferData, byte_offset: u32, length: u32, kind: ElementKind) -> Self {
        Self {
            buffer,
            bytes: backing.handle(),
            byte_offset,
            length,
            kind,
        }
    }

    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn element_offset(&self, index: u32) -> usize {
        self.byte_offset as usize + index as usize * self.kind.byte_size() as usize
    }

    pub fn get_number(&self, index: u32) -> Value {
        if index >= self.length {
            return Value::Undefined;
        }
        let start = self.element_offset(index);
        let size = self.kind.byte_size() as usize;
        let bytes = self.bytes.borrow()[start..start + size].to_vec();
        Value::Number(decode(self.kind, &bytes))
    }

    pub fn set_number(&mut self, index: u32, value: f64) {
        if index >= self.length {
            return;
        }
        let start = self.element_offset(index);
        let encoded = encode(self.kind, value);
        self.bytes.borrow_mut()[start..start + encoded.len()].copy_from_slice(&encoded);
    }

    pub fn slice(&self, start: u32, end: u32) -> Vec<Value> {
        let start = start.min(self.length);
        let end = end.min(self.length).max(start);
        (start..end).map(|i| self.get_number(i)).collect()
    }
}

fn decode(kind: ElementKind, bytes: &[u8]) -> f64 {
    match kind {
        ElementKind::I8 => bytes[0] as i8 as f64,
        ElementKind::U8 | ElementKind::U8Clamped => bytes[0] as f64,
        ElementKind::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        ElementKind::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        ElementKind::I32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        ElementKind::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        ElementKind::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        ElementKind::F64 => f64::from_le_bytes(bytes.try_into().unwrap()),
    }
}

fn encode(kind: ElementKind, value: f64) -> Vec<u8> {
    match kind {
        ElementKind::I8 => vec![value as i64 as i8 as u8],
        ElementKind::U8 => vec![value as i64 as u8],
        ElementKind::U8Clamped => vec![value.round().clamp(0.0, 255.0) as u8],
        ElementKind::I16 => (value as i64 as i16).to_le_bytes().to_vec(),
        ElementKind::U16 => (value as i64 as u16).to_le_bytes().to_vec(),
        ElementKind::I32 => (value as i64 as i32).to_le_bytes().to_vec(),
        ElementKind::U32 => (value as i64 as u32).to_le_bytes().to_vec(),
        ElementKind::F32 => (value as f32).to_le_bytes().to_vec(),
        ElementKind::F64 => value.to_le_bytes().to_vec(),
    }
}

/// `ArrayBuffer`, `Uint8Array`/`Int32Array`/etc. and their shared `.set`/
/// `.slice` prototype methods (spec §4.8 scenario 6: "construction from an
/// array, `.set`, `.slice`").
pub fn install(heap: &mut Heap, atoms: &mut AtomTable, realm: &Realm) {
    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.global_object,
        "ArrayBuffer",
        Rc::new(|agent, _this, args| {
            let len = args.first().and_then(|v| v.as_number()).unwrap_or(0.0).max(0.0) as u32;
            Ok(agent.alloc_array_buffer(len).1)
        }),
    );

    let kinds: &[(&str, ElementKind)] = &[
        ("Int8Array", ElementKind::I8),
        ("Uint8Array", ElementKind::U8),
        ("Uint8ClampedArray", ElementKind::U8Clamped),
        ("Int16Array", ElementKind::I16),
        ("Uint16Array", ElementKind::U16),
        ("Int32Array", ElementKind::I32),
        ("Uint32Array", ElementKind::U32),
        ("Float32Array", ElementKind::F32),
        ("Float64Array", ElementKind::F64),
    ];
    for &(name, kind) in kinds {
        Realm::install_native(
            heap,
            atoms,
            realm.function_proto,
            realm.global_object,
            name,
            Rc::new(move |agent, _this, args| construct_typed_array(agent, kind, args.first().copied())),
        );
    }

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.typed_array_proto,
        "set",
        Rc::new(|agent, this, args| {
            let Value::TypedArray(id) = this else {
                return Err(ThrowCompletion(agent.make_type_error("not a typed array")));
            };
            let source: Vec<f64> = match args.first() {
                Some(Value::Array(array_id)) => agent
                    .heap
                    .arrays
                    .get(*array_id)
                    .elements()
                    .iter()
                    .map(|v| v.as_number().unwrap_or(f64::NAN))
                    .collect(),
                Some(Value::TypedArray(ta)) => {
                    let len = agent.heap.typed_arrays.get(*ta).len() as u32;
                    (0..len).map(|i| agent.heap.typed_arrays.get(*ta).get_number(i).as_number().unwrap_or(f64::NAN)).collect()
                }
                _ => Vec::new(),
            };
            let offset = args.get(1).and_then(|v| v.as_number()).unwrap_or(0.0) as u32;
            for (i, value) in source.into_iter().enumerate() {
                agent.heap.typed_arrays.get_mut(id).set_number(offset + i as u32, value);
            }
            Ok(Value::Undefined)
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.typed_array_proto,
        "slice",
        Rc::new(|agent, this, args| {
            let Value::TypedArray(id) = this else {
                return Err(ThrowCompletion(agent.make_type_error("not a typed array")));
            };
            let len = agent.heap.typed_arrays.get(id).len() as u32;
            let start = args.first().and_then(|v| v.as_number()).unwrap_or(0.0).max(0.0) as u32;
            let end = args.get(1).and_then(|v| v.as_number()).map(|n| n as u32).unwrap_or(len);
            let kind = agent.heap.typed_arrays.get(id).kind;
            let values = agent.heap.typed_arrays.get(id).slice(start, end);
            let (buffer_id, _) = agent.alloc_array_buffer(values.len() as u32 * kind.byte_size());
            let result = agent.alloc_typed_array(buffer_id, 0, values.len() as u32, kind);
            let Value::TypedArray(result_id) = result else { unreachable!() };
            for (i, v) in values.into_iter().enumerate() {
                agent.heap.typed_arrays.get_mut(result_id).set_number(i as u32, v.as_number().unwrap_or(f64::NAN));
            }
            Ok(result)
        }),
    );
}

fn construct_typed_array(agent: &mut crate::agent::Agent, kind: ElementKind, arg: Option<Value>) -> crate::error::JsResult<Value> {
    match arg {
        Some(Value::Number(n)) => {
            let length = n.max(0.0) as u32;
            let (buffer_id, _) = agent.alloc_array_buffer(length * kind.byte_size());
            Ok(agent.alloc_typed_array(buffer_id, 0, length, kind))
        }
        Some(Value::Array(array_id)) => {
            let elements = agent.heap.arrays.get(array_id).elements().to_vec();
            let length = elements.len() as u32;
            let (buffer_id, _) = agent.alloc_array_buffer(length * kind.byte_size());
            let result = agent.alloc_typed_array(buffer_id, 0, length, kind);
            let Value::TypedArray(result_id) = result else { unreachable!() };
            for (i, v) in elements.into_iter().enumerate() {
                agent.heap.typed_arrays.get_mut(result_id).set_number(i as u32, v.as_number().unwrap_or(f64::NAN));
            }
            Ok(result)
        }
        _ => {
            let (buffer_id, _) = agent.alloc_array_buffer(0);
            Ok(agent.alloc_typed_array(buffer_id, 0, 0, kind))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_i32_element() {
        assert_eq!(decode(ElementKind::I32, &encode(ElementKind::I32, -5.0)), -5.0);
    }

    #[test]
    fn clamps_u8_clamped() {
        assert_eq!(encode(ElementKind::U8Clamped, 300.0), vec![255]);
        assert_eq!(encode(ElementKind::U8Clamped, -10.0), vec![0]);
    }

    #[test]
    fn typed_array_and_data_view_share_bytes() {
        let mut buffers: crate::arena::Slab<ArrayBufferData> = crate::arena::Slab::new();
        let buffer = ArrayBufferData::new(8);
        let id = buffers.alloc(buffer);
        let backing = buffers.get(id).clone();
        let mut ta = TypedArrayData::new(id, &backing, 0, 2, ElementKind::I32);
        ta.set_number(0, 42.0);
        let view = DataViewData::new(id, &backing, 0, 8);
        assert_eq!(view.get(ElementKind::I32, 0, true), 42.0);
    }
}
