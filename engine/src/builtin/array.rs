//! `Array` construction and `Array.prototype` (spec §4.8): `Array.of`,
//! `Array.from`, `push`, `join`, `slice`. Indexed get/set and `length` are
//! handled generically by the fast-array path in `object.rs`.

use std::rc::Rc;

use crate::agent::Heap;
use crate::atom::AtomTable;
use crate::error::ThrowCompletion;
use crate::realm::Realm;
use crate::value::Value;

fn as_array(agent: &mut crate::agent::Agent, v: Value) -> Result<crate::array::ArrayId, ThrowCompletion> {
    match v {
        Value::Array(id) => Ok(id),
        _ => Err(ThrowCompletion(agent.make_type_error("not an array"))),
    }
}

pub fn install(heap: &mut Heap, atoms: &mut AtomTable, realm: &Realm) {
    let array_ctor = Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.global_object,
        "Array",
        Rc::new(|agent, _this, args| Ok(agent.alloc_array(args.to_vec()))),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        array_ctor,
        "of",
        Rc::new(|agent, _this, args| Ok(agent.alloc_array(args.to_vec()))),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        array_ctor,
        "from",
        Rc::new(|agent, _this, args| {
            let elements = match args.first() {
                Some(Value::Array(id)) => agent.heap.arrays.get(*id).elements().to_vec(),
                Some(Value::TypedArray(id)) => {
                    let data = agent.heap.typed_arrays.get(*id);
                    (0..data.len() as u32).map(|i| data.get_number(i)).collect()
                }
                _ => Vec::new(),
            };
            Ok(agent.alloc_array(elements))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.array_proto,
        "push",
        Rc::new(|agent, this, args| {
            let id = as_array(agent, this)?;
            for v in args {
                agent.heap.arrays.get_mut(id).push(*v);
            }
            Ok(Value::Number(agent.heap.arrays.get(id).len() as f64))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.array_proto,
        "slice",
        Rc::new(|agent, this, args| {
            let id = as_array(agent, this)?;
            let len = agent.heap.arrays.get(id).len() as u32;
            let start = args.first().and_then(|v| v.as_number()).unwrap_or(0.0).max(0.0) as u32;
            let end = args.get(1).and_then(|v| v.as_number()).map(|n| n as u32).unwrap_or(len);
            let slice = agent.heap.arrays.get(id).slice(start, end);
            Ok(agent.alloc_array(slice))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.array_proto,
        "join",
        Rc::new(|agent, this, args| {
            let id = as_array(agent, this)?;
            let sep = match args.first() {
                Some(v) => agent.value_to_string_lossy(*v),
                None => ",".to_string(),
            };
            let elements = agent.heap.arrays.get(id).elements().to_vec();
            let parts: Vec<String> = elements
                .into_iter()
                .map(|v| if v.is_nullish() { String::new() } else { agent.value_to_string_lossy(v) })
                .collect();
            Ok(agent.intern_heap_string(&parts.join(&sep)))
        }),
    );
}
