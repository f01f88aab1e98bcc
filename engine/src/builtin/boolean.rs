//! `Boolean` (spec §4.8): a constructor coercing its argument via `Value::
//! truth`, plus `Boolean.prototype.toString`/`.valueOf`.

use std::rc::Rc;

use crate::agent::Heap;
use crate::atom::AtomTable;
use crate::realm::Realm;
use crate::value::Value;

fn as_bool(agent: &mut crate::agent::Agent, v: Value) -> bool {
    v.truth(&mut agent.heap.strings)
}

pub fn install(heap: &mut Heap, atoms: &mut AtomTable, realm: &Realm) {
    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.global_object,
        "Boolean",
        Rc::new(|agent, _this, args| {
            let b = args.first().map(|v| as_bool(agent, *v)).unwrap_or(false);
            Ok(Value::Boolean(b))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.boolean_proto,
        "toString",
        Rc::new(|agent, this, _args| Ok(agent.intern_heap_string(if as_bool(agent, this) { "true" } else { "false" }))),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.boolean_proto,
        "valueOf",
        Rc::new(|agent, this, _args| Ok(Value::Boolean(as_bool(agent, this)))),
    );
}
