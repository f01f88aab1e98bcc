//! `Number` (spec §4.8, §4.7 ToNumber): a constructor that coerces its
//! argument via `vm::to_number`, plus `Number.prototype.toString`/
//! `.valueOf`.

use std::rc::Rc;

use crate::agent::Heap;
use crate::atom::AtomTable;
use crate::realm::Realm;
use crate::value::Value;

fn as_number(agent: &mut crate::agent::Agent, v: Value) -> crate::error::JsResult<f64> {
    crate::vm::to_number(agent, v)
}

pub fn install(heap: &mut Heap, atoms: &mut AtomTable, realm: &Realm) {
    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.global_object,
        "Number",
        Rc::new(|agent, _this, args| {
            let n = match args.first() {
                Some(v) => as_number(agent, *v)?,
                None => 0.0,
            };
            Ok(Value::Number(n))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.number_proto,
        "toString",
        Rc::new(|agent, this, _args| {
            let n = as_number(agent, this)?;
            Ok(agent.intern_heap_string(&crate::string::number_to_string(n)))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.number_proto,
        "valueOf",
        Rc::new(|agent, this, _args| Ok(Value::Number(as_number(agent, this)?))),
    );
}
