//! `Function.prototype.bind`/`.call`/`.apply` (spec §4.6, §4.8).

use std::rc::Rc;

use crate::agent::Heap;
use crate::atom::AtomTable;
use crate::error::ThrowCompletion;
use crate::realm::Realm;
use crate::value::Value;

fn as_function(agent: &mut crate::agent::Agent, v: Value) -> Result<crate::function::FunctionId, ThrowCompletion> {
    match v {
        Value::Function(id) => Ok(id),
        _ => Err(ThrowCompletion(agent.make_type_error("value is not callable"))),
    }
}

pub fn install(heap: &mut Heap, atoms: &mut AtomTable, realm: &Realm) {
    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.function_proto,
        "call",
        Rc::new(|agent, this, args| {
            let f = as_function(agent, this)?;
            let bound_this = args.first().copied().unwrap_or(Value::Undefined);
            let rest = if args.is_empty() { &[][..] } else { &args[1..] };
            crate::function::call(agent, f, bound_this, rest)
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.function_proto,
        "apply",
        Rc::new(|agent, this, args| {
            let f = as_function(agent, this)?;
            let bound_this = args.first().copied().unwrap_or(Value::Undefined);
            let call_args = match args.get(1) {
                Some(Value::Array(id)) => agent.heap.arrays.get(*id).elements().to_vec(),
                _ => Vec::new(),
            };
            crate::function::call(agent, f, bound_this, &call_args)
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.function_proto,
        "bind",
        Rc::new(|agent, this, args| {
            let f = as_function(agent, this)?;
            let bound_this = args.first().copied().unwrap_or(Value::Undefined);
            let bound_args = if args.is_empty() { Vec::new() } else { args[1..].to_vec() };
            let bound = crate::function::bind(agent, f, bound_this, bound_args);
            Ok(Value::Function(bound))
        }),
    );
}
