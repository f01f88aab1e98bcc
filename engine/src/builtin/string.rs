//! `String` (spec §4.8): a constructor coercing its argument via
//! `Agent::value_to_string_lossy`, plus `String.prototype.toString`/
//! `.valueOf`. Indexed access and `.length` on a bare string are handled
//! directly by the VM (`vm.rs::string_property`), not here.

use std::rc::Rc;

use crate::agent::Heap;
use crate::atom::AtomTable;
use crate::realm::Realm;
use crate::value::Value;

pub fn install(heap: &mut Heap, atoms: &mut AtomTable, realm: &Realm) {
    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.global_object,
        "String",
        Rc::new(|agent, _this, args| {
            let s = match args.first() {
                Some(v) => agent.value_to_string_lossy(*v),
                None => String::new(),
            };
            Ok(agent.intern_heap_string(&s))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.string_proto,
        "toString",
        Rc::new(|agent, this, _args| {
            let s = agent.value_to_string_lossy(this);
            Ok(agent.intern_heap_string(&s))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.string_proto,
        "valueOf",
        Rc::new(|agent, this, _args| {
            let s = agent.value_to_string_lossy(this);
            Ok(agent.intern_heap_string(&s))
        }),
    );
}
