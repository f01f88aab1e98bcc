//! `Error` and its typed subclasses (spec §4.8, §7): one constructor +
//! prototype pair per [`ErrorKind`], plus `Error.prototype.toString` and
//! the fixed `MemoryError` singleton.

use std::rc::Rc;

use crate::agent::Heap;
use crate::atom::AtomTable;
use crate::error::ErrorKind;
use crate::realm::Realm;
use crate::value::Value;

const KINDS: &[ErrorKind] = &[
    ErrorKind::Syntax,
    ErrorKind::Reference,
    ErrorKind::Type,
    ErrorKind::Range,
    ErrorKind::Uri,
    ErrorKind::Eval,
    ErrorKind::Internal,
];

pub fn install(heap: &mut Heap, atoms: &mut AtomTable, realm: &mut Realm) {
    for &kind in KINDS {
        let proto = realm.error_proto(kind);
        let name_atom = atoms.intern("name");
        let name_value = crate::value::Value::short_string(kind.name()).unwrap();
        heap.objects
            .get_mut(proto)
            .hash
            .insert(name_atom, crate::property::StoredProperty::data(name_value, true, false, true));

        Realm::install_native(
            heap,
            atoms,
            realm.function_proto,
            proto,
            "toString",
            Rc::new(move |agent, this, _args| {
                let crate::value::Value::Object(id) = this else {
                    return Ok(agent.intern_heap_string(kind.name()));
                };
                let name_atom = agent.atoms.intern("name");
                let message_atom = agent.atoms.intern("message");
                let name = crate::object::get_property(agent, id, crate::object::PropertyKey::Atom(name_atom))?;
                let message = crate::object::get_property(agent, id, crate::object::PropertyKey::Atom(message_atom))?;
                let name = agent.value_to_string_lossy(name);
                let message = agent.value_to_string_lossy(message);
                Ok(agent.intern_heap_string(&crate::error::format_error_display(&name, &message)))
            }),
        );

        Realm::install_native(
            heap,
            atoms,
            realm.function_proto,
            realm.global_object,
            kind.name(),
            Rc::new(move |agent, _this, args| {
                let message = match args.first() {
                    Some(v) => agent.value_to_string_lossy(*v),
                    None => String::new(),
                };
                Ok(agent.make_error(kind, &message))
            }),
        );
    }

    // `MemoryError` (spec §7): fixed, non-extensible, non-constructible
    // singleton, not a constructor/prototype pair like the others.
    let memory_proto = realm.error_proto(ErrorKind::Memory);
    heap.objects.get_mut(memory_proto).extensible = false;
    let message_atom = atoms.intern("message");
    let message_value = Value::short_string("out of memory").unwrap();
    heap.objects
        .get_mut(memory_proto)
        .hash
        .insert(message_atom, crate::property::StoredProperty::data(message_value, false, false, false));
    let memory_atom = atoms.intern("MemoryError");
    heap.objects
        .get_mut(realm.global_object)
        .hash
        .insert(memory_atom, crate::property::StoredProperty::data(Value::Object(memory_proto), false, false, false));
}
