//! `Object` static methods and `Object.prototype` (spec §4.8): `keys`,
//! `defineProperty`, `getPrototypeOf`, `hasOwnProperty`.

use std::rc::Rc;

use crate::agent::{Agent, Heap};
use crate::atom::AtomTable;
use crate::error::{JsResult, ThrowCompletion};
use crate::object::{self, PropertyKey};
use crate::property::{Attribute, PropertyDescriptor};
use crate::realm::Realm;
use crate::value::Value;

fn as_object(agent: &mut Agent, v: Value) -> JsResult<crate::object::ObjectId> {
    match v {
        Value::Object(id) => Ok(id),
        _ => Err(ThrowCompletion(agent.make_type_error("value is not an object"))),
    }
}

pub fn install(heap: &mut Heap, atoms: &mut AtomTable, realm: &Realm) {
    let object_ctor = Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.global_object,
        "Object",
        Rc::new(|agent, _this, args| {
            if let Some(Value::Object(id)) = args.first() {
                return Ok(Value::Object(*id));
            }
            Ok(agent.alloc_plain_object())
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        object_ctor,
        "keys",
        Rc::new(|agent, _this, args| {
            let target = args.first().copied().unwrap_or(Value::Undefined);
            let Value::Object(id) = target else {
                return Err(ThrowCompletion(agent.make_type_error("Object.keys called on non-object")));
            };
            let keys = object::own_enumerable_keys(agent, id);
            let mut values = Vec::with_capacity(keys.len());
            for atom in keys {
                let name = agent.atoms.resolve(atom).to_string();
                values.push(agent.intern_heap_string(&name));
            }
            Ok(agent.alloc_array(values))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        object_ctor,
        "getPrototypeOf",
        Rc::new(|agent, _this, args| {
            let Some(Value::Object(id)) = args.first() else {
                return Err(ThrowCompletion(agent.make_type_error("Object.getPrototypeOf called on non-object")));
            };
            Ok(match agent.heap.objects.get(*id).proto {
                Some(p) => Value::Object(p),
                None => Value::Null,
            })
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        object_ctor,
        "defineProperty",
        Rc::new(|agent, _this, args| {
            let target = args.first().copied().unwrap_or(Value::Undefined);
            let id = as_object(agent, target)?;
            let key_value = args.get(1).copied().unwrap_or(Value::Undefined);
            let key = object::to_property_key(agent, key_value);
            let desc_value = args.get(2).copied().unwrap_or(Value::Undefined);
            let Value::Object(desc_id) = desc_value else {
                return Err(ThrowCompletion(agent.make_type_error("property descriptor must be an object")));
            };
            let descriptor = read_descriptor(agent, desc_id)?;
            object::define_property(agent, id, key, descriptor)?;
            Ok(target)
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.object_proto,
        "hasOwnProperty",
        Rc::new(|agent, this, args| {
            let id = as_object(agent, this)?;
            let key_value = args.first().copied().unwrap_or(Value::Undefined);
            let key = object::to_property_key(agent, key_value);
            let atom = match key {
                PropertyKey::Atom(a) => a,
                PropertyKey::Index(i) => agent.atoms.intern(&i.to_string()),
            };
            Ok(Value::Boolean(object::has_own_property(agent, id, atom)))
        }),
    );
}

fn read_descriptor(agent: &mut Agent, desc_id: crate::object::ObjectId) -> JsResult<PropertyDescriptor> {
    let mut descriptor = PropertyDescriptor::default();
    let names = ["value", "get", "set", "writable", "enumerable", "configurable"];
    for name in names {
        let atom = agent.atoms.intern(name);
        if !object::has_own_property(agent, desc_id, atom) {
            continue;
        }
        let v = object::get_property(agent, desc_id, PropertyKey::Atom(atom))?;
        match name {
            "value" => descriptor.value = Some(v),
            "get" => descriptor.get = Some(v),
            "set" => descriptor.set = Some(v),
            "writable" => descriptor.writable = Some(Attribute::from(v.as_bool().unwrap_or(false))),
            "enumerable" => descriptor.enumerable = Some(Attribute::from(v.as_bool().unwrap_or(false))),
            "configurable" => descriptor.configurable = Some(Attribute::from(v.as_bool().unwrap_or(false))),
            _ => unreachable!(),
        }
    }
    Ok(descriptor)
}
