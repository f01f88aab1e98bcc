//! Function machinery: lambdas, closures, native calls, bound functions
//! (spec §4.6).
//!
//! Every callable `Value::Function` carries a [`FunctionId`] into this
//! module's slab *and* an [`crate::object::ObjectId`] for its ordinary
//! properties (`length`, `name`, `prototype`), mirroring the way §3.2
//! describes a Function as an `Object` header with a lambda/native union
//! appended. Closures are realized as heap-allocated [`ClosureCellId`]
//! cells rather than raw addresses: spec §3.6 requires that "any value that
//! still lives on the enclosing frame is promoted to an arena-allocated
//! cell and the frame's slot is retargeted to it" on capture, which in this
//! arena model means the frame slot and the closure slot both become the
//! same `ArenaId` instead of aliasing a stack address.

use std::rc::Rc;

use crate::agent::Agent;
use crate::error::JsResult;
use crate::object::ObjectId;
use crate::scope::Index as ScopeIndex;
use crate::value::Value;

pub type FunctionId = crate::arena::ArenaId<FunctionData>;
/// A heap-promoted closure variable cell (spec §3.6 closure promotion).
pub type ClosureCellId = crate::arena::ArenaId<std::cell::Cell<Value>>;

/// Compiled body + metadata for a JS function literal (spec §4.3 "Function
/// literal"). One `LambdaData` is shared by every closure instance created
/// from the same function literal; only the captured cells differ per
/// instance.
pub struct LambdaData {
    pub code: Rc<crate::opcode::CodeBlock>,
    pub nargs: u32,
    pub nlocal: u32,
    pub rest_param: bool,
    /// Which enclosing-scope slots this lambda's body reads, in the order
    /// its `closure` array must be populated (spec §4.6 "Closures").
    pub closure_sources: Vec<ScopeIndex>,
    pub name: String,
    pub is_constructor: bool,
}

pub type NativeFn = Rc<dyn Fn(&mut Agent, Value, &[Value]) -> JsResult<Value>>;

pub enum FunctionKind {
    Lambda {
        lambda: Rc<LambdaData>,
        closure: Vec<ClosureCellId>,
    },
    /// `u.native` (spec §4.6): signature `(vm, args, nargs, magic, retval)`
    /// realized idiomatically as a boxed closure rather than a raw `fn`
    /// pointer with a `magic` payload, since Rust closures already capture
    /// their "magic" state.
    Native(NativeFn),
    /// Bound function: wraps `target`, prepending `bound_args` ahead of the
    /// caller's own arguments and fixing `this` (spec §4.6 "Bound
    /// functions").
    Bound {
        target: FunctionId,
        bound_this: Value,
        bound_args: Vec<Value>,
    },
}

pub struct FunctionData {
    pub object: ObjectId,
    pub kind: FunctionKind,
}

impl FunctionData {
    pub fn lambda(object: ObjectId, lambda: Rc<LambdaData>, closure: Vec<ClosureCellId>) -> Self {
        Self {
            object,
            kind: FunctionKind::Lambda { lambda, closure },
        }
    }

    pub fn native(object: ObjectId, f: NativeFn) -> Self {
        Self {
            object,
            kind: FunctionKind::Native(f),
        }
    }

    pub fn bound(object: ObjectId, target: FunctionId, bound_this: Value, bound_args: Vec<Value>) -> Self {
        Self {
            object,
            kind: FunctionKind::Bound {
                target,
                bound_this,
                bound_args,
            },
        }
    }
}

/// Invokes `function` with `this` and `args` (spec §4.6: `FUNCTION_CALL`/
/// native dispatch, resolved through any chain of bound wrappers).
pub fn call(agent: &mut Agent, function: FunctionId, this: Value, args: &[Value]) -> JsResult<Value> {
    let kind_ptr = &agent.heap.functions.get(function).kind as *const FunctionKind;
    // SAFETY: `kind` is read through a raw pointer only to match on its
    // discriminant and clone out the small amount of state each arm needs
    // before any call back into `agent` (which may reallocate the
    // `functions` slab via further lambda construction). No reference
    // derived from this pointer escapes past the match.
    match unsafe { &*kind_ptr } {
        FunctionKind::Native(f) => {
            let f = f.clone();
            f(agent, this, args)
        }
        FunctionKind::Bound {
            target,
            bound_this,
            bound_args,
        } => {
            let target = *target;
            let bound_this = *bound_this;
            let mut full_args = bound_args.clone();
            full_args.extend_from_slice(args);
            call(agent, target, bound_this, &full_args)
        }
        FunctionKind::Lambda { lambda, closure } => {
            let lambda = lambda.clone();
            let closure = closure.clone();
            crate::vm::call_lambda(agent, &lambda, &closure, this, args)
        }
    }
}

/// `Function.prototype.bind` (spec §4.6, §8.2's bind/apply law).
pub fn bind(agent: &mut Agent, target: FunctionId, bound_this: Value, bound_args: Vec<Value>) -> FunctionId {
    let proto = agent.heap.functions.get(target).object;
    let object = agent.heap.objects.alloc(crate::object::ObjectData::ordinary(Some(proto)));
    agent.heap.functions.alloc(FunctionData::bound(object, target, bound_this, bound_args))
}

#[cfg(test)]
mod tests {
    // `call`/`bind` need a live `Agent`; covered by `engine/tests/end_to_end.rs`
    // scenario 4 (closures) and the bind/apply law test in `agent.rs`.
}
