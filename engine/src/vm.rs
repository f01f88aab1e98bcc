//! The bytecode interpreter (spec §4.5 "Frames", §4.3 "Bytecode shapes"):
//! the `match`-dispatched instruction loop, frame unwinding for `try`/
//! `catch`/`finally`, and the abstract operations (`ToNumber`, `ToString`,
//! `ToPrimitive`, equality, relational compare) every arithmetic/comparison
//! opcode bottoms out in.
//!
//! The teacher dispatches through a table of `op: fn(vm, ...) -> i32`
//! function pointers (`nova_vm`'s bytecode interpreter); this module keeps
//! the same "one opcode, one indivisible step" shape but dispatches with a
//! plain `match` (`opcode.rs`'s module doc explains why).

use crate::agent::Agent;
use crate::error::{JsResult, ThrowCompletion};
use crate::frame::{Frame, TryHandler};
use crate::function::{ClosureCellId, FunctionId, LambdaData};
use crate::object::{self, PropertyKey};
use crate::opcode::{BinOp, CodeBlock, ForeachKind, OpKind, Operand, PropKeyOperand, UnOp};
use crate::scope::ScopeKind;
use crate::value::{StringValue, Value};
use std::rc::Rc;

/// One live `for-in`/`for-of` cursor (spec §4.3 `PropForeach`/`PropNext`).
/// Snapshotting the key/element list at enumeration start means mutating
/// the subject mid-loop can't desync the cursor — the same tradeoff the
/// spec's own informal description makes ("enumerates a snapshot").
pub struct EnumerationState {
    items: Vec<Value>,
    pos: usize,
}

/// Runs `code` to completion as the top-level script body (spec §4.5): a
/// `Frame::new_global` frame with no owning function, terminated by
/// `OpKind::Stop`. Returns the last expression statement's value — every
/// `Stmt::Expr` writes to a fresh temporary, and `Stop` is only ever
/// reached after the final statement, so the temporary from that last
/// `Expr`/`Stop`-adjacent slot is not separately tracked; callers that need
/// a result value use `invoke` against a function declared in the script
/// instead (spec §6.5 `Vm::start`/`Vm::invoke` split).
pub fn run_script(agent: &mut Agent, code: Rc<CodeBlock>) -> JsResult<()> {
    let frame = Frame::new_global(code);
    crate::frame::push_frame(agent, frame)?;
    let result = run_frame(agent);
    crate::frame::pop_frame(agent);
    result
}

/// Invokes a compiled lambda (spec §4.6 "Closures" / §4.5 `FUNCTION_CALL`):
/// the bridge `function::call`'s `FunctionKind::Lambda` arm calls into.
/// Builds the callee's own `Args` array (`this` at offset 0, declared
/// parameters at 1..=nargs, any rest parameter collected into a trailing
/// array) and its `locals`, then runs its bytecode to a `Return`.
pub fn call_lambda(agent: &mut Agent, lambda: &Rc<LambdaData>, closure: &[ClosureCellId], this: Value, args: &[Value]) -> JsResult<Value> {
    let mut arguments = Vec::with_capacity(1 + lambda.nargs as usize);
    arguments.push(this);
    if lambda.rest_param {
        for i in 0..lambda.nargs {
            arguments.push(args.get(i as usize).copied().unwrap_or(Value::Undefined));
        }
        let rest: Vec<Value> = if (args.len() as u32) > lambda.nargs {
            args[lambda.nargs as usize..].to_vec()
        } else {
            Vec::new()
        };
        arguments.push(agent.alloc_array(rest));
    } else {
        for i in 0..lambda.nargs {
            arguments.push(args.get(i as usize).copied().unwrap_or(Value::Undefined));
        }
    }

    // The function's own id isn't threaded through `call_lambda` (only
    // `function::call` knows it, and only needs it to route here) — stack
    // traces identify frames by `function_name`/`code.file`, not by
    // `FunctionId`, so a frame built from a lambda alone carries everything
    // `capture_stack_trace` needs.
    let frame = Frame::new_js(
        dangling_function_id(),
        lambda.name.clone(),
        lambda.code.clone(),
        lambda.nlocal,
        arguments,
        closure.to_vec(),
        lambda.is_constructor,
    );
    crate::frame::push_frame(agent, frame)?;
    let outcome = run_frame(agent);
    crate::frame::pop_frame(agent);
    match outcome {
        Ok(()) => Ok(agent.last_return.take().unwrap_or(Value::Undefined)),
        Err(e) => Err(e),
    }
}

/// Runs the current (topmost) frame's bytecode from its current `pc` to a
/// `Return`/`Stop`, unwinding through `try_stack` on any `Err` (spec §4.5
/// "Exceptions": "an unhandled throw unwinds the frame"). Every opcode's
/// execution is wrapped uniformly here rather than only around `Throw` —
/// a nested call (`FunctionCall`) can itself propagate a `ThrowCompletion`
/// from deep inside another frame, and that must unwind *this* frame's
/// `try_stack` exactly the same way a direct `Throw` would.
fn run_frame(agent: &mut Agent) -> JsResult<()> {
    loop {
        match step(agent) {
            Ok(Control::Continue) => {}
            Ok(Control::Return) => return Ok(()),
            Ok(Control::Stop) => return Ok(()),
            Err(ThrowCompletion(value)) => {
                let frame = agent.frames.last_mut().expect("run_frame called with an empty frame stack");
                match frame.try_stack.pop() {
                    Some(handler) => {
                        write_operand(agent, handler.exception_slot, value)?;
                        let frame = agent.frames.last_mut().unwrap();
                        frame.rethrow_pending = true;
                        frame.pc = handler.catch_target;
                    }
                    None => return Err(ThrowCompletion(value)),
                }
            }
        }
    }
}

enum Control {
    Continue,
    Return,
    Stop,
}

/// Routes a `return`'s value through the innermost enclosing `try`'s
/// `finally` block before the frame actually returns (spec §4.3: a
/// `return` inside a `try` must still run that `try`'s `finally`). Pops
/// `try_stack` entries (discarding any with no `finally`, e.g. a bare
/// `try { } catch { }`) until it finds one with a `finally_target`, jumps
/// `pc` there and stashes `value` in `frame.pending_return` so `FinallyEnd`
/// can pick the routing back up — or, once no enclosing `try` remains,
/// commits `value` as the frame's actual return.
fn route_return_through_finally(agent: &mut Agent, value: Value) -> Control {
    let finally_target = {
        let frame = agent.frames.last_mut().unwrap();
        loop {
            match frame.try_stack.pop() {
                Some(TryHandler { finally_target: Some(target), .. }) => break Some(target),
                Some(_) => continue,
                None => break None,
            }
        }
    };
    match finally_target {
        Some(target) => {
            let frame = agent.frames.last_mut().unwrap();
            frame.pending_return = Some(value);
            frame.pc = target;
            Control::Continue
        }
        None => {
            agent.last_return = Some(value);
            Control::Return
        }
    }
}

/// Executes exactly one instruction at the current frame's `pc`, advancing
/// it (spec §4.3 "one opcode, one indivisible step").
fn step(agent: &mut Agent) -> JsResult<Control> {
    let (op, pc) = {
        let frame = agent.frames.last().expect("step called with an empty frame stack");
        let code = frame.code.as_ref().expect("step called on a native frame");
        (code.instructions[frame.pc].op, frame.pc)
    };
    agent.frames.last_mut().unwrap().pc = pc + 1;

    match op {
        OpKind::Addr1 { op, dest, src } => {
            let v = read_operand(agent, src)?;
            let result = unary_op(agent, op, src, v)?;
            write_operand(agent, dest, result)?;
        }
        OpKind::Addr2 { op, dest, lhs, rhs } => {
            let l = read_operand(agent, lhs)?;
            let r = read_operand(agent, rhs)?;
            let result = binary_op(agent, op, l, r)?;
            write_operand(agent, dest, result)?;
        }
        OpKind::Addr3 { .. } => unreachable!("Addr3 is reserved for a prototype-walk instanceof variant never emitted by codegen"),
        OpKind::Move { dest, src } => {
            let v = read_operand(agent, src)?;
            write_operand(agent, dest, v)?;
        }

        OpKind::PropGet { dest, object, key } => {
            let obj = read_operand(agent, object)?;
            let key = read_key(agent, key)?;
            let v = get_value_property(agent, obj, key)?;
            write_operand(agent, dest, v)?;
        }
        OpKind::PropSet { object, key, value } => {
            let obj = read_operand(agent, object)?;
            let key = read_key(agent, key)?;
            let v = read_operand(agent, value)?;
            set_value_property(agent, obj, key, v)?;
        }
        OpKind::PropDelete { dest, object, key } => {
            let obj = read_operand(agent, object)?;
            let key = read_key(agent, key)?;
            let deleted = match agent.receiver_of(obj) {
                Some(id) => object::delete_property(agent, id, key)?,
                None => true,
            };
            write_operand(agent, dest, Value::Boolean(deleted))?;
        }
        OpKind::PropForeach { dest, object, of_kind } => {
            let obj = read_operand(agent, object)?;
            let items = enumerate(agent, obj, of_kind)?;
            let id = agent.heap.enumerations.alloc(EnumerationState { items, pos: 0 });
            write_operand(agent, dest, Value::Number(id.index() as f64))?;
        }
        OpKind::PropNext { dest, iter, jump_if_done } => {
            let handle = read_operand(agent, iter)?;
            let idx = enumeration_id(handle);
            let state = agent.heap.enumerations.get_mut(idx);
            if state.pos < state.items.len() {
                let v = state.items[state.pos];
                state.pos += 1;
                write_operand(agent, dest, v)?;
            } else {
                jump(agent, jump_if_done);
            }
        }

        OpKind::CondJump { target } => jump(agent, target),
        OpKind::TestJump { cond, sense, target } => {
            let v = read_operand(agent, cond)?;
            if truthy(agent, v) == sense {
                jump(agent, target);
            }
        }
        OpKind::EqualJump { dest, test, sense, target } => {
            let v = read_operand(agent, test)?;
            if truthy(agent, v) == sense {
                jump(agent, target);
            } else {
                write_operand(agent, dest, v)?;
            }
        }

        OpKind::FunctionFrame { .. } => {
            agent.pending_call = crate::agent::PendingCall::new();
            agent.pending_call.this = Value::Undefined;
        }
        OpKind::MethodFrame { this, method, nargs: _ } => {
            let this_v = read_operand(agent, this)?;
            let method_v = read_operand(agent, method)?;
            agent.pending_call = crate::agent::PendingCall::new();
            agent.pending_call.this = this_v;
            agent.pending_call.callee = method_v;
        }
        OpKind::FunctionCall { dest, nargs: _, ctor } => {
            let result = do_call(agent, ctor)?;
            write_operand(agent, dest, result)?;
        }
        OpKind::Return { value } => {
            let v = read_operand(agent, value)?;
            return Ok(route_return_through_finally(agent, v));
        }
        OpKind::Stop => return Ok(Control::Stop),

        OpKind::TryStart { catch_target, finally_target, exception_slot } => {
            let frame = agent.frames.last_mut().unwrap();
            let base = frame.pc - 1;
            frame.try_stack.push(TryHandler {
                catch_target: (base as i32 + catch_target) as usize,
                finally_target: if finally_target == 0 { None } else { Some((base as i32 + finally_target) as usize) },
                exception_slot,
            });
        }
        OpKind::TryEnd => {
            agent.frames.last_mut().unwrap().try_stack.pop();
        }
        OpKind::Catch => {
            agent.frames.last_mut().unwrap().rethrow_pending = false;
        }
        OpKind::Throw { value } => {
            let v = read_operand(agent, value)?;
            return Err(agent.throw(v));
        }
        OpKind::Finally { .. } => {
            // Pure sequencing marker (spec §4.5): the finally body itself
            // runs via ordinary fallthrough regardless of which path
            // (normal completion, caught throw, uncaught throw routed past
            // any catch) reached it.
        }
        OpKind::FinallyEnd => {
            if let Some(value) = agent.frames.last_mut().unwrap().pending_return.take() {
                return Ok(route_return_through_finally(agent, value));
            }
        }
        OpKind::RethrowIfPending { value } => {
            if agent.frames.last().unwrap().rethrow_pending {
                let v = read_operand(agent, value)?;
                return Err(agent.throw(v));
            }
        }

        OpKind::Object { dest, proto } => {
            let proto_id = match proto {
                Some(operand) => match read_operand(agent, operand)? {
                    Value::Object(id) => Some(id),
                    _ => Some(agent.realm.object_proto),
                },
                None => Some(agent.realm.object_proto),
            };
            let id = agent.heap.objects.alloc(crate::object::ObjectData::ordinary(proto_id));
            write_operand(agent, dest, Value::Object(id))?;
        }
        OpKind::Array { dest, len_hint } => {
            let v = agent.alloc_array(Vec::with_capacity(len_hint as usize));
            write_operand(agent, dest, v)?;
        }
        OpKind::Function { dest, lambda } => {
            let lambda_data = current_code(agent).lambdas[lambda as usize].clone();
            let closure = build_closure(agent, &lambda_data)?;
            let object_id = agent.heap.objects.alloc(crate::object::ObjectData::ordinary(Some(agent.realm.function_proto)));
            let function_id = agent.heap.functions.alloc(crate::function::FunctionData::lambda(object_id, lambda_data, closure));
            write_operand(agent, dest, Value::Function(function_id))?;
        }
        OpKind::Regexp { .. } => unreachable!("no surface syntax ever produces a regex literal; see ast.rs's Expr enum"),
        OpKind::ObjectCopy { dest, src } => {
            let dest_v = read_operand(agent, dest)?;
            let src_v = read_operand(agent, src)?;
            copy_enumerable_own(agent, dest_v, src_v)?;
        }

        OpKind::InstanceOf { dest, value, ctor } => {
            let v = read_operand(agent, value)?;
            let c = read_operand(agent, ctor)?;
            let result = instance_of(agent, v, c)?;
            write_operand(agent, dest, Value::Boolean(result))?;
        }

        OpKind::LoadConst { dest, const_index } => {
            let v = current_code(agent).constants[const_index as usize];
            write_operand(agent, dest, v)?;
        }
        OpKind::LoadString { dest, const_index } => {
            let text = current_code(agent).string_constants[const_index as usize].clone();
            let v = agent.intern_heap_string(&text);
            write_operand(agent, dest, v)?;
        }
    }

    Ok(Control::Continue)
}

fn current_code(agent: &Agent) -> Rc<CodeBlock> {
    agent.frames.last().unwrap().code.clone().expect("current_code called on a native frame")
}

fn jump(agent: &mut Agent, target: i32) {
    let frame = agent.frames.last_mut().unwrap();
    let base = frame.pc - 1;
    frame.pc = (base as i32 + target) as usize;
}

fn enumeration_id(v: Value) -> crate::arena::ArenaId<EnumerationState> {
    match v {
        Value::Number(n) => {
            // `PropForeach` packs the slab index as a plain number (spec
            // §3.1 has no dedicated iterator tag); round-tripping through
            // `f64` is exact for any index this engine will ever allocate.
            crate::arena::ArenaId::from_raw(n as u32)
        }
        _ => unreachable!("PropNext always reads back a PropForeach-produced handle"),
    }
}

fn truthy(agent: &mut Agent, v: Value) -> bool {
    v.truth(&mut agent.heap.strings)
}

/// Reads an operand out of whichever scope array it names (spec §3.4).
fn read_operand(agent: &mut Agent, operand: Operand) -> JsResult<Value> {
    let offset = operand.offset;
    match operand.scope {
        ScopeKind::Args | ScopeKind::CalleeArgs => {
            if operand.scope == ScopeKind::CalleeArgs {
                return Ok(callee_args_read(agent, offset));
            }
            let frame = agent.frames.last().unwrap();
            if let Some(&cell) = frame.promoted_args.get(&offset) {
                return Ok(agent.heap.closure_cells.get(cell).get());
            }
            Ok(frame.arguments.get(offset as usize).copied().unwrap_or(Value::Undefined))
        }
        ScopeKind::Local => {
            let frame = agent.frames.last().unwrap();
            if let Some(&cell) = frame.promoted_locals.get(&offset) {
                return Ok(agent.heap.closure_cells.get(cell).get());
            }
            Ok(frame.locals.get(offset as usize).copied().unwrap_or(Value::Undefined))
        }
        ScopeKind::Global => {
            if let Some(handler) = agent.global_handlers.get(&offset).cloned() {
                return handler(crate::property::HandlerMode::Get, Value::Undefined);
            }
            if let Some(&cell) = agent.global_promoted.get(&offset) {
                return Ok(agent.heap.closure_cells.get(cell).get());
            }
            Ok(agent.globals.get(offset as usize).copied().unwrap_or(Value::Undefined))
        }
        ScopeKind::Closure => {
            let cell = agent.frames.last().unwrap().closure[offset as usize];
            Ok(agent.heap.closure_cells.get(cell).get())
        }
        ScopeKind::ParentLocal | ScopeKind::ParentArgs | ScopeKind::ParentClosure | ScopeKind::Absolute => {
            unreachable!("codegen never emits a Parent*/Absolute-kind operand; route_closure always resolves to Closure")
        }
    }
}

/// `CalleeArgs` addresses the in-flight `PendingCall` staging area (spec
/// §4.5): offset 0 is the callee itself for a plain call, or the receiver
/// for a method call's implicit slot 0 (`MethodFrame` already wrote `this`
/// directly into `pending_call.this`, so a method call's `CalleeArgs`
/// offsets start at 1 for its first real argument — codegen's
/// `compile_call` only ever emits offsets `1..=nargs` for a method call).
fn callee_args_read(agent: &Agent, offset: u32) -> Value {
    if offset == 0 {
        agent.pending_call.callee
    } else {
        agent.pending_call.args.get(offset as usize - 1).copied().unwrap_or(Value::Undefined)
    }
}

fn write_operand(agent: &mut Agent, operand: Operand, value: Value) -> JsResult<()> {
    let offset = operand.offset;
    match operand.scope {
        ScopeKind::CalleeArgs => {
            if offset == 0 {
                agent.pending_call.callee = value;
            } else {
                let idx = offset as usize - 1;
                if idx >= agent.pending_call.args.len() {
                    agent.pending_call.args.resize(idx + 1, Value::Undefined);
                }
                agent.pending_call.args[idx] = value;
            }
        }
        ScopeKind::Args => {
            let frame = agent.frames.last().unwrap();
            if let Some(&cell) = frame.promoted_args.get(&offset) {
                agent.heap.closure_cells.get(cell).set(value);
            } else {
                let frame = agent.frames.last_mut().unwrap();
                if offset as usize >= frame.arguments.len() {
                    frame.arguments.resize(offset as usize + 1, Value::Undefined);
                }
                frame.arguments[offset as usize] = value;
            }
        }
        ScopeKind::Local => {
            let frame = agent.frames.last().unwrap();
            if let Some(&cell) = frame.promoted_locals.get(&offset) {
                agent.heap.closure_cells.get(cell).set(value);
            } else {
                let frame = agent.frames.last_mut().unwrap();
                if offset as usize >= frame.locals.len() {
                    frame.locals.resize(offset as usize + 1, Value::Undefined);
                }
                frame.locals[offset as usize] = value;
            }
        }
        ScopeKind::Global => {
            if let Some(handler) = agent.global_handlers.get(&offset).cloned() {
                handler(crate::property::HandlerMode::Set, value)?;
            } else if let Some(&cell) = agent.global_promoted.get(&offset) {
                agent.heap.closure_cells.get(cell).set(value);
            } else {
                if offset as usize >= agent.globals.len() {
                    agent.globals.resize(offset as usize + 1, Value::Undefined);
                }
                agent.globals[offset as usize] = value;
            }
        }
        ScopeKind::Closure => {
            let cell = agent.frames.last().unwrap().closure[offset as usize];
            agent.heap.closure_cells.get(cell).set(value);
        }
        ScopeKind::ParentLocal | ScopeKind::ParentArgs | ScopeKind::ParentClosure | ScopeKind::Absolute => {
            unreachable!("codegen never emits a Parent*/Absolute-kind operand; route_closure always resolves to Closure")
        }
    }
    Ok(())
}

/// Promotes a captured `Local`/`Args`/`Global` slot to a heap cell the
/// first time a nested lambda reads it (spec §3.6 "any value that still
/// lives on the enclosing frame is promoted to an arena-allocated cell and
/// the frame's slot is retargeted to it"). `closure_sources` entries that
/// are already `Closure`-kind (a capture chained through an intermediate
/// function) just read the existing cell straight through.
fn build_closure(agent: &mut Agent, lambda: &LambdaData) -> JsResult<Vec<ClosureCellId>> {
    let mut cells = Vec::with_capacity(lambda.closure_sources.len());
    for source in &lambda.closure_sources {
        let offset = source.offset();
        let cell = match source.kind() {
            ScopeKind::Local => promote_local(agent, offset),
            ScopeKind::Args => promote_arg(agent, offset),
            ScopeKind::Global => promote_global(agent, offset),
            ScopeKind::Closure => agent.frames.last().unwrap().closure[offset as usize],
            _ => unreachable!("closure_sources only ever names Local/Args/Global/Closure"),
        };
        cells.push(cell);
    }
    Ok(cells)
}

fn promote_local(agent: &mut Agent, offset: u32) -> ClosureCellId {
    let frame = agent.frames.last().unwrap();
    if let Some(&cell) = frame.promoted_locals.get(&offset) {
        return cell;
    }
    let current = frame.locals.get(offset as usize).copied().unwrap_or(Value::Undefined);
    let cell = agent.heap.closure_cells.alloc(std::cell::Cell::new(current));
    agent.frames.last_mut().unwrap().promoted_locals.insert(offset, cell);
    cell
}

fn promote_arg(agent: &mut Agent, offset: u32) -> ClosureCellId {
    let frame = agent.frames.last().unwrap();
    if let Some(&cell) = frame.promoted_args.get(&offset) {
        return cell;
    }
    let current = frame.arguments.get(offset as usize).copied().unwrap_or(Value::Undefined);
    let cell = agent.heap.closure_cells.alloc(std::cell::Cell::new(current));
    agent.frames.last_mut().unwrap().promoted_args.insert(offset, cell);
    cell
}

fn promote_global(agent: &mut Agent, offset: u32) -> ClosureCellId {
    if let Some(&cell) = agent.global_promoted.get(&offset) {
        return cell;
    }
    let current = agent.globals.get(offset as usize).copied().unwrap_or(Value::Undefined);
    let cell = agent.heap.closure_cells.alloc(std::cell::Cell::new(current));
    agent.global_promoted.insert(offset, cell);
    cell
}

fn read_key(agent: &mut Agent, key: PropKeyOperand) -> JsResult<PropertyKey> {
    match key {
        PropKeyOperand::Atom(atom) => Ok(PropertyKey::Atom(atom)),
        PropKeyOperand::Computed(operand) => {
            let v = read_operand(agent, operand)?;
            Ok(object::to_property_key(agent, v))
        }
    }
}

/// `get` that also covers the primitive-receiver special cases spec §4.4
/// carves out (`object.rs::get_property` only operates on an `ObjectId`,
/// so a bare string/number `this` needs its own short-circuit here before
/// falling through to `receiver_of`).
fn get_value_property(agent: &mut Agent, value: Value, key: PropertyKey) -> JsResult<Value> {
    if let Value::String(s) = value {
        if let Some(result) = string_property(agent, s, key) {
            return Ok(result);
        }
        // Non-length/non-index property read on a string: fall through to
        // `String.prototype` so `"x".toString`-style lookups still resolve.
        return object::get_property(agent, agent.realm.string_proto, key);
    }
    match agent.receiver_of(value) {
        Some(id) => object::get_property(agent, id, key),
        None => Ok(Value::Undefined),
    }
}

fn set_value_property(agent: &mut Agent, value: Value, key: PropertyKey, written: Value) -> JsResult<()> {
    match agent.receiver_of(value) {
        Some(id) => object::set_property(agent, id, key, written),
        None => Ok(()),
    }
}

/// `.length` and numeric-index reads on a bare (unboxed) string (spec
/// §4.7): the only two property shapes a primitive string actually needs,
/// since `receiver_of` has no `ObjectId` to hand back for it.
fn string_property(agent: &mut Agent, s: StringValue, key: PropertyKey) -> Option<Value> {
    match key {
        PropertyKey::Atom(atom) if agent.atoms.resolve(atom) == "length" => Some(Value::Number(string_len(agent, s) as f64)),
        PropertyKey::Index(i) => string_char_at(agent, s, i),
        _ => None,
    }
}

fn string_len(agent: &mut Agent, s: StringValue) -> u32 {
    match s {
        StringValue::Small(small) => small.as_str().chars().count() as u32,
        StringValue::Heap(id) => agent.heap.strings.get_mut(id).code_point_len(),
    }
}

fn string_char_at(agent: &mut Agent, s: StringValue, index: u32) -> Option<Value> {
    match s {
        StringValue::Small(small) => small.as_str().chars().nth(index as usize).map(|c| agent.intern_heap_string(&c.to_string())),
        StringValue::Heap(id) => {
            let cp = agent.heap.strings.get_mut(id).code_point_at(index)?;
            let text = cp.to_char().map(|c| c.to_string()).unwrap_or_else(|| "\u{fffd}".to_string());
            Some(agent.intern_heap_string(&text))
        }
    }
}

fn enumerate(agent: &mut Agent, value: Value, of_kind: ForeachKind) -> JsResult<Vec<Value>> {
    match of_kind {
        ForeachKind::ForIn => match agent.receiver_of(value) {
            Some(id) => Ok(object::own_enumerable_keys(agent, id)
                .into_iter()
                .map(|atom| {
                    let text = agent.atoms.resolve(atom).to_string();
                    Value::short_string(&text).unwrap_or_else(|| agent.intern_heap_string(&text))
                })
                .collect()),
            None => Ok(Vec::new()),
        },
        ForeachKind::ForOf => match value {
            Value::Array(id) => Ok(agent.heap.arrays.get(id).elements().to_vec()),
            Value::String(s) => {
                let len = string_len(agent, s);
                Ok((0..len).filter_map(|i| string_char_at(agent, s, i)).collect())
            }
            _ => Ok(Vec::new()),
        },
    }
}

/// Object spread / `Object.assign`-style merge (spec `ObjectCopy`): copies
/// `src`'s own enumerable properties onto `dest` in order.
fn copy_enumerable_own(agent: &mut Agent, dest: Value, src: Value) -> JsResult<()> {
    let Some(src_id) = agent.receiver_of(src) else { return Ok(()) };
    for atom in object::own_enumerable_keys(agent, src_id) {
        let v = object::get_property(agent, src_id, PropertyKey::Atom(atom))?;
        set_value_property(agent, dest, PropertyKey::Atom(atom), v)?;
    }
    Ok(())
}

/// Stages `pending_call` into a real invocation (spec §4.5
/// `FUNCTION_CALL`/`[[Construct]]`). `ctor == true` allocates a fresh
/// object with the callee's `prototype` property as its own prototype and
/// passes that as `this`, using the callee's ordinary return value only if
/// it is itself object-kind (spec §4.6 "a constructor call that returns a
/// primitive discards it and keeps the newly allocated object").
fn do_call(agent: &mut Agent, ctor: bool) -> JsResult<Value> {
    let callee = agent.pending_call.callee;
    let args = std::mem::take(&mut agent.pending_call.args);
    let Value::Function(function_id) = callee else {
        return Err(ThrowCompletion(agent.make_type_error("value is not a function")));
    };

    if ctor {
        let function_object = agent.heap.functions.get(function_id).object;
        let proto_atom = agent.atoms.intern("prototype");
        let proto = match object::get_property(agent, function_object, PropertyKey::Atom(proto_atom))? {
            Value::Object(id) => Some(id),
            _ => Some(agent.realm.object_proto),
        };
        let instance_id = agent.heap.objects.alloc(crate::object::ObjectData::ordinary(proto));
        let this = Value::Object(instance_id);
        let result = crate::function::call(agent, function_id, this, &args)?;
        return Ok(if result.is_object_kind() { result } else { this });
    }

    let this = agent.pending_call.this;
    crate::function::call(agent, function_id, this, &args)
}

/// `instanceof` (spec §4.4): walks `value`'s prototype chain looking for
/// `ctor.prototype`.
fn instance_of(agent: &mut Agent, value: Value, ctor: Value) -> JsResult<bool> {
    let Value::Function(function_id) = ctor else {
        return Err(ThrowCompletion(agent.make_type_error("right-hand side of 'instanceof' is not callable")));
    };
    let Some(mut current) = agent.receiver_of(value) else {
        return Ok(false);
    };
    let function_object = agent.heap.functions.get(function_id).object;
    let proto_atom = agent.atoms.intern("prototype");
    let target_proto = match object::get_property(agent, function_object, PropertyKey::Atom(proto_atom))? {
        Value::Object(id) => id,
        _ => return Ok(false),
    };
    loop {
        let proto = agent.heap.objects.get(current).proto;
        match proto {
            Some(id) if id == target_proto => return Ok(true),
            Some(id) => current = id,
            None => return Ok(false),
        }
    }
}

fn unary_op(agent: &mut Agent, op: UnOp, src_operand: Operand, v: Value) -> JsResult<Value> {
    Ok(match op {
        UnOp::Neg => Value::Number(-to_number(agent, v)?),
        UnOp::Plus => Value::Number(to_number(agent, v)?),
        UnOp::Not => Value::Boolean(!truthy(agent, v)),
        UnOp::BitNot => Value::Number(!to_int32(agent, v)? as f64),
        UnOp::TypeOf => {
            let text = v.type_of();
            Value::short_string(text).unwrap()
        }
        UnOp::Void => {
            let _ = src_operand;
            Value::Undefined
        }
        UnOp::Incr => Value::Number(to_number(agent, v)? + 1.0),
        UnOp::Decr => Value::Number(to_number(agent, v)? - 1.0),
    })
}

fn binary_op(agent: &mut Agent, op: BinOp, l: Value, r: Value) -> JsResult<Value> {
    Ok(match op {
        BinOp::Add => add(agent, l, r)?,
        BinOp::Sub => Value::Number(to_number(agent, l)? - to_number(agent, r)?),
        BinOp::Mul => Value::Number(to_number(agent, l)? * to_number(agent, r)?),
        BinOp::Div => Value::Number(to_number(agent, l)? / to_number(agent, r)?),
        BinOp::Mod => Value::Number(to_number(agent, l)? % to_number(agent, r)?),
        BinOp::Exp => Value::Number(to_number(agent, l)?.powf(to_number(agent, r)?)),
        BinOp::BitAnd => Value::Number((to_int32(agent, l)? & to_int32(agent, r)?) as f64),
        BinOp::BitOr => Value::Number((to_int32(agent, l)? | to_int32(agent, r)?) as f64),
        BinOp::BitXor => Value::Number((to_int32(agent, l)? ^ to_int32(agent, r)?) as f64),
        BinOp::Shl => Value::Number(((to_int32(agent, l)?) << (to_uint32(agent, r)? & 31)) as f64),
        BinOp::Shr => Value::Number(((to_int32(agent, l)?) >> (to_uint32(agent, r)? & 31)) as f64),
        BinOp::UShr => Value::Number(((to_uint32(agent, l)?) >> (to_uint32(agent, r)? & 31)) as f64),
        BinOp::Eq => Value::Boolean(loose_eq(agent, l, r)?),
        BinOp::NotEq => Value::Boolean(!loose_eq(agent, l, r)?),
        BinOp::StrictEq => Value::Boolean(strict_equals(agent, l, r)),
        BinOp::StrictNotEq => Value::Boolean(!strict_equals(agent, l, r)),
        BinOp::Lt => compare(agent, l, r, |o| o == std::cmp::Ordering::Less)?,
        BinOp::Lte => compare(agent, l, r, |o| o != std::cmp::Ordering::Greater)?,
        BinOp::Gt => compare(agent, l, r, |o| o == std::cmp::Ordering::Greater)?,
        BinOp::Gte => compare(agent, l, r, |o| o != std::cmp::Ordering::Less)?,
        BinOp::In => Value::Boolean(has_property(agent, l, r)?),
    })
}

fn has_property(agent: &mut Agent, key: Value, object: Value) -> JsResult<bool> {
    let key = object::to_property_key(agent, key);
    match agent.receiver_of(object) {
        Some(id) => match key {
            PropertyKey::Atom(atom) => Ok(object::has_own_property(agent, id, atom) || has_property_on_proto(agent, id, atom)),
            PropertyKey::Index(_) => Ok(!matches!(object::get_property(agent, id, key)?, Value::Undefined)),
        },
        None => Err(ThrowCompletion(agent.make_type_error("cannot use 'in' operator on a non-object"))),
    }
}

fn has_property_on_proto(agent: &Agent, object_id: crate::object::ObjectId, atom: crate::atom::Atom) -> bool {
    let mut current = agent.heap.objects.get(object_id).proto;
    while let Some(id) = current {
        if object::has_own_property(agent, id, atom) {
            return true;
        }
        current = agent.heap.objects.get(id).proto;
    }
    false
}

/// `+` (spec §4.7): string concatenation when either operand is already a
/// string (the common fast path uses `string.rs::concat` directly on the
/// WTF-8 bytes); otherwise numeric addition via `ToNumber`'s `ToPrimitive`
/// pass. A non-string-kind `ToPrimitive` result that still isn't a number
/// falls back to lossy string coercion rather than implementing the full
/// `OrdinaryToPrimitive` hint-aware recursion (documented simplification —
/// no in-scope scenario calls `+` with a custom `valueOf`/`toString` pair).
fn add(agent: &mut Agent, l: Value, r: Value) -> JsResult<Value> {
    if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
        return Ok(concat_values(agent, l, r));
    }
    let lp = to_primitive(agent, l);
    let rp = to_primitive(agent, r);
    if matches!(lp, Value::String(_)) || matches!(rp, Value::String(_)) {
        return Ok(concat_values(agent, lp, rp));
    }
    Ok(Value::Number(to_number(agent, lp)? + to_number(agent, rp)?))
}

fn concat_values(agent: &mut Agent, l: Value, r: Value) -> Value {
    if let (Value::String(StringValue::Small(a)), Value::String(StringValue::Small(b))) = (l, r) {
        let combined = format!("{}{}", a.as_str(), b.as_str());
        if let Some(v) = Value::short_string(&combined) {
            return v;
        }
        return agent.intern_heap_string(&combined);
    }
    let a_text = agent.value_to_string_lossy(l);
    let b_text = agent.value_to_string_lossy(r);
    let a_wtf8 = wtf8::Wtf8Buf::from_str(&a_text);
    let b_wtf8 = wtf8::Wtf8Buf::from_str(&b_text);
    let (bytes, _len) = crate::string::concat(&a_wtf8, Some(a_text.chars().count() as u32), &b_wtf8, Some(b_text.chars().count() as u32));
    agent.intern_heap_string(&bytes.to_string_lossy())
}

/// `ToPrimitive` (spec §4.7), no explicit hint: object-kind values fall
/// back to the lossy display string (no user `valueOf`/`Symbol.toPrimitive`
/// dispatch — out of scope, see `add`'s doc comment); everything else is
/// already primitive.
fn to_primitive(agent: &mut Agent, v: Value) -> Value {
    if v.is_object_kind() {
        return agent.intern_heap_string(&agent.value_to_string_lossy(v));
    }
    v
}

pub fn to_number(agent: &mut Agent, v: Value) -> JsResult<f64> {
    Ok(match v {
        Value::Number(n) => n,
        Value::Boolean(b) => {
            if b {
                1.0
            } else {
                0.0
            }
        }
        Value::Null => 0.0,
        Value::Undefined => f64::NAN,
        Value::String(StringValue::Small(s)) => crate::string::string_to_number(s.as_str()),
        Value::String(StringValue::Heap(id)) => crate::string::string_to_number(&agent.heap.strings.get(id).to_string_lossy()),
        other => {
            let primitive = to_primitive(agent, other);
            if matches!(primitive, Value::Number(_)) {
                to_number(agent, primitive)?
            } else {
                crate::string::string_to_number(&agent.value_to_string_lossy(primitive))
            }
        }
    })
}

fn to_int32(agent: &mut Agent, v: Value) -> JsResult<i32> {
    let n = to_number(agent, v)?;
    Ok(js_to_int32(n))
}

fn to_uint32(agent: &mut Agent, v: Value) -> JsResult<u32> {
    let n = to_number(agent, v)?;
    Ok(js_to_int32(n) as u32)
}

/// `ToInt32` (spec §4.7): NaN/Infinity become 0; everything else wraps
/// modulo 2^32 the way a C-style cast already does once out-of-range
/// fractional/huge values are screened out.
fn js_to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let truncated = n.trunc();
    let wrapped = truncated.rem_euclid(4294967296.0);
    if wrapped >= 2147483648.0 {
        (wrapped - 4294967296.0) as i32
    } else {
        wrapped as i32
    }
}

/// `ToString` (spec §4.7), full abstract-operation form (as opposed to
/// `Agent::value_to_string_lossy`'s simpler property-key-coercion cousin):
/// routes numbers through `string::number_to_string` for spec-shaped
/// formatting rather than Rust's `Display`.
pub fn to_string_value(agent: &mut Agent, v: Value) -> String {
    match v {
        Value::Number(n) => crate::string::number_to_string(n),
        other => agent.value_to_string_lossy(other),
    }
}

/// `==` (spec §4.7 loose equality): same-type comparisons reduce to
/// `strict_equals`; the only cross-type coercions this subset supports are
/// the common `null == undefined`, `number == string`, and `boolean ==
/// anything` cases — object-to-primitive loose comparison is not
/// implemented (no in-scope scenario needs it).
fn loose_eq(agent: &mut Agent, l: Value, r: Value) -> JsResult<bool> {
    if std::mem::discriminant(&tag_class(l)) == std::mem::discriminant(&tag_class(r)) {
        return Ok(strict_equals(agent, l, r));
    }
    Ok(match (l, r) {
        (Value::Null, Value::Undefined) | (Value::Undefined, Value::Null) => true,
        (Value::Number(_), Value::String(_)) => to_number(agent, l)? == to_number(agent, r)?,
        (Value::String(_), Value::Number(_)) => to_number(agent, l)? == to_number(agent, r)?,
        (Value::Boolean(_), _) => {
            let ln = to_number(agent, l)?;
            loose_eq_number(agent, ln, r)?
        }
        (_, Value::Boolean(_)) => {
            let rn = to_number(agent, r)?;
            loose_eq_number(agent, rn, l)?
        }
        _ => false,
    })
}

fn loose_eq_number(agent: &mut Agent, n: f64, other: Value) -> JsResult<bool> {
    loose_eq(agent, Value::Number(n), other)
}

#[derive(PartialEq)]
enum TagClass {
    Nullish,
    Boolean,
    Number,
    String,
    Other,
}

fn tag_class(v: Value) -> TagClass {
    match v {
        Value::Null | Value::Undefined => TagClass::Nullish,
        Value::Boolean(_) => TagClass::Boolean,
        Value::Number(_) => TagClass::Number,
        Value::String(_) => TagClass::String,
        _ => TagClass::Other,
    }
}

/// `===` (spec §4.7 strict equality / §9 `strict_equals` forward
/// reference from `object.rs::define_property`). Two heap-backed values
/// compare equal only when they name the exact same arena slot — this
/// subset has no separate "SameValueZero" variant (NaN !== NaN, matching
/// `===`, is the only comparison `define_property` needs).
pub fn strict_equals(agent: &mut Agent, l: Value, r: Value) -> bool {
    match (l, r) {
        (Value::Null, Value::Null) | (Value::Undefined, Value::Undefined) => true,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => string_eq(agent, a, b),
        (Value::Symbol(a), Value::Symbol(b)) => a == b,
        (Value::Object(a), Value::Object(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => a == b,
        (Value::Function(a), Value::Function(b)) => a == b,
        (Value::RegExp(a), Value::RegExp(b)) => a == b,
        (Value::Date(a), Value::Date(b)) => a == b,
        (Value::TypedArray(a), Value::TypedArray(b)) => a == b,
        (Value::Promise(a), Value::Promise(b)) => a == b,
        (Value::ObjectValue(a), Value::ObjectValue(b)) => a == b,
        (Value::ArrayBuffer(a), Value::ArrayBuffer(b)) => a == b,
        (Value::DataView(a), Value::DataView(b)) => a == b,
        _ => false,
    }
}

/// String equality by content (spec §8.1 "short/long string equivalence":
/// two strings with the same bytes compare equal regardless of which
/// representation either happens to use).
fn string_eq(agent: &mut Agent, a: StringValue, b: StringValue) -> bool {
    match (a, b) {
        (StringValue::Small(x), StringValue::Small(y)) => x.as_str() == y.as_str(),
        (StringValue::Heap(x), StringValue::Heap(y)) => x == y || agent.heap.strings.get(x).as_wtf8() == agent.heap.strings.get(y).as_wtf8(),
        (StringValue::Small(x), StringValue::Heap(y)) | (StringValue::Heap(y), StringValue::Small(x)) => {
            agent.heap.strings.get(y).as_wtf8().as_bytes() == x.as_str().as_bytes()
        }
    }
}

/// Relational comparison (spec §4.7 "Abstract Relational Comparison"):
/// string operands compare lexicographically by code unit; anything else
/// coerces through `ToNumber`, with `NaN` making every relational test
/// `false` regardless of `invert`.
fn compare(agent: &mut Agent, l: Value, r: Value, accept: impl Fn(std::cmp::Ordering) -> bool) -> JsResult<Value> {
    if let (Value::String(a), Value::String(b)) = (l, r) {
        let a_text = string_text(agent, a);
        let b_text = string_text(agent, b);
        return Ok(Value::Boolean(accept(a_text.cmp(&b_text))));
    }
    let ln = to_number(agent, l)?;
    let rn = to_number(agent, r)?;
    if ln.is_nan() || rn.is_nan() {
        return Ok(Value::Boolean(false));
    }
    Ok(Value::Boolean(accept(ln.partial_cmp(&rn).unwrap())))
}

fn string_text(agent: &mut Agent, s: StringValue) -> String {
    match s {
        StringValue::Small(s) => s.as_str().to_string(),
        StringValue::Heap(id) => agent.heap.strings.get(id).to_string_lossy(),
    }
}

/// A placeholder id for frames built directly from a `LambdaData` without a
/// live `FunctionId` at hand (spec §4.5: a frame's identity for stack-trace
/// purposes is `function_name`/`code.file`, never the id itself — see
/// `call_lambda`). Never dereferenced through `Agent::heap.functions`.
fn dangling_function_id() -> FunctionId {
    FunctionId::from_raw(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomTable;
    use crate::codegen::compile_program;
    use crate::parser::Parser;

    fn run(agent: &mut Agent, src: &str) {
        let mut atoms = AtomTable::new();
        std::mem::swap(&mut agent.atoms, &mut atoms);
        let mut parser = Parser::new(src, "test.js", &mut agent.atoms);
        let program = parser.parse_program().expect("parse");
        let code = compile_program(&mut agent.atoms, &program, "test.js").expect("compile");
        run_script(agent, code).expect("run");
    }

    #[test]
    fn runs_straight_line_arithmetic() {
        let mut agent = Agent::new();
        run(&mut agent, "var x = 1 + 2; var y = x * 3;");
    }

    #[test]
    fn recursive_fibonacci() {
        let mut agent = Agent::new();
        run(
            &mut agent,
            "function fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } var result = fib(10);",
        );
    }

    #[test]
    fn try_catch_finally_runs_finally_after_catch() {
        let mut agent = Agent::new();
        run(
            &mut agent,
            "var log = []; try { throw 1; } catch (e) { log.push('catch'); } finally { log.push('finally'); }",
        );
    }

    #[test]
    fn uncaught_throw_still_runs_finally_then_propagates() {
        let mut agent = Agent::new();
        let mut atoms = AtomTable::new();
        std::mem::swap(&mut agent.atoms, &mut atoms);
        let mut parser = Parser::new("var log = []; try { throw 1; } finally { log.push('finally'); }", "test.js", &mut agent.atoms);
        let program = parser.parse_program().expect("parse");
        let code = compile_program(&mut agent.atoms, &program, "test.js").expect("compile");
        let result = run_script(&mut agent, code);
        assert!(result.is_err());
    }

    #[test]
    fn closure_captures_outer_variable() {
        let mut agent = Agent::new();
        run(
            &mut agent,
            "function makeCounter() { var count = 0; return function() { count = count + 1; return count; }; } var counter = makeCounter(); var a = counter(); var b = counter();",
        );
    }

    #[test]
    fn for_in_enumerates_own_keys() {
        let mut agent = Agent::new();
        run(&mut agent, "var obj = {a: 1, b: 2}; var keys = []; for (var k in obj) { keys.push(k); }");
    }

    #[test]
    fn return_inside_try_runs_enclosing_finally_before_returning() {
        let mut vm = crate::embedding::Vm::new(crate::embedding::VmOptions::default());
        vm.bind("result", Value::Undefined, true);
        let script = vm
            .compile(
                "var log = []; \
                 function f(){ try { return 1; } finally { log.push('finally'); } } \
                 var r = f(); \
                 result = log.length + ':' + r;",
                "test.js",
            )
            .expect("compile");
        vm.start(&script).expect("run");
        let result = vm.value("result").expect("read back result");
        assert_eq!(vm.value_to_string(result), "1:1");
    }
}
