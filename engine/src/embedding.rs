//! The host embedding surface (spec §6.1–6.5): a `Vm` struct wrapping one
//! `Agent`, realized as idiomatic methods rather than the C ABI's
//! `vm_*(vm, ...)` free-function-plus-opaque-pointer shape (§6.5).
//!
//! `cli`'s `eval` subcommand is the worked `compile`/`start` example the
//! teacher's own `nova_cli` keeps for `nova_vm`.

use std::rc::Rc;

use crate::agent::Agent;
use crate::builtin::promise;
use crate::codegen::compile_program_with_extra_globals;
use crate::error::{CompileError, JsResult, ThrowCompletion};
use crate::module_loader::{ModuleLoader, ModuleRegistry};
use crate::object::PropertyKey;
use crate::opcode::CodeBlock;
use crate::parser::Parser;
use crate::property::{GlobalHandlerFn, HandlerMode};
use crate::value::Value;
use crate::vm;

/// `vm_opt_init`/`vm_create(opts)` (spec §6.1). `max_arena_chunk` has no
/// live effect — this engine's arena (`arena.rs`) grows one `Vec` per
/// allocation rather than carving fixed-size chunks out of a shared pool —
/// kept as a field so a host's existing `VmOptions` literal still compiles
/// against this crate unchanged.
#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    pub max_stack_size: usize,
    pub max_arena_chunk: usize,
    pub strict_mode_default: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_stack_size: 4096,
            max_arena_chunk: 64 * 1024,
            strict_mode_default: true,
        }
    }
}

/// A compiled top-level script (spec §6.1 `vm_compile`'s returned handle).
/// Holds no reference back into the `Vm` that compiled it — any `Vm` with
/// the matching global layout can `start` it, mirroring `vm_clone`'s
/// "sibling VM sharing read-only state" contract.
pub struct Script {
    code: Rc<CodeBlock>,
}

/// One execution agent plus its embedding-facing bookkeeping: the bound-
/// global name list `compile` threads into `codegen` (spec §6.1
/// `vm_bind`), the module cache (`vm_compile_module`/`require`), and the
/// host's unhandled-rejection tracker (`vm_set_rejection_tracker`).
pub struct Vm {
    pub agent: Agent,
    bound_names: Vec<String>,
    modules: ModuleRegistry,
    rejection_tracker: Option<Box<dyn FnMut(&mut Agent, Value)>>,
}

impl Vm {
    pub fn new(opts: VmOptions) -> Self {
        let mut agent = Agent::new();
        agent.max_frames = opts.max_stack_size;
        Self {
            agent,
            bound_names: Vec::new(),
            modules: ModuleRegistry::new(),
            rejection_tracker: None,
        }
    }

    /// `vm_compile(vm, &start, end)`: compiles `source` as a top-level
    /// script. Any name previously added with `bind`/`bind_handler` is
    /// pre-declared into the script's global scope at a fixed offset
    /// before its own statements compile (see
    /// `codegen::compile_program_with_extra_globals`), so a reference to a
    /// bound host value always resolves the same host binding rather than
    /// the implicit-global fallback `codegen.rs` uses for truly undeclared
    /// names.
    pub fn compile(&mut self, source: &str, file_name: &str) -> Result<Script, CompileError> {
        let mut parser = Parser::new(source, file_name, &mut self.agent.atoms);
        let program = parser.parse_program()?;
        let code = compile_program_with_extra_globals(&mut self.agent.atoms, &program, file_name, &self.bound_names)?;
        Ok(Script { code })
    }

    /// `vm_compile_module(vm, name, &start, end)`.
    pub fn compile_module(&mut self, name: &str, source: &str) -> Result<(), CompileError> {
        self.modules.compile_module(&mut self.agent.atoms, name, source)
    }

    /// `vm_set_module_loader(vm, cb, opaque)`.
    pub fn set_module_loader(&mut self, loader: impl ModuleLoader + 'static) {
        self.modules.set_loader(Box::new(loader));
    }

    /// `require(name)`: resolves a module's exports, compiling and running
    /// its body (through the registered loader if `compile_module` wasn't
    /// called for it directly) exactly once.
    pub fn require(&mut self, name: &str) -> JsResult<Value> {
        self.modules.require(&mut self.agent, name)
    }

    /// `vm_start(vm, &retval)`: runs a compiled top level to completion.
    pub fn start(&mut self, script: &Script) -> JsResult<()> {
        vm::run_script(&mut self.agent, script.code.clone())
    }

    /// `vm_invoke(vm, fn, args, nargs, &retval)`.
    pub fn invoke(&mut self, function: Value, this: Value, args: &[Value]) -> JsResult<Value> {
        let Value::Function(id) = function else {
            let err = self.agent.make_type_error("value is not a function");
            return Err(self.agent.throw(err));
        };
        crate::function::call(&mut self.agent, id, this, args)
    }

    /// `vm_call(vm, "a.b.c", args, nargs, &retval)`: resolves a dotted
    /// path off the global object, then invokes it with `this` left
    /// `undefined` (the path's owning object isn't kept as `this` — spec
    /// §6.1 doesn't require method-call `this` binding for this entry
    /// point, only `vm_invoke`'s already-resolved function value does).
    pub fn call(&mut self, path: &str, args: &[Value]) -> JsResult<Value> {
        let function = self.value(path)?;
        self.invoke(function, Value::Undefined, args)
    }

    /// `vm_bind(vm, name, value, shared)`: adds a global reachable by
    /// plain identifier in every script compiled afterwards. `shared` only
    /// affects whether the binding is writable from script code — the
    /// teacher's (and this engine's) copy-on-write sharing is an
    /// object-property concept (`ObjectData::shared_hash`), which a bare
    /// `Global`-scope slot doesn't have, so a non-`shared` bind is instead
    /// realized as a handler that ignores writes (matching sloppy-mode
    /// assignment-to-non-writable semantics) and always reads back the
    /// value fixed at bind time.
    pub fn bind(&mut self, name: &str, value: Value, shared: bool) {
        let offset = self.declare_bound_name(name);
        if offset as usize >= self.agent.globals.len() {
            self.agent.globals.resize(offset as usize + 1, Value::Undefined);
        }
        self.agent.globals[offset as usize] = value;
        if shared {
            self.agent.global_handlers.remove(&offset);
        } else {
            self.agent.global_handlers.insert(
                offset,
                Rc::new(move |mode, written| match mode {
                    HandlerMode::Get => Ok(value),
                    HandlerMode::Set => Ok(written),
                    HandlerMode::Delete => Ok(Value::Boolean(false)),
                }),
            );
        }
        let atom = self.agent.atoms.intern(name);
        let global_object = self.agent.realm.global_object;
        let _ = crate::object::set_property(&mut self.agent, global_object, PropertyKey::Atom(atom), value);
    }

    /// `vm_bind_handler(vm, name, handler, magic16, magic32, shared)`: adds
    /// a global whose reads/writes call `handler` (spec §6.1, the same
    /// `Get`/`Set`/`Delete`-mode shape `property::HandlerFn` gives an
    /// object's exotic slot — `Delete` is not meaningful for a bare global
    /// and is never dispatched here).
    pub fn bind_handler(&mut self, name: &str, handler: GlobalHandlerFn) {
        let offset = self.declare_bound_name(name);
        self.agent.global_handlers.insert(offset, handler);
    }

    fn declare_bound_name(&mut self, name: &str) -> u32 {
        if let Some(pos) = self.bound_names.iter().position(|n| n == name) {
            return (crate::codegen::GLOBAL_BUILTIN_NAMES.len() + pos) as u32;
        }
        let offset = (crate::codegen::GLOBAL_BUILTIN_NAMES.len() + self.bound_names.len()) as u32;
        self.bound_names.push(name.to_string());
        offset
    }

    /// `vm_enqueue_job(vm, fn, args, nargs)`: queues `function` to run on
    /// the microtask queue with a single argument (spec §5's reaction jobs
    /// only ever carry one value; a host job enqueued directly reuses the
    /// same `MicrotaskJob` shape rather than a separate N-ary job record).
    /// Any result or thrown exception is silently absorbed once the job
    /// runs — a host job has no promise of its own to settle.
    pub fn enqueue_job(&mut self, function: Value, argument: Value) {
        let Value::Function(handler) = function else {
            return;
        };
        let target = self.agent.alloc_promise();
        self.agent.microtasks.enqueue(crate::microtask::MicrotaskJob {
            handler: Some(handler),
            argument,
            target,
            is_rejection: false,
        });
    }

    /// `vm_execute_pending_job(vm)`: runs the oldest queued microtask.
    /// Returns `false` once the queue is empty.
    pub fn execute_pending_job(&mut self) -> bool {
        promise::run_next_job(&mut self.agent)
    }

    /// Drains the microtask queue, then reports every promise that settled
    /// rejected with no handler ever attached to the rejection tracker (if
    /// one is set), marking each as reported so it isn't surfaced again on
    /// a later call. Host-facing convenience wrapping repeated
    /// `execute_pending_job` calls — not a distinct `vm_*` entry point.
    pub fn run_microtasks(&mut self) {
        while self.execute_pending_job() {}
        let unhandled = promise::unhandled_rejections(&self.agent);
        for (id, value) in unhandled {
            self.agent.heap.promises.get_mut(id).handled = true;
            if let Some(tracker) = self.rejection_tracker.as_mut() {
                tracker(&mut self.agent, value);
            }
        }
    }

    /// `vm_set_rejection_tracker(vm, cb, opaque)`.
    pub fn set_rejection_tracker(&mut self, tracker: impl FnMut(&mut Agent, Value) + 'static) {
        self.rejection_tracker = Some(Box::new(tracker));
    }

    /// Resolves a builtin or `bind`/`bind_handler`-declared name to its
    /// fixed `Global`-scope offset. Plain script-declared top-level `var`s
    /// and functions have no such entry — their offsets only exist inside
    /// the `ScopeTree` a given `compile` call builds and discards, so they
    /// are reachable only through `realm.global_object`'s property mirror,
    /// which a bare top-level declaration never updates (spec §3.7's
    /// packed-index globals array and the property-bag global object are
    /// two distinct stores here; see `codegen.rs` module docs).
    fn global_offset(&self, name: &str) -> Option<u32> {
        if let Some(pos) = crate::codegen::GLOBAL_BUILTIN_NAMES.iter().position(|n| *n == name) {
            return Some(pos as u32);
        }
        self.bound_names
            .iter()
            .position(|n| n == name)
            .map(|pos| (crate::codegen::GLOBAL_BUILTIN_NAMES.len() + pos) as u32)
    }

    /// `vm_value(vm, "a.b.c", &retval)`: dotted-path lookup. The first
    /// segment prefers a live `Global`-scope read when it names a builtin
    /// or a `bind`/`bind_handler`-declared global (so a `shared` binding's
    /// in-script writes are visible here too, not just its bind-time
    /// value); any other first segment, and every segment after the
    /// first, is a property get off the previous object.
    pub fn value(&mut self, path: &str) -> JsResult<Value> {
        let mut segments = path.split('.');
        let first = segments.next().unwrap_or("");
        let mut current = if let Some(offset) = self.global_offset(first) {
            if let Some(handler) = self.agent.global_handlers.get(&offset).cloned() {
                handler(HandlerMode::Get, Value::Undefined)?
            } else if let Some(&cell) = self.agent.global_promoted.get(&offset) {
                self.agent.heap.closure_cells.get(cell).get()
            } else {
                self.agent.globals.get(offset as usize).copied().unwrap_or(Value::Undefined)
            }
        } else {
            let atom = self.agent.atoms.intern(first);
            let receiver = self.agent.realm.global_object;
            crate::object::get_property(&mut self.agent, receiver, PropertyKey::Atom(atom))?
        };
        for segment in segments {
            let Some(receiver) = self.agent.receiver_of(current) else {
                let err = self.agent.make_type_error(&format!("cannot read property '{segment}' of a non-object"));
                return Err(self.agent.throw(err));
            };
            let atom = self.agent.atoms.intern(segment);
            current = crate::object::get_property(&mut self.agent, receiver, PropertyKey::Atom(atom))?;
        }
        Ok(current)
    }

    /// `vm_memory_error(vm)`.
    pub fn memory_error(&mut self) -> Value {
        self.agent.make_error(crate::error::ErrorKind::Memory, "out of memory")
    }

    /// `vm_error(vm, type, fmt, ...)`, realized as an idiomatic `format!`
    /// call site rather than a C varargs signature.
    pub fn error(&mut self, kind: crate::error::ErrorKind, message: &str) -> Value {
        self.agent.make_error(kind, message)
    }

    /// `vm_throw(vm, value)`: raises `value` as the pending exception out
    /// of native code.
    pub fn throw(&mut self, value: Value) -> ThrowCompletion {
        self.agent.throw(value)
    }

    /// `vm_exception(vm, &retval)`: the pending exception, if any.
    pub fn exception(&self) -> Option<Value> {
        self.agent.exception
    }

    /// `vm_exception_string(vm, &str)`: `"<name>: <message>"` formatting
    /// (spec §7) for the pending exception, or an empty string if none. An
    /// `Error`-kind exception reads its `name`/`message` own properties
    /// directly through `error::format_error_display` rather than
    /// `value_to_string` (which, like `vm::to_string_value` internally,
    /// has no object-to-primitive coercion and would otherwise just print
    /// `"[object Object]"`); a thrown non-`Error` value still goes through
    /// plain `ToString`.
    pub fn exception_string(&mut self) -> String {
        let Some(exc) = self.agent.exception else {
            return String::new();
        };
        if let Value::Object(id) = exc {
            if self.agent.heap.objects.get(id).error_data {
                let name_atom = self.agent.atoms.intern("name");
                let message_atom = self.agent.atoms.intern("message");
                let name = crate::object::get_property(&mut self.agent, id, PropertyKey::Atom(name_atom))
                    .map(|v| self.agent.value_to_string_lossy(v))
                    .unwrap_or_default();
                let message = crate::object::get_property(&mut self.agent, id, PropertyKey::Atom(message_atom))
                    .map(|v| self.agent.value_to_string_lossy(v))
                    .unwrap_or_default();
                return crate::error::format_error_display(&name, &message);
            }
        }
        self.value_to_string(exc)
    }

    /// `vm_value_to_string(vm, value)`: `ToString` (spec §4.7). Numbers go
    /// through `string::number_to_string`'s spec-shaped formatting by way
    /// of `vm::to_string_value`; every other kind falls back to
    /// `Agent::value_to_string_lossy`'s own property-key-coercion
    /// projection, same as `vm::to_string_value` does internally — neither
    /// path invokes a user-defined `toString`/`valueOf` (no object-to-
    /// primitive coercion protocol in this subset).
    pub fn value_to_string(&mut self, value: Value) -> String {
        vm::to_string_value(&mut self.agent, value)
    }

    /// `vm_value_to_bytes(vm, value)`: the UTF-8 bytes of `ToString(value)`.
    pub fn value_to_bytes(&mut self, value: Value) -> Vec<u8> {
        self.value_to_string(value).into_bytes()
    }

    /// `vm_value_dump(vm, value)`: a debug rendering for host-side
    /// tracing/REPL output — not `ToString`, so it never runs user code
    /// (no `toString`/`valueOf` dispatch, unlike `value_to_string`).
    pub fn value_dump(&mut self, value: Value) -> String {
        self.agent.value_to_string_lossy(value)
    }

    /// `vm_clone(vm, external_ptr)`: a sibling `Vm` sharing no heap state
    /// with `self` — this engine's arena isn't reference-counted for
    /// cross-agent sharing (spec §3.7/§9: multi-agent `SharedState` reuse
    /// is future work for a host that needs it), so a clone is a fresh
    /// `Vm` with the same `VmOptions`-equivalent stack bound and the same
    /// bound-global *names* (not values — the host re-binds per clone).
    pub fn clone_sibling(&self) -> Vm {
        let mut vm = Vm::new(VmOptions {
            max_stack_size: self.agent.max_frames,
            ..VmOptions::default()
        });
        vm.bound_names = self.bound_names.clone();
        vm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_runs_a_script() {
        let mut vm = Vm::new(VmOptions::default());
        let script = vm.compile("var x = 1 + 2; x;", "test.js").expect("compile");
        vm.start(&script).expect("run");
    }

    #[test]
    fn bind_exposes_a_host_value_by_name() {
        let mut vm = Vm::new(VmOptions::default());
        vm.bind("HOST_FLAG", Value::Boolean(true), true);
        let script = vm.compile("var seen = HOST_FLAG;", "test.js").expect("compile");
        vm.start(&script).expect("run");
    }

    #[test]
    fn invoke_calls_a_bound_function_value() {
        let mut vm = Vm::new(VmOptions::default());
        vm.bind("add", Value::Undefined, true);
        let script = vm.compile("add = function(a, b) { return a + b; };", "test.js").expect("compile");
        vm.start(&script).expect("run");
        let add_fn = vm.value("add").expect("lookup");
        let result = vm.invoke(add_fn, Value::Undefined, &[Value::Number(2.0), Value::Number(3.0)]).expect("call");
        assert_eq!(result.as_number(), Some(5.0));
    }

    #[test]
    fn exception_string_reports_uncaught_throw() {
        let mut vm = Vm::new(VmOptions::default());
        let script = vm.compile("throw new TypeError('bad');", "test.js").expect("compile");
        let result = vm.start(&script);
        assert!(result.is_err());
        if let Err(ThrowCompletion(v)) = result {
            vm.agent.exception = Some(v);
        }
        assert!(vm.exception_string().starts_with("TypeError: bad"));
    }
}
