//! `require(name)` and the host-supplied module loader callback (spec §6.1
//! `vm_compile_module`/`vm_set_module_loader`, §1 Non-goal "module loader
//! *resolution*" — the CORE owns the compile/cache/run mechanism below; a
//! host decides what bytes a given name maps to).

use std::rc::Rc;

use crate::agent::Agent;
use crate::atom::AtomTable;
use crate::codegen::{self, compile_program};
use crate::error::{CompileError, JsResult, ThrowCompletion};
use crate::object::PropertyKey;
use crate::opcode::CodeBlock;
use crate::parser::Parser;
use crate::value::Value;
use crate::vm;
use hashbrown::HashMap;

/// A host hook resolving a module name to source bytes (spec §6.1
/// `vm_set_module_loader`'s `cb`). Given `opaque` host state directly
/// instead of the C ABI's void pointer, since a Rust closure/trait object
/// already carries whatever state it needs.
pub trait ModuleLoader {
    fn load(&self, name: &str) -> Option<Vec<u8>>;
}

/// Lets a plain closure stand in for a full `impl ModuleLoader`.
impl<F: Fn(&str) -> Option<Vec<u8>>> ModuleLoader for F {
    fn load(&self, name: &str) -> Option<Vec<u8>> {
        self(name)
    }
}

/// One precompiled module body, wrapped as `(module, exports) => {...}` so
/// running it never touches the requiring script's own global scope (spec
/// §3.4: `global` is one flat array per `Agent`, shared by every compiled
/// unit — a module's own top-level `var`s would otherwise collide with
/// whichever other module or script last used the same offsets).
struct CompiledModule {
    factory: Rc<CodeBlock>,
}

/// The module cache `require(name)` consults (spec §6.1 "the returned
/// handle is later accessible via `require(name)`"): precompiled factory
/// bodies plus already-evaluated exports, so requiring the same name twice
/// runs its top level only once — the same guarantee CommonJS `require`
/// gives.
#[derive(Default)]
pub struct ModuleRegistry {
    compiled: HashMap<String, CompiledModule>,
    exports: HashMap<String, Value>,
    loader: Option<Box<dyn ModuleLoader>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_loader(&mut self, loader: Box<dyn ModuleLoader>) {
        self.loader = Some(loader);
    }

    /// `vm_compile_module`: compiles `source` under `name` and registers it,
    /// without running it. Running happens lazily, the first time `name` is
    /// `require`d.
    pub fn compile_module(&mut self, atoms: &mut AtomTable, name: &str, source: &str) -> Result<(), CompileError> {
        let mut parser = Parser::new(source, name, atoms);
        let program = parser.parse_program()?;
        let wrapped = wrap_as_factory(&program, atoms, name)?;
        self.compiled.insert(name.to_string(), CompiledModule { factory: wrapped });
        Ok(())
    }

    /// Returns `name`'s exports, loading and compiling it through the
    /// registered `ModuleLoader` first if `compile_module` was never called
    /// for it directly.
    pub fn require(&mut self, agent: &mut Agent, name: &str) -> JsResult<Value> {
        if let Some(v) = self.exports.get(name) {
            return Ok(*v);
        }
        if !self.compiled.contains_key(name) {
            let loaded = self.loader.as_deref().and_then(|l| l.load(name));
            let bytes = match loaded {
                Some(b) => b,
                None => {
                    let err = agent_error_no_loader(agent, name);
                    return Err(agent.throw(err));
                }
            };
            let source = String::from_utf8_lossy(&bytes).into_owned();
            if let Err(e) = self.compile_module(&mut agent.atoms, name, &source) {
                let err = agent_compile_error(agent, &e);
                return Err(ThrowCompletion(err));
            }
        }
        let factory = self.compiled.get(name).expect("just inserted").factory.clone();
        let module_atom = agent.atoms.intern("exports");
        let module_obj = agent.alloc_plain_object();
        let exports_obj = agent.alloc_plain_object();
        if let Value::Object(module_id) = module_obj {
            crate::object::set_property(agent, module_id, PropertyKey::Atom(module_atom), exports_obj)?;
        }

        let offset = factory_slot();
        agent.globals[offset] = Value::Undefined;
        vm::run_script(agent, factory)?;
        let Value::Function(factory_fn) = agent.globals[offset] else {
            return Err(agent.throw(agent_internal_error(agent, "module body did not produce a factory function")));
        };
        crate::function::call(agent, factory_fn, module_obj, &[module_obj, exports_obj])?;

        let final_exports = if let Value::Object(module_id) = module_obj {
            crate::object::get_property(agent, module_id, PropertyKey::Atom(module_atom))?
        } else {
            exports_obj
        };
        self.exports.insert(name.to_string(), final_exports);
        Ok(final_exports)
    }
}

fn factory_slot() -> usize {
    codegen::GLOBAL_BUILTIN_NAMES
        .iter()
        .position(|n| *n == "__module_factory__")
        .expect("reserved in codegen::GLOBAL_BUILTIN_NAMES")
}

/// Parses `(module, exports) { <body> }` as a function literal by
/// re-lexing a small wrapper around the already-parsed source text, then
/// compiles a top-level script whose only statement assigns that function
/// into the reserved `__module_factory__` slot (see `factory_slot`).
fn wrap_as_factory(program: &crate::ast::Program, atoms: &mut AtomTable, name: &str) -> Result<Rc<CodeBlock>, CompileError> {
    // The module body is already a parsed `Program`; building a wrapper
    // program directly out of a synthesized function literal around the
    // already-parsed statements avoids re-lexing the source text a second
    // time just to get it inside a `function(module, exports) {...}` shell.
    let factory_atom = atoms.intern("__module_factory__");
    let module_atom = atoms.intern("module");
    let exports_atom = atoms.intern("exports");
    let wrapper = crate::ast::Program {
        body: vec![crate::ast::Stmt::Expr(crate::ast::Expr::Assign {
            op: crate::ast::AssignOp::Assign,
            target: Box::new(crate::ast::Expr::Identifier(factory_atom)),
            value: Box::new(crate::ast::Expr::Function(Box::new(crate::ast::FunctionLiteral {
                name: None,
                params: vec![module_atom, exports_atom],
                rest_param: false,
                body: program.body.clone(),
                is_arrow: false,
            }))),
        })],
    };
    compile_program(atoms, &wrapper, name)
}

fn agent_error_no_loader(agent: &mut Agent, name: &str) -> Value {
    agent.make_error(crate::error::ErrorKind::Internal, &format!("no module loader registered for '{name}'"))
}

fn agent_compile_error(agent: &mut Agent, e: &CompileError) -> Value {
    agent.make_syntax_error(&e.to_string())
}

fn agent_internal_error(agent: &mut Agent, message: &str) -> Value {
    agent.make_internal_error(message)
}
