//! `emjs_vm`: an embeddable subset-of-ECMAScript execution engine.
//!
//! A tagged 16-byte [`value::Value`] representation, a hand-rolled
//! lexer/parser/bytecode compiler (`lexer`/`token`/`parser`/`ast` ->
//! `codegen`), a register/index-addressed bytecode VM (`opcode`/`vm`/
//! `frame`), and a minimal object model with a property protocol
//! (`object`/`property`/`array`/`flathash`) and builtin surface
//! (`builtin`). [`embedding::Vm`] is the host-facing entry point — see
//! its module docs for the compile/bind/start/invoke flow.

pub mod agent;
pub mod arena;
pub mod array;
pub mod ast;
pub mod atom;
pub mod builtin;
pub mod codegen;
pub mod embedding;
pub mod error;
pub mod flathash;
pub mod frame;
pub mod function;
pub mod lexer;
pub mod microtask;
pub mod module_loader;
pub mod object;
pub mod opcode;
pub mod parser;
pub mod property;
pub mod realm;
pub mod scope;
pub mod string;
pub mod token;
pub mod value;
pub mod vm;

pub use agent::Agent;
pub use embedding::{Script, Vm, VmOptions};
pub use error::{CompileError, ErrorKind, JsResult, ThrowCompletion};
pub use module_loader::ModuleLoader;
pub use value::Value;
