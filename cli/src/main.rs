//! `emjs_cli`: a thin front door onto the `emjs_vm` embedding API. Kept at
//! the same scale the teacher's `nova_cli` keeps its own `eval` subcommand —
//! this is a smoke-test harness and worked example of `Vm::compile`/
//! `Vm::start`, not a module-resolution policy or a REPL.

use clap::{Parser as ClapParser, Subcommand};
use emjs_vm::agent::TraceEvent;
use emjs_vm::{Vm, VmOptions};

#[derive(Debug, ClapParser)]
#[command(name = "emjs")]
#[command(about = "Embeddable subset-of-ECMAScript execution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compiles and runs a script file, printing the value of a trailing
    /// `result` global if the script assigned one.
    #[command(arg_required_else_help = true)]
    Eval {
        path: String,
        /// Maximum call-stack depth before `RangeError` (`VmOptions::max_stack_size`).
        #[arg(long, default_value_t = VmOptions::default().max_stack_size)]
        max_stack_size: usize,
        /// Disables strict-mode-by-default parsing (`VmOptions::strict_mode_default`).
        #[arg(long, default_value_t = false)]
        no_strict: bool,
    },
}

fn main() {
    env_logger::init();

    let args = Cli::parse();
    match args.command {
        Command::Eval { path, max_stack_size, no_strict } => {
            if let Err(code) = eval(&path, max_stack_size, !no_strict) {
                std::process::exit(code);
            }
        }
    }
}

fn eval(path: &str, max_stack_size: usize, strict_mode_default: bool) -> Result<(), i32> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        log::error!("cannot read {path}: {e}");
        1
    })?;

    let opts = VmOptions { max_stack_size, strict_mode_default, ..VmOptions::default() };
    let mut vm = Vm::new(opts);
    vm.bind("result", emjs_vm::Value::Undefined, true);
    vm.agent.set_trace_hook(|event| match event {
        TraceEvent::Call { depth, native } => log::trace!("call depth={depth} native={native}"),
        TraceEvent::Return { depth } => log::trace!("return depth={depth}"),
        TraceEvent::Throw(_) => log::debug!("throw"),
    });

    let script = vm.compile(&source, path).map_err(|e| {
        log::error!("{e}");
        1
    })?;

    if vm.start(&script).is_err() {
        eprintln!("{}", vm.exception_string());
        return Err(1);
    }

    if let Ok(result) = vm.value("result") {
        println!("{}", vm.value_dump(result));
    }
    Ok(())
}
