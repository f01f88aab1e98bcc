//! Error model (spec §7): the typed error kind taxonomy, stack-trace
//! capture on throw, and the two-track fallibility split the ambient stack
//! calls for (`SPEC_FULL.md` §1 Added / Errors): `JsResult<T>` for
//! interpreter-internal fallibility, where a thrown value is data the VM
//! passes around, and `thiserror`-derived `CompileError` for parse-time
//! fallibility, which is an ordinary Rust error crossing the `Vm::compile`
//! API boundary.

use crate::value::Value;

/// A pending JS exception, carried as the payload of a thrown `Value`
/// rather than a Rust `Error` impl — spec §7: "Inside the interpreter a
/// raised error is stored on `vm.exception`".
#[derive(Debug, Clone, Copy)]
pub struct ThrowCompletion(pub Value);

pub type JsResult<T> = Result<T, ThrowCompletion>;

/// The error kind taxonomy (spec §7) — a classification, not necessarily
/// distinct Rust types; each kind maps to one constructor/prototype pair in
/// `builtin::error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Reference,
    Type,
    Range,
    Uri,
    Eval,
    Internal,
    /// A fixed, non-extensible singleton (spec §7), not a constructible
    /// class like the others.
    Memory,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Range => "RangeError",
            ErrorKind::Uri => "URIError",
            ErrorKind::Eval => "EvalError",
            ErrorKind::Internal => "InternalError",
            ErrorKind::Memory => "MemoryError",
        }
    }
}

/// `"<name>: <message>"` user-visible formatting (spec §7), with the
/// degenerate cases when either half is empty.
pub fn format_error_display(name: &str, message: &str) -> String {
    match (name.is_empty(), message.is_empty()) {
        (false, false) => format!("{name}: {message}"),
        (false, true) => name.to_string(),
        (true, false) => message.to_string(),
        (true, true) => String::new(),
    }
}

/// One entry of a captured call stack (spec §7 "stack property").
#[derive(Debug, Clone)]
pub struct StackFrameInfo {
    pub function_name: String,
    pub file: String,
    pub line: u32,
    pub native: bool,
}

/// Formats a multi-line stack trace, collapsing consecutive duplicate
/// frames into `"... (repeats N times)"` (spec §4.5 "Stack attaching").
pub fn format_stack_trace(frames: &[StackFrameInfo]) -> String {
    let mut out = String::new();
    let mut i = 0;
    while i < frames.len() {
        let frame = &frames[i];
        let mut run = 1;
        while i + run < frames.len() && frames_equal(frame, &frames[i + run]) {
            run += 1;
        }
        let location = if frame.native {
            "(native)".to_string()
        } else {
            format!("({}:{})", frame.file, frame.line)
        };
        if run > 1 {
            out.push_str(&format!("    at {} {} (repeats {} times)\n", frame.function_name, location, run));
        } else {
            out.push_str(&format!("    at {} {}\n", frame.function_name, location));
        }
        i += run;
    }
    out
}

fn frames_equal(a: &StackFrameInfo, b: &StackFrameInfo) -> bool {
    a.function_name == b.function_name && a.file == b.file && a.line == b.line && a.native == b.native
}

/// Parse-time diagnostics crossing the `Vm::compile` API boundary — a
/// `thiserror` leaf enum, not a thrown `Value` (spec §1 Added / Errors).
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("SyntaxError: {message} ({file}:{line})")]
    Syntax { message: String, file: String, line: u32 },
    #[error("SyntaxError: unterminated string ({file}:{line})")]
    UnterminatedString { file: String, line: u32 },
    #[error("SyntaxError: illegal token {text:?} ({file}:{line})")]
    Illegal { text: String, file: String, line: u32 },
}

impl CompileError {
    pub fn line(&self) -> u32 {
        match self {
            CompileError::Syntax { line, .. } => *line,
            CompileError::UnterminatedString { line, .. } => *line,
            CompileError::Illegal { line, .. } => *line,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formatting_degenerate_cases() {
        assert_eq!(format_error_display("TypeError", "boom"), "TypeError: boom");
        assert_eq!(format_error_display("TypeError", ""), "TypeError");
        assert_eq!(format_error_display("", "boom"), "boom");
        assert_eq!(format_error_display("", ""), "");
    }

    #[test]
    fn stack_trace_collapses_repeats() {
        let frame = StackFrameInfo {
            function_name: "f".into(),
            file: "main.js".into(),
            line: 3,
            native: false,
        };
        let frames = vec![frame.clone(), frame.clone(), frame.clone()];
        let trace = format_stack_trace(&frames);
        assert_eq!(trace, "    at f (main.js:3) (repeats 3 times)\n");
    }

    #[test]
    fn stack_trace_labels_native_frames() {
        let frames = vec![StackFrameInfo {
            function_name: "parseInt".into(),
            file: String::new(),
            line: 0,
            native: true,
        }];
        assert_eq!(format_stack_trace(&frames), "    at parseInt (native)\n");
    }
}
