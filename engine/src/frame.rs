//! Call frames (spec §4.5 "Frames"): one `Frame` per `FUNCTION_CALL`/
//! `METHOD_CALL` in flight, pushed onto `Agent::frames` and popped on
//! `RETURN` or unwound on an uncaught `throw`.
//!
//! The teacher allocates frames from a single growable spare-stack region
//! of raw memory (`NativeFrame {size, previous, free, free_size, ...}`) so
//! that a JS frame's `local` table can hold pointers into that same block
//! and be relocated without copying. This engine has no raw memory region
//! to borrow slices from, so each frame owns its `locals`/`arguments` as
//! plain `Vec<Value>` arena-style — the bound on total call depth is
//! `Agent::max_frames` rather than a byte budget, but the externally
//! observable behavior (`RangeError("Maximum call stack size exceeded")`
//! once exhausted) is the same.

use std::rc::Rc;

use hashbrown::HashMap;

use crate::error::{JsResult, StackFrameInfo, ThrowCompletion};
use crate::function::{ClosureCellId, FunctionId};
use crate::opcode::CodeBlock;
use crate::value::Value;

/// A live `try` region (spec §4.5 "Exceptions"): pushed by `try_start`,
/// popped by `try_end` on the no-exception path, or consumed directly by the
/// unwind routine when a `throw` routes through it.
#[derive(Debug, Clone, Copy)]
pub struct TryHandler {
    pub catch_target: usize,
    pub finally_target: Option<usize>,
    pub exception_slot: crate::opcode::Operand,
}

/// One entry of `Agent::frames`. A native frame (`code: None`) has no
/// `locals`/`pc` of its own; it exists purely so stack traces and the
/// frame-stack invariant (spec §8.1) see it as a real frame.
pub struct Frame {
    pub function: Option<FunctionId>,
    pub function_name: String,
    pub code: Option<Rc<CodeBlock>>,
    pub pc: usize,
    pub locals: Vec<Value>,
    pub arguments: Vec<Value>,
    pub closure: Vec<ClosureCellId>,
    pub is_constructor: bool,
    pub is_native: bool,
    /// Active `try` regions, innermost last (spec §4.5 "Exceptions").
    pub try_stack: Vec<TryHandler>,
    /// Set when an unwind has just routed an exception to a handler with no
    /// real `catch` clause; consulted by `rethrow_if_pending` once any
    /// `finally` for that handler has run. Cleared by `Catch`.
    pub rethrow_pending: bool,
    /// Set by `vm::route_return_through_finally` when a `return` executed
    /// inside a `try` has just been routed into that try's `finally` block
    /// (spec §4.3: "`finally retval` runs the finally block with ... a
    /// pending return captured in `retval`; the VM ... re-returns after the
    /// block ends"). Consulted and cleared at `FinallyEnd`, which either
    /// resumes the return (routing it through any further enclosing
    /// `finally`) or, once no enclosing `try` remains, actually returns.
    pub pending_return: Option<Value>,
    pub line: u32,
    /// Local slots promoted to heap cells because a nested lambda captured
    /// them (spec §3.6): once a slot is in this map every further read/write
    /// of it, in this frame, goes through the cell instead of `locals`.
    pub promoted_locals: HashMap<u32, ClosureCellId>,
    /// Same promotion, for parameters captured by a nested lambda (`Args`
    /// scope) — e.g. `function outer(x) { return function() { return x } }`.
    pub promoted_args: HashMap<u32, ClosureCellId>,
}

impl Frame {
    pub fn new_js(function: FunctionId, function_name: String, code: Rc<CodeBlock>, nlocal: u32, arguments: Vec<Value>, closure: Vec<ClosureCellId>, is_constructor: bool) -> Self {
        Self {
            function: Some(function),
            function_name,
            code: Some(code),
            pc: 0,
            locals: vec![Value::Undefined; nlocal as usize],
            arguments,
            closure,
            is_constructor,
            is_native: false,
            try_stack: Vec::new(),
            rethrow_pending: false,
            pending_return: None,
            line: 0,
            promoted_locals: HashMap::new(),
            promoted_args: HashMap::new(),
        }
    }

    /// The top-level script frame (spec §4.5): no owning function object,
    /// `this` is `undefined`, and every declared binding resolves to
    /// `Global` scope rather than `locals` (see `scope.rs::ScopeTree::new`).
    pub fn new_global(code: Rc<CodeBlock>) -> Self {
        Self {
            function: None,
            function_name: "<module>".to_string(),
            code: Some(code),
            pc: 0,
            locals: Vec::new(),
            arguments: vec![Value::Undefined],
            closure: Vec::new(),
            is_constructor: false,
            is_native: false,
            try_stack: Vec::new(),
            rethrow_pending: false,
            pending_return: None,
            line: 0,
            promoted_locals: HashMap::new(),
            promoted_args: HashMap::new(),
        }
    }

    pub fn new_native(function_name: String, arguments: Vec<Value>) -> Self {
        Self {
            function: None,
            function_name,
            code: None,
            pc: 0,
            locals: Vec::new(),
            arguments,
            closure: Vec::new(),
            is_constructor: false,
            is_native: true,
            try_stack: Vec::new(),
            rethrow_pending: false,
            pending_return: None,
            line: 0,
            promoted_locals: HashMap::new(),
            promoted_args: HashMap::new(),
        }
    }

    /// Projects this frame into the small record `format_stack_trace`
    /// consumes (spec §4.5 "Stack attaching").
    pub fn stack_info(&self) -> StackFrameInfo {
        StackFrameInfo {
            function_name: self.function_name.clone(),
            file: self.code.as_ref().map(|c| c.file.clone()).unwrap_or_default(),
            line: self.line,
            native: self.is_native,
        }
    }
}

/// Pushes `frame` onto the agent's call stack, enforcing `max_frames`
/// (spec §4.5: "when it is full a call returns
/// `RangeError(\"Maximum call stack size exceeded\")`").
pub fn push_frame(agent: &mut crate::agent::Agent, frame: Frame) -> JsResult<()> {
    if agent.frames.len() >= agent.max_frames {
        let err = agent.make_range_error("Maximum call stack size exceeded");
        return Err(ThrowCompletion(err));
    }
    let native = frame.is_native;
    agent.frames.push(frame);
    agent.trace(crate::agent::TraceEvent::Call { depth: agent.frames.len(), native });
    Ok(())
}

pub fn pop_frame(agent: &mut crate::agent::Agent) -> Option<Frame> {
    let frame = agent.frames.pop();
    if frame.is_some() {
        agent.trace(crate::agent::TraceEvent::Return { depth: agent.frames.len() });
    }
    frame
}

/// Builds the multi-line `stack` string for an `Error`-kind object that
/// doesn't have one yet (spec §4.5 "Stack attaching"): walks the frame
/// chain from innermost to outermost.
pub fn capture_stack_trace(agent: &crate::agent::Agent) -> String {
    let infos: Vec<StackFrameInfo> = agent.frames.iter().rev().map(Frame::stack_info).collect();
    crate::error::format_stack_trace(&infos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;

    #[test]
    fn push_frame_respects_max_frames() {
        let mut agent = Agent::new();
        agent.max_frames = 2;
        assert!(push_frame(&mut agent, Frame::new_native("a".into(), vec![])).is_ok());
        assert!(push_frame(&mut agent, Frame::new_native("b".into(), vec![])).is_ok());
        let err = push_frame(&mut agent, Frame::new_native("c".into(), vec![]));
        assert!(err.is_err());
    }

    #[test]
    fn capture_stack_trace_orders_innermost_first() {
        let mut agent = Agent::new();
        push_frame(&mut agent, Frame::new_native("outer".into(), vec![])).unwrap();
        push_frame(&mut agent, Frame::new_native("inner".into(), vec![])).unwrap();
        let trace = capture_stack_trace(&agent);
        let outer_pos = trace.find("outer").unwrap();
        let inner_pos = trace.find("inner").unwrap();
        assert!(inner_pos < outer_pos);
    }
}
