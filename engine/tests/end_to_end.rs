//! End-to-end scripts exercised through the public [`emjs_vm::Vm`] surface
//! rather than any single internal module, covering recursion, property
//! ordering around delete/reinsert, try/catch/finally unwinding, closure
//! capture across calls, tagged template literals, and typed-array
//! set/slice.
//!
//! `Vm::start` runs a top-level script to completion but (per
//! `vm.rs::run_script`'s own doc) never surfaces its last expression's
//! value — every scenario below assigns its result into a `result` global
//! bound before compiling, then reads it back with `Vm::value`.

use emjs_vm::{Value, Vm, VmOptions};

fn run_and_read(source: &str) -> Value {
    let mut vm = Vm::new(VmOptions::default());
    vm.bind("result", Value::Undefined, true);
    let script = vm.compile(source, "test.js").expect("compile");
    vm.start(&script).expect("run");
    vm.value("result").expect("read back result")
}

#[test]
fn fibonacci_recursion() {
    let result = run_and_read("function f(n){ return n<2?n:f(n-1)+f(n-2); } result = f(10);");
    assert_eq!(result.as_number(), Some(55.0));
}

#[test]
fn property_order_survives_delete_and_reinsert() {
    let mut vm = Vm::new(VmOptions::default());
    vm.bind("result", Value::Undefined, true);
    let script = vm
        .compile(
            "var o = {a:1,b:2,c:3}; delete o.b; o.b = 2; result = Object.keys(o).join(\",\");",
            "test.js",
        )
        .expect("compile");
    vm.start(&script).expect("run");
    let result = vm.value("result").expect("read back result");
    assert_eq!(vm.value_to_string(result), "a,c,b");
}

#[test]
fn try_catch_finally_propagation() {
    let mut vm = Vm::new(VmOptions::default());
    vm.bind("result", Value::Undefined, true);
    let script = vm
        .compile(
            "var log=[]; \
             try { try { throw 1; } finally { log.push(\"f1\"); } } \
             catch(e){ log.push(\"c\"+e); } \
             result = log.join(\",\");",
            "test.js",
        )
        .expect("compile");
    vm.start(&script).expect("run");
    let result = vm.value("result").expect("read back result");
    assert_eq!(vm.value_to_string(result), "f1,c1");
}

#[test]
fn closure_captures_across_calls_after_the_declaring_call_returns() {
    let result = run_and_read("function mk(){ var x=1; return function(){ return ++x; }; } var g=mk(); g(); g(); result = g();");
    assert_eq!(result.as_number(), Some(4.0));
}

#[test]
fn tagged_template_literal_receives_cooked_parts_and_substitutions() {
    let mut vm = Vm::new(VmOptions::default());
    vm.bind("result", Value::Undefined, true);
    let script = vm
        .compile(
            "function t(parts, a, b){ return parts[0]+\"<\"+a+\">\"+parts[1]+\"<\"+b+\">\"+parts[2]; } \
             result = t`x=${1+2} y=${\"z\"}!`;",
            "test.js",
        )
        .expect("compile");
    vm.start(&script).expect("run");
    let result = vm.value("result").expect("read back result");
    assert_eq!(vm.value_to_string(result), "x=<3> y=<z>!");
}

#[test]
fn typed_array_set_and_slice_round_trip_through_array_from() {
    let mut vm = Vm::new(VmOptions::default());
    vm.bind("result", Value::Undefined, true);
    let script = vm
        .compile(
            "var a = new Uint8Array([1,2,3,4,5]); a.set([9], 2); result = Array.from(a.slice(1,4));",
            "test.js",
        )
        .expect("compile");
    vm.start(&script).expect("run");
    let result = vm.value("result").expect("read back result");
    let Value::Array(id) = result else {
        panic!("expected an array, got {result:?}");
    };
    let elements: Vec<f64> = vm.agent.heap.arrays.get(id).elements().iter().map(|v| v.as_number().unwrap()).collect();
    assert_eq!(elements, vec![2.0, 9.0, 4.0]);
}
