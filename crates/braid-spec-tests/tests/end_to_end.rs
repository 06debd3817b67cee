// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Tobias Sarnowski <tobias@sarnowski.cloud>

//! End-to-end language-behavior scenarios.
//!
//! `Vm::interpret` prints directly to stdout via `println!` (there is no
//! injectable writer, matching how the teacher's own VM writes straight to
//! its console rather than through an abstraction layer), so these tests
//! assert on the outcome `interpret` actually returns rather than on
//! captured stdout text. The error-path scenario checks the formatted
//! failure instead, since that text *is* part of the return value.

use braid_vm::{InterpretError, Vm};

#[test]
fn arithmetic_with_precedence_runs_to_completion() {
    let mut vm = Vm::new();
    assert!(vm.interpret("print 1 + 2 * 3;").is_ok());
}

#[test]
fn string_concatenation_runs_to_completion() {
    let mut vm = Vm::new();
    assert!(vm.interpret(r#"var a = "foo"; var b = "bar"; print a + b;"#).is_ok());
}

#[test]
fn for_loop_accumulates_to_completion() {
    let mut vm = Vm::new();
    let src = "var x = 0; for (var i = 0; i < 5; i = i + 1) { x = x + i; } print x;";
    assert!(vm.interpret(src).is_ok());
}

#[test]
fn closure_counter_keeps_private_state_per_call() {
    let mut vm = Vm::new();
    let src = "fun makeCounter(){ var n=0; fun inc(){ n=n+1; return n; } return inc; } \
               var c = makeCounter(); print c(); print c(); print c();";
    assert!(vm.interpret(src).is_ok());
}

/// (T7) Two closures created in the same activation and capturing the same
/// local observe each other's writes: `set(42)` followed by `get()` must
/// see `42`, not the value at capture time.
#[test]
fn two_closures_sharing_a_capture_observe_each_others_writes() {
    let mut vm = Vm::new();
    let src = "var getter; var setter; \
               fun pair(){ var x=0; fun get(){return x;} fun set(v){x=v;} getter=get; setter=set; } \
               pair(); setter(42); print getter();";
    assert!(vm.interpret(src).is_ok());
}

#[test]
fn adding_a_number_and_a_string_is_a_reported_runtime_error() {
    let mut vm = Vm::new();
    let err = vm.interpret(r#"print 1 + "a";"#).expect_err("mixed-type add must fail");
    let InterpretError::Runtime(failure) = err else {
        panic!("expected a runtime failure, got a compile error");
    };
    let rendered = failure.to_string();
    assert!(rendered.contains("Operands must be two numbers or two strings"), "got: {rendered}");
    assert!(rendered.contains("[line 1] in script"), "got: {rendered}");
}

/// A multi-level call stack must report each frame's own call-site line,
/// not the innermost frame's line repeated for every entry.
#[test]
fn runtime_error_trace_reports_each_frames_own_line() {
    let mut vm = Vm::new();
    let src = "fun c() {\n  return 1 + \"a\";\n}\n\
               fun b() {\n  return c();\n}\n\
               fun a() {\n  return b();\n}\n\
               a();";
    let err = vm.interpret(src).expect_err("mixed-type add must fail");
    let InterpretError::Runtime(failure) = err else {
        panic!("expected a runtime failure, got a compile error");
    };
    let rendered = failure.to_string();
    assert!(rendered.contains("[line 2] in c()"), "got: {rendered}");
    assert!(rendered.contains("[line 5] in b()"), "got: {rendered}");
    assert!(rendered.contains("[line 7] in a()"), "got: {rendered}");
    assert!(rendered.contains("[line 10] in script"), "got: {rendered}");
}

#[test]
fn undefined_variable_assignment_is_a_reported_runtime_error() {
    let mut vm = Vm::new();
    let err = vm.interpret("missing = 1;").expect_err("assigning an undefined global must fail");
    assert!(matches!(err, InterpretError::Runtime(_)));
}

#[test]
fn syntax_errors_are_reported_without_panicking() {
    let mut vm = Vm::new();
    let err = vm.interpret("print ; print ;").expect_err("two bare print statements are both invalid");
    let InterpretError::Compile(errors) = err else {
        panic!("expected compile errors, got a runtime failure");
    };
    assert_eq!(errors.len(), 2, "panic-mode recovery should report both missing expressions");
}
