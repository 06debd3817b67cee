//! The stack-based interpreter.

mod native;

use thiserror::Error;

use crate::chunk::OpCode;
use crate::compiler::{self, CompileError};
use crate::gc::{Gc, GcRoots};
use crate::object::{GcRef, ObjClosure, UpvalueState};
use crate::table::Table;
use crate::value::Value;

/// `FRAMES_MAX * 256`, matching the relationship between call depth and
/// stack depth the distilled design fixes.
const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * 256;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("Operand must be a number.")]
    OperandMustBeNumber,
    #[error("Operands must be two numbers or two strings.")]
    AddTypeMismatch,
    #[error("Undefined variable '{0}'.")]
    UndefinedGlobal(String),
    #[error("Can only call functions and classes.")]
    NotCallable,
    #[error("Expected {expected} arguments but got {got}.")]
    ArityMismatch { expected: u8, got: u8 },
    #[error("Stack overflow.")]
    StackOverflow,
}

/// A runtime error plus the call-stack trace captured when it was raised.
///
/// Each trace entry carries its own frame's line, since every enclosing
/// frame's `ip` points at a different call site.
#[derive(Debug, Clone)]
pub struct RuntimeFailure {
    pub error: RuntimeError,
    pub trace: Vec<(u32, String)>,
}

impl std::fmt::Display for RuntimeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.error)?;
        for (line, frame) in &self.trace {
            writeln!(f, "[line {line}] in {frame}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum InterpretError {
    #[error("compile error")]
    Compile(Vec<CompileError>),
    #[error("{0}")]
    Runtime(RuntimeFailure),
}

struct CallFrame {
    closure: GcRef,
    ip: usize,
    slots_base: usize,
}

/// Owned VM state: no process-global singletons, `Vm` is passed around (or
/// simply owned) by whatever drives it — the CLI binary or a test harness.
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    open_upvalues: Vec<GcRef>,
    globals: Table,
    gc: Gc,
}

impl GcRoots for Vm {
    fn mark_roots(&self, gc: &mut Gc) {
        for value in &self.stack {
            gc.mark_value(*value);
        }
        for frame in &self.frames {
            gc.mark_object(frame.closure);
        }
        for upvalue in &self.open_upvalues {
            gc.mark_object(*upvalue);
        }
        for (key, value) in self.globals.iter() {
            gc.mark_object(key);
            gc.mark_value(value);
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    #[must_use]
    pub fn new() -> Self {
        let mut vm = Self {
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(FRAMES_MAX),
            open_upvalues: Vec::new(),
            globals: Table::new(),
            gc: Gc::new(),
        };
        native::install(&mut vm);
        vm
    }

    pub(crate) fn define_native(&mut self, name: &'static str, arity: u8, func: crate::object::NativeFn) {
        let func_ref = self.gc.alloc_native(name, arity, func);
        let name_ref = self.gc.intern(name);
        self.globals.set(name_ref, Value::Obj(func_ref));
    }

    /// Compiles and runs `source` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`InterpretError::Compile`] for compile-time diagnostics or
    /// [`InterpretError::Runtime`] for a runtime failure (with a captured
    /// stack trace).
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = compiler::compile(source, &mut self.gc).map_err(InterpretError::Compile)?;
        let closure_ref = self.gc.alloc_closure(ObjClosure { function, upvalues: Vec::new() });
        self.stack.push(Value::Obj(closure_ref));
        self.frames.push(CallFrame { closure: closure_ref, ip: 0, slots_base: 0 });
        self.run().map_err(InterpretError::Runtime)
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("run() never executes with an empty frame stack")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("active frame");
        let closure = frame.closure.as_closure().expect("frame always holds a closure");
        let function = closure.function.as_function().expect("closure always holds a function");
        let byte = function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte() as usize;
        let frame = self.current_frame();
        let closure = frame.closure.as_closure().expect("frame always holds a closure");
        let function = closure.function.as_function().expect("closure always holds a function");
        function.chunk.constants[idx]
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("bytecode never pops an empty stack")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn runtime_error(&self, error: RuntimeError) -> RuntimeFailure {
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let closure = frame.closure.as_closure().expect("frame always holds a closure");
                let function = closure.function.as_function().expect("closure always holds a function");
                let line = function.chunk.lines[frame.ip.saturating_sub(1)];
                let name = function.name.and_then(|n| n.as_string().map(|s| format!("{}()", s.bytes))).unwrap_or_else(|| "script".to_string());
                (line, name)
            })
            .collect();
        RuntimeFailure { error, trace }
    }

    #[allow(clippy::too_many_lines)]
    fn run(&mut self) -> Result<(), RuntimeFailure> {
        loop {
            if self.gc.should_collect() {
                self.collect_garbage();
            }

            let op = OpCode::from_byte(self.read_byte()).expect("compiler only emits valid opcodes");
            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().slots_base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().slots_base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_constant();
                    let key = as_gc_string(name);
                    match self.globals.get(key) {
                        Some(v) => self.push(v),
                        None => {
                            let name_str = key.as_string().expect("global keys are strings").bytes.to_string();
                            return Err(self.runtime_error(RuntimeError::UndefinedGlobal(name_str)));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_constant();
                    let key = as_gc_string(name);
                    let value = self.pop();
                    self.globals.set(key, value);
                }
                OpCode::SetGlobal => {
                    let name = self.read_constant();
                    let key = as_gc_string(name);
                    let value = self.peek(0);
                    if self.globals.set(key, value) {
                        self.globals.delete(key);
                        let name_str = key.as_string().expect("global keys are strings").bytes.to_string();
                        return Err(self.runtime_error(RuntimeError::UndefinedGlobal(name_str)));
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = self.current_closure_upvalue(slot);
                    self.push(self.read_upvalue(upvalue));
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let upvalue = self.current_closure_upvalue(slot);
                    let value = self.peek(0);
                    self.write_upvalue(upvalue, value);
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.binary_compare(|a, b| a > b)?,
                OpCode::Less => self.binary_compare(|a, b| a < b)?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_numeric(|a, b| a - b)?,
                OpCode::Multiply => self.binary_numeric(|a, b| a * b)?,
                OpCode::Divide => self.binary_numeric(|a, b| a / b)?,
                OpCode::Negate => {
                    let value = self.peek(0);
                    let Some(n) = value.as_number() else {
                        return Err(self.runtime_error(RuntimeError::OperandMustBeNumber));
                    };
                    self.pop();
                    self.push(Value::Number(-n));
                }
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Print => {
                    let value = self.pop();
                    println!("{value}");
                }
                OpCode::Jump => {
                    let offset = self.read_short();
                    self.frames.last_mut().expect("active frame").ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short();
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().expect("active frame").ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short();
                    self.frames.last_mut().expect("active frame").ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte();
                    self.call_value(argc)?;
                }
                OpCode::Closure => {
                    let function_value = self.read_constant();
                    let function_ref = as_gc_obj(function_value);
                    let function = function_ref.as_function().expect("OP_CLOSURE operand is a function constant");
                    let upvalue_count = function.upvalue_count;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        if is_local {
                            let base = self.current_frame().slots_base;
                            upvalues.push(self.capture_upvalue(base + index));
                        } else {
                            let enclosing = self.current_frame().closure;
                            let enclosing_closure = enclosing.as_closure().expect("enclosing frame holds a closure");
                            upvalues.push(enclosing_closure.upvalues[index]);
                        }
                    }
                    let closure_ref = self.gc.alloc_closure(ObjClosure { function: function_ref, upvalues });
                    self.push(Value::Obj(closure_ref));
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Class => {
                    let name_value = self.read_constant();
                    let name_ref = as_gc_obj(name_value);
                    let class_ref = self.gc.alloc_class(name_ref);
                    self.push(Value::Obj(class_ref));
                }
                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("return always happens inside a frame");
                    self.close_upvalues(frame.slots_base);
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(frame.slots_base);
                    self.push(result);
                }
            }
        }
    }

    fn current_closure_upvalue(&self, slot: usize) -> GcRef {
        let closure = self.current_frame().closure.as_closure().expect("frame always holds a closure");
        closure.upvalues[slot]
    }

    fn read_upvalue(&self, upvalue: GcRef) -> Value {
        // SAFETY: single-threaded, no other borrow of this upvalue is live.
        match unsafe { upvalue.upvalue_mut() }.state {
            UpvalueState::Open(slot) => self.stack[slot],
            UpvalueState::Closed(v) => v,
        }
    }

    fn write_upvalue(&mut self, upvalue: GcRef, value: Value) {
        // SAFETY: single-threaded, no other borrow of this upvalue is live.
        let state = &mut unsafe { upvalue.upvalue_mut() }.state;
        match *state {
            UpvalueState::Open(slot) => self.stack[slot] = value,
            UpvalueState::Closed(_) => *state = UpvalueState::Closed(value),
        }
    }

    /// Finds or creates the open upvalue for `slot`, keeping
    /// `open_upvalues` sorted by descending stack slot so a shared capture
    /// resolves to one object no matter how many closures reference it.
    fn capture_upvalue(&mut self, slot: usize) -> GcRef {
        let mut insert_at = self.open_upvalues.len();
        for (i, existing) in self.open_upvalues.iter().enumerate() {
            let existing_slot = match unsafe { existing.upvalue_mut() }.state {
                UpvalueState::Open(s) => s,
                UpvalueState::Closed(_) => continue,
            };
            if existing_slot == slot {
                return *existing;
            }
            if existing_slot < slot {
                insert_at = i;
                break;
            }
        }
        let created = self.gc.alloc_upvalue(slot);
        self.open_upvalues.insert(insert_at, created);
        created
    }

    fn close_upvalues(&mut self, from_slot: usize) {
        while let Some(&last) = self.open_upvalues.last() {
            let slot = match unsafe { last.upvalue_mut() }.state {
                UpvalueState::Open(s) => s,
                UpvalueState::Closed(_) => {
                    self.open_upvalues.pop();
                    continue;
                }
            };
            if slot < from_slot {
                break;
            }
            let value = self.stack[slot];
            unsafe { last.upvalue_mut() }.state = UpvalueState::Closed(value);
            self.open_upvalues.pop();
        }
    }

    fn call_value(&mut self, argc: u8) -> Result<(), RuntimeFailure> {
        let callee = self.peek(argc as usize);
        let Value::Obj(obj) = callee else {
            return Err(self.runtime_error(RuntimeError::NotCallable));
        };
        if let Some(closure) = obj.as_closure() {
            let function = closure.function.as_function().expect("closure function slot");
            if function.arity != argc {
                return Err(self.runtime_error(RuntimeError::ArityMismatch { expected: function.arity, got: argc }));
            }
            if self.frames.len() >= FRAMES_MAX {
                return Err(self.runtime_error(RuntimeError::StackOverflow));
            }
            let slots_base = self.stack.len() - argc as usize - 1;
            self.frames.push(CallFrame { closure: obj, ip: 0, slots_base });
            Ok(())
        } else if let Some(native) = obj.as_native() {
            if native.arity != argc {
                return Err(self.runtime_error(RuntimeError::ArityMismatch { expected: native.arity, got: argc }));
            }
            let args_start = self.stack.len() - argc as usize;
            let args: Vec<Value> = self.stack[args_start..].to_vec();
            let result = (native.function)(&args).unwrap_or(Value::Nil);
            self.stack.truncate(args_start - 1);
            self.push(result);
            Ok(())
        } else {
            Err(self.runtime_error(RuntimeError::NotCallable))
        }
    }

    fn binary_numeric(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeFailure> {
        let (Some(b), Some(a)) = (self.peek(0).as_number(), self.peek(1).as_number()) else {
            return Err(self.runtime_error(RuntimeError::OperandMustBeNumber));
        };
        self.pop();
        self.pop();
        self.push(Value::Number(op(a, b)));
        Ok(())
    }

    fn binary_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeFailure> {
        let (Some(b), Some(a)) = (self.peek(0).as_number(), self.peek(1).as_number()) else {
            return Err(self.runtime_error(RuntimeError::OperandMustBeNumber));
        };
        self.pop();
        self.pop();
        self.push(Value::Bool(op(a, b)));
        Ok(())
    }

    fn add(&mut self) -> Result<(), RuntimeFailure> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(_), Value::Number(_)) => self.binary_numeric(|a, b| a + b),
            (Value::Obj(a), Value::Obj(b)) if a.as_string().is_some() && b.as_string().is_some() => {
                let b = self.pop();
                let a = self.pop();
                let concatenated = format!("{}{}", a.as_string().expect("checked above"), b.as_string().expect("checked above"));
                let interned = self.gc.intern(&concatenated);
                self.push(Value::Obj(interned));
                Ok(())
            }
            _ => Err(self.runtime_error(RuntimeError::AddTypeMismatch)),
        }
    }
}

impl Vm {
    /// Runs a collection cycle. `self.gc` is temporarily swapped out so the
    /// borrow checker can see that marking roots (`&self`, including the
    /// now-default `self.gc`) and collecting (`&mut gc`) never alias.
    fn collect_garbage(&mut self) {
        let mut gc = std::mem::take(&mut self.gc);
        gc.collect_garbage(self);
        self.gc = gc;
    }
}

fn as_gc_string(value: Value) -> GcRef {
    match value {
        Value::Obj(o) if o.as_string().is_some() => o,
        _ => unreachable!("compiler only emits string constants for identifier operands"),
    }
}

fn as_gc_obj(value: Value) -> GcRef {
    match value {
        Value::Obj(o) => o,
        _ => unreachable!("compiler only emits object constants for this operand"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_expression_runs() {
        let mut vm = Vm::new();
        assert!(vm.interpret("print 1 + 2 * 3;").is_ok());
    }

    #[test]
    fn string_concatenation_runs() {
        let mut vm = Vm::new();
        assert!(vm.interpret("var a = \"foo\"; var b = \"bar\"; print a + b;").is_ok());
    }

    #[test]
    fn for_loop_accumulates() {
        let mut vm = Vm::new();
        assert!(vm.interpret("var x = 0; for (var i = 0; i < 5; i = i + 1) { x = x + i; } print x;").is_ok());
    }

    #[test]
    fn closures_capture_and_mutate_shared_state() {
        let mut vm = Vm::new();
        let src = "fun makeCounter(){ var n=0; fun inc(){ n=n+1; return n; } return inc; } \
                   var c = makeCounter(); print c(); print c(); print c();";
        assert!(vm.interpret(src).is_ok());
    }

    #[test]
    fn adding_number_and_string_is_a_runtime_error() {
        let mut vm = Vm::new();
        let result = vm.interpret("print 1 + \"a\";");
        assert!(matches!(result, Err(InterpretError::Runtime(_))));
    }

    #[test]
    fn calling_a_number_is_a_runtime_error() {
        let mut vm = Vm::new();
        let result = vm.interpret("var x = 1; x();");
        assert!(matches!(result, Err(InterpretError::Runtime(_))));
    }
}
