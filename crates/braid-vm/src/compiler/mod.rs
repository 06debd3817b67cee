//! Single-pass Pratt compiler: turns a token stream directly into bytecode
//! with no intermediate AST.

mod rules;

use braid_lexer::{Scanner, Token, TokenKind};
use thiserror::Error;

use crate::chunk::{Chunk, ChunkError, OpCode};
use crate::gc::{Gc, GcRoots};
use crate::object::{GcRef, ObjFunction};
use crate::value::Value;
use rules::{Precedence, get_rule};

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

/// One compile-time diagnostic. Multiple may accumulate per compile because
/// the parser keeps going (in "panic mode") after the first error, so it
/// can report more than one mistake per pass.
#[derive(Debug, Clone, Error)]
#[error("[line {line}] Error{}: {message}", at_suffix(.at))]
pub struct CompileError {
    pub line: u32,
    pub at: String,
    pub message: String,
}

fn at_suffix(at: &str) -> String {
    if at.is_empty() { String::new() } else { format!(" at '{at}'") }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
}

struct Local<'src> {
    name: &'src str,
    depth: i32,
    is_captured: bool,
}

struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct FunctionScope<'src> {
    chunk: Chunk,
    name: Option<&'src str>,
    arity: u8,
    function_type: FunctionType,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl<'src> FunctionScope<'src> {
    fn new(function_type: FunctionType, name: Option<&'src str>) -> Self {
        // Slot 0 is reserved: the called closure itself (a `this`-style
        // sentinel for a future method-call convention).
        let locals = vec![Local { name: "", depth: 0, is_captured: false }];
        Self {
            chunk: Chunk::new(),
            name,
            arity: 0,
            function_type,
            locals,
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

/// Drives a single compile from source text to a finished top-level
/// function. Nested `fun` declarations push and pop [`FunctionScope`]s on
/// `scopes`, the Rust stand-in for the `enclosing`-pointer chain a
/// pointer-based host language would use.
pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    scopes: Vec<FunctionScope<'src>>,
    gc: &'src mut Gc,
}

impl GcRoots for Compiler<'_> {
    /// Roots the in-progress function of every scope on the stack, so a
    /// GC triggered mid-compile (e.g. while interning a string constant)
    /// does not reclaim a chunk still being built.
    fn mark_roots(&self, gc: &mut Gc) {
        for scope in &self.scopes {
            for constant in &scope.chunk.constants {
                gc.mark_value(*constant);
            }
        }
    }
}

impl<'src> Compiler<'src> {
    fn new(source: &'src str, gc: &'src mut Gc) -> Self {
        let mut scanner = Scanner::new(source);
        let first = scanner.scan_token();
        Self {
            scanner,
            previous: first,
            current: first,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            scopes: vec![FunctionScope::new(FunctionType::Script, None)],
            gc,
        }
    }

    fn scope(&mut self) -> &mut FunctionScope<'src> {
        self.scopes.last_mut().expect("at least the script scope is always present")
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.scope().chunk
    }

    fn line(&self) -> u32 {
        self.previous.line
    }

    // ---- token stream -----------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let at = if token.kind == TokenKind::Eof { "end".to_string() } else { token.lexeme.to_string() };
        tracing::error!(line = token.line, %at, message, "compile error");
        self.errors.push(CompileError { line: token.line, at, message: message.to_string() });
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // ---- bytecode emission -------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.line();
        self.chunk().write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.line();
        self.chunk().write_op(op, line);
    }

    fn emit_ops(&mut self, a: OpCode, b: u8) {
        self.emit_op(a);
        self.emit_byte(b);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        match self.chunk().add_constant(value) {
            Ok(idx) => idx,
            Err(ChunkError::ConstantPoolFull) => {
                self.error("Too many constants in one chunk.");
                0
            }
            Err(ChunkError::JumpTooFar) => unreachable!("add_constant never returns this"),
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_ops(OpCode::Constant, idx);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let interned = self.gc.intern(name);
        self.make_constant(Value::Obj(interned))
    }

    /// Emits a jump instruction with a placeholder 2-byte operand, returning
    /// the offset of the first placeholder byte for later patching.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk().code_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.chunk().code_len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        let bytes = (jump as u16).to_be_bytes();
        self.chunk().code[offset] = bytes[0];
        self.chunk().code[offset + 1] = bytes[1];
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk().code_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let bytes = (offset as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    // ---- scopes, locals, upvalues -------------------------------------

    fn begin_scope(&mut self) {
        self.scope().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope().scope_depth -= 1;
        let depth = self.scope().scope_depth;
        loop {
            let popped_captured = match self.scope().locals.last() {
                Some(local) if local.depth > depth => local.is_captured,
                _ => break,
            };
            self.scope().locals.pop();
            if popped_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    fn declare_variable(&mut self, name: &'src str) {
        if self.scope().scope_depth == 0 {
            return;
        }
        let depth = self.scope().scope_depth;
        let mut duplicate = false;
        for local in self.scope().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
            return;
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: &'src str) {
        if self.scope().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.scope().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn mark_initialized(&mut self) {
        if self.scope().scope_depth == 0 {
            return;
        }
        let depth = self.scope().scope_depth;
        self.scope().locals.last_mut().expect("a local was just declared").depth = depth;
    }

    fn resolve_local(scope: &FunctionScope<'src>, name: &str) -> Option<(usize, bool)> {
        for (i, local) in scope.locals.iter().enumerate().rev() {
            if local.name == name {
                return Some((i, local.depth == -1));
            }
        }
        None
    }

    /// Walks the enclosing-scope chain building an upvalue capture at each
    /// level, the same intermediate-function threading the distilled
    /// design describes.
    fn resolve_upvalue(&mut self, scope_idx: usize, name: &str) -> Option<u8> {
        if scope_idx == 0 {
            return None;
        }
        let enclosing_idx = scope_idx - 1;

        if let Some((local_idx, uninitialized)) = Self::resolve_local(&self.scopes[enclosing_idx], name) {
            if uninitialized {
                self.error("Can't read local variable in its own initializer.");
            }
            self.scopes[enclosing_idx].locals[local_idx].is_captured = true;
            return Some(self.add_upvalue(scope_idx, local_idx as u8, true));
        }

        if let Some(upvalue_idx) = self.resolve_upvalue(enclosing_idx, name) {
            return Some(self.add_upvalue(scope_idx, upvalue_idx, false));
        }

        None
    }

    fn add_upvalue(&mut self, scope_idx: usize, index: u8, is_local: bool) -> u8 {
        for (i, existing) in self.scopes[scope_idx].upvalues.iter().enumerate() {
            if existing.index == index && existing.is_local == is_local {
                return i as u8;
            }
        }
        if self.scopes[scope_idx].upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.scopes[scope_idx].upvalues.push(UpvalueDesc { index, is_local });
        (self.scopes[scope_idx].upvalues.len() - 1) as u8
    }

    // ---- expressions (Pratt parser) ------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = get_rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            let infix = get_rule(self.previous.kind).infix.expect("precedence table guarantees this");
            infix(self, can_assign);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().expect("scanner only yields valid numbers");
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let raw = self.previous.lexeme;
        let contents = &raw[1..raw.len() - 1];
        let interned = self.gc.intern(contents);
        self.emit_constant(Value::Obj(interned));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => unreachable!("literal() only called for false/nil/true"),
        }
    }

    fn unary(&mut self, _can_assign: bool) {
        let kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!("unary() only called for -/!"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let kind = self.previous.kind;
        let rule = get_rule(kind);
        self.parse_precedence(rule.precedence.next());
        match kind {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            _ => unreachable!("binary() only called for binary operators"),
        }
    }

    fn and(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_ops(OpCode::Call, argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u16 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme;
        self.named_variable(name, can_assign);
    }

    fn named_variable(&mut self, name: &'src str, can_assign: bool) {
        let scope_idx = self.scopes.len() - 1;
        let (get_op, set_op, arg) = if let Some((idx, _)) = Self::resolve_local(&self.scopes[scope_idx], name) {
            (OpCode::GetLocal, OpCode::SetLocal, idx as u8)
        } else if let Some(idx) = self.resolve_upvalue(scope_idx, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, idx)
        } else {
            let idx = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, idx)
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_ops(set_op, arg);
        } else {
            self.emit_ops(get_op, arg);
        }
    }

    // ---- statements ----------------------------------------------------

    fn declaration(&mut self) {
        if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn parse_variable(&mut self, message: &str) -> (&'src str, Option<u8>) {
        self.consume(TokenKind::Identifier, message);
        let name = self.previous.lexeme;
        self.declare_variable(name);
        if self.scope().scope_depth > 0 {
            return (name, None);
        }
        (name, Some(self.identifier_constant(name)))
    }

    fn define_variable(&mut self, global_idx: Option<u8>) {
        if self.scope().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        let idx = global_idx.expect("global scope always produces a constant index");
        self.emit_ops(OpCode::DefineGlobal, idx);
    }

    fn var_declaration(&mut self) {
        let (_, global) = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let (name, global) = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionType::Function, name);
        self.define_variable(global);
    }

    fn function(&mut self, function_type: FunctionType, name: &'src str) {
        self.scopes.push(FunctionScope::new(function_type, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let arity = self.scope().arity;
                if arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                self.scope().arity = arity.saturating_add(1);
                let (param_name, _) = self.parse_variable("Expect parameter name.");
                self.mark_initialized_by_name(param_name);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let mut finished = self.scopes.pop().expect("pushed above");
        if finished.chunk.code.last().copied() != Some(OpCode::Return.into()) {
            let line = self.previous.line;
            finished.chunk.write_op(OpCode::Nil, line);
            finished.chunk.write_op(OpCode::Return, line);
        }

        let upvalue_count = finished.upvalues.len();
        let function = ObjFunction {
            arity: finished.arity,
            upvalue_count,
            chunk: finished.chunk,
            name: Some(self.gc.intern(finished.name.unwrap_or(""))),
        };
        let func_ref = self.gc.alloc_function(function);
        let const_idx = self.make_constant(Value::Obj(func_ref));
        self.emit_ops(OpCode::Closure, const_idx);
        for upvalue in &finished.upvalues {
            self.emit_byte(u8::from(upvalue.is_local));
            self.emit_byte(upvalue.index);
        }
    }

    fn mark_initialized_by_name(&mut self, _name: &str) {
        // Parameters are always local to the function scope being parsed.
        self.mark_initialized();
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let name = self.previous.lexeme;
        let name_const = self.identifier_constant(name);
        self.declare_variable(name);
        self.emit_ops(OpCode::Class, name_const);
        self.define_variable(if self.scope().scope_depth > 0 { None } else { Some(name_const) });

        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().code_len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.matches(TokenKind::Semicolon) {
            // no initializer
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().code_len();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk().code_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.scope().function_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_op(OpCode::Nil);
            self.emit_op(OpCode::Return);
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }
}

/// Compiles `source` to a top-level function ready for the VM to wrap in a
/// closure and run.
///
/// # Errors
///
/// Returns every diagnostic collected during the pass (there may be more
/// than one: parsing resynchronizes at statement boundaries rather than
/// aborting on the first error).
pub fn compile<'src>(source: &'src str, gc: &'src mut Gc) -> Result<GcRef, Vec<CompileError>> {
    let mut compiler = Compiler::new(source, gc);
    compiler.advance();
    while !compiler.check(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.consume(TokenKind::Eof, "Expect end of expression.");

    let script = compiler.scopes.pop().expect("script scope always present");
    if compiler.had_error {
        return Err(compiler.errors);
    }

    let mut chunk = script.chunk;
    if chunk.code.last().copied() != Some(OpCode::Return.into()) {
        chunk.write_op(OpCode::Nil, compiler.previous.line);
        chunk.write_op(OpCode::Return, compiler.previous.line);
    }

    let function = ObjFunction { arity: 0, upvalue_count: 0, chunk, name: None };
    Ok(compiler.gc.alloc_function(function))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_simple_arithmetic() {
        let mut gc = Gc::new();
        let result = compile("print 1 + 2 * 3;", &mut gc);
        assert!(result.is_ok());
    }

    #[test]
    fn rejects_invalid_assignment_target() {
        let mut gc = Gc::new();
        let result = compile("var a = 1; var b = 2; a * b = 3;", &mut gc);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_top_level_return() {
        let mut gc = Gc::new();
        let result = compile("return 1;", &mut gc);
        assert!(result.is_err());
    }

    #[test]
    fn reports_multiple_errors_in_one_pass() {
        let mut gc = Gc::new();
        let result = compile("print ; print ;", &mut gc);
        let errs = result.expect_err("both print statements are missing expressions");
        assert_eq!(errs.len(), 2);
    }
}
