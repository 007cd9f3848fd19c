//! The single-pass compiler: a Pratt precedence parser that emits bytecode
//! directly into the current function's chunk. There is no syntax tree; the
//! parser pulls tokens from the scanner and the code generator runs inline
//! with parsing.

use std::io::Write;

use crate::config::RuntimeConfig;
use crate::vm::debug;
use crate::vm::{Chunk, FunObj, Heap, ObjRef, OpCode, Value};

use super::scanner::{Scanner, Token, TokenKind};

/// Maximum locals per function, including the reserved slot 0.
const MAX_LOCALS: usize = 256;

/// Depth given to a local between declaration and initialization. Reading a
/// local at this depth means its own initializer mentions it.
const UNINITIALIZED: i32 = -1;

/// Expression precedence, lowest to highest. The Pratt loop keeps consuming
/// infix operators while their precedence is at least the requested level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn = for<'src, 'ctx> fn(&mut Compiler<'src, 'ctx>, bool);

#[derive(Clone, Copy)]
struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

/// The static parse table: prefix handler, infix handler, and infix
/// precedence per token kind.
fn parse_rule(kind: TokenKind) -> ParseRule {
    use TokenKind::*;

    fn rule(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> ParseRule {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }

    match kind {
        LeftParen => rule(
            Some(|c, can| c.grouping(can)),
            Some(|c, can| c.call(can)),
            Precedence::Call,
        ),
        Minus => rule(
            Some(|c, can| c.unary(can)),
            Some(|c, can| c.binary(can)),
            Precedence::Term,
        ),
        Plus => rule(None, Some(|c, can| c.binary(can)), Precedence::Term),
        Slash | Star => rule(None, Some(|c, can| c.binary(can)), Precedence::Factor),
        Bang => rule(Some(|c, can| c.unary(can)), None, Precedence::None),
        BangEqual | EqualEqual => rule(None, Some(|c, can| c.binary(can)), Precedence::Equality),
        Greater | GreaterEqual | Less | LessEqual => {
            rule(None, Some(|c, can| c.binary(can)), Precedence::Comparison)
        }
        Identifier => rule(Some(|c, can| c.variable(can)), None, Precedence::None),
        Str => rule(Some(|c, can| c.string(can)), None, Precedence::None),
        Number => rule(Some(|c, can| c.number(can)), None, Precedence::None),
        And => rule(None, Some(|c, can| c.and_op(can)), Precedence::And),
        Or => rule(None, Some(|c, can| c.or_op(can)), Precedence::Or),
        False | Nil | True => rule(Some(|c, can| c.literal(can)), None, Precedence::None),
        _ => rule(None, None, Precedence::None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
}

/// A local variable: its name token and the depth of the scope that declared
/// it. The slot index is the position in the locals array, which by
/// construction equals the stack offset from the frame base.
struct Local {
    name: Token,
    depth: i32,
}

/// Per-function compilation state. Contexts stack up as nested function
/// declarations open and close; the innermost one receives all emission.
struct FunctionContext {
    function: FunObj,
    kind: FunctionKind,
    locals: Vec<Local>,
    scope_depth: i32,
}

pub struct Compiler<'src, 'ctx> {
    scanner: Scanner<'src>,
    source: &'src str,
    heap: &'ctx mut Heap,
    diagnostics: &'ctx mut dyn Write,
    print_code: bool,
    current: Token,
    previous: Token,
    had_error: bool,
    panic_mode: bool,
    contexts: Vec<FunctionContext>,
}

/// Compile `source` to a top-level function. Diagnostics go to
/// `diagnostics` as they are found; `None` means at least one error was
/// reported and no function was produced.
pub fn compile(
    source: &str,
    heap: &mut Heap,
    config: &RuntimeConfig,
    diagnostics: &mut dyn Write,
) -> Option<ObjRef> {
    let mut compiler = Compiler {
        scanner: Scanner::new(source),
        source,
        heap,
        diagnostics,
        print_code: config.print_code,
        current: Token::empty(),
        previous: Token::empty(),
        had_error: false,
        panic_mode: false,
        contexts: Vec::new(),
    };

    compiler.push_context(FunctionKind::Script);
    compiler.advance();
    while !compiler.match_kind(TokenKind::Eof) {
        compiler.declaration();
    }
    let function = compiler.end_context();

    if compiler.had_error {
        None
    } else {
        Some(compiler.heap.alloc_function(function))
    }
}

impl<'src, 'ctx> Compiler<'src, 'ctx> {
    // ========================================
    // Function contexts
    // ========================================

    fn push_context(&mut self, kind: FunctionKind) {
        let name = match kind {
            FunctionKind::Script => None,
            FunctionKind::Function => {
                let source = self.source;
                Some(self.heap.intern(self.previous.lexeme(source)))
            }
        };
        let mut locals = Vec::with_capacity(8);
        // Slot 0 holds the function value itself.
        locals.push(Local {
            name: Token::empty(),
            depth: 0,
        });
        self.contexts.push(FunctionContext {
            function: FunObj::new(name),
            kind,
            locals,
            scope_depth: 0,
        });
    }

    fn end_context(&mut self) -> FunObj {
        self.emit_return();
        let context = self.contexts.pop().unwrap();
        if self.print_code && !self.had_error {
            let name = match context.function.name {
                Some(r) => self.heap.string(r).chars.to_string(),
                None => "script".to_string(),
            };
            let listing = debug::disassemble_chunk(&context.function.chunk, self.heap, &name);
            let _ = write!(self.diagnostics, "{}", listing);
        }
        context.function
    }

    fn ctx(&self) -> &FunctionContext {
        self.contexts.last().unwrap()
    }

    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.contexts.last_mut().unwrap().function.chunk
    }

    // ========================================
    // Token plumbing
    // ========================================

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            match self.current.kind {
                TokenKind::Error(message) => self.error_at_current(message),
                _ => break,
            }
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    // ========================================
    // Declarations and statements
    // ========================================

    fn declaration(&mut self) {
        if self.match_kind(TokenKind::Fun) {
            self.function_declaration();
        } else if self.match_kind(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn function_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // A function may refer to itself; it is initialized as soon as its
        // name is bound.
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn function(&mut self, kind: FunctionKind) {
        self.push_context(kind);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.contexts.last_mut().unwrap().function.arity += 1;
                if self.ctx().function.arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        // No end_scope: the whole context goes away with the function.
        let function = self.end_context();
        let handle = self.heap.alloc_function(function);
        let constant = self.make_constant(Value::Obj(handle));
        self.emit_bytes(OpCode::Constant as u8, constant);
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_kind(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn statement(&mut self) {
        if self.match_kind(TokenKind::Print) {
            self.print_statement();
        } else if self.match_kind(TokenKind::If) {
            self.if_statement();
        } else if self.match_kind(TokenKind::Return) {
            self.return_statement();
        } else if self.match_kind(TokenKind::While) {
            self.while_statement();
        } else if self.match_kind(TokenKind::For) {
            self.for_statement();
        } else if self.match_kind(TokenKind::LeftBrace) {
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

    fn return_statement(&mut self) {
        if self.ctx().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_kind(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.match_kind(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().code.len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_kind(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_kind(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().code.len();
        let mut exit_jump = None;
        if !self.match_kind(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_kind(TokenKind::RightParen) {
            // The increment runs after the body, so jump over it now and
            // loop back to it from the body's end.
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().code.len();
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

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    /// Skip forward to a statement boundary after an error, so one mistake
    /// does not cascade into a report per token.
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
                _ => {}
            }
            self.advance();
        }
    }

    // ========================================
    // Scopes and variables
    // ========================================

    fn begin_scope(&mut self) {
        self.contexts.last_mut().unwrap().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let context = self.contexts.last_mut().unwrap();
        context.scope_depth -= 1;
        let depth = context.scope_depth;
        let mut pops = 0;
        while context.locals.last().is_some_and(|l| l.depth > depth) {
            context.locals.pop();
            pops += 1;
        }
        for _ in 0..pops {
            self.emit_op(OpCode::Pop);
        }
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.ctx().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous)
    }

    fn declare_variable(&mut self) {
        if self.ctx().scope_depth == 0 {
            return;
        }
        let name = self.previous;
        let mut already_declared = false;
        let context = self.contexts.last().unwrap();
        for local in context.locals.iter().rev() {
            if local.depth != UNINITIALIZED && local.depth < context.scope_depth {
                break;
            }
            if identifiers_equal(self.source, &name, &local.name) {
                already_declared = true;
                break;
            }
        }
        if already_declared {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: Token) {
        if self.ctx().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.contexts.last_mut().unwrap().locals.push(Local {
            name,
            depth: UNINITIALIZED,
        });
    }

    fn mark_initialized(&mut self) {
        let context = self.contexts.last_mut().unwrap();
        let depth = context.scope_depth;
        if depth == 0 {
            return;
        }
        if let Some(local) = context.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.ctx().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(OpCode::DefineGlobal as u8, global);
    }

    /// Walk the locals array back to front so the innermost declaration
    /// shadows outer ones. A miss means the name is a global.
    fn resolve_local(&mut self, name: Token) -> Option<u8> {
        let mut uninitialized = false;
        let mut slot = None;
        let context = self.contexts.last().unwrap();
        for (i, local) in context.locals.iter().enumerate().rev() {
            if identifiers_equal(self.source, &name, &local.name) {
                uninitialized = local.depth == UNINITIALIZED;
                slot = Some(i as u8);
                break;
            }
        }
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        slot
    }

    fn identifier_constant(&mut self, name: Token) -> u8 {
        let source = self.source;
        let handle = self.heap.intern(name.lexeme(source));
        self.make_constant(Value::Obj(handle))
    }

    fn named_variable(&mut self, name: Token, can_assign: bool) {
        let (get_op, set_op, arg) = match self.resolve_local(name) {
            Some(slot) => (OpCode::GetLocal, OpCode::SetLocal, slot),
            None => (
                OpCode::GetGlobal,
                OpCode::SetGlobal,
                self.identifier_constant(name),
            ),
        };
        if can_assign && self.match_kind(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op as u8, arg);
        } else {
            self.emit_bytes(get_op as u8, arg);
        }
    }

    // ========================================
    // Expressions
    // ========================================

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = parse_rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        // Only the lowest levels may treat a trailing '=' as assignment;
        // prefix handlers check this before consuming it.
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= parse_rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = parse_rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_kind(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_bytes(OpCode::Call as u8, arg_count);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count.min(255) as u8
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => {}
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(parse_rule(operator).precedence.next());
        match operator {
            TokenKind::BangEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => {}
        }
    }

    /// `and` short-circuits: if the left side is falsey it stays on the
    /// stack as the result and the right side is skipped.
    fn and_op(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_op(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn number(&mut self, _can_assign: bool) {
        let source = self.source;
        match self.previous.lexeme(source).parse::<f64>() {
            Ok(value) => self.emit_constant(Value::Number(value)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self, _can_assign: bool) {
        let source = self.source;
        let token = self.previous;
        // Strip the surrounding quotes.
        let chars = &source[token.start + 1..token.start + token.length - 1];
        let handle = self.heap.intern(chars);
        self.emit_constant(Value::Obj(handle));
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => {}
        }
    }

    // ========================================
    // Emission
    // ========================================

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk().write(byte, line);
    }

    fn emit_bytes(&mut self, byte1: u8, byte2: u8) {
        self.emit_byte(byte1);
        self.emit_byte(byte2);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_ops(&mut self, op1: OpCode, op2: OpCode) {
        self.emit_byte(op1 as u8);
        self.emit_byte(op2 as u8);
    }

    fn emit_return(&mut self) {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit_bytes(OpCode::Constant as u8, constant);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.current_chunk().add_constant(value);
        if index > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    /// Emit a jump with a placeholder offset and return the offset's
    /// position for later patching.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().code.len() - 2
    }

    /// Back-patch a forward jump to land on the next instruction to be
    /// emitted. Offsets are 16-bit big-endian.
    fn patch_jump(&mut self, offset: usize) {
        // -2 accounts for the operand bytes of the jump itself.
        let jump = self.current_chunk().code.len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let bytes = (jump as u16).to_be_bytes();
        let chunk = self.current_chunk();
        chunk.code[offset] = bytes[0];
        chunk.code[offset + 1] = bytes[1];
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.current_chunk().code.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let bytes = (offset as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    // ========================================
    // Error reporting
    // ========================================

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let _ = write!(self.diagnostics, "Error [line {}],", token.line);
        match token.kind {
            TokenKind::Eof => {
                let _ = write!(self.diagnostics, " at end");
            }
            // The lexeme of an error token is its diagnostic, not source.
            TokenKind::Error(_) => {}
            _ => {
                let _ = write!(self.diagnostics, " at '{}'", token.lexeme(self.source));
            }
        }
        let _ = writeln!(self.diagnostics, ": {}", message);
        self.had_error = true;
    }
}

fn identifiers_equal(source: &str, a: &Token, b: &Token) -> bool {
    a.lexeme(source) == b.lexeme(source)
}
