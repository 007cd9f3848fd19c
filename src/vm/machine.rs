//! The bytecode virtual machine: a stack of call frames over one shared
//! value stack, dispatching one opcode at a time.

use std::io::{self, Write};

use thiserror::Error;

use crate::compiler;
use crate::config::RuntimeConfig;

use super::debug;
use super::heap::Heap;
use super::object::{Obj, ObjRef};
use super::ops::OpCode;
use super::table::Table;
use super::value::Value;

/// Maximum number of simultaneously active call frames.
pub const FRAMES_MAX: usize = 64;

/// Value-stack slots reserved up front: one frame's worth of locals per
/// possible frame.
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// The two failure domains of `interpret`. The human-readable diagnostics
/// have already been written to the VM's error stream by the time one of
/// these is returned.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InterpretError {
    #[error("compile error")]
    Compile,
    #[error("runtime error")]
    Runtime,
}

/// One active invocation: the callee, its instruction pointer, and the base
/// of its window into the shared value stack. Slot 0 of the window is the
/// function itself; parameters and locals follow.
struct CallFrame {
    function: ObjRef,
    ip: usize,
    base: usize,
}

pub struct VM {
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    heap: Heap,
    globals: Table,
    config: RuntimeConfig,
    output: Box<dyn Write>,
    error_output: Box<dyn Write>,
}

enum ControlFlow {
    Continue,
    Halt,
}

impl VM {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_streams(config, Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// Create a VM with custom output streams. Program output (`print`) goes
    /// to `output`; diagnostics, traces, and disassembly go to
    /// `error_output`.
    pub fn with_streams(
        config: RuntimeConfig,
        output: Box<dyn Write>,
        error_output: Box<dyn Write>,
    ) -> Self {
        VM {
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: Vec::with_capacity(STACK_MAX),
            heap: Heap::new(),
            globals: Table::new(),
            config,
            output,
            error_output,
        }
    }

    /// Compile and execute one program.
    ///
    /// The heap, interned strings, and globals persist across calls, which
    /// is what keeps a REPL session stateful; scanner and compiler state are
    /// fresh on every call.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let function = match compiler::compile(
            source,
            &mut self.heap,
            &self.config,
            &mut *self.error_output,
        ) {
            Some(function) => function,
            None => return Err(InterpretError::Compile),
        };

        self.stack.push(Value::Obj(function));
        // Synthesize the top-level call: the script function with zero
        // arguments.
        if let Err(message) = self.call_value(Value::Obj(function), 0) {
            self.report_runtime_error(&message);
            return Err(InterpretError::Runtime);
        }
        match self.run() {
            Ok(()) => Ok(()),
            Err(message) => {
                self.report_runtime_error(&message);
                Err(InterpretError::Runtime)
            }
        }
    }

    fn run(&mut self) -> Result<(), String> {
        loop {
            if self.config.trace_execution {
                self.trace_instruction();
            }
            match self.execute_op()? {
                ControlFlow::Continue => {}
                ControlFlow::Halt => return Ok(()),
            }
        }
    }

    fn execute_op(&mut self) -> Result<ControlFlow, String> {
        let op = self.read_op()?;
        match op {
            OpCode::Constant => {
                let value = self.read_constant();
                self.push(value);
            }
            OpCode::Nil => self.push(Value::Nil),
            OpCode::True => self.push(Value::Bool(true)),
            OpCode::False => self.push(Value::Bool(false)),
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::GetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.frame().base;
                let value = self.stack[base + slot];
                self.push(value);
            }
            OpCode::SetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.frame().base;
                // Assignment is an expression; the value stays on the stack.
                self.stack[base + slot] = self.peek(0);
            }
            OpCode::GetGlobal => {
                let name = self.read_string_constant();
                match self.globals.get(self.heap.objects(), name) {
                    Some(value) => self.push(value),
                    None => {
                        return Err(format!(
                            "Undefined variable '{}'.",
                            self.heap.string(name).chars
                        ));
                    }
                }
            }
            OpCode::DefineGlobal => {
                let name = self.read_string_constant();
                let value = self.peek(0);
                self.globals.set(self.heap.objects(), name, value);
                self.pop()?;
            }
            OpCode::SetGlobal => {
                let name = self.read_string_constant();
                let value = self.peek(0);
                if self.globals.set(self.heap.objects(), name, value) {
                    // Assignment must not create a global; undo and report.
                    self.globals.delete(self.heap.objects(), name);
                    return Err(format!(
                        "Undefined variable '{}'.",
                        self.heap.string(name).chars
                    ));
                }
            }
            OpCode::Equal => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a == b));
            }
            OpCode::Greater => self.binary_number_op(|a, b| Value::Bool(a > b))?,
            OpCode::Less => self.binary_number_op(|a, b| Value::Bool(a < b))?,
            OpCode::Add => self.add()?,
            OpCode::Subtract => self.binary_number_op(|a, b| Value::Number(a - b))?,
            OpCode::Multiply => self.binary_number_op(|a, b| Value::Number(a * b))?,
            OpCode::Divide => self.binary_number_op(|a, b| Value::Number(a / b))?,
            OpCode::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(value.is_falsey()));
            }
            OpCode::Negate => {
                let value = self.pop()?;
                match value.as_number() {
                    Some(n) => self.push(Value::Number(-n)),
                    None => return Err("Operand must be a number.".to_string()),
                }
            }
            OpCode::Print => {
                let value = self.pop()?;
                let text = value.display(&self.heap);
                let _ = writeln!(self.output, "{}", text);
            }
            OpCode::Jump => {
                let offset = self.read_short() as usize;
                self.frame_mut().ip += offset;
            }
            OpCode::JumpFalse => {
                let offset = self.read_short() as usize;
                // Leaves the condition on the stack; `and`/`or` rely on it.
                if self.peek(0).is_falsey() {
                    self.frame_mut().ip += offset;
                }
            }
            OpCode::Loop => {
                let offset = self.read_short() as usize;
                self.frame_mut().ip -= offset;
            }
            OpCode::Call => {
                let arg_count = self.read_byte() as usize;
                let callee = self.peek(arg_count);
                self.call_value(callee, arg_count)?;
            }
            OpCode::Return => {
                let result = self.pop()?;
                let frame = self.frames.pop().ok_or("no active call frame")?;
                if self.frames.is_empty() {
                    // Pop the top-level script function and halt.
                    self.pop()?;
                    return Ok(ControlFlow::Halt);
                }
                self.stack.truncate(frame.base);
                self.push(result);
            }
        }
        Ok(ControlFlow::Continue)
    }

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), String> {
        if let Value::Obj(r) = callee {
            if let Obj::Fun(function) = self.heap.get(r) {
                if arg_count != function.arity {
                    return Err(format!(
                        "Expected {} arguments but got {}.",
                        function.arity, arg_count
                    ));
                }
                if self.frames.len() == FRAMES_MAX {
                    return Err("Stack overflow.".to_string());
                }
                self.frames.push(CallFrame {
                    function: r,
                    ip: 0,
                    base: self.stack.len() - arg_count - 1,
                });
                return Ok(());
            }
        }
        Err("Can only call functions and classes.".to_string())
    }

    fn add(&mut self) -> Result<(), String> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => {
                self.push(Value::Number(a + b));
                Ok(())
            }
            (Value::Obj(a), Value::Obj(b)) => {
                let concatenated = match (self.heap.get(a), self.heap.get(b)) {
                    (Obj::Str(a), Obj::Str(b)) => format!("{}{}", a.chars, b.chars),
                    _ => return Err("Operands must be two numbers or two strings.".to_string()),
                };
                // The result is interned like any other string, so equality
                // stays handle identity.
                let handle = self.heap.intern(&concatenated);
                self.push(Value::Obj(handle));
                Ok(())
            }
            _ => Err("Operands must be two numbers or two strings.".to_string()),
        }
    }

    fn binary_number_op(&mut self, op: impl FnOnce(f64, f64) -> Value) -> Result<(), String> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a.as_number(), b.as_number()) {
            (Some(a), Some(b)) => {
                self.push(op(a, b));
                Ok(())
            }
            _ => Err("Operands must be numbers.".to_string()),
        }
    }

    // ========================================
    // Instruction stream access
    // ========================================

    fn frame(&self) -> &CallFrame {
        self.frames.last().unwrap()
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().unwrap()
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let function = self.heap.function(frame.function);
        let byte = function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let frame = self.frames.last_mut().unwrap();
        let function = self.heap.function(frame.function);
        let value = u16::from_be_bytes([
            function.chunk.code[frame.ip],
            function.chunk.code[frame.ip + 1],
        ]);
        frame.ip += 2;
        value
    }

    fn read_op(&mut self) -> Result<OpCode, String> {
        let byte = self.read_byte();
        OpCode::from_byte(byte).ok_or_else(|| format!("Unknown opcode {}.", byte))
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.frames.last().unwrap();
        self.heap.function(frame.function).chunk.constants[index]
    }

    fn read_string_constant(&mut self) -> ObjRef {
        match self.read_constant() {
            Value::Obj(r) => r,
            // The compiler only emits string handles as name constants.
            _ => unreachable!("name constant is not an object"),
        }
    }

    // ========================================
    // Value stack
    // ========================================

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, String> {
        self.stack.pop().ok_or_else(|| "stack underflow".to_string())
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // ========================================
    // Diagnostics
    // ========================================

    fn trace_instruction(&mut self) {
        let mut stack_line = String::from("          ");
        for value in &self.stack {
            stack_line.push('[');
            stack_line.push_str(&value.display(&self.heap));
            stack_line.push(']');
        }
        let _ = writeln!(self.error_output, "{}", stack_line);

        let frame = self.frames.last().unwrap();
        let function = self.heap.function(frame.function);
        let (text, _) = debug::disassemble_instruction(&function.chunk, &self.heap, frame.ip);
        let _ = write!(self.error_output, "{}", text);
    }

    /// Print the message and one `[line L] in ...` entry per live frame,
    /// innermost first, then clear the stacks.
    fn report_runtime_error(&mut self, message: &str) {
        let _ = writeln!(self.error_output, "{}", message);
        for frame in self.frames.iter().rev() {
            let function = self.heap.function(frame.function);
            // The per-byte line stream makes ip - 1 (the last byte consumed
            // for the active instruction) land on that instruction's line.
            let offset = frame.ip.saturating_sub(1);
            let line = function.chunk.lines.get(offset).copied().unwrap_or(0);
            match function.name {
                Some(name) => {
                    let _ = writeln!(
                        self.error_output,
                        "[line {}] in {}()",
                        line,
                        self.heap.string(name).chars
                    );
                }
                None => {
                    let _ = writeln!(self.error_output, "[line {}] in script", line);
                }
            }
        }
        self.reset_stack();
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
    }
}

impl Default for VM {
    fn default() -> Self {
        VM::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    fn vm_with_buffers(config: RuntimeConfig) -> (VM, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        let vm = VM::with_streams(config, Box::new(out.clone()), Box::new(err.clone()));
        (vm, out, err)
    }

    fn run_with_config(
        source: &str,
        config: RuntimeConfig,
    ) -> (Result<(), InterpretError>, String, String) {
        let (mut vm, out, err) = vm_with_buffers(config);
        let result = vm.interpret(source);
        (result, out.contents(), err.contents())
    }

    fn run_program(source: &str) -> (Result<(), InterpretError>, String, String) {
        run_with_config(source, RuntimeConfig::default())
    }

    #[test]
    fn test_arithmetic_precedence() {
        let (result, stdout, _) = run_program("print 1 + 2 * 3;");
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "7\n");
    }

    #[test]
    fn test_grouping_overrides_precedence() {
        let (result, stdout, _) = run_program("print (1 + 2) * 3;");
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "9\n");
    }

    #[test]
    fn test_unary_and_comparison() {
        let (result, stdout, _) = run_program("print -3 < 2; print !nil; print 2 >= 2;");
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "true\ntrue\ntrue\n");
    }

    #[test]
    fn test_string_concatenation() {
        let (result, stdout, _) =
            run_program("var a = \"hi\"; var b = \" there\"; print a + b;");
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "hi there\n");
    }

    #[test]
    fn test_concatenation_result_is_interned() {
        let (result, stdout, _) = run_program("print \"a\" + \"b\" == \"ab\";");
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "true\n");
    }

    #[test]
    fn test_for_loop_accumulates() {
        let (result, stdout, _) = run_program(
            "var x = 0; for (var i = 0; i < 5; i = i + 1) { x = x + i; } print x;",
        );
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "10\n");
    }

    #[test]
    fn test_while_loop() {
        let (result, stdout, _) =
            run_program("var i = 0; while (i < 3) { print i; i = i + 1; }");
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "0\n1\n2\n");
    }

    #[test]
    fn test_if_else_branches() {
        let (result, stdout, _) =
            run_program("if (false) print 1; else print 2; if (true) print 3;");
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "2\n3\n");
    }

    #[test]
    fn test_and_or_short_circuit() {
        let (result, stdout, _) = run_program("print true and false; print nil or 7;");
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "false\n7\n");
    }

    #[test]
    fn test_scopes_and_shadowing() {
        let (result, stdout, _) =
            run_program("var a = 1; { var a = 2; print a; } print a;");
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "2\n1\n");
    }

    #[test]
    fn test_recursive_function() {
        let (result, stdout, _) = run_program(
            "fun fact(n) { if (n <= 1) return 1; return n * fact(n - 1); } print fact(5);",
        );
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "120\n");
    }

    #[test]
    fn test_nested_calls() {
        let (result, stdout, _) =
            run_program("fun sq(x) { return x * x; } print sq(sq(2));");
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "16\n");
    }

    #[test]
    fn test_function_without_return_yields_nil() {
        let (result, stdout, _) = run_program("fun f() {} print f();");
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "nil\n");
    }

    #[test]
    fn test_function_prints_as_name() {
        let (result, stdout, _) = run_program("fun f() {} print f;");
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "<fn f>\n");
    }

    #[test]
    fn test_add_type_mismatch_reports_line() {
        let (result, stdout, stderr) = run_program("print 1 + \"a\";");
        assert_eq!(result, Err(InterpretError::Runtime));
        assert_eq!(stdout, "");
        assert!(stderr.contains("Operands must be two numbers or two strings."));
        assert!(stderr.contains("[line 1] in script"));
    }

    #[test]
    fn test_runtime_error_walks_call_frames() {
        let source = "fun inner() { return 1 + nil; }\nfun outer() { return inner(); }\nouter();";
        let (result, _, stderr) = run_program(source);
        assert_eq!(result, Err(InterpretError::Runtime));
        assert!(stderr.contains("[line 1] in inner()"));
        assert!(stderr.contains("[line 2] in outer()"));
        assert!(stderr.contains("[line 3] in script"));
    }

    #[test]
    fn test_comparison_type_error() {
        let (result, _, stderr) = run_program("print 1 < \"two\";");
        assert_eq!(result, Err(InterpretError::Runtime));
        assert!(stderr.contains("Operands must be numbers."));
    }

    #[test]
    fn test_negate_type_error() {
        let (result, _, stderr) = run_program("print -\"s\";");
        assert_eq!(result, Err(InterpretError::Runtime));
        assert!(stderr.contains("Operand must be a number."));
    }

    #[test]
    fn test_undefined_global_read() {
        let (result, _, stderr) = run_program("print missing;");
        assert_eq!(result, Err(InterpretError::Runtime));
        assert!(stderr.contains("Undefined variable 'missing'."));
    }

    #[test]
    fn test_assignment_to_undefined_global() {
        let (result, _, stderr) = run_program("ghost = 1;");
        assert_eq!(result, Err(InterpretError::Runtime));
        assert!(stderr.contains("Undefined variable 'ghost'."));
    }

    #[test]
    fn test_assignment_rollback_leaves_global_undefined() {
        let (mut vm, _, err) = vm_with_buffers(RuntimeConfig::default());
        assert_eq!(vm.interpret("ghost = 1;"), Err(InterpretError::Runtime));
        assert_eq!(vm.interpret("print ghost;"), Err(InterpretError::Runtime));
        assert_eq!(err.contents().matches("Undefined variable 'ghost'.").count(), 2);
    }

    #[test]
    fn test_call_non_function() {
        let (result, _, stderr) = run_program("var x = 1; x();");
        assert_eq!(result, Err(InterpretError::Runtime));
        assert!(stderr.contains("Can only call functions and classes."));
    }

    #[test]
    fn test_arity_mismatch() {
        let (result, _, stderr) = run_program("fun f(a) {} f();");
        assert_eq!(result, Err(InterpretError::Runtime));
        assert!(stderr.contains("Expected 1 arguments but got 0."));
    }

    #[test]
    fn test_unbounded_recursion_overflows_frames() {
        let (result, _, stderr) = run_program("fun f() { f(); } f();");
        assert_eq!(result, Err(InterpretError::Runtime));
        assert!(stderr.contains("Stack overflow."));
    }

    #[test]
    fn test_compile_error_is_distinct_from_runtime() {
        let (result, _, stderr) = run_program("1 +;");
        assert_eq!(result, Err(InterpretError::Compile));
        assert!(stderr.contains("Error [line 1]"));
    }

    #[test]
    fn test_globals_persist_across_interprets() {
        let (mut vm, out, _) = vm_with_buffers(RuntimeConfig::default());
        assert_eq!(vm.interpret("var a = 41;"), Ok(()));
        assert_eq!(vm.interpret("a = a + 1;"), Ok(()));
        assert_eq!(vm.interpret("print a;"), Ok(()));
        assert_eq!(out.contents(), "42\n");
    }

    #[test]
    fn test_vm_recovers_after_runtime_error() {
        let (mut vm, out, _) = vm_with_buffers(RuntimeConfig::default());
        assert_eq!(vm.interpret("print 1 + nil;"), Err(InterpretError::Runtime));
        assert_eq!(vm.interpret("print 2;"), Ok(()));
        assert_eq!(out.contents(), "2\n");
    }

    #[test]
    fn test_trace_mode_disassembles_each_step() {
        let config = RuntimeConfig {
            trace_execution: true,
            print_code: false,
        };
        let (result, stdout, stderr) = run_with_config("print 1;", config);
        assert_eq!(result, Ok(()));
        assert_eq!(stdout, "1\n");
        assert!(stderr.contains("OpConstant"));
        assert!(stderr.contains("OpPrint"));
        assert!(stderr.contains("[<script>]"));
    }

    #[test]
    fn test_dump_mode_lists_each_function() {
        let config = RuntimeConfig {
            trace_execution: false,
            print_code: true,
        };
        let (result, _, stderr) = run_with_config("fun f() { return 1; } f();", config);
        assert_eq!(result, Ok(()));
        assert!(stderr.contains("== f =="));
        assert!(stderr.contains("== script =="));
    }

    // Statement templates used to assemble random programs.
    const STATEMENTS: [&str; 6] = [
        "print 1 + 2;",
        "var g = 3; g = g * 2;",
        "{ var inner = \"s\"; print inner; }",
        "if (1 < 2) print \"y\"; else print \"n\";",
        "for (var i = 0; i < 3; i = i + 1) { i; }",
        "fun ff(a) { return a; } print ff(9);",
    ];

    proptest! {
        // Every statement leaves the value stack where it found it, so any
        // whole program leaves it empty.
        #[test]
        fn stack_is_empty_after_any_statement_sequence(
            picks in proptest::collection::vec(0usize..STATEMENTS.len(), 1..12)
        ) {
            let source: String = picks
                .iter()
                .map(|&i| STATEMENTS[i])
                .collect::<Vec<_>>()
                .join("\n");
            let (mut vm, _, _) = vm_with_buffers(RuntimeConfig::default());
            prop_assert_eq!(vm.interpret(&source), Ok(()));
            prop_assert!(vm.stack.is_empty());
            prop_assert!(vm.frames.is_empty());
        }
    }
}
