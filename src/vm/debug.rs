//! Bytecode disassembler backing the `--dump` and `--trace` diagnostics.

use super::chunk::Chunk;
use super::heap::Heap;
use super::ops::OpCode;
use std::fmt::Write;

/// Disassemble a whole chunk under a `== name ==` header.
pub fn disassemble_chunk(chunk: &Chunk, heap: &Heap, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ==", name);
    let mut offset = 0;
    while offset < chunk.code.len() {
        let (text, next) = disassemble_instruction(chunk, heap, offset);
        out.push_str(&text);
        offset = next;
    }
    out
}

/// Disassemble the instruction at `offset`. Returns the rendered line and
/// the offset of the next instruction.
pub fn disassemble_instruction(chunk: &Chunk, heap: &Heap, offset: usize) -> (String, usize) {
    let mut out = String::new();
    let _ = write!(out, "{:04} ", offset);
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        out.push_str("   | ");
    } else {
        let _ = write!(out, "{:4} ", chunk.lines[offset]);
    }

    let byte = chunk.code[offset];
    let Some(op) = OpCode::from_byte(byte) else {
        let _ = writeln!(out, "Unknown opcode {}", byte);
        return (out, offset + 1);
    };
    let name = format!("Op{:?}", op);

    let next = match op {
        OpCode::Constant | OpCode::DefineGlobal | OpCode::GetGlobal | OpCode::SetGlobal => {
            constant_instruction(&mut out, &name, chunk, heap, offset)
        }
        OpCode::GetLocal | OpCode::SetLocal | OpCode::Call => {
            byte_instruction(&mut out, &name, chunk, offset)
        }
        OpCode::Jump | OpCode::JumpFalse => jump_instruction(&mut out, &name, 1, chunk, offset),
        OpCode::Loop => jump_instruction(&mut out, &name, -1, chunk, offset),
        _ => simple_instruction(&mut out, &name, offset),
    };
    (out, next)
}

fn simple_instruction(out: &mut String, name: &str, offset: usize) -> usize {
    let _ = writeln!(out, "{}", name);
    offset + 1
}

fn constant_instruction(
    out: &mut String,
    name: &str,
    chunk: &Chunk,
    heap: &Heap,
    offset: usize,
) -> usize {
    let constant = chunk.code[offset + 1];
    let _ = writeln!(
        out,
        "{:<16} {:4} '{}'",
        name,
        constant,
        chunk.constants[constant as usize].display(heap)
    );
    offset + 2
}

fn byte_instruction(out: &mut String, name: &str, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    let _ = writeln!(out, "{:<16} {:4}", name, slot);
    offset + 2
}

fn jump_instruction(out: &mut String, name: &str, sign: isize, chunk: &Chunk, offset: usize) -> usize {
    let jump = u16::from_be_bytes([chunk.code[offset + 1], chunk.code[offset + 2]]);
    let target = offset as isize + 3 + sign * jump as isize;
    let _ = writeln!(out, "{:<16} {:4} -> {}", name, offset, target);
    offset + 3
}
