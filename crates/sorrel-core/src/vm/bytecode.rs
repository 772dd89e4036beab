use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::Error;
use crate::value::Value;

/// Opcode set. Instructions are one byte, optionally followed by a 32-bit
/// little-endian operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// no effect
    Nop = 0,
    /// push `consts[idx]`
    Ldc = 1,
    /// push `args[idx]`
    Lda = 2,
    /// invoke the callee at depth `arity` with the `arity` values above it
    Inv = 3,
    /// pop the top value and return it
    Ret = 4,
    /// pop; add the offset to `ip` when truthy
    Brt = 5,
    /// pop; add the offset to `ip` when falsy
    Brf = 6,
    /// add the offset to `ip`
    Jmp = 7,
    /// discard the top value
    Pop = 8,
    /// save the top value, drop `n` beneath it, push it back
    Pon = 9,
    /// push a copy of the value at depth `n` (0 = top)
    Dpn = 10,
    /// pop value, pop var, set the var's root, push the var back
    Stv = 11,
    /// replace the var on top with its root value
    Ldv = 12,
    /// push `captured[idx]`
    Ldk = 13,
    /// pop a value and extend the closure beneath it with it
    Pak = 14,
}

impl Op {
    pub fn from_byte(byte: u8) -> Option<Op> {
        Some(match byte {
            0 => Op::Nop,
            1 => Op::Ldc,
            2 => Op::Lda,
            3 => Op::Inv,
            4 => Op::Ret,
            5 => Op::Brt,
            6 => Op::Brf,
            7 => Op::Jmp,
            8 => Op::Pop,
            9 => Op::Pon,
            10 => Op::Dpn,
            11 => Op::Stv,
            12 => Op::Ldv,
            13 => Op::Ldk,
            14 => Op::Pak,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Nop => "NOP",
            Op::Ldc => "LDC",
            Op::Lda => "LDA",
            Op::Inv => "INV",
            Op::Ret => "RET",
            Op::Brt => "BRT",
            Op::Brf => "BRF",
            Op::Jmp => "JMP",
            Op::Pop => "POP",
            Op::Pon => "PON",
            Op::Dpn => "DPN",
            Op::Stv => "STV",
            Op::Ldv => "LDV",
            Op::Ldk => "LDK",
            Op::Pak => "PAK",
        }
    }

    pub fn has_operand(self) -> bool {
        matches!(
            self,
            Op::Ldc | Op::Lda | Op::Inv | Op::Brt | Op::Brf | Op::Jmp | Op::Pon | Op::Dpn | Op::Ldk
        )
    }
}

/// Immutable-after-compile unit of executable code: bytecode stream,
/// constant pool, maximum operand-stack depth and (for function bodies) the
/// parameter count.
#[derive(Clone, Debug, Default)]
pub struct Chunk {
    code: Vec<u8>,
    consts: Vec<Value>,
    max_stack: usize,
    params: usize,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn emit(&mut self, op: Op) {
        self.code.push(op as u8);
    }

    pub fn emit_u32(&mut self, operand: u32) {
        self.code.extend_from_slice(&operand.to_le_bytes());
    }

    pub fn emit_with(&mut self, op: Op, operand: u32) {
        self.emit(op);
        self.emit_u32(operand);
    }

    /// Overwrite the 32-bit operand at `addr`. Used for jump back-patching;
    /// the compiler only patches addresses it has emitted.
    pub fn patch_u32(&mut self, addr: usize, value: u32) {
        self.code[addr..addr + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn fetch(&self, ip: usize) -> Result<u8, Error> {
        self.code
            .get(ip)
            .copied()
            .ok_or_else(|| Error::execution("bytecode fetch out of bounds"))
    }

    pub fn fetch_u32(&self, ip: usize) -> Result<u32, Error> {
        let bytes = self
            .code
            .get(ip..ip + 4)
            .ok_or_else(|| Error::execution("bytecode wide fetch out of bounds"))?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn fetch_i32(&self, ip: usize) -> Result<i32, Error> {
        self.fetch_u32(ip).map(|raw| raw as i32)
    }

    pub fn add_const(&mut self, value: Value) -> usize {
        let idx = self.consts.len();
        self.consts.push(value);
        idx
    }

    pub fn const_at(&self, idx: usize) -> Option<&Value> {
        self.consts.get(idx)
    }

    pub fn consts(&self) -> &[Value] {
        &self.consts
    }

    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    pub fn set_max_stack(&mut self, max: usize) {
        self.max_stack = max;
    }

    pub fn params(&self) -> usize {
        self.params
    }

    pub fn set_params(&mut self, params: usize) {
        self.params = params;
    }

    /// Human-readable dump of the constant pool and instruction stream.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        out.push_str("consts:\n");
        for (i, value) in self.consts.iter().enumerate() {
            let _ = writeln!(out, "  [{}] = {}", i, value);
        }
        out.push_str("code:\n");
        let mut ip = 0;
        while ip < self.code.len() {
            match Op::from_byte(self.code[ip]) {
                Some(op) if op.has_operand() => {
                    let operand = self.fetch_i32(ip + 1).unwrap_or(0);
                    let _ = writeln!(out, "  {:4}: {} {}", ip, op.mnemonic(), operand);
                    ip += 5;
                }
                Some(op) => {
                    let _ = writeln!(out, "  {:4}: {}", ip, op.mnemonic());
                    ip += 1;
                }
                None => {
                    let _ = writeln!(out, "  {:4}: ??? ({})", ip, self.code[ip]);
                    ip += 1;
                }
            }
        }
        out
    }
}

/// A compiled function value: a shared chunk plus the ordered capture list.
/// Arity lives with the chunk.
#[derive(Clone, Debug)]
pub struct Func {
    chunk: Arc<Chunk>,
    captured: Vec<Value>,
    name: Option<Arc<str>>,
}

impl Func {
    pub fn new(chunk: Arc<Chunk>) -> Self {
        Self {
            chunk,
            captured: Vec::new(),
            name: None,
        }
    }

    pub fn named(chunk: Arc<Chunk>, name: impl AsRef<str>) -> Self {
        Self {
            chunk,
            captured: Vec::new(),
            name: Some(Arc::from(name.as_ref())),
        }
    }

    pub fn chunk(&self) -> &Arc<Chunk> {
        &self.chunk
    }

    pub fn captured(&self) -> &[Value] {
        self.captured.as_slice()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn arity(&self) -> usize {
        self.chunk.params()
    }

    /// A new closure instance whose capture list extends this one. Closure
    /// construction must not mutate the prototype stored in a constant
    /// pool, so PAK builds instances instead of appending in place.
    pub fn extended(&self, value: Value) -> Func {
        let mut captured = self.captured.clone();
        captured.push(value);
        Func {
            chunk: self.chunk.clone(),
            captured,
            name: self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_and_fetch_round_trip() {
        let mut chunk = Chunk::new();
        chunk.emit_with(Op::Ldc, 7);
        chunk.emit(Op::Ret);
        assert_eq!(chunk.len(), 6);
        assert_eq!(chunk.fetch(0).unwrap(), Op::Ldc as u8);
        assert_eq!(chunk.fetch_u32(1).unwrap(), 7);
        assert_eq!(chunk.fetch(5).unwrap(), Op::Ret as u8);
        assert!(chunk.fetch(6).is_err());
        assert!(chunk.fetch_u32(3).is_err());
    }

    #[test]
    fn patching_rewrites_operands() {
        let mut chunk = Chunk::new();
        chunk.emit_with(Op::Jmp, 0);
        chunk.patch_u32(1, 42);
        assert_eq!(chunk.fetch_u32(1).unwrap(), 42);
    }

    #[test]
    fn negative_offsets_survive_encoding() {
        let mut chunk = Chunk::new();
        chunk.emit_with(Op::Jmp, (-6i32) as u32);
        assert_eq!(chunk.fetch_i32(1).unwrap(), -6);
    }

    #[test]
    fn disassembly_lists_consts_and_ops() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_const(Value::Int(41));
        chunk.emit_with(Op::Ldc, idx as u32);
        chunk.emit(Op::Ret);
        let text = chunk.disassemble();
        assert!(text.contains("[0] = 41"));
        assert!(text.contains("LDC 0"));
        assert!(text.contains("RET"));
    }

    #[test]
    fn extended_does_not_share_capture_storage() {
        let proto = Func::new(Arc::new(Chunk::new()));
        let a = proto.extended(Value::Int(1));
        let b = proto.extended(Value::Int(2));
        assert_eq!(proto.captured().len(), 0);
        assert_eq!(a.captured(), &[Value::Int(1)]);
        assert_eq!(b.captured(), &[Value::Int(2)]);
    }
}
