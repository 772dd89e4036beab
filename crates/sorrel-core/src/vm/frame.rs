use std::sync::Arc;

use crate::error::Error;
use crate::value::Value;
use crate::vm::bytecode::{Chunk, Op};

/// A single VM invocation context: operand stack, argument vector,
/// captured-value vector and instruction pointer over one chunk.
///
/// Frames are created per invocation and consumed by [`Frame::run`].
pub struct Frame<'c> {
    chunk: &'c Chunk,
    stack: Vec<Value>,
    args: Vec<Value>,
    captured: Vec<Value>,
    ip: usize,
}

impl<'c> Frame<'c> {
    pub fn new(chunk: &'c Chunk, args: Vec<Value>) -> Self {
        Self::with_captures(chunk, args, Vec::new())
    }

    pub fn with_captures(chunk: &'c Chunk, args: Vec<Value>, captured: Vec<Value>) -> Self {
        Self {
            chunk,
            stack: Vec::with_capacity(chunk.max_stack()),
            args,
            captured,
            ip: 0,
        }
    }

    fn push(&mut self, value: Value) -> Result<(), Error> {
        if self.stack.len() >= self.chunk.max_stack() {
            return Err(Error::execution("stack overflow"));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, Error> {
        self.stack
            .pop()
            .ok_or_else(|| Error::execution("stack underflow"))
    }

    fn nth(&self, depth: usize) -> Result<&Value, Error> {
        let len = self.stack.len();
        if depth >= len {
            return Err(Error::execution("stack underflow"));
        }
        Ok(&self.stack[len - 1 - depth])
    }

    fn drop_n(&mut self, n: usize) -> Result<(), Error> {
        let len = self.stack.len();
        if n > len {
            return Err(Error::execution("stack underflow"));
        }
        self.stack.truncate(len - n);
        Ok(())
    }

    fn jump(&mut self, offset: i32) -> Result<(), Error> {
        let target = self.ip as i64 + offset as i64;
        if target < 0 {
            return Err(Error::execution("jump out of bounds"));
        }
        self.ip = target as usize;
        Ok(())
    }

    /// Execute until RET, the end of the stream, or an error. Branch and
    /// jump offsets are relative to the opcode byte of the instruction
    /// itself.
    pub fn run(mut self) -> Result<Value, Error> {
        while self.ip < self.chunk.len() {
            let byte = self.chunk.fetch(self.ip)?;
            let op = Op::from_byte(byte)
                .ok_or_else(|| Error::execution(format!("unknown opcode {}", byte)))?;
            match op {
                Op::Nop => self.ip += 1,

                Op::Ldc => {
                    let idx = self.chunk.fetch_u32(self.ip + 1)? as usize;
                    let value = self
                        .chunk
                        .const_at(idx)
                        .cloned()
                        .ok_or_else(|| Error::execution("constant lookup out of bounds"))?;
                    self.push(value)?;
                    self.ip += 5;
                }

                Op::Lda => {
                    let idx = self.chunk.fetch_u32(self.ip + 1)? as usize;
                    let value = self
                        .args
                        .get(idx)
                        .cloned()
                        .ok_or_else(|| Error::execution("argument lookup out of bounds"))?;
                    self.push(value)?;
                    self.ip += 5;
                }

                Op::Ldk => {
                    let idx = self.chunk.fetch_u32(self.ip + 1)? as usize;
                    let value = self
                        .captured
                        .get(idx)
                        .cloned()
                        .ok_or_else(|| Error::execution("capture lookup out of bounds"))?;
                    self.push(value)?;
                    self.ip += 5;
                }

                Op::Inv => {
                    let arity = self.chunk.fetch_u32(self.ip + 1)? as usize;
                    let callee = self.nth(arity)?.clone();
                    let len = self.stack.len();
                    let result = invoke(&callee, &self.stack[len - arity..len])?;
                    self.drop_n(arity + 1)?;
                    self.push(result)?;
                    self.ip += 5;
                }

                Op::Ret => return self.pop(),

                Op::Brt => {
                    let offset = self.chunk.fetch_i32(self.ip + 1)?;
                    if self.pop()?.is_truthy() {
                        self.jump(offset)?;
                    } else {
                        self.ip += 5;
                    }
                }

                Op::Brf => {
                    let offset = self.chunk.fetch_i32(self.ip + 1)?;
                    if self.pop()?.is_truthy() {
                        self.ip += 5;
                    } else {
                        self.jump(offset)?;
                    }
                }

                Op::Jmp => {
                    let offset = self.chunk.fetch_i32(self.ip + 1)?;
                    self.jump(offset)?;
                }

                Op::Pop => {
                    self.pop()?;
                    self.ip += 1;
                }

                Op::Pon => {
                    let top = self.pop()?;
                    let n = self.chunk.fetch_u32(self.ip + 1)? as usize;
                    self.drop_n(n)?;
                    self.push(top)?;
                    self.ip += 5;
                }

                Op::Dpn => {
                    let n = self.chunk.fetch_u32(self.ip + 1)? as usize;
                    let value = self.nth(n)?.clone();
                    self.push(value)?;
                    self.ip += 5;
                }

                Op::Stv => {
                    let value = self.pop()?;
                    let cell = self.pop()?;
                    let Value::Var(var) = &cell else {
                        return Err(Error::execution("STV expected a var"));
                    };
                    var.set_root(value);
                    self.push(cell)?;
                    self.ip += 1;
                }

                Op::Ldv => {
                    let cell = self.pop()?;
                    let Value::Var(var) = &cell else {
                        return Err(Error::execution("LDV expected a var"));
                    };
                    self.push(var.deref())?;
                    self.ip += 1;
                }

                Op::Pak => {
                    let value = self.pop()?;
                    let closure = self.pop()?;
                    let Value::Func(func) = &closure else {
                        return Err(Error::execution("PAK expected a fn"));
                    };
                    self.push(Value::Func(Arc::new(func.extended(value))))?;
                    self.ip += 1;
                }
            }
        }
        // ran off the end of the stream
        Ok(self.stack.pop().unwrap_or(Value::Nil))
    }
}

/// Shared invocation entrypoint. Used by INV and by the compiler for macro
/// expansion.
pub fn invoke(callee: &Value, args: &[Value]) -> Result<Value, Error> {
    match callee {
        Value::NativeFn(native) => native.call(args),
        Value::Func(func) => {
            if args.len() != func.arity() {
                return Err(Error::execution(format!(
                    "wrong number of arguments ({}) passed to {}",
                    args.len(),
                    func.name().unwrap_or("fn"),
                )));
            }
            Frame::with_captures(func.chunk(), args.to_vec(), func.captured().to_vec())
                .run()
                .map_err(|e| {
                    Error::execution(format!("error in {}", func.name().unwrap_or("fn"))).wrap(e)
                })
        }
        other => Err(Error::type_error(format!(
            "{} is not a function",
            other.value_type()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::Namespace;
    use crate::vm::bytecode::Func;

    fn run(chunk: &Chunk) -> Result<Value, Error> {
        Frame::new(chunk, Vec::new()).run()
    }

    #[test]
    fn ldc_ret() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_const(Value::Int(42));
        chunk.emit_with(Op::Ldc, idx as u32);
        chunk.emit(Op::Ret);
        chunk.set_max_stack(1);
        assert_eq!(run(&chunk).unwrap(), Value::Int(42));
    }

    #[test]
    fn invokes_native_functions() {
        let plus = Value::native_fn("+", |args| {
            let mut acc = 0;
            for arg in args {
                acc += arg.as_int()?;
            }
            Ok(Value::Int(acc))
        });
        let mut chunk = Chunk::new();
        let f = chunk.add_const(plus);
        let one = chunk.add_const(Value::Int(1));
        let two = chunk.add_const(Value::Int(2));
        chunk.emit_with(Op::Ldc, f as u32);
        chunk.emit_with(Op::Ldc, one as u32);
        chunk.emit_with(Op::Ldc, two as u32);
        chunk.emit_with(Op::Inv, 2);
        chunk.emit(Op::Ret);
        chunk.set_max_stack(3);
        assert_eq!(run(&chunk).unwrap(), Value::Int(3));
    }

    #[test]
    fn branch_offsets_are_relative_to_the_opcode() {
        // 0: LDC false
        // 5: BRF +11 -> 16
        // 10: LDC 1
        // 15: RET
        // 16: LDC 2
        // 21: RET
        let mut chunk = Chunk::new();
        let cond = chunk.add_const(Value::Bool(false));
        let one = chunk.add_const(Value::Int(1));
        let two = chunk.add_const(Value::Int(2));
        chunk.emit_with(Op::Ldc, cond as u32);
        chunk.emit_with(Op::Brf, 11);
        chunk.emit_with(Op::Ldc, one as u32);
        chunk.emit(Op::Ret);
        chunk.emit_with(Op::Ldc, two as u32);
        chunk.emit(Op::Ret);
        chunk.set_max_stack(2);
        assert_eq!(run(&chunk).unwrap(), Value::Int(2));
    }

    #[test]
    fn pon_lifts_result_past_bindings() {
        let mut chunk = Chunk::new();
        let a = chunk.add_const(Value::Int(1));
        let b = chunk.add_const(Value::Int(2));
        let c = chunk.add_const(Value::Int(3));
        chunk.emit_with(Op::Ldc, a as u32);
        chunk.emit_with(Op::Ldc, b as u32);
        chunk.emit_with(Op::Ldc, c as u32);
        chunk.emit_with(Op::Pon, 2);
        chunk.emit(Op::Ret);
        chunk.set_max_stack(3);
        assert_eq!(run(&chunk).unwrap(), Value::Int(3));
    }

    #[test]
    fn dpn_duplicates_at_depth() {
        let mut chunk = Chunk::new();
        let a = chunk.add_const(Value::Int(10));
        let b = chunk.add_const(Value::Int(20));
        chunk.emit_with(Op::Ldc, a as u32);
        chunk.emit_with(Op::Ldc, b as u32);
        chunk.emit_with(Op::Dpn, 1);
        chunk.emit(Op::Ret);
        chunk.set_max_stack(3);
        assert_eq!(run(&chunk).unwrap(), Value::Int(10));
    }

    #[test]
    fn stack_overflow_is_detected() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_const(Value::Int(0));
        chunk.emit_with(Op::Ldc, idx as u32);
        chunk.emit_with(Op::Ldc, idx as u32);
        chunk.emit(Op::Ret);
        chunk.set_max_stack(1);
        let err = run(&chunk).unwrap_err();
        assert!(err.to_string().contains("stack overflow"));
    }

    #[test]
    fn unknown_opcode_aborts() {
        let mut chunk = Chunk::new();
        chunk.emit_u32(0xffff_ffff);
        chunk.set_max_stack(1);
        assert!(run(&chunk).is_err());
    }

    #[test]
    fn stv_assigns_and_ldv_derefs() {
        let ns = Namespace::new("scratch");
        let var = ns.intern("x");
        let mut chunk = Chunk::new();
        let v = chunk.add_const(Value::Var(var.clone()));
        let n = chunk.add_const(Value::Int(5));
        chunk.emit_with(Op::Ldc, v as u32);
        chunk.emit_with(Op::Ldc, n as u32);
        chunk.emit(Op::Stv);
        chunk.emit(Op::Ldv);
        chunk.emit(Op::Ret);
        chunk.set_max_stack(2);
        assert_eq!(run(&chunk).unwrap(), Value::Int(5));
        assert_eq!(var.deref(), Value::Int(5));
    }

    #[test]
    fn invoking_a_non_function_is_a_type_error() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_const(Value::Int(1));
        chunk.emit_with(Op::Ldc, idx as u32);
        chunk.emit_with(Op::Inv, 0);
        chunk.emit(Op::Ret);
        chunk.set_max_stack(1);
        assert!(matches!(run(&chunk).unwrap_err(), Error::Type { .. }));
    }

    #[test]
    fn pak_extends_a_fresh_closure() {
        let mut inner = Chunk::new();
        inner.emit_with(Op::Ldk, 0);
        inner.emit(Op::Ret);
        inner.set_max_stack(1);

        let mut chunk = Chunk::new();
        let f = chunk.add_const(Value::Func(Arc::new(Func::new(Arc::new(inner)))));
        let n = chunk.add_const(Value::Int(9));
        chunk.emit_with(Op::Ldc, f as u32);
        chunk.emit_with(Op::Ldc, n as u32);
        chunk.emit(Op::Pak);
        chunk.emit_with(Op::Inv, 0);
        chunk.emit(Op::Ret);
        chunk.set_max_stack(2);
        assert_eq!(run(&chunk).unwrap(), Value::Int(9));

        // the prototype in the pool is untouched
        let Value::Func(proto) = chunk.const_at(f).unwrap() else {
            panic!("expected fn constant");
        };
        assert!(proto.captured().is_empty());
    }
}
