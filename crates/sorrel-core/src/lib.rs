//! Core runtime for the sorrel language: a Clojure-flavoured Lisp read into
//! value trees, compiled to stack bytecode and run on an operand-stack VM.
//!
//! Data flow: source text → [`reader`] → value tree → [`vm::Compiler`]
//! (against a [`namespaces::Namespace`]) → [`vm::Chunk`] → [`vm::Frame`] →
//! result [`value::Value`].

pub mod builtins;
pub mod error;
pub mod namespaces;
pub mod options;
pub mod reader;
pub mod value;
pub mod vm;

pub use error::{format_error, Error};
pub use namespaces::{Namespace, Registry, Var};
pub use options::EvalOptions;
pub use value::{Symbol, Value, ValueType};
pub use vm::{invoke, Chunk, Compiler, Frame, Func, Op};

/// Evaluate `source` against the shared global registry.
pub fn eval_source(source: &str, options: &EvalOptions) -> Result<Value, Error> {
    eval_source_in(source, options, &Registry::global())
}

/// Evaluate `source` against an explicit registry.
pub fn eval_source_in(
    source: &str,
    options: &EvalOptions,
    registry: &Registry,
) -> Result<Value, Error> {
    let ns = registry.ensure(&options.ns);
    let compiler = Compiler::with_registry(ns, registry.clone());
    let chunk = compiler.compile(source)?;
    if options.dump_bytecode {
        eprint!("{}", chunk.disassemble());
    }
    Frame::new(&chunk, Vec::new()).run()
}
