pub mod bytecode;
pub mod compiler;
pub mod frame;

pub use bytecode::{Chunk, Func, Op};
pub use compiler::Compiler;
pub use frame::{invoke, Frame};
