//! The VM surface the JIT compiles against: bytecode definition, the
//! register record shared with emitted code, modules, and the reference
//! interpreter the equivalence tests use as their oracle.

pub mod bytecode;
pub mod interp;
pub mod module;
pub mod registers;

pub use bytecode::{BcLabel, BytecodeWriter, InstrFormat, InstrRef, Opcode};
pub use interp::{ExecResult, Executor, VmError};
pub use module::{Function, HostCall, HostFn, Module};
pub use registers::{JitFn, VmRegisters};
