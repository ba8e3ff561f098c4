//! Brio engine: the VM runtime surface and the JIT compiler.
//!
//! The crate has two halves:
//! - **`vm`**: the bytecode definition, the `VmRegisters` record shared
//!   with emitted code, script modules, and a reference interpreter that
//!   doubles as the oracle for per-opcode equivalence tests.
//! - **`jit`**: the bytecode-to-native translator for x86-64 and AArch64 —
//!   a two-pass driver, per-architecture lowering tables over the
//!   `brio-asm` encoders, and the executable-memory runtime.
//!
//! # Example
//!
//! ```rust,ignore
//! use brio_engine::jit::{JitCompiler, JitConfig};
//! use brio_engine::vm::{Executor, Function, Module};
//!
//! let mut module = Module::new("demo");
//! let idx = module.add_function(Function::new("main", code, 16));
//!
//! let jit = JitCompiler::new(JitConfig::default());
//! jit.compile(module.function_mut(idx)).ok(); // refusal falls back
//!
//! let result = Executor::new(&module).run(idx)?;
//! ```

#![warn(rust_2018_idioms)]

pub mod jit;
pub mod vm;

pub use jit::{JitCompiler, JitConfig, JitError, Target};
pub use vm::{ExecResult, Executor, Function, Module, Opcode, VmError, VmRegisters};
