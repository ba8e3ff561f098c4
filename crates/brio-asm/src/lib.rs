//! Instruction encoders for the Brio JIT.
//!
//! This crate is the machine-code layer under the translator: a
//! [`buffer::CodeBuffer`] collecting bytes, dynamic labels, and pc-relative
//! fixups, plus one assembler per supported ISA emitting the instruction
//! subset the per-opcode lowering tables use.
//!
//! Both assemblers are pure byte producers; nothing here maps memory or
//! executes code, so every encoding is unit-testable on any host.

#![warn(rust_2018_idioms)]

pub mod a64;
pub mod buffer;
pub mod x64;

pub use buffer::{CodeBuffer, ConstPool, Label};

/// Errors surfaced when a code buffer is finalized.
#[derive(Debug, thiserror::Error)]
pub enum AsmError {
    /// A recorded fixup references a label that was never bound.
    #[error("label {0} referenced but never bound")]
    UnboundLabel(u32),
    /// A branch or literal displacement does not fit its encoding.
    #[error("fixup at offset {offset} out of range (distance {distance})")]
    FixupOutOfRange { offset: usize, distance: i64 },
    /// An AArch64 fixup target is not word-aligned.
    #[error("fixup at offset {offset} targets a misaligned address")]
    MisalignedTarget { offset: usize },
}
