//! Reference interpreter and the mixed interpret/JIT run loop.
//!
//! The interpreter defines the observable semantics of every opcode the
//! translator lowers; per-opcode equivalence tests compare its results
//! against compiled execution. The run loop realizes the VM side of the
//! JIT bridge: interpretation proceeds until a `JitEntry` with a patched
//! operand is reached, native code runs until `RET` or a yield, and
//! interpretation resumes at `programPointer` (the escape opcode itself is
//! executed here, exactly as the host VM would).
//!
//! Arithmetic hazards (division by zero, `i32::MIN / -1`) are not checked,
//! matching the emitted code, where they fall to the host ISA.

use crate::jit::runtime::{self, helpers};
use crate::vm::bytecode::{InstrRef, Opcode};
use crate::vm::module::{HostCall, Module};
use crate::vm::registers::VmRegisters;

/// Script-level execution failures.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VmError {
    /// A checked opcode dereferenced or consumed a null pointer.
    #[error("null pointer access")]
    NullPointerAccess,
    /// The harness VM does not model this escape opcode.
    #[error("unsupported instruction {op:?} at {pc}")]
    UnsupportedInstruction {
        /// The opcode.
        op: Opcode,
        /// Word index within the function.
        pc: usize,
    },
    /// The deprecated `STR` opcode was executed.
    #[error("deprecated instruction STR at {0}")]
    DeprecatedInstruction(usize),
    /// `CALLSYS` named an unregistered host function.
    #[error("host function {0} is not registered")]
    HostFunctionMissing(u32),
}

/// Final VM-visible state after a run, captured for comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// The value register at `RET`.
    pub value_register: u64,
    /// The object register at `RET`.
    pub object_register: u64,
    /// Frame slots `0..frame_words`, slot `i` holding the dword at
    /// `frame_pointer - i * 4`.
    pub frame: Vec<u32>,
    /// Stack-pointer displacement from its initial position, in dwords.
    pub stack_delta: isize,
}

enum Flow {
    Next,
    Jump(usize),
    Return,
}

/// Runs functions of one module against a private script stack.
pub struct Executor<'m> {
    module: &'m Module,
    /// Script stack size in dwords.
    pub stack_words: usize,
}

impl<'m> Executor<'m> {
    /// Executor with the default stack size.
    pub fn new(module: &'m Module) -> Executor<'m> {
        Executor { module, stack_words: 4096 }
    }

    /// Run a function, entering compiled code at patched `JitEntry`
    /// instructions when the function has been compiled.
    pub fn run(&self, index: u32) -> Result<ExecResult, VmError> {
        self.run_inner(index, true)
    }

    /// Run a function strictly under the interpreter.
    pub fn run_interpreted(&self, index: u32) -> Result<ExecResult, VmError> {
        self.run_inner(index, false)
    }

    fn run_inner(&self, index: u32, use_jit: bool) -> Result<ExecResult, VmError> {
        let func = self.module.function(index);
        let code = &func.code;

        let mut stack = vec![0u32; self.stack_words];
        // Leave headroom above the frame pointer: slot 0 is a qword (the
        // object "this" location read by LoadThisR).
        let frame_at = self.stack_words - 4;
        let fp = unsafe { stack.as_mut_ptr().add(frame_at) };
        let sp0 = unsafe { fp.sub(func.frame_words as usize) };

        let mut regs = VmRegisters {
            program_pointer: code.as_ptr() as *mut u32,
            stack_frame_pointer: fp,
            stack_pointer: sp0,
            value_register: 0,
            object_register: std::ptr::null_mut(),
            object_type: std::ptr::null_mut(),
        };

        runtime::clear_script_exception();

        let mut pc = 0usize;
        loop {
            if pc >= code.len() {
                break;
            }
            let instr = InstrRef::at(code, pc);
            let op = instr.opcode();

            if op == Opcode::JitEntry {
                let entry = instr.dword_arg(0);
                if use_jit && entry != 0 {
                    if let Some(jit) = func.jit() {
                        unsafe { jit.entry()(&mut regs, entry) };
                        if runtime::take_script_exception() {
                            return Err(VmError::NullPointerAccess);
                        }
                        let next =
                            unsafe { regs.program_pointer.offset_from(code.as_ptr()) } as usize;
                        pc = next;
                        continue;
                    }
                }
                pc += op.size_words();
                continue;
            }

            match self.exec_instr(&mut regs, instr)? {
                Flow::Next => pc += op.size_words(),
                Flow::Jump(target) => pc = target,
                Flow::Return => break,
            }
        }

        let frame = (0..func.frame_words as usize)
            .map(|i| unsafe { (fp as *const u8).sub(i * 4).cast::<u32>().read_unaligned() })
            .collect();
        let stack_delta = unsafe { regs.stack_pointer.offset_from(sp0) };
        Ok(ExecResult {
            value_register: regs.value_register,
            object_register: regs.object_register as u64,
            frame,
            stack_delta,
        })
    }

    #[allow(clippy::too_many_lines)]
    fn exec_instr(&self, regs: &mut VmRegisters, instr: InstrRef<'_>) -> Result<Flow, VmError> {
        use Opcode::*;

        // Frame and stack accessors. The script trusts its compiler, so no
        // bounds checks here; the harness sizes the stack generously.
        unsafe fn slot(fp: *mut u32, off: i32) -> *mut u8 {
            (fp as *mut u8).offset(off as isize)
        }
        unsafe fn rd32(fp: *mut u32, off: i32) -> u32 {
            slot(fp, off).cast::<u32>().read_unaligned()
        }
        unsafe fn wr32(fp: *mut u32, off: i32, v: u32) {
            slot(fp, off).cast::<u32>().write_unaligned(v)
        }
        unsafe fn rd64(fp: *mut u32, off: i32) -> u64 {
            slot(fp, off).cast::<u64>().read_unaligned()
        }
        unsafe fn wr64(fp: *mut u32, off: i32, v: u64) {
            slot(fp, off).cast::<u64>().write_unaligned(v)
        }
        unsafe fn rdf(fp: *mut u32, off: i32) -> f32 {
            f32::from_bits(rd32(fp, off))
        }
        unsafe fn wrf(fp: *mut u32, off: i32, v: f32) {
            wr32(fp, off, v.to_bits())
        }
        unsafe fn rdd(fp: *mut u32, off: i32) -> f64 {
            f64::from_bits(rd64(fp, off))
        }
        unsafe fn wrd(fp: *mut u32, off: i32, v: f64) {
            wr64(fp, off, v.to_bits())
        }
        unsafe fn push64(regs: &mut VmRegisters, v: u64) {
            regs.stack_pointer = regs.stack_pointer.sub(2);
            (regs.stack_pointer as *mut u64).write_unaligned(v);
        }
        unsafe fn push32(regs: &mut VmRegisters, v: u32) {
            regs.stack_pointer = regs.stack_pointer.sub(1);
            regs.stack_pointer.write_unaligned(v);
        }
        unsafe fn top64(regs: &mut VmRegisters) -> *mut u64 {
            regs.stack_pointer as *mut u64
        }
        fn ord3(less: bool, equal: bool) -> u64 {
            if equal {
                0
            } else if less {
                (-1i32 as u32) as u64
            } else {
                1
            }
        }

        let fp = regs.stack_frame_pointer;
        let op = instr.opcode();

        unsafe {
            match op {
                // --- stack manipulation ---
                PopPtr => regs.stack_pointer = regs.stack_pointer.add(2),
                PshGPtr => {
                    let v = (instr.ptr_arg() as *const u64).read_unaligned();
                    push64(regs, v);
                }
                PshC4 => push32(regs, instr.dword_arg(0)),
                PshV4 => {
                    let v = rd32(fp, instr.var_offset(0));
                    push32(regs, v);
                }
                Psf => {
                    let addr = slot(fp, instr.var_offset(0)) as u64;
                    push64(regs, addr);
                }
                SwapPtr => {
                    let a = top64(regs);
                    let b = (regs.stack_pointer.add(2)) as *mut u64;
                    let (va, vb) = (a.read_unaligned(), b.read_unaligned());
                    a.write_unaligned(vb);
                    b.write_unaligned(va);
                }
                PshC8 => push64(regs, instr.qword_arg()),
                PshVPtr => {
                    let v = rd64(fp, instr.var_offset(0));
                    push64(regs, v);
                }
                PshV8 => {
                    let v = rd64(fp, instr.var_offset(0));
                    push64(regs, v);
                }
                PshNull => push64(regs, 0),
                PshG4 => {
                    let v = (instr.ptr_arg() as *const u32).read_unaligned();
                    push32(regs, v);
                }
                Pga | ObjType | FuncPtr => push64(regs, instr.ptr_arg()),
                Var => push64(regs, instr.short_arg(0) as i64 as u64),
                PopRPtr => {
                    regs.value_register = top64(regs).read_unaligned();
                    regs.stack_pointer = regs.stack_pointer.add(2);
                }
                PshRPtr => push64(regs, regs.value_register),
                RdsPtr => {
                    let p = top64(regs).read_unaligned();
                    if p == 0 {
                        return Err(VmError::NullPointerAccess);
                    }
                    top64(regs).write_unaligned((p as *const u64).read_unaligned());
                }
                Copy => {
                    let dst = top64(regs).read_unaligned();
                    regs.stack_pointer = regs.stack_pointer.add(2);
                    let src = top64(regs).read_unaligned();
                    if dst == 0 || src == 0 {
                        return Err(VmError::NullPointerAccess);
                    }
                    let bytes = instr.dword_arg(0) as usize * 4;
                    std::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, bytes);
                }

                // --- value-register tests and moves ---
                Not => {
                    regs.value_register = (regs.value_register == 0) as u64;
                }
                Tz => regs.value_register = (regs.value_register as u32 == 0) as u64,
                Tnz => regs.value_register = (regs.value_register as u32 != 0) as u64,
                Ts => regs.value_register = ((regs.value_register as u32 as i32) < 0) as u64,
                Tns => regs.value_register = ((regs.value_register as u32 as i32) >= 0) as u64,
                Tp => regs.value_register = ((regs.value_register as u32 as i32) > 0) as u64,
                Tnp => regs.value_register = ((regs.value_register as u32 as i32) <= 0) as u64,
                ClrHi => regs.value_register &= 0xFF,
                CpyVtoR4 => regs.value_register = rd32(fp, instr.var_offset(0)) as u64,
                CpyVtoR8 => regs.value_register = rd64(fp, instr.var_offset(0)),
                CpyRtoV4 => wr32(fp, instr.var_offset(0), regs.value_register as u32),
                CpyRtoV8 => wr64(fp, instr.var_offset(0), regs.value_register),
                Ldg => regs.value_register = instr.ptr_arg(),
                Ldv => regs.value_register = slot(fp, instr.var_offset(0)) as u64,
                LdGRdR4 => {
                    let ptr = instr.ptr_arg();
                    regs.value_register = ptr;
                    wr32(fp, instr.var_offset(0), (ptr as *const u32).read_unaligned());
                }
                WrtV1 => {
                    let v = rd32(fp, instr.var_offset(0)) as u8;
                    (regs.value_register as *mut u8).write_unaligned(v);
                }
                WrtV2 => {
                    let v = rd32(fp, instr.var_offset(0)) as u16;
                    (regs.value_register as *mut u16).write_unaligned(v);
                }
                WrtV4 => {
                    let v = rd32(fp, instr.var_offset(0));
                    (regs.value_register as *mut u32).write_unaligned(v);
                }
                WrtV8 => {
                    let v = rd64(fp, instr.var_offset(0));
                    (regs.value_register as *mut u64).write_unaligned(v);
                }
                Rdr1 => {
                    let v = (regs.value_register as *const u8).read_unaligned() as u32;
                    wr32(fp, instr.var_offset(0), v);
                }
                Rdr2 => {
                    let v = (regs.value_register as *const u16).read_unaligned() as u32;
                    wr32(fp, instr.var_offset(0), v);
                }
                Rdr4 => {
                    let v = (regs.value_register as *const u32).read_unaligned();
                    wr32(fp, instr.var_offset(0), v);
                }
                Rdr8 => {
                    let v = (regs.value_register as *const u64).read_unaligned();
                    wr64(fp, instr.var_offset(0), v);
                }

                // --- branches ---
                Jmp => return Ok(Flow::Jump(instr.branch_target())),
                Jz => {
                    if regs.value_register as u32 == 0 {
                        return Ok(Flow::Jump(instr.branch_target()));
                    }
                }
                Jnz => {
                    if regs.value_register as u32 != 0 {
                        return Ok(Flow::Jump(instr.branch_target()));
                    }
                }
                Js => {
                    if (regs.value_register as u32 as i32) < 0 {
                        return Ok(Flow::Jump(instr.branch_target()));
                    }
                }
                Jns => {
                    if (regs.value_register as u32 as i32) >= 0 {
                        return Ok(Flow::Jump(instr.branch_target()));
                    }
                }
                Jp => {
                    if (regs.value_register as u32 as i32) > 0 {
                        return Ok(Flow::Jump(instr.branch_target()));
                    }
                }
                Jnp => {
                    if (regs.value_register as u32 as i32) <= 0 {
                        return Ok(Flow::Jump(instr.branch_target()));
                    }
                }
                JLowZ => {
                    if regs.value_register as u8 == 0 {
                        return Ok(Flow::Jump(instr.branch_target()));
                    }
                }
                JLowNZ => {
                    if regs.value_register as u8 != 0 {
                        return Ok(Flow::Jump(instr.branch_target()));
                    }
                }

                // --- comparisons ---
                CmpI => {
                    let a = rd32(fp, instr.var_offset(0)) as i32;
                    let b = rd32(fp, instr.var_offset(1)) as i32;
                    regs.value_register = ord3(a < b, a == b);
                }
                CmpU => {
                    let a = rd32(fp, instr.var_offset(0));
                    let b = rd32(fp, instr.var_offset(1));
                    regs.value_register = ord3(a < b, a == b);
                }
                CmpF => {
                    let a = rdf(fp, instr.var_offset(0));
                    let b = rdf(fp, instr.var_offset(1));
                    regs.value_register = ord3(a < b, a == b);
                }
                CmpD => {
                    let a = rdd(fp, instr.var_offset(0));
                    let b = rdd(fp, instr.var_offset(1));
                    regs.value_register = ord3(a < b, a == b);
                }
                CmpI64 => {
                    let a = rd64(fp, instr.var_offset(0)) as i64;
                    let b = rd64(fp, instr.var_offset(1)) as i64;
                    regs.value_register = ord3(a < b, a == b);
                }
                CmpU64 | CmpPtr => {
                    let a = rd64(fp, instr.var_offset(0));
                    let b = rd64(fp, instr.var_offset(1));
                    regs.value_register = ord3(a < b, a == b);
                }
                CmpIi => {
                    let a = rd32(fp, instr.var_offset(0)) as i32;
                    let b = instr.int_arg();
                    regs.value_register = ord3(a < b, a == b);
                }
                CmpIu => {
                    let a = rd32(fp, instr.var_offset(0));
                    let b = instr.dword_arg(0);
                    regs.value_register = ord3(a < b, a == b);
                }
                CmpIf => {
                    let a = rdf(fp, instr.var_offset(0));
                    let b = instr.float_arg(0);
                    regs.value_register = ord3(a < b, a == b);
                }

                // --- increments / decrements ---
                IncI8 => {
                    let p = regs.value_register as *mut u8;
                    p.write_unaligned(p.read_unaligned().wrapping_add(1));
                }
                DecI8 => {
                    let p = regs.value_register as *mut u8;
                    p.write_unaligned(p.read_unaligned().wrapping_sub(1));
                }
                IncI16 => {
                    let p = regs.value_register as *mut u16;
                    p.write_unaligned(p.read_unaligned().wrapping_add(1));
                }
                DecI16 => {
                    let p = regs.value_register as *mut u16;
                    p.write_unaligned(p.read_unaligned().wrapping_sub(1));
                }
                IncI => {
                    let p = regs.value_register as *mut u32;
                    p.write_unaligned(p.read_unaligned().wrapping_add(1));
                }
                DecI => {
                    let p = regs.value_register as *mut u32;
                    p.write_unaligned(p.read_unaligned().wrapping_sub(1));
                }
                IncI64 => {
                    let p = regs.value_register as *mut u64;
                    p.write_unaligned(p.read_unaligned().wrapping_add(1));
                }
                DecI64 => {
                    let p = regs.value_register as *mut u64;
                    p.write_unaligned(p.read_unaligned().wrapping_sub(1));
                }
                IncF => {
                    let p = regs.value_register as *mut u32;
                    p.write_unaligned((f32::from_bits(p.read_unaligned()) + 1.0).to_bits());
                }
                DecF => {
                    let p = regs.value_register as *mut u32;
                    p.write_unaligned((f32::from_bits(p.read_unaligned()) - 1.0).to_bits());
                }
                IncD => {
                    let p = regs.value_register as *mut u64;
                    p.write_unaligned((f64::from_bits(p.read_unaligned()) + 1.0).to_bits());
                }
                DecD => {
                    let p = regs.value_register as *mut u64;
                    p.write_unaligned((f64::from_bits(p.read_unaligned()) - 1.0).to_bits());
                }
                IncVi => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, rd32(fp, off).wrapping_add(1));
                }
                DecVi => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, rd32(fp, off).wrapping_sub(1));
                }

                // --- negation / bitwise not ---
                NegI => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, (rd32(fp, off) as i32).wrapping_neg() as u32);
                }
                NegI64 => {
                    let off = instr.var_offset(0);
                    wr64(fp, off, (rd64(fp, off) as i64).wrapping_neg() as u64);
                }
                NegF => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, rd32(fp, off) ^ 0x8000_0000);
                }
                NegD => {
                    let off = instr.var_offset(0);
                    wr64(fp, off, rd64(fp, off) ^ 0x8000_0000_0000_0000);
                }
                BNot => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, !rd32(fp, off));
                }
                BNot64 => {
                    let off = instr.var_offset(0);
                    wr64(fp, off, !rd64(fp, off));
                }

                // --- 32-bit integer arithmetic ---
                AddI | SubI | MulI | DivI | ModI | BAnd | BOr | BXor | Bsll | Bsrl | Bsra
                | DivU | ModU | PowI | PowU => {
                    let (d, s1, s2) =
                        (instr.var_offset(0), instr.var_offset(1), instr.var_offset(2));
                    let a = rd32(fp, s1);
                    let b = rd32(fp, s2);
                    let r = match op {
                        AddI => a.wrapping_add(b),
                        SubI => a.wrapping_sub(b),
                        MulI => a.wrapping_mul(b),
                        DivI => (a as i32).wrapping_div(b as i32) as u32,
                        ModI => (a as i32).wrapping_rem(b as i32) as u32,
                        DivU => a / b,
                        ModU => a % b,
                        BAnd => a & b,
                        BOr => a | b,
                        BXor => a ^ b,
                        Bsll => a.wrapping_shl(b),
                        Bsrl => a.wrapping_shr(b),
                        Bsra => (a as i32).wrapping_shr(b) as u32,
                        PowI => helpers::ipow(a as i32, b as i32) as u32,
                        PowU => helpers::upow(a, b),
                        _ => unreachable!(),
                    };
                    wr32(fp, d, r);
                }

                // --- 64-bit integer arithmetic ---
                AddI64 | SubI64 | MulI64 | DivI64 | ModI64 | BAnd64 | BOr64 | BXor64 | Bsll64
                | Bsrl64 | Bsra64 | DivU64 | ModU64 | PowI64 | PowU64 => {
                    let (d, s1, s2) =
                        (instr.var_offset(0), instr.var_offset(1), instr.var_offset(2));
                    let a = rd64(fp, s1);
                    let b = rd64(fp, s2);
                    let r = match op {
                        AddI64 => a.wrapping_add(b),
                        SubI64 => a.wrapping_sub(b),
                        MulI64 => a.wrapping_mul(b),
                        DivI64 => (a as i64).wrapping_div(b as i64) as u64,
                        ModI64 => (a as i64).wrapping_rem(b as i64) as u64,
                        DivU64 => a / b,
                        ModU64 => a % b,
                        BAnd64 => a & b,
                        BOr64 => a | b,
                        BXor64 => a ^ b,
                        Bsll64 => a.wrapping_shl(b as u32),
                        Bsrl64 => a.wrapping_shr(b as u32),
                        Bsra64 => (a as i64).wrapping_shr(b as u32) as u64,
                        PowI64 => helpers::i64pow(a as i64, b as i64) as u64,
                        PowU64 => helpers::u64pow(a, b),
                        _ => unreachable!(),
                    };
                    wr64(fp, d, r);
                }

                // --- float / double arithmetic ---
                AddF | SubF | MulF | DivF | ModF | PowF => {
                    let (d, s1, s2) =
                        (instr.var_offset(0), instr.var_offset(1), instr.var_offset(2));
                    let a = rdf(fp, s1);
                    let b = rdf(fp, s2);
                    let r = match op {
                        AddF => a + b,
                        SubF => a - b,
                        MulF => a * b,
                        DivF => a / b,
                        ModF => helpers::mod_float(a, b),
                        PowF => helpers::fpow(a, b),
                        _ => unreachable!(),
                    };
                    wrf(fp, d, r);
                }
                AddD | SubD | MulD | DivD | ModD | PowD => {
                    let (d, s1, s2) =
                        (instr.var_offset(0), instr.var_offset(1), instr.var_offset(2));
                    let a = rdd(fp, s1);
                    let b = rdd(fp, s2);
                    let r = match op {
                        AddD => a + b,
                        SubD => a - b,
                        MulD => a * b,
                        DivD => a / b,
                        ModD => helpers::mod_double(a, b),
                        PowD => helpers::dpow(a, b),
                        _ => unreachable!(),
                    };
                    wrd(fp, d, r);
                }
                PowDi => {
                    let (d, s1, s2) =
                        (instr.var_offset(0), instr.var_offset(1), instr.var_offset(2));
                    let a = rdd(fp, s1);
                    let b = rd32(fp, s2) as i32;
                    wrd(fp, d, helpers::dipow(a, b));
                }

                // --- immediate arithmetic ---
                AddIi | SubIi | MulIi => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    let a = rd32(fp, s);
                    let b = instr.dword_arg(1);
                    let r = match op {
                        AddIi => a.wrapping_add(b),
                        SubIi => a.wrapping_sub(b),
                        MulIi => a.wrapping_mul(b),
                        _ => unreachable!(),
                    };
                    wr32(fp, d, r);
                }
                AddIf | SubIf | MulIf => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    let a = rdf(fp, s);
                    let b = instr.float_arg(1);
                    let r = match op {
                        AddIf => a + b,
                        SubIf => a - b,
                        MulIf => a * b,
                        _ => unreachable!(),
                    };
                    wrf(fp, d, r);
                }

                // --- conversions (in place) ---
                ItoF => {
                    let off = instr.var_offset(0);
                    wrf(fp, off, rd32(fp, off) as i32 as f32);
                }
                FtoI => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, rdf(fp, off) as i32 as u32);
                }
                UtoF => {
                    let off = instr.var_offset(0);
                    wrf(fp, off, rd32(fp, off) as f32);
                }
                FtoU => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, rdf(fp, off) as i64 as u32);
                }
                SbToI => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, rd32(fp, off) as u8 as i8 as i32 as u32);
                }
                SwToI => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, rd32(fp, off) as u16 as i16 as i32 as u32);
                }
                UbToI => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, rd32(fp, off) as u8 as u32);
                }
                UwToI => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, rd32(fp, off) as u16 as u32);
                }
                ItoB => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, rd32(fp, off) & 0xFF);
                }
                ItoW => {
                    let off = instr.var_offset(0);
                    wr32(fp, off, rd32(fp, off) & 0xFFFF);
                }

                // --- conversions (two slots) ---
                DtoI => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wr32(fp, d, rdd(fp, s) as i32 as u32);
                }
                DtoU => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wr32(fp, d, rdd(fp, s) as i64 as u32);
                }
                DtoF => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wrf(fp, d, rdd(fp, s) as f32);
                }
                ItoD => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wrd(fp, d, rd32(fp, s) as i32 as f64);
                }
                UtoD => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wrd(fp, d, rd32(fp, s) as f64);
                }
                FtoD => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wrd(fp, d, rdf(fp, s) as f64);
                }
                I64toI => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wr32(fp, d, rd64(fp, s) as u32);
                }
                UtoI64 => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wr64(fp, d, rd32(fp, s) as u64);
                }
                ItoI64 => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wr64(fp, d, rd32(fp, s) as i32 as i64 as u64);
                }
                FtoI64 => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wr64(fp, d, rdf(fp, s) as i64 as u64);
                }
                DtoI64 => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wr64(fp, d, rdd(fp, s) as i64 as u64);
                }
                FtoU64 => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wr64(fp, d, rdf(fp, s) as u64);
                }
                DtoU64 => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wr64(fp, d, rdd(fp, s) as u64);
                }
                I64toF => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wrf(fp, d, rd64(fp, s) as i64 as f32);
                }
                U64toF => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wrf(fp, d, rd64(fp, s) as f32);
                }
                I64toD => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wrd(fp, d, rd64(fp, s) as i64 as f64);
                }
                U64toD => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wrd(fp, d, rd64(fp, s) as f64);
                }

                // --- frame moves and constants ---
                SetV1 | SetV2 | SetV4 => wr32(fp, instr.var_offset(0), instr.dword_arg(0)),
                SetV8 => wr64(fp, instr.var_offset(0), instr.qword_arg()),
                CpyVtoV4 => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wr32(fp, d, rd32(fp, s));
                }
                CpyVtoV8 => {
                    let (d, s) = (instr.var_offset(0), instr.var_offset(1));
                    wr64(fp, d, rd64(fp, s));
                }
                CpyVtoG4 => {
                    let v = rd32(fp, instr.var_offset(0));
                    (instr.ptr_arg() as *mut u32).write_unaligned(v);
                }
                CpyGtoV4 => {
                    let v = (instr.ptr_arg() as *const u32).read_unaligned();
                    wr32(fp, instr.var_offset(0), v);
                }
                SetG4 => {
                    (instr.ptr_arg() as *mut u32).write_unaligned(instr.dword_arg(2));
                }
                TypeId => push32(regs, instr.dword_arg(0)),
                ClrVPtr => wr64(fp, instr.var_offset(0), 0),

                // --- object register ---
                LoadObj => {
                    let off = instr.var_offset(0);
                    regs.object_type = std::ptr::null_mut();
                    regs.object_register = rd64(fp, off) as *mut u8;
                    wr64(fp, off, 0);
                }
                StoreObj => {
                    wr64(fp, instr.var_offset(0), regs.object_register as u64);
                    regs.object_register = std::ptr::null_mut();
                }
                GetObj => {
                    let at = (regs.stack_pointer as *mut u8).add(instr.word_arg(0) as usize * 4)
                        as *mut u64;
                    let idx = at.read_unaligned();
                    let src = (regs.stack_pointer as *mut u8).offset(-(idx as i64 * 4) as isize)
                        as *mut u64;
                    at.write_unaligned(src.read_unaligned());
                    src.write_unaligned(0);
                }
                GetObjRef => {
                    let at = (regs.stack_pointer as *mut u8).add(instr.word_arg(0) as usize * 4)
                        as *mut u64;
                    let idx = at.read_unaligned();
                    let v = slot(fp, -(idx as i64 * 4) as i32).cast::<u64>().read_unaligned();
                    at.write_unaligned(v);
                }
                GetRef => {
                    let at = (regs.stack_pointer as *mut u8).add(instr.word_arg(0) as usize * 4)
                        as *mut u64;
                    let idx = (at as *const u32).read_unaligned();
                    at.write_unaligned(slot(fp, -(idx as i64 * 4) as i32) as u64);
                }

                // --- reference checks ---
                ChkRef => {
                    if top64(regs).read_unaligned() == 0 {
                        return Err(VmError::NullPointerAccess);
                    }
                }
                ChkRefS => {
                    let p = top64(regs).read_unaligned();
                    if (p as *const u64).read_unaligned() == 0 {
                        return Err(VmError::NullPointerAccess);
                    }
                }
                ChkNullV => {
                    if rd32(fp, instr.var_offset(0)) == 0 {
                        return Err(VmError::NullPointerAccess);
                    }
                }
                ChkNullS => {
                    let p = (regs.stack_pointer as *const u8)
                        .add(instr.word_arg(0) as usize * 4)
                        .cast::<u64>()
                        .read_unaligned();
                    if p == 0 {
                        return Err(VmError::NullPointerAccess);
                    }
                }
                AddSi => {
                    let top = top64(regs);
                    let p = top.read_unaligned();
                    if p == 0 {
                        return Err(VmError::NullPointerAccess);
                    }
                    top.write_unaligned((p as i64 + instr.short_arg(0) as i64) as u64);
                }
                LoadThisR => {
                    let p = (fp as *const u64).read_unaligned();
                    if p == 0 {
                        return Err(VmError::NullPointerAccess);
                    }
                    regs.value_register = (p as i64 + instr.short_arg(0) as i64) as u64;
                }
                LoadRObjR => {
                    let p = rd64(fp, instr.var_offset(0));
                    if p == 0 {
                        return Err(VmError::NullPointerAccess);
                    }
                    regs.value_register = (p as i64 + instr.short_arg(1) as i64) as u64;
                }
                LoadVObjR => {
                    regs.value_register =
                        slot(fp, instr.var_offset(0) + instr.short_arg(1) as i32) as u64;
                }

                // --- list buffers ---
                SetListSize => {
                    let buf = rd64(fp, instr.var_offset(0));
                    if buf == 0 {
                        return Err(VmError::NullPointerAccess);
                    }
                    ((buf as *mut u8).add(instr.dword_arg(0) as usize) as *mut u32)
                        .write_unaligned(instr.dword_arg(1));
                }
                PshListElmnt => {
                    let buf = rd64(fp, instr.var_offset(0));
                    if buf == 0 {
                        return Err(VmError::NullPointerAccess);
                    }
                    push64(regs, buf + instr.dword_arg(0) as u64);
                }
                SetListType => {
                    let buf = rd64(fp, instr.var_offset(0));
                    if buf == 0 {
                        return Err(VmError::NullPointerAccess);
                    }
                    ((buf as *mut u8).add(instr.dword_arg(0) as usize) as *mut u32)
                        .write_unaligned(instr.dword_arg(1));
                }

                // --- bridge / control ---
                JitEntry => {}
                Suspend => {}
                Ret => return Ok(Flow::Return),
                Str => return Err(VmError::DeprecatedInstruction(instr.pc())),
                CallSys => {
                    let id = instr.dword_arg(0);
                    let host = self
                        .module
                        .host(id)
                        .ok_or(VmError::HostFunctionMissing(id))?;
                    let mut call = HostCall { regs };
                    host(&mut call);
                }
                Call | CallBnd | CallIntf | CallPtr | ThisCall1 | Alloc | Free | RefCpy
                | RefCpyV | Cast | AllocMem | Jmpp => {
                    return Err(VmError::UnsupportedInstruction { op, pc: instr.pc() });
                }
            }
        }
        Ok(Flow::Next)
    }
}
