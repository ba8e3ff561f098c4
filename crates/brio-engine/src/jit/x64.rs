//! x86-64 lowering table.
//!
//! Registers are assigned through the [`regs`] profile; the lowering
//! routines reference roles, never hardware names. Five VM fields are
//! mirrored in registers for the whole routine; every path that leaves the
//! routine flushes them back through the spilled `VmRegisters` pointer.
//!
//! Foreign calls (pow/fmod family, the unsigned-conversion helpers,
//! `mem_copy`, the null-access raiser) save mirrors first and reload them
//! after, so helper code always observes current VM state and clobbered
//! caller-saved registers cost nothing.

use std::mem::offset_of;

use brio_asm::x64::{Alu, Asm, Cond, Gp, Mem, SseOp, Unary, Width};
use brio_asm::{ConstPool, Label};

use crate::jit::runtime::helpers;
use crate::jit::{ArchEmitter, JitError, LabelTable};
use crate::vm::bytecode::{InstrRef, Opcode};
use crate::vm::registers::VmRegisters;

/// Register roles for the host ABI.
///
/// The mirrors sit in `r8..r12`; `r13` shuttles the `VmRegisters` pointer
/// during save/restore; `rax/rbx/r14` are per-opcode scratch. Argument
/// registers are the only ABI-dependent entries.
pub(crate) mod regs {
    use brio_asm::x64::{Gp, Xmm, RAX, RBX, RCX, RDX, R10, R11, R12, R13, R14, R8, R9, XMM0, XMM1};

    pub const QWORD_FREE_1: Gp = RAX;
    pub const QWORD_FREE_2: Gp = RBX;
    pub const QWORD_FREE_3: Gp = R14;

    pub const XMM_FREE_1: Xmm = XMM0;
    pub const XMM_FREE_2: Xmm = XMM1;

    pub const DIV_FIRST_ARG: Gp = RAX; // eax:edx pair of div/idiv
    pub const DIV_MOD_RESULT: Gp = RDX;
    pub const SHIFT_COUNT: Gp = RCX; // cl

    #[cfg(not(windows))]
    pub const QWORD_FIRST_ARG: Gp = brio_asm::x64::RDI;
    #[cfg(not(windows))]
    pub const QWORD_SECOND_ARG: Gp = brio_asm::x64::RSI;
    #[cfg(not(windows))]
    pub const QWORD_THIRD_ARG: Gp = RDX;

    #[cfg(windows)]
    pub const QWORD_FIRST_ARG: Gp = RCX;
    #[cfg(windows)]
    pub const QWORD_SECOND_ARG: Gp = RDX;
    #[cfg(windows)]
    pub const QWORD_THIRD_ARG: Gp = R8;

    pub const FLOAT_FIRST_ARG: Xmm = XMM0;
    pub const FLOAT_SECOND_ARG: Xmm = XMM1;

    pub const QWORD_RETURN: Gp = RAX;
    pub const FLOAT_RETURN: Xmm = XMM0;

    pub const RESTORE: Gp = R13;

    pub const VM_SFP: Gp = R8; // stack frame pointer mirror
    pub const VM_SP: Gp = R9; // stack pointer mirror
    pub const VM_VALUE: Gp = R10;
    pub const VM_OBJECT: Gp = R11;
    pub const VM_OBJECT_TYPE: Gp = R12;
}

use regs::*;

/// Spill slot for the incoming `VmRegisters` pointer, relative to rbp.
/// The prologue pushes rbp plus the four callee-saved registers the
/// routine clobbers, then opens 16 bytes below them.
const VM_REGS_SPILL: i32 = -48;

pub(crate) struct Emitter {
    asm: Asm,
    pool: ConstPool,
    pool_label: Label,
    header_size: usize,
    with_suspend: bool,
}

impl Emitter {
    pub(crate) fn new(with_suspend: bool) -> Emitter {
        let mut asm = Asm::new();
        let pool_label = asm.new_label();
        Emitter { asm, pool: ConstPool::new(), pool_label, header_size: 0, with_suspend }
    }

    fn fp(off: i32) -> Mem {
        Mem::disp(VM_SFP, off)
    }

    fn sp() -> Mem {
        Mem::base(VM_SP)
    }

    fn sp_off(off: i32) -> Mem {
        Mem::disp(VM_SP, off)
    }

    fn restore_registers(&mut self) {
        let a = &mut self.asm;
        a.load_q(RESTORE, Mem::disp(brio_asm::x64::RBP, VM_REGS_SPILL));
        a.load_q(VM_SFP, Mem::disp(RESTORE, offset_of!(VmRegisters, stack_frame_pointer) as i32));
        a.load_q(VM_SP, Mem::disp(RESTORE, offset_of!(VmRegisters, stack_pointer) as i32));
        a.load_q(VM_VALUE, Mem::disp(RESTORE, offset_of!(VmRegisters, value_register) as i32));
        a.load_q(VM_OBJECT, Mem::disp(RESTORE, offset_of!(VmRegisters, object_register) as i32));
        a.load_q(VM_OBJECT_TYPE, Mem::disp(RESTORE, offset_of!(VmRegisters, object_type) as i32));
    }

    fn save_registers(&mut self, resume_at: Option<*const u32>) {
        let a = &mut self.asm;
        a.load_q(RESTORE, Mem::disp(brio_asm::x64::RBP, VM_REGS_SPILL));
        if let Some(addr) = resume_at {
            a.mov_qi(QWORD_FREE_1, addr as i64);
            a.store_q(
                Mem::disp(RESTORE, offset_of!(VmRegisters, program_pointer) as i32),
                QWORD_FREE_1,
            );
        }
        a.store_q(Mem::disp(RESTORE, offset_of!(VmRegisters, stack_frame_pointer) as i32), VM_SFP);
        a.store_q(Mem::disp(RESTORE, offset_of!(VmRegisters, stack_pointer) as i32), VM_SP);
        a.store_q(Mem::disp(RESTORE, offset_of!(VmRegisters, value_register) as i32), VM_VALUE);
        a.store_q(Mem::disp(RESTORE, offset_of!(VmRegisters, object_register) as i32), VM_OBJECT);
        a.store_q(Mem::disp(RESTORE, offset_of!(VmRegisters, object_type) as i32), VM_OBJECT_TYPE);
    }

    /// Tear down the frame and return. Every exit path runs this after a
    /// `save_registers`.
    fn epilogue_tail(&mut self) {
        use brio_asm::x64::{RBP, RBX, RSP, R12, R13, R14};
        let a = &mut self.asm;
        a.nop();
        a.lea(RSP, Mem::disp(RBP, -32));
        a.pop(R14);
        a.pop(R13);
        a.pop(R12);
        a.pop(RBX);
        a.pop(RBP);
        a.ret();
    }

    /// Indirect call to a helper; the address never fits rel32.
    fn call_foreign(&mut self, f: usize) {
        #[cfg(windows)]
        self.asm.alu_qi(Alu::Sub, brio_asm::x64::RSP, 32);
        self.asm.mov_qi(QWORD_FREE_1, f as i64);
        self.asm.call_r(QWORD_FREE_1);
        #[cfg(windows)]
        self.asm.alu_qi(Alu::Add, brio_asm::x64::RSP, 32);
    }

    /// Mirrors flushed (including the resume address), then the uniform
    /// return-to-VM sequence.
    fn yield_to_vm(&mut self, addr: *const u32) {
        self.save_registers(Some(addr));
        self.epilogue_tail();
    }

    /// Null check on a register: on zero, flush mirrors, raise, and yield.
    fn null_check(&mut self, r: Gp, addr: *const u32) {
        let ok = self.asm.new_label();
        self.asm.alu_qi(Alu::Cmp, r, 0);
        self.asm.jcc(Cond::Ne, ok);
        self.save_registers(Some(addr));
        self.call_foreign(helpers::raise_null_access as usize);
        self.epilogue_tail();
        self.asm.bind(ok);
    }

    /// The −1/0/+1 tail shared by the comparison family. Flags are set by
    /// the caller; `less` is the condition meaning "first operand less".
    fn cmp_result(&mut self, less: Cond) {
        let not_equal = self.asm.new_label();
        let is_less = self.asm.new_label();
        let end = self.asm.new_label();
        self.asm.jcc(Cond::Ne, not_equal);
        self.asm.mov_di(VM_VALUE, 0);
        self.asm.jmp(end);
        self.asm.bind(not_equal);
        self.asm.jcc(less, is_less);
        self.asm.mov_di(VM_VALUE, 1);
        self.asm.jmp(end);
        self.asm.bind(is_less);
        self.asm.mov_di(VM_VALUE, -1i32 as u32);
        self.asm.bind(end);
    }

    /// Set the whole value register to 1 when `cc` holds, else 0.
    fn test_result(&mut self, cc: Cond) {
        let hit = self.asm.new_label();
        let end = self.asm.new_label();
        self.asm.jcc(cc, hit);
        self.asm.mov_qi(VM_VALUE, 0);
        self.asm.jmp(end);
        self.asm.bind(hit);
        self.asm.mov_qi(VM_VALUE, 1);
        self.asm.bind(end);
    }

    /// `dst = src1 op src2` over 32-bit frame slots.
    fn bin32(&mut self, op: Alu, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.load_d(QWORD_FREE_1, Self::fp(s1));
        self.asm.alu_dm(op, QWORD_FREE_1, Self::fp(s2));
        self.asm.store_d(Self::fp(d), QWORD_FREE_1);
    }

    /// `dst = src1 op src2` over 64-bit frame slots.
    fn bin64(&mut self, op: Alu, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.load_q(QWORD_FREE_1, Self::fp(s1));
        self.asm.alu_qm(op, QWORD_FREE_1, Self::fp(s2));
        self.asm.store_q(Self::fp(d), QWORD_FREE_1);
    }

    /// Scalar float binary op through `xmm_free_1`.
    fn binf(&mut self, op: SseOp, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.movss_load(XMM_FREE_1, Self::fp(s1));
        self.asm.ss_op(op, XMM_FREE_1, Self::fp(s2));
        self.asm.movss_store(Self::fp(d), XMM_FREE_1);
    }

    /// Scalar double binary op through `xmm_free_1`.
    fn bind64(&mut self, op: SseOp, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.movsd_load(XMM_FREE_1, Self::fp(s1));
        self.asm.sd_op(op, XMM_FREE_1, Self::fp(s2));
        self.asm.movsd_store(Self::fp(d), XMM_FREE_1);
    }

    /// 32-bit signed division; result taken from `result` (rax or rdx).
    fn divmod32_signed(&mut self, i: InstrRef<'_>, result: Gp) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.load_d(DIV_FIRST_ARG, Self::fp(s1));
        self.asm.cdq();
        self.asm.idiv_dm(Self::fp(s2));
        self.asm.store_d(Self::fp(d), result);
    }

    fn divmod32_unsigned(&mut self, i: InstrRef<'_>, result: Gp) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.load_d(DIV_FIRST_ARG, Self::fp(s1));
        self.asm.mov_di(DIV_MOD_RESULT, 0);
        self.asm.div_dm(Self::fp(s2));
        self.asm.store_d(Self::fp(d), result);
    }

    fn divmod64_signed(&mut self, i: InstrRef<'_>, result: Gp) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.load_q(DIV_FIRST_ARG, Self::fp(s1));
        self.asm.cqo();
        self.asm.idiv_qm(Self::fp(s2));
        self.asm.store_q(Self::fp(d), result);
    }

    fn divmod64_unsigned(&mut self, i: InstrRef<'_>, result: Gp) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.load_q(DIV_FIRST_ARG, Self::fp(s1));
        self.asm.mov_di(DIV_MOD_RESULT, 0);
        self.asm.div_qm(Self::fp(s2));
        self.asm.store_q(Self::fp(d), result);
    }

    /// 32-bit shift: count through `cl`, value in `dword_free_1`.
    fn shift32(&mut self, digit: u8, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.load_d(QWORD_FREE_1, Self::fp(s1));
        self.asm.load_d(SHIFT_COUNT, Self::fp(s2));
        self.asm.shift_d_cl(digit, QWORD_FREE_1);
        self.asm.store_d(Self::fp(d), QWORD_FREE_1);
    }

    fn shift64(&mut self, digit: u8, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.load_q(QWORD_FREE_1, Self::fp(s1));
        self.asm.load_d(SHIFT_COUNT, Self::fp(s2));
        self.asm.shift_q_cl(digit, QWORD_FREE_1);
        self.asm.store_q(Self::fp(d), QWORD_FREE_1);
    }

    /// Helper call over two 32-bit integer slots, dword result.
    fn call_helper_ii(&mut self, f: usize, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.save_registers(None);
        self.asm.load_d(QWORD_FIRST_ARG, Self::fp(s1));
        self.asm.load_d(QWORD_SECOND_ARG, Self::fp(s2));
        self.call_foreign(f);
        self.restore_registers();
        self.asm.store_d(Self::fp(d), QWORD_RETURN);
    }

    /// Helper call over two 64-bit integer slots, qword result.
    fn call_helper_qq(&mut self, f: usize, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.save_registers(None);
        self.asm.load_q(QWORD_FIRST_ARG, Self::fp(s1));
        self.asm.load_q(QWORD_SECOND_ARG, Self::fp(s2));
        self.call_foreign(f);
        self.restore_registers();
        self.asm.store_q(Self::fp(d), QWORD_RETURN);
    }

    /// Helper call over two float slots, float result.
    fn call_helper_ff(&mut self, f: usize, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.save_registers(None);
        self.asm.movss_load(FLOAT_FIRST_ARG, Self::fp(s1));
        self.asm.movss_load(FLOAT_SECOND_ARG, Self::fp(s2));
        self.call_foreign(f);
        self.restore_registers();
        self.asm.movss_store(Self::fp(d), FLOAT_RETURN);
    }

    /// Helper call over two double slots, double result.
    fn call_helper_dd(&mut self, f: usize, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.save_registers(None);
        self.asm.movsd_load(FLOAT_FIRST_ARG, Self::fp(s1));
        self.asm.movsd_load(FLOAT_SECOND_ARG, Self::fp(s2));
        self.call_foreign(f);
        self.restore_registers();
        self.asm.movsd_store(Self::fp(d), FLOAT_RETURN);
    }

    fn push_imm_ptr(&mut self, value: u64) {
        self.asm.alu_qi(Alu::Sub, VM_SP, 8);
        self.asm.mov_qi(QWORD_FREE_1, value as i64);
        self.asm.store_q(Self::sp(), QWORD_FREE_1);
    }
}

impl ArchEmitter for Emitter {
    fn begin(&mut self) {
        use brio_asm::x64::{RBP, RBX, RSP, R12, R13, R14};
        let a = &mut self.asm;
        a.push(RBP);
        a.mov_qq(RBP, RSP);
        a.push(RBX);
        a.push(R12);
        a.push(R13);
        a.push(R14);
        a.alu_qi(Alu::Sub, RSP, 16);
        a.store_q(Mem::disp(RBP, VM_REGS_SPILL), QWORD_FIRST_ARG);
        self.restore_registers();

        // Computed entry: capture the address just past the prologue and
        // branch to it plus the entry offset the VM supplied.
        let a = &mut self.asm;
        a.mov_dd(QWORD_SECOND_ARG, QWORD_SECOND_ARG); // zero-extend u32 offset
        a.lea_rip0(QWORD_FREE_1);
        self.header_size = self.asm.offset();
        self.asm.alu_qq(Alu::Add, QWORD_FREE_1, QWORD_SECOND_ARG);
        self.asm.jmp_r(QWORD_FREE_1);
    }

    fn header_size(&self) -> usize {
        self.header_size
    }

    fn offset(&self) -> usize {
        self.asm.offset()
    }

    fn new_label(&mut self) -> Label {
        self.asm.new_label()
    }

    fn bind(&mut self, label: Label) {
        self.asm.bind(label);
    }

    fn emit_yield(&mut self, addr: *const u32) {
        self.yield_to_vm(addr);
    }

    #[allow(clippy::too_many_lines)]
    fn lower(&mut self, i: InstrRef<'_>, labels: &LabelTable) -> Result<(), JitError> {
        use Opcode::*;
        let op = i.opcode();
        match op {
            // --- stack manipulation ---
            PopPtr => self.asm.alu_qi(Alu::Add, VM_SP, 8),
            PshGPtr => {
                self.asm.alu_qi(Alu::Sub, VM_SP, 8);
                self.asm.mov_qi(QWORD_FREE_1, i.ptr_arg() as i64);
                self.asm.load_q(QWORD_FREE_1, Mem::base(QWORD_FREE_1));
                self.asm.store_q(Self::sp(), QWORD_FREE_1);
            }
            PshC4 => {
                self.asm.alu_qi(Alu::Sub, VM_SP, 4);
                self.asm.store_di(Self::sp(), i.dword_arg(0));
            }
            TypeId => {
                self.asm.alu_qi(Alu::Sub, VM_SP, 4);
                self.asm.store_di(Self::sp(), i.dword_arg(0));
            }
            PshV4 => {
                self.asm.alu_qi(Alu::Sub, VM_SP, 4);
                self.asm.load_d(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.store_d(Self::sp(), QWORD_FREE_1);
            }
            Psf => {
                self.asm.alu_qi(Alu::Sub, VM_SP, 8);
                self.asm.lea(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.store_q(Self::sp(), QWORD_FREE_1);
            }
            SwapPtr => {
                self.asm.load_q(QWORD_FREE_1, Self::sp());
                self.asm.load_q(QWORD_FREE_2, Self::sp_off(8));
                self.asm.store_q(Self::sp(), QWORD_FREE_2);
                self.asm.store_q(Self::sp_off(8), QWORD_FREE_1);
            }
            PshG4 => {
                self.asm.alu_qi(Alu::Sub, VM_SP, 4);
                self.asm.mov_qi(QWORD_FREE_1, i.ptr_arg() as i64);
                self.asm.load_d(QWORD_FREE_1, Mem::base(QWORD_FREE_1));
                self.asm.store_d(Self::sp(), QWORD_FREE_1);
            }
            PshC8 => {
                self.asm.alu_qi(Alu::Sub, VM_SP, 8);
                self.asm.mov_qi(QWORD_FREE_1, i.qword_arg() as i64);
                self.asm.store_q(Self::sp(), QWORD_FREE_1);
            }
            PshVPtr | PshV8 => {
                self.asm.alu_qi(Alu::Sub, VM_SP, 8);
                self.asm.load_q(QWORD_FREE_2, Self::fp(i.var_offset(0)));
                self.asm.store_q(Self::sp(), QWORD_FREE_2);
            }
            PshNull => {
                self.asm.alu_qi(Alu::Sub, VM_SP, 8);
                self.asm.store_qi(Self::sp(), 0);
            }
            Pga | ObjType | FuncPtr => self.push_imm_ptr(i.ptr_arg()),
            Var => self.push_imm_ptr(i.short_arg(0) as i64 as u64),
            PopRPtr => {
                self.asm.load_q(VM_VALUE, Self::sp());
                self.asm.alu_qi(Alu::Add, VM_SP, 8);
            }
            PshRPtr => {
                self.asm.alu_qi(Alu::Sub, VM_SP, 8);
                self.asm.store_q(Self::sp(), VM_VALUE);
            }
            RdsPtr => {
                self.asm.load_q(QWORD_FREE_1, Self::sp());
                self.null_check(QWORD_FREE_1, i.addr());
                self.asm.load_q(QWORD_FREE_1, Mem::base(QWORD_FREE_1));
                self.asm.store_q(Self::sp(), QWORD_FREE_1);
            }
            Copy => {
                let bytes = i.dword_arg(0) * 4;
                self.asm.load_q(QWORD_FIRST_ARG, Self::sp());
                self.asm.alu_qi(Alu::Add, VM_SP, 8);
                self.asm.load_q(QWORD_SECOND_ARG, Self::sp());

                let null = self.asm.new_label();
                let ok = self.asm.new_label();
                self.asm.alu_qi(Alu::Cmp, QWORD_FIRST_ARG, 0);
                self.asm.jcc(Cond::E, null);
                self.asm.alu_qi(Alu::Cmp, QWORD_SECOND_ARG, 0);
                self.asm.jcc(Cond::Ne, ok);
                self.asm.bind(null);
                self.save_registers(Some(i.addr()));
                self.call_foreign(helpers::raise_null_access as usize);
                self.epilogue_tail();

                self.asm.bind(ok);
                self.save_registers(None);
                self.asm.mov_di(QWORD_THIRD_ARG, bytes);
                self.call_foreign(helpers::mem_copy as usize);
                self.restore_registers();
            }

            // --- value-register tests ---
            Not => {
                self.asm.alu_qi(Alu::Cmp, VM_VALUE, 0);
                self.test_result(Cond::E);
            }
            Tz => {
                self.asm.alu_di(Alu::Cmp, VM_VALUE, 0);
                self.test_result(Cond::E);
            }
            Tnz => {
                self.asm.alu_di(Alu::Cmp, VM_VALUE, 0);
                self.test_result(Cond::Ne);
            }
            Ts => {
                self.asm.alu_di(Alu::Cmp, VM_VALUE, 0);
                self.test_result(Cond::L);
            }
            Tns => {
                self.asm.alu_di(Alu::Cmp, VM_VALUE, 0);
                self.test_result(Cond::Ge);
            }
            Tp => {
                self.asm.alu_di(Alu::Cmp, VM_VALUE, 0);
                self.test_result(Cond::G);
            }
            Tnp => {
                self.asm.alu_di(Alu::Cmp, VM_VALUE, 0);
                self.test_result(Cond::Le);
            }
            ClrHi => self.asm.movzx_db_r(VM_VALUE, VM_VALUE),

            // --- branches ---
            Jmp => {
                let l = labels.for_branch(i)?;
                self.asm.jmp(l);
            }
            Jz | Jnz | Js | Jns | Jp | Jnp => {
                let l = labels.for_branch(i)?;
                self.asm.alu_di(Alu::Cmp, VM_VALUE, 0);
                let cc = match op {
                    Jz => Cond::E,
                    Jnz => Cond::Ne,
                    Js => Cond::L,
                    Jns => Cond::Ge,
                    Jp => Cond::G,
                    _ => Cond::Le,
                };
                self.asm.jcc(cc, l);
            }
            JLowZ | JLowNZ => {
                let l = labels.for_branch(i)?;
                self.asm.cmp_bi(VM_VALUE, 0);
                self.asm.jcc(if op == JLowZ { Cond::E } else { Cond::Ne }, l);
            }

            // --- comparisons ---
            CmpI => {
                self.asm.load_d(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.alu_dm(Alu::Cmp, QWORD_FREE_1, Self::fp(i.var_offset(1)));
                self.cmp_result(Cond::L);
            }
            CmpU => {
                self.asm.load_d(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.alu_dm(Alu::Cmp, QWORD_FREE_1, Self::fp(i.var_offset(1)));
                self.cmp_result(Cond::B);
            }
            CmpI64 => {
                self.asm.load_q(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.alu_qm(Alu::Cmp, QWORD_FREE_1, Self::fp(i.var_offset(1)));
                self.cmp_result(Cond::L);
            }
            CmpU64 | CmpPtr => {
                self.asm.load_q(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.alu_qm(Alu::Cmp, QWORD_FREE_1, Self::fp(i.var_offset(1)));
                self.cmp_result(Cond::B);
            }
            CmpF => {
                self.asm.movss_load(XMM_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.comiss(XMM_FREE_1, Self::fp(i.var_offset(1)));
                self.cmp_result(Cond::B);
            }
            CmpD => {
                self.asm.movsd_load(XMM_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.comisd(XMM_FREE_1, Self::fp(i.var_offset(1)));
                self.cmp_result(Cond::B);
            }
            CmpIi => {
                self.asm.load_d(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.alu_di(Alu::Cmp, QWORD_FREE_1, i.int_arg());
                self.cmp_result(Cond::L);
            }
            CmpIu => {
                self.asm.load_d(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.alu_di(Alu::Cmp, QWORD_FREE_1, i.dword_arg(0) as i32);
                self.cmp_result(Cond::B);
            }
            CmpIf => {
                let c = self.pool.add_f32(i.float_arg(0));
                self.asm.movss_load(XMM_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.comiss_rip(XMM_FREE_1, self.pool_label, c as i64);
                self.cmp_result(Cond::B);
            }

            // --- increments / decrements ---
            IncI8 => self.asm.unary_m(Unary::Inc, Width::B, Mem::base(VM_VALUE)),
            DecI8 => self.asm.unary_m(Unary::Dec, Width::B, Mem::base(VM_VALUE)),
            IncI16 => self.asm.unary_m(Unary::Inc, Width::W, Mem::base(VM_VALUE)),
            DecI16 => self.asm.unary_m(Unary::Dec, Width::W, Mem::base(VM_VALUE)),
            IncI => self.asm.unary_m(Unary::Inc, Width::D, Mem::base(VM_VALUE)),
            DecI => self.asm.unary_m(Unary::Dec, Width::D, Mem::base(VM_VALUE)),
            IncI64 => self.asm.unary_m(Unary::Inc, Width::Q, Mem::base(VM_VALUE)),
            DecI64 => self.asm.unary_m(Unary::Dec, Width::Q, Mem::base(VM_VALUE)),
            IncF | DecF => {
                let c = self.pool.add_f32(1.0);
                let sse = if op == IncF { SseOp::Add } else { SseOp::Sub };
                self.asm.movss_load(XMM_FREE_1, Mem::base(VM_VALUE));
                self.asm.ss_op_rip(sse, XMM_FREE_1, self.pool_label, c as i64);
                self.asm.movss_store(Mem::base(VM_VALUE), XMM_FREE_1);
            }
            IncD | DecD => {
                let c = self.pool.add_f64(1.0);
                let sse = if op == IncD { SseOp::Add } else { SseOp::Sub };
                self.asm.movsd_load(XMM_FREE_1, Mem::base(VM_VALUE));
                self.asm.sd_op_rip(sse, XMM_FREE_1, self.pool_label, c as i64);
                self.asm.movsd_store(Mem::base(VM_VALUE), XMM_FREE_1);
            }
            IncVi => self.asm.unary_m(Unary::Inc, Width::D, Self::fp(i.var_offset(0))),
            DecVi => self.asm.unary_m(Unary::Dec, Width::D, Self::fp(i.var_offset(0))),

            // --- negation / bitwise not ---
            NegI => self.asm.unary_m(Unary::Neg, Width::D, Self::fp(i.var_offset(0))),
            NegI64 => self.asm.unary_m(Unary::Neg, Width::Q, Self::fp(i.var_offset(0))),
            NegF => {
                let off = i.var_offset(0);
                self.asm.load_d(QWORD_FREE_1, Self::fp(off));
                self.asm.alu_di(Alu::Xor, QWORD_FREE_1, i32::MIN);
                self.asm.store_d(Self::fp(off), QWORD_FREE_1);
            }
            NegD => {
                let off = i.var_offset(0);
                self.asm.load_q(QWORD_FREE_1, Self::fp(off));
                self.asm.mov_qi(QWORD_FREE_2, i64::MIN);
                self.asm.alu_qq(Alu::Xor, QWORD_FREE_1, QWORD_FREE_2);
                self.asm.store_q(Self::fp(off), QWORD_FREE_1);
            }
            BNot => self.asm.unary_m(Unary::Not, Width::D, Self::fp(i.var_offset(0))),
            BNot64 => self.asm.unary_m(Unary::Not, Width::Q, Self::fp(i.var_offset(0))),

            // --- integer arithmetic ---
            AddI => self.bin32(Alu::Add, i),
            SubI => self.bin32(Alu::Sub, i),
            BAnd => self.bin32(Alu::And, i),
            BOr => self.bin32(Alu::Or, i),
            BXor => self.bin32(Alu::Xor, i),
            MulI => {
                let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
                self.asm.load_d(QWORD_FREE_1, Self::fp(s1));
                self.asm.imul_dm(QWORD_FREE_1, Self::fp(s2));
                self.asm.store_d(Self::fp(d), QWORD_FREE_1);
            }
            DivI => self.divmod32_signed(i, DIV_FIRST_ARG),
            ModI => self.divmod32_signed(i, DIV_MOD_RESULT),
            DivU => self.divmod32_unsigned(i, DIV_FIRST_ARG),
            ModU => self.divmod32_unsigned(i, DIV_MOD_RESULT),
            AddI64 => self.bin64(Alu::Add, i),
            SubI64 => self.bin64(Alu::Sub, i),
            BAnd64 => self.bin64(Alu::And, i),
            BOr64 => self.bin64(Alu::Or, i),
            BXor64 => self.bin64(Alu::Xor, i),
            MulI64 => {
                let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
                self.asm.load_q(QWORD_FREE_1, Self::fp(s1));
                self.asm.imul_qm(QWORD_FREE_1, Self::fp(s2));
                self.asm.store_q(Self::fp(d), QWORD_FREE_1);
            }
            DivI64 => self.divmod64_signed(i, DIV_FIRST_ARG),
            ModI64 => self.divmod64_signed(i, DIV_MOD_RESULT),
            DivU64 => self.divmod64_unsigned(i, DIV_FIRST_ARG),
            ModU64 => self.divmod64_unsigned(i, DIV_MOD_RESULT),
            Bsll => self.shift32(4, i),
            Bsrl => self.shift32(5, i),
            Bsra => self.shift32(7, i),
            Bsll64 => self.shift64(4, i),
            Bsrl64 => self.shift64(5, i),
            Bsra64 => self.shift64(7, i),

            // --- float / double arithmetic ---
            AddF => self.binf(SseOp::Add, i),
            SubF => self.binf(SseOp::Sub, i),
            MulF => self.binf(SseOp::Mul, i),
            DivF => self.binf(SseOp::Div, i),
            ModF => self.call_helper_ff(helpers::mod_float as usize, i),
            AddD => self.bind64(SseOp::Add, i),
            SubD => self.bind64(SseOp::Sub, i),
            MulD => self.bind64(SseOp::Mul, i),
            DivD => self.bind64(SseOp::Div, i),
            ModD => self.call_helper_dd(helpers::mod_double as usize, i),

            // --- immediate arithmetic ---
            AddIi | SubIi | MulIi => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                let imm = i.dword_arg(1) as i32;
                self.asm.load_d(QWORD_FREE_1, Self::fp(s));
                match op {
                    AddIi => self.asm.alu_di(Alu::Add, QWORD_FREE_1, imm),
                    SubIi => self.asm.alu_di(Alu::Sub, QWORD_FREE_1, imm),
                    _ => self.asm.imul_di(QWORD_FREE_1, QWORD_FREE_1, imm),
                }
                self.asm.store_d(Self::fp(d), QWORD_FREE_1);
            }
            AddIf | SubIf | MulIf => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                let c = self.pool.add_f32(i.float_arg(1));
                let sse = match op {
                    AddIf => SseOp::Add,
                    SubIf => SseOp::Sub,
                    _ => SseOp::Mul,
                };
                self.asm.movss_load(XMM_FREE_1, Self::fp(s));
                self.asm.ss_op_rip(sse, XMM_FREE_1, self.pool_label, c as i64);
                self.asm.movss_store(Self::fp(d), XMM_FREE_1);
            }

            // --- powers ---
            PowI => self.call_helper_ii(helpers::ipow as usize, i),
            PowU => self.call_helper_ii(helpers::upow as usize, i),
            PowF => self.call_helper_ff(helpers::fpow as usize, i),
            PowD => self.call_helper_dd(helpers::dpow as usize, i),
            PowI64 => self.call_helper_qq(helpers::i64pow as usize, i),
            PowU64 => self.call_helper_qq(helpers::u64pow as usize, i),
            PowDi => {
                let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
                self.save_registers(None);
                self.asm.movsd_load(FLOAT_FIRST_ARG, Self::fp(s1));
                self.asm.load_d(QWORD_FIRST_ARG, Self::fp(s2));
                self.call_foreign(helpers::dipow as usize);
                self.restore_registers();
                self.asm.movsd_store(Self::fp(d), FLOAT_RETURN);
            }

            // --- conversions, in place ---
            ItoF => {
                let off = i.var_offset(0);
                self.asm.pxor(XMM_FREE_1, XMM_FREE_1);
                self.asm.cvtsi2ss_dm(XMM_FREE_1, Self::fp(off));
                self.asm.movss_store(Self::fp(off), XMM_FREE_1);
            }
            FtoI => {
                let off = i.var_offset(0);
                self.asm.cvttss2si_dm(QWORD_FREE_2, Self::fp(off));
                self.asm.store_d(Self::fp(off), QWORD_FREE_2);
            }
            UtoF => {
                let off = i.var_offset(0);
                self.save_registers(None);
                self.asm.load_d(QWORD_FIRST_ARG, Self::fp(off));
                self.call_foreign(helpers::uint_to_float as usize);
                self.restore_registers();
                self.asm.movss_store(Self::fp(off), FLOAT_RETURN);
            }
            FtoU => {
                let off = i.var_offset(0);
                self.asm.cvttss2si_qm(QWORD_FREE_2, Self::fp(off));
                self.asm.store_d(Self::fp(off), QWORD_FREE_2);
            }
            SbToI => {
                let off = i.var_offset(0);
                self.asm.movsx_db(QWORD_FREE_2, Self::fp(off));
                self.asm.store_d(Self::fp(off), QWORD_FREE_2);
            }
            SwToI => {
                let off = i.var_offset(0);
                self.asm.movsx_dw(QWORD_FREE_2, Self::fp(off));
                self.asm.store_d(Self::fp(off), QWORD_FREE_2);
            }
            UbToI => {
                let off = i.var_offset(0);
                self.asm.movzx_db(QWORD_FREE_2, Self::fp(off));
                self.asm.store_d(Self::fp(off), QWORD_FREE_2);
            }
            UwToI => {
                let off = i.var_offset(0);
                self.asm.movzx_dw(QWORD_FREE_2, Self::fp(off));
                self.asm.store_d(Self::fp(off), QWORD_FREE_2);
            }
            ItoB | ItoW => {
                let off = i.var_offset(0);
                let mask = if op == ItoB { 0xFF } else { 0xFFFF };
                self.asm.load_d(QWORD_FREE_1, Self::fp(off));
                self.asm.alu_di(Alu::And, QWORD_FREE_1, mask);
                self.asm.store_d(Self::fp(off), QWORD_FREE_1);
            }

            // --- conversions, two slots ---
            DtoI => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.cvttsd2si_dm(QWORD_FREE_2, Self::fp(s));
                self.asm.store_d(Self::fp(d), QWORD_FREE_2);
            }
            DtoU => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.cvttsd2si_qm(QWORD_FREE_2, Self::fp(s));
                self.asm.store_d(Self::fp(d), QWORD_FREE_2);
            }
            DtoF => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.pxor(XMM_FREE_1, XMM_FREE_1);
                self.asm.cvtsd2ss(XMM_FREE_1, Self::fp(s));
                self.asm.movss_store(Self::fp(d), XMM_FREE_1);
            }
            ItoD => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.pxor(XMM_FREE_1, XMM_FREE_1);
                self.asm.cvtsi2sd_dm(XMM_FREE_1, Self::fp(s));
                self.asm.movsd_store(Self::fp(d), XMM_FREE_1);
            }
            UtoD => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.save_registers(None);
                self.asm.load_d(QWORD_FIRST_ARG, Self::fp(s));
                self.call_foreign(helpers::uint_to_double as usize);
                self.restore_registers();
                self.asm.movsd_store(Self::fp(d), FLOAT_RETURN);
            }
            FtoD => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.pxor(XMM_FREE_1, XMM_FREE_1);
                self.asm.cvtss2sd(XMM_FREE_1, Self::fp(s));
                self.asm.movsd_store(Self::fp(d), XMM_FREE_1);
            }
            I64toI => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.load_q(QWORD_FREE_1, Self::fp(s));
                self.asm.store_d(Self::fp(d), QWORD_FREE_1);
            }
            UtoI64 => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.load_d(QWORD_FREE_1, Self::fp(s));
                self.asm.store_q(Self::fp(d), QWORD_FREE_1);
            }
            ItoI64 => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.load_d(QWORD_FREE_1, Self::fp(s));
                self.asm.cdqe();
                self.asm.store_q(Self::fp(d), QWORD_FREE_1);
            }
            FtoI64 => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.cvttss2si_qm(QWORD_FREE_1, Self::fp(s));
                self.asm.store_q(Self::fp(d), QWORD_FREE_1);
            }
            DtoI64 => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.cvttsd2si_qm(QWORD_FREE_1, Self::fp(s));
                self.asm.store_q(Self::fp(d), QWORD_FREE_1);
            }
            FtoU64 => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.save_registers(None);
                self.asm.movss_load(FLOAT_FIRST_ARG, Self::fp(s));
                self.call_foreign(helpers::float_to_uint64 as usize);
                self.restore_registers();
                self.asm.store_q(Self::fp(d), QWORD_RETURN);
            }
            DtoU64 => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.save_registers(None);
                self.asm.movsd_load(FLOAT_FIRST_ARG, Self::fp(s));
                self.call_foreign(helpers::double_to_uint64 as usize);
                self.restore_registers();
                self.asm.store_q(Self::fp(d), QWORD_RETURN);
            }
            I64toF => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.pxor(XMM_FREE_1, XMM_FREE_1);
                self.asm.cvtsi2ss_qm(XMM_FREE_1, Self::fp(s));
                self.asm.movss_store(Self::fp(d), XMM_FREE_1);
            }
            U64toF => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.save_registers(None);
                self.asm.load_q(QWORD_FIRST_ARG, Self::fp(s));
                self.call_foreign(helpers::uint64_to_float as usize);
                self.restore_registers();
                self.asm.movss_store(Self::fp(d), FLOAT_RETURN);
            }
            I64toD => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.pxor(XMM_FREE_1, XMM_FREE_1);
                self.asm.cvtsi2sd_qm(XMM_FREE_1, Self::fp(s));
                self.asm.movsd_store(Self::fp(d), XMM_FREE_1);
            }
            U64toD => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.save_registers(None);
                self.asm.load_q(QWORD_FIRST_ARG, Self::fp(s));
                self.call_foreign(helpers::uint64_to_double as usize);
                self.restore_registers();
                self.asm.movsd_store(Self::fp(d), FLOAT_RETURN);
            }

            // --- frame moves and constants ---
            SetV1 | SetV2 | SetV4 => {
                self.asm.store_di(Self::fp(i.var_offset(0)), i.dword_arg(0));
            }
            SetV8 => {
                self.asm.mov_qi(QWORD_FREE_2, i.qword_arg() as i64);
                self.asm.store_q(Self::fp(i.var_offset(0)), QWORD_FREE_2);
            }
            CpyVtoV4 => {
                self.asm.load_d(QWORD_FREE_2, Self::fp(i.var_offset(1)));
                self.asm.store_d(Self::fp(i.var_offset(0)), QWORD_FREE_2);
            }
            CpyVtoV8 => {
                self.asm.load_q(QWORD_FREE_2, Self::fp(i.var_offset(1)));
                self.asm.store_q(Self::fp(i.var_offset(0)), QWORD_FREE_2);
            }
            CpyVtoR4 => self.asm.load_d(VM_VALUE, Self::fp(i.var_offset(0))),
            CpyVtoR8 => self.asm.load_q(VM_VALUE, Self::fp(i.var_offset(0))),
            CpyRtoV4 => self.asm.store_d(Self::fp(i.var_offset(0)), VM_VALUE),
            CpyRtoV8 => self.asm.store_q(Self::fp(i.var_offset(0)), VM_VALUE),
            CpyVtoG4 => {
                self.asm.load_d(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.mov_qi(QWORD_FREE_2, i.ptr_arg() as i64);
                self.asm.store_d(Mem::base(QWORD_FREE_2), QWORD_FREE_1);
            }
            CpyGtoV4 => {
                self.asm.mov_qi(QWORD_FREE_1, i.ptr_arg() as i64);
                self.asm.load_d(QWORD_FREE_1, Mem::base(QWORD_FREE_1));
                self.asm.store_d(Self::fp(i.var_offset(0)), QWORD_FREE_1);
            }
            SetG4 => {
                self.asm.mov_qi(QWORD_FREE_1, i.ptr_arg() as i64);
                self.asm.store_di(Mem::base(QWORD_FREE_1), i.dword_arg(2));
            }
            LdGRdR4 => {
                self.asm.mov_qi(VM_VALUE, i.ptr_arg() as i64);
                self.asm.load_d(QWORD_FREE_1, Mem::base(VM_VALUE));
                self.asm.store_d(Self::fp(i.var_offset(0)), QWORD_FREE_1);
            }
            Ldg => self.asm.mov_qi(VM_VALUE, i.ptr_arg() as i64),
            Ldv => self.asm.lea(VM_VALUE, Self::fp(i.var_offset(0))),
            ClrVPtr => self.asm.store_qi(Self::fp(i.var_offset(0)), 0),

            // --- writes/reads through the value register ---
            WrtV1 => {
                self.asm.load_b(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.store_b(Mem::base(VM_VALUE), QWORD_FREE_1);
            }
            WrtV2 => {
                self.asm.load_w(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.store_w(Mem::base(VM_VALUE), QWORD_FREE_1);
            }
            WrtV4 => {
                self.asm.load_d(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.store_d(Mem::base(VM_VALUE), QWORD_FREE_1);
            }
            WrtV8 => {
                self.asm.load_q(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.asm.store_q(Mem::base(VM_VALUE), QWORD_FREE_1);
            }
            Rdr1 => {
                self.asm.movzx_db(QWORD_FREE_1, Mem::base(VM_VALUE));
                self.asm.store_d(Self::fp(i.var_offset(0)), QWORD_FREE_1);
            }
            Rdr2 => {
                self.asm.movzx_dw(QWORD_FREE_1, Mem::base(VM_VALUE));
                self.asm.store_d(Self::fp(i.var_offset(0)), QWORD_FREE_1);
            }
            Rdr4 => {
                self.asm.load_d(QWORD_FREE_1, Mem::base(VM_VALUE));
                self.asm.store_d(Self::fp(i.var_offset(0)), QWORD_FREE_1);
            }
            Rdr8 => {
                self.asm.load_q(QWORD_FREE_1, Mem::base(VM_VALUE));
                self.asm.store_q(Self::fp(i.var_offset(0)), QWORD_FREE_1);
            }

            // --- object register ---
            LoadObj => {
                let off = i.var_offset(0);
                self.asm.mov_qi(VM_OBJECT_TYPE, 0);
                self.asm.load_q(VM_OBJECT, Self::fp(off));
                self.asm.store_qi(Self::fp(off), 0);
            }
            StoreObj => {
                self.asm.store_q(Self::fp(i.var_offset(0)), VM_OBJECT);
                self.asm.mov_qi(VM_OBJECT, 0);
            }
            GetObj => {
                let off = i.word_arg(0) as i32 * 4;
                self.asm.mov_qq(QWORD_FREE_1, VM_SP);
                self.asm.alu_qi(Alu::Add, QWORD_FREE_1, off);
                self.asm.load_q(QWORD_FREE_2, Mem::base(QWORD_FREE_1));
                self.asm.imul_qi(QWORD_FREE_2, QWORD_FREE_2, -4);
                self.asm.load_q(QWORD_FREE_3, Mem::index(VM_SP, QWORD_FREE_2));
                self.asm.store_q(Mem::base(QWORD_FREE_1), QWORD_FREE_3);
                self.asm.store_qi(Mem::index(VM_SP, QWORD_FREE_2), 0);
            }
            GetObjRef => {
                let off = i.word_arg(0) as i32 * 4;
                self.asm.mov_qq(QWORD_FREE_1, VM_SP);
                self.asm.alu_qi(Alu::Add, QWORD_FREE_1, off);
                self.asm.load_q(QWORD_FREE_3, Mem::base(QWORD_FREE_1));
                self.asm.imul_qi(QWORD_FREE_3, QWORD_FREE_3, 4);
                self.asm.mov_qq(QWORD_FREE_2, VM_SFP);
                self.asm.alu_qq(Alu::Sub, QWORD_FREE_2, QWORD_FREE_3);
                self.asm.load_q(QWORD_FREE_2, Mem::base(QWORD_FREE_2));
                self.asm.store_q(Mem::base(QWORD_FREE_1), QWORD_FREE_2);
            }
            GetRef => {
                let off = i.word_arg(0) as i32 * 4;
                self.asm.mov_qq(QWORD_FREE_1, VM_SP);
                self.asm.alu_qi(Alu::Add, QWORD_FREE_1, off);
                self.asm.load_d(QWORD_FREE_2, Mem::base(QWORD_FREE_1));
                self.asm.imul_di(QWORD_FREE_2, QWORD_FREE_2, 4);
                self.asm.mov_qq(QWORD_FREE_3, VM_SFP);
                self.asm.alu_qq(Alu::Sub, QWORD_FREE_3, QWORD_FREE_2);
                self.asm.store_q(Mem::base(QWORD_FREE_1), QWORD_FREE_3);
            }

            // --- reference checks ---
            ChkRef => {
                self.asm.load_q(QWORD_FREE_1, Self::sp());
                self.null_check(QWORD_FREE_1, i.addr());
            }
            ChkRefS => {
                self.asm.load_q(QWORD_FREE_1, Self::sp());
                self.asm.load_q(QWORD_FREE_1, Mem::base(QWORD_FREE_1));
                self.null_check(QWORD_FREE_1, i.addr());
            }
            ChkNullV => {
                self.asm.load_d(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.null_check(QWORD_FREE_1, i.addr());
            }
            ChkNullS => {
                let off = i.word_arg(0) as i32 * 4;
                self.asm.load_q(QWORD_FREE_1, Self::sp_off(off));
                self.null_check(QWORD_FREE_1, i.addr());
            }
            AddSi => {
                self.asm.load_q(QWORD_FREE_2, Self::sp());
                self.null_check(QWORD_FREE_2, i.addr());
                self.asm.alu_qi(Alu::Add, QWORD_FREE_2, i.short_arg(0) as i32);
                self.asm.store_q(Self::sp(), QWORD_FREE_2);
            }
            LoadThisR => {
                self.asm.load_q(VM_VALUE, Self::fp(0));
                self.null_check(VM_VALUE, i.addr());
                self.asm.alu_qi(Alu::Add, VM_VALUE, i.short_arg(0) as i32);
            }
            LoadRObjR => {
                self.asm.load_q(QWORD_FREE_2, Self::fp(i.var_offset(0)));
                self.null_check(QWORD_FREE_2, i.addr());
                self.asm.alu_qi(Alu::Add, QWORD_FREE_2, i.short_arg(1) as i32);
                self.asm.mov_qq(VM_VALUE, QWORD_FREE_2);
            }
            LoadVObjR => {
                let off = i.var_offset(0) + i.short_arg(1) as i32;
                self.asm.lea(VM_VALUE, Self::fp(off));
            }

            // --- list buffers ---
            SetListSize | SetListType => {
                self.asm.load_q(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.null_check(QWORD_FREE_1, i.addr());
                self.asm
                    .store_di(Mem::disp(QWORD_FREE_1, i.dword_arg(0) as i32), i.dword_arg(1));
            }
            PshListElmnt => {
                self.asm.load_q(QWORD_FREE_1, Self::fp(i.var_offset(0)));
                self.null_check(QWORD_FREE_1, i.addr());
                self.asm.alu_qi(Alu::Add, QWORD_FREE_1, i.dword_arg(0) as i32);
                self.asm.alu_qi(Alu::Sub, VM_SP, 8);
                self.asm.store_q(Self::sp(), QWORD_FREE_1);
            }

            // --- yields ---
            Suspend => {
                if self.with_suspend {
                    self.yield_to_vm(i.addr());
                }
            }
            Ret | Call | CallSys | CallBnd | CallIntf | CallPtr | ThisCall1 | Alloc | Free
            | RefCpy | RefCpyV | Cast | AllocMem | Jmpp => self.yield_to_vm(i.addr()),

            // Handled by the driver.
            JitEntry | Str => unreachable!("driver handles {op:?}"),
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<u8>, JitError> {
        if !self.pool.is_empty() {
            self.pool.embed(&mut self.asm.buf, self.pool_label);
        }
        Ok(self.asm.buf.finalize()?)
    }
}
