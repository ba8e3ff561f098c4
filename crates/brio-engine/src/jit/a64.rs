//! AArch64 lowering table.
//!
//! The AAPCS64 profile keeps the five mirrors in the argument bank
//! (`x3..x7`); they are caller-saved, so every foreign transfer goes
//! through the same save/reload protocol as the x86-64 backend. The frame
//! is a single `stp x29, x30` pair with the `VmRegisters` pointer spilled
//! above it; `blr` clobbers `x30`, which the epilogue pair reloads.
//!
//! Unsigned conversions use the ISA's direct `ucvtf`/`fcvtzu` forms
//! instead of the helper calls the x86-64 backend needs.

use std::mem::offset_of;

use brio_asm::a64::{Asm, Cond, VReg, XReg, SP};
use brio_asm::{ConstPool, Label};

use crate::jit::runtime::helpers;
use crate::jit::{ArchEmitter, JitError, LabelTable};
use crate::vm::bytecode::{InstrRef, Opcode};
use crate::vm::registers::VmRegisters;

/// Register roles (default and Android profiles share the AAPCS64
/// assignment).
pub(crate) mod regs {
    use brio_asm::a64::{VReg, XReg};

    pub const QWORD_FREE_1: XReg = XReg(9);
    pub const QWORD_FREE_2: XReg = XReg(10);
    pub const QWORD_FREE_3: XReg = XReg(11);

    pub const FLOAT_FREE_1: VReg = VReg(0);
    pub const FLOAT_FREE_2: VReg = VReg(1);

    pub const QWORD_FIRST_ARG: XReg = XReg(0);
    pub const QWORD_SECOND_ARG: XReg = XReg(1);
    pub const QWORD_THIRD_ARG: XReg = XReg(2);

    pub const FLOAT_FIRST_ARG: VReg = VReg(0);
    pub const FLOAT_SECOND_ARG: VReg = VReg(1);

    pub const QWORD_RETURN: XReg = XReg(0);
    pub const FLOAT_RETURN: VReg = VReg(0);

    pub const RESTORE: XReg = XReg(8);
    /// Call-target scratch; `x16` stays free for addressing fallbacks.
    pub const CALL_TARGET: XReg = XReg(17);

    pub const VM_SFP: XReg = XReg(3);
    pub const VM_SP: XReg = XReg(4);
    pub const VM_VALUE: XReg = XReg(5);
    pub const VM_OBJECT: XReg = XReg(6);
    pub const VM_OBJECT_TYPE: XReg = XReg(7);

    pub const FP: XReg = XReg(29);
    pub const LR: XReg = XReg(30);
}

use regs::*;

/// Frame size: the x29/x30 pair plus the `VmRegisters` spill.
const FRAME_BYTES: i32 = 32;
/// Spill slot of the incoming `VmRegisters` pointer, relative to sp.
const VM_REGS_SPILL: i32 = 16;

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

    fn restore_registers(&mut self) {
        let a = &mut self.asm;
        a.ldr_x(RESTORE, SP, VM_REGS_SPILL);
        a.ldr_x(VM_SFP, RESTORE, offset_of!(VmRegisters, stack_frame_pointer) as i32);
        a.ldr_x(VM_SP, RESTORE, offset_of!(VmRegisters, stack_pointer) as i32);
        a.ldr_x(VM_VALUE, RESTORE, offset_of!(VmRegisters, value_register) as i32);
        a.ldr_x(VM_OBJECT, RESTORE, offset_of!(VmRegisters, object_register) as i32);
        a.ldr_x(VM_OBJECT_TYPE, RESTORE, offset_of!(VmRegisters, object_type) as i32);
    }

    fn save_registers(&mut self, resume_at: Option<*const u32>) {
        let a = &mut self.asm;
        a.ldr_x(RESTORE, SP, VM_REGS_SPILL);
        if let Some(addr) = resume_at {
            a.mov_xi(QWORD_FREE_1, addr as u64);
            a.str_x(QWORD_FREE_1, RESTORE, offset_of!(VmRegisters, program_pointer) as i32);
        }
        a.str_x(VM_SFP, RESTORE, offset_of!(VmRegisters, stack_frame_pointer) as i32);
        a.str_x(VM_SP, RESTORE, offset_of!(VmRegisters, stack_pointer) as i32);
        a.str_x(VM_VALUE, RESTORE, offset_of!(VmRegisters, value_register) as i32);
        a.str_x(VM_OBJECT, RESTORE, offset_of!(VmRegisters, object_register) as i32);
        a.str_x(VM_OBJECT_TYPE, RESTORE, offset_of!(VmRegisters, object_type) as i32);
    }

    fn epilogue_tail(&mut self) {
        let a = &mut self.asm;
        a.nop();
        a.ldp_post_x(FP, LR, SP, FRAME_BYTES);
        a.ret();
    }

    fn call_foreign(&mut self, f: usize) {
        self.asm.mov_xi(CALL_TARGET, f as u64);
        self.asm.blr(CALL_TARGET);
    }

    fn yield_to_vm(&mut self, addr: *const u32) {
        self.save_registers(Some(addr));
        self.epilogue_tail();
    }

    fn null_check(&mut self, r: XReg, addr: *const u32) {
        let ok = self.asm.new_label();
        self.asm.cmp_xi0(r);
        self.asm.b_cond(Cond::Ne, ok);
        self.save_registers(Some(addr));
        self.call_foreign(helpers::raise_null_access as usize);
        self.epilogue_tail();
        self.asm.bind(ok);
    }

    /// −1/0/+1 tail after a compare; `less` means "first operand less".
    fn cmp_result(&mut self, less: Cond) {
        let not_equal = self.asm.new_label();
        let is_less = self.asm.new_label();
        let end = self.asm.new_label();
        self.asm.b_cond(Cond::Ne, not_equal);
        self.asm.mov_wi(VM_VALUE, 0);
        self.asm.b(end);
        self.asm.bind(not_equal);
        self.asm.b_cond(less, is_less);
        self.asm.mov_wi(VM_VALUE, 1);
        self.asm.b(end);
        self.asm.bind(is_less);
        self.asm.mov_wi(VM_VALUE, -1i32 as u32);
        self.asm.bind(end);
    }

    /// Whole value register := 1 when `cc` holds, else 0.
    fn test_result(&mut self, cc: Cond) {
        let hit = self.asm.new_label();
        let end = self.asm.new_label();
        self.asm.b_cond(cc, hit);
        self.asm.mov_xi(VM_VALUE, 0);
        self.asm.b(end);
        self.asm.bind(hit);
        self.asm.mov_xi(VM_VALUE, 1);
        self.asm.bind(end);
    }

    fn push_x(&mut self, r: XReg) {
        self.asm.sub_xi(VM_SP, VM_SP, 8);
        self.asm.str_x(r, VM_SP, 0);
    }

    fn push_w(&mut self, r: XReg) {
        self.asm.sub_xi(VM_SP, VM_SP, 4);
        self.asm.str_w(r, VM_SP, 0);
    }

    /// `dst = src1 op src2` over 32-bit slots; `op` emits the middle
    /// instruction from `(free1, free1, free2)`.
    fn bin32(&mut self, i: InstrRef<'_>, op: fn(&mut Asm, XReg, XReg, XReg)) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.ldr_w(QWORD_FREE_1, VM_SFP, s1);
        self.asm.ldr_w(QWORD_FREE_2, VM_SFP, s2);
        op(&mut self.asm, QWORD_FREE_1, QWORD_FREE_1, QWORD_FREE_2);
        self.asm.str_w(QWORD_FREE_1, VM_SFP, d);
    }

    fn bin64(&mut self, i: InstrRef<'_>, op: fn(&mut Asm, XReg, XReg, XReg)) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.ldr_x(QWORD_FREE_1, VM_SFP, s1);
        self.asm.ldr_x(QWORD_FREE_2, VM_SFP, s2);
        op(&mut self.asm, QWORD_FREE_1, QWORD_FREE_1, QWORD_FREE_2);
        self.asm.str_x(QWORD_FREE_1, VM_SFP, d);
    }

    fn binf(&mut self, i: InstrRef<'_>, op: fn(&mut Asm, VReg, VReg, VReg)) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.ldr_s(FLOAT_FREE_1, VM_SFP, s1);
        self.asm.ldr_s(FLOAT_FREE_2, VM_SFP, s2);
        op(&mut self.asm, FLOAT_FREE_1, FLOAT_FREE_1, FLOAT_FREE_2);
        self.asm.str_s(FLOAT_FREE_1, VM_SFP, d);
    }

    fn bind_f64(&mut self, i: InstrRef<'_>, op: fn(&mut Asm, VReg, VReg, VReg)) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.ldr_d(FLOAT_FREE_1, VM_SFP, s1);
        self.asm.ldr_d(FLOAT_FREE_2, VM_SFP, s2);
        op(&mut self.asm, FLOAT_FREE_1, FLOAT_FREE_1, FLOAT_FREE_2);
        self.asm.str_d(FLOAT_FREE_1, VM_SFP, d);
    }

    /// `a / b` or `a mod b` (via `msub`) with the given divide.
    fn divmod32(&mut self, i: InstrRef<'_>, div: fn(&mut Asm, XReg, XReg, XReg), modulo: bool) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.ldr_w(QWORD_FREE_1, VM_SFP, s1);
        self.asm.ldr_w(QWORD_FREE_2, VM_SFP, s2);
        if modulo {
            div(&mut self.asm, QWORD_FREE_3, QWORD_FREE_1, QWORD_FREE_2);
            self.asm.msub_ww(QWORD_FREE_1, QWORD_FREE_3, QWORD_FREE_2, QWORD_FREE_1);
        } else {
            div(&mut self.asm, QWORD_FREE_1, QWORD_FREE_1, QWORD_FREE_2);
        }
        self.asm.str_w(QWORD_FREE_1, VM_SFP, d);
    }

    fn divmod64(&mut self, i: InstrRef<'_>, div: fn(&mut Asm, XReg, XReg, XReg), modulo: bool) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.asm.ldr_x(QWORD_FREE_1, VM_SFP, s1);
        self.asm.ldr_x(QWORD_FREE_2, VM_SFP, s2);
        if modulo {
            div(&mut self.asm, QWORD_FREE_3, QWORD_FREE_1, QWORD_FREE_2);
            self.asm.msub_xx(QWORD_FREE_1, QWORD_FREE_3, QWORD_FREE_2, QWORD_FREE_1);
        } else {
            div(&mut self.asm, QWORD_FREE_1, QWORD_FREE_1, QWORD_FREE_2);
        }
        self.asm.str_x(QWORD_FREE_1, VM_SFP, d);
    }

    fn call_helper_ii(&mut self, f: usize, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.save_registers(None);
        self.asm.ldr_w(QWORD_FIRST_ARG, VM_SFP, s1);
        self.asm.ldr_w(QWORD_SECOND_ARG, VM_SFP, s2);
        self.call_foreign(f);
        self.restore_registers();
        self.asm.str_w(QWORD_RETURN, VM_SFP, d);
    }

    fn call_helper_qq(&mut self, f: usize, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.save_registers(None);
        self.asm.ldr_x(QWORD_FIRST_ARG, VM_SFP, s1);
        self.asm.ldr_x(QWORD_SECOND_ARG, VM_SFP, s2);
        self.call_foreign(f);
        self.restore_registers();
        self.asm.str_x(QWORD_RETURN, VM_SFP, d);
    }

    fn call_helper_ff(&mut self, f: usize, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.save_registers(None);
        self.asm.ldr_s(FLOAT_FIRST_ARG, VM_SFP, s1);
        self.asm.ldr_s(FLOAT_SECOND_ARG, VM_SFP, s2);
        self.call_foreign(f);
        self.restore_registers();
        self.asm.str_s(FLOAT_RETURN, VM_SFP, d);
    }

    fn call_helper_dd(&mut self, f: usize, i: InstrRef<'_>) {
        let (d, s1, s2) = (i.var_offset(0), i.var_offset(1), i.var_offset(2));
        self.save_registers(None);
        self.asm.ldr_d(FLOAT_FIRST_ARG, VM_SFP, s1);
        self.asm.ldr_d(FLOAT_SECOND_ARG, VM_SFP, s2);
        self.call_foreign(f);
        self.restore_registers();
        self.asm.str_d(FLOAT_RETURN, VM_SFP, d);
    }
}

impl ArchEmitter for Emitter {
    fn begin(&mut self) {
        self.asm.stp_pre_x(FP, LR, SP, -FRAME_BYTES);
        self.asm.mov_sp(FP, SP);
        self.asm.str_x(QWORD_FIRST_ARG, SP, VM_REGS_SPILL);
        self.restore_registers();

        // Computed entry: the adr captures its own address; JitEntry
        // offsets are measured from here.
        self.header_size = self.asm.offset();
        self.asm.adr_self(QWORD_FREE_1);
        self.asm.add_x_uxtw(QWORD_FREE_1, QWORD_FREE_1, QWORD_SECOND_ARG);
        self.asm.br(QWORD_FREE_1);
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
            PopPtr => self.asm.add_xi(VM_SP, VM_SP, 8),
            PshGPtr => {
                self.asm.mov_xi(QWORD_FREE_1, i.ptr_arg());
                self.asm.ldr_x(QWORD_FREE_1, QWORD_FREE_1, 0);
                self.push_x(QWORD_FREE_1);
            }
            PshC4 | TypeId => {
                self.asm.mov_wi(QWORD_FREE_1, i.dword_arg(0));
                self.push_w(QWORD_FREE_1);
            }
            PshV4 => {
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.push_w(QWORD_FREE_1);
            }
            Psf => {
                self.asm.add_xi_any(QWORD_FREE_1, VM_SFP, i.var_offset(0) as i64);
                self.push_x(QWORD_FREE_1);
            }
            SwapPtr => {
                self.asm.ldr_x(QWORD_FREE_1, VM_SP, 0);
                self.asm.ldr_x(QWORD_FREE_2, VM_SP, 8);
                self.asm.str_x(QWORD_FREE_2, VM_SP, 0);
                self.asm.str_x(QWORD_FREE_1, VM_SP, 8);
            }
            PshG4 => {
                self.asm.mov_xi(QWORD_FREE_1, i.ptr_arg());
                self.asm.ldr_w(QWORD_FREE_1, QWORD_FREE_1, 0);
                self.push_w(QWORD_FREE_1);
            }
            PshC8 => {
                self.asm.mov_xi(QWORD_FREE_1, i.qword_arg());
                self.push_x(QWORD_FREE_1);
            }
            PshVPtr | PshV8 => {
                self.asm.ldr_x(QWORD_FREE_2, VM_SFP, i.var_offset(0));
                self.push_x(QWORD_FREE_2);
            }
            PshNull => {
                self.asm.mov_xi(QWORD_FREE_1, 0);
                self.push_x(QWORD_FREE_1);
            }
            Pga | ObjType | FuncPtr => {
                self.asm.mov_xi(QWORD_FREE_1, i.ptr_arg());
                self.push_x(QWORD_FREE_1);
            }
            Var => {
                self.asm.mov_xi(QWORD_FREE_1, i.short_arg(0) as i64 as u64);
                self.push_x(QWORD_FREE_1);
            }
            PopRPtr => {
                self.asm.ldr_x(VM_VALUE, VM_SP, 0);
                self.asm.add_xi(VM_SP, VM_SP, 8);
            }
            PshRPtr => self.push_x(VM_VALUE),
            RdsPtr => {
                self.asm.ldr_x(QWORD_FREE_1, VM_SP, 0);
                self.null_check(QWORD_FREE_1, i.addr());
                self.asm.ldr_x(QWORD_FREE_1, QWORD_FREE_1, 0);
                self.asm.str_x(QWORD_FREE_1, VM_SP, 0);
            }
            Copy => {
                let bytes = i.dword_arg(0) as u64 * 4;
                self.asm.ldr_x(QWORD_FIRST_ARG, VM_SP, 0);
                self.asm.add_xi(VM_SP, VM_SP, 8);
                self.asm.ldr_x(QWORD_SECOND_ARG, VM_SP, 0);

                let null = self.asm.new_label();
                let ok = self.asm.new_label();
                self.asm.cmp_xi0(QWORD_FIRST_ARG);
                self.asm.b_cond(Cond::Eq, null);
                self.asm.cmp_xi0(QWORD_SECOND_ARG);
                self.asm.b_cond(Cond::Ne, ok);
                self.asm.bind(null);
                self.save_registers(Some(i.addr()));
                self.call_foreign(helpers::raise_null_access as usize);
                self.epilogue_tail();

                self.asm.bind(ok);
                self.save_registers(None);
                self.asm.mov_xi(QWORD_THIRD_ARG, bytes);
                self.call_foreign(helpers::mem_copy as usize);
                self.restore_registers();
            }

            // --- value-register tests ---
            Not => {
                self.asm.cmp_xi0(VM_VALUE);
                self.test_result(Cond::Eq);
            }
            Tz => {
                self.asm.cmp_wi0(VM_VALUE);
                self.test_result(Cond::Eq);
            }
            Tnz => {
                self.asm.cmp_wi0(VM_VALUE);
                self.test_result(Cond::Ne);
            }
            Ts => {
                self.asm.cmp_wi0(VM_VALUE);
                self.test_result(Cond::Lt);
            }
            Tns => {
                self.asm.cmp_wi0(VM_VALUE);
                self.test_result(Cond::Ge);
            }
            Tp => {
                self.asm.cmp_wi0(VM_VALUE);
                self.test_result(Cond::Gt);
            }
            Tnp => {
                self.asm.cmp_wi0(VM_VALUE);
                self.test_result(Cond::Le);
            }
            ClrHi => {
                self.asm.mov_wi(QWORD_FREE_1, 0xFF);
                self.asm.and_xx(VM_VALUE, VM_VALUE, QWORD_FREE_1);
            }

            // --- branches ---
            Jmp => {
                let l = labels.for_branch(i)?;
                self.asm.b(l);
            }
            Jz | Jnz | Js | Jns | Jp | Jnp => {
                let l = labels.for_branch(i)?;
                self.asm.cmp_wi0(VM_VALUE);
                let cc = match op {
                    Jz => Cond::Eq,
                    Jnz => Cond::Ne,
                    Js => Cond::Lt,
                    Jns => Cond::Ge,
                    Jp => Cond::Gt,
                    _ => Cond::Le,
                };
                self.asm.b_cond(cc, l);
            }
            JLowZ | JLowNZ => {
                let l = labels.for_branch(i)?;
                self.asm.mov_ww(QWORD_FREE_1, VM_VALUE);
                self.asm.mov_wi(QWORD_FREE_2, 0xFF);
                self.asm.and_ww(QWORD_FREE_1, QWORD_FREE_1, QWORD_FREE_2);
                self.asm.cmp_wi0(QWORD_FREE_1);
                self.asm.b_cond(if op == JLowZ { Cond::Eq } else { Cond::Ne }, l);
            }

            // --- comparisons ---
            CmpI => {
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.ldr_w(QWORD_FREE_2, VM_SFP, i.var_offset(1));
                self.asm.cmp_ww(QWORD_FREE_1, QWORD_FREE_2);
                self.cmp_result(Cond::Lt);
            }
            CmpU => {
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.ldr_w(QWORD_FREE_2, VM_SFP, i.var_offset(1));
                self.asm.cmp_ww(QWORD_FREE_1, QWORD_FREE_2);
                self.cmp_result(Cond::Lo);
            }
            CmpI64 => {
                self.asm.ldr_x(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.ldr_x(QWORD_FREE_2, VM_SFP, i.var_offset(1));
                self.asm.cmp_xx(QWORD_FREE_1, QWORD_FREE_2);
                self.cmp_result(Cond::Lt);
            }
            CmpU64 | CmpPtr => {
                self.asm.ldr_x(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.ldr_x(QWORD_FREE_2, VM_SFP, i.var_offset(1));
                self.asm.cmp_xx(QWORD_FREE_1, QWORD_FREE_2);
                self.cmp_result(Cond::Lo);
            }
            CmpF => {
                self.asm.ldr_s(FLOAT_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.ldr_s(FLOAT_FREE_2, VM_SFP, i.var_offset(1));
                self.asm.fcmpe_s(FLOAT_FREE_1, FLOAT_FREE_2);
                self.cmp_result(Cond::Mi);
            }
            CmpD => {
                self.asm.ldr_d(FLOAT_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.ldr_d(FLOAT_FREE_2, VM_SFP, i.var_offset(1));
                self.asm.fcmp_d(FLOAT_FREE_1, FLOAT_FREE_2);
                self.cmp_result(Cond::Mi);
            }
            CmpIi => {
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.mov_wi(QWORD_FREE_2, i.int_arg() as u32);
                self.asm.cmp_ww(QWORD_FREE_1, QWORD_FREE_2);
                self.cmp_result(Cond::Lt);
            }
            CmpIu => {
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.mov_wi(QWORD_FREE_2, i.dword_arg(0));
                self.asm.cmp_ww(QWORD_FREE_1, QWORD_FREE_2);
                self.cmp_result(Cond::Lo);
            }
            CmpIf => {
                let c = self.pool.add_f32(i.float_arg(0));
                self.asm.ldr_s(FLOAT_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.ldr_lit_s(FLOAT_FREE_2, self.pool_label, c as i64);
                self.asm.fcmpe_s(FLOAT_FREE_1, FLOAT_FREE_2);
                self.cmp_result(Cond::Mi);
            }

            // --- increments / decrements ---
            IncI8 | DecI8 => {
                self.asm.ldrb_w(QWORD_FREE_1, VM_VALUE, 0);
                if op == IncI8 {
                    self.asm.add_wi(QWORD_FREE_1, QWORD_FREE_1, 1);
                } else {
                    self.asm.sub_wi(QWORD_FREE_1, QWORD_FREE_1, 1);
                }
                self.asm.strb_w(QWORD_FREE_1, VM_VALUE, 0);
            }
            IncI16 | DecI16 => {
                self.asm.ldrh_w(QWORD_FREE_1, VM_VALUE, 0);
                if op == IncI16 {
                    self.asm.add_wi(QWORD_FREE_1, QWORD_FREE_1, 1);
                } else {
                    self.asm.sub_wi(QWORD_FREE_1, QWORD_FREE_1, 1);
                }
                self.asm.strh_w(QWORD_FREE_1, VM_VALUE, 0);
            }
            IncI | DecI => {
                self.asm.ldr_w(QWORD_FREE_1, VM_VALUE, 0);
                if op == IncI {
                    self.asm.add_wi(QWORD_FREE_1, QWORD_FREE_1, 1);
                } else {
                    self.asm.sub_wi(QWORD_FREE_1, QWORD_FREE_1, 1);
                }
                self.asm.str_w(QWORD_FREE_1, VM_VALUE, 0);
            }
            IncI64 | DecI64 => {
                self.asm.ldr_x(QWORD_FREE_1, VM_VALUE, 0);
                if op == IncI64 {
                    self.asm.add_xi(QWORD_FREE_1, QWORD_FREE_1, 1);
                } else {
                    self.asm.sub_xi(QWORD_FREE_1, QWORD_FREE_1, 1);
                }
                self.asm.str_x(QWORD_FREE_1, VM_VALUE, 0);
            }
            IncF | DecF => {
                let c = self.pool.add_f32(1.0);
                self.asm.ldr_s(FLOAT_FREE_1, VM_VALUE, 0);
                self.asm.ldr_lit_s(FLOAT_FREE_2, self.pool_label, c as i64);
                if op == IncF {
                    self.asm.fadd_s(FLOAT_FREE_1, FLOAT_FREE_1, FLOAT_FREE_2);
                } else {
                    self.asm.fsub_s(FLOAT_FREE_1, FLOAT_FREE_1, FLOAT_FREE_2);
                }
                self.asm.str_s(FLOAT_FREE_1, VM_VALUE, 0);
            }
            IncD | DecD => {
                let c = self.pool.add_f64(1.0);
                self.asm.ldr_d(FLOAT_FREE_1, VM_VALUE, 0);
                self.asm.ldr_lit_d(FLOAT_FREE_2, self.pool_label, c as i64);
                if op == IncD {
                    self.asm.fadd_d(FLOAT_FREE_1, FLOAT_FREE_1, FLOAT_FREE_2);
                } else {
                    self.asm.fsub_d(FLOAT_FREE_1, FLOAT_FREE_1, FLOAT_FREE_2);
                }
                self.asm.str_d(FLOAT_FREE_1, VM_VALUE, 0);
            }
            IncVi | DecVi => {
                let off = i.var_offset(0);
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, off);
                if op == IncVi {
                    self.asm.add_wi(QWORD_FREE_1, QWORD_FREE_1, 1);
                } else {
                    self.asm.sub_wi(QWORD_FREE_1, QWORD_FREE_1, 1);
                }
                self.asm.str_w(QWORD_FREE_1, VM_SFP, off);
            }

            // --- negation / bitwise not ---
            NegI => {
                let off = i.var_offset(0);
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, off);
                self.asm.neg_w(QWORD_FREE_1, QWORD_FREE_1);
                self.asm.str_w(QWORD_FREE_1, VM_SFP, off);
            }
            NegI64 => {
                let off = i.var_offset(0);
                self.asm.ldr_x(QWORD_FREE_1, VM_SFP, off);
                self.asm.neg_x(QWORD_FREE_1, QWORD_FREE_1);
                self.asm.str_x(QWORD_FREE_1, VM_SFP, off);
            }
            NegF => {
                let off = i.var_offset(0);
                self.asm.ldr_s(FLOAT_FREE_1, VM_SFP, off);
                self.asm.fneg_s(FLOAT_FREE_1, FLOAT_FREE_1);
                self.asm.str_s(FLOAT_FREE_1, VM_SFP, off);
            }
            NegD => {
                let off = i.var_offset(0);
                self.asm.ldr_d(FLOAT_FREE_1, VM_SFP, off);
                self.asm.fneg_d(FLOAT_FREE_1, FLOAT_FREE_1);
                self.asm.str_d(FLOAT_FREE_1, VM_SFP, off);
            }
            BNot => {
                let off = i.var_offset(0);
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, off);
                self.asm.mvn_w(QWORD_FREE_1, QWORD_FREE_1);
                self.asm.str_w(QWORD_FREE_1, VM_SFP, off);
            }
            BNot64 => {
                let off = i.var_offset(0);
                self.asm.ldr_x(QWORD_FREE_1, VM_SFP, off);
                self.asm.mvn_x(QWORD_FREE_1, QWORD_FREE_1);
                self.asm.str_x(QWORD_FREE_1, VM_SFP, off);
            }

            // --- integer arithmetic ---
            AddI => self.bin32(i, Asm::add_ww),
            SubI => self.bin32(i, Asm::sub_ww),
            MulI => self.bin32(i, Asm::mul_ww),
            BAnd => self.bin32(i, Asm::and_ww),
            BOr => self.bin32(i, Asm::orr_ww),
            BXor => self.bin32(i, Asm::eor_ww),
            Bsll => self.bin32(i, Asm::lsl_ww),
            Bsrl => self.bin32(i, Asm::lsr_ww),
            Bsra => self.bin32(i, Asm::asr_ww),
            DivI => self.divmod32(i, Asm::sdiv_ww, false),
            ModI => self.divmod32(i, Asm::sdiv_ww, true),
            DivU => self.divmod32(i, Asm::udiv_ww, false),
            ModU => self.divmod32(i, Asm::udiv_ww, true),
            AddI64 => self.bin64(i, Asm::add_xx),
            SubI64 => self.bin64(i, Asm::sub_xx),
            MulI64 => self.bin64(i, Asm::mul_xx),
            BAnd64 => self.bin64(i, Asm::and_xx),
            BOr64 => self.bin64(i, Asm::orr_xx),
            BXor64 => self.bin64(i, Asm::eor_xx),
            Bsll64 => self.bin64(i, Asm::lsl_xx),
            Bsrl64 => self.bin64(i, Asm::lsr_xx),
            Bsra64 => self.bin64(i, Asm::asr_xx),
            DivI64 => self.divmod64(i, Asm::sdiv_xx, false),
            ModI64 => self.divmod64(i, Asm::sdiv_xx, true),
            DivU64 => self.divmod64(i, Asm::udiv_xx, false),
            ModU64 => self.divmod64(i, Asm::udiv_xx, true),

            // --- float / double arithmetic ---
            AddF => self.binf(i, Asm::fadd_s),
            SubF => self.binf(i, Asm::fsub_s),
            MulF => self.binf(i, Asm::fmul_s),
            DivF => self.binf(i, Asm::fdiv_s),
            ModF => self.call_helper_ff(helpers::mod_float as usize, i),
            AddD => self.bind_f64(i, Asm::fadd_d),
            SubD => self.bind_f64(i, Asm::fsub_d),
            MulD => self.bind_f64(i, Asm::fmul_d),
            DivD => self.bind_f64(i, Asm::fdiv_d),
            ModD => self.call_helper_dd(helpers::mod_double as usize, i),

            // --- immediate arithmetic ---
            AddIi | SubIi | MulIi => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, s);
                self.asm.mov_wi(QWORD_FREE_2, i.dword_arg(1));
                match op {
                    AddIi => self.asm.add_ww(QWORD_FREE_1, QWORD_FREE_1, QWORD_FREE_2),
                    SubIi => self.asm.sub_ww(QWORD_FREE_1, QWORD_FREE_1, QWORD_FREE_2),
                    _ => self.asm.mul_ww(QWORD_FREE_1, QWORD_FREE_1, QWORD_FREE_2),
                }
                self.asm.str_w(QWORD_FREE_1, VM_SFP, d);
            }
            AddIf | SubIf | MulIf => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                let c = self.pool.add_f32(i.float_arg(1));
                self.asm.ldr_s(FLOAT_FREE_1, VM_SFP, s);
                self.asm.ldr_lit_s(FLOAT_FREE_2, self.pool_label, c as i64);
                match op {
                    AddIf => self.asm.fadd_s(FLOAT_FREE_1, FLOAT_FREE_1, FLOAT_FREE_2),
                    SubIf => self.asm.fsub_s(FLOAT_FREE_1, FLOAT_FREE_1, FLOAT_FREE_2),
                    _ => self.asm.fmul_s(FLOAT_FREE_1, FLOAT_FREE_1, FLOAT_FREE_2),
                }
                self.asm.str_s(FLOAT_FREE_1, VM_SFP, d);
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
                self.asm.ldr_d(FLOAT_FIRST_ARG, VM_SFP, s1);
                self.asm.ldr_w(QWORD_FIRST_ARG, VM_SFP, s2);
                self.call_foreign(helpers::dipow as usize);
                self.restore_registers();
                self.asm.str_d(FLOAT_RETURN, VM_SFP, d);
            }

            // --- conversions, in place ---
            ItoF => {
                let off = i.var_offset(0);
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, off);
                self.asm.scvtf_s_w(FLOAT_FREE_1, QWORD_FREE_1);
                self.asm.str_s(FLOAT_FREE_1, VM_SFP, off);
            }
            FtoI => {
                let off = i.var_offset(0);
                self.asm.ldr_s(FLOAT_FREE_1, VM_SFP, off);
                self.asm.fcvtzs_w_s(QWORD_FREE_1, FLOAT_FREE_1);
                self.asm.str_w(QWORD_FREE_1, VM_SFP, off);
            }
            UtoF => {
                let off = i.var_offset(0);
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, off);
                self.asm.ucvtf_s_w(FLOAT_FREE_1, QWORD_FREE_1);
                self.asm.str_s(FLOAT_FREE_1, VM_SFP, off);
            }
            FtoU => {
                let off = i.var_offset(0);
                self.asm.ldr_s(FLOAT_FREE_1, VM_SFP, off);
                self.asm.fcvtzs_x_s(QWORD_FREE_1, FLOAT_FREE_1);
                self.asm.str_w(QWORD_FREE_1, VM_SFP, off);
            }
            SbToI => {
                let off = i.var_offset(0);
                self.asm.ldrsb_w(QWORD_FREE_2, VM_SFP, off);
                self.asm.str_w(QWORD_FREE_2, VM_SFP, off);
            }
            SwToI => {
                let off = i.var_offset(0);
                self.asm.ldrsh_w(QWORD_FREE_2, VM_SFP, off);
                self.asm.str_w(QWORD_FREE_2, VM_SFP, off);
            }
            UbToI => {
                let off = i.var_offset(0);
                self.asm.ldrb_w(QWORD_FREE_2, VM_SFP, off);
                self.asm.str_w(QWORD_FREE_2, VM_SFP, off);
            }
            UwToI => {
                let off = i.var_offset(0);
                self.asm.ldrh_w(QWORD_FREE_2, VM_SFP, off);
                self.asm.str_w(QWORD_FREE_2, VM_SFP, off);
            }
            ItoB | ItoW => {
                let off = i.var_offset(0);
                let mask = if op == ItoB { 0xFF } else { 0xFFFF };
                self.asm.mov_wi(QWORD_FREE_1, mask);
                self.asm.ldr_w(QWORD_FREE_2, VM_SFP, off);
                self.asm.and_ww(QWORD_FREE_2, QWORD_FREE_2, QWORD_FREE_1);
                self.asm.str_w(QWORD_FREE_2, VM_SFP, off);
            }

            // --- conversions, two slots ---
            DtoI => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_d(FLOAT_FREE_1, VM_SFP, s);
                self.asm.fcvtzs_w_d(QWORD_FREE_1, FLOAT_FREE_1);
                self.asm.str_w(QWORD_FREE_1, VM_SFP, d);
            }
            DtoU => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_d(FLOAT_FREE_1, VM_SFP, s);
                self.asm.fcvtzs_x_d(QWORD_FREE_1, FLOAT_FREE_1);
                self.asm.str_w(QWORD_FREE_1, VM_SFP, d);
            }
            DtoF => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_d(FLOAT_FREE_1, VM_SFP, s);
                self.asm.fcvt_s_d(FLOAT_FREE_1, FLOAT_FREE_1);
                self.asm.str_s(FLOAT_FREE_1, VM_SFP, d);
            }
            ItoD => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, s);
                self.asm.scvtf_d_w(FLOAT_FREE_1, QWORD_FREE_1);
                self.asm.str_d(FLOAT_FREE_1, VM_SFP, d);
            }
            UtoD => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, s);
                self.asm.ucvtf_d_w(FLOAT_FREE_1, QWORD_FREE_1);
                self.asm.str_d(FLOAT_FREE_1, VM_SFP, d);
            }
            FtoD => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_s(FLOAT_FREE_1, VM_SFP, s);
                self.asm.fcvt_d_s(FLOAT_FREE_1, FLOAT_FREE_1);
                self.asm.str_d(FLOAT_FREE_1, VM_SFP, d);
            }
            I64toI => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_x(QWORD_FREE_1, VM_SFP, s);
                self.asm.str_w(QWORD_FREE_1, VM_SFP, d);
            }
            UtoI64 => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, s);
                self.asm.str_x(QWORD_FREE_1, VM_SFP, d);
            }
            ItoI64 => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, s);
                self.asm.sxtw(QWORD_FREE_1, QWORD_FREE_1);
                self.asm.str_x(QWORD_FREE_1, VM_SFP, d);
            }
            FtoI64 => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_s(FLOAT_FREE_1, VM_SFP, s);
                self.asm.fcvtzs_x_s(QWORD_FREE_1, FLOAT_FREE_1);
                self.asm.str_x(QWORD_FREE_1, VM_SFP, d);
            }
            DtoI64 => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_d(FLOAT_FREE_1, VM_SFP, s);
                self.asm.fcvtzs_x_d(QWORD_FREE_1, FLOAT_FREE_1);
                self.asm.str_x(QWORD_FREE_1, VM_SFP, d);
            }
            FtoU64 => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_s(FLOAT_FREE_1, VM_SFP, s);
                self.asm.fcvtzu_x_s(QWORD_FREE_1, FLOAT_FREE_1);
                self.asm.str_x(QWORD_FREE_1, VM_SFP, d);
            }
            DtoU64 => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_d(FLOAT_FREE_1, VM_SFP, s);
                self.asm.fcvtzu_x_d(QWORD_FREE_1, FLOAT_FREE_1);
                self.asm.str_x(QWORD_FREE_1, VM_SFP, d);
            }
            I64toF => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_x(QWORD_FREE_1, VM_SFP, s);
                self.asm.scvtf_s_x(FLOAT_FREE_1, QWORD_FREE_1);
                self.asm.str_s(FLOAT_FREE_1, VM_SFP, d);
            }
            U64toF => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_x(QWORD_FREE_1, VM_SFP, s);
                self.asm.ucvtf_s_x(FLOAT_FREE_1, QWORD_FREE_1);
                self.asm.str_s(FLOAT_FREE_1, VM_SFP, d);
            }
            I64toD => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_x(QWORD_FREE_1, VM_SFP, s);
                self.asm.scvtf_d_x(FLOAT_FREE_1, QWORD_FREE_1);
                self.asm.str_d(FLOAT_FREE_1, VM_SFP, d);
            }
            U64toD => {
                let (d, s) = (i.var_offset(0), i.var_offset(1));
                self.asm.ldr_x(QWORD_FREE_1, VM_SFP, s);
                self.asm.ucvtf_d_x(FLOAT_FREE_1, QWORD_FREE_1);
                self.asm.str_d(FLOAT_FREE_1, VM_SFP, d);
            }

            // --- frame moves and constants ---
            SetV1 | SetV2 | SetV4 => {
                self.asm.mov_wi(QWORD_FREE_1, i.dword_arg(0));
                self.asm.str_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
            }
            SetV8 => {
                self.asm.mov_xi(QWORD_FREE_2, i.qword_arg());
                self.asm.str_x(QWORD_FREE_2, VM_SFP, i.var_offset(0));
            }
            CpyVtoV4 => {
                self.asm.ldr_w(QWORD_FREE_2, VM_SFP, i.var_offset(1));
                self.asm.str_w(QWORD_FREE_2, VM_SFP, i.var_offset(0));
            }
            CpyVtoV8 => {
                self.asm.ldr_x(QWORD_FREE_2, VM_SFP, i.var_offset(1));
                self.asm.str_x(QWORD_FREE_2, VM_SFP, i.var_offset(0));
            }
            CpyVtoR4 => self.asm.ldr_w(VM_VALUE, VM_SFP, i.var_offset(0)),
            CpyVtoR8 => self.asm.ldr_x(VM_VALUE, VM_SFP, i.var_offset(0)),
            CpyRtoV4 => self.asm.str_w(VM_VALUE, VM_SFP, i.var_offset(0)),
            CpyRtoV8 => self.asm.str_x(VM_VALUE, VM_SFP, i.var_offset(0)),
            CpyVtoG4 => {
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.mov_xi(QWORD_FREE_2, i.ptr_arg());
                self.asm.str_w(QWORD_FREE_1, QWORD_FREE_2, 0);
            }
            CpyGtoV4 => {
                self.asm.mov_xi(QWORD_FREE_1, i.ptr_arg());
                self.asm.ldr_w(QWORD_FREE_1, QWORD_FREE_1, 0);
                self.asm.str_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
            }
            SetG4 => {
                self.asm.mov_xi(QWORD_FREE_1, i.ptr_arg());
                self.asm.mov_wi(QWORD_FREE_2, i.dword_arg(2));
                self.asm.str_w(QWORD_FREE_2, QWORD_FREE_1, 0);
            }
            LdGRdR4 => {
                self.asm.mov_xi(VM_VALUE, i.ptr_arg());
                self.asm.ldr_w(QWORD_FREE_1, VM_VALUE, 0);
                self.asm.str_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
            }
            Ldg => self.asm.mov_xi(VM_VALUE, i.ptr_arg()),
            Ldv => self.asm.add_xi_any(VM_VALUE, VM_SFP, i.var_offset(0) as i64),
            ClrVPtr => {
                self.asm.mov_xi(QWORD_FREE_1, 0);
                self.asm.str_x(QWORD_FREE_1, VM_SFP, i.var_offset(0));
            }

            // --- writes/reads through the value register ---
            WrtV1 => {
                self.asm.ldrb_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.strb_w(QWORD_FREE_1, VM_VALUE, 0);
            }
            WrtV2 => {
                self.asm.ldrh_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.strh_w(QWORD_FREE_1, VM_VALUE, 0);
            }
            WrtV4 => {
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.str_w(QWORD_FREE_1, VM_VALUE, 0);
            }
            WrtV8 => {
                self.asm.ldr_x(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.asm.str_x(QWORD_FREE_1, VM_VALUE, 0);
            }
            Rdr1 => {
                self.asm.ldrb_w(QWORD_FREE_1, VM_VALUE, 0);
                self.asm.str_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
            }
            Rdr2 => {
                self.asm.ldrh_w(QWORD_FREE_1, VM_VALUE, 0);
                self.asm.str_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
            }
            Rdr4 => {
                self.asm.ldr_w(QWORD_FREE_1, VM_VALUE, 0);
                self.asm.str_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
            }
            Rdr8 => {
                self.asm.ldr_x(QWORD_FREE_1, VM_VALUE, 0);
                self.asm.str_x(QWORD_FREE_1, VM_SFP, i.var_offset(0));
            }

            // --- object register ---
            LoadObj => {
                let off = i.var_offset(0);
                self.asm.mov_xi(VM_OBJECT_TYPE, 0);
                self.asm.ldr_x(VM_OBJECT, VM_SFP, off);
                self.asm.mov_xi(QWORD_FREE_1, 0);
                self.asm.str_x(QWORD_FREE_1, VM_SFP, off);
            }
            StoreObj => {
                self.asm.str_x(VM_OBJECT, VM_SFP, i.var_offset(0));
                self.asm.mov_xi(VM_OBJECT, 0);
            }
            GetObj => {
                let off = i.word_arg(0) as i64 * 4;
                self.asm.mov_xx(QWORD_FREE_1, VM_SP);
                self.asm.add_xi_any(QWORD_FREE_1, QWORD_FREE_1, off);
                self.asm.ldr_x(QWORD_FREE_2, QWORD_FREE_1, 0);
                self.asm.mov_xi(QWORD_FREE_3, (-4i64) as u64);
                self.asm.mul_xx(QWORD_FREE_2, QWORD_FREE_2, QWORD_FREE_3);
                self.asm.ldr_x_reg(QWORD_FREE_3, VM_SP, QWORD_FREE_2);
                self.asm.str_x(QWORD_FREE_3, QWORD_FREE_1, 0);
                self.asm.mov_xi(QWORD_FREE_3, 0);
                self.asm.str_x_reg(QWORD_FREE_3, VM_SP, QWORD_FREE_2);
            }
            GetObjRef => {
                let off = i.word_arg(0) as i64 * 4;
                self.asm.mov_xx(QWORD_FREE_1, VM_SP);
                self.asm.add_xi_any(QWORD_FREE_1, QWORD_FREE_1, off);
                self.asm.ldr_x(QWORD_FREE_3, QWORD_FREE_1, 0);
                self.asm.mov_xi(QWORD_FREE_2, 4);
                self.asm.mul_xx(QWORD_FREE_3, QWORD_FREE_3, QWORD_FREE_2);
                self.asm.mov_xx(QWORD_FREE_2, VM_SFP);
                self.asm.sub_xx(QWORD_FREE_2, QWORD_FREE_2, QWORD_FREE_3);
                self.asm.ldr_x(QWORD_FREE_2, QWORD_FREE_2, 0);
                self.asm.str_x(QWORD_FREE_2, QWORD_FREE_1, 0);
            }
            GetRef => {
                let off = i.word_arg(0) as i64 * 4;
                self.asm.mov_xx(QWORD_FREE_1, VM_SP);
                self.asm.add_xi_any(QWORD_FREE_1, QWORD_FREE_1, off);
                self.asm.ldr_w(QWORD_FREE_2, QWORD_FREE_1, 0);
                self.asm.mov_wi(QWORD_FREE_3, 4);
                self.asm.mul_ww(QWORD_FREE_2, QWORD_FREE_2, QWORD_FREE_3);
                self.asm.mov_xx(QWORD_FREE_3, VM_SFP);
                self.asm.sub_xx(QWORD_FREE_3, QWORD_FREE_3, QWORD_FREE_2);
                self.asm.str_x(QWORD_FREE_3, QWORD_FREE_1, 0);
            }

            // --- reference checks ---
            ChkRef => {
                self.asm.ldr_x(QWORD_FREE_1, VM_SP, 0);
                self.null_check(QWORD_FREE_1, i.addr());
            }
            ChkRefS => {
                self.asm.ldr_x(QWORD_FREE_1, VM_SP, 0);
                self.asm.ldr_x(QWORD_FREE_1, QWORD_FREE_1, 0);
                self.null_check(QWORD_FREE_1, i.addr());
            }
            ChkNullV => {
                self.asm.ldr_w(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.null_check(QWORD_FREE_1, i.addr());
            }
            ChkNullS => {
                self.asm.ldr_x(QWORD_FREE_1, VM_SP, i.word_arg(0) as i32 * 4);
                self.null_check(QWORD_FREE_1, i.addr());
            }
            AddSi => {
                self.asm.ldr_x(QWORD_FREE_2, VM_SP, 0);
                self.null_check(QWORD_FREE_2, i.addr());
                self.asm.add_xi_any(QWORD_FREE_2, QWORD_FREE_2, i.short_arg(0) as i64);
                self.asm.str_x(QWORD_FREE_2, VM_SP, 0);
            }
            LoadThisR => {
                self.asm.ldr_x(VM_VALUE, VM_SFP, 0);
                self.null_check(VM_VALUE, i.addr());
                self.asm.add_xi_any(VM_VALUE, VM_VALUE, i.short_arg(0) as i64);
            }
            LoadRObjR => {
                self.asm.ldr_x(QWORD_FREE_2, VM_SFP, i.var_offset(0));
                self.null_check(QWORD_FREE_2, i.addr());
                self.asm.add_xi_any(QWORD_FREE_2, QWORD_FREE_2, i.short_arg(1) as i64);
                self.asm.mov_xx(VM_VALUE, QWORD_FREE_2);
            }
            LoadVObjR => {
                let off = i.var_offset(0) as i64 + i.short_arg(1) as i64;
                self.asm.add_xi_any(VM_VALUE, VM_SFP, off);
            }

            // --- list buffers ---
            SetListSize | SetListType => {
                self.asm.ldr_x(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.null_check(QWORD_FREE_1, i.addr());
                self.asm.mov_wi(QWORD_FREE_2, i.dword_arg(1));
                self.asm.str_w(QWORD_FREE_2, QWORD_FREE_1, i.dword_arg(0) as i32);
            }
            PshListElmnt => {
                self.asm.ldr_x(QWORD_FREE_1, VM_SFP, i.var_offset(0));
                self.null_check(QWORD_FREE_1, i.addr());
                self.asm.add_xi_any(QWORD_FREE_1, QWORD_FREE_1, i.dword_arg(0) as i64);
                self.push_x(QWORD_FREE_1);
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
