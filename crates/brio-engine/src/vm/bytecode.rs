//! Brio bytecode definition.
//!
//! The stream is a sequence of 32-bit little-endian words. The first byte
//! of each instruction is the opcode; 16-bit operand slots follow the
//! opcode byte (slot `i` lives at byte offset `2 * (i + 1)` from the
//! instruction start), and dword/qword/pointer operands occupy whole words
//! starting at word 1. A signed 16-bit slot usually names a frame slot;
//! the byte offset into the frame is `-slot * 4` (the frame grows down in
//! 4-byte units).
//!
//! [`Opcode::format`] is the single source of instruction sizes: the scan
//! pass, the emit pass, the interpreter, and [`BytecodeWriter`] all advance
//! by [`InstrFormat::words`].

/// Dense opcode enumeration. Discriminants are the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Opcode {
    PopPtr = 0,
    PshGPtr,
    PshC4,
    PshV4,
    Psf,
    SwapPtr,
    Not,
    PshG4,
    LdGRdR4,
    Call,
    Ret,
    Jmp,
    Jz,
    Jnz,
    Js,
    Jns,
    Jp,
    Jnp,
    Tz,
    Tnz,
    Ts,
    Tns,
    Tp,
    Tnp,
    NegI,
    NegF,
    NegD,
    IncI16,
    IncI8,
    DecI16,
    DecI8,
    IncI,
    DecI,
    IncF,
    DecF,
    IncD,
    DecD,
    IncVi,
    DecVi,
    BNot,
    BAnd,
    BOr,
    BXor,
    Bsll,
    Bsrl,
    Bsra,
    Copy,
    PshC8,
    PshVPtr,
    RdsPtr,
    CmpD,
    CmpU,
    CmpF,
    CmpI,
    CmpIi,
    CmpIf,
    CmpIu,
    Jmpp,
    PopRPtr,
    PshRPtr,
    Str,
    CallSys,
    CallBnd,
    Suspend,
    Alloc,
    Free,
    LoadObj,
    StoreObj,
    GetObj,
    RefCpy,
    ChkRef,
    GetObjRef,
    GetRef,
    PshNull,
    ClrVPtr,
    ObjType,
    TypeId,
    SetV4,
    SetV8,
    AddSi,
    CpyVtoV4,
    CpyVtoV8,
    CpyVtoR4,
    CpyVtoR8,
    CpyVtoG4,
    CpyRtoV4,
    CpyRtoV8,
    CpyGtoV4,
    WrtV1,
    WrtV2,
    WrtV4,
    WrtV8,
    Rdr1,
    Rdr2,
    Rdr4,
    Rdr8,
    Ldg,
    Ldv,
    Pga,
    CmpPtr,
    Var,
    ItoF,
    FtoI,
    UtoF,
    FtoU,
    SbToI,
    SwToI,
    UbToI,
    UwToI,
    DtoI,
    DtoU,
    DtoF,
    ItoD,
    UtoD,
    FtoD,
    AddI,
    SubI,
    MulI,
    DivI,
    ModI,
    AddF,
    SubF,
    MulF,
    DivF,
    ModF,
    AddD,
    SubD,
    MulD,
    DivD,
    ModD,
    AddIi,
    SubIi,
    MulIi,
    AddIf,
    SubIf,
    MulIf,
    SetG4,
    ChkRefS,
    ChkNullV,
    CallIntf,
    ItoB,
    ItoW,
    SetV1,
    SetV2,
    Cast,
    I64toI,
    UtoI64,
    ItoI64,
    FtoI64,
    DtoI64,
    FtoU64,
    DtoU64,
    I64toF,
    U64toF,
    I64toD,
    U64toD,
    NegI64,
    IncI64,
    DecI64,
    BNot64,
    AddI64,
    SubI64,
    MulI64,
    DivI64,
    ModI64,
    BAnd64,
    BOr64,
    BXor64,
    Bsll64,
    Bsrl64,
    Bsra64,
    CmpI64,
    CmpU64,
    ChkNullS,
    ClrHi,
    JitEntry,
    CallPtr,
    FuncPtr,
    LoadThisR,
    PshV8,
    DivU,
    ModU,
    DivU64,
    ModU64,
    LoadRObjR,
    LoadVObjR,
    RefCpyV,
    JLowZ,
    JLowNZ,
    AllocMem,
    SetListSize,
    PshListElmnt,
    SetListType,
    PowI,
    PowU,
    PowF,
    PowD,
    PowDi,
    PowI64,
    PowU64,
    ThisCall1,
}

/// Highest valid opcode byte.
pub const MAX_OPCODE: u8 = Opcode::ThisCall1 as u8;

/// Operand layout classes. The names follow the slot kinds: `Ww` a written
/// frame slot, `Rw` a read frame slot, `W` a raw 16-bit word, `Dw`/`Qw`
/// 32/64-bit immediates, `Ptr` a pointer-sized immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum InstrFormat {
    None,
    W,
    Rw,
    Ww,
    Dw,
    WwDw,
    RwDw,
    WDw,
    WwRw,
    RwRw,
    WwRwRw,
    WwRwDw,
    RwWDw,
    Qw,
    WwQw,
    Ptr,
    WwPtr,
    RwPtr,
    PtrDw,
    RwDwDw,
}

impl InstrFormat {
    /// Instruction size in 32-bit words.
    pub fn words(self) -> usize {
        match self {
            InstrFormat::None | InstrFormat::W | InstrFormat::Rw | InstrFormat::Ww => 1,
            InstrFormat::Dw
            | InstrFormat::WwDw
            | InstrFormat::RwDw
            | InstrFormat::WDw
            | InstrFormat::WwRw
            | InstrFormat::RwRw
            | InstrFormat::WwRwRw => 2,
            InstrFormat::WwRwDw
            | InstrFormat::RwWDw
            | InstrFormat::Qw
            | InstrFormat::WwQw
            | InstrFormat::Ptr
            | InstrFormat::WwPtr
            | InstrFormat::RwPtr
            | InstrFormat::RwDwDw => 3,
            InstrFormat::PtrDw => 4,
        }
    }
}

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        if byte <= MAX_OPCODE {
            // Safety: repr(u8) with dense discriminants 0..=MAX_OPCODE.
            Some(unsafe { std::mem::transmute::<u8, Opcode>(byte) })
        } else {
            None
        }
    }

    /// The operand layout (and thereby the size) of this instruction.
    pub fn format(self) -> InstrFormat {
        use InstrFormat as F;
        use Opcode::*;
        match self {
            PopPtr | SwapPtr | Not | Tz | Tnz | Ts | Tns | Tp | Tnp | IncI16 | IncI8 | DecI16
            | DecI8 | IncI | DecI | IncF | DecF | IncD | DecD | RdsPtr | PopRPtr | PshRPtr
            | Str | Suspend | ChkRef | ChkRefS | PshNull | ClrHi | IncI64 | DecI64 => F::None,

            Ret | GetObj | GetObjRef | GetRef | ChkNullS => F::W,

            PshV4 | Psf | PshVPtr | PshV8 | NegI | NegF | NegD | NegI64 | IncVi | DecVi | BNot
            | BNot64 | ClrVPtr | CpyVtoR4 | CpyVtoR8 | WrtV1 | WrtV2 | WrtV4 | WrtV8 | Ldv
            | ItoF | FtoI | UtoF | FtoU | SbToI | SwToI | UbToI | UwToI | ItoB | ItoW
            | ChkNullV | Var | CallPtr | Jmpp => F::Rw,

            LoadObj | StoreObj | CpyRtoV4 | CpyRtoV8 | Rdr1 | Rdr2 | Rdr4 | Rdr8 => F::Ww,

            PshC4 | TypeId | Copy | Cast | Call | CallSys | CallBnd | CallIntf | Jmp | Jz | Jnz
            | Js | Jns | Jp | Jnp | JLowZ | JLowNZ | JitEntry => F::Dw,

            SetV1 | SetV2 | SetV4 | AllocMem => F::WwDw,

            CmpIi | CmpIf | CmpIu | PshListElmnt => F::RwDw,

            AddSi | LoadThisR | ThisCall1 => F::WDw,

            CpyVtoV4 | CpyVtoV8 | I64toI | UtoI64 | ItoI64 | FtoI64 | DtoI64 | FtoU64 | DtoU64
            | I64toF | U64toF | I64toD | U64toD | DtoI | DtoU | DtoF | ItoD | UtoD | FtoD => {
                F::WwRw
            }

            CmpI | CmpU | CmpF | CmpD | CmpI64 | CmpU64 | CmpPtr => F::RwRw,

            AddI | SubI | MulI | DivI | ModI | AddF | SubF | MulF | DivF | ModF | AddD | SubD
            | MulD | DivD | ModD | BAnd | BOr | BXor | Bsll | Bsrl | Bsra | AddI64 | SubI64
            | MulI64 | DivI64 | ModI64 | BAnd64 | BOr64 | BXor64 | Bsll64 | Bsrl64 | Bsra64
            | DivU | ModU | DivU64 | ModU64 | PowI | PowU | PowF | PowD | PowDi | PowI64
            | PowU64 => F::WwRwRw,

            AddIi | SubIi | MulIi | AddIf | SubIf | MulIf => F::WwRwDw,

            LoadRObjR | LoadVObjR => F::RwWDw,

            PshC8 => F::Qw,
            SetV8 => F::WwQw,

            PshGPtr | PshG4 | Pga | ObjType | FuncPtr | Ldg | RefCpy => F::Ptr,
            LdGRdR4 | CpyGtoV4 => F::WwPtr,
            CpyVtoG4 | RefCpyV | Free => F::RwPtr,

            SetG4 | Alloc => F::PtrDw,

            SetListSize | SetListType => F::RwDwDw,
        }
    }

    /// Size in 32-bit words.
    pub fn size_words(self) -> usize {
        self.format().words()
    }

    /// Branch opcodes whose dword operand is a displacement resolved by
    /// the control-flow pass (`JMPP` yields instead and is not listed).
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::Jz
                | Opcode::Jnz
                | Opcode::Js
                | Opcode::Jns
                | Opcode::Jp
                | Opcode::Jnp
                | Opcode::JLowZ
                | Opcode::JLowNZ
        )
    }
}

/// A borrowed view of one instruction inside a bytecode stream.
#[derive(Clone, Copy)]
pub struct InstrRef<'a> {
    code: &'a [u32],
    pc: usize,
}

impl<'a> InstrRef<'a> {
    /// View the instruction at word index `pc`.
    pub fn at(code: &'a [u32], pc: usize) -> InstrRef<'a> {
        InstrRef { code, pc }
    }

    /// Word index of this instruction.
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Decoded opcode; the stream is trusted (the writer produced it).
    pub fn opcode(&self) -> Opcode {
        Opcode::from_u8((self.code[self.pc] & 0xFF) as u8).expect("invalid opcode byte")
    }

    /// The i-th signed 16-bit slot after the opcode byte.
    pub fn short_arg(&self, i: usize) -> i16 {
        self.word_arg(i) as i16
    }

    /// The i-th unsigned 16-bit slot after the opcode byte.
    pub fn word_arg(&self, i: usize) -> u16 {
        let half = i + 1;
        let word = self.code[self.pc + half / 2];
        (word >> (16 * (half % 2))) as u16
    }

    /// Byte offset of the frame slot named by slot `i`.
    pub fn var_offset(&self, i: usize) -> i32 {
        -(self.short_arg(i) as i32) * 4
    }

    /// The 32-bit word at `pc + 1 + k`.
    pub fn dword_arg(&self, k: usize) -> u32 {
        self.code[self.pc + 1 + k]
    }

    /// `dword_arg(0)` as a signed value.
    pub fn int_arg(&self) -> i32 {
        self.dword_arg(0) as i32
    }

    /// The 64-bit value at words 1..3.
    pub fn qword_arg(&self) -> u64 {
        (self.dword_arg(0) as u64) | ((self.dword_arg(1) as u64) << 32)
    }

    /// Word `1 + k` reinterpreted as an IEEE-754 binary32.
    pub fn float_arg(&self, k: usize) -> f32 {
        f32::from_bits(self.dword_arg(k))
    }

    /// The pointer-sized value at words 1..3.
    pub fn ptr_arg(&self) -> u64 {
        self.qword_arg()
    }

    /// Absolute bytecode address of this instruction (stored into
    /// `programPointer` by the emitted yield paths).
    pub fn addr(&self) -> *const u32 {
        // Safety: pc is in bounds for the stream.
        unsafe { self.code.as_ptr().add(self.pc) }
    }

    /// Branch target in word units: displacement measured from the end of
    /// the instruction.
    pub fn branch_target(&self) -> usize {
        let size = self.opcode().size_words();
        (self.pc as i64 + self.int_arg() as i64 + size as i64) as usize
    }
}

/// Writer used by the test harness (and any embedder authoring bytecode
/// directly). Branch displacements go through labels so forward targets
/// resolve at `finish`.
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    words: Vec<u32>,
    labels: Vec<Option<usize>>,
    // (pc of branch instruction, word index of its displacement, label)
    fixups: Vec<(usize, usize, usize)>,
}

/// Branch target handle for [`BytecodeWriter`].
#[derive(Debug, Clone, Copy)]
pub struct BcLabel(usize);

impl BytecodeWriter {
    pub fn new() -> Self {
        BytecodeWriter::default()
    }

    fn head(op: Opcode, slot: u16) -> u32 {
        op as u8 as u32 | ((slot as u32) << 16)
    }

    /// One-word instruction with no operands.
    pub fn simple(&mut self, op: Opcode) -> &mut Self {
        debug_assert_eq!(op.size_words(), 1);
        self.words.push(Self::head(op, 0));
        self
    }

    /// One-word instruction with a frame-slot or raw-word operand.
    pub fn var(&mut self, op: Opcode, slot: i16) -> &mut Self {
        debug_assert_eq!(op.size_words(), 1);
        self.words.push(Self::head(op, slot as u16));
        self
    }

    /// `[op][.] [dword]`.
    pub fn dw(&mut self, op: Opcode, value: u32) -> &mut Self {
        debug_assert_eq!(op.size_words(), 2);
        self.words.push(Self::head(op, 0));
        self.words.push(value);
        self
    }

    /// `[op][slot] [dword]`.
    pub fn var_dw(&mut self, op: Opcode, slot: i16, value: u32) -> &mut Self {
        debug_assert_eq!(op.size_words(), 2);
        self.words.push(Self::head(op, slot as u16));
        self.words.push(value);
        self
    }

    /// `[op][word] [dword]` (raw word operand, e.g. `AddSi`).
    pub fn w_dw(&mut self, op: Opcode, word: i16, value: u32) -> &mut Self {
        self.var_dw(op, word, value)
    }

    /// `[op][a] [b][.]` — two-slot instruction.
    pub fn var_var(&mut self, op: Opcode, a: i16, b: i16) -> &mut Self {
        debug_assert_eq!(op.size_words(), 2);
        self.words.push(Self::head(op, a as u16));
        self.words.push(b as u16 as u32);
        self
    }

    /// `[op][a] [b][c]` — three-slot instruction.
    pub fn var3(&mut self, op: Opcode, a: i16, b: i16, c: i16) -> &mut Self {
        debug_assert_eq!(op.size_words(), 2);
        self.words.push(Self::head(op, a as u16));
        self.words.push(b as u16 as u32 | ((c as u16 as u32) << 16));
        self
    }

    /// `[op][a] [b][.] [dword]`.
    pub fn var_var_dw(&mut self, op: Opcode, a: i16, b: i16, value: u32) -> &mut Self {
        debug_assert_eq!(op.size_words(), 3);
        self.words.push(Self::head(op, a as u16));
        self.words.push(b as u16 as u32);
        self.words.push(value);
        self
    }

    /// `[op][slot] [dword] [dword]`.
    pub fn var_dw_dw(&mut self, op: Opcode, slot: i16, d0: u32, d1: u32) -> &mut Self {
        debug_assert_eq!(op.size_words(), 3);
        self.words.push(Self::head(op, slot as u16));
        self.words.push(d0);
        self.words.push(d1);
        self
    }

    /// `[op][.] [qword]`.
    pub fn qw(&mut self, op: Opcode, value: u64) -> &mut Self {
        debug_assert_eq!(op.size_words(), 3);
        self.words.push(Self::head(op, 0));
        self.words.push(value as u32);
        self.words.push((value >> 32) as u32);
        self
    }

    /// `[op][slot] [qword]`.
    pub fn var_qw(&mut self, op: Opcode, slot: i16, value: u64) -> &mut Self {
        debug_assert_eq!(op.size_words(), 3);
        self.words.push(Self::head(op, slot as u16));
        self.words.push(value as u32);
        self.words.push((value >> 32) as u32);
        self
    }

    /// `[op][.] [pointer]`.
    pub fn ptr(&mut self, op: Opcode, value: u64) -> &mut Self {
        self.qw(op, value)
    }

    /// `[op][slot] [pointer]`.
    pub fn var_ptr(&mut self, op: Opcode, slot: i16, value: u64) -> &mut Self {
        self.var_qw(op, slot, value)
    }

    /// `[op][.] [pointer] [dword]`.
    pub fn ptr_dw(&mut self, op: Opcode, ptr: u64, value: u32) -> &mut Self {
        debug_assert_eq!(op.size_words(), 4);
        self.words.push(Self::head(op, 0));
        self.words.push(ptr as u32);
        self.words.push((ptr >> 32) as u32);
        self.words.push(value);
        self
    }

    /// `JitEntry` with an unpatched (zero) operand.
    pub fn jit_entry(&mut self) -> &mut Self {
        self.dw(Opcode::JitEntry, 0)
    }

    /// Allocate a branch target.
    pub fn new_target(&mut self) -> BcLabel {
        self.labels.push(None);
        BcLabel(self.labels.len() - 1)
    }

    /// Bind a target to the current position.
    pub fn bind(&mut self, label: BcLabel) -> &mut Self {
        self.labels[label.0] = Some(self.words.len());
        self
    }

    /// Branch instruction; the displacement resolves at `finish`.
    pub fn branch(&mut self, op: Opcode, label: BcLabel) -> &mut Self {
        debug_assert!(op.is_branch());
        let pc = self.words.len();
        self.words.push(Self::head(op, 0));
        self.fixups.push((pc, self.words.len(), label.0));
        self.words.push(0);
        self
    }

    /// Resolve branches and return the stream.
    pub fn finish(mut self) -> Vec<u32> {
        for (pc, disp_at, label) in std::mem::take(&mut self.fixups) {
            let target = self.labels[label].expect("unbound bytecode label");
            let size = Opcode::from_u8((self.words[pc] & 0xFF) as u8)
                .expect("branch opcode")
                .size_words();
            self.words[disp_at] = (target as i64 - (pc as i64 + size as i64)) as i32 as u32;
        }
        self.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip_is_dense() {
        for byte in 0..=MAX_OPCODE {
            let op = Opcode::from_u8(byte).unwrap();
            assert_eq!(op as u8, byte);
            assert!((1..=4).contains(&op.size_words()));
        }
        assert!(Opcode::from_u8(MAX_OPCODE + 1).is_none());
    }

    #[test]
    fn short_args_follow_the_opcode_byte() {
        let mut w = BytecodeWriter::new();
        w.var3(Opcode::AddI, 1, 2, 3);
        let code = w.finish();
        let i = InstrRef::at(&code, 0);
        assert_eq!(i.opcode(), Opcode::AddI);
        assert_eq!(i.short_arg(0), 1);
        assert_eq!(i.short_arg(1), 2);
        assert_eq!(i.short_arg(2), 3);
        assert_eq!(i.var_offset(0), -4);
        assert_eq!(i.var_offset(2), -12);
    }

    #[test]
    fn qword_and_float_args() {
        let mut w = BytecodeWriter::new();
        w.var_qw(Opcode::SetV8, 2, 0x1122_3344_5566_7788);
        w.var_dw(Opcode::CmpIf, 1, 2.5f32.to_bits());
        let code = w.finish();
        let a = InstrRef::at(&code, 0);
        assert_eq!(a.qword_arg(), 0x1122_3344_5566_7788);
        let b = InstrRef::at(&code, 3);
        assert_eq!(b.opcode(), Opcode::CmpIf);
        assert_eq!(b.float_arg(0), 2.5);
        assert_eq!(b.short_arg(0), 1);
    }

    #[test]
    fn forward_branch_displacement() {
        let mut w = BytecodeWriter::new();
        let after = w.new_target();
        w.branch(Opcode::Jz, after);
        w.var_dw(Opcode::SetV4, 1, 7);
        w.bind(after);
        w.var(Opcode::CpyVtoR4, 1);
        let code = w.finish();
        let jz = InstrRef::at(&code, 0);
        // Jz is 2 words at pc 0; SetV4 occupies 2..4; target is 4.
        assert_eq!(jz.int_arg(), 2);
        assert_eq!(jz.branch_target(), 4);
    }

    #[test]
    fn backward_branch_displacement() {
        let mut w = BytecodeWriter::new();
        let top = w.new_target();
        w.bind(top);
        w.var(Opcode::IncVi, 1);
        w.branch(Opcode::Jmp, top);
        let code = w.finish();
        let jmp = InstrRef::at(&code, 1);
        assert_eq!(jmp.int_arg(), -3);
        assert_eq!(jmp.branch_target(), 0);
    }
}
