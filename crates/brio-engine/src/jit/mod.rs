//! The Brio JIT: translates a function's bytecode into a native routine.
//!
//! The translator runs two passes over the stream. The scan pass collects
//! every branch target and allocates one label per distinct target
//! address; the emit pass walks the stream opcode by opcode, binding
//! pending labels, patching `JitEntry` operands with native offsets, and
//! dispatching each instruction to the architecture backend's lowering
//! table. Escape opcodes (host calls, allocation, interface dispatch, and
//! the rest of the set the VM keeps to itself) compile to a uniform
//! "flush mirrors and return" sequence; the VM executes the instruction
//! and re-enters at the next `JitEntry`.

pub(crate) mod a64;
pub(crate) mod runtime;
pub(crate) mod x64;

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use brio_asm::Label;

use crate::vm::bytecode::{InstrRef, Opcode};
use crate::vm::module::Function;

pub use runtime::{CompiledFunction, ExecutableCode};

/// Compilation failures.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// Compilation declined; the VM should fall back to interpretation.
    #[error("compilation refused ({0})")]
    Refused(&'static str),
    /// The stream contains a byte outside the opcode enumeration.
    #[error("invalid opcode byte {byte:#04x} at word {pc}")]
    InvalidOpcode {
        /// Offending byte.
        byte: u8,
        /// Word index.
        pc: usize,
    },
    /// A branch targets an address the scan pass never collected.
    #[error("undefined label for branch at word {pc}")]
    UndefinedLabel {
        /// Word index of the branch.
        pc: usize,
    },
    /// The deprecated `STR` opcode was encountered.
    #[error("deprecated instruction STR at word {pc}")]
    DeprecatedInstruction {
        /// Word index.
        pc: usize,
    },
    /// The encoder rejected the finalized buffer (label out of range).
    #[error("assembler error: {0}")]
    Asm(#[from] brio_asm::AsmError),
    /// Mapping the finished code executable failed.
    #[error("executable mapping failed: {0}")]
    Map(String),
}

/// Compiler options.
#[derive(Debug, Clone, Default)]
pub struct JitConfig {
    /// When set, `SUSPEND` opcodes yield to the VM; when clear they emit
    /// nothing.
    pub with_suspend: bool,
}

/// Translation target. Execution always uses the host backend; the other
/// backend stays reachable for cross-target emission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// x86-64 (System V or Windows profile, chosen at build time).
    X86_64,
    /// AArch64 (AAPCS64).
    AArch64,
}

impl Target {
    /// The backend matching the build target, if there is one.
    pub fn host() -> Option<Target> {
        #[cfg(target_arch = "x86_64")]
        {
            Some(Target::X86_64)
        }
        #[cfg(target_arch = "aarch64")]
        {
            Some(Target::AArch64)
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            None
        }
    }
}

/// One label per distinct branch-target address, collected by the scan
/// pass and consumed during emission.
#[derive(Debug, Default)]
pub(crate) struct LabelTable {
    entries: Vec<(usize, Label)>,
}

impl LabelTable {
    fn add(&mut self, target: usize, label: Label) -> bool {
        if self.find(target).is_some() {
            return false;
        }
        self.entries.push((target, label));
        true
    }

    /// Label bound at bytecode word `pc`, if any.
    pub(crate) fn find(&self, pc: usize) -> Option<Label> {
        self.entries.iter().find(|(t, _)| *t == pc).map(|(_, l)| *l)
    }

    /// Label for the target of the branch instruction `instr`.
    pub(crate) fn for_branch(&self, instr: InstrRef<'_>) -> Result<Label, JitError> {
        self.find(instr.branch_target()).ok_or(JitError::UndefinedLabel { pc: instr.pc() })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The seam between the shared translator driver and the per-ISA lowering
/// tables.
pub(crate) trait ArchEmitter {
    /// Emit the prologue: frame setup, mirror loads, and the computed
    /// entry branch. Records the header size.
    fn begin(&mut self);
    /// Byte length of the prologue (`JitEntry` operands are relative to
    /// this point).
    fn header_size(&self) -> usize;
    /// Current emission offset in bytes.
    fn offset(&self) -> usize;
    /// Fresh unbound label.
    fn new_label(&mut self) -> Label;
    /// Bind a label at the current offset.
    fn bind(&mut self, label: Label);
    /// Flush mirrors (with the given resume address) and return to the VM.
    fn emit_yield(&mut self, addr: *const u32);
    /// Lower one instruction.
    fn lower(&mut self, instr: InstrRef<'_>, labels: &LabelTable) -> Result<(), JitError>;
    /// Append the constant pool and finalize to raw bytes.
    fn finish(self) -> Result<Vec<u8>, JitError>;
}

fn opcode_at(code: &[u32], pc: usize) -> Result<Opcode, JitError> {
    let byte = (code[pc] & 0xFF) as u8;
    Opcode::from_u8(byte).ok_or(JitError::InvalidOpcode { byte, pc })
}

/// Drive a backend over `code`. Returns the finalized bytes and the
/// header size. `JitEntry` operands inside `code` are patched in place.
pub(crate) fn translate<E: ArchEmitter>(
    mut emitter: E,
    code: &mut [u32],
    skip: &FxHashSet<u32>,
) -> Result<(Vec<u8>, usize), JitError> {
    emitter.begin();

    // Scan pass: one label per distinct branch target.
    let mut labels = LabelTable::default();
    let mut pc = 0usize;
    while pc < code.len() {
        let op = opcode_at(code, pc)?;
        if op.is_branch() {
            let target = InstrRef::at(code, pc).branch_target();
            let label = emitter.new_label();
            labels.add(target, label);
        }
        pc += op.size_words();
    }

    // Emit pass.
    let mut pc = 0usize;
    let mut index = 0u32;
    while pc < code.len() {
        index += 1;
        let op = opcode_at(code, pc)?;
        let size = op.size_words();

        if let Some(label) = labels.find(pc) {
            emitter.bind(label);
        }

        if skip.contains(&index) {
            log::trace!("{index:>3}: {op:?} replaced with a yield (skip set)");
            let addr = InstrRef::at(code, pc).addr();
            emitter.emit_yield(addr);
            pc += size;
            continue;
        }

        match op {
            Opcode::JitEntry => {
                let native = (emitter.offset() - emitter.header_size()) as u32;
                code[pc + 1] = native;
                log::trace!("{index:>3}: JitEntry patched to native offset {native}");
            }
            Opcode::Str => return Err(JitError::DeprecatedInstruction { pc }),
            _ => {
                log::trace!("{index:>3}: {op:?} (size {size})");
                let instr = InstrRef::at(code, pc);
                emitter.lower(instr, &labels)?;
            }
        }
        pc += size;
    }

    let header = emitter.header_size();
    let bytes = emitter.finish()?;
    Ok((bytes, header))
}

/// The compiler the VM hands functions to.
///
/// One instance can serve many functions; the skip set and code-size
/// accounting are shared, compilation itself only touches the function
/// being compiled.
pub struct JitCompiler {
    config: JitConfig,
    skip: Mutex<FxHashMap<String, FxHashSet<u32>>>,
    code_bytes: AtomicUsize,
}

impl JitCompiler {
    /// Compiler with the given options.
    pub fn new(config: JitConfig) -> JitCompiler {
        JitCompiler { config, skip: Mutex::new(FxHashMap::default()), code_bytes: AtomicUsize::new(0) }
    }

    /// Force the instruction at 1-based `index` of `name` to yield to the
    /// VM instead of compiling (testing/diagnostic affordance).
    pub fn push_instruction_index_for_skip(&self, name: &str, index: u32) {
        self.skip.lock().entry(name.to_string()).or_default().insert(index);
    }

    /// Compile `function`, storing the native routine in it on success.
    ///
    /// Refuses (and the VM falls back to the interpreter) when the name
    /// carries a skip marker, the bytecode is empty, or the host has no
    /// backend.
    pub fn compile(&self, function: &mut Function) -> Result<(), JitError> {
        if function.name.contains("nojit") || function.name.contains("$fact") {
            return Err(JitError::Refused("name marker"));
        }
        if function.code.is_empty() {
            return Err(JitError::Refused("empty bytecode"));
        }

        let target = Target::host().ok_or(JitError::Refused("no backend for this architecture"))?;
        let (bytes, header) = self.translate_to_bytes(function, target)?;
        let code = ExecutableCode::map(&bytes)?;
        self.code_bytes.fetch_add(code.len(), Ordering::Relaxed);
        if let Some(old) = function.take_jit() {
            self.code_bytes.fetch_sub(old.code_size(), Ordering::Relaxed);
        }
        let compiled = CompiledFunction::new(code, header);
        log::debug!(
            "compiled '{}': {} bytes, header {}",
            function.name,
            compiled.code_size(),
            header
        );
        function.set_jit(compiled);
        Ok(())
    }

    /// Free a function's native code and return its bytes to the pool.
    pub fn release(&self, function: &mut Function) {
        if let Some(old) = function.take_jit() {
            self.code_bytes.fetch_sub(old.code_size(), Ordering::Relaxed);
        }
    }

    /// Total mapped native-code bytes currently live.
    pub fn code_bytes(&self) -> usize {
        self.code_bytes.load(Ordering::Relaxed)
    }

    /// Run the translator for an explicit target without mapping the
    /// result executable. `JitEntry` operands are patched as in a full
    /// compile; the returned pair is the raw code and the header size.
    pub fn translate_to_bytes(
        &self,
        function: &mut Function,
        target: Target,
    ) -> Result<(Vec<u8>, usize), JitError> {
        log::debug!(
            "translating '{}' ({} words) for {target:?}",
            function.name,
            function.code.len()
        );
        let skip = self.skip.lock().get(&function.name).cloned().unwrap_or_default();
        match target {
            Target::X86_64 => {
                translate(x64::Emitter::new(self.config.with_suspend), &mut function.code, &skip)
            }
            Target::AArch64 => {
                translate(a64::Emitter::new(self.config.with_suspend), &mut function.code, &skip)
            }
        }
    }
}

impl Default for JitCompiler {
    fn default() -> Self {
        JitCompiler::new(JitConfig::default())
    }
}
