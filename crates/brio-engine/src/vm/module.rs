//! Script modules: function registry and host-function slots.

use rustc_hash::FxHashMap;

use crate::jit::CompiledFunction;
use crate::vm::bytecode::{InstrRef, Opcode};
use crate::vm::registers::VmRegisters;

/// Access to the VM state a host function may touch during `CALLSYS`.
pub struct HostCall<'a> {
    /// The live register block; the stack pointer addresses the arguments
    /// the script pushed.
    pub regs: &'a mut VmRegisters,
}

impl HostCall<'_> {
    /// Pop a 32-bit argument off the script stack.
    pub fn pop_dword(&mut self) -> u32 {
        unsafe {
            let v = self.regs.stack_pointer.read_unaligned();
            self.regs.stack_pointer = self.regs.stack_pointer.add(1);
            v
        }
    }

    /// Pop a pointer-sized argument off the script stack.
    pub fn pop_qword(&mut self) -> u64 {
        unsafe {
            let v = (self.regs.stack_pointer as *const u64).read_unaligned();
            self.regs.stack_pointer = self.regs.stack_pointer.add(2);
            v
        }
    }

    /// Place a 32-bit return value in the value register.
    pub fn set_return_dword(&mut self, v: u32) {
        self.regs.value_register = v as u64;
    }

    /// Place a 64-bit return value in the value register.
    pub fn set_return_qword(&mut self, v: u64) {
        self.regs.value_register = v;
    }
}

/// A registered host function, invoked by the VM at `CALLSYS`.
pub type HostFn = Box<dyn Fn(&mut HostCall<'_>) + Send + Sync>;

/// One script function: a name, its bytecode, and the compiled form once
/// the JIT has produced one.
pub struct Function {
    /// Function name; the compiler applies its skip markers to this.
    pub name: String,
    /// The bytecode stream. The JIT patches `JitEntry` operands in place,
    /// so the buffer must not be reallocated after compilation.
    pub code: Vec<u32>,
    /// Frame slots reserved below the frame pointer (highest slot index
    /// any instruction addresses).
    pub frame_words: u32,
    jit: Option<CompiledFunction>,
}

impl Function {
    /// Wrap a finished bytecode stream.
    pub fn new(name: impl Into<String>, code: Vec<u32>, frame_words: u32) -> Function {
        Function { name: name.into(), code, frame_words, jit: None }
    }

    /// The compiled form, if any.
    pub fn jit(&self) -> Option<&CompiledFunction> {
        self.jit.as_ref()
    }

    /// Install (or replace) the compiled form.
    pub(crate) fn set_jit(&mut self, jit: CompiledFunction) -> Option<CompiledFunction> {
        self.jit.replace(jit)
    }

    /// Remove the compiled form.
    pub fn take_jit(&mut self) -> Option<CompiledFunction> {
        self.jit.take()
    }

    /// The patched operand of the `JitEntry` at `pc`, if that instruction
    /// is one.
    pub fn jit_entry_arg(&self, pc: usize) -> Option<u32> {
        let instr = InstrRef::at(&self.code, pc);
        (instr.opcode() == Opcode::JitEntry).then(|| instr.dword_arg(0))
    }
}

/// A collection of script functions plus the host functions they may call.
pub struct Module {
    /// Module name, used in diagnostics.
    pub name: String,
    functions: Vec<Function>,
    host_fns: Vec<HostFn>,
    host_names: FxHashMap<String, u32>,
}

impl Module {
    /// Create an empty module.
    pub fn new(name: impl Into<String>) -> Module {
        Module {
            name: name.into(),
            functions: Vec::new(),
            host_fns: Vec::new(),
            host_names: FxHashMap::default(),
        }
    }

    /// Add a function; returns its index.
    pub fn add_function(&mut self, function: Function) -> u32 {
        self.functions.push(function);
        (self.functions.len() - 1) as u32
    }

    /// Function by index.
    pub fn function(&self, index: u32) -> &Function {
        &self.functions[index as usize]
    }

    /// Mutable function by index (compilation installs code through this).
    pub fn function_mut(&mut self, index: u32) -> &mut Function {
        &mut self.functions[index as usize]
    }

    /// Number of functions.
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Register a host function; returns the id `CALLSYS` refers to.
    pub fn register_host(&mut self, name: impl Into<String>, f: HostFn) -> u32 {
        let id = self.host_fns.len() as u32;
        self.host_fns.push(f);
        self.host_names.insert(name.into(), id);
        id
    }

    /// Host function by id.
    pub fn host(&self, id: u32) -> Option<&HostFn> {
        self.host_fns.get(id as usize)
    }
}
