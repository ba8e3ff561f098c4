//! The VM register record shared between the interpreter and emitted code.

/// Fixed-layout register block the VM hands to a compiled routine.
///
/// The emitted code mirrors five of these fields in native registers for
/// the duration of a call and writes every mirrored field back before any
/// return to the VM. `program_pointer` is additionally stored on every
/// yield that is not a plain fall-through return, so interpretation
/// resumes at the right instruction.
#[repr(C)]
#[derive(Debug)]
pub struct VmRegisters {
    /// Bytecode cursor (absolute address into the function's stream).
    pub program_pointer: *mut u32,
    /// Base of the current script frame; slots live below it.
    pub stack_frame_pointer: *mut u32,
    /// Top of the script stack; grows toward lower addresses.
    pub stack_pointer: *mut u32,
    /// 64-bit scratch used by comparisons, loads, and stores.
    pub value_register: u64,
    /// Most recently produced script object.
    pub object_register: *mut u8,
    /// Type descriptor associated with `object_register`.
    pub object_type: *mut u8,
}

impl Default for VmRegisters {
    fn default() -> Self {
        VmRegisters {
            program_pointer: std::ptr::null_mut(),
            stack_frame_pointer: std::ptr::null_mut(),
            stack_pointer: std::ptr::null_mut(),
            value_register: 0,
            object_register: std::ptr::null_mut(),
            object_type: std::ptr::null_mut(),
        }
    }
}

/// Signature of a compiled routine: the register block and the offset
/// (relative to the end of the prologue) at which to resume.
pub type JitFn = unsafe extern "C" fn(*mut VmRegisters, u32);
