//! Runtime support for compiled code: executable memory, the foreign
//! helper functions the lowering tables call, and the script-exception
//! slot the null-access raiser writes.

use std::cell::Cell;

use crate::jit::JitError;
use crate::vm::registers::JitFn;

// ---------------------------------------------------------------------------
// Script exception slot
// ---------------------------------------------------------------------------

thread_local! {
    static SCRIPT_EXCEPTION: Cell<bool> = const { Cell::new(false) };
}

/// Clear the pending-exception flag before a run.
pub(crate) fn clear_script_exception() {
    SCRIPT_EXCEPTION.with(|c| c.set(false));
}

/// Consume the pending-exception flag after native code yields.
pub(crate) fn take_script_exception() -> bool {
    SCRIPT_EXCEPTION.with(|c| c.replace(false))
}

// ---------------------------------------------------------------------------
// Foreign helpers
// ---------------------------------------------------------------------------

/// C-ABI helpers called from emitted code. The interpreter calls the same
/// functions, so both execution paths share one definition of these
/// semantics. Mirrors are saved before and reloaded after every call site.
pub(crate) mod helpers {
    /// Record a null-pointer access; the emitted code returns to the VM
    /// through the ordinary yield path right after this call.
    pub extern "C" fn raise_null_access() {
        super::SCRIPT_EXCEPTION.with(|c| c.set(true));
    }

    /// `memcpy` shim with an explicit byte count.
    ///
    /// # Safety
    /// Called from emitted code with pointers the script produced.
    pub unsafe extern "C" fn mem_copy(dst: *mut u8, src: *const u8, bytes: usize) {
        unsafe { std::ptr::copy_nonoverlapping(src, dst, bytes) }
    }

    pub extern "C" fn mod_float(a: f32, b: f32) -> f32 {
        a % b
    }

    pub extern "C" fn mod_double(a: f64, b: f64) -> f64 {
        a % b
    }

    pub extern "C" fn ipow(a: i32, b: i32) -> i32 {
        (a as f64).powf(b as f64) as i32
    }

    pub extern "C" fn upow(a: u32, b: u32) -> u32 {
        (a as f64).powf(b as f64) as u32
    }

    pub extern "C" fn i64pow(a: i64, b: i64) -> i64 {
        (a as f64).powf(b as f64) as i64
    }

    pub extern "C" fn u64pow(a: u64, b: u64) -> u64 {
        (a as f64).powf(b as f64) as u64
    }

    pub extern "C" fn fpow(a: f32, b: f32) -> f32 {
        a.powf(b)
    }

    pub extern "C" fn dpow(a: f64, b: f64) -> f64 {
        a.powf(b)
    }

    pub extern "C" fn dipow(a: f64, b: i32) -> f64 {
        a.powi(b)
    }

    pub extern "C" fn uint_to_float(v: u32) -> f32 {
        v as f32
    }

    pub extern "C" fn uint_to_double(v: u32) -> f64 {
        v as f64
    }

    pub extern "C" fn uint64_to_float(v: u64) -> f32 {
        v as f32
    }

    pub extern "C" fn uint64_to_double(v: u64) -> f64 {
        v as f64
    }

    pub extern "C" fn float_to_uint64(v: f32) -> u64 {
        v as u64
    }

    pub extern "C" fn double_to_uint64(v: f64) -> u64 {
        v as u64
    }
}

// ---------------------------------------------------------------------------
// Executable memory
// ---------------------------------------------------------------------------

/// A finalized native-code buffer mapped executable (W^X: written while
/// writable, then flipped to read+execute).
pub struct ExecutableCode {
    ptr: *mut u8,
    len: usize,
}

// Safety: the mapping is immutable after construction.
unsafe impl Send for ExecutableCode {}
unsafe impl Sync for ExecutableCode {}

impl ExecutableCode {
    /// Map `bytes` into fresh executable memory.
    #[cfg(unix)]
    pub fn map(bytes: &[u8]) -> Result<ExecutableCode, JitError> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
        let len = bytes.len().div_ceil(page).max(1) * page;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(JitError::Map(std::io::Error::last_os_error().to_string()));
        }
        let ptr = ptr as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
            if libc::mprotect(ptr as *mut libc::c_void, len, libc::PROT_READ | libc::PROT_EXEC)
                != 0
            {
                let err = std::io::Error::last_os_error().to_string();
                libc::munmap(ptr as *mut libc::c_void, len);
                return Err(JitError::Map(err));
            }
        }
        flush_icache(ptr, bytes.len());
        Ok(ExecutableCode { ptr, len })
    }

    /// Executable mapping is not implemented off unix.
    #[cfg(not(unix))]
    pub fn map(_bytes: &[u8]) -> Result<ExecutableCode, JitError> {
        Err(JitError::Refused("no executable-memory backend for this platform"))
    }

    /// Base address of the code.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    /// Mapped size in bytes (page-rounded).
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is mapped (never the case for a live value).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ExecutableCode {
    fn drop(&mut self) {
        #[cfg(unix)]
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

/// Bring the instruction cache in sync with the freshly written code.
#[cfg(target_arch = "aarch64")]
fn flush_icache(ptr: *mut u8, len: usize) {
    // dc cvau / ic ivau over the affected lines, then synchronize.
    unsafe {
        let line = 64usize;
        let start = ptr as usize & !(line - 1);
        let end = ptr as usize + len;
        let mut p = start;
        while p < end {
            std::arch::asm!("dc cvau, {0}", in(reg) p);
            p += line;
        }
        std::arch::asm!("dsb ish");
        let mut p = start;
        while p < end {
            std::arch::asm!("ic ivau, {0}", in(reg) p);
            p += line;
        }
        std::arch::asm!("dsb ish", "isb");
    }
}

#[cfg(not(target_arch = "aarch64"))]
fn flush_icache(_ptr: *mut u8, _len: usize) {}

/// A function's compiled form: the mapped code plus the prologue length
/// that `JitEntry` offsets are measured from.
pub struct CompiledFunction {
    code: ExecutableCode,
    header_size: usize,
}

impl CompiledFunction {
    pub(crate) fn new(code: ExecutableCode, header_size: usize) -> CompiledFunction {
        CompiledFunction { code, header_size }
    }

    /// The callable entry point.
    pub fn entry(&self) -> JitFn {
        // Safety: the buffer holds a finalized routine with this signature.
        unsafe { std::mem::transmute::<*const u8, JitFn>(self.code.as_ptr()) }
    }

    /// Byte length of the prologue; `JitEntry` operands are native offsets
    /// from this point.
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// Mapped code size in bytes.
    pub fn code_size(&self) -> usize {
        self.code.len()
    }
}
