//! Interpreter/JIT equivalence suite.
//!
//! Every test builds a small function, runs it under the reference
//! interpreter, compiles it, runs it again with native entry enabled, and
//! asserts the VM-visible outcome (frame slots, value register, object
//! register, stack delta) is identical. Native execution only happens on
//! hosts with a backend; elsewhere the whole suite is compiled out.

#![cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))]

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use brio_engine::vm::{BytecodeWriter, Executor, Function, Module, Opcode, VmError};
use brio_engine::{JitCompiler, JitConfig};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn module_with(name: &str, frame_words: u32, build: impl FnOnce(&mut BytecodeWriter)) -> Module {
    let mut w = BytecodeWriter::new();
    w.jit_entry();
    build(&mut w);
    w.var(Opcode::Ret, 0);
    let mut module = Module::new("equivalence");
    module.add_function(Function::new(name, w.finish(), frame_words));
    module
}

/// Interpret, compile, run natively, and require identical outcomes.
fn assert_equivalent(module: &mut Module) {
    init_logs();
    let interpreted = Executor::new(module).run_interpreted(0).expect("interpreter run");
    let jit = JitCompiler::new(JitConfig::default());
    jit.compile(module.function_mut(0)).expect("compilation");
    let compiled = Executor::new(module).run(0).expect("compiled run");
    assert_eq!(interpreted, compiled);
}

fn check(name: &str, frame_words: u32, build: impl FnOnce(&mut BytecodeWriter)) {
    let mut module = module_with(name, frame_words, build);
    assert_equivalent(&mut module);
}

/// Both paths must report the same script error.
fn check_null(name: &str, frame_words: u32, build: impl FnOnce(&mut BytecodeWriter)) {
    init_logs();
    let mut module = module_with(name, frame_words, build);
    let interpreted = Executor::new(&module).run_interpreted(0);
    assert_eq!(interpreted.unwrap_err(), VmError::NullPointerAccess);
    let jit = JitCompiler::new(JitConfig::default());
    jit.compile(module.function_mut(0)).expect("compilation");
    let compiled = Executor::new(&module).run(0);
    assert_eq!(compiled.unwrap_err(), VmError::NullPointerAccess);
}

fn leak_u64(v: u64) -> u64 {
    Box::leak(Box::new(v)) as *mut u64 as u64
}

// ---------------------------------------------------------------------------
// integer arithmetic
// ---------------------------------------------------------------------------

#[test]
fn int32_arithmetic() {
    for (op, a, b) in [
        (Opcode::AddI, 2u32, 3u32),
        (Opcode::AddI, u32::MAX, 7),
        (Opcode::SubI, 5, 9),
        (Opcode::MulI, 1234, 5678),
        (Opcode::DivI, (-40i32) as u32, 6),
        (Opcode::ModI, 7, 3),
        (Opcode::ModI, (-7i32) as u32, 3),
        (Opcode::DivU, 0xFFFF_FFF0, 6),
        (Opcode::ModU, 0xFFFF_FFF0, 7),
    ] {
        check("int32_arith", 8, |w| {
            w.var_dw(Opcode::SetV4, 2, a);
            w.var_dw(Opcode::SetV4, 3, b);
            w.var3(op, 1, 2, 3);
            w.var(Opcode::CpyVtoR4, 1);
        });
    }
}

#[test]
fn int64_arithmetic() {
    for (op, a, b) in [
        (Opcode::AddI64, 0x1_0000_0001u64, 0xFFFF_FFFFu64),
        (Opcode::SubI64, 5, 9),
        (Opcode::MulI64, 0x1234_5678, 0x9ABC),
        (Opcode::DivI64, (-400i64) as u64, 7),
        (Opcode::ModI64, (-400i64) as u64, 7),
        (Opcode::DivU64, u64::MAX - 5, 11),
        (Opcode::ModU64, u64::MAX - 5, 11),
    ] {
        check("int64_arith", 12, |w| {
            w.var_qw(Opcode::SetV8, 4, a);
            w.var_qw(Opcode::SetV8, 6, b);
            w.var3(op, 2, 4, 6);
            w.var(Opcode::CpyVtoR8, 2);
        });
    }
}

#[test]
fn bitwise_and_shifts() {
    for (op, a, b) in [
        (Opcode::BAnd, 0xF0F0_1234u32, 0x0FF0_00FFu32),
        (Opcode::BOr, 0xF0F0_1234, 0x0FF0_00FF),
        (Opcode::BXor, 0xF0F0_1234, 0x0FF0_00FF),
        (Opcode::Bsll, 0x8000_1234, 5),
        (Opcode::Bsrl, 0x8000_1234, 5),
        (Opcode::Bsra, 0x8000_1234, 5),
    ] {
        check("bits32", 8, |w| {
            w.var_dw(Opcode::SetV4, 2, a);
            w.var_dw(Opcode::SetV4, 3, b);
            w.var3(op, 1, 2, 3);
            w.var(Opcode::CpyVtoR4, 1);
        });
    }
    // 64-bit shift widths past 31 catch 32/64 conflation.
    for (op, a, b) in [
        (Opcode::BAnd64, 0xF0F0_1234_5678_9ABCu64, 0x0FF0_00FF_FF00_0F0Fu64),
        (Opcode::BOr64, 0xF0F0_1234_5678_9ABC, 0x0FF0_00FF_FF00_0F0F),
        (Opcode::BXor64, 0xF0F0_1234_5678_9ABC, 0x0FF0_00FF_FF00_0F0F),
        (Opcode::Bsll64, 0x8000_0000_0000_1234, 36),
        (Opcode::Bsrl64, 0x8000_0000_0000_1234, 36),
        (Opcode::Bsra64, 0x8000_0000_0000_1234, 36),
    ] {
        check("bits64", 12, |w| {
            w.var_qw(Opcode::SetV8, 4, a);
            w.var_qw(Opcode::SetV8, 6, b);
            w.var3(op, 2, 4, 6);
            w.var(Opcode::CpyVtoR8, 2);
        });
    }
}

#[test]
fn negation_and_not() {
    check("neg_not", 12, |w| {
        w.var_dw(Opcode::SetV4, 1, 41);
        w.var(Opcode::NegI, 1);
        w.var_dw(Opcode::SetV4, 2, 3.5f32.to_bits());
        w.var(Opcode::NegF, 2);
        w.var_qw(Opcode::SetV8, 4, (-2.25f64).to_bits());
        w.var(Opcode::NegD, 4);
        w.var_qw(Opcode::SetV8, 6, 123_456_789_012u64);
        w.var(Opcode::NegI64, 6);
        w.var_dw(Opcode::SetV4, 7, 0x00FF_00FF);
        w.var(Opcode::BNot, 7);
        w.var_qw(Opcode::SetV8, 9, 0x00FF_00FF_0000_FFFF);
        w.var(Opcode::BNot64, 9);
    });
}

#[test]
fn immediate_arithmetic() {
    for (op, imm) in
        [(Opcode::AddIi, 100u32), (Opcode::SubIi, 77), (Opcode::MulIi, (-3i32) as u32)]
    {
        check("imm_int", 6, |w| {
            w.var_dw(Opcode::SetV4, 2, 17);
            w.var_var_dw(op, 1, 2, imm);
            w.var(Opcode::CpyVtoR4, 1);
        });
    }
    for (op, imm) in [
        (Opcode::AddIf, 1.25f32),
        (Opcode::SubIf, 0.5),
        (Opcode::MulIf, -2.0),
    ] {
        check("imm_float", 6, |w| {
            w.var_dw(Opcode::SetV4, 2, 6.5f32.to_bits());
            w.var_var_dw(op, 1, 2, imm.to_bits());
            w.var(Opcode::CpyVtoR4, 1);
        });
    }
}

// ---------------------------------------------------------------------------
// floating point
// ---------------------------------------------------------------------------

#[test]
fn float_arithmetic() {
    for (op, a, b) in [
        (Opcode::AddF, 1.5f32, 2.25f32),
        (Opcode::SubF, 10.0, 0.125),
        (Opcode::MulF, 3.5, 2.0),
        (Opcode::DivF, 7.0, 2.0),
        (Opcode::ModF, 7.5, 2.0),
        (Opcode::PowF, 2.0, 10.0),
    ] {
        check("float_arith", 8, |w| {
            w.var_dw(Opcode::SetV4, 2, a.to_bits());
            w.var_dw(Opcode::SetV4, 3, b.to_bits());
            w.var3(op, 1, 2, 3);
            w.var(Opcode::CpyVtoR4, 1);
        });
    }
}

#[test]
fn double_arithmetic() {
    for (op, a, b) in [
        (Opcode::AddD, 1.5f64, 2.25f64),
        (Opcode::SubD, 10.0, 0.125),
        (Opcode::MulD, 3.5, 2.0),
        (Opcode::DivD, 7.0, 2.0),
        (Opcode::ModD, 7.5, 2.0),
        (Opcode::PowD, 2.0, 16.0),
    ] {
        check("double_arith", 12, |w| {
            w.var_qw(Opcode::SetV8, 4, a.to_bits());
            w.var_qw(Opcode::SetV8, 6, b.to_bits());
            w.var3(op, 2, 4, 6);
            w.var(Opcode::CpyVtoR8, 2);
        });
    }
}

#[test]
fn power_family() {
    check("pow_ints", 14, |w| {
        w.var_dw(Opcode::SetV4, 2, 3);
        w.var_dw(Opcode::SetV4, 3, 4);
        w.var3(Opcode::PowI, 1, 2, 3);
        w.var3(Opcode::PowU, 4, 2, 3);
        w.var_qw(Opcode::SetV8, 6, 2);
        w.var_qw(Opcode::SetV8, 8, 20);
        w.var3(Opcode::PowI64, 10, 6, 8);
        w.var3(Opcode::PowU64, 12, 6, 8);
    });
    check("pow_double_int", 10, |w| {
        w.var_qw(Opcode::SetV8, 4, 1.5f64.to_bits());
        w.var_dw(Opcode::SetV4, 5, 3);
        w.var3(Opcode::PowDi, 2, 4, 5);
        w.var(Opcode::CpyVtoR8, 2);
    });
}

// ---------------------------------------------------------------------------
// comparisons
// ---------------------------------------------------------------------------

#[test]
fn compare_int32() {
    for (a, b) in [(1u32, 2u32), (2, 2), (3, 2), ((-5i32) as u32, 2)] {
        check("cmp_i", 6, |w| {
            w.var_dw(Opcode::SetV4, 1, a);
            w.var_dw(Opcode::SetV4, 2, b);
            w.var_var(Opcode::CmpI, 1, 2);
        });
        check("cmp_u", 6, |w| {
            w.var_dw(Opcode::SetV4, 1, a);
            w.var_dw(Opcode::SetV4, 2, b);
            w.var_var(Opcode::CmpU, 1, 2);
        });
        check("cmp_ii", 6, |w| {
            w.var_dw(Opcode::SetV4, 1, a);
            w.var_dw(Opcode::CmpIi, 1, b);
        });
        check("cmp_iu", 6, |w| {
            w.var_dw(Opcode::SetV4, 1, a);
            w.var_dw(Opcode::CmpIu, 1, b);
        });
    }
}

#[test]
fn compare_int64() {
    for (a, b) in [(1u64, 2u64), (7, 7), (9, 2), ((-5i64) as u64, 2)] {
        check("cmp_i64", 10, |w| {
            w.var_qw(Opcode::SetV8, 2, a);
            w.var_qw(Opcode::SetV8, 4, b);
            w.var_var(Opcode::CmpI64, 2, 4);
        });
        check("cmp_u64", 10, |w| {
            w.var_qw(Opcode::SetV8, 2, a);
            w.var_qw(Opcode::SetV8, 4, b);
            w.var_var(Opcode::CmpU64, 2, 4);
        });
        check("cmp_ptr", 10, |w| {
            w.var_qw(Opcode::SetV8, 2, a);
            w.var_qw(Opcode::SetV8, 4, b);
            w.var_var(Opcode::CmpPtr, 2, 4);
        });
    }
}

#[test]
fn compare_float_double() {
    for (a, b) in [(1.0f32, 2.0f32), (2.5, 2.5), (3.5, -1.0)] {
        check("cmp_f", 6, |w| {
            w.var_dw(Opcode::SetV4, 1, a.to_bits());
            w.var_dw(Opcode::SetV4, 2, b.to_bits());
            w.var_var(Opcode::CmpF, 1, 2);
        });
        check("cmp_if", 6, |w| {
            w.var_dw(Opcode::SetV4, 1, a.to_bits());
            w.var_dw(Opcode::CmpIf, 1, b.to_bits());
        });
    }
    for (a, b) in [(1.0f64, 2.0f64), (2.5, 2.5), (3.5, -1.0)] {
        check("cmp_d", 10, |w| {
            w.var_qw(Opcode::SetV8, 2, a.to_bits());
            w.var_qw(Opcode::SetV8, 4, b.to_bits());
            w.var_var(Opcode::CmpD, 2, 4);
        });
    }
}

#[test]
fn value_register_tests() {
    for v in [0u32, 1, (-3i32) as u32, 7] {
        for op in [Opcode::Tz, Opcode::Tnz, Opcode::Ts, Opcode::Tns, Opcode::Tp, Opcode::Tnp] {
            check("t_family", 4, |w| {
                w.var_dw(Opcode::SetV4, 1, v);
                w.var(Opcode::CpyVtoR4, 1);
                w.simple(op);
            });
        }
        check("not", 4, |w| {
            w.var_dw(Opcode::SetV4, 1, v);
            w.var(Opcode::CpyVtoR4, 1);
            w.simple(Opcode::Not);
        });
    }
    check("clr_hi", 4, |w| {
        w.var_dw(Opcode::SetV4, 1, 0x1234_5678);
        w.var(Opcode::CpyVtoR4, 1);
        w.simple(Opcode::ClrHi);
    });
}

// ---------------------------------------------------------------------------
// control flow
// ---------------------------------------------------------------------------

#[test]
fn forward_branch_skips_assignment() {
    // int x = 0; if (x == 0) x = 1; return x;
    let mut module = module_with("branch_fwd", 4, |w| {
        w.var_dw(Opcode::SetV4, 1, 0);
        w.var_dw(Opcode::CmpIi, 1, 0);
        let past = w.new_target();
        w.branch(Opcode::Jnz, past);
        w.var_dw(Opcode::SetV4, 1, 1);
        w.bind(past);
        w.var(Opcode::CpyVtoR4, 1);
    });
    assert_equivalent(&mut module);
    let r = Executor::new(&module).run(0).unwrap();
    assert_eq!(r.value_register as u32, 1);
}

#[test]
fn backward_branch_loops() {
    // sum = 0; i = 10; do { sum += i; i--; } while (i != 0); return sum;
    let mut module = module_with("branch_back", 6, |w| {
        w.var_dw(Opcode::SetV4, 1, 0);
        w.var_dw(Opcode::SetV4, 2, 10);
        let top = w.new_target();
        w.bind(top);
        w.var3(Opcode::AddI, 1, 1, 2);
        w.var(Opcode::DecVi, 2);
        w.var(Opcode::CpyVtoR4, 2);
        w.branch(Opcode::Jnz, top);
        w.var(Opcode::CpyVtoR4, 1);
    });
    assert_equivalent(&mut module);
    let r = Executor::new(&module).run(0).unwrap();
    assert_eq!(r.value_register as u32, 55);
}

#[test]
fn low_byte_branches() {
    for v in [0u32, 0x100, 0x101] {
        for op in [Opcode::JLowZ, Opcode::JLowNZ] {
            check("jlow", 4, |w| {
                w.var_dw(Opcode::SetV4, 1, v);
                w.var(Opcode::CpyVtoR4, 1);
                let taken = w.new_target();
                w.branch(op, taken);
                w.var_dw(Opcode::SetV4, 2, 111);
                w.bind(taken);
                w.var(Opcode::IncVi, 2);
            });
        }
    }
}

#[test]
fn signed_branches() {
    for v in [0u32, 5, (-5i32) as u32] {
        for op in [Opcode::Jz, Opcode::Jnz, Opcode::Js, Opcode::Jns, Opcode::Jp, Opcode::Jnp] {
            check("jcc", 4, |w| {
                w.var_dw(Opcode::SetV4, 1, v);
                w.var(Opcode::CpyVtoR4, 1);
                let taken = w.new_target();
                w.branch(op, taken);
                w.var_dw(Opcode::SetV4, 2, 7);
                w.bind(taken);
                w.var(Opcode::IncVi, 2);
            });
        }
    }
}

// ---------------------------------------------------------------------------
// conversions
// ---------------------------------------------------------------------------

#[test]
fn conversions_32bit() {
    check("conv32", 8, |w| {
        w.var_dw(Opcode::SetV4, 1, (-7i32) as u32);
        w.var(Opcode::ItoF, 1);
        w.var_dw(Opcode::SetV4, 2, (-2.75f32).to_bits());
        w.var(Opcode::FtoI, 2);
        w.var_dw(Opcode::SetV4, 3, 0xE000_0001);
        w.var(Opcode::UtoF, 3);
        w.var_dw(Opcode::SetV4, 4, 3.99f32.to_bits());
        w.var(Opcode::FtoU, 4);
        w.var_dw(Opcode::SetV4, 5, 0x0000_00F5);
        w.var(Opcode::SbToI, 5);
        w.var_dw(Opcode::SetV4, 6, 0x0000_F005);
        w.var(Opcode::SwToI, 6);
    });
    check("conv32_more", 8, |w| {
        w.var_dw(Opcode::SetV4, 1, 0x0000_00F5);
        w.var(Opcode::UbToI, 1);
        w.var_dw(Opcode::SetV4, 2, 0x0000_F005);
        w.var(Opcode::UwToI, 2);
        w.var_dw(Opcode::SetV4, 3, 0x1234_5678);
        w.var(Opcode::ItoB, 3);
        w.var_dw(Opcode::SetV4, 4, 0x1234_5678);
        w.var(Opcode::ItoW, 4);
    });
}

#[test]
fn conversions_double() {
    check("conv_d", 16, |w| {
        w.var_qw(Opcode::SetV8, 2, (-2.75f64).to_bits());
        w.var_var(Opcode::DtoI, 4, 2);
        w.var_var(Opcode::DtoU, 5, 2);
        w.var_var(Opcode::DtoF, 6, 2);
        w.var_dw(Opcode::SetV4, 7, (-9i32) as u32);
        w.var_var(Opcode::ItoD, 10, 7);
        w.var_dw(Opcode::SetV4, 8, 0xE000_0001);
        w.var_var(Opcode::UtoD, 12, 8);
        w.var_dw(Opcode::SetV4, 9, 1.5f32.to_bits());
        w.var_var(Opcode::FtoD, 14, 9);
    });
}

#[test]
fn conversions_64bit() {
    check("conv64", 24, |w| {
        w.var_qw(Opcode::SetV8, 2, (-3i64) as u64);
        w.var_var(Opcode::I64toI, 4, 2);
        w.var_dw(Opcode::SetV4, 5, 0xE000_0001);
        w.var_var(Opcode::UtoI64, 6, 5);
        w.var_dw(Opcode::SetV4, 8, (-19i32) as u32);
        w.var_var(Opcode::ItoI64, 10, 8);
        w.var_dw(Opcode::SetV4, 12, 123.75f32.to_bits());
        w.var_var(Opcode::FtoI64, 14, 12);
        w.var_var(Opcode::FtoU64, 16, 12);
        w.var_qw(Opcode::SetV8, 18, 456.5f64.to_bits());
        w.var_var(Opcode::DtoI64, 20, 18);
        w.var_var(Opcode::DtoU64, 22, 18);
    });
    check("conv64_to_fp", 24, |w| {
        w.var_qw(Opcode::SetV8, 2, (-123_456_789i64) as u64);
        w.var_var(Opcode::I64toF, 4, 2);
        w.var_var(Opcode::I64toD, 6, 2);
        w.var_qw(Opcode::SetV8, 8, 0xF000_0000_0000_0001);
        w.var_var(Opcode::U64toF, 10, 8);
        w.var_var(Opcode::U64toD, 12, 8);
    });
}

// ---------------------------------------------------------------------------
// stack and register moves
// ---------------------------------------------------------------------------

#[test]
fn stack_pushes_and_pops() {
    check("stack_ops", 8, |w| {
        w.dw(Opcode::PshC4, 0x1111_2222);
        w.qw(Opcode::PshC8, 0x3333_4444_5555_6666);
        w.var_dw(Opcode::SetV4, 1, 0xAAAA_BBBB);
        w.var(Opcode::PshV4, 1);
        w.var_qw(Opcode::SetV8, 4, 0xCCCC_DDDD_EEEE_FFFF);
        w.var(Opcode::PshV8, 4);
        w.simple(Opcode::PopRPtr);
        w.simple(Opcode::PshRPtr);
        w.simple(Opcode::PshNull);
        w.simple(Opcode::PopPtr);
        w.var(Opcode::Var, -5);
        w.simple(Opcode::PopRPtr);
    });
    check("swap_ptr", 4, |w| {
        w.qw(Opcode::PshC8, 0x1111);
        w.qw(Opcode::PshC8, 0x2222);
        w.simple(Opcode::SwapPtr);
        w.simple(Opcode::PopRPtr);
    });
    check("push_frame_addr", 4, |w| {
        // Psf pushes an absolute address: consume it back into a frame
        // value via RdsPtr so the observable state is position-independent.
        w.var_dw(Opcode::SetV4, 1, 0x7777_0001);
        w.var(Opcode::Psf, 1);
        w.simple(Opcode::RdsPtr);
        w.simple(Opcode::PopRPtr);
        w.var(Opcode::CpyRtoV4, 2);
        w.simple(Opcode::PshNull);
        w.simple(Opcode::PopPtr);
    });
}

#[test]
fn value_register_moves() {
    check("vreg_moves", 12, |w| {
        w.var_dw(Opcode::SetV4, 1, 0x0102_0304);
        w.var(Opcode::CpyVtoR4, 1);
        w.var(Opcode::CpyRtoV4, 2);
        w.var_qw(Opcode::SetV8, 4, 0x1122_3344_5566_7788);
        w.var(Opcode::CpyVtoR8, 4);
        w.var(Opcode::CpyRtoV8, 6);
        w.var_var(Opcode::CpyVtoV4, 8, 1);
        w.var_var(Opcode::CpyVtoV8, 10, 4);
    });
}

#[test]
fn through_pointer_accesses() {
    // Ldv points the value register at slot 8, then WrtV*/Rdr* go through
    // it.
    check("wrt_rdr", 12, |w| {
        w.var_qw(Opcode::SetV8, 8, 0);
        w.var(Opcode::Ldv, 8);
        w.var_dw(Opcode::SetV4, 1, 0xDDCC_BBAA);
        w.var(Opcode::WrtV4, 1);
        w.var(Opcode::Rdr4, 2);
        w.var(Opcode::WrtV1, 1);
        w.var(Opcode::Rdr1, 3);
        w.var(Opcode::WrtV2, 1);
        w.var(Opcode::Rdr2, 4);
        w.var_qw(Opcode::SetV8, 10, 0x0908_0706_0504_0302);
        w.var(Opcode::WrtV8, 10);
        w.var(Opcode::Rdr8, 6);
        // The value register still holds a frame address; replace it with
        // data so the outcome is position-independent.
        w.var(Opcode::CpyVtoR8, 6);
    });
    check("inc_dec_through_pointer", 10, |w| {
        w.var_dw(Opcode::SetV4, 2, 41);
        w.var(Opcode::Ldv, 2);
        w.simple(Opcode::IncI);
        w.simple(Opcode::IncI8);
        w.simple(Opcode::DecI16);
        w.var_qw(Opcode::SetV8, 6, 1000);
        w.var(Opcode::Ldv, 6);
        w.simple(Opcode::IncI64);
        w.simple(Opcode::DecI64);
        w.simple(Opcode::IncI64);
        w.var_dw(Opcode::SetV4, 8, 2.5f32.to_bits());
        w.var(Opcode::Ldv, 8);
        w.simple(Opcode::IncF);
        w.var_qw(Opcode::SetV8, 10, 9.25f64.to_bits());
        w.var(Opcode::Ldv, 10);
        w.simple(Opcode::DecD);
        w.var(Opcode::CpyVtoR8, 10);
    });
    check("inc_dec_frame", 4, |w| {
        w.var_dw(Opcode::SetV4, 1, 7);
        w.var(Opcode::IncVi, 1);
        w.var(Opcode::IncVi, 1);
        w.var(Opcode::DecVi, 1);
    });
}

#[test]
fn object_register_moves() {
    check("obj_reg", 10, |w| {
        w.var_qw(Opcode::SetV8, 4, 0xDEAD_BEEF_0000_0010);
        w.var(Opcode::LoadObj, 4);
        w.var(Opcode::StoreObj, 6);
        w.var_qw(Opcode::SetV8, 8, 0x1234);
        w.var(Opcode::ClrVPtr, 8);
    });
}

#[test]
fn stack_indexed_object_moves() {
    check("get_obj", 8, |w| {
        // Prepare a value below the eventual top, then index to it.
        w.qw(Opcode::PshC8, 77);
        w.qw(Opcode::PshC8, 0xAAAA);
        w.simple(Opcode::PopPtr);
        w.simple(Opcode::PopPtr);
        w.qw(Opcode::PshC8, 2);
        w.var(Opcode::GetObj, 0);
        w.simple(Opcode::PopRPtr);
    });
    check("get_obj_ref", 8, |w| {
        w.var_qw(Opcode::SetV8, 4, 0xABCD_EF01);
        w.qw(Opcode::PshC8, 4);
        w.var(Opcode::GetObjRef, 0);
        w.simple(Opcode::PopRPtr);
    });
    check("get_ref", 8, |w| {
        // GetRef leaves an absolute frame address on the stack; read the
        // slot back through it so the outcome is position-independent.
        w.var_qw(Opcode::SetV8, 4, 0x5151_6262);
        w.qw(Opcode::PshC8, 4);
        w.var(Opcode::GetRef, 0);
        w.simple(Opcode::RdsPtr);
        w.simple(Opcode::PopRPtr);
    });
}

// ---------------------------------------------------------------------------
// globals
// ---------------------------------------------------------------------------

#[test]
fn global_accesses() {
    let g1 = leak_u64(0x0101_0101_0202_0202);
    let g2 = leak_u64(0);
    check("globals", 8, |w| {
        w.ptr(Opcode::Pga, g1);
        w.simple(Opcode::PopRPtr);
        w.ptr_dw(Opcode::SetG4, g2, 0x5555_0001);
        w.var_ptr(Opcode::CpyGtoV4, 1, g2);
        w.var_dw(Opcode::SetV4, 2, 0x6666_0002);
        w.var_ptr(Opcode::CpyVtoG4, 2, g2);
        w.var_ptr(Opcode::LdGRdR4, 3, g2);
        w.ptr(Opcode::PshG4, g2);
        w.simple(Opcode::PshNull);
        w.simple(Opcode::PopPtr);
        w.ptr(Opcode::PshGPtr, g1);
        w.simple(Opcode::PopRPtr);
    });
    // Ldg leaves the global's address in the value register; normalize it
    // by reading through it before returning.
    check("ldg_reads_through", 4, |w| {
        w.ptr(Opcode::Ldg, g1);
        w.var(Opcode::Rdr8, 2);
    });
}

// ---------------------------------------------------------------------------
// null checks (§8 coverage list)
// ---------------------------------------------------------------------------

#[test]
fn null_access_coverage() {
    check_null("null_rds", 4, |w| {
        w.simple(Opcode::PshNull);
        w.simple(Opcode::RdsPtr);
    });
    check_null("null_chkref", 4, |w| {
        w.simple(Opcode::PshNull);
        w.simple(Opcode::ChkRef);
    });
    check_null("null_chkrefs", 6, |w| {
        w.var_qw(Opcode::SetV8, 4, 0);
        w.var(Opcode::Psf, 4);
        w.simple(Opcode::ChkRefS);
    });
    check_null("null_chknullv", 4, |w| {
        w.var_dw(Opcode::SetV4, 1, 0);
        w.var(Opcode::ChkNullV, 1);
    });
    check_null("null_chknulls", 4, |w| {
        w.simple(Opcode::PshNull);
        w.var(Opcode::ChkNullS, 0);
    });
    check_null("null_addsi", 4, |w| {
        w.simple(Opcode::PshNull);
        w.w_dw(Opcode::AddSi, 8, 0);
    });
    check_null("null_copy", 4, |w| {
        w.simple(Opcode::PshNull);
        w.simple(Opcode::PshNull);
        w.dw(Opcode::Copy, 2);
    });
    check_null("null_load_this", 4, |w| {
        // Slot 0 (the "this" qword at the frame base) stays zero.
        w.w_dw(Opcode::LoadThisR, 8, 0);
    });
    check_null("null_load_robj", 6, |w| {
        w.var_qw(Opcode::SetV8, 4, 0);
        w.var_var_dw(Opcode::LoadRObjR, 4, 16, 0);
    });
    check_null("null_setlistsize", 6, |w| {
        w.var_qw(Opcode::SetV8, 4, 0);
        w.var_dw_dw(Opcode::SetListSize, 4, 0, 9);
    });
    check_null("null_pshlistelmnt", 6, |w| {
        w.var_qw(Opcode::SetV8, 4, 0);
        w.var_dw(Opcode::PshListElmnt, 4, 8);
    });
    check_null("null_setlisttype", 6, |w| {
        w.var_qw(Opcode::SetV8, 4, 0);
        w.var_dw_dw(Opcode::SetListType, 4, 4, 0x77);
    });
}

#[test]
fn non_null_checked_paths() {
    let buf = Box::leak(Box::new([0u8; 64])) as *mut [u8; 64] as u64;
    check("list_ops", 6, |w| {
        w.var_qw(Opcode::SetV8, 4, buf);
        w.var_dw_dw(Opcode::SetListSize, 4, 0, 3);
        w.var_dw_dw(Opcode::SetListType, 4, 8, 0x42);
        w.var_dw(Opcode::PshListElmnt, 4, 16);
        w.simple(Opcode::RdsPtr);
        w.simple(Opcode::PopRPtr);
    });
    let this_obj = leak_u64(0x4242_4242_4242_4242);
    check("load_this", 10, |w| {
        // Write the "this" pointer into the frame-base qword through the
        // value register, then offset from it.
        w.var_qw(Opcode::SetV8, 8, this_obj);
        w.var(Opcode::Ldv, 0);
        w.var(Opcode::WrtV8, 8);
        w.w_dw(Opcode::LoadThisR, 4, 0);
        w.var(Opcode::Rdr4, 2);
    });
    check("load_vobj", 8, |w| {
        w.var_dw(Opcode::SetV4, 6, 0x1357_9BDF);
        w.var_var_dw(Opcode::LoadVObjR, 8, 8, 0);
        w.var(Opcode::Rdr4, 2);
        w.var(Opcode::CpyVtoR4, 2);
    });
    let obj = leak_u64(0x0102_0304_0506_0708);
    check("load_robj", 10, |w| {
        w.var_qw(Opcode::SetV8, 4, obj);
        w.var_var_dw(Opcode::LoadRObjR, 4, 0, 0);
        w.var(Opcode::Rdr8, 8);
    });
    check("addsi_offsets_top", 8, |w| {
        w.var_qw(Opcode::SetV8, 4, obj);
        w.var(Opcode::PshVPtr, 4);
        w.w_dw(Opcode::AddSi, 4, 0);
        w.simple(Opcode::PopRPtr);
    });
    check("copy_moves_words", 10, |w| {
        w.var_qw(Opcode::SetV8, 4, 0x1111_2222_3333_4444);
        w.var_qw(Opcode::SetV8, 8, 0);
        w.var(Opcode::Psf, 4); // source (left on the stack)
        w.var(Opcode::Psf, 8); // destination (popped)
        w.dw(Opcode::Copy, 2);
        w.simple(Opcode::PopPtr);
    });
}

// ---------------------------------------------------------------------------
// bridge behavior
// ---------------------------------------------------------------------------

#[test]
fn jit_entry_patch_roundtrip() {
    init_logs();
    let mut module = module_with("patching", 6, |w| {
        w.var_dw(Opcode::SetV4, 1, 2);
        w.var_dw(Opcode::SetV4, 2, 3);
        w.var3(Opcode::AddI, 1, 1, 2);
        w.var(Opcode::CpyVtoR4, 1);
    });
    assert_eq!(module.function(0).jit_entry_arg(0), Some(0));
    let jit = JitCompiler::new(JitConfig::default());
    jit.compile(module.function_mut(0)).unwrap();
    let patched = module.function(0).jit_entry_arg(0).unwrap();
    assert!(patched > 0);
    let compiled = module.function(0).jit().unwrap();
    assert!(compiled.header_size() > 0);
    assert!((compiled.header_size() + patched as usize) < compiled.code_size());
    // Entering through the patched offset must execute the body.
    let r = Executor::new(&module).run(0).unwrap();
    assert_eq!(r.value_register as u32, 5);
}

#[test]
fn host_call_yields_and_resumes() {
    init_logs();
    let calls = Arc::new(AtomicU32::new(0));
    let seen_value = Arc::new(AtomicU64::new(0));

    let mut w = BytecodeWriter::new();
    w.jit_entry();
    w.var_dw(Opcode::SetV4, 1, 40);
    w.var(Opcode::CpyVtoR4, 1);
    w.dw(Opcode::CallSys, 0);
    w.jit_entry();
    // Native execution resumes here after the host call.
    w.var_dw(Opcode::SetV4, 2, 2);
    w.var3(Opcode::AddI, 3, 1, 2);
    w.var(Opcode::CpyVtoR4, 3);
    w.var(Opcode::Ret, 0);

    let mut module = Module::new("host");
    {
        let calls = calls.clone();
        let seen = seen_value.clone();
        module.register_host(
            "print",
            Box::new(move |call| {
                calls.fetch_add(1, Ordering::SeqCst);
                // Mirrors were flushed before the yield: the value the
                // script just produced is visible here.
                seen.store(call.regs.value_register, Ordering::SeqCst);
            }),
        );
    }
    module.add_function(Function::new("main", w.finish(), 6));

    let jit = JitCompiler::new(JitConfig::default());
    jit.compile(module.function_mut(0)).unwrap();
    assert!(module.function(0).jit_entry_arg(0).unwrap() > 0);

    let r = Executor::new(&module).run(0).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(seen_value.load(Ordering::SeqCst), 40);
    assert_eq!(r.value_register as u32, 42);
}

#[test]
fn suspend_is_noop_unless_enabled() {
    init_logs();
    let build = |w: &mut BytecodeWriter| {
        w.var_dw(Opcode::SetV4, 1, 5);
        w.simple(Opcode::Suspend);
        w.jit_entry();
        w.var(Opcode::IncVi, 1);
        w.var(Opcode::CpyVtoR4, 1);
    };

    let mut module = module_with("suspendless", 4, build);
    let jit = JitCompiler::new(JitConfig::default());
    jit.compile(module.function_mut(0)).unwrap();
    let r = Executor::new(&module).run(0).unwrap();
    assert_eq!(r.value_register as u32, 6);

    let mut module = module_with("suspending", 4, build);
    let jit = JitCompiler::new(JitConfig { with_suspend: true });
    jit.compile(module.function_mut(0)).unwrap();
    let r = Executor::new(&module).run(0).unwrap();
    assert_eq!(r.value_register as u32, 6);
}

#[test]
fn skip_set_forces_interpretation() {
    init_logs();
    let mut module = module_with("skippy", 6, |w| {
        w.var_dw(Opcode::SetV4, 1, 30);
        w.var_dw(Opcode::SetV4, 2, 12);
        w.var3(Opcode::AddI, 3, 1, 2);
        w.jit_entry();
        w.var(Opcode::CpyVtoR4, 3);
    });
    let interpreted = Executor::new(&module).run_interpreted(0).unwrap();

    let jit = JitCompiler::new(JitConfig::default());
    // 1-based: instruction 4 is the AddI.
    jit.push_instruction_index_for_skip("skippy", 4);
    jit.compile(module.function_mut(0)).unwrap();
    let compiled = Executor::new(&module).run(0).unwrap();
    assert_eq!(interpreted, compiled);
    assert_eq!(compiled.value_register as u32, 42);
}

#[test]
fn release_returns_code_bytes() {
    init_logs();
    let mut module = module_with("released", 4, |w| {
        w.var_dw(Opcode::SetV4, 1, 1);
    });
    let jit = JitCompiler::new(JitConfig::default());
    jit.compile(module.function_mut(0)).unwrap();
    assert!(jit.code_bytes() > 0);
    jit.release(module.function_mut(0));
    assert_eq!(jit.code_bytes(), 0);
    assert!(module.function(0).jit().is_none());
    // Still runs, interpreted.
    Executor::new(&module).run(0).unwrap();
}

// ---------------------------------------------------------------------------
// end-to-end scenarios (§8)
// ---------------------------------------------------------------------------

#[test]
fn scenario_add_two_locals() {
    // int main() { int a = 2, b = 3; return a + b; }
    let mut module = module_with("main_add", 6, |w| {
        w.var_dw(Opcode::SetV4, 1, 2);
        w.var_dw(Opcode::SetV4, 2, 3);
        w.var3(Opcode::AddI, 1, 1, 2);
        w.var(Opcode::CpyVtoR4, 1);
    });
    assert_equivalent(&mut module);
    let r = Executor::new(&module).run(0).unwrap();
    assert_eq!(r.value_register as u32, 5);
}

#[test]
fn scenario_float_multiply() {
    // float main() { return 3.5f * 2.0f; }
    let mut module = module_with("main_fmul", 6, |w| {
        w.var_dw(Opcode::SetV4, 1, 3.5f32.to_bits());
        w.var_dw(Opcode::SetV4, 2, 2.0f32.to_bits());
        w.var3(Opcode::MulF, 1, 1, 2);
        w.var(Opcode::CpyVtoR4, 1);
    });
    assert_equivalent(&mut module);
    let r = Executor::new(&module).run(0).unwrap();
    assert_eq!(r.value_register as u32, 7.0f32.to_bits());
}

#[test]
fn scenario_modulo() {
    // return 7 % 3;
    let mut module = module_with("main_mod", 6, |w| {
        w.var_dw(Opcode::SetV4, 1, 7);
        w.var_dw(Opcode::SetV4, 2, 3);
        w.var3(Opcode::ModI, 1, 1, 2);
        w.var(Opcode::CpyVtoR4, 1);
    });
    assert_equivalent(&mut module);
    let r = Executor::new(&module).run(0).unwrap();
    assert_eq!(r.value_register as u32, 1);
}

#[test]
fn scenario_null_dereference() {
    check_null("main_null", 4, |w| {
        w.var_qw(Opcode::SetV8, 2, 0);
        w.var(Opcode::PshVPtr, 2);
        w.simple(Opcode::RdsPtr);
    });
}
