//! Cross-target emission checks.
//!
//! Translation is a pure byte producer, so both backends are exercised on
//! every host; only execution needs the matching ISA.

use brio_engine::vm::{BytecodeWriter, Function, Opcode};
use brio_engine::{JitCompiler, JitConfig, Target};

fn sample_function() -> Function {
    let mut w = BytecodeWriter::new();
    w.jit_entry();
    w.var_dw(Opcode::SetV4, 1, 10);
    w.var_dw(Opcode::SetV4, 2, 3);
    let done = w.new_target();
    let top = w.new_target();
    w.bind(top);
    w.var_dw(Opcode::CmpIi, 1, 0);
    w.branch(Opcode::Jz, done);
    w.var(Opcode::DecVi, 1);
    w.var3(Opcode::AddF, 3, 4, 5);
    w.var_var_dw(Opcode::AddIf, 4, 4, 1.5f32.to_bits());
    w.branch(Opcode::Jmp, top);
    w.bind(done);
    w.var3(Opcode::ModD, 6, 8, 10);
    w.var(Opcode::CpyVtoR4, 1);
    w.var(Opcode::Ret, 0);
    Function::new("sample", w.finish(), 12)
}

#[test]
fn both_backends_translate_the_same_stream() {
    let jit = JitCompiler::new(JitConfig::default());

    let mut f = sample_function();
    let (x64_bytes, x64_header) = jit.translate_to_bytes(&mut f, Target::X86_64).unwrap();
    assert!(x64_header > 0);
    assert!(x64_bytes.len() > x64_header);
    let x64_entry = f.jit_entry_arg(0).unwrap();
    assert!(x64_entry > 0);
    assert!(x64_header + x64_entry as usize <= x64_bytes.len());

    let mut f = sample_function();
    let (a64_bytes, a64_header) = jit.translate_to_bytes(&mut f, Target::AArch64).unwrap();
    assert!(a64_header > 0);
    // AArch64 code is a whole number of words and so are its entries.
    assert_eq!(a64_bytes.len() % 4, 0);
    let a64_entry = f.jit_entry_arg(0).unwrap();
    assert!(a64_entry > 0);
    assert_eq!(a64_entry % 4, 0);
    assert!(a64_header + a64_entry as usize <= a64_bytes.len());
}

#[test]
fn suspend_changes_emission_only_when_enabled() {
    let mut w = BytecodeWriter::new();
    w.jit_entry();
    w.simple(Opcode::Suspend);
    w.var(Opcode::Ret, 0);
    let code = w.finish();

    for target in [Target::X86_64, Target::AArch64] {
        let quiet = {
            let jit = JitCompiler::new(JitConfig::default());
            let mut f = Function::new("s", code.clone(), 4);
            jit.translate_to_bytes(&mut f, target).unwrap().0
        };
        let suspending = {
            let jit = JitCompiler::new(JitConfig { with_suspend: true });
            let mut f = Function::new("s", code.clone(), 4);
            jit.translate_to_bytes(&mut f, target).unwrap().0
        };
        assert!(suspending.len() > quiet.len());
    }
}

#[test]
fn skip_set_reaches_both_backends() {
    for target in [Target::X86_64, Target::AArch64] {
        let jit = JitCompiler::new(JitConfig::default());
        jit.push_instruction_index_for_skip("skippable", 2);

        let mut w = BytecodeWriter::new();
        w.jit_entry();
        w.var_dw(Opcode::SetV4, 1, 1);
        w.var(Opcode::Ret, 0);
        let mut f = Function::new("skippable", w.finish(), 4);
        let (skipped, _) = jit.translate_to_bytes(&mut f, target).unwrap();

        let mut w = BytecodeWriter::new();
        w.jit_entry();
        w.var_dw(Opcode::SetV4, 1, 1);
        w.var(Opcode::Ret, 0);
        let mut f = Function::new("plain", w.finish(), 4);
        let (plain, _) = jit.translate_to_bytes(&mut f, target).unwrap();

        // The forced yield is longer than the SetV4 it replaces.
        assert!(skipped.len() > plain.len());
    }
}
