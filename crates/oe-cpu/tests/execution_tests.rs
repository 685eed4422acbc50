//! Interpreter and JIT equivalence over small guest programs

use std::sync::Arc;

use oe_core::config::{CpuBackend, CpuConfig};
use oe_core::error::CpuError;
use oe_cpu::decoder::{Decoder, Field, Instruction, OperationId};
use oe_cpu::{verify, ExecutionEngine, ExitReason, KernelCallTable, ThreadContext, CALLBACK_ADDR};
use oe_memory::{Address, MemoryManager};
use tracing_subscriber::EnvFilter;

/// Route engine logs through the test harness; `RUST_LOG` selects what shows
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine(backend: CpuBackend) -> ExecutionEngine {
    init_logging();
    let config = CpuConfig {
        backend,
        ..CpuConfig::default()
    };
    ExecutionEngine::new(
        &config,
        Arc::new(Decoder::new()),
        MemoryManager::new().unwrap(),
        Arc::new(KernelCallTable::new()),
    )
}

/// Sum 10..=1 with a counted loop, then derive a few flags from the result
fn countdown_program(d: &Decoder) -> Vec<Instruction> {
    vec![
        d.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Simm, 10),
        d.encode(OperationId::Addi).with(Field::Rd, 4),
        // loop:
        d.encode(OperationId::Add).with(Field::Rd, 4).with(Field::Ra, 4).with(Field::Rb, 3),
        d.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Ra, 3).with(Field::Simm, 0xFFFF),
        d.encode(OperationId::Cmpi).with(Field::Ra, 3),
        // bne loop
        d.encode(OperationId::Bc).with(Field::Bo, 4).with(Field::Bi, 2).with(Field::Bd, 0x3FFD),
        d.encode(OperationId::Cmpli).with(Field::CrfD, 1).with(Field::Ra, 4).with(Field::Uimm, 55),
        d.encode(OperationId::AddicRc).with(Field::Rd, 5).with(Field::Ra, 4).with(Field::Simm, (-55i32) as u32),
        d.encode(OperationId::Subf).with(Field::Rd, 6).with(Field::Ra, 3).with(Field::Rb, 4),
        d.encode(OperationId::Kc),
    ]
}

fn run_program(backend: CpuBackend, initial: &ThreadContext) -> ThreadContext {
    let engine = engine(backend);
    let program = countdown_program(engine.decoder());
    for (i, instr) in program.iter().enumerate() {
        engine
            .memory()
            .write_be32(Address(0x1000 + 4 * i as u32), instr.word())
            .unwrap();
    }

    let mut ctx = initial.clone();
    ctx.nia = 0x1000;
    assert_eq!(engine.run(&mut ctx, 0).unwrap(), ExitReason::Returned);
    ctx
}

fn initial_context() -> ThreadContext {
    let mut ctx = ThreadContext::new();
    ctx.gpr[7] = 0xDEAD_BEEF;
    ctx.cr = 0x1234_5678;
    ctx.xer = 0x8000_0000;
    ctx
}

#[test]
fn test_jit_matches_interpreter() {
    let initial = initial_context();
    let interpreted = run_program(CpuBackend::Interpreter, &initial);
    let compiled = run_program(CpuBackend::Jit, &initial);

    assert!(compiled.diff(&interpreted).is_empty(), "{:?}", compiled.diff(&interpreted));
    assert_eq!(interpreted.gpr[3], 0);
    assert_eq!(interpreted.gpr[4], 55);
    assert_eq!(interpreted.gpr[5], 0);
    assert_eq!(interpreted.gpr[6], 55);
    assert_eq!(interpreted.gpr[7], 0xDEAD_BEEF);
    assert!(interpreted.xer_ca());
    // cr1: 55 == 55, SO copied from XER
    assert_eq!(interpreted.cr_field(1), 0b0011);
    // cr0 from addic.: zero result
    assert_eq!(interpreted.cr_field(0), 0b0011);
    assert_eq!(interpreted.nia, CALLBACK_ADDR);
}

#[test]
fn test_compliance_mode_runs_clean() {
    let initial = initial_context();
    let verified = run_program(CpuBackend::JitVerify, &initial);
    let interpreted = run_program(CpuBackend::Interpreter, &initial);
    assert!(verified.diff(&interpreted).is_empty());
}

#[test]
fn test_compliance_mismatch_lists_fields() {
    let interpreted = run_program(CpuBackend::Interpreter, &initial_context());
    let mut diverged = interpreted.clone();
    diverged.gpr[6] = 54;
    diverged.set_xer_ca(false);

    let err = verify::compare(0x1020, 0x7CC3_2050, &interpreted, &diverged).unwrap_err();
    match err {
        CpuError::ComplianceMismatch { address, diff, .. } => {
            assert_eq!(address, 0x1020);
            assert_eq!(diff.lines().count(), 2, "{}", diff);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_jit_cache_reuses_blocks() {
    let engine = engine(CpuBackend::Jit);
    let program = countdown_program(engine.decoder());
    for (i, instr) in program.iter().enumerate() {
        engine
            .memory()
            .write_be32(Address(4 * i as u32), instr.word())
            .unwrap();
    }

    for _ in 0..3 {
        let mut ctx = ThreadContext::new();
        ctx.nia = 0;
        engine.run(&mut ctx, 0).unwrap();
        assert_eq!(ctx.gpr[4], 55);
    }
    let stats = engine.jit().cache().stats();
    assert_eq!(stats.compiled, 1);
    assert_eq!(stats.hits, 2);

    engine.jit().cache().clear();
    assert!(engine.jit().cache().is_empty());
}
