//! Whole-emulator runs over small flat images

use std::time::Duration;

use oe_core::config::{CpuBackend, LogLevel};
use oe_core::Config;
use oe_cpu::decoder::{Decoder, Field, Instruction, OperationId};
use oe_cpu::{ExitReason, ThreadContext, CALLBACK_ADDR};
use oe_integration::{Emulator, EmulatorState};
use oe_kernel::{Affinity, DEFAULT_PRIORITY};
use tracing_subscriber::EnvFilter;

const BASE: u32 = 0x1000;
const TIMEOUT: Duration = Duration::from_secs(10);

/// Route engine logs through the test harness; `RUST_LOG` selects what shows
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(backend: CpuBackend) -> Config {
    init_logging();
    let mut config = Config::default();
    config.cpu.backend = backend;
    config.debug.log_level = LogLevel::Off;
    config
}

fn image(program: &[Instruction]) -> Vec<u8> {
    program.iter().flat_map(|instr| instr.word().to_be_bytes()).collect()
}

/// r5 = 5 + 7, then halt
fn add_program(d: &Decoder) -> Vec<Instruction> {
    vec![
        d.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Simm, 5),
        d.encode(OperationId::Addi).with(Field::Rd, 4).with(Field::Simm, 7),
        d.encode(OperationId::Add).with(Field::Rd, 5).with(Field::Ra, 3).with(Field::Rb, 4),
        d.encode(OperationId::Kc),
    ]
}

/// r3 = (r3 + r4) * 2, returned with blr
fn function_program(d: &Decoder) -> Vec<Instruction> {
    vec![
        d.encode(OperationId::Add).with(Field::Rd, 3).with(Field::Ra, 3).with(Field::Rb, 4),
        d.encode(OperationId::Add).with(Field::Rd, 3).with(Field::Ra, 3).with(Field::Rb, 3),
        d.encode(OperationId::Bclr).with(Field::Bo, 20),
    ]
}

#[test]
fn test_add_program_halts_with_sum() {
    for backend in [CpuBackend::Interpreter, CpuBackend::Jit, CpuBackend::JitVerify] {
        let mut emu = Emulator::new(config(backend)).unwrap();
        let program = add_program(emu.decoder());
        emu.load_image(BASE, &image(&program)).unwrap();

        let mut ctx = ThreadContext::new();
        ctx.nia = BASE;
        assert_eq!(emu.engine().run(&mut ctx, 0).unwrap(), ExitReason::Returned);
        assert_eq!(ctx.gpr[5], 12, "{:?}", backend);
        assert_eq!(ctx.nia, CALLBACK_ADDR);
    }
}

#[test]
fn test_host_call_returns_r3() {
    let mut emu = Emulator::new(config(CpuBackend::Jit)).unwrap();
    let program = function_program(emu.decoder());
    emu.load_image(BASE, &image(&program)).unwrap();

    assert_eq!(emu.call(BASE, &[3, 4]).unwrap(), 14);
    assert_eq!(emu.call(BASE, &[10, 0]).unwrap(), 20);
}

#[test]
fn test_guest_thread_exit_value() {
    let mut emu = Emulator::new(config(CpuBackend::Jit)).unwrap();
    let program = function_program(emu.decoder());
    emu.load_image(BASE, &image(&program)).unwrap();

    let main = emu
        .create_thread(BASE, &[20, 1], DEFAULT_PRIORITY, Affinity::ANY, "main")
        .unwrap();
    emu.start().unwrap();
    assert_eq!(emu.state(), EmulatorState::Running);

    assert_eq!(emu.wait_for_thread(main, TIMEOUT).unwrap(), 42);
    emu.run_until_idle(TIMEOUT).unwrap();
    emu.shutdown();
    assert_eq!(emu.state(), EmulatorState::Stopped);
}

#[test]
fn test_threads_on_every_core() {
    let mut emu = Emulator::new(config(CpuBackend::Interpreter)).unwrap();
    let program = function_program(emu.decoder());
    emu.load_image(BASE, &image(&program)).unwrap();

    let threads: Vec<_> = (0..3u32)
        .map(|core| {
            emu.create_thread(
                BASE,
                &[core, 1],
                DEFAULT_PRIORITY,
                Affinity::core(core as usize),
                &format!("worker{}", core),
            )
            .unwrap()
        })
        .collect();
    emu.start().unwrap();

    for (core, id) in threads.into_iter().enumerate() {
        assert_eq!(emu.wait_for_thread(id, TIMEOUT).unwrap(), (core as i32 + 1) * 2);
    }
    emu.shutdown();
}

#[test]
fn test_breakpoint_snapshot_lists_threads() {
    let mut emu = Emulator::new(config(CpuBackend::Jit)).unwrap();
    let program = function_program(emu.decoder());
    emu.load_image(BASE, &image(&program)).unwrap();
    let debugger = emu.enable_debugger();
    debugger.add_breakpoint(BASE + 4);

    let main = emu
        .create_thread(BASE, &[1, 2], DEFAULT_PRIORITY, Affinity::core(0), "main")
        .unwrap();
    emu.start().unwrap();
    assert!(debugger.wait_for_pause(0, TIMEOUT));

    let snapshot = debugger.snapshot();
    assert_eq!(snapshot.paused[0].cia, BASE + 4);
    assert_eq!(snapshot.paused[0].registers.gpr[3], 3);
    assert!(snapshot.threads.iter().any(|thread| thread.name == "main"));
    assert_eq!(snapshot.modules.len(), 0, "image loaded before the debugger existed");

    debugger.resume_all();
    assert_eq!(emu.wait_for_thread(main, TIMEOUT).unwrap(), 6);
    emu.shutdown();
}

#[test]
fn test_load_file() {
    let mut emu = Emulator::new(config(CpuBackend::Interpreter)).unwrap();
    let program = function_program(emu.decoder());
    let path = std::env::temp_dir().join(format!("oe-image-{}.bin", std::process::id()));
    std::fs::write(&path, image(&program)).unwrap();

    let entry = emu.load_file(&path, 0x4000).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(entry, 0x4000);
    assert_eq!(emu.call(entry, &[2, 2]).unwrap(), 8);
}
