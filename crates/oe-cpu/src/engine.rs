//! Execution engine
//!
//! Owns both backends and drives the fetch/execute loop for one guest thread
//! at a time. The backend is chosen once from the configuration:
//!
//! - `Interpreter` steps every instruction through the handler table.
//! - `Jit` runs compiled blocks from the code cache and interprets whatever
//!   could not be compiled.
//! - `JitVerify` runs every instruction through both and fails on the first
//!   divergence.
//!
//! While a debugger hook is active every backend single-steps through the
//! interpreter so that each CIA reaches [`DebugHook::maybe_break`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use oe_core::config::{CpuBackend, CpuConfig};
use oe_core::error::CpuError;
use oe_core::{cpu_debug, cpu_trace};
use oe_memory::MemoryManager;
use parking_lot::RwLock;
use tracing::error;

use crate::context::{ThreadContext, CALLBACK_ADDR};
use crate::debug::DebugHook;
use crate::decoder::Decoder;
use crate::interpreter::{ExecEnv, Flow, Interpreter};
use crate::jit::{BlockExit, Jit};
use crate::kernel::KernelCallDispatch;
use crate::verify::ComplianceChecker;

/// Trace entries dumped next to the registers on a fatal error
const FATAL_TRACE_ENTRIES: usize = 16;

/// Why [`ExecutionEngine::run`] returned without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// NIA reached the callback sentinel
    Returned,
    /// A kernel call asked to hand control to the scheduler
    Yield,
    /// The host asked the core to stop at the next block boundary
    Interrupted,
}

/// Interpreter, JIT and compliance checker behind one run loop
pub struct ExecutionEngine {
    decoder: Arc<Decoder>,
    interpreter: Interpreter,
    jit: Jit,
    backend: CpuBackend,
    memory: Arc<MemoryManager>,
    kernel: Arc<dyn KernelCallDispatch>,
    debug_hook: RwLock<Option<Arc<dyn DebugHook>>>,
    /// One flag per virtual core, checked between blocks
    interrupts: Vec<AtomicBool>,
}

impl ExecutionEngine {
    pub fn new(
        config: &CpuConfig,
        decoder: Arc<Decoder>,
        memory: Arc<MemoryManager>,
        kernel: Arc<dyn KernelCallDispatch>,
    ) -> Self {
        let interpreter = Interpreter::new(decoder.clone()).with_branch_trace(config.branch_trace);
        let jit = Jit::new(decoder.clone(), config.jit_max_instructions);
        cpu_debug!(
            "Execution engine: {:?} backend, block ceiling {}",
            config.backend,
            jit.max_instructions()
        );
        Self {
            decoder,
            interpreter,
            jit,
            backend: config.backend,
            memory,
            kernel,
            debug_hook: RwLock::new(None),
            interrupts: (0..config.core_count.max(1)).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn decoder(&self) -> &Arc<Decoder> {
        &self.decoder
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn jit(&self) -> &Jit {
        &self.jit
    }

    pub fn backend(&self) -> CpuBackend {
        self.backend
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn set_debug_hook(&self, hook: Option<Arc<dyn DebugHook>>) {
        *self.debug_hook.write() = hook;
    }

    fn active_hook(&self) -> Option<Arc<dyn DebugHook>> {
        self.debug_hook.read().as_ref().filter(|hook| hook.is_active()).cloned()
    }

    /// Ask the guest code running on `core_id` to return to the host
    ///
    /// Takes effect at the next block boundary or backward branch inside a
    /// compiled block, or the next instruction when interpreting.
    pub fn interrupt(&self, core_id: usize) {
        if let Some(flag) = self.interrupts.get(core_id) {
            flag.store(true, Ordering::Release);
        }
    }

    pub fn interrupt_all(&self) {
        for flag in &self.interrupts {
            flag.store(true, Ordering::Release);
        }
    }

    fn take_interrupt(&self, core_id: usize) -> bool {
        self.interrupts
            .get(core_id)
            .is_some_and(|flag| flag.swap(false, Ordering::AcqRel))
    }

    fn env(&self, core_id: usize) -> ExecEnv<'_> {
        ExecEnv {
            memory: &self.memory,
            kernel: self.kernel.as_ref(),
            core_id,
            interrupt: self.interrupts.get(core_id),
        }
    }

    /// Execute exactly one instruction at NIA with the interpreter
    pub fn step(&self, ctx: &mut ThreadContext, core_id: usize) -> Result<Flow, CpuError> {
        ctx.core_id = core_id;
        let env = self.env(core_id);
        if let Some(hook) = self.active_hook() {
            ctx.cia = ctx.nia;
            hook.maybe_break(ctx);
        }
        self.interpreter.step(ctx, &env)
    }

    /// Run until the thread returns through the sentinel or yields
    ///
    /// Fatal errors are logged with the register file and the most recent
    /// trace entries before they are returned.
    pub fn run(&self, ctx: &mut ThreadContext, core_id: usize) -> Result<ExitReason, CpuError> {
        ctx.core_id = core_id;
        let result = self.run_loop(ctx, core_id);
        match &result {
            Ok(ExitReason::Returned) => {
                if let Some(hook) = self.debug_hook.read().as_ref() {
                    hook.on_exit(ctx);
                }
            }
            Ok(_) => {}
            Err(err) => self.report_fatal(ctx, err),
        }
        result
    }

    fn run_loop(&self, ctx: &mut ThreadContext, core_id: usize) -> Result<ExitReason, CpuError> {
        let env = self.env(core_id);
        let checker = ComplianceChecker::new(&self.decoder, &self.interpreter, &self.jit);

        while ctx.nia != CALLBACK_ADDR {
            if self.take_interrupt(core_id) {
                return Ok(ExitReason::Interrupted);
            }

            let flow = if let Some(hook) = self.active_hook() {
                ctx.cia = ctx.nia;
                hook.maybe_break(ctx);
                self.interpreter.step(ctx, &env)?
            } else {
                match self.backend {
                    CpuBackend::Interpreter => self.interpreter.step(ctx, &env)?,
                    CpuBackend::Jit => match self.jit.lookup(ctx.nia, &self.memory) {
                        Some(block) => match block.run(ctx, &env)? {
                            BlockExit::Exit => Flow::Continue,
                            BlockExit::Yield => Flow::Yield,
                        },
                        None => self.interpreter.step(ctx, &env)?,
                    },
                    CpuBackend::JitVerify => checker.step(ctx, &env)?,
                }
            };

            if flow == Flow::Yield {
                return Ok(ExitReason::Yield);
            }
        }
        Ok(ExitReason::Returned)
    }

    fn report_fatal(&self, ctx: &ThreadContext, err: &CpuError) {
        error!(
            target: "cpu",
            "Guest thread {} on core {} stopped: {}\n{}",
            ctx.thread_id, ctx.core_id, err, ctx
        );
        if let Some(tracer) = &ctx.tracer {
            for entry in tracer.lock().last(FATAL_TRACE_ENTRIES) {
                error!(target: "cpu", "  {}", entry);
            }
        }
    }

    /// Call guest code at `address` from the host and return r3
    ///
    /// Arguments go to r3..r10, the rest to the parameter save area above
    /// r1. LR is pointed at the sentinel so that the callee's `blr` ends the
    /// call. NIA and LR are restored afterwards so the call can be nested in
    /// a kernel call handler. Yields inside the callee are ignored.
    pub fn invoke(&self, ctx: &mut ThreadContext, address: u32, args: &[u32]) -> Result<u32, CpuError> {
        let (saved_nia, saved_lr) = (ctx.nia, ctx.lr);

        for (i, &arg) in args.iter().enumerate() {
            if i < 8 {
                ctx.gpr[3 + i] = arg;
            } else {
                let slot = ctx.gpr[1].wrapping_add(8 + 4 * (i as u32 - 8));
                self.memory.write_be32(oe_memory::Address(slot), arg)?;
            }
        }
        ctx.lr = CALLBACK_ADDR;
        ctx.nia = address;
        cpu_trace!("invoke 0x{:08X} with {} args", address, args.len());

        let core_id = ctx.core_id;
        let result = loop {
            match self.run(ctx, core_id) {
                Ok(ExitReason::Returned) => break Ok(ctx.gpr[3]),
                Ok(ExitReason::Yield) => continue,
                Ok(ExitReason::Interrupted) => {
                    // Leave the flag for the caller's own loop
                    self.interrupt(core_id);
                    break Ok(ctx.gpr[3]);
                }
                Err(err) => break Err(err),
            }
        };

        ctx.nia = saved_nia;
        ctx.lr = saved_lr;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{Field, Instruction, OperationId};
    use crate::kernel::{KernelCallOutcome, KernelCallTable};
    use oe_memory::Address;
    use parking_lot::Mutex;

    fn engine(backend: CpuBackend) -> (ExecutionEngine, Arc<KernelCallTable>) {
        let memory = MemoryManager::new().unwrap();
        let kernel = Arc::new(KernelCallTable::new());
        let config = CpuConfig {
            backend,
            ..CpuConfig::default()
        };
        let engine = ExecutionEngine::new(&config, Arc::new(Decoder::new()), memory, kernel.clone());
        (engine, kernel)
    }

    fn load(engine: &ExecutionEngine, base: u32, program: &[Instruction]) {
        for (i, instr) in program.iter().enumerate() {
            engine
                .memory()
                .write_be32(Address(base + 4 * i as u32), instr.word())
                .unwrap();
        }
    }

    fn sum_program(d: &Decoder) -> Vec<Instruction> {
        vec![
            d.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Simm, 5),
            d.encode(OperationId::Addi).with(Field::Rd, 4).with(Field::Simm, 7),
            d.encode(OperationId::Add).with(Field::Rd, 5).with(Field::Ra, 3).with(Field::Rb, 4),
            d.encode(OperationId::Kc),
        ]
    }

    #[test]
    fn test_run_every_backend() {
        for backend in [CpuBackend::Interpreter, CpuBackend::Jit, CpuBackend::JitVerify] {
            let (engine, _) = engine(backend);
            let program = sum_program(engine.decoder());
            load(&engine, 0, &program);

            let mut ctx = ThreadContext::new();
            ctx.nia = 0;
            assert_eq!(engine.run(&mut ctx, 0).unwrap(), ExitReason::Returned);
            assert_eq!(ctx.gpr[5], 12, "{:?}", backend);
            assert_eq!(ctx.nia, CALLBACK_ADDR);
        }
    }

    #[test]
    fn test_yield_stops_after_kernel_call() {
        let (engine, kernel) = engine(CpuBackend::Jit);
        kernel.register(0x40, "yield", |_| Ok(KernelCallOutcome::Yield));
        let d = engine.decoder().clone();
        load(
            &engine,
            0x100,
            &[
                d.encode(OperationId::Kc).with(Field::Kcn, 0x40),
                d.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Simm, 1),
                d.encode(OperationId::Kc),
            ],
        );

        let mut ctx = ThreadContext::new();
        ctx.nia = 0x100;
        assert_eq!(engine.run(&mut ctx, 0).unwrap(), ExitReason::Yield);
        assert_eq!(ctx.nia, 0x104);
        assert_eq!(ctx.gpr[3], 0);
        assert_eq!(engine.run(&mut ctx, 0).unwrap(), ExitReason::Returned);
        assert_eq!(ctx.gpr[3], 1);
    }

    #[test]
    fn test_invoke_restores_caller_state() {
        let (engine, _) = engine(CpuBackend::Interpreter);
        let d = engine.decoder().clone();
        // r3 = r3 + r4 + r12; blr
        load(
            &engine,
            0x200,
            &[
                d.encode(OperationId::Add).with(Field::Rd, 3).with(Field::Ra, 3).with(Field::Rb, 4),
                d.encode(OperationId::Lwz).with(Field::Rd, 12).with(Field::Ra, 1).with(Field::D, 8),
                d.encode(OperationId::Add).with(Field::Rd, 3).with(Field::Ra, 3).with(Field::Rb, 12),
                d.encode(OperationId::Bclr).with(Field::Bo, 20),
            ],
        );

        let mut ctx = ThreadContext::new();
        ctx.gpr[1] = engine.memory().allocate_stack(0x1000).unwrap().get() - 0x100;
        ctx.nia = 0x1234;
        ctx.lr = 0x5678;
        let args = [1, 2, 0, 0, 0, 0, 0, 0, 40];
        assert_eq!(engine.invoke(&mut ctx, 0x200, &args).unwrap(), 43);
        assert_eq!(ctx.nia, 0x1234);
        assert_eq!(ctx.lr, 0x5678);
    }

    #[test]
    fn test_fatal_error_returned() {
        let (engine, _) = engine(CpuBackend::Jit);
        engine.memory().write_be32(Address(0x300), 0x0400_0000).unwrap();
        let mut ctx = ThreadContext::with_tracer(8);
        ctx.nia = 0x300;
        assert_eq!(
            engine.run(&mut ctx, 0),
            Err(CpuError::Decode {
                address: 0x300,
                word: 0x0400_0000
            })
        );
    }

    #[test]
    fn test_interrupt() {
        let (engine, _) = engine(CpuBackend::Interpreter);
        let d = engine.decoder().clone();
        load(&engine, 0x400, &[d.encode(OperationId::B)]);

        let mut ctx = ThreadContext::new();
        ctx.nia = 0x400;
        engine.interrupt(1);
        assert_eq!(engine.run(&mut ctx, 1).unwrap(), ExitReason::Interrupted);
        assert_eq!(ctx.nia, 0x400);
    }

    struct Recorder {
        seen: Mutex<Vec<u32>>,
        exits: Mutex<u32>,
    }

    impl DebugHook for Recorder {
        fn is_active(&self) -> bool {
            true
        }

        fn maybe_break(&self, ctx: &ThreadContext) {
            self.seen.lock().push(ctx.cia);
        }

        fn on_exit(&self, _ctx: &ThreadContext) {
            *self.exits.lock() += 1;
        }
    }

    #[test]
    fn test_debug_hook_sees_every_instruction() {
        let (engine, _) = engine(CpuBackend::Jit);
        let program = sum_program(engine.decoder());
        load(&engine, 0, &program);
        let hook = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            exits: Mutex::new(0),
        });
        engine.set_debug_hook(Some(hook.clone()));

        let mut ctx = ThreadContext::new();
        ctx.nia = 0;
        engine.run(&mut ctx, 0).unwrap();
        assert_eq!(*hook.seen.lock(), vec![0, 4, 8, 12]);
        assert_eq!(*hook.exits.lock(), 1);
        // Nothing was compiled while single-stepping
        assert_eq!(engine.jit().cache().len(), 0);
    }

    #[test]
    fn test_interrupt_reaches_compiled_loop() {
        let (engine, _) = engine(CpuBackend::Jit);
        let d = engine.decoder().clone();
        // b .
        load(&engine, 0x500, &[d.encode(OperationId::B)]);

        std::thread::scope(|scope| {
            let runner = scope.spawn(|| {
                let mut ctx = ThreadContext::new();
                ctx.nia = 0x500;
                let result = engine.run(&mut ctx, 0);
                (result, ctx.nia)
            });
            std::thread::sleep(std::time::Duration::from_millis(50));
            engine.interrupt(0);
            let (result, nia) = runner.join().unwrap();
            assert_eq!(result, Ok(ExitReason::Interrupted));
            assert_eq!(nia, 0x500);
        });
        assert!(engine.jit().cache().stats().compiled >= 1);
    }
}
