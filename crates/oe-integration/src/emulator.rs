//! Main emulator structure
//!
//! Subsystems are created in a fixed order, each depending only on the ones
//! before it:
//!
//! 1. logging
//! 2. guest memory
//! 3. decoder
//! 4. execution engine (interpreter, JIT, compliance checker) with an empty
//!    kernel-call table
//! 5. scheduler kernel calls registered into that table
//! 6. scheduler and its alarm thread
//! 7. debugger, when configured

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use oe_core::error::EmulatorError;
use oe_core::{logging, Config, Result};
use oe_cpu::{DebugHook, Decoder, ExecutionEngine, KernelCallTable, ThreadContext};
use oe_debug::{Debugger, ModuleInfo, SymbolKind};
use oe_kernel::{register_kernel_calls, Affinity, Scheduler, ThreadId, ThreadParams, TrampolineAllocator, VirtualCores};
use oe_memory::MemoryManager;
use tracing::{info, warn};

use crate::loader::FlatImage;
use crate::threads::SchedulerThreads;

/// Emulator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    Stopped,
    Running,
    /// Every core is held by the debugger
    Paused,
}

pub struct Emulator {
    state: EmulatorState,
    config: Config,
    memory: Arc<MemoryManager>,
    decoder: Arc<Decoder>,
    kernel_calls: Arc<KernelCallTable>,
    engine: Arc<ExecutionEngine>,
    scheduler: Arc<Scheduler>,
    trampolines: TrampolineAllocator,
    debugger: Option<Arc<Debugger>>,
    cores: Option<VirtualCores>,
}

impl Emulator {
    pub fn new(config: Config) -> Result<Self> {
        logging::init(&config);

        let memory = MemoryManager::with_config(&config.memory)?;
        let decoder = Arc::new(Decoder::new());

        let kernel_calls = Arc::new(KernelCallTable::new());
        let engine = Arc::new(ExecutionEngine::new(
            &config.cpu,
            decoder.clone(),
            memory.clone(),
            kernel_calls.clone(),
        ));

        let scheduler = Scheduler::new(engine.clone(), &config)?;
        register_kernel_calls(&kernel_calls, &scheduler);
        let trampolines = TrampolineAllocator::new(memory.clone(), decoder.clone(), kernel_calls.clone());

        let mut emulator = Self {
            state: EmulatorState::Stopped,
            config,
            memory,
            decoder,
            kernel_calls,
            engine,
            scheduler,
            trampolines,
            debugger: None,
            cores: None,
        };
        let debug = &emulator.config.debug;
        if debug.break_on_entry || debug.break_on_exit || emulator.config.general.start_paused {
            emulator.enable_debugger();
        }

        info!(
            "Emulator initialized: {:?} backend, {} cores",
            emulator.config.cpu.backend,
            emulator.scheduler.core_count()
        );
        Ok(emulator)
    }

    /// Install the debugger hook, returning the existing one if present
    pub fn enable_debugger(&mut self) -> Arc<Debugger> {
        if let Some(debugger) = &self.debugger {
            return debugger.clone();
        }
        let debugger = Arc::new(Debugger::new().with_break_on_exit(self.config.debug.break_on_exit));
        debugger.set_thread_source(Arc::new(SchedulerThreads::new(self.scheduler.clone())));
        for (address, name) in self.trampolines.symbols() {
            debugger
                .symbols()
                .write()
                .insert(name, address.get(), 0, SymbolKind::Trampoline);
        }
        self.engine.set_debug_hook(Some(debugger.clone() as Arc<dyn DebugHook>));
        self.debugger = Some(debugger.clone());
        debugger
    }

    /// Copy flat big-endian code to `address`
    pub fn load_image(&mut self, address: u32, bytes: &[u8]) -> Result<()> {
        self.load(FlatImage::new("image", address, bytes.to_vec()))
    }

    /// Load an image file at `base`, returning its entry point
    pub fn load_file(&mut self, path: &Path, base: u32) -> Result<u32> {
        let image = FlatImage::from_file(path, base)?;
        let entry = image.entry;
        self.load(image)?;
        Ok(entry)
    }

    pub fn load(&mut self, image: FlatImage) -> Result<()> {
        image.load(&self.memory)?;
        // Blocks compiled from the previous contents are stale
        self.engine.jit().cache().clear();
        if let Some(debugger) = &self.debugger {
            debugger.add_module(ModuleInfo {
                name: image.name.clone(),
                base: image.base,
                size: image.size(),
                entry: image.entry,
            });
            debugger
                .symbols()
                .write()
                .insert(format!("{}_entry", image.name), image.entry, 0, SymbolKind::Function);
        }
        Ok(())
    }

    /// Create a runnable guest thread
    pub fn create_thread(
        &mut self,
        entry: u32,
        args: &[u32],
        priority: u32,
        affinity: Affinity,
        name: &str,
    ) -> Result<ThreadId> {
        if self.config.debug.break_on_entry {
            if let Some(debugger) = &self.debugger {
                debugger.add_breakpoint(entry);
            }
        }
        let params = ThreadParams::new(name, entry)
            .args(args)
            .priority(priority)
            .affinity(affinity)
            .stack_size(self.config.memory.stack_size);
        Ok(self.scheduler.spawn_thread(params)?)
    }

    /// Start the virtual cores
    pub fn start(&mut self) -> Result<()> {
        if self.cores.is_some() {
            return Ok(());
        }
        if self.config.general.start_paused {
            if let Some(debugger) = &self.debugger {
                debugger.pause_all();
            }
        }
        self.cores = Some(VirtualCores::start(self.scheduler.clone())?);
        self.state = if self.config.general.start_paused {
            EmulatorState::Paused
        } else {
            EmulatorState::Running
        };
        info!("Emulator started");
        Ok(())
    }

    /// Hold every core at its next instruction
    pub fn pause(&mut self) {
        if self.state == EmulatorState::Running {
            self.enable_debugger().pause_all();
            self.state = EmulatorState::Paused;
            info!("Emulator paused");
        }
    }

    pub fn resume(&mut self) {
        if self.state == EmulatorState::Paused {
            if let Some(debugger) = &self.debugger {
                debugger.resume_all();
            }
            self.state = EmulatorState::Running;
            info!("Emulator resumed");
        }
    }

    /// Wait until no guest thread is runnable
    pub fn run_until_idle(&self, timeout: Duration) -> Result<()> {
        if self.cores.is_none() {
            return Err(EmulatorError::NotRunning);
        }
        if self.scheduler.wait_idle(timeout) {
            Ok(())
        } else {
            Err(EmulatorError::Timeout)
        }
    }

    /// Wait for a guest thread to exit and return its exit value
    pub fn wait_for_thread(&self, id: ThreadId, timeout: Duration) -> Result<i32> {
        if self.cores.is_none() {
            return Err(EmulatorError::NotRunning);
        }
        self.scheduler.wait_for_exit(id, timeout).ok_or(EmulatorError::Timeout)
    }

    /// Call guest code on the calling host thread and return r3
    ///
    /// The call gets its own stack and runs outside the scheduler, so it must
    /// not block on scheduler objects.
    pub fn call(&self, entry: u32, args: &[u32]) -> Result<u32> {
        let stack_top = self.memory.allocate_stack(self.config.memory.stack_size)?;
        let mut ctx = ThreadContext::with_tracer(self.config.cpu.trace_buffer_size);
        ctx.gpr[1] = (stack_top.get() - 16) & !0xF;
        Ok(self.engine.invoke(&mut ctx, entry, args)?)
    }

    /// Stop the cores and the alarm thread
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
        // Parked cores must run to their next check to see the shutdown
        if let Some(debugger) = &self.debugger {
            debugger.resume_all();
        }
        if let Some(mut cores) = self.cores.take() {
            cores.shutdown();
        }
        if self.state != EmulatorState::Stopped {
            self.state = EmulatorState::Stopped;
            info!("Emulator stopped");
        }
    }

    pub fn state(&self) -> EmulatorState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn decoder(&self) -> &Arc<Decoder> {
        &self.decoder
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn kernel_calls(&self) -> &Arc<KernelCallTable> {
        &self.kernel_calls
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn trampolines(&self) -> &TrampolineAllocator {
        &self.trampolines
    }

    pub fn debugger(&self) -> Option<&Arc<Debugger>> {
        self.debugger.as_ref()
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        if self.cores.is_some() {
            warn!("Emulator dropped while running");
        }
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oe_core::config::LogLevel;

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.debug.log_level = LogLevel::Off;
        config
    }

    #[test]
    fn test_emulator_creation() {
        let emu = Emulator::new(quiet_config()).unwrap();
        assert_eq!(emu.state(), EmulatorState::Stopped);
        assert!(emu.debugger().is_none());
        assert!(emu.kernel_calls().contains(oe_kernel::calls::YIELD));
    }

    #[test]
    fn test_emulator_state_transitions() {
        let mut emu = Emulator::new(quiet_config()).unwrap();

        emu.start().unwrap();
        assert_eq!(emu.state(), EmulatorState::Running);

        emu.pause();
        assert_eq!(emu.state(), EmulatorState::Paused);
        assert!(emu.debugger().is_some());

        emu.resume();
        assert_eq!(emu.state(), EmulatorState::Running);

        emu.shutdown();
        assert_eq!(emu.state(), EmulatorState::Stopped);
    }

    #[test]
    fn test_run_until_idle_requires_start() {
        let emu = Emulator::new(quiet_config()).unwrap();
        assert!(matches!(
            emu.run_until_idle(Duration::from_millis(10)),
            Err(EmulatorError::NotRunning)
        ));
    }

    #[test]
    fn test_debugger_from_config() {
        let mut config = quiet_config();
        config.debug.break_on_entry = true;
        let emu = Emulator::new(config).unwrap();
        assert!(emu.debugger().is_some());
    }
}
