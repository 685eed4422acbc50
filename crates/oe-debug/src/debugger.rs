//! Pause, resume and single-step control over the virtual cores
//!
//! The execution engine calls [`DebugHook::maybe_break`] before every
//! instruction while the debugger is active. A core that hits a breakpoint
//! pauses every other core at its next instruction and parks itself on a
//! condition variable until [`Debugger::resume_all`] or
//! [`Debugger::step_core`] releases it.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use oe_cpu::{DebugHook, ThreadContext};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info};

use crate::breakpoint::{Breakpoint, BreakpointManager};
use crate::symbols::{ModuleInfo, Symbol, SymbolTable};

/// One guest thread as seen by the debugger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    pub id: u32,
    pub name: String,
    pub state: String,
    pub priority: u32,
    pub core: Option<usize>,
    /// Resume address, unknown while running
    pub nia: Option<u32>,
}

/// Source of the live guest thread list
pub trait ThreadSource: Send + Sync {
    fn threads(&self) -> Vec<ThreadSummary>;
}

/// Why a core stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Breakpoint(u32),
    /// Pause requested by [`Debugger::pause_all`] or another core's breakpoint
    Requested,
    Step,
}

/// A core parked inside `maybe_break`
#[derive(Clone)]
pub struct PausedCore {
    pub core: usize,
    pub thread: u32,
    pub cia: u32,
    pub reason: PauseReason,
    /// Register file at the moment the core stopped
    pub registers: Box<ThreadContext>,
}

/// Live state returned by [`Debugger::snapshot`]
pub struct DebugSnapshot {
    pub paused: Vec<PausedCore>,
    pub threads: Vec<ThreadSummary>,
    pub modules: Vec<ModuleInfo>,
    pub symbols: Vec<Symbol>,
}

#[derive(Default)]
struct PauseState {
    pause_requested: bool,
    paused: BTreeMap<usize, PausedCore>,
    /// Cores allowed to execute one instruction
    step_grants: HashSet<usize>,
    /// Cores that must stop again at their next instruction
    stepping: HashSet<usize>,
    /// Bumped by every resume so parked cores notice it
    resume_epoch: u64,
}

pub struct Debugger {
    breakpoints: Mutex<BreakpointManager>,
    state: Mutex<PauseState>,
    changed: Condvar,
    active: AtomicBool,
    symbols: Arc<RwLock<SymbolTable>>,
    modules: RwLock<Vec<ModuleInfo>>,
    threads: RwLock<Option<Arc<dyn ThreadSource>>>,
    break_on_exit: bool,
}

impl Debugger {
    pub fn new() -> Self {
        Self {
            breakpoints: Mutex::new(BreakpointManager::new()),
            state: Mutex::new(PauseState::default()),
            changed: Condvar::new(),
            active: AtomicBool::new(false),
            symbols: Arc::new(RwLock::new(SymbolTable::new())),
            modules: RwLock::new(Vec::new()),
            threads: RwLock::new(None),
            break_on_exit: false,
        }
    }

    /// Pause every core when a guest thread returns through the sentinel
    pub fn with_break_on_exit(mut self, enabled: bool) -> Self {
        self.break_on_exit = enabled;
        self
    }

    pub fn set_thread_source(&self, source: Arc<dyn ThreadSource>) {
        *self.threads.write() = Some(source);
    }

    /// Shared symbol table, also used by the disassembler
    pub fn symbols(&self) -> &Arc<RwLock<SymbolTable>> {
        &self.symbols
    }

    pub fn add_module(&self, module: ModuleInfo) {
        info!(target: "debugger", "Module {}", module);
        self.modules.write().push(module);
    }

    pub fn add_breakpoint(&self, address: u32) -> u32 {
        let id = self.breakpoints.lock().add(address);
        self.refresh_active(&self.state.lock());
        id
    }

    /// Remove the breakpoint at `address`, true if one existed
    pub fn remove_breakpoint(&self, address: u32) -> bool {
        let removed = self.breakpoints.lock().remove_at(address).is_some();
        self.refresh_active(&self.state.lock());
        removed
    }

    pub fn set_breakpoint_enabled(&self, id: u32, enabled: bool) -> bool {
        let found = {
            let mut breakpoints = self.breakpoints.lock();
            if enabled {
                breakpoints.enable(id)
            } else {
                breakpoints.disable(id)
            }
        };
        self.refresh_active(&self.state.lock());
        found
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.lock().all().into_iter().cloned().collect()
    }

    /// Stop every core at its next instruction
    pub fn pause_all(&self) {
        let mut state = self.state.lock();
        state.pause_requested = true;
        self.refresh_active(&state);
        debug!(target: "debugger", "Pause requested");
    }

    /// Release every parked core
    pub fn resume_all(&self) {
        let mut state = self.state.lock();
        state.pause_requested = false;
        state.stepping.clear();
        state.step_grants.clear();
        state.resume_epoch += 1;
        self.refresh_active(&state);
        debug!(target: "debugger", "Resuming {} paused cores", state.paused.len());
        self.changed.notify_all();
    }

    /// Let a paused core execute one instruction, false if it is not paused
    pub fn step_core(&self, core: usize) -> bool {
        let mut state = self.state.lock();
        if !state.paused.contains_key(&core) {
            return false;
        }
        state.step_grants.insert(core);
        self.changed.notify_all();
        true
    }

    /// Whether a pause is requested or any core is parked
    pub fn is_paused(&self) -> bool {
        let state = self.state.lock();
        state.pause_requested || !state.paused.is_empty()
    }

    pub fn paused_cores(&self) -> Vec<usize> {
        self.state.lock().paused.keys().copied().collect()
    }

    /// Wait until `core` is parked, false on timeout
    pub fn wait_for_pause(&self, core: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.paused.contains_key(&core) {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.paused.contains_key(&core);
            }
        }
        true
    }

    pub fn snapshot(&self) -> DebugSnapshot {
        let paused = self.state.lock().paused.values().cloned().collect();
        let threads = self
            .threads
            .read()
            .as_ref()
            .map(|source| source.threads())
            .unwrap_or_default();
        DebugSnapshot {
            paused,
            threads,
            modules: self.modules.read().clone(),
            symbols: self.symbols.read().iter().cloned().collect(),
        }
    }

    fn refresh_active(&self, state: &PauseState) {
        let active = state.pause_requested
            || !state.stepping.is_empty()
            || !state.paused.is_empty()
            || self.breakpoints.lock().any_enabled();
        self.active.store(active, Ordering::Release);
    }

    /// Park the calling core until it is resumed or granted a step
    fn park(&self, ctx: &ThreadContext, reason: PauseReason) {
        let core = ctx.core_id;
        let mut state = self.state.lock();
        if matches!(reason, PauseReason::Breakpoint(_)) {
            state.pause_requested = true;
        }
        state.paused.insert(
            core,
            PausedCore {
                core,
                thread: ctx.thread_id,
                cia: ctx.cia,
                reason,
                registers: Box::new(ctx.clone()),
            },
        );
        self.refresh_active(&state);
        info!(
            target: "debugger",
            "Core {} paused at 0x{:08X} in thread {} ({:?})", core, ctx.cia, ctx.thread_id, reason
        );
        self.changed.notify_all();

        let epoch = state.resume_epoch;
        loop {
            if state.resume_epoch != epoch {
                break;
            }
            if state.step_grants.remove(&core) {
                state.stepping.insert(core);
                break;
            }
            self.changed.wait(&mut state);
        }
        state.paused.remove(&core);
        self.refresh_active(&state);
        self.changed.notify_all();
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugHook for Debugger {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn maybe_break(&self, ctx: &ThreadContext) {
        let reason = {
            let mut state = self.state.lock();
            if state.stepping.remove(&ctx.core_id) {
                Some(PauseReason::Step)
            } else if state.pause_requested {
                Some(PauseReason::Requested)
            } else {
                None
            }
        };
        let reason = reason.or_else(|| {
            self.breakpoints
                .lock()
                .check(ctx.cia)
                .map(|bp| PauseReason::Breakpoint(bp.address))
        });
        if let Some(reason) = reason {
            self.park(ctx, reason);
        }
    }

    fn on_exit(&self, ctx: &ThreadContext) {
        debug!(
            target: "debugger",
            "Thread {} returned r3 = 0x{:08X} on core {}", ctx.thread_id, ctx.gpr[3], ctx.core_id
        );
        if self.break_on_exit {
            self.pause_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn context(core: usize, cia: u32) -> ThreadContext {
        ThreadContext {
            core_id: core,
            thread_id: 7,
            cia,
            nia: cia,
            ..ThreadContext::default()
        }
    }

    #[test]
    fn test_inactive_without_breakpoints() {
        let debugger = Debugger::new();
        assert!(!debugger.is_active());
        debugger.add_breakpoint(0x100);
        assert!(debugger.is_active());
        assert!(debugger.remove_breakpoint(0x100));
        assert!(!debugger.is_active());
    }

    #[test]
    fn test_no_break_elsewhere() {
        let debugger = Debugger::new();
        debugger.add_breakpoint(0x100);
        debugger.maybe_break(&context(0, 0x104));
        assert!(!debugger.is_paused());
    }

    #[test]
    fn test_breakpoint_parks_until_resume() {
        let debugger = Arc::new(Debugger::new());
        debugger.add_breakpoint(0x100);

        let core = {
            let debugger = debugger.clone();
            thread::spawn(move || debugger.maybe_break(&context(1, 0x100)))
        };
        assert!(debugger.wait_for_pause(1, Duration::from_secs(5)));
        assert!(debugger.is_paused());

        let snapshot = debugger.snapshot();
        assert_eq!(snapshot.paused.len(), 1);
        assert_eq!(snapshot.paused[0].cia, 0x100);
        assert_eq!(snapshot.paused[0].thread, 7);
        assert_eq!(snapshot.paused[0].reason, PauseReason::Breakpoint(0x100));

        debugger.resume_all();
        core.join().unwrap();
        assert!(!debugger.is_paused());
        assert_eq!(debugger.breakpoints()[0].hit_count, 1);
    }

    #[test]
    fn test_step_stops_at_next_instruction() {
        let debugger = Arc::new(Debugger::new());
        debugger.pause_all();

        let core = {
            let debugger = debugger.clone();
            thread::spawn(move || {
                debugger.maybe_break(&context(0, 0x200));
                debugger.maybe_break(&context(0, 0x204));
            })
        };
        assert!(debugger.wait_for_pause(0, Duration::from_secs(5)));
        assert!(debugger.step_core(0));

        // The core comes back paused one instruction later
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let paused = debugger.snapshot().paused;
            if paused.first().map(|p| p.cia) == Some(0x204) {
                assert_eq!(paused[0].reason, PauseReason::Step);
                break;
            }
            assert!(Instant::now() < deadline, "core never stepped");
            thread::sleep(Duration::from_millis(1));
        }

        debugger.resume_all();
        core.join().unwrap();
    }

    #[test]
    fn test_step_unpaused_core_refused() {
        let debugger = Debugger::new();
        assert!(!debugger.step_core(2));
    }

    struct FixedThreads;

    impl ThreadSource for FixedThreads {
        fn threads(&self) -> Vec<ThreadSummary> {
            vec![ThreadSummary {
                id: 1,
                name: "main".to_string(),
                state: "Running".to_string(),
                priority: 16,
                core: Some(1),
                nia: None,
            }]
        }
    }

    #[test]
    fn test_snapshot_threads_modules_symbols() {
        let debugger = Debugger::new();
        debugger.set_thread_source(Arc::new(FixedThreads));
        debugger.add_module(ModuleInfo {
            name: "game.bin".to_string(),
            base: 0x0100_0000,
            size: 0x1000,
            entry: 0x0100_0000,
        });
        debugger
            .symbols()
            .write()
            .insert("main", 0x0100_0000, 0x40, crate::symbols::SymbolKind::Function);

        let snapshot = debugger.snapshot();
        assert!(snapshot.paused.is_empty());
        assert_eq!(snapshot.threads[0].name, "main");
        assert_eq!(snapshot.modules[0].name, "game.bin");
        assert_eq!(snapshot.symbols[0].name, "main");
    }
}
