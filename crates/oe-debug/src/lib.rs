//! Debugging tools for oxidized-espresso
//!
//! - execution breakpoints with hit counts and labels
//! - a debugger driving pause, resume and single step through the engine's
//!   [`DebugHook`](oe_cpu::DebugHook)
//! - symbol and module tables for snapshots and annotations
//! - a disassembler built on the decoder's descriptors and aliases

pub mod breakpoint;
pub mod debugger;
pub mod disassembler;
pub mod symbols;

pub use breakpoint::{Breakpoint, BreakpointManager};
pub use debugger::{DebugSnapshot, Debugger, PauseReason, PausedCore, ThreadSource, ThreadSummary};
pub use disassembler::{DisassembledInstruction, Disassembler};
pub use symbols::{ModuleInfo, Symbol, SymbolKind, SymbolTable};
