//! Espresso CPU emulation for oxidized-espresso
//!
//! The decoder classifies 32-bit words through a bitfield trie. The
//! execution engine runs guest code against a [`ThreadContext`] with either
//! the interpreter or the closure JIT, or both at once in compliance-check
//! mode.

pub mod context;
pub mod debug;
pub mod decoder;
pub mod engine;
pub mod interpreter;
pub mod jit;
pub mod kernel;
pub mod trace;
pub mod verify;

pub use context::{FloatRegister, ThreadContext, CALLBACK_ADDR};
pub use debug::DebugHook;
pub use decoder::{Decoder, Field, Instruction, OperationDescriptor, OperationId};
pub use engine::{ExecutionEngine, ExitReason};
pub use interpreter::Interpreter;
pub use jit::Jit;
pub use kernel::{KernelCall, KernelCallDispatch, KernelCallOutcome, KernelCallTable, KC_HALT};
pub use trace::{TraceEntry, Tracer};
pub use verify::ComplianceChecker;
