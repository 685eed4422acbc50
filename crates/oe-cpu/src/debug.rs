//! Hook between the execution engine and an attached debugger

use crate::context::ThreadContext;

/// Called by the execution engine before every instruction while a debugger
/// is attached
pub trait DebugHook: Send + Sync {
    /// Whether the engine must single-step through the interpreter so that
    /// [`maybe_break`](DebugHook::maybe_break) sees every instruction
    fn is_active(&self) -> bool;

    /// Block the calling core if `ctx.cia` hits a breakpoint or a pause was
    /// requested; returns once execution may continue
    fn maybe_break(&self, ctx: &ThreadContext);

    /// Called when a guest thread reached the callback sentinel
    fn on_exit(&self, _ctx: &ThreadContext) {}
}
