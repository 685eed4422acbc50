//! Compiled blocks
//!
//! A block is a chain of host closures, one per guest instruction. Each
//! closure reads and writes the thread context directly and reports how
//! control continues; branches inside the block become jumps to a local
//! index instead of leaving the block.

use oe_core::error::CpuError;

use crate::context::ThreadContext;
use crate::decoder::OperationId;
use crate::interpreter::ExecEnv;

/// How control continues after one compiled instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpExit {
    /// Fall through to the next instruction of the block
    Next,
    /// Continue at a local label (instruction index)
    Jump(usize),
    /// Leave the block, NIA holds the resume address
    Exit,
    /// Leave the block and hand control to the scheduler
    Yield,
}

/// Why a block returned to the execution loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockExit {
    /// Control resumes at NIA
    Exit,
    /// A kernel call asked for a reschedule, NIA is already set
    Yield,
}

/// One compiled guest instruction
pub type Op = Box<dyn Fn(&mut ThreadContext, &ExecEnv<'_>) -> Result<OpExit, CpuError> + Send + Sync>;

/// Wrap a closure as a compiled instruction
#[inline]
pub(crate) fn op<F>(f: F) -> Op
where
    F: Fn(&mut ThreadContext, &ExecEnv<'_>) -> Result<OpExit, CpuError> + Send + Sync + 'static,
{
    Box::new(f)
}

/// A compiled basic block starting at a guest address
pub struct CompiledBlock {
    start: u32,
    ops: Vec<Op>,
    ids: Vec<OperationId>,
}

impl CompiledBlock {
    pub(crate) fn new(start: u32, ops: Vec<Op>, ids: Vec<OperationId>) -> Self {
        Self { start, ops, ids }
    }

    /// Guest address of the first instruction
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Guest address just past the last instruction
    pub fn end(&self) -> u32 {
        self.start.wrapping_add(4 * self.ops.len() as u32)
    }

    /// Number of guest instructions
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operations of the block in guest order
    pub fn operations(&self) -> &[OperationId] {
        &self.ids
    }

    /// Run the block until it leaves
    ///
    /// CIA and NIA are kept up to date before every instruction, so an
    /// error leaves CIA at the failing instruction exactly like the
    /// interpreter does. A backward local jump leaves the block early when
    /// the core has a pending interrupt; NIA already holds the jump target.
    pub fn run(&self, ctx: &mut ThreadContext, env: &ExecEnv<'_>) -> Result<BlockExit, CpuError> {
        let mut index = 0;
        while let Some(op) = self.ops.get(index) {
            ctx.cia = self.start.wrapping_add(4 * index as u32);
            ctx.nia = ctx.cia.wrapping_add(4);
            match op(ctx, env)? {
                OpExit::Next => index += 1,
                OpExit::Jump(target) => {
                    // A loop never reaches the engine's block boundary check
                    if target <= index && env.interrupt_pending() {
                        return Ok(BlockExit::Exit);
                    }
                    index = target;
                }
                OpExit::Exit => return Ok(BlockExit::Exit),
                OpExit::Yield => return Ok(BlockExit::Yield),
            }
        }
        Ok(BlockExit::Exit)
    }
}

impl std::fmt::Debug for CompiledBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledBlock")
            .field("start", &format_args!("0x{:08X}", self.start))
            .field("len", &self.ops.len())
            .finish()
    }
}
