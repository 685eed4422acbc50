//! Code generation
//!
//! Each generator takes a decoded instruction and returns a closure with
//! every operand already extracted: register indices, immediates, masks and
//! branch targets are resolved once at compile time. Instructions without a
//! specialised generator call their interpreter handler; operations with no
//! handler at all have no generator and end the block.

mod branch;
mod condition;
mod integer;
mod loadstore;
mod system;

pub use branch::ends_block;

use super::block::{op, Op, OpExit};
use crate::decoder::{Instruction, OperationId};
use crate::interpreter::{self, Flow, Handler};

/// Placement of the block being compiled, used to resolve local branches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub start: u32,
    pub len: usize,
    /// Whether in-block branch targets become local jumps
    pub local_labels: bool,
}

impl BlockLayout {
    pub fn new(start: u32, len: usize) -> Self {
        Self {
            start,
            len,
            local_labels: true,
        }
    }

    /// A block of one instruction whose branches always leave the block
    pub fn single(address: u32) -> Self {
        Self {
            start: address,
            len: 1,
            local_labels: false,
        }
    }

    /// Instruction index of `target` if it lies inside the block
    pub fn label(&self, target: u32) -> Option<usize> {
        if !self.local_labels || target & 3 != 0 {
            return None;
        }
        let index = target.wrapping_sub(self.start) / 4;
        (target >= self.start && (index as usize) < self.len).then_some(index as usize)
    }
}

/// Whether `id` can be compiled
pub fn has_generator(id: OperationId) -> bool {
    interpreter::handler(id).is_some()
}

/// Compile one instruction at `address`
pub fn emit(id: OperationId, instr: Instruction, address: u32, layout: &BlockLayout) -> Option<Op> {
    integer::emit(id, instr)
        .or_else(|| condition::emit(id, instr))
        .or_else(|| branch::emit(id, instr, address, layout))
        .or_else(|| loadstore::emit(id, instr))
        .or_else(|| system::emit(id, instr))
        .or_else(|| interpreter::handler(id).map(|handler| interpreted(handler, instr)))
}

/// Call an interpreter handler from compiled code
fn interpreted(handler: Handler, instr: Instruction) -> Op {
    op(move |ctx, env| {
        Ok(match handler(ctx, env, instr)? {
            Flow::Continue => OpExit::Next,
            Flow::Yield => OpExit::Yield,
        })
    })
}
