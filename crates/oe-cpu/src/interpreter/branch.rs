//! Branch instructions

use oe_core::error::CpuError;

use super::{ExecEnv, Flow};
use crate::context::ThreadContext;
use crate::decoder::Instruction;

type Result = std::result::Result<Flow, CpuError>;

/// BO bit: do not decrement CTR
pub const BO_NO_CTR: u32 = 0x04;
/// BO bit: branch when CTR == 0 rather than != 0
pub const BO_CTR_ZERO: u32 = 0x02;
/// BO bit: ignore the condition register
pub const BO_NO_COND: u32 = 0x10;
/// BO bit: branch when the condition bit is set
pub const BO_COND_TRUE: u32 = 0x08;

/// Decrement CTR if requested and evaluate the CTR and CR conditions
#[inline]
pub fn branch_taken(ctx: &mut ThreadContext, bo: u32, bi: u32) -> bool {
    if bo & BO_NO_CTR == 0 {
        ctx.ctr = ctx.ctr.wrapping_sub(1);
    }
    let ctr_ok = bo & BO_NO_CTR != 0 || ((ctx.ctr != 0) ^ (bo & BO_CTR_ZERO != 0));
    let cond_ok = bo & BO_NO_COND != 0 || ctx.cr_bit(bi) == (bo & BO_COND_TRUE != 0);
    ctr_ok && cond_ok
}

/// The CR part of the condition only, used by `bcctr`
#[inline]
pub fn condition_ok(ctx: &ThreadContext, bo: u32, bi: u32) -> bool {
    bo & BO_NO_COND != 0 || ctx.cr_bit(bi) == (bo & BO_COND_TRUE != 0)
}

pub fn b(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let target = if instr.aa() {
        instr.li()
    } else {
        ctx.cia.wrapping_add(instr.li())
    };
    if instr.lk() {
        ctx.lr = ctx.cia.wrapping_add(4);
    }
    ctx.nia = target;
    Ok(Flow::Continue)
}

pub fn bc(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    if branch_taken(ctx, instr.bo(), instr.bi()) {
        ctx.nia = if instr.aa() {
            instr.bd()
        } else {
            ctx.cia.wrapping_add(instr.bd())
        };
    }
    if instr.lk() {
        ctx.lr = ctx.cia.wrapping_add(4);
    }
    Ok(Flow::Continue)
}

pub fn bcctr(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    if condition_ok(ctx, instr.bo(), instr.bi()) {
        ctx.nia = ctx.ctr & !3;
    }
    if instr.lk() {
        ctx.lr = ctx.cia.wrapping_add(4);
    }
    Ok(Flow::Continue)
}

pub fn bclr(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    // Target comes from LR before it is overwritten by the link
    let target = ctx.lr & !3;
    if branch_taken(ctx, instr.bo(), instr.bi()) {
        ctx.nia = target;
    }
    if instr.lk() {
        ctx.lr = ctx.cia.wrapping_add(4);
    }
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always() {
        let mut ctx = ThreadContext::new();
        ctx.ctr = 5;
        assert!(branch_taken(&mut ctx, 0x14, 0));
        assert_eq!(ctx.ctr, 5);
    }

    #[test]
    fn test_bdnz_counts_down() {
        let mut ctx = ThreadContext::new();
        ctx.ctr = 2;
        // bdnz
        assert!(branch_taken(&mut ctx, 0x10, 0));
        assert!(!branch_taken(&mut ctx, 0x10, 0));
        assert_eq!(ctx.ctr, 0);
        // bdz wraps CTR to 0xFFFFFFFF and falls through
        assert!(!branch_taken(&mut ctx, 0x12, 0));
        assert_eq!(ctx.ctr, u32::MAX);
    }

    #[test]
    fn test_condition_bit() {
        let mut ctx = ThreadContext::new();
        ctx.set_cr_bit(2, true);
        // beq
        assert!(branch_taken(&mut ctx, 0x0C, 2));
        // bne
        assert!(!branch_taken(&mut ctx, 0x04, 2));
        assert!(condition_ok(&ctx, 0x04, 0));
    }
}
