//! Kernel calls, special registers, cache and synchronization instructions

use oe_core::error::CpuError;
use oe_memory::Address;

use super::{ExecEnv, Flow};
use crate::context::{spr, ThreadContext};
use crate::decoder::Instruction;
use crate::kernel::{KernelCall, KernelCallOutcome};

type Result = std::result::Result<Flow, CpuError>;

/// Size of a data cache block
pub const CACHE_BLOCK_SIZE: u32 = 32;

pub fn kc(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    let id = instr.kcn();
    let mut call = KernelCall {
        ctx,
        memory: env.memory,
        core_id: env.core_id,
    };
    Ok(match env.kernel.dispatch(id, &mut call)? {
        KernelCallOutcome::Continue => Flow::Continue,
        KernelCallOutcome::Yield => Flow::Yield,
    })
}

fn unknown_spr(ctx: &ThreadContext, instr: Instruction, name: &'static str) -> CpuError {
    CpuError::Unimplemented {
        address: ctx.cia,
        word: instr.word(),
        name,
    }
}

pub fn mfspr(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let value = ctx
        .spr(instr.spr())
        .ok_or_else(|| unknown_spr(ctx, instr, "mfspr"))?;
    ctx.gpr[instr.rd()] = value;
    Ok(Flow::Continue)
}

pub fn mtspr(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let value = ctx.gpr[instr.rs()];
    if !ctx.set_spr(instr.spr(), value) {
        return Err(unknown_spr(ctx, instr, "mtspr"));
    }
    Ok(Flow::Continue)
}

pub fn mftb(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let value = match instr.tbr() {
        spr::TBL => ctx.tb as u32,
        spr::TBU => (ctx.tb >> 32) as u32,
        _ => return Err(unknown_spr(ctx, instr, "mftb")),
    };
    ctx.gpr[instr.rd()] = value;
    Ok(Flow::Continue)
}

pub fn mfmsr(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.gpr[instr.rd()] = ctx.msr;
    Ok(Flow::Continue)
}

pub fn mtmsr(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.msr = ctx.gpr[instr.rs()];
    Ok(Flow::Continue)
}

pub fn mfsr(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.gpr[instr.rd()] = ctx.sr[instr.sr()];
    Ok(Flow::Continue)
}

pub fn mfsrin(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let index = (ctx.gpr[instr.rb()] >> 28) as usize;
    ctx.gpr[instr.rd()] = ctx.sr[index];
    Ok(Flow::Continue)
}

pub fn mtsr(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.sr[instr.sr()] = ctx.gpr[instr.rs()];
    Ok(Flow::Continue)
}

pub fn mtsrin(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let index = (ctx.gpr[instr.rb()] >> 28) as usize;
    ctx.sr[index] = ctx.gpr[instr.rs()];
    Ok(Flow::Continue)
}

pub fn rfi(ctx: &mut ThreadContext, _: &ExecEnv<'_>, _: Instruction) -> Result {
    ctx.msr = ctx.srr1;
    ctx.nia = ctx.srr0 & !3;
    Ok(Flow::Continue)
}

/// Cache maintenance, synchronization and TLB instructions have no
/// architectural effect on a single coherent guest memory
pub fn no_op(_: &mut ThreadContext, _: &ExecEnv<'_>, _: Instruction) -> Result {
    Ok(Flow::Continue)
}

pub fn dcbz(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    let ea = ctx.gpr_or_zero(instr.ra()).wrapping_add(ctx.gpr[instr.rb()]);
    env.memory
        .fill(Address(ea & !(CACHE_BLOCK_SIZE - 1)), 0, CACHE_BLOCK_SIZE)?;
    Ok(Flow::Continue)
}
