//! Paired single instructions
//!
//! Each FPR holds two single precision values. Results are rounded to single
//! precision per slot; FPRF follows the slot 0 result.

use oe_core::error::CpuError;

use super::condition::compare_floats;
use super::float::{
    arith_result, estimate_reciprocal, estimate_reciprocal_root, extend_single_bits, fma_result,
    truncate_double_bits, update_fprf, ArithOp,
};
use super::{ExecEnv, Flow};
use crate::context::ThreadContext;
use crate::decoder::Instruction;

type Result = std::result::Result<Flow, CpuError>;

#[inline]
fn slot(ctx: &ThreadContext, reg: usize, n: usize) -> f64 {
    if n == 0 {
        ctx.fpr[reg].ps0()
    } else {
        ctx.fpr[reg].ps1()
    }
}

#[inline]
fn finish(ctx: &mut ThreadContext, instr: Instruction) -> Result {
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

/// Slot 0 and slot 1 of frA combined with the given slots of the second operand
fn arith(ctx: &mut ThreadContext, instr: Instruction, op: ArithOp, b_slots: [usize; 2]) -> Result {
    let b_reg = if op == ArithOp::Mul { instr.frc() } else { instr.frb() };
    let a0 = slot(ctx, instr.fra(), 0);
    let a1 = slot(ctx, instr.fra(), 1);
    let b0 = slot(ctx, b_reg, b_slots[0]);
    let b1 = slot(ctx, b_reg, b_slots[1]);

    let d0 = arith_result(ctx, op, a0, b0, true);
    let d1 = arith_result(ctx, op, a1, b1, true);
    if let (Some(d0), Some(d1)) = (d0, d1) {
        let fr = &mut ctx.fpr[instr.frd()];
        fr.set_ps0(d0);
        fr.set_ps1(d1);
    }
    if let Some(d0) = d0 {
        update_fprf(ctx, d0, true);
    }
    finish(ctx, instr)
}

pub fn ps_add(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Add, [0, 1])
}

pub fn ps_sub(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Sub, [0, 1])
}

pub fn ps_mul(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Mul, [0, 1])
}

pub fn ps_muls0(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Mul, [0, 0])
}

pub fn ps_muls1(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Mul, [1, 1])
}

pub fn ps_div(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Div, [0, 1])
}

/// Slot `target` of frD gets frA.ps0 + frB.ps1, the other slot comes from frC
fn sum(ctx: &mut ThreadContext, instr: Instruction, target: usize) -> Result {
    let a = slot(ctx, instr.fra(), 0);
    let b = slot(ctx, instr.frb(), 1);
    if let Some(d) = arith_result(ctx, ArithOp::Add, a, b, true) {
        let c = ctx.fpr[instr.frc()];
        let fr = &mut ctx.fpr[instr.frd()];
        if target == 0 {
            fr.set_ps0(d);
            fr.ps1 = c.ps1;
        } else {
            fr.ps0 = extend_single_bits(truncate_double_bits(c.ps0));
            fr.set_ps1(d);
        }
    }
    finish(ctx, instr)
}

pub fn ps_sum0(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    sum(ctx, instr, 0)
}

pub fn ps_sum1(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    sum(ctx, instr, 1)
}

/// Fused multiply-add per slot, `c_slots` picks the frC slot for each lane
fn madd(ctx: &mut ThreadContext, instr: Instruction, subtract: bool, negate: bool, c_slots: [usize; 2]) -> Result {
    let a0 = slot(ctx, instr.fra(), 0);
    let a1 = slot(ctx, instr.fra(), 1);
    let b0 = slot(ctx, instr.frb(), 0);
    let b1 = slot(ctx, instr.frb(), 1);
    let c0 = slot(ctx, instr.frc(), c_slots[0]);
    let c1 = slot(ctx, instr.frc(), c_slots[1]);

    let d0 = fma_result(ctx, a0, b0, c0, subtract, negate, true);
    let d1 = fma_result(ctx, a1, b1, c1, subtract, negate, true);
    if let (Some(d0), Some(d1)) = (d0, d1) {
        let fr = &mut ctx.fpr[instr.frd()];
        fr.set_ps0(d0);
        fr.set_ps1(d1);
    }
    if let Some(d0) = d0 {
        update_fprf(ctx, d0, true);
    }
    finish(ctx, instr)
}

pub fn ps_madd(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    madd(ctx, instr, false, false, [0, 1])
}

pub fn ps_madds0(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    madd(ctx, instr, false, false, [0, 0])
}

pub fn ps_madds1(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    madd(ctx, instr, false, false, [1, 1])
}

pub fn ps_msub(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    madd(ctx, instr, true, false, [0, 1])
}

pub fn ps_nmadd(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    madd(ctx, instr, false, true, [0, 1])
}

pub fn ps_nmsub(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    madd(ctx, instr, true, true, [0, 1])
}

/// Per-slot sign manipulation on the single precision bit pattern
fn move_slots(ctx: &mut ThreadContext, instr: Instruction, op: fn(u32) -> u32) -> Result {
    let b = ctx.fpr[instr.frb()];
    let fr = &mut ctx.fpr[instr.frd()];
    fr.ps0 = extend_single_bits(op(truncate_double_bits(b.ps0)));
    fr.ps1 = extend_single_bits(op(truncate_double_bits(b.ps1)));
    finish(ctx, instr)
}

pub fn ps_mr(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    move_slots(ctx, instr, |v| v)
}

pub fn ps_neg(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    move_slots(ctx, instr, |v| v ^ 0x8000_0000)
}

pub fn ps_abs(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    move_slots(ctx, instr, |v| v & !0x8000_0000)
}

pub fn ps_nabs(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    move_slots(ctx, instr, |v| v | 0x8000_0000)
}

pub fn ps_sel(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.fpr[instr.fra()];
    let b = ctx.fpr[instr.frb()];
    let c = ctx.fpr[instr.frc()];
    let fr = &mut ctx.fpr[instr.frd()];
    fr.ps0 = if a.ps0() >= 0.0 { c.ps0 } else { b.ps0 };
    fr.ps1 = if a.ps1() >= 0.0 { c.ps1 } else { b.ps1 };
    finish(ctx, instr)
}

pub fn ps_res(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let b = ctx.fpr[instr.frb()];
    let d0 = estimate_reciprocal(b.ps0() as f32) as f64;
    let d1 = estimate_reciprocal(b.ps1() as f32) as f64;
    let fr = &mut ctx.fpr[instr.frd()];
    fr.set_ps0(d0);
    fr.set_ps1(d1);
    update_fprf(ctx, d0, true);
    finish(ctx, instr)
}

pub fn ps_rsqrte(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let b = ctx.fpr[instr.frb()];
    let d0 = estimate_reciprocal_root(b.ps0()) as f32 as f64;
    let d1 = estimate_reciprocal_root(b.ps1()) as f32 as f64;
    let fr = &mut ctx.fpr[instr.frd()];
    fr.set_ps0(d0);
    fr.set_ps1(d1);
    update_fprf(ctx, d0, true);
    finish(ctx, instr)
}

/// frD.ps0 from slot `first` of frA, frD.ps1 from slot `second` of frB
fn merge(ctx: &mut ThreadContext, instr: Instruction, first: usize, second: usize) -> Result {
    let a = ctx.fpr[instr.fra()];
    let b = ctx.fpr[instr.frb()];
    let fr = &mut ctx.fpr[instr.frd()];
    fr.ps0 = if first == 0 { a.ps0 } else { a.ps1 };
    fr.ps1 = if second == 0 { b.ps0 } else { b.ps1 };
    finish(ctx, instr)
}

pub fn ps_merge00(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    merge(ctx, instr, 0, 0)
}

pub fn ps_merge01(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    merge(ctx, instr, 0, 1)
}

pub fn ps_merge10(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    merge(ctx, instr, 1, 0)
}

pub fn ps_merge11(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    merge(ctx, instr, 1, 1)
}

fn compare(ctx: &mut ThreadContext, instr: Instruction, n: usize, ordered: bool) -> Result {
    let a = slot(ctx, instr.fra(), n);
    let b = slot(ctx, instr.frb(), n);
    compare_floats(ctx, instr.crfd(), a, b, ordered);
    Ok(Flow::Continue)
}

pub fn ps_cmpu0(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    compare(ctx, instr, 0, false)
}

pub fn ps_cmpo0(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    compare(ctx, instr, 0, true)
}

pub fn ps_cmpu1(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    compare(ctx, instr, 1, false)
}

pub fn ps_cmpo1(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    compare(ctx, instr, 1, true)
}
