//! Compare and condition register instructions

use oe_core::error::CpuError;

use super::float::{fpscr, is_signalling_nan, update_fex_vx, update_fx_fex_vx};
use super::{ExecEnv, Flow};
use crate::context::{cr, ThreadContext};
use crate::decoder::Instruction;

type Result = std::result::Result<Flow, CpuError>;

/// LT/GT/EQ for an ordered comparison plus SO copied from XER
#[inline]
pub fn compare_flags<T: PartialOrd>(ctx: &ThreadContext, a: T, b: T) -> u32 {
    let flags = if a < b {
        cr::LT
    } else if a > b {
        cr::GT
    } else {
        cr::EQ
    };
    flags | if ctx.xer_so() { cr::SO } else { 0 }
}

pub fn cmp(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.gpr[instr.ra()] as i32;
    let b = ctx.gpr[instr.rb()] as i32;
    ctx.set_cr_field(instr.crfd(), compare_flags(ctx, a, b));
    Ok(Flow::Continue)
}

pub fn cmpi(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.gpr[instr.ra()] as i32;
    let b = instr.simm() as i32;
    ctx.set_cr_field(instr.crfd(), compare_flags(ctx, a, b));
    Ok(Flow::Continue)
}

pub fn cmpl(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.gpr[instr.ra()];
    let b = ctx.gpr[instr.rb()];
    ctx.set_cr_field(instr.crfd(), compare_flags(ctx, a, b));
    Ok(Flow::Continue)
}

pub fn cmpli(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.gpr[instr.ra()];
    let b = instr.uimm();
    ctx.set_cr_field(instr.crfd(), compare_flags(ctx, a, b));
    Ok(Flow::Continue)
}

/// Compare two floats into crfD and FPSCR[FPCC]
///
/// Unordered comparisons raise VXSNAN for signalling NaNs; ordered ones
/// also raise VXVC unless an enabled VXSNAN already trapped.
pub(crate) fn compare_floats(ctx: &mut ThreadContext, crfd: u32, a: f64, b: f64, ordered: bool) {
    let old = ctx.fpscr;
    let c = if a.is_nan() || b.is_nan() {
        let vxsnan = is_signalling_nan(a) || is_signalling_nan(b);
        if vxsnan {
            ctx.fpscr |= fpscr::VXSNAN;
        }
        if ordered && !(vxsnan && ctx.fpscr & fpscr::VE != 0) {
            ctx.fpscr |= fpscr::VXVC;
        }
        cr::SO
    } else if a < b {
        cr::LT
    } else if a > b {
        cr::GT
    } else {
        cr::EQ
    };
    ctx.set_cr_field(crfd, c);
    ctx.fpscr = (ctx.fpscr & !fpscr::FPCC) | (c << 12);
    update_fx_fex_vx(ctx, old);
}

pub fn fcmpo(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (a, b) = (ctx.fpr[instr.fra()].f64(), ctx.fpr[instr.frb()].f64());
    compare_floats(ctx, instr.crfd(), a, b, true);
    Ok(Flow::Continue)
}

pub fn fcmpu(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (a, b) = (ctx.fpr[instr.fra()].f64(), ctx.fpr[instr.frb()].f64());
    compare_floats(ctx, instr.crfd(), a, b, false);
    Ok(Flow::Continue)
}

#[inline]
fn cr_logical(ctx: &mut ThreadContext, instr: Instruction, op: impl Fn(bool, bool) -> bool) -> Result {
    let a = ctx.cr_bit(instr.crba());
    let b = ctx.cr_bit(instr.crbb());
    ctx.set_cr_bit(instr.crbd(), op(a, b));
    Ok(Flow::Continue)
}

pub fn crand(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    cr_logical(ctx, instr, |a, b| a & b)
}

pub fn crandc(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    cr_logical(ctx, instr, |a, b| a & !b)
}

pub fn creqv(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    cr_logical(ctx, instr, |a, b| a == b)
}

pub fn crnand(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    cr_logical(ctx, instr, |a, b| !(a & b))
}

pub fn crnor(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    cr_logical(ctx, instr, |a, b| !(a | b))
}

pub fn cror(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    cr_logical(ctx, instr, |a, b| a | b)
}

pub fn crorc(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    cr_logical(ctx, instr, |a, b| a | !b)
}

pub fn crxor(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    cr_logical(ctx, instr, |a, b| a ^ b)
}

pub fn mcrf(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let value = ctx.cr_field(instr.crfs());
    ctx.set_cr_field(instr.crfd(), value);
    Ok(Flow::Continue)
}

pub fn mcrfs(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let shift = 4 * (7 - instr.crfs());
    ctx.set_cr_field(instr.crfd(), (ctx.fpscr >> shift) & 0xF);

    // Copied exception bits are cleared, the summaries recomputed
    let clear = (fpscr::FX | fpscr::ALL_EXCEPTIONS) & (0xF << shift);
    ctx.fpscr &= !clear;
    update_fex_vx(ctx);
    Ok(Flow::Continue)
}

pub fn mcrxr(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.set_cr_field(instr.crfd(), ctx.xer >> 28);
    ctx.xer &= 0x0FFF_FFFF;
    Ok(Flow::Continue)
}

pub fn mfcr(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.gpr[instr.rd()] = ctx.cr;
    Ok(Flow::Continue)
}

/// Expand the 8-bit CRM field into a CR mask
#[inline]
pub fn crm_mask(crm: u32) -> u32 {
    (0..8)
        .filter(|i| crm & (1 << i) != 0)
        .fold(0, |mask, i| mask | (0xF << (i * 4)))
}

pub fn mtcrf(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let mask = crm_mask(instr.crm());
    ctx.cr = (ctx.cr & !mask) | (ctx.gpr[instr.rs()] & mask);
    Ok(Flow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_flags_include_so() {
        let mut ctx = ThreadContext::new();
        assert_eq!(compare_flags(&ctx, -1i32, 1), cr::LT);
        assert_eq!(compare_flags(&ctx, u32::MAX, 1), cr::GT);
        ctx.set_xer_ov(true);
        assert_eq!(compare_flags(&ctx, 3u32, 3), cr::EQ | cr::SO);
    }

    #[test]
    fn test_crm_mask() {
        assert_eq!(crm_mask(0xFF), u32::MAX);
        assert_eq!(crm_mask(0x80), 0xF000_0000);
        assert_eq!(crm_mask(0x01), 0x0000_000F);
        assert_eq!(crm_mask(0x00), 0);
    }

    #[test]
    fn test_compare_floats_unordered() {
        let mut ctx = ThreadContext::new();
        let snan = f64::from_bits(0x7FF0_0000_0000_0001);
        compare_floats(&mut ctx, 1, snan, 1.0, true);
        assert_eq!(ctx.cr_field(1), cr::SO);
        assert_ne!(ctx.fpscr & fpscr::VXSNAN, 0);
        assert_ne!(ctx.fpscr & fpscr::VXVC, 0);
        assert_eq!((ctx.fpscr & fpscr::FPCC) >> 12, 0b0001);

        let mut ctx = ThreadContext::new();
        compare_floats(&mut ctx, 0, f64::NAN, 1.0, false);
        assert_eq!(ctx.fpscr & fpscr::VXVC, 0);

        compare_floats(&mut ctx, 7, 1.0, 2.0, false);
        assert_eq!(ctx.cr_field(7), cr::LT);
    }
}
