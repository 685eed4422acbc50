//! Integer arithmetic, logical, rotate and shift instructions

use oe_core::bits::ppc_mask;
use oe_core::error::CpuError;

use super::{ExecEnv, Flow};
use crate::context::ThreadContext;
use crate::decoder::Instruction;

type Result = std::result::Result<Flow, CpuError>;

/// `a + b + carry`, returning the sum, carry out and signed overflow
#[inline]
pub fn add_with_carry(a: u32, b: u32, carry: bool) -> (u32, bool, bool) {
    let wide = a as u64 + b as u64 + carry as u64;
    let d = wide as u32;
    let overflow = (a ^ d) & (b ^ d) & 0x8000_0000 != 0;
    (d, wide > u32::MAX as u64, overflow)
}

/// Write an XO-form result and update CA, OV and cr0 as requested
#[inline]
fn write_arith(ctx: &mut ThreadContext, instr: Instruction, d: u32, carry: Option<bool>, overflow: bool) {
    ctx.gpr[instr.rd()] = d;
    if let Some(carry) = carry {
        ctx.set_xer_ca(carry);
    }
    if instr.oe() {
        ctx.set_xer_ov(overflow);
    }
    if instr.rc() {
        ctx.update_cr0(d);
    }
}

/// Write an X-form logical result into rA and update cr0 if Rc is set
#[inline]
fn write_logical(ctx: &mut ThreadContext, instr: Instruction, a: u32) {
    ctx.gpr[instr.ra()] = a;
    if instr.rc() {
        ctx.update_cr0(a);
    }
}

pub fn add(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, _, ov) = add_with_carry(ctx.gpr[instr.ra()], ctx.gpr[instr.rb()], false);
    write_arith(ctx, instr, d, None, ov);
    Ok(Flow::Continue)
}

pub fn addc(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, ca, ov) = add_with_carry(ctx.gpr[instr.ra()], ctx.gpr[instr.rb()], false);
    write_arith(ctx, instr, d, Some(ca), ov);
    Ok(Flow::Continue)
}

pub fn adde(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, ca, ov) = add_with_carry(ctx.gpr[instr.ra()], ctx.gpr[instr.rb()], ctx.xer_ca());
    write_arith(ctx, instr, d, Some(ca), ov);
    Ok(Flow::Continue)
}

pub fn addi(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.gpr[instr.rd()] = ctx.gpr_or_zero(instr.ra()).wrapping_add(instr.simm());
    Ok(Flow::Continue)
}

pub fn addic(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, ca, _) = add_with_carry(ctx.gpr[instr.ra()], instr.simm(), false);
    ctx.gpr[instr.rd()] = d;
    ctx.set_xer_ca(ca);
    Ok(Flow::Continue)
}

pub fn addic_rc(ctx: &mut ThreadContext, env: &ExecEnv<'_>, instr: Instruction) -> Result {
    addic(ctx, env, instr)?;
    ctx.update_cr0(ctx.gpr[instr.rd()]);
    Ok(Flow::Continue)
}

pub fn addis(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.gpr[instr.rd()] = ctx.gpr_or_zero(instr.ra()).wrapping_add(instr.simm() << 16);
    Ok(Flow::Continue)
}

pub fn addme(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, ca, ov) = add_with_carry(ctx.gpr[instr.ra()], u32::MAX, ctx.xer_ca());
    write_arith(ctx, instr, d, Some(ca), ov);
    Ok(Flow::Continue)
}

pub fn addze(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, ca, ov) = add_with_carry(ctx.gpr[instr.ra()], 0, ctx.xer_ca());
    write_arith(ctx, instr, d, Some(ca), ov);
    Ok(Flow::Continue)
}

pub fn subf(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, _, ov) = add_with_carry(!ctx.gpr[instr.ra()], ctx.gpr[instr.rb()], true);
    write_arith(ctx, instr, d, None, ov);
    Ok(Flow::Continue)
}

pub fn subfc(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, ca, ov) = add_with_carry(!ctx.gpr[instr.ra()], ctx.gpr[instr.rb()], true);
    write_arith(ctx, instr, d, Some(ca), ov);
    Ok(Flow::Continue)
}

pub fn subfe(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, ca, ov) = add_with_carry(!ctx.gpr[instr.ra()], ctx.gpr[instr.rb()], ctx.xer_ca());
    write_arith(ctx, instr, d, Some(ca), ov);
    Ok(Flow::Continue)
}

pub fn subfic(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, ca, _) = add_with_carry(!ctx.gpr[instr.ra()], instr.simm(), true);
    ctx.gpr[instr.rd()] = d;
    ctx.set_xer_ca(ca);
    Ok(Flow::Continue)
}

pub fn subfme(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, ca, ov) = add_with_carry(!ctx.gpr[instr.ra()], u32::MAX, ctx.xer_ca());
    write_arith(ctx, instr, d, Some(ca), ov);
    Ok(Flow::Continue)
}

pub fn subfze(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, ca, ov) = add_with_carry(!ctx.gpr[instr.ra()], 0, ctx.xer_ca());
    write_arith(ctx, instr, d, Some(ca), ov);
    Ok(Flow::Continue)
}

pub fn neg(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (d, _, ov) = add_with_carry(!ctx.gpr[instr.ra()], 0, true);
    write_arith(ctx, instr, d, None, ov);
    Ok(Flow::Continue)
}

pub fn mulhw(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.gpr[instr.ra()] as i32 as i64;
    let b = ctx.gpr[instr.rb()] as i32 as i64;
    write_arith(ctx, instr, ((a * b) >> 32) as u32, None, false);
    Ok(Flow::Continue)
}

pub fn mulhwu(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.gpr[instr.ra()] as u64;
    let b = ctx.gpr[instr.rb()] as u64;
    write_arith(ctx, instr, ((a * b) >> 32) as u32, None, false);
    Ok(Flow::Continue)
}

pub fn mulli(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.gpr[instr.ra()] as i32;
    ctx.gpr[instr.rd()] = a.wrapping_mul(instr.simm() as i32) as u32;
    Ok(Flow::Continue)
}

pub fn mullw(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let product = ctx.gpr[instr.ra()] as i32 as i64 * ctx.gpr[instr.rb()] as i32 as i64;
    let overflow = product < i32::MIN as i64 || product > i32::MAX as i64;
    write_arith(ctx, instr, product as u32, None, overflow);
    Ok(Flow::Continue)
}

pub fn divw(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.gpr[instr.ra()] as i32;
    let b = ctx.gpr[instr.rb()] as i32;
    let (d, overflow) = if b == 0 || (a == i32::MIN && b == -1) {
        // Undefined result, matches hardware
        (if a < 0 { u32::MAX } else { 0 }, true)
    } else {
        ((a / b) as u32, false)
    };
    write_arith(ctx, instr, d, None, overflow);
    Ok(Flow::Continue)
}

pub fn divwu(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.gpr[instr.ra()];
    let b = ctx.gpr[instr.rb()];
    let (d, overflow) = match a.checked_div(b) {
        Some(d) => (d, false),
        None => (0, true),
    };
    write_arith(ctx, instr, d, None, overflow);
    Ok(Flow::Continue)
}

pub fn and(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    write_logical(ctx, instr, ctx.gpr[instr.rs()] & ctx.gpr[instr.rb()]);
    Ok(Flow::Continue)
}

pub fn andc(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    write_logical(ctx, instr, ctx.gpr[instr.rs()] & !ctx.gpr[instr.rb()]);
    Ok(Flow::Continue)
}

pub fn andi_rc(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.gpr[instr.rs()] & instr.uimm();
    ctx.gpr[instr.ra()] = a;
    ctx.update_cr0(a);
    Ok(Flow::Continue)
}

pub fn andis_rc(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.gpr[instr.rs()] & (instr.uimm() << 16);
    ctx.gpr[instr.ra()] = a;
    ctx.update_cr0(a);
    Ok(Flow::Continue)
}

pub fn cntlzw(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    write_logical(ctx, instr, ctx.gpr[instr.rs()].leading_zeros());
    Ok(Flow::Continue)
}

pub fn eqv(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    write_logical(ctx, instr, !(ctx.gpr[instr.rs()] ^ ctx.gpr[instr.rb()]));
    Ok(Flow::Continue)
}

pub fn extsb(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    write_logical(ctx, instr, ctx.gpr[instr.rs()] as u8 as i8 as i32 as u32);
    Ok(Flow::Continue)
}

pub fn extsh(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    write_logical(ctx, instr, ctx.gpr[instr.rs()] as u16 as i16 as i32 as u32);
    Ok(Flow::Continue)
}

pub fn nand(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    write_logical(ctx, instr, !(ctx.gpr[instr.rs()] & ctx.gpr[instr.rb()]));
    Ok(Flow::Continue)
}

pub fn nor(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    write_logical(ctx, instr, !(ctx.gpr[instr.rs()] | ctx.gpr[instr.rb()]));
    Ok(Flow::Continue)
}

pub fn or(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    write_logical(ctx, instr, ctx.gpr[instr.rs()] | ctx.gpr[instr.rb()]);
    Ok(Flow::Continue)
}

pub fn orc(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    write_logical(ctx, instr, ctx.gpr[instr.rs()] | !ctx.gpr[instr.rb()]);
    Ok(Flow::Continue)
}

pub fn ori(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.gpr[instr.ra()] = ctx.gpr[instr.rs()] | instr.uimm();
    Ok(Flow::Continue)
}

pub fn oris(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.gpr[instr.ra()] = ctx.gpr[instr.rs()] | (instr.uimm() << 16);
    Ok(Flow::Continue)
}

pub fn xor(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    write_logical(ctx, instr, ctx.gpr[instr.rs()] ^ ctx.gpr[instr.rb()]);
    Ok(Flow::Continue)
}

pub fn xori(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.gpr[instr.ra()] = ctx.gpr[instr.rs()] ^ instr.uimm();
    Ok(Flow::Continue)
}

pub fn xoris(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.gpr[instr.ra()] = ctx.gpr[instr.rs()] ^ (instr.uimm() << 16);
    Ok(Flow::Continue)
}

pub fn rlwimi(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let r = ctx.gpr[instr.rs()].rotate_left(instr.sh());
    let m = ppc_mask(instr.mb(), instr.me());
    write_logical(ctx, instr, (r & m) | (ctx.gpr[instr.ra()] & !m));
    Ok(Flow::Continue)
}

pub fn rlwinm(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let r = ctx.gpr[instr.rs()].rotate_left(instr.sh());
    write_logical(ctx, instr, r & ppc_mask(instr.mb(), instr.me()));
    Ok(Flow::Continue)
}

pub fn rlwnm(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let r = ctx.gpr[instr.rs()].rotate_left(ctx.gpr[instr.rb()] & 0x1F);
    write_logical(ctx, instr, r & ppc_mask(instr.mb(), instr.me()));
    Ok(Flow::Continue)
}

pub fn slw(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let n = ctx.gpr[instr.rb()] & 0x3F;
    let s = ctx.gpr[instr.rs()];
    write_logical(ctx, instr, if n & 0x20 != 0 { 0 } else { s << n });
    Ok(Flow::Continue)
}

pub fn srw(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let n = ctx.gpr[instr.rb()] & 0x3F;
    let s = ctx.gpr[instr.rs()];
    write_logical(ctx, instr, if n & 0x20 != 0 { 0 } else { s >> n });
    Ok(Flow::Continue)
}

/// Arithmetic shift right, returning the result and the carry out
#[inline]
pub fn shift_right_algebraic(s: u32, n: u32) -> (u32, bool) {
    let signed = s as i32;
    if n & 0x20 != 0 {
        ((signed >> 31) as u32, signed < 0)
    } else {
        let lost = s & ((1u64 << n) - 1) as u32;
        ((signed >> n) as u32, signed < 0 && lost != 0)
    }
}

pub fn sraw(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (a, ca) = shift_right_algebraic(ctx.gpr[instr.rs()], ctx.gpr[instr.rb()] & 0x3F);
    ctx.set_xer_ca(ca);
    write_logical(ctx, instr, a);
    Ok(Flow::Continue)
}

pub fn srawi(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let (a, ca) = shift_right_algebraic(ctx.gpr[instr.rs()], instr.sh());
    ctx.set_xer_ca(ca);
    write_logical(ctx, instr, a);
    Ok(Flow::Continue)
}
