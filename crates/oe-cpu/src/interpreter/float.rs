//! Floating point arithmetic and FPSCR instructions
//!
//! Arithmetic is done in host doubles. The host floating point environment
//! is not reachable from stable Rust, so invalid operation, zero divide,
//! overflow and underflow conditions are detected from the operands and
//! the result instead of read back from hardware flags.

use oe_core::error::CpuError;

use super::{ExecEnv, Flow};
use crate::context::ThreadContext;
use crate::decoder::Instruction;

type Result = std::result::Result<Flow, CpuError>;

/// FPSCR bits
pub mod fpscr {
    pub const FX: u32 = 1 << 31;
    pub const FEX: u32 = 1 << 30;
    pub const VX: u32 = 1 << 29;
    pub const OX: u32 = 1 << 28;
    pub const UX: u32 = 1 << 27;
    pub const ZX: u32 = 1 << 26;
    pub const XX: u32 = 1 << 25;
    pub const VXSNAN: u32 = 1 << 24;
    pub const VXISI: u32 = 1 << 23;
    pub const VXIDI: u32 = 1 << 22;
    pub const VXZDZ: u32 = 1 << 21;
    pub const VXIMZ: u32 = 1 << 20;
    pub const VXVC: u32 = 1 << 19;
    pub const FR: u32 = 1 << 18;
    pub const FI: u32 = 1 << 17;
    /// Floating point result flags, class bit plus FPCC
    pub const FPRF: u32 = 0x1F << 12;
    pub const FPCC: u32 = 0xF << 12;
    pub const VXSOFT: u32 = 1 << 10;
    pub const VXSQRT: u32 = 1 << 9;
    pub const VXCVI: u32 = 1 << 8;
    pub const VE: u32 = 1 << 7;
    pub const OE: u32 = 1 << 6;
    pub const UE: u32 = 1 << 5;
    pub const ZE: u32 = 1 << 4;
    pub const XE: u32 = 1 << 3;
    pub const NI: u32 = 1 << 2;
    pub const RN: u32 = 0b11;

    pub const ALL_VX: u32 = VXSNAN | VXISI | VXIDI | VXZDZ | VXIMZ | VXVC | VXSOFT | VXSQRT | VXCVI;
    pub const ALL_EXCEPTIONS: u32 = OX | UX | ZX | XX | ALL_VX;
}

/// FPRF class descriptor and condition bits (before the shift into FPSCR)
mod fprf {
    pub const CLASS: u32 = 0x10;
    pub const NEGATIVE: u32 = 0x08;
    pub const POSITIVE: u32 = 0x04;
    pub const ZERO: u32 = 0x02;
    pub const UNORDERED: u32 = 0x01;
}

/// Default quiet NaN produced by invalid operations
pub const DEFAULT_NAN: u64 = 0x7FF8_0000_0000_0000;
const QUIET_BIT: u64 = 1 << 51;

/// Values above this exponent survive a truncating double to single store
pub(crate) const SINGLE_EXPONENT_THRESHOLD: u64 = 896;

#[inline]
pub fn is_signalling_nan(value: f64) -> bool {
    value.is_nan() && value.to_bits() & QUIET_BIT == 0
}

#[inline]
pub fn make_quiet(value: f64) -> f64 {
    f64::from_bits(value.to_bits() | QUIET_BIT)
}

#[inline]
pub fn round_to_single(value: f64) -> f64 {
    value as f32 as f64
}

/// Convert single precision bits to double bits without quieting NaNs
pub fn extend_single_bits(bits: u32) -> u64 {
    let value = f32::from_bits(bits);
    if !value.is_nan() {
        return (value as f64).to_bits();
    }
    let sign = ((bits >> 31) as u64) << 63;
    let mantissa = ((bits & 0x007F_FFFF) as u64) << 29;
    sign | (0x7FFu64 << 52) | mantissa
}

/// Convert double bits to single bits the way `stfs` does
///
/// Values in single range are truncated bitwise, which keeps signalling
/// NaNs signalling. Tiny values go through a host conversion.
pub fn truncate_double_bits(bits: u64) -> u32 {
    let exponent = (bits >> 52) & 0x7FF;
    if exponent > SINGLE_EXPONENT_THRESHOLD || bits & !(1 << 63) == 0 {
        (((bits >> 32) & 0xC000_0000) | ((bits >> 29) & 0x3FFF_FFFF)) as u32
    } else {
        (f64::from_bits(bits) as f32).to_bits()
    }
}

/// Recompute the VX and FEX summary bits
pub fn update_fex_vx(ctx: &mut ThreadContext) {
    use fpscr::*;
    let f = ctx.fpscr;
    let vx = f & ALL_VX != 0;
    let enabled = (vx && f & VE != 0)
        || (f & OX != 0 && f & OE != 0)
        || (f & UX != 0 && f & UE != 0)
        || (f & ZX != 0 && f & ZE != 0)
        || (f & XX != 0 && f & XE != 0);
    ctx.fpscr = (f & !(VX | FEX)) | if vx { VX } else { 0 } | if enabled { FEX } else { 0 };
}

/// Recompute the summary bits and set FX if any exception bit newly turned on
pub fn update_fx_fex_vx(ctx: &mut ThreadContext, old: u32) {
    update_fex_vx(ctx);
    let newly_set = (old ^ ctx.fpscr) & ctx.fpscr;
    if newly_set & fpscr::ALL_EXCEPTIONS != 0 {
        ctx.fpscr |= fpscr::FX;
    }
}

/// Set exception bits and update the summaries
#[inline]
pub fn raise(ctx: &mut ThreadContext, bits: u32) {
    let old = ctx.fpscr;
    ctx.fpscr |= bits;
    update_fx_fex_vx(ctx, old);
}

/// Classify a result into FPRF
pub fn update_fprf(ctx: &mut ThreadContext, value: f64, single: bool) {
    let min_normal = if single {
        f32::MIN_POSITIVE as f64
    } else {
        f64::MIN_POSITIVE
    };
    let flags = if value.is_nan() {
        fprf::CLASS | fprf::UNORDERED
    } else if value == 0.0 {
        fprf::ZERO | if value.is_sign_negative() { fprf::CLASS } else { 0 }
    } else {
        let sign = if value > 0.0 { fprf::POSITIVE } else { fprf::NEGATIVE };
        let class = if value.is_infinite() {
            fprf::UNORDERED
        } else if value.abs() < min_normal {
            fprf::CLASS
        } else {
            0
        };
        sign | class
    };
    ctx.fpscr = (ctx.fpscr & !fpscr::FPRF) | (flags << 12);
}

/// Overflow and underflow bits for a finite computation producing `value`
fn range_exceptions(value: f64, single: bool, inputs_finite: bool) -> u32 {
    let min_normal = if single {
        f32::MIN_POSITIVE as f64
    } else {
        f64::MIN_POSITIVE
    };
    if inputs_finite && value.is_infinite() {
        fpscr::OX | fpscr::XX
    } else if value != 0.0 && value.abs() < min_normal {
        fpscr::UX
    } else {
        0
    }
}

/// Write a result to frD: both slots for single precision, ps0 otherwise
#[inline]
pub(crate) fn write_result(ctx: &mut ThreadContext, frd: usize, value: f64, single: bool) {
    if single {
        ctx.fpr[frd].ps0 = value.to_bits();
        ctx.fpr[frd].ps1 = value.to_bits();
    } else {
        ctx.fpr[frd].set_f64(value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Compute `a op b` with PowerPC exception semantics
///
/// Returns `None` when an enabled exception suppresses the result, in which
/// case only FPSCR was updated.
pub(crate) fn arith_result(ctx: &mut ThreadContext, op: ArithOp, a: f64, b: f64, single: bool) -> Option<f64> {
    let vxsnan = is_signalling_nan(a) || is_signalling_nan(b);
    let both_infinite = a.is_infinite() && b.is_infinite();
    let vxisi = match op {
        ArithOp::Add => both_infinite && a.is_sign_negative() != b.is_sign_negative(),
        ArithOp::Sub => both_infinite && a.is_sign_negative() == b.is_sign_negative(),
        _ => false,
    };
    let vximz = op == ArithOp::Mul && ((a.is_infinite() && b == 0.0) || (a == 0.0 && b.is_infinite()));
    let vxidi = op == ArithOp::Div && both_infinite;
    let vxzdz = op == ArithOp::Div && a == 0.0 && b == 0.0;
    let zx = op == ArithOp::Div && b == 0.0 && a.is_finite() && a != 0.0;

    let mut raised = 0;
    for (set, bit) in [
        (vxsnan, fpscr::VXSNAN),
        (vxisi, fpscr::VXISI),
        (vximz, fpscr::VXIMZ),
        (vxidi, fpscr::VXIDI),
        (vxzdz, fpscr::VXZDZ),
        (zx, fpscr::ZX),
    ] {
        if set {
            raised |= bit;
        }
    }

    let invalid = vxsnan || vxisi || vximz || vxidi || vxzdz;
    if (invalid && ctx.fpscr & fpscr::VE != 0) || (zx && ctx.fpscr & fpscr::ZE != 0) {
        raise(ctx, raised);
        return None;
    }

    let d = if a.is_nan() {
        make_quiet(a)
    } else if b.is_nan() {
        make_quiet(b)
    } else if invalid {
        f64::from_bits(DEFAULT_NAN)
    } else {
        match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
        }
    };
    let d = if single { round_to_single(d) } else { d };

    if !d.is_nan() {
        raised |= range_exceptions(d, single, a.is_finite() && b.is_finite());
    }
    ctx.fpscr &= !(fpscr::FR | fpscr::FI);
    if raised & fpscr::OX != 0 {
        ctx.fpscr |= fpscr::FI;
    }
    raise(ctx, raised);
    update_fprf(ctx, d, single);
    Some(d)
}

/// Compute `±(a * c ± b)` as a fused operation
pub(crate) fn fma_result(
    ctx: &mut ThreadContext,
    a: f64,
    b: f64,
    c: f64,
    subtract: bool,
    negate: bool,
    single: bool,
) -> Option<f64> {
    let addend = if subtract { -b } else { b };
    let vxsnan = is_signalling_nan(a) || is_signalling_nan(b) || is_signalling_nan(c);
    let vximz = (a.is_infinite() && c == 0.0) || (a == 0.0 && c.is_infinite());
    let vxisi = !vximz
        && !a.is_nan()
        && !c.is_nan()
        && (a.is_infinite() || c.is_infinite())
        && b.is_infinite()
        && (a.is_sign_negative() ^ c.is_sign_negative()) != addend.is_sign_negative();

    let mut raised = 0;
    if vxsnan {
        raised |= fpscr::VXSNAN;
    }
    if vxisi {
        raised |= fpscr::VXISI;
    }
    if vximz {
        raised |= fpscr::VXIMZ;
    }

    if (vxsnan || vxisi || vximz) && ctx.fpscr & fpscr::VE != 0 {
        raise(ctx, raised);
        return None;
    }

    let d = if a.is_nan() {
        make_quiet(a)
    } else if b.is_nan() {
        make_quiet(b)
    } else if c.is_nan() {
        make_quiet(c)
    } else if vxisi || vximz {
        f64::from_bits(DEFAULT_NAN)
    } else {
        let d = a.mul_add(c, addend);
        if negate {
            -d
        } else {
            d
        }
    };
    let d = if single { round_to_single(d) } else { d };

    if !d.is_nan() {
        raised |= range_exceptions(d, single, a.is_finite() && b.is_finite() && c.is_finite());
    }
    ctx.fpscr &= !(fpscr::FR | fpscr::FI);
    raise(ctx, raised);
    update_fprf(ctx, d, single);
    Some(d)
}

const FRES_BASE: [u32; 32] = [
    0x3FFC, 0x3C1C, 0x3875, 0x3504, 0x31C4, 0x2EB1, 0x2BC8, 0x2904, 0x2664, 0x23E5, 0x2184, 0x1F40,
    0x1D16, 0x1B04, 0x190A, 0x1725, 0x1554, 0x1396, 0x11EB, 0x104F, 0x0EC4, 0x0D48, 0x0BD7, 0x0A7C,
    0x0922, 0x07DF, 0x069C, 0x056F, 0x0442, 0x0328, 0x020E, 0x0106,
];

const FRES_DELTA: [u32; 32] = [
    0x3E1, 0x3A7, 0x371, 0x340, 0x313, 0x2EA, 0x2C4, 0x2A0, 0x27F, 0x261, 0x245, 0x22A, 0x212, 0x1FB,
    0x1E5, 0x1D1, 0x1BE, 0x1AC, 0x19B, 0x18B, 0x17C, 0x16E, 0x15B, 0x15B, 0x143, 0x143, 0x12D, 0x12D,
    0x11A, 0x11A, 0x108, 0x106,
];

const FRSQRTE_BASE: [u64; 32] = [
    0x7FF4, 0x7852, 0x7154, 0x6AE4, 0x64F2, 0x5F6E, 0x5A4C, 0x5580, 0x5102, 0x4CCA, 0x48D0, 0x450E,
    0x4182, 0x3E24, 0x3AF2, 0x37E8, 0x34FD, 0x2F97, 0x2AA5, 0x2618, 0x21E4, 0x1DFE, 0x1A5C, 0x16F8,
    0x13CA, 0x10CE, 0x0DFE, 0x0B57, 0x08D4, 0x0673, 0x0431, 0x020B,
];

const FRSQRTE_DELTA: [u64; 32] = [
    0x7A4, 0x700, 0x670, 0x5F2, 0x584, 0x524, 0x4CC, 0x47E, 0x43A, 0x3FA, 0x3C2, 0x38E, 0x35E, 0x332,
    0x30A, 0x2E6, 0x568, 0x4F3, 0x48D, 0x435, 0x3E7, 0x3A2, 0x365, 0x32E, 0x2FC, 0x2D0, 0x2A8, 0x283,
    0x261, 0x243, 0x226, 0x20B,
];

/// Hardware-accurate single precision reciprocal estimate
pub fn estimate_reciprocal(value: f32) -> f32 {
    let bits = value.to_bits();
    let sign = bits & 0x8000_0000;
    let mut exponent = ((bits >> 23) & 0xFF) as i32;
    let mut mantissa = bits & 0x007F_FFFF;

    if exponent == 0xFF {
        return if mantissa == 0 {
            f32::from_bits(sign)
        } else {
            f32::from_bits(bits | 0x0040_0000)
        };
    }

    if exponent == 0 {
        if mantissa == 0 {
            return f32::from_bits(sign | f32::INFINITY.to_bits());
        } else if mantissa < 0x20_0000 {
            return f32::from_bits(sign | f32::MAX.to_bits());
        } else if mantissa < 0x40_0000 {
            exponent = -1;
            mantissa = (mantissa << 2) & 0x7F_FFFF;
        } else {
            mantissa = (mantissa << 1) & 0x7F_FFFF;
        }
    }

    let mut new_exponent = 253 - exponent;
    let index = (mantissa >> 18) as usize;
    let delta_mult = (mantissa >> 8) & 0x3FF;
    let lookup = (FRES_BASE[index] << 10) - FRES_DELTA[index] * delta_mult;
    let mut new_mantissa = lookup >> 1;

    if new_exponent <= 0 {
        new_mantissa = (new_mantissa >> 1) | 0x40_0000;
        if new_exponent < 0 {
            new_mantissa >>= 1;
            new_exponent = 0;
        }
    }

    f32::from_bits(sign | ((new_exponent as u32) << 23) | (new_mantissa & 0x7F_FFFF))
}

/// Hardware-accurate reciprocal square root estimate
pub fn estimate_reciprocal_root(value: f64) -> f64 {
    let bits = value.to_bits();
    let negative = bits >> 63 != 0;
    let mut exponent = ((bits >> 52) & 0x7FF) as i64;
    let mut mantissa = bits & 0x000F_FFFF_FFFF_FFFF;

    if exponent == 0x7FF {
        return if mantissa == 0 {
            if negative {
                f64::from_bits(DEFAULT_NAN)
            } else {
                0.0
            }
        } else {
            make_quiet(value)
        };
    }

    if exponent == 0 {
        if mantissa == 0 {
            return if negative { f64::NEG_INFINITY } else { f64::INFINITY };
        }
        let shift = mantissa.leading_zeros() as i64 - 11;
        mantissa = (mantissa << shift) & 0x000F_FFFF_FFFF_FFFF;
        exponent -= shift - 1;
    }

    if negative {
        return f64::from_bits(DEFAULT_NAN);
    }

    let new_exponent = ((3068 - exponent) / 2) as u64;
    let index = (((mantissa >> 48) & 15) | if exponent & 1 != 0 { 0 } else { 16 }) as usize;
    let delta_mult = (mantissa >> 37) & 0x7FF;
    let lookup = (FRSQRTE_BASE[index] << 11) - FRSQRTE_DELTA[index] * delta_mult;
    let new_mantissa = (lookup << 26) & 0x000F_FFFF_FFFF_FFFF;

    f64::from_bits((new_exponent << 52) | new_mantissa)
}

fn arith(ctx: &mut ThreadContext, instr: Instruction, op: ArithOp, single: bool) -> Result {
    let a = ctx.fpr[instr.fra()].f64();
    // fmul and fmuls take their second operand from frC
    let b = if op == ArithOp::Mul {
        ctx.fpr[instr.frc()].f64()
    } else {
        ctx.fpr[instr.frb()].f64()
    };
    if let Some(d) = arith_result(ctx, op, a, b, single) {
        write_result(ctx, instr.frd(), d, single);
    }
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn fadd(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Add, false)
}

pub fn fadds(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Add, true)
}

pub fn fsub(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Sub, false)
}

pub fn fsubs(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Sub, true)
}

pub fn fmul(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Mul, false)
}

pub fn fmuls(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Mul, true)
}

pub fn fdiv(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Div, false)
}

pub fn fdivs(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    arith(ctx, instr, ArithOp::Div, true)
}

fn fma(ctx: &mut ThreadContext, instr: Instruction, subtract: bool, negate: bool, single: bool) -> Result {
    let a = ctx.fpr[instr.fra()].f64();
    let b = ctx.fpr[instr.frb()].f64();
    let c = ctx.fpr[instr.frc()].f64();
    if let Some(d) = fma_result(ctx, a, b, c, subtract, negate, single) {
        write_result(ctx, instr.frd(), d, single);
    }
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn fmadd(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    fma(ctx, instr, false, false, false)
}

pub fn fmadds(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    fma(ctx, instr, false, false, true)
}

pub fn fmsub(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    fma(ctx, instr, true, false, false)
}

pub fn fmsubs(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    fma(ctx, instr, true, false, true)
}

pub fn fnmadd(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    fma(ctx, instr, false, true, false)
}

pub fn fnmadds(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    fma(ctx, instr, false, true, true)
}

pub fn fnmsub(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    fma(ctx, instr, true, true, false)
}

pub fn fnmsubs(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    fma(ctx, instr, true, true, true)
}

pub fn fres(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let b = ctx.fpr[instr.frb()].f64();
    let vxsnan = is_signalling_nan(b);
    let zx = b == 0.0;

    if vxsnan && ctx.fpscr & fpscr::VE != 0 {
        raise(ctx, fpscr::VXSNAN);
    } else if zx && ctx.fpscr & fpscr::ZE != 0 {
        raise(ctx, fpscr::ZX);
    } else {
        let d = estimate_reciprocal(b as f32) as f64;
        write_result(ctx, instr.frd(), d, true);
        let mut raised = if zx { fpscr::ZX } else { 0 };
        if vxsnan {
            raised |= fpscr::VXSNAN;
        }
        raise(ctx, raised);
        update_fprf(ctx, d, true);
    }
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn frsqrte(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let b = ctx.fpr[instr.frb()].f64();
    let vxsnan = is_signalling_nan(b);
    let vxsqrt = !vxsnan && b < 0.0;
    let zx = b == 0.0;

    let mut raised = 0;
    if vxsnan {
        raised |= fpscr::VXSNAN;
    }
    if vxsqrt {
        raised |= fpscr::VXSQRT;
    }

    if (vxsnan || vxsqrt) && ctx.fpscr & fpscr::VE != 0 {
        raise(ctx, raised);
    } else if zx && ctx.fpscr & fpscr::ZE != 0 {
        raise(ctx, raised | fpscr::ZX);
    } else {
        let d = estimate_reciprocal_root(b);
        ctx.fpr[instr.frd()].set_f64(d);
        if zx {
            raised |= fpscr::ZX;
        }
        raise(ctx, raised);
        update_fprf(ctx, d, false);
    }
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn fsel(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let a = ctx.fpr[instr.fra()].f64();
    let d = if a >= 0.0 {
        ctx.fpr[instr.frc()].ps0
    } else {
        ctx.fpr[instr.frb()].ps0
    };
    ctx.fpr[instr.frd()].ps0 = d;
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

/// Convert to a 32-bit integer using the given FPSCR rounding mode
fn fctiw_generic(ctx: &mut ThreadContext, instr: Instruction, round_mode: u32) -> Result {
    let b = ctx.fpr[instr.frb()].f64();
    let vxsnan = is_signalling_nan(b);

    let (bi, vxcvi, inexact) = if b.is_nan() {
        (i32::MIN, true, false)
    } else if b > i32::MAX as f64 {
        (i32::MAX, true, false)
    } else if b < i32::MIN as f64 {
        (i32::MIN, true, false)
    } else {
        let rounded = match round_mode {
            0 => b.round_ties_even(),
            1 => b.trunc(),
            2 => b.ceil(),
            _ => b.floor(),
        };
        // Rounding up can still leave the i32 range
        let bi = rounded.clamp(i32::MIN as f64, i32::MAX as f64) as i32;
        (bi, false, bi as f64 != b)
    };

    let mut raised = 0;
    if vxsnan {
        raised |= fpscr::VXSNAN;
    }
    if vxcvi {
        raised |= fpscr::VXCVI;
    }

    if (vxsnan || vxcvi) && ctx.fpscr & fpscr::VE != 0 {
        ctx.fpscr &= !(fpscr::FR | fpscr::FI);
        raise(ctx, raised);
    } else {
        let negative_zero = b == 0.0 && b.is_sign_negative();
        let high = 0xFFF8_0000u64 | negative_zero as u64;
        ctx.fpr[instr.frd()].ps0 = (high << 32) | bi as u32 as u64;
        ctx.fpscr &= !(fpscr::FR | fpscr::FI);
        if inexact {
            ctx.fpscr |= fpscr::FI;
            raised |= fpscr::XX;
        }
        raise(ctx, raised);
        // FPRF is undefined after fctiw; hardware leaves it alone
    }
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn fctiw(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let mode = ctx.fpscr & fpscr::RN;
    fctiw_generic(ctx, instr, mode)
}

pub fn fctiwz(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    fctiw_generic(ctx, instr, 1)
}

pub fn frsp(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let b = ctx.fpr[instr.frb()].f64();
    let vxsnan = is_signalling_nan(b);

    if vxsnan && ctx.fpscr & fpscr::VE != 0 {
        raise(ctx, fpscr::VXSNAN);
    } else {
        let d = if b.is_nan() {
            round_to_single(make_quiet(b))
        } else {
            round_to_single(b)
        };
        write_result(ctx, instr.frd(), d, true);
        let mut raised = if vxsnan { fpscr::VXSNAN } else { 0 };
        if !d.is_nan() {
            raised |= range_exceptions(d, true, b.is_finite());
        }
        ctx.fpscr &= !(fpscr::FR | fpscr::FI);
        if !b.is_nan() && d != b {
            ctx.fpscr |= fpscr::FI;
            raised |= fpscr::XX;
        }
        raise(ctx, raised);
        update_fprf(ctx, d, true);
    }
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

const SIGN_BIT: u64 = 1 << 63;

pub fn fabs(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.fpr[instr.frd()].ps0 = ctx.fpr[instr.frb()].ps0 & !SIGN_BIT;
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn fnabs(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.fpr[instr.frd()].ps0 = ctx.fpr[instr.frb()].ps0 | SIGN_BIT;
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn fneg(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.fpr[instr.frd()].ps0 = ctx.fpr[instr.frb()].ps0 ^ SIGN_BIT;
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn fmr(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.fpr[instr.frd()].ps0 = ctx.fpr[instr.frb()].ps0;
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn mffs(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let frd = instr.frd();
    ctx.fpr[frd].ps0 = (ctx.fpr[frd].ps0 & 0xFFFF_FFFF_0000_0000) | ctx.fpscr as u64;
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn mtfsb0(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    ctx.fpscr &= !(1 << (31 - instr.crbd()));
    update_fex_vx(ctx);
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn mtfsb1(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let old = ctx.fpscr;
    ctx.fpscr |= 1 << (31 - instr.crbd());
    update_fx_fex_vx(ctx, old);
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn mtfsf(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let fm = instr.get(crate::decoder::Field::Fm);
    let mask = (0..8)
        .filter(|field| fm & (1 << field) != 0)
        .fold(0u32, |mask, field| mask | (0xF << (4 * field)));
    let value = ctx.fpr[instr.frb()].ps0 as u32;
    ctx.fpscr = (ctx.fpscr & !mask) | (value & mask);
    update_fex_vx(ctx);
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}

pub fn mtfsfi(ctx: &mut ThreadContext, _: &ExecEnv<'_>, instr: Instruction) -> Result {
    let shift = 4 * (7 - instr.crfd());
    let imm = instr.get(crate::decoder::Field::Imm);
    ctx.fpscr = (ctx.fpscr & !(0xF << shift)) | (imm << shift);
    update_fex_vx(ctx);
    if instr.rc() {
        ctx.update_cr1();
    }
    Ok(Flow::Continue)
}
