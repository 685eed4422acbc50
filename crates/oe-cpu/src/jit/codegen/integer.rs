//! Integer arithmetic, logical, rotate and shift generators

use oe_core::bits::ppc_mask;

use super::{op, Op, OpExit};
use crate::decoder::{Instruction, OperationId};
use crate::interpreter::integer::{add_with_carry, shift_right_algebraic};

/// Second operand of an XO-form add
#[derive(Clone, Copy)]
enum Addend {
    Rb,
    Zero,
    AllOnes,
}

/// Carry into an XO-form add
#[derive(Clone, Copy)]
enum CarryIn {
    Clear,
    Set,
    Xer,
}

/// `rD = (!)rA + addend + carry`, the shape shared by every add and subtract
fn add_form(instr: Instruction, complement_a: bool, addend: Addend, carry_in: CarryIn, writes_ca: bool) -> Op {
    let (rd, ra, rb) = (instr.rd(), instr.ra(), instr.rb());
    let (oe, rc) = (instr.oe(), instr.rc());
    op(move |ctx, _| {
        let a = if complement_a { !ctx.gpr[ra] } else { ctx.gpr[ra] };
        let b = match addend {
            Addend::Rb => ctx.gpr[rb],
            Addend::Zero => 0,
            Addend::AllOnes => u32::MAX,
        };
        let carry = match carry_in {
            CarryIn::Clear => false,
            CarryIn::Set => true,
            CarryIn::Xer => ctx.xer_ca(),
        };
        let (d, ca, ov) = add_with_carry(a, b, carry);
        ctx.gpr[rd] = d;
        if writes_ca {
            ctx.set_xer_ca(ca);
        }
        if oe {
            ctx.set_xer_ov(ov);
        }
        if rc {
            ctx.update_cr0(d);
        }
        Ok(OpExit::Next)
    })
}

/// XO-form result computed from rA and rB, returning (value, overflow)
fn binary_form(instr: Instruction, f: fn(u32, u32) -> (u32, bool)) -> Op {
    let (rd, ra, rb) = (instr.rd(), instr.ra(), instr.rb());
    let (oe, rc) = (instr.oe(), instr.rc());
    op(move |ctx, _| {
        let (d, ov) = f(ctx.gpr[ra], ctx.gpr[rb]);
        ctx.gpr[rd] = d;
        if oe {
            ctx.set_xer_ov(ov);
        }
        if rc {
            ctx.update_cr0(d);
        }
        Ok(OpExit::Next)
    })
}

/// X-form logical `rA = f(rS, rB)`
fn logical_form(instr: Instruction, f: fn(u32, u32) -> u32) -> Op {
    let (ra, rs, rb, rc) = (instr.ra(), instr.rs(), instr.rb(), instr.rc());
    op(move |ctx, _| {
        let a = f(ctx.gpr[rs], ctx.gpr[rb]);
        ctx.gpr[ra] = a;
        if rc {
            ctx.update_cr0(a);
        }
        Ok(OpExit::Next)
    })
}

/// D-form logical `rA = f(rS, imm)`, optionally recording into cr0
fn immediate_logical(instr: Instruction, imm: u32, record: bool, f: fn(u32, u32) -> u32) -> Op {
    let (ra, rs) = (instr.ra(), instr.rs());
    op(move |ctx, _| {
        let a = f(ctx.gpr[rs], imm);
        ctx.gpr[ra] = a;
        if record {
            ctx.update_cr0(a);
        }
        Ok(OpExit::Next)
    })
}

/// `rD = (rA|0) + imm`, with r0 folded at compile time
fn add_immediate(instr: Instruction, imm: u32) -> Op {
    let (rd, ra) = (instr.rd(), instr.ra());
    if ra == 0 {
        op(move |ctx, _| {
            ctx.gpr[rd] = imm;
            Ok(OpExit::Next)
        })
    } else {
        op(move |ctx, _| {
            ctx.gpr[rd] = ctx.gpr[ra].wrapping_add(imm);
            Ok(OpExit::Next)
        })
    }
}

/// `addic`, `addic.` and `subfic`
fn add_immediate_carrying(instr: Instruction, complement_a: bool, record: bool) -> Op {
    let (rd, ra, simm) = (instr.rd(), instr.ra(), instr.simm());
    op(move |ctx, _| {
        let a = if complement_a { !ctx.gpr[ra] } else { ctx.gpr[ra] };
        let (d, ca, _) = add_with_carry(a, simm, complement_a);
        ctx.gpr[rd] = d;
        ctx.set_xer_ca(ca);
        if record {
            ctx.update_cr0(d);
        }
        Ok(OpExit::Next)
    })
}

fn mulhw(a: u32, b: u32) -> (u32, bool) {
    (((a as i32 as i64 * b as i32 as i64) >> 32) as u32, false)
}

fn mulhwu(a: u32, b: u32) -> (u32, bool) {
    (((a as u64 * b as u64) >> 32) as u32, false)
}

fn mullw(a: u32, b: u32) -> (u32, bool) {
    let product = a as i32 as i64 * b as i32 as i64;
    (product as u32, product < i32::MIN as i64 || product > i32::MAX as i64)
}

fn divw(a: u32, b: u32) -> (u32, bool) {
    let (a, b) = (a as i32, b as i32);
    if b == 0 || (a == i32::MIN && b == -1) {
        (if a < 0 { u32::MAX } else { 0 }, true)
    } else {
        ((a / b) as u32, false)
    }
}

fn divwu(a: u32, b: u32) -> (u32, bool) {
    match a.checked_div(b) {
        Some(d) => (d, false),
        None => (0, true),
    }
}

fn slw(s: u32, n: u32) -> u32 {
    let n = n & 0x3F;
    if n & 0x20 != 0 {
        0
    } else {
        s << n
    }
}

fn srw(s: u32, n: u32) -> u32 {
    let n = n & 0x3F;
    if n & 0x20 != 0 {
        0
    } else {
        s >> n
    }
}

/// Algebraic shifts, `amount` is `None` for the register form
fn shift_algebraic(instr: Instruction, amount: Option<u32>) -> Op {
    let (ra, rs, rb, rc) = (instr.ra(), instr.rs(), instr.rb(), instr.rc());
    op(move |ctx, _| {
        let n = amount.unwrap_or(ctx.gpr[rb] & 0x3F);
        let (a, ca) = shift_right_algebraic(ctx.gpr[rs], n);
        ctx.set_xer_ca(ca);
        ctx.gpr[ra] = a;
        if rc {
            ctx.update_cr0(a);
        }
        Ok(OpExit::Next)
    })
}

fn rotate(instr: Instruction, insert: bool, by_register: bool) -> Op {
    let (ra, rs, rb, rc) = (instr.ra(), instr.rs(), instr.rb(), instr.rc());
    let sh = instr.sh();
    let mask = ppc_mask(instr.mb(), instr.me());
    op(move |ctx, _| {
        let n = if by_register { ctx.gpr[rb] & 0x1F } else { sh };
        let r = ctx.gpr[rs].rotate_left(n) & mask;
        let a = if insert { r | (ctx.gpr[ra] & !mask) } else { r };
        ctx.gpr[ra] = a;
        if rc {
            ctx.update_cr0(a);
        }
        Ok(OpExit::Next)
    })
}

pub fn emit(id: OperationId, instr: Instruction) -> Option<Op> {
    use OperationId::*;

    Some(match id {
        Add => add_form(instr, false, Addend::Rb, CarryIn::Clear, false),
        Addc => add_form(instr, false, Addend::Rb, CarryIn::Clear, true),
        Adde => add_form(instr, false, Addend::Rb, CarryIn::Xer, true),
        Addme => add_form(instr, false, Addend::AllOnes, CarryIn::Xer, true),
        Addze => add_form(instr, false, Addend::Zero, CarryIn::Xer, true),
        Subf => add_form(instr, true, Addend::Rb, CarryIn::Set, false),
        Subfc => add_form(instr, true, Addend::Rb, CarryIn::Set, true),
        Subfe => add_form(instr, true, Addend::Rb, CarryIn::Xer, true),
        Subfme => add_form(instr, true, Addend::AllOnes, CarryIn::Xer, true),
        Subfze => add_form(instr, true, Addend::Zero, CarryIn::Xer, true),
        Neg => add_form(instr, true, Addend::Zero, CarryIn::Set, false),

        Addi => add_immediate(instr, instr.simm()),
        Addis => add_immediate(instr, instr.simm() << 16),
        Addic => add_immediate_carrying(instr, false, false),
        AddicRc => add_immediate_carrying(instr, false, true),
        Subfic => add_immediate_carrying(instr, true, false),
        Mulli => {
            let (rd, ra, simm) = (instr.rd(), instr.ra(), instr.simm() as i32);
            op(move |ctx, _| {
                ctx.gpr[rd] = (ctx.gpr[ra] as i32).wrapping_mul(simm) as u32;
                Ok(OpExit::Next)
            })
        }

        Mulhw => binary_form(instr, mulhw),
        Mulhwu => binary_form(instr, mulhwu),
        Mullw => binary_form(instr, mullw),
        Divw => binary_form(instr, divw),
        Divwu => binary_form(instr, divwu),

        And => logical_form(instr, |s, b| s & b),
        Andc => logical_form(instr, |s, b| s & !b),
        Eqv => logical_form(instr, |s, b| !(s ^ b)),
        Nand => logical_form(instr, |s, b| !(s & b)),
        Nor => logical_form(instr, |s, b| !(s | b)),
        Or => logical_form(instr, |s, b| s | b),
        Orc => logical_form(instr, |s, b| s | !b),
        Xor => logical_form(instr, |s, b| s ^ b),
        Slw => logical_form(instr, slw),
        Srw => logical_form(instr, srw),
        Cntlzw => logical_form(instr, |s, _| s.leading_zeros()),
        Extsb => logical_form(instr, |s, _| s as u8 as i8 as i32 as u32),
        Extsh => logical_form(instr, |s, _| s as u16 as i16 as i32 as u32),

        AndiRc => immediate_logical(instr, instr.uimm(), true, |s, i| s & i),
        AndisRc => immediate_logical(instr, instr.uimm() << 16, true, |s, i| s & i),
        Ori => immediate_logical(instr, instr.uimm(), false, |s, i| s | i),
        Oris => immediate_logical(instr, instr.uimm() << 16, false, |s, i| s | i),
        Xori => immediate_logical(instr, instr.uimm(), false, |s, i| s ^ i),
        Xoris => immediate_logical(instr, instr.uimm() << 16, false, |s, i| s ^ i),

        Rlwimi => rotate(instr, true, false),
        Rlwinm => rotate(instr, false, false),
        Rlwnm => rotate(instr, false, true),
        Sraw => shift_algebraic(instr, None),
        Srawi => shift_algebraic(instr, Some(instr.sh())),

        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divide_edge_cases() {
        assert_eq!(divw(7, 0), (0, true));
        assert_eq!(divw((-7i32) as u32, 0), (u32::MAX, true));
        assert_eq!(divw(0x8000_0000, u32::MAX), (u32::MAX, true));
        assert_eq!(divw((-9i32) as u32, 2), ((-4i32) as u32, false));
        assert_eq!(divwu(9, 0), (0, true));
    }

    #[test]
    fn test_shifts_past_width() {
        assert_eq!(slw(1, 31), 0x8000_0000);
        assert_eq!(slw(1, 32), 0);
        assert_eq!(srw(0x8000_0000, 63), 0);
        assert_eq!(srw(0x8000_0000, 64 + 4), 0x0800_0000);
    }

    #[test]
    fn test_multiply_high() {
        assert_eq!(mulhw(u32::MAX, u32::MAX), (0, false));
        assert_eq!(mulhwu(u32::MAX, u32::MAX), (0xFFFF_FFFE, false));
        assert_eq!(mullw(0x1_0000, 0x1_0000), (0, true));
    }
}
