//! Integer compare and condition register generators

use super::{op, Op, OpExit};
use crate::decoder::{Instruction, OperationId};
use crate::interpreter::condition::{compare_flags, crm_mask};

fn compare_signed(instr: Instruction, immediate: Option<i32>) -> Op {
    let (crfd, ra, rb) = (instr.crfd(), instr.ra(), instr.rb());
    op(move |ctx, _| {
        let a = ctx.gpr[ra] as i32;
        let b = immediate.unwrap_or(ctx.gpr[rb] as i32);
        ctx.set_cr_field(crfd, compare_flags(ctx, a, b));
        Ok(OpExit::Next)
    })
}

fn compare_unsigned(instr: Instruction, immediate: Option<u32>) -> Op {
    let (crfd, ra, rb) = (instr.crfd(), instr.ra(), instr.rb());
    op(move |ctx, _| {
        let a = ctx.gpr[ra];
        let b = immediate.unwrap_or(ctx.gpr[rb]);
        ctx.set_cr_field(crfd, compare_flags(ctx, a, b));
        Ok(OpExit::Next)
    })
}

fn cr_logical(instr: Instruction, f: fn(bool, bool) -> bool) -> Op {
    let (crbd, crba, crbb) = (instr.crbd(), instr.crba(), instr.crbb());
    op(move |ctx, _| {
        let value = f(ctx.cr_bit(crba), ctx.cr_bit(crbb));
        ctx.set_cr_bit(crbd, value);
        Ok(OpExit::Next)
    })
}

pub fn emit(id: OperationId, instr: Instruction) -> Option<Op> {
    use OperationId::*;

    Some(match id {
        Cmp => compare_signed(instr, None),
        Cmpi => compare_signed(instr, Some(instr.simm() as i32)),
        Cmpl => compare_unsigned(instr, None),
        Cmpli => compare_unsigned(instr, Some(instr.uimm())),

        Crand => cr_logical(instr, |a, b| a & b),
        Crandc => cr_logical(instr, |a, b| a & !b),
        Creqv => cr_logical(instr, |a, b| a == b),
        Crnand => cr_logical(instr, |a, b| !(a & b)),
        Crnor => cr_logical(instr, |a, b| !(a | b)),
        Cror => cr_logical(instr, |a, b| a | b),
        Crorc => cr_logical(instr, |a, b| a | !b),
        Crxor => cr_logical(instr, |a, b| a ^ b),

        Mcrf => {
            let (crfd, crfs) = (instr.crfd(), instr.crfs());
            op(move |ctx, _| {
                let value = ctx.cr_field(crfs);
                ctx.set_cr_field(crfd, value);
                Ok(OpExit::Next)
            })
        }
        Mcrxr => {
            let crfd = instr.crfd();
            op(move |ctx, _| {
                ctx.set_cr_field(crfd, ctx.xer >> 28);
                ctx.xer &= 0x0FFF_FFFF;
                Ok(OpExit::Next)
            })
        }
        Mfcr => {
            let rd = instr.rd();
            op(move |ctx, _| {
                ctx.gpr[rd] = ctx.cr;
                Ok(OpExit::Next)
            })
        }
        Mtcrf => {
            let (rs, mask) = (instr.rs(), crm_mask(instr.crm()));
            op(move |ctx, _| {
                ctx.cr = (ctx.cr & !mask) | (ctx.gpr[rs] & mask);
                Ok(OpExit::Next)
            })
        }

        _ => return None,
    })
}
