//! Kernel call, special register and synchronization generators

use super::{op, Op, OpExit};
use crate::context::spr;
use crate::decoder::{Instruction, OperationId};
use crate::interpreter::{system, Flow};

pub fn emit(id: OperationId, instr: Instruction) -> Option<Op> {
    use OperationId::*;

    Some(match id {
        // The handler may redirect NIA, so the block always ends here
        Kc => op(move |ctx, env| {
            Ok(match system::kc(ctx, env, instr)? {
                Flow::Continue => OpExit::Exit,
                Flow::Yield => OpExit::Yield,
            })
        }),
        Rfi => op(|ctx, _| {
            ctx.msr = ctx.srr1;
            ctx.nia = ctx.srr0 & !3;
            Ok(OpExit::Exit)
        }),

        Mfspr => {
            let rd = instr.rd();
            match instr.spr() {
                spr::LR => op(move |ctx, _| {
                    ctx.gpr[rd] = ctx.lr;
                    Ok(OpExit::Next)
                }),
                spr::CTR => op(move |ctx, _| {
                    ctx.gpr[rd] = ctx.ctr;
                    Ok(OpExit::Next)
                }),
                spr::XER => op(move |ctx, _| {
                    ctx.gpr[rd] = ctx.xer;
                    Ok(OpExit::Next)
                }),
                _ => return None,
            }
        }
        Mtspr => {
            let rs = instr.rs();
            match instr.spr() {
                spr::LR => op(move |ctx, _| {
                    ctx.lr = ctx.gpr[rs];
                    Ok(OpExit::Next)
                }),
                spr::CTR => op(move |ctx, _| {
                    ctx.ctr = ctx.gpr[rs];
                    Ok(OpExit::Next)
                }),
                spr::XER => op(move |ctx, _| {
                    ctx.xer = ctx.gpr[rs];
                    Ok(OpExit::Next)
                }),
                _ => return None,
            }
        }

        Eieio | Isync | Sync | Dcbf | Dcbi | Dcbst | Dcbt | Dcbtst | Icbi | Tlbie | Tlbsync => {
            op(|_, _| Ok(OpExit::Next))
        }

        _ => return None,
    })
}
