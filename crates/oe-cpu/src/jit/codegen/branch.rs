//! Branch generators
//!
//! Targets known at compile time that land inside the block become local
//! jumps; everything else sets NIA and leaves the block.

use super::{op, BlockLayout, Op, OpExit};
use crate::decoder::{Instruction, OperationId};
use crate::interpreter::branch::{branch_taken, condition_ok, BO_NO_COND, BO_NO_CTR};

/// Whether execution can never fall through past this instruction
pub fn ends_block(id: OperationId, instr: Instruction) -> bool {
    let always = |bo: u32, uses_ctr: bool| bo & BO_NO_COND != 0 && (!uses_ctr || bo & BO_NO_CTR != 0);
    match id {
        OperationId::B | OperationId::Rfi | OperationId::Kc => true,
        OperationId::Bc | OperationId::Bclr => always(instr.bo(), true),
        OperationId::Bcctr => always(instr.bo(), false),
        _ => false,
    }
}

/// How a taken branch to a static target leaves the instruction
#[inline]
fn static_exit(label: Option<usize>) -> OpExit {
    match label {
        Some(index) => OpExit::Jump(index),
        None => OpExit::Exit,
    }
}

pub fn emit(id: OperationId, instr: Instruction, address: u32, layout: &BlockLayout) -> Option<Op> {
    let link = instr.lk().then_some(address.wrapping_add(4));

    Some(match id {
        OperationId::B => {
            let target = if instr.aa() {
                instr.li()
            } else {
                address.wrapping_add(instr.li())
            };
            let exit = static_exit(layout.label(target));
            op(move |ctx, _| {
                if let Some(lr) = link {
                    ctx.lr = lr;
                }
                ctx.nia = target;
                Ok(exit)
            })
        }
        OperationId::Bc => {
            let (bo, bi) = (instr.bo(), instr.bi());
            let target = if instr.aa() {
                instr.bd()
            } else {
                address.wrapping_add(instr.bd())
            };
            let exit = static_exit(layout.label(target));
            op(move |ctx, _| {
                let taken = branch_taken(ctx, bo, bi);
                if let Some(lr) = link {
                    ctx.lr = lr;
                }
                if taken {
                    ctx.nia = target;
                    Ok(exit)
                } else {
                    Ok(OpExit::Next)
                }
            })
        }
        OperationId::Bclr => {
            let (bo, bi) = (instr.bo(), instr.bi());
            op(move |ctx, _| {
                let target = ctx.lr & !3;
                let taken = branch_taken(ctx, bo, bi);
                if let Some(lr) = link {
                    ctx.lr = lr;
                }
                if taken {
                    ctx.nia = target;
                    Ok(OpExit::Exit)
                } else {
                    Ok(OpExit::Next)
                }
            })
        }
        OperationId::Bcctr => {
            let (bo, bi) = (instr.bo(), instr.bi());
            op(move |ctx, _| {
                let taken = condition_ok(ctx, bo, bi);
                if let Some(lr) = link {
                    ctx.lr = lr;
                }
                if taken {
                    ctx.nia = ctx.ctr & !3;
                    Ok(OpExit::Exit)
                } else {
                    Ok(OpExit::Next)
                }
            })
        }
        _ => return None,
    })
}
