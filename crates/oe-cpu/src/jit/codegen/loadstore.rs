//! Integer load and store generators

use oe_core::endian::GuestValue;
use oe_memory::Address;

use super::{op, Op, OpExit};
use crate::context::ThreadContext;
use crate::decoder::{Instruction, OperationId};

/// Effective address computation with operands resolved
#[derive(Debug, Clone, Copy)]
enum Ea {
    /// `d`, rA is r0
    Absolute(u32),
    /// `rA + d`
    Displacement(usize, u32),
    /// `rB`, rA is r0
    Register(usize),
    /// `rA + rB`
    Indexed(usize, usize),
}

impl Ea {
    fn displacement(instr: Instruction, update: bool) -> Self {
        match instr.ra() {
            0 if !update => Ea::Absolute(instr.d()),
            ra => Ea::Displacement(ra, instr.d()),
        }
    }

    fn indexed(instr: Instruction, update: bool) -> Self {
        match instr.ra() {
            0 if !update => Ea::Register(instr.rb()),
            ra => Ea::Indexed(ra, instr.rb()),
        }
    }

    #[inline]
    fn compute(self, ctx: &ThreadContext) -> u32 {
        match self {
            Ea::Absolute(d) => d,
            Ea::Displacement(ra, d) => ctx.gpr[ra].wrapping_add(d),
            Ea::Register(rb) => ctx.gpr[rb],
            Ea::Indexed(ra, rb) => ctx.gpr[ra].wrapping_add(ctx.gpr[rb]),
        }
    }
}

fn load<T: GuestValue>(instr: Instruction, ea: Ea, update: bool, extend: fn(T) -> u32) -> Op {
    let (rd, ra) = (instr.rd(), instr.ra());
    op(move |ctx, env| {
        let address = ea.compute(ctx);
        let value: T = env.memory.read(Address(address))?;
        ctx.gpr[rd] = extend(value);
        if update {
            ctx.gpr[ra] = address;
        }
        Ok(OpExit::Next)
    })
}

fn store<T: GuestValue>(instr: Instruction, ea: Ea, update: bool, truncate: fn(u32) -> T) -> Op {
    let (rs, ra) = (instr.rs(), instr.ra());
    op(move |ctx, env| {
        let address = ea.compute(ctx);
        env.memory.write(Address(address), truncate(ctx.gpr[rs]))?;
        if update {
            ctx.gpr[ra] = address;
        }
        Ok(OpExit::Next)
    })
}

pub fn emit(id: OperationId, instr: Instruction) -> Option<Op> {
    use OperationId::*;

    let d = |update| Ea::displacement(instr, update);
    let x = |update| Ea::indexed(instr, update);

    Some(match id {
        Lbz => load::<u8>(instr, d(false), false, |v| v as u32),
        Lbzu => load::<u8>(instr, d(true), true, |v| v as u32),
        Lbzx => load::<u8>(instr, x(false), false, |v| v as u32),
        Lbzux => load::<u8>(instr, x(true), true, |v| v as u32),
        Lha => load::<i16>(instr, d(false), false, |v| v as i32 as u32),
        Lhau => load::<i16>(instr, d(true), true, |v| v as i32 as u32),
        Lhax => load::<i16>(instr, x(false), false, |v| v as i32 as u32),
        Lhaux => load::<i16>(instr, x(true), true, |v| v as i32 as u32),
        Lhz => load::<u16>(instr, d(false), false, |v| v as u32),
        Lhzu => load::<u16>(instr, d(true), true, |v| v as u32),
        Lhzx => load::<u16>(instr, x(false), false, |v| v as u32),
        Lhzux => load::<u16>(instr, x(true), true, |v| v as u32),
        Lwz => load::<u32>(instr, d(false), false, |v| v),
        Lwzu => load::<u32>(instr, d(true), true, |v| v),
        Lwzx => load::<u32>(instr, x(false), false, |v| v),
        Lwzux => load::<u32>(instr, x(true), true, |v| v),
        Lhbrx => load::<u16>(instr, x(false), false, |v| v.swap_bytes() as u32),
        Lwbrx => load::<u32>(instr, x(false), false, |v| v.swap_bytes()),

        Stb => store::<u8>(instr, d(false), false, |v| v as u8),
        Stbu => store::<u8>(instr, d(true), true, |v| v as u8),
        Stbx => store::<u8>(instr, x(false), false, |v| v as u8),
        Stbux => store::<u8>(instr, x(true), true, |v| v as u8),
        Sth => store::<u16>(instr, d(false), false, |v| v as u16),
        Sthu => store::<u16>(instr, d(true), true, |v| v as u16),
        Sthx => store::<u16>(instr, x(false), false, |v| v as u16),
        Sthux => store::<u16>(instr, x(true), true, |v| v as u16),
        Stw => store::<u32>(instr, d(false), false, |v| v),
        Stwu => store::<u32>(instr, d(true), true, |v| v),
        Stwx => store::<u32>(instr, x(false), false, |v| v),
        Stwux => store::<u32>(instr, x(true), true, |v| v),
        Sthbrx => store::<u16>(instr, x(false), false, |v| (v as u16).swap_bytes()),
        Stwbrx => store::<u32>(instr, x(false), false, |v| v.swap_bytes()),

        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{Decoder, Field};

    #[test]
    fn test_r0_base_folds_to_absolute() {
        let decoder = Decoder::new();
        let lwz = decoder.encode(OperationId::Lwz).with(Field::Ra, 0).with(Field::D, 0xFFF0);
        assert!(matches!(Ea::displacement(lwz, false), Ea::Absolute(0xFFFF_FFF0)));

        let lwzu = lwz.with(Field::Ra, 0);
        assert!(matches!(Ea::displacement(lwzu, true), Ea::Displacement(0, _)));

        let lwzx = decoder.encode(OperationId::Lwzx).with(Field::Ra, 0).with(Field::Rb, 4);
        assert!(matches!(Ea::indexed(lwzx, false), Ea::Register(4)));
    }
}
