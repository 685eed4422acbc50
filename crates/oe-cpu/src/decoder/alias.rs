//! Simplified mnemonics used for disassembly
//!
//! Aliases never take part in decoding. After an instruction has been
//! classified, the alias table is scanned for an entry of the same operation
//! whose conditions all hold.

use super::field::{Field, Instruction};
use super::table::OperationId;

/// One condition an alias places on the instruction's fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasCondition {
    /// Field holds a constant
    Equals(Field, u32),
    /// Two fields hold the same value
    SameAs(Field, Field),
    /// Two fields add up to a constant
    SumEquals(Field, Field, u32),
}

impl AliasCondition {
    fn value(field: Field, instr: Instruction) -> u32 {
        match field {
            Field::Spr => instr.spr(),
            Field::Tbr => instr.tbr(),
            _ => instr.get(field),
        }
    }

    /// Whether the condition holds for `instr`
    pub fn holds(self, instr: Instruction) -> bool {
        match self {
            AliasCondition::Equals(field, value) => Self::value(field, instr) == value,
            AliasCondition::SameAs(a, b) => Self::value(a, instr) == Self::value(b, instr),
            AliasCondition::SumEquals(a, b, sum) => {
                Self::value(a, instr) + Self::value(b, instr) == sum
            }
        }
    }
}

/// A simplified mnemonic for one operation
#[derive(Debug, Clone, Copy)]
pub struct InstructionAlias {
    pub name: &'static str,
    pub op: OperationId,
    pub conditions: &'static [AliasCondition],
}

impl InstructionAlias {
    /// Whether `instr` (already decoded as `op`) may be shown as this alias
    pub fn matches(&self, op: OperationId, instr: Instruction) -> bool {
        self.op == op && self.conditions.iter().all(|c| c.holds(instr))
    }
}

use AliasCondition::{Equals, SameAs, SumEquals};

/// The alias table, most specific entries first
pub static ALIASES: &[InstructionAlias] = &[
    InstructionAlias {
        name: "nop",
        op: OperationId::Ori,
        conditions: &[Equals(Field::Ra, 0), Equals(Field::Rs, 0), Equals(Field::Uimm, 0)],
    },
    InstructionAlias { name: "li", op: OperationId::Addi, conditions: &[Equals(Field::Ra, 0)] },
    InstructionAlias { name: "lis", op: OperationId::Addis, conditions: &[Equals(Field::Ra, 0)] },
    InstructionAlias { name: "mr", op: OperationId::Or, conditions: &[SameAs(Field::Rs, Field::Rb)] },
    InstructionAlias { name: "not", op: OperationId::Nor, conditions: &[SameAs(Field::Rs, Field::Rb)] },
    InstructionAlias {
        name: "blr",
        op: OperationId::Bclr,
        conditions: &[Equals(Field::Bo, 20), Equals(Field::Bi, 0), Equals(Field::Lk, 0)],
    },
    InstructionAlias {
        name: "blrl",
        op: OperationId::Bclr,
        conditions: &[Equals(Field::Bo, 20), Equals(Field::Bi, 0), Equals(Field::Lk, 1)],
    },
    InstructionAlias {
        name: "bctr",
        op: OperationId::Bcctr,
        conditions: &[Equals(Field::Bo, 20), Equals(Field::Bi, 0), Equals(Field::Lk, 0)],
    },
    InstructionAlias {
        name: "bctrl",
        op: OperationId::Bcctr,
        conditions: &[Equals(Field::Bo, 20), Equals(Field::Bi, 0), Equals(Field::Lk, 1)],
    },
    InstructionAlias { name: "mflr", op: OperationId::Mfspr, conditions: &[Equals(Field::Spr, 8)] },
    InstructionAlias { name: "mtlr", op: OperationId::Mtspr, conditions: &[Equals(Field::Spr, 8)] },
    InstructionAlias { name: "mfctr", op: OperationId::Mfspr, conditions: &[Equals(Field::Spr, 9)] },
    InstructionAlias { name: "mtctr", op: OperationId::Mtspr, conditions: &[Equals(Field::Spr, 9)] },
    InstructionAlias { name: "mfxer", op: OperationId::Mfspr, conditions: &[Equals(Field::Spr, 1)] },
    InstructionAlias { name: "mtxer", op: OperationId::Mtspr, conditions: &[Equals(Field::Spr, 1)] },
    InstructionAlias { name: "cmpw", op: OperationId::Cmp, conditions: &[Equals(Field::L, 0)] },
    InstructionAlias { name: "cmpwi", op: OperationId::Cmpi, conditions: &[Equals(Field::L, 0)] },
    InstructionAlias { name: "cmplw", op: OperationId::Cmpl, conditions: &[Equals(Field::L, 0)] },
    InstructionAlias { name: "cmplwi", op: OperationId::Cmpli, conditions: &[Equals(Field::L, 0)] },
    InstructionAlias {
        name: "rotlwi",
        op: OperationId::Rlwinm,
        conditions: &[Equals(Field::Mb, 0), Equals(Field::Me, 31)],
    },
    InstructionAlias {
        name: "slwi",
        op: OperationId::Rlwinm,
        conditions: &[Equals(Field::Mb, 0), SumEquals(Field::Sh, Field::Me, 31)],
    },
    InstructionAlias {
        name: "srwi",
        op: OperationId::Rlwinm,
        conditions: &[Equals(Field::Me, 31), SumEquals(Field::Mb, Field::Sh, 32)],
    },
    InstructionAlias {
        name: "clrlwi",
        op: OperationId::Rlwinm,
        conditions: &[Equals(Field::Sh, 0), Equals(Field::Me, 31)],
    },
    InstructionAlias { name: "mtcr", op: OperationId::Mtcrf, conditions: &[Equals(Field::Crm, 0xFF)] },
    InstructionAlias {
        name: "crclr",
        op: OperationId::Crxor,
        conditions: &[SameAs(Field::CrbD, Field::CrbA), SameAs(Field::CrbA, Field::CrbB)],
    },
    InstructionAlias {
        name: "crset",
        op: OperationId::Creqv,
        conditions: &[SameAs(Field::CrbD, Field::CrbA), SameAs(Field::CrbA, Field::CrbB)],
    },
    InstructionAlias { name: "crnot", op: OperationId::Crnor, conditions: &[SameAs(Field::CrbA, Field::CrbB)] },
    InstructionAlias { name: "crmove", op: OperationId::Cror, conditions: &[SameAs(Field::CrbA, Field::CrbB)] },
    InstructionAlias { name: "trap", op: OperationId::Tw, conditions: &[Equals(Field::To, 31)] },
];

/// First alias matching `instr`, decoded as `op`
pub fn find_alias(op: OperationId, instr: Instruction) -> Option<&'static InstructionAlias> {
    ALIASES.iter().find(|alias| alias.matches(op, instr))
}
