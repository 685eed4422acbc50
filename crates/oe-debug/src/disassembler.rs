//! Disassembler for Espresso instructions
//!
//! Text is produced from the decoder's descriptors rather than a hand
//! written table: operands come from the descriptor's written and read
//! fields, and simplified mnemonics from the alias table replace the base
//! mnemonic when their conditions hold.

use std::fmt;
use std::sync::Arc;

use oe_core::bits::sign_extend;
use oe_cpu::decoder::{AliasCondition, Decoder, Field, Instruction, OperationDescriptor};
use oe_memory::{Address, MemoryManager};
use parking_lot::RwLock;

use crate::symbols::SymbolTable;

/// Disassembled instruction
#[derive(Debug, Clone)]
pub struct DisassembledInstruction {
    pub address: u32,
    /// Raw instruction word
    pub opcode: u32,
    pub mnemonic: String,
    /// Operands as a string
    pub operands: String,
    pub comment: Option<String>,
}

impl DisassembledInstruction {
    /// Mnemonic and operands, without address or comment
    pub fn text(&self) -> String {
        if self.operands.is_empty() {
            self.mnemonic.clone()
        } else {
            format!("{:8} {}", self.mnemonic, self.operands)
        }
    }

    pub fn opcode_hex(&self) -> String {
        format!("{:08X}", self.opcode)
    }
}

impl fmt::Display for DisassembledInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}:  {:08X}  {}", self.address, self.opcode, self.text())?;
        if let Some(comment) = &self.comment {
            write!(f, "  # {}", comment)?;
        }
        Ok(())
    }
}

/// Flags that are shown as operands instead of mnemonic suffixes
const VALUE_FLAGS: &[Field] = &[Field::L, Field::W, Field::I, Field::Qw, Field::Qi];

pub struct Disassembler {
    decoder: Arc<Decoder>,
    symbols: Option<Arc<RwLock<SymbolTable>>>,
}

impl Disassembler {
    pub fn new(decoder: Arc<Decoder>) -> Self {
        Self {
            decoder,
            symbols: None,
        }
    }

    /// Annotate branch targets with names from `symbols`
    pub fn with_symbols(mut self, symbols: Arc<RwLock<SymbolTable>>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    /// Disassemble a single instruction word located at `address`
    pub fn disassemble(&self, address: u32, opcode: u32) -> DisassembledInstruction {
        let instr = Instruction(opcode);
        let Some(descriptor) = self.decoder.decode(instr) else {
            return DisassembledInstruction {
                address,
                opcode,
                mnemonic: ".long".to_string(),
                operands: format!("0x{:08X}", opcode),
                comment: Some("unknown instruction".to_string()),
            };
        };

        let alias = self.decoder.find_alias(instr);
        let conditions = alias.map(|alias| alias.conditions).unwrap_or(&[]);
        let hidden = |field: Field| {
            conditions.iter().any(|condition| match *condition {
                AliasCondition::Equals(f, _) => f == field,
                AliasCondition::SameAs(_, f) | AliasCondition::SumEquals(_, f, _) => f == field,
            })
        };

        let mut mnemonic = alias.map_or(descriptor.name, |alias| alias.name).to_string();
        // Suffix order: `addo.`, `bla`
        for (flag, suffix) in [(Field::Oe, 'o'), (Field::Lk, 'l'), (Field::Aa, 'a'), (Field::Rc, '.')] {
            if descriptor.flags.contains(&flag) && !hidden(flag) && instr.get(flag) != 0 {
                mnemonic.push(suffix);
            }
        }

        let mut comment = None;
        let operands = operand_fields(descriptor)
            .into_iter()
            .filter(|&field| !hidden(field))
            .map(|field| self.operand(field, instr, address, &mut comment))
            .collect::<Vec<_>>()
            .join(", ");

        DisassembledInstruction {
            address,
            opcode,
            mnemonic,
            operands,
            comment,
        }
    }

    /// Disassemble `count` instructions starting at `address`
    pub fn disassemble_range(
        &self,
        memory: &MemoryManager,
        address: Address,
        count: usize,
    ) -> Vec<DisassembledInstruction> {
        (0..count as u32)
            .map_while(|i| {
                let at = address + i * 4;
                let word = memory.fetch_instruction(at).ok()?;
                Some(self.disassemble(at.get(), word))
            })
            .collect()
    }

    /// Disassemble a big-endian byte buffer loaded at `base`
    pub fn disassemble_bytes(&self, bytes: &[u8], base: u32) -> Vec<DisassembledInstruction> {
        bytes
            .chunks_exact(4)
            .enumerate()
            .map(|(i, chunk)| {
                let word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                self.disassemble(base.wrapping_add(i as u32 * 4), word)
            })
            .collect()
    }

    fn operand(
        &self,
        field: Field,
        instr: Instruction,
        address: u32,
        comment: &mut Option<String>,
    ) -> String {
        match field {
            Field::Rd | Field::Rs | Field::Ra | Field::Rb => format!("r{}", instr.get(field)),
            Field::FrD | Field::FrS | Field::FrA | Field::FrB | Field::FrC => {
                format!("f{}", instr.get(field))
            }
            Field::CrfD | Field::CrfS => format!("cr{}", instr.get(field)),
            Field::Sr => format!("sr{}", instr.sr()),
            Field::Simm => format!("{}", instr.simm() as i32),
            Field::Uimm | Field::Crm | Field::Fm | Field::Kcn => format!("0x{:X}", instr.get(field)),
            Field::D => format!("{}(r{})", instr.d() as i32, instr.ra()),
            Field::Qd => format!("{}(r{})", sign_extend(instr.get(Field::Qd), 12) as i32, instr.ra()),
            Field::Spr => format!("{}", instr.spr()),
            Field::Tbr => format!("{}", instr.tbr()),
            Field::Li | Field::Bd => {
                let displacement = if field == Field::Li { instr.li() } else { instr.bd() };
                let target = if instr.aa() {
                    displacement
                } else {
                    address.wrapping_add(displacement)
                };
                if let Some(symbols) = &self.symbols {
                    *comment = symbols.read().describe(target);
                }
                format!("0x{:08X}", target)
            }
            _ => format!("{}", instr.get(field)),
        }
    }
}

fn has_displacement(descriptor: &OperationDescriptor) -> bool {
    descriptor.read.iter().any(|&f| f == Field::D || f == Field::Qd)
}

/// Operand order: written registers, read registers, then value flags
///
/// A field both written and read (the base of an update form) is shown at
/// its read position, and the base register of a displacement is folded
/// into the displacement operand.
fn operand_fields(descriptor: &OperationDescriptor) -> Vec<Field> {
    let displacement = has_displacement(descriptor);
    let mut fields: Vec<Field> = Vec::new();
    let written = descriptor
        .write
        .iter()
        .filter(|f| !descriptor.read.contains(f));
    for &field in written.chain(descriptor.read.iter()) {
        if field.is_marker() || fields.contains(&field) {
            continue;
        }
        if displacement && field == Field::Ra {
            continue;
        }
        fields.push(field);
    }
    for &flag in descriptor.flags {
        if !VALUE_FLAGS.contains(&flag) {
            continue;
        }
        // `cmp crfD, L, rA, rB`
        match fields.iter().position(|&f| f == Field::CrfD) {
            Some(at) if flag == Field::L => fields.insert(at + 1, flag),
            _ => fields.push(flag),
        }
    }
    fields
}
