//! Per-thread instruction trace ring buffer

use std::collections::VecDeque;
use std::fmt;

use crate::context::{spr, StateField, ThreadContext};
use crate::decoder::{Field, Instruction, OperationDescriptor, OperationId};

/// One executed instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub cia: u32,
    pub instr: Instruction,
    pub op: OperationId,
    /// Register values read, sampled before execution
    pub reads: Vec<(StateField, u64)>,
    /// Register values written, sampled after execution
    pub writes: Vec<(StateField, u64)>,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}  {:08X}  {:<10}", self.cia, self.instr.word(), self.op.name())?;
        for (field, value) in &self.reads {
            write!(f, " {}=0x{:X}", field, value)?;
        }
        if !self.writes.is_empty() {
            write!(f, " ->")?;
            for (field, value) in &self.writes {
                write!(f, " {}=0x{:X}", field, value)?;
            }
        }
        Ok(())
    }
}

/// Fixed capacity ring buffer of the most recent instructions of a thread
#[derive(Debug)]
pub struct Tracer {
    entries: VecDeque<TraceEntry>,
    capacity: usize,
}

impl Tracer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record the state an instruction is about to read
    pub fn begin(&mut self, ctx: &ThreadContext, descriptor: &OperationDescriptor, instr: Instruction) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let reads = state_fields(descriptor.read, descriptor, instr)
            .into_iter()
            .map(|field| (field, ctx.value(field)))
            .collect();
        self.entries.push_back(TraceEntry {
            cia: ctx.cia,
            instr,
            op: descriptor.id,
            reads,
            writes: Vec::new(),
        });
    }

    /// Record the state the last instruction wrote
    pub fn finish(&mut self, ctx: &ThreadContext, descriptor: &OperationDescriptor) {
        let Some(entry) = self.entries.back_mut() else {
            return;
        };
        let mut fields = state_fields(descriptor.write, descriptor, entry.instr);
        for flag in descriptor.flags {
            let set = entry.instr.get(*flag) != 0;
            match flag {
                Field::Rc if set => push_unique(&mut fields, StateField::Cr),
                Field::Oe if set => push_unique(&mut fields, StateField::Xer),
                Field::Lk if set => push_unique(&mut fields, StateField::Lr),
                _ => {}
            }
        }
        entry.writes = fields.into_iter().map(|field| (field, ctx.value(field))).collect();
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    /// The last `count` entries, oldest first
    pub fn last(&self, count: usize) -> Vec<TraceEntry> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn push_unique(fields: &mut Vec<StateField>, field: StateField) {
    if !fields.contains(&field) {
        fields.push(field);
    }
}

/// Map instruction fields to the register state they name
fn state_fields(fields: &[Field], descriptor: &OperationDescriptor, instr: Instruction) -> Vec<StateField> {
    let mut out = Vec::new();
    for field in fields {
        let state = match field {
            Field::Rd | Field::Rs | Field::Ra | Field::Rb => {
                let n = instr.get(*field) as u8;
                // rA reads as zero for the address forms
                if *field == Field::Ra && n == 0 && descriptor.read.contains(&Field::D) {
                    continue;
                }
                StateField::Gpr(n)
            }
            Field::FrD | Field::FrS | Field::FrA | Field::FrB | Field::FrC => {
                StateField::Fpr(instr.get(*field) as u8)
            }
            Field::CrfD | Field::CrfS | Field::CrbD | Field::CrbA | Field::CrbB | Field::Crm => {
                StateField::Cr
            }
            Field::Cr => StateField::Cr,
            Field::XerCa | Field::XerOv | Field::XerSo => StateField::Xer,
            Field::Lr => StateField::Lr,
            Field::Ctr => StateField::Ctr,
            Field::Fpscr => StateField::Fpscr,
            Field::Msr => StateField::Msr,
            Field::Rsrv => StateField::Reserve,
            Field::Sr => StateField::Sr(instr.sr() as u8),
            Field::Spr => match instr.spr() {
                spr::XER => StateField::Xer,
                spr::LR => StateField::Lr,
                spr::CTR => StateField::Ctr,
                n @ spr::GQR0..=spr::GQR7 => StateField::Gqr((n - spr::GQR0) as u8),
                _ => continue,
            },
            _ => continue,
        };
        push_unique(&mut out, state);
    }
    out
}
