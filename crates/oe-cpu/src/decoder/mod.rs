//! Espresso instruction decoder
//!
//! The decoder is built once from the instruction table and is read-only
//! afterwards, so a single `Arc<Decoder>` is shared by every core.

pub mod alias;
pub mod field;
pub mod table;
pub mod trie;

pub use alias::{AliasCondition, InstructionAlias};
pub use field::{decode_spr, encode_spr, Field, Instruction};
pub use table::{FieldValue, OperationDescriptor, OperationId};

use thiserror::Error;
use tracing::{debug, warn};

use trie::DecodeNode;

/// Field coverage problem of one descriptor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{name}: missing bits 0x{missing:08X}, overlapping bits 0x{overlap:08X}")]
pub struct FieldCoverageError {
    pub name: &'static str,
    /// Bits no field of the descriptor covers
    pub missing: u32,
    /// Bits covered by more than one distinct field
    pub overlap: u32,
}

/// Instruction decoder
pub struct Decoder {
    descriptors: Vec<OperationDescriptor>,
    root: DecodeNode,
}

impl Decoder {
    /// Build the decoder from the instruction table
    pub fn new() -> Self {
        Self::from_definitions(table::DEFINITIONS.iter().copied())
    }

    /// Build the decoder from descriptors in an arbitrary order
    pub(crate) fn from_definitions(definitions: impl IntoIterator<Item = OperationDescriptor>) -> Self {
        let mut descriptors: Vec<OperationDescriptor> = definitions.into_iter().collect();

        let mut root = DecodeNode::new();
        for descriptor in &descriptors {
            if let Some(previous) = root.insert(descriptor.opcode, descriptor.id) {
                warn!(
                    "Instruction {} shares its opcode with {}",
                    descriptor.name,
                    previous.name()
                );
            }
        }

        descriptors.sort_by_key(|d| d.id);
        debug!(
            "Decoder ready: {} operations, {} trie nodes, depth {}",
            descriptors.len(),
            root.node_count(),
            root.depth()
        );

        Self { descriptors, root }
    }

    /// Classify an instruction word
    pub fn decode(&self, instr: Instruction) -> Option<&OperationDescriptor> {
        self.root.lookup(instr).and_then(|id| self.descriptor(id))
    }

    /// Classify an instruction word, returning only the id
    #[inline]
    pub fn decode_id(&self, instr: Instruction) -> Option<OperationId> {
        self.root.lookup(instr)
    }

    /// Whether the fixed opcode fields of `id` match `instr`
    ///
    /// Independent of the trie.
    pub fn is(&self, id: OperationId, instr: Instruction) -> bool {
        self.descriptor(id)
            .map(|d| d.opcode.iter().all(|fv| instr.get(fv.field) == fv.value))
            .unwrap_or(false)
    }

    /// Instruction word with only the fixed opcode fields of `id` set
    pub fn encode(&self, id: OperationId) -> Instruction {
        self.descriptor(id)
            .map(|d| {
                d.opcode
                    .iter()
                    .fold(Instruction(0), |instr, fv| instr.with(fv.field, fv.value))
            })
            .unwrap_or_default()
    }

    /// Descriptor of an operation
    pub fn descriptor(&self, id: OperationId) -> Option<&OperationDescriptor> {
        self.descriptors.get(id.index()).filter(|d| d.id == id)
    }

    /// All descriptors, in id order
    pub fn descriptors(&self) -> &[OperationDescriptor] {
        &self.descriptors
    }

    /// Simplified mnemonic for `instr`, if one applies
    pub fn find_alias(&self, instr: Instruction) -> Option<&'static InstructionAlias> {
        let id = self.decode_id(instr)?;
        alias::find_alias(id, instr)
    }

    /// Check that the fields of `id` cover every instruction bit exactly once
    pub fn validate_fields(&self, id: OperationId) -> Result<(), FieldCoverageError> {
        let Some(descriptor) = self.descriptor(id) else {
            return Err(FieldCoverageError {
                name: id.name(),
                missing: u32::MAX,
                overlap: 0,
            });
        };

        let mut covered = 0u32;
        let mut overlap = 0u32;
        for field in descriptor.fields() {
            let mask = field.mask();
            overlap |= covered & mask;
            covered |= mask;
        }

        if covered == u32::MAX && overlap == 0 {
            Ok(())
        } else {
            Err(FieldCoverageError {
                name: descriptor.name,
                missing: !covered,
                overlap,
            })
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Instruction {
    /// Instruction word carrying the opcode of `id`
    pub fn new(decoder: &Decoder, id: OperationId) -> Self {
        decoder.encode(id)
    }
}
