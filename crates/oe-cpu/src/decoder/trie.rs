//! Bitfield trie used to classify instruction words

use super::field::{Field, Instruction};
use super::table::{FieldValue, OperationId};

/// Children of a node, selected by the value of one field
#[derive(Debug)]
struct FieldMap {
    field: Field,
    /// One slot per possible field value
    children: Vec<DecodeNode>,
}

/// A trie node
///
/// A node may carry an operation (the end of some opcode path) and any
/// number of field maps leading further down. Decoding takes the deepest
/// match, so an operation whose opcode is a prefix of another still loses to
/// the longer one.
#[derive(Debug, Default)]
pub struct DecodeNode {
    op: Option<OperationId>,
    maps: Vec<FieldMap>,
}

impl DecodeNode {
    /// Create an empty root
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an opcode path, creating or reusing a child map per field
    ///
    /// Returns the operation already stored at the end of the path, if any.
    pub fn insert(&mut self, opcode: &[FieldValue], id: OperationId) -> Option<OperationId> {
        let Some((first, rest)) = opcode.split_first() else {
            return self.op.replace(id);
        };

        let position = match self.maps.iter().position(|m| m.field == first.field) {
            Some(position) => position,
            None => {
                let size = 1usize << first.field.width();
                self.maps.push(FieldMap {
                    field: first.field,
                    children: (0..size).map(|_| DecodeNode::default()).collect(),
                });
                self.maps.len() - 1
            }
        };

        let child = &mut self.maps[position].children[first.value as usize];
        child.insert(rest, id)
    }

    /// Classify `instr`
    pub fn lookup(&self, instr: Instruction) -> Option<OperationId> {
        self.maps
            .iter()
            .find_map(|map| {
                let child = &map.children[instr.get(map.field) as usize];
                child.lookup(instr).or(child.op)
            })
    }

    /// Number of nodes in the subtree, including this one
    pub fn node_count(&self) -> usize {
        1 + self
            .maps
            .iter()
            .flat_map(|map| map.children.iter())
            .map(DecodeNode::node_count)
            .sum::<usize>()
    }

    /// Greatest number of field maps walked to reach any operation
    pub fn depth(&self) -> usize {
        self.maps
            .iter()
            .flat_map(|map| map.children.iter())
            .filter(|child| child.op.is_some() || !child.maps.is_empty())
            .map(|child| 1 + child.depth())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fv(field: Field, value: u32) -> FieldValue {
        FieldValue { field, value }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut root = DecodeNode::new();
        root.insert(&[fv(Field::Opcd, 14)], OperationId::Addi);
        root.insert(&[fv(Field::Opcd, 31), fv(Field::Xo2, 266)], OperationId::Add);

        assert_eq!(root.lookup(Instruction(0x3860_0005)), Some(OperationId::Addi));
        assert_eq!(root.lookup(Instruction(0x7CA3_2214)), Some(OperationId::Add));
        assert_eq!(root.lookup(Instruction(0x0000_0000)), None);
    }

    #[test]
    fn test_sibling_maps_backtrack() {
        let mut root = DecodeNode::new();
        root.insert(&[fv(Field::Opcd, 31), fv(Field::Xo1, 28)], OperationId::And);
        root.insert(&[fv(Field::Opcd, 31), fv(Field::Xo2, 266)], OperationId::Add);

        // add r5, r3, r4 has xo1 == 266, which the xo1 map does not know
        assert_eq!(root.lookup(Instruction(0x7CA3_2214)), Some(OperationId::Add));
        // and r3, r4, r5
        assert_eq!(root.lookup(Instruction(0x7C83_2838)), Some(OperationId::And));
    }

    #[test]
    fn test_duplicate_path_reports_previous() {
        let mut root = DecodeNode::new();
        assert_eq!(root.insert(&[fv(Field::Opcd, 14)], OperationId::Addi), None);
        assert_eq!(
            root.insert(&[fv(Field::Opcd, 14)], OperationId::Addis),
            Some(OperationId::Addi)
        );
    }

    #[test]
    fn test_depth() {
        let mut root = DecodeNode::new();
        root.insert(&[fv(Field::Opcd, 14)], OperationId::Addi);
        root.insert(
            &[fv(Field::Opcd, 31), fv(Field::Xo1, 0), fv(Field::Bit9, 0), fv(Field::Bit31, 0)],
            OperationId::Cmp,
        );
        assert_eq!(root.depth(), 4);
    }
}
