//! Espresso instruction table
//!
//! One line per operation: the fields it writes, the fields it reads, the
//! modifier flags, and the fixed opcode fields that select it. Together the
//! four lists cover all 32 bits of the instruction word exactly once.

use super::field::Field;

/// A fixed opcode field and the value it must hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldValue {
    pub field: Field,
    pub value: u32,
}

/// Static description of one operation
#[derive(Debug, Clone, Copy)]
pub struct OperationDescriptor {
    pub id: OperationId,
    /// Assembly mnemonic
    pub name: &'static str,
    /// Long human readable name
    pub full_name: &'static str,
    pub write: &'static [Field],
    pub read: &'static [Field],
    pub flags: &'static [Field],
    /// Selecting fields, in trie insertion order
    pub opcode: &'static [FieldValue],
}

impl OperationDescriptor {
    /// Every field the descriptor mentions, in table order, without repeats
    pub fn fields(&self) -> Vec<Field> {
        let mut fields = Vec::new();
        let all = self
            .opcode
            .iter()
            .map(|fv| fv.field)
            .chain(self.write.iter().copied())
            .chain(self.read.iter().copied())
            .chain(self.flags.iter().copied());
        for field in all {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        fields
    }

    /// Whether the operation carries a record (`.`) form
    pub fn has_rc(&self) -> bool {
        self.flags.contains(&Field::Rc)
    }
}

macro_rules! instructions {
    ($(
        $id:ident, $name:literal,
        [$($write:ident),*], [$($read:ident),*], [$($flag:ident),*],
        [$($ofield:ident == $ovalue:literal),+],
        $full:literal;
    )*) => {
        /// Canonical operation identifier
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum OperationId {
            $($id,)*
        }

        impl OperationId {
            /// Every operation, in table order
            pub const ALL: &'static [OperationId] = &[$(OperationId::$id,)*];

            /// Number of operations
            pub const COUNT: usize = Self::ALL.len();

            /// Assembly mnemonic
            pub const fn name(self) -> &'static str {
                match self {
                    $(OperationId::$id => $name,)*
                }
            }

            /// Dense index of the operation
            pub const fn index(self) -> usize {
                self as usize
            }
        }

        pub(crate) static DEFINITIONS: &[OperationDescriptor] = &[$(
            OperationDescriptor {
                id: OperationId::$id,
                name: $name,
                full_name: $full,
                write: &[$(Field::$write),*],
                read: &[$(Field::$read),*],
                flags: &[$(Field::$flag),*],
                opcode: &[$(FieldValue { field: Field::$ofield, value: $ovalue }),+],
            },
        )*];
    };
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

instructions! {
    // Integer arithmetic
    Add, "add", [Rd], [Ra, Rb], [Oe, Rc], [Opcd == 31, Xo2 == 266], "Add";
    Addc, "addc", [Rd, XerCa], [Ra, Rb], [Oe, Rc], [Opcd == 31, Xo2 == 10], "Add with Carry";
    Adde, "adde", [Rd, XerCa], [Ra, Rb, XerCa], [Oe, Rc], [Opcd == 31, Xo2 == 138], "Add Extended";
    Addi, "addi", [Rd], [Ra, Simm], [], [Opcd == 14], "Add Immediate";
    Addic, "addic", [Rd, XerCa], [Ra, Simm], [], [Opcd == 12], "Add Immediate with Carry";
    AddicRc, "addic.", [Rd, XerCa, Cr], [Ra, Simm], [], [Opcd == 13], "Add Immediate with Carry and Record";
    Addis, "addis", [Rd], [Ra, Simm], [], [Opcd == 15], "Add Immediate Shifted";
    Addme, "addme", [Rd, XerCa], [Ra, XerCa], [Oe, Rc], [Opcd == 31, Xo2 == 234, Bits16_20 == 0], "Add to Minus One Extended";
    Addze, "addze", [Rd, XerCa], [Ra, XerCa], [Oe, Rc], [Opcd == 31, Xo2 == 202, Bits16_20 == 0], "Add to Zero Extended";
    Divw, "divw", [Rd], [Ra, Rb], [Oe, Rc], [Opcd == 31, Xo2 == 491], "Divide Word";
    Divwu, "divwu", [Rd], [Ra, Rb], [Oe, Rc], [Opcd == 31, Xo2 == 459], "Divide Word Unsigned";
    Mulhw, "mulhw", [Rd], [Ra, Rb], [Rc], [Opcd == 31, Xo2 == 75, Oe == 0], "Multiply High Word";
    Mulhwu, "mulhwu", [Rd], [Ra, Rb], [Rc], [Opcd == 31, Xo2 == 11, Oe == 0], "Multiply High Word Unsigned";
    Mulli, "mulli", [Rd], [Ra, Simm], [], [Opcd == 7], "Multiply Low Immediate";
    Mullw, "mullw", [Rd], [Ra, Rb], [Oe, Rc], [Opcd == 31, Xo2 == 235], "Multiply Low Word";
    Neg, "neg", [Rd], [Ra], [Oe, Rc], [Opcd == 31, Xo2 == 104, Bits16_20 == 0], "Negate";
    Subf, "subf", [Rd], [Ra, Rb], [Oe, Rc], [Opcd == 31, Xo2 == 40], "Subtract From";
    Subfc, "subfc", [Rd, XerCa], [Ra, Rb], [Oe, Rc], [Opcd == 31, Xo2 == 8], "Subtract From with Carry";
    Subfe, "subfe", [Rd, XerCa], [Ra, Rb, XerCa], [Oe, Rc], [Opcd == 31, Xo2 == 136], "Subtract From Extended";
    Subfic, "subfic", [Rd, XerCa], [Ra, Simm], [], [Opcd == 8], "Subtract From Immediate with Carry";
    Subfme, "subfme", [Rd, XerCa], [Ra, XerCa], [Oe, Rc], [Opcd == 31, Xo2 == 232, Bits16_20 == 0], "Subtract From Minus One Extended";
    Subfze, "subfze", [Rd, XerCa], [Ra, XerCa], [Oe, Rc], [Opcd == 31, Xo2 == 200, Bits16_20 == 0], "Subtract From Zero Extended";

    // Integer compare
    Cmp, "cmp", [CrfD], [Ra, Rb, XerSo], [L], [Opcd == 31, Xo1 == 0, Bit9 == 0, Bit31 == 0], "Compare";
    Cmpi, "cmpi", [CrfD], [Ra, Simm, XerSo], [L], [Opcd == 11, Bit9 == 0], "Compare Immediate";
    Cmpl, "cmpl", [CrfD], [Ra, Rb, XerSo], [L], [Opcd == 31, Xo1 == 32, Bit9 == 0, Bit31 == 0], "Compare Logical";
    Cmpli, "cmpli", [CrfD], [Ra, Uimm, XerSo], [L], [Opcd == 10, Bit9 == 0], "Compare Logical Immediate";

    // Integer logical
    And, "and", [Ra], [Rs, Rb], [Rc], [Opcd == 31, Xo1 == 28], "AND";
    Andc, "andc", [Ra], [Rs, Rb], [Rc], [Opcd == 31, Xo1 == 60], "AND with Complement";
    AndiRc, "andi.", [Ra, Cr], [Rs, Uimm], [], [Opcd == 28], "AND Immediate";
    AndisRc, "andis.", [Ra, Cr], [Rs, Uimm], [], [Opcd == 29], "AND Immediate Shifted";
    Cntlzw, "cntlzw", [Ra], [Rs], [Rc], [Opcd == 31, Xo1 == 26, Bits16_20 == 0], "Count Leading Zeroes Word";
    Eqv, "eqv", [Ra], [Rs, Rb], [Rc], [Opcd == 31, Xo1 == 284], "Equivalent";
    Extsb, "extsb", [Ra], [Rs], [Rc], [Opcd == 31, Xo1 == 954, Bits16_20 == 0], "Extend Sign Byte";
    Extsh, "extsh", [Ra], [Rs], [Rc], [Opcd == 31, Xo1 == 922, Bits16_20 == 0], "Extend Sign Half Word";
    Nand, "nand", [Ra], [Rs, Rb], [Rc], [Opcd == 31, Xo1 == 476], "NAND";
    Nor, "nor", [Ra], [Rs, Rb], [Rc], [Opcd == 31, Xo1 == 124], "NOR";
    Or, "or", [Ra], [Rs, Rb], [Rc], [Opcd == 31, Xo1 == 444], "OR";
    Orc, "orc", [Ra], [Rs, Rb], [Rc], [Opcd == 31, Xo1 == 412], "OR with Complement";
    Ori, "ori", [Ra], [Rs, Uimm], [], [Opcd == 24], "OR Immediate";
    Oris, "oris", [Ra], [Rs, Uimm], [], [Opcd == 25], "OR Immediate Shifted";
    Xor, "xor", [Ra], [Rs, Rb], [Rc], [Opcd == 31, Xo1 == 316], "XOR";
    Xori, "xori", [Ra], [Rs, Uimm], [], [Opcd == 26], "XOR Immediate";
    Xoris, "xoris", [Ra], [Rs, Uimm], [], [Opcd == 27], "XOR Immediate Shifted";

    // Integer rotate and shift
    Rlwimi, "rlwimi", [Ra], [Ra, Rs, Sh, Mb, Me], [Rc], [Opcd == 20], "Rotate Left Word Immediate then Mask Insert";
    Rlwinm, "rlwinm", [Ra], [Rs, Sh, Mb, Me], [Rc], [Opcd == 21], "Rotate Left Word Immediate then AND with Mask";
    Rlwnm, "rlwnm", [Ra], [Rs, Rb, Mb, Me], [Rc], [Opcd == 23], "Rotate Left Word then AND with Mask";
    Slw, "slw", [Ra], [Rs, Rb], [Rc], [Opcd == 31, Xo1 == 24], "Shift Left Word";
    Sraw, "sraw", [Ra, XerCa], [Rs, Rb], [Rc], [Opcd == 31, Xo1 == 792], "Shift Right Arithmetic Word";
    Srawi, "srawi", [Ra, XerCa], [Rs, Sh], [Rc], [Opcd == 31, Xo1 == 824], "Shift Right Arithmetic Word Immediate";
    Srw, "srw", [Ra], [Rs, Rb], [Rc], [Opcd == 31, Xo1 == 536], "Shift Right Word";

    // Floating-point arithmetic
    Fadd, "fadd", [FrD, Fpscr], [FrA, FrB], [Rc], [Opcd == 63, Xo4 == 21, Bits21_25 == 0], "Floating Add";
    Fadds, "fadds", [FrD, Fpscr], [FrA, FrB], [Rc], [Opcd == 59, Xo4 == 21, Bits21_25 == 0], "Floating Add Single";
    Fdiv, "fdiv", [FrD, Fpscr], [FrA, FrB], [Rc], [Opcd == 63, Xo4 == 18, Bits21_25 == 0], "Floating Divide";
    Fdivs, "fdivs", [FrD, Fpscr], [FrA, FrB], [Rc], [Opcd == 59, Xo4 == 18, Bits21_25 == 0], "Floating Divide Single";
    Fmul, "fmul", [FrD, Fpscr], [FrA, FrC], [Rc], [Opcd == 63, Xo4 == 25, Bits16_20 == 0], "Floating Multiply";
    Fmuls, "fmuls", [FrD, Fpscr], [FrA, FrC], [Rc], [Opcd == 59, Xo4 == 25, Bits16_20 == 0], "Floating Multiply Single";
    Fres, "fres", [FrD, Fpscr], [FrB], [Rc], [Opcd == 59, Xo4 == 24, Bits11_15 == 0, Bits21_25 == 0], "Floating Reciprocal Estimate Single";
    Frsqrte, "frsqrte", [FrD, Fpscr], [FrB], [Rc], [Opcd == 63, Xo4 == 26, Bits11_15 == 0, Bits21_25 == 0], "Floating Reciprocal Square Root Estimate";
    Fsub, "fsub", [FrD, Fpscr], [FrA, FrB], [Rc], [Opcd == 63, Xo4 == 20, Bits21_25 == 0], "Floating Subtract";
    Fsubs, "fsubs", [FrD, Fpscr], [FrA, FrB], [Rc], [Opcd == 59, Xo4 == 20, Bits21_25 == 0], "Floating Subtract Single";
    Fsel, "fsel", [FrD], [FrA, FrB, FrC], [Rc], [Opcd == 63, Xo4 == 23], "Floating Select";

    // Floating-point multiply-add
    Fmadd, "fmadd", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 63, Xo4 == 29], "Floating Multiply-Add";
    Fmadds, "fmadds", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 59, Xo4 == 29], "Floating Multiply-Add Single";
    Fmsub, "fmsub", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 63, Xo4 == 28], "Floating Multiply-Subtract";
    Fmsubs, "fmsubs", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 59, Xo4 == 28], "Floating Multiply-Subtract Single";
    Fnmadd, "fnmadd", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 63, Xo4 == 31], "Floating Negative Multiply-Add";
    Fnmadds, "fnmadds", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 59, Xo4 == 31], "Floating Negative Multiply-Add Single";
    Fnmsub, "fnmsub", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 63, Xo4 == 30], "Floating Negative Multiply-Subtract";
    Fnmsubs, "fnmsubs", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 59, Xo4 == 30], "Floating Negative Multiply-Subtract Single";

    // Floating-point rounding and conversion
    Fctiw, "fctiw", [FrD, Fpscr], [FrB], [Rc], [Opcd == 63, Xo1 == 14, Bits11_15 == 0], "Floating Convert to Integer Word";
    Fctiwz, "fctiwz", [FrD, Fpscr], [FrB], [Rc], [Opcd == 63, Xo1 == 15, Bits11_15 == 0], "Floating Convert to Integer Word with Round toward Zero";
    Frsp, "frsp", [FrD, Fpscr], [FrB], [Rc], [Opcd == 63, Xo1 == 12, Bits11_15 == 0], "Floating Round to Single";

    // Floating-point compare
    Fcmpo, "fcmpo", [CrfD, Fpscr], [FrA, FrB], [], [Opcd == 63, Xo1 == 32, Bits9_10 == 0, Bit31 == 0], "Floating Compare Ordered";
    Fcmpu, "fcmpu", [CrfD, Fpscr], [FrA, FrB], [], [Opcd == 63, Xo1 == 0, Bits9_10 == 0, Bit31 == 0], "Floating Compare Unordered";

    // Floating-point status and control register
    Mcrfs, "mcrfs", [CrfD, Fpscr], [CrfS, Fpscr], [], [Opcd == 63, Xo1 == 64, Bits9_10 == 0, Bits14_15 == 0, Bits16_20 == 0, Bit31 == 0], "Move to Condition Register from FPSCR";
    Mffs, "mffs", [FrD], [Fpscr], [Rc], [Opcd == 63, Xo1 == 583, Bits11_15 == 0, Bits16_20 == 0], "Move from FPSCR";
    Mtfsb0, "mtfsb0", [Fpscr], [CrbD], [Rc], [Opcd == 63, Xo1 == 70, Bits11_15 == 0, Bits16_20 == 0], "Move to FPSCR Bit 0";
    Mtfsb1, "mtfsb1", [Fpscr], [CrbD], [Rc], [Opcd == 63, Xo1 == 38, Bits11_15 == 0, Bits16_20 == 0], "Move to FPSCR Bit 1";
    Mtfsf, "mtfsf", [Fpscr], [Fm, FrB], [Rc], [Opcd == 63, Xo1 == 711, Bit6 == 0, Bit15 == 0], "Move to FPSCR Fields";
    Mtfsfi, "mtfsfi", [Fpscr], [CrfD, Imm], [Rc], [Opcd == 63, Xo1 == 134, Bits9_10 == 0, Bits11_15 == 0, Bit20 == 0], "Move to FPSCR Field Immediate";

    // Integer load
    Lbz, "lbz", [Rd], [Ra, D], [], [Opcd == 34], "Load Byte and Zero";
    Lbzu, "lbzu", [Rd, Ra], [Ra, D], [], [Opcd == 35], "Load Byte and Zero with Update";
    Lbzx, "lbzx", [Rd], [Ra, Rb], [], [Opcd == 31, Xo1 == 87, Bit31 == 0], "Load Byte and Zero Indexed";
    Lbzux, "lbzux", [Rd, Ra], [Ra, Rb], [], [Opcd == 31, Xo1 == 119, Bit31 == 0], "Load Byte and Zero with Update Indexed";
    Lha, "lha", [Rd], [Ra, D], [], [Opcd == 42], "Load Half Word Algebraic";
    Lhau, "lhau", [Rd, Ra], [Ra, D], [], [Opcd == 43], "Load Half Word Algebraic with Update";
    Lhax, "lhax", [Rd], [Ra, Rb], [], [Opcd == 31, Xo1 == 343, Bit31 == 0], "Load Half Word Algebraic Indexed";
    Lhaux, "lhaux", [Rd, Ra], [Ra, Rb], [], [Opcd == 31, Xo1 == 375, Bit31 == 0], "Load Half Word Algebraic with Update Indexed";
    Lhz, "lhz", [Rd], [Ra, D], [], [Opcd == 40], "Load Half Word and Zero";
    Lhzu, "lhzu", [Rd, Ra], [Ra, D], [], [Opcd == 41], "Load Half Word and Zero with Update";
    Lhzx, "lhzx", [Rd], [Ra, Rb], [], [Opcd == 31, Xo1 == 279, Bit31 == 0], "Load Half Word and Zero Indexed";
    Lhzux, "lhzux", [Rd, Ra], [Ra, Rb], [], [Opcd == 31, Xo1 == 311, Bit31 == 0], "Load Half Word and Zero with Update Indexed";
    Lwz, "lwz", [Rd], [Ra, D], [], [Opcd == 32], "Load Word and Zero";
    Lwzu, "lwzu", [Rd, Ra], [Ra, D], [], [Opcd == 33], "Load Word and Zero with Update";
    Lwzx, "lwzx", [Rd], [Ra, Rb], [], [Opcd == 31, Xo1 == 23, Bit31 == 0], "Load Word and Zero Indexed";
    Lwzux, "lwzux", [Rd, Ra], [Ra, Rb], [], [Opcd == 31, Xo1 == 55, Bit31 == 0], "Load Word and Zero with Update Indexed";

    // Integer store
    Stb, "stb", [], [Rs, Ra, D], [], [Opcd == 38], "Store Byte";
    Stbu, "stbu", [Ra], [Rs, Ra, D], [], [Opcd == 39], "Store Byte with Update";
    Stbx, "stbx", [], [Rs, Ra, Rb], [], [Opcd == 31, Xo1 == 215, Bit31 == 0], "Store Byte Indexed";
    Stbux, "stbux", [Ra], [Rs, Ra, Rb], [], [Opcd == 31, Xo1 == 247, Bit31 == 0], "Store Byte with Update Indexed";
    Sth, "sth", [], [Rs, Ra, D], [], [Opcd == 44], "Store Half Word";
    Sthu, "sthu", [Ra], [Rs, Ra, D], [], [Opcd == 45], "Store Half Word with Update";
    Sthx, "sthx", [], [Rs, Ra, Rb], [], [Opcd == 31, Xo1 == 407, Bit31 == 0], "Store Half Word Indexed";
    Sthux, "sthux", [Ra], [Rs, Ra, Rb], [], [Opcd == 31, Xo1 == 439, Bit31 == 0], "Store Half Word with Update Indexed";
    Stw, "stw", [], [Rs, Ra, D], [], [Opcd == 36], "Store Word";
    Stwu, "stwu", [Ra], [Rs, Ra, D], [], [Opcd == 37], "Store Word with Update";
    Stwx, "stwx", [], [Rs, Ra, Rb], [], [Opcd == 31, Xo1 == 151, Bit31 == 0], "Store Word Indexed";
    Stwux, "stwux", [Ra], [Rs, Ra, Rb], [], [Opcd == 31, Xo1 == 183, Bit31 == 0], "Store Word with Update Indexed";

    // Integer load and store with byte reverse
    Lhbrx, "lhbrx", [Rd], [Ra, Rb], [], [Opcd == 31, Xo1 == 790, Bit31 == 0], "Load Half Word Byte-Reverse Indexed";
    Lwbrx, "lwbrx", [Rd], [Ra, Rb], [], [Opcd == 31, Xo1 == 534, Bit31 == 0], "Load Word Byte-Reverse Indexed";
    Sthbrx, "sthbrx", [], [Rs, Ra, Rb], [], [Opcd == 31, Xo1 == 918, Bit31 == 0], "Store Half Word Byte-Reverse Indexed";
    Stwbrx, "stwbrx", [], [Rs, Ra, Rb], [], [Opcd == 31, Xo1 == 662, Bit31 == 0], "Store Word Byte-Reverse Indexed";

    // Integer load and store multiple
    Lmw, "lmw", [Rd], [Ra, D], [], [Opcd == 46], "Load Multiple Words";
    Stmw, "stmw", [], [Rs, Ra, D], [], [Opcd == 47], "Store Multiple Words";

    // Integer load and store string
    Lswi, "lswi", [Rd], [Ra, Nb], [], [Opcd == 31, Xo1 == 597, Bit31 == 0], "Load String Word Immediate";
    Lswx, "lswx", [Rd], [Ra, Rb], [], [Opcd == 31, Xo1 == 533, Bit31 == 0], "Load String Word Indexed";
    Stswi, "stswi", [], [Rs, Ra, Nb], [], [Opcd == 31, Xo1 == 725, Bit31 == 0], "Store String Word Immediate";
    Stswx, "stswx", [], [Rs, Ra, Rb], [], [Opcd == 31, Xo1 == 661, Bit31 == 0], "Store String Word Indexed";

    // Memory synchronisation
    Eieio, "eieio", [], [], [], [Opcd == 31, Xo1 == 854, Bits6_10 == 0, Bits11_15 == 0, Bits16_20 == 0, Bit31 == 0], "Enforce In-Order Execution of I/O";
    Isync, "isync", [], [], [], [Opcd == 19, Xo1 == 150, Bits6_10 == 0, Bits11_15 == 0, Bits16_20 == 0, Bit31 == 0], "Instruction Synchronise";
    Lwarx, "lwarx", [Rd, Rsrv], [Ra, Rb], [], [Opcd == 31, Xo1 == 20, Bit31 == 0], "Load Word and Reserve Indexed";
    StwcxRc, "stwcx.", [Rsrv, Cr], [Rs, Ra, Rb, Rsrv], [], [Opcd == 31, Xo1 == 150, Bit31 == 1], "Store Word Conditional Indexed";
    Sync, "sync", [], [], [L], [Opcd == 31, Xo1 == 598, Bits6_9 == 0, Bits11_15 == 0, Bits16_20 == 0, Bit31 == 0], "Synchronise";

    // Floating-point load
    Lfd, "lfd", [FrD], [Ra, D], [], [Opcd == 50], "Load Floating-Point Double";
    Lfdu, "lfdu", [FrD, Ra], [Ra, D], [], [Opcd == 51], "Load Floating-Point Double with Update";
    Lfdx, "lfdx", [FrD], [Ra, Rb], [], [Opcd == 31, Xo1 == 599, Bit31 == 0], "Load Floating-Point Double Indexed";
    Lfdux, "lfdux", [FrD, Ra], [Ra, Rb], [], [Opcd == 31, Xo1 == 631, Bit31 == 0], "Load Floating-Point Double with Update Indexed";
    Lfs, "lfs", [FrD], [Ra, D], [], [Opcd == 48], "Load Floating-Point Single";
    Lfsu, "lfsu", [FrD, Ra], [Ra, D], [], [Opcd == 49], "Load Floating-Point Single with Update";
    Lfsx, "lfsx", [FrD], [Ra, Rb], [], [Opcd == 31, Xo1 == 535, Bit31 == 0], "Load Floating-Point Single Indexed";
    Lfsux, "lfsux", [FrD, Ra], [Ra, Rb], [], [Opcd == 31, Xo1 == 567, Bit31 == 0], "Load Floating-Point Single with Update Indexed";

    // Floating-point store
    Stfd, "stfd", [], [FrS, Ra, D], [], [Opcd == 54], "Store Floating-Point Double";
    Stfdu, "stfdu", [Ra], [FrS, Ra, D], [], [Opcd == 55], "Store Floating-Point Double with Update";
    Stfdx, "stfdx", [], [FrS, Ra, Rb], [], [Opcd == 31, Xo1 == 727, Bit31 == 0], "Store Floating-Point Double Indexed";
    Stfdux, "stfdux", [Ra], [FrS, Ra, Rb], [], [Opcd == 31, Xo1 == 759, Bit31 == 0], "Store Floating-Point Double with Update Indexed";
    Stfiwx, "stfiwx", [], [FrS, Ra, Rb], [], [Opcd == 31, Xo1 == 983, Bit31 == 0], "Store Floating-Point as Integer Word Indexed";
    Stfs, "stfs", [], [FrS, Ra, D], [], [Opcd == 52], "Store Floating-Point Single";
    Stfsu, "stfsu", [Ra], [FrS, Ra, D], [], [Opcd == 53], "Store Floating-Point Single with Update";
    Stfsx, "stfsx", [], [FrS, Ra, Rb], [], [Opcd == 31, Xo1 == 663, Bit31 == 0], "Store Floating-Point Single Indexed";
    Stfsux, "stfsux", [Ra], [FrS, Ra, Rb], [], [Opcd == 31, Xo1 == 695, Bit31 == 0], "Store Floating-Point Single with Update Indexed";

    // Floating-point move
    Fabs, "fabs", [FrD], [FrB], [Rc], [Opcd == 63, Xo1 == 264, Bits11_15 == 0], "Floating Absolute Value";
    Fmr, "fmr", [FrD], [FrB], [Rc], [Opcd == 63, Xo1 == 72, Bits11_15 == 0], "Floating Move Register";
    Fnabs, "fnabs", [FrD], [FrB], [Rc], [Opcd == 63, Xo1 == 136, Bits11_15 == 0], "Floating Negative Absolute Value";
    Fneg, "fneg", [FrD], [FrB], [Rc], [Opcd == 63, Xo1 == 40, Bits11_15 == 0], "Floating Negate";

    // Branch
    B, "b", [Lr], [Li], [Aa, Lk], [Opcd == 18], "Branch";
    Bc, "bc", [Ctr, Lr], [Bo, Bi, Bd, Ctr, Cr], [Aa, Lk], [Opcd == 16], "Branch Conditional";
    Bcctr, "bcctr", [Lr], [Bo, Bi, Ctr, Cr], [Lk], [Opcd == 19, Xo1 == 528, Bits16_20 == 0], "Branch Conditional to CTR";
    Bclr, "bclr", [Ctr, Lr], [Bo, Bi, Ctr, Lr, Cr], [Lk], [Opcd == 19, Xo1 == 16, Bits16_20 == 0], "Branch Conditional to LR";

    // Condition register logical
    Crand, "crand", [CrbD], [CrbA, CrbB], [], [Opcd == 19, Xo1 == 257, Bit31 == 0], "Condition Register AND";
    Crandc, "crandc", [CrbD], [CrbA, CrbB], [], [Opcd == 19, Xo1 == 129, Bit31 == 0], "Condition Register AND with Complement";
    Creqv, "creqv", [CrbD], [CrbA, CrbB], [], [Opcd == 19, Xo1 == 289, Bit31 == 0], "Condition Register Equivalent";
    Crnand, "crnand", [CrbD], [CrbA, CrbB], [], [Opcd == 19, Xo1 == 225, Bit31 == 0], "Condition Register NAND";
    Crnor, "crnor", [CrbD], [CrbA, CrbB], [], [Opcd == 19, Xo1 == 33, Bit31 == 0], "Condition Register NOR";
    Cror, "cror", [CrbD], [CrbA, CrbB], [], [Opcd == 19, Xo1 == 449, Bit31 == 0], "Condition Register OR";
    Crorc, "crorc", [CrbD], [CrbA, CrbB], [], [Opcd == 19, Xo1 == 417, Bit31 == 0], "Condition Register OR with Complement";
    Crxor, "crxor", [CrbD], [CrbA, CrbB], [], [Opcd == 19, Xo1 == 193, Bit31 == 0], "Condition Register XOR";
    Mcrf, "mcrf", [CrfD], [CrfS], [], [Opcd == 19, Xo1 == 0, Bits9_10 == 0, Bits14_15 == 0, Bits16_20 == 0, Bit31 == 0], "Move Condition Register Field";

    // System linkage
    Rfi, "rfi", [Msr], [], [], [Opcd == 19, Xo1 == 50, Bits6_10 == 0, Bits11_15 == 0, Bits16_20 == 0, Bit31 == 0], "Return from Interrupt";
    Kc, "kc", [], [Kcn], [], [Opcd == 17, Bit31 == 1], "Kernel Call";
    Sc, "sc", [], [], [], [Opcd == 17, Bits6_10 == 0, Bits11_15 == 0, Bits16_29 == 0, Bit30 == 1, Bit31 == 0], "System Call";

    // Trap
    Tw, "tw", [], [To, Ra, Rb], [], [Opcd == 31, Xo1 == 4, Bit31 == 0], "Trap Word";
    Twi, "twi", [], [To, Ra, Simm], [], [Opcd == 3], "Trap Word Immediate";

    // Processor control
    Mcrxr, "mcrxr", [CrfD, XerCa, XerOv, XerSo], [XerCa, XerOv, XerSo], [], [Opcd == 31, Xo1 == 512, Bits9_10 == 0, Bits11_15 == 0, Bits16_20 == 0, Bit31 == 0], "Move to Condition Register from XER";
    Mfcr, "mfcr", [Rd], [Cr], [Bit11, Crm], [Opcd == 31, Xo1 == 19, Bit20 == 0, Bit31 == 0], "Move from Condition Register";
    Mfmsr, "mfmsr", [Rd], [Msr], [], [Opcd == 31, Xo1 == 83, Bits11_15 == 0, Bits16_20 == 0, Bit31 == 0], "Move from Machine State Register";
    Mfspr, "mfspr", [Rd], [Spr], [], [Opcd == 31, Xo1 == 339, Bit31 == 0], "Move from Special Purpose Register";
    Mftb, "mftb", [Rd], [Tbr], [], [Opcd == 31, Xo1 == 371, Bit31 == 0], "Move from Time Base Register";
    Mtcrf, "mtcrf", [Crm], [Rs], [Bit11], [Opcd == 31, Xo1 == 144, Bit20 == 0, Bit31 == 0], "Move to Condition Register Fields";
    Mtmsr, "mtmsr", [Msr], [Rs], [], [Opcd == 31, Xo1 == 146, Bits11_15 == 0, Bits16_20 == 0, Bit31 == 0], "Move to Machine State Register";
    Mtspr, "mtspr", [Spr], [Rs], [], [Opcd == 31, Xo1 == 467, Bit31 == 0], "Move to Special Purpose Register";

    // Cache management
    Dcbf, "dcbf", [], [Ra, Rb], [], [Opcd == 31, Xo1 == 86, Bits6_10 == 0, Bit31 == 0], "Data Cache Block Flush";
    Dcbi, "dcbi", [], [Ra, Rb], [], [Opcd == 31, Xo1 == 470, Bits6_10 == 0, Bit31 == 0], "Data Cache Block Invalidate";
    Dcbst, "dcbst", [], [Ra, Rb], [], [Opcd == 31, Xo1 == 54, Bits6_10 == 0, Bit31 == 0], "Data Cache Block Store";
    Dcbt, "dcbt", [], [Ra, Rb], [], [Opcd == 31, Xo1 == 278, Bits6_10 == 0, Bit31 == 0], "Data Cache Block Touch";
    Dcbtst, "dcbtst", [], [Ra, Rb], [], [Opcd == 31, Xo1 == 246, Bits6_10 == 0, Bit31 == 0], "Data Cache Block Touch for Store";
    Dcbz, "dcbz", [], [Ra, Rb], [], [Opcd == 31, Xo1 == 1014, Bits6_10 == 0, Bit31 == 0], "Data Cache Block Clear to Zero";
    Icbi, "icbi", [], [Ra, Rb], [], [Opcd == 31, Xo1 == 982, Bits6_10 == 0, Bit31 == 0], "Instruction Cache Block Invalidate";
    DcbzL, "dcbz_l", [], [Ra, Rb], [], [Opcd == 4, Xo1 == 1014, Bits6_10 == 0, Bit31 == 0], "Data Cache Block Clear to Zero Locked";

    // Segment registers
    Mfsr, "mfsr", [Rd], [Sr], [], [Opcd == 31, Xo1 == 595, Bit11 == 0, Bits16_20 == 0, Bit31 == 0], "Move from Segment Register";
    Mfsrin, "mfsrin", [Rd], [Rb], [], [Opcd == 31, Xo1 == 659, Bits11_15 == 0, Bit31 == 0], "Move from Segment Register Indirect";
    Mtsr, "mtsr", [Sr], [Rs], [], [Opcd == 31, Xo1 == 210, Bit11 == 0, Bits16_20 == 0, Bit31 == 0], "Move to Segment Register";
    Mtsrin, "mtsrin", [], [Rs, Rb], [], [Opcd == 31, Xo1 == 242, Bits11_15 == 0, Bit31 == 0], "Move to Segment Register Indirect";

    // Lookaside buffer management
    Tlbie, "tlbie", [], [Rb], [], [Opcd == 31, Xo1 == 306, Bits6_10 == 0, Bits11_15 == 0, Bit31 == 0], "TLB Invalidate Entry";
    Tlbsync, "tlbsync", [], [], [], [Opcd == 31, Xo1 == 566, Bits6_10 == 0, Bits11_15 == 0, Bits16_20 == 0, Bit31 == 0], "TLB Synchronise";

    // External control
    Eciwx, "eciwx", [Rd], [Ra, Rb], [], [Opcd == 31, Xo1 == 310, Bit31 == 0], "External Control In Word Indexed";
    Ecowx, "ecowx", [], [Rs, Ra, Rb], [], [Opcd == 31, Xo1 == 438, Bit31 == 0], "External Control Out Word Indexed";

    // Paired-single load and store
    PsqL, "psq_l", [FrD], [Ra, Qd], [W, I], [Opcd == 56], "Paired Single Quantized Load";
    PsqLu, "psq_lu", [FrD, Ra], [Ra, Qd], [W, I], [Opcd == 57], "Paired Single Quantized Load with Update";
    PsqLx, "psq_lx", [FrD], [Ra, Rb], [Qw, Qi], [Opcd == 4, Xo3 == 6, Bit31 == 0], "Paired Single Quantized Load Indexed";
    PsqLux, "psq_lux", [FrD, Ra], [Ra, Rb], [Qw, Qi], [Opcd == 4, Xo3 == 38, Bit31 == 0], "Paired Single Quantized Load with Update Indexed";
    PsqSt, "psq_st", [], [FrS, Ra, Qd], [W, I], [Opcd == 60], "Paired Single Quantized Store";
    PsqStu, "psq_stu", [Ra], [FrS, Ra, Qd], [W, I], [Opcd == 61], "Paired Single Quantized Store with Update";
    PsqStx, "psq_stx", [], [FrS, Ra, Rb], [Qw, Qi], [Opcd == 4, Xo3 == 7, Bit31 == 0], "Paired Single Quantized Store Indexed";
    PsqStux, "psq_stux", [Ra], [FrS, Ra, Rb], [Qw, Qi], [Opcd == 4, Xo3 == 39, Bit31 == 0], "Paired Single Quantized Store with Update Indexed";

    // Paired-single arithmetic
    PsAdd, "ps_add", [FrD, Fpscr], [FrA, FrB], [Rc], [Opcd == 4, Xo4 == 21, Bits21_25 == 0], "Paired Single Add";
    PsDiv, "ps_div", [FrD, Fpscr], [FrA, FrB], [Rc], [Opcd == 4, Xo4 == 18, Bits21_25 == 0], "Paired Single Divide";
    PsMul, "ps_mul", [FrD, Fpscr], [FrA, FrC], [Rc], [Opcd == 4, Xo4 == 25, Bits16_20 == 0], "Paired Single Multiply";
    PsSub, "ps_sub", [FrD, Fpscr], [FrA, FrB], [Rc], [Opcd == 4, Xo4 == 20, Bits21_25 == 0], "Paired Single Subtract";
    PsAbs, "ps_abs", [FrD], [FrB], [Rc], [Opcd == 4, Xo1 == 264, Bits11_15 == 0], "Paired Single Absolute";
    PsNabs, "ps_nabs", [FrD], [FrB], [Rc], [Opcd == 4, Xo1 == 136, Bits11_15 == 0], "Paired Single Negative Absolute";
    PsNeg, "ps_neg", [FrD], [FrB], [Rc], [Opcd == 4, Xo1 == 40, Bits11_15 == 0], "Paired Single Negate";
    PsSel, "ps_sel", [FrD], [FrA, FrC, FrB], [Rc], [Opcd == 4, Xo4 == 23], "Paired Single Select";
    PsRes, "ps_res", [FrD, Fpscr], [FrB], [Rc], [Opcd == 4, Xo4 == 24, Bits11_15 == 0, Bits21_25 == 0], "Paired Single Reciprocal Estimate";
    PsRsqrte, "ps_rsqrte", [FrD, Fpscr], [FrB], [Rc], [Opcd == 4, Xo4 == 26, Bits11_15 == 0, Bits21_25 == 0], "Paired Single Reciprocal Square Root Estimate";
    PsMsub, "ps_msub", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 4, Xo4 == 28], "Paired Single Multiply-Subtract";
    PsMadd, "ps_madd", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 4, Xo4 == 29], "Paired Single Multiply-Add";
    PsNmsub, "ps_nmsub", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 4, Xo4 == 30], "Paired Single Negative Multiply-Subtract";
    PsNmadd, "ps_nmadd", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 4, Xo4 == 31], "Paired Single Negative Multiply-Add";
    PsMr, "ps_mr", [FrD], [FrB], [Rc], [Opcd == 4, Xo1 == 72, Bits11_15 == 0], "Paired Single Move Register";
    PsSum0, "ps_sum0", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 4, Xo4 == 10], "Paired Single Sum High";
    PsSum1, "ps_sum1", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 4, Xo4 == 11], "Paired Single Sum Low";
    PsMuls0, "ps_muls0", [FrD, Fpscr], [FrA, FrC], [Rc], [Opcd == 4, Xo4 == 12, Bits16_20 == 0], "Paired Single Multiply Scalar High";
    PsMuls1, "ps_muls1", [FrD, Fpscr], [FrA, FrC], [Rc], [Opcd == 4, Xo4 == 13, Bits16_20 == 0], "Paired Single Multiply Scalar Low";
    PsMadds0, "ps_madds0", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 4, Xo4 == 14], "Paired Single Multiply-Add Scalar High";
    PsMadds1, "ps_madds1", [FrD, Fpscr], [FrA, FrC, FrB], [Rc], [Opcd == 4, Xo4 == 15], "Paired Single Multiply-Add Scalar Low";
    PsCmpu0, "ps_cmpu0", [CrfD, Fpscr], [FrA, FrB], [], [Opcd == 4, Xo1 == 0, Bits9_10 == 0, Bit31 == 0], "Paired Single Compare Unordered High";
    PsCmpo0, "ps_cmpo0", [CrfD, Fpscr], [FrA, FrB], [], [Opcd == 4, Xo1 == 32, Bits9_10 == 0, Bit31 == 0], "Paired Single Compare Ordered High";
    PsCmpu1, "ps_cmpu1", [CrfD, Fpscr], [FrA, FrB], [], [Opcd == 4, Xo1 == 64, Bits9_10 == 0, Bit31 == 0], "Paired Single Compare Unordered Low";
    PsCmpo1, "ps_cmpo1", [CrfD, Fpscr], [FrA, FrB], [], [Opcd == 4, Xo1 == 96, Bits9_10 == 0, Bit31 == 0], "Paired Single Compare Ordered Low";
    PsMerge00, "ps_merge00", [FrD], [FrA, FrB], [Rc], [Opcd == 4, Xo1 == 528], "Paired Single Merge High";
    PsMerge01, "ps_merge01", [FrD], [FrA, FrB], [Rc], [Opcd == 4, Xo1 == 560], "Paired Single Merge Direct";
    PsMerge10, "ps_merge10", [FrD], [FrA, FrB], [Rc], [Opcd == 4, Xo1 == 592], "Paired Single Merge Swapped";
    PsMerge11, "ps_merge11", [FrD], [FrA, FrB], [Rc], [Opcd == 4, Xo1 == 624], "Paired Single Merge Low";
}
