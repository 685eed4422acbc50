//! Instruction fields
//!
//! Every piece of an instruction word is reached through a [`Field`]. Bit
//! ranges use the big-endian numbering of the PowerPC manuals (bit 0 is the
//! most significant bit), so `Opcd` is bits 0..=5.

use oe_core::bits::{make_bitmask, sign_extend};

macro_rules! instruction_fields {
    (
        fields { $($field:ident = $fname:literal [$first:literal ..= $last:literal],)* }
        markers { $($marker:ident = $mname:literal,)* }
    ) => {
        /// A named bit range inside an instruction, or a marker for implicit
        /// register state (markers occupy no bits)
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Field {
            $($field,)*
            $($marker,)*
        }

        impl Field {
            /// Every field and marker
            pub const ALL: &'static [Field] = &[$(Field::$field,)* $(Field::$marker,)*];

            /// Big-endian (first, last) bit numbers, `None` for markers
            pub const fn bits(self) -> Option<(u32, u32)> {
                match self {
                    $(Field::$field => Some(($first, $last)),)*
                    $(Field::$marker => None,)*
                }
            }

            /// Assembly name of the field
            pub const fn name(self) -> &'static str {
                match self {
                    $(Field::$field => $fname,)*
                    $(Field::$marker => $mname,)*
                }
            }
        }
    };
}

instruction_fields! {
    fields {
        Opcd = "opcd" [0 ..= 5],
        Rd = "rD" [6 ..= 10],
        Rs = "rS" [6 ..= 10],
        FrD = "frD" [6 ..= 10],
        FrS = "frS" [6 ..= 10],
        CrbD = "crbD" [6 ..= 10],
        Bo = "bo" [6 ..= 10],
        To = "to" [6 ..= 10],
        CrfD = "crfD" [6 ..= 8],
        L = "l" [10 ..= 10],
        Ra = "rA" [11 ..= 15],
        FrA = "frA" [11 ..= 15],
        CrbA = "crbA" [11 ..= 15],
        Bi = "bi" [11 ..= 15],
        CrfS = "crfS" [11 ..= 13],
        Sr = "sr" [12 ..= 15],
        Crm = "crm" [12 ..= 19],
        Fm = "fm" [7 ..= 14],
        Imm = "imm" [16 ..= 19],
        Rb = "rB" [16 ..= 20],
        FrB = "frB" [16 ..= 20],
        CrbB = "crbB" [16 ..= 20],
        Sh = "sh" [16 ..= 20],
        Nb = "nb" [16 ..= 20],
        FrC = "frC" [21 ..= 25],
        Mb = "mb" [21 ..= 25],
        Me = "me" [26 ..= 30],
        Simm = "simm" [16 ..= 31],
        Uimm = "uimm" [16 ..= 31],
        D = "d" [16 ..= 31],
        Li = "li" [6 ..= 29],
        Bd = "bd" [16 ..= 29],
        Aa = "aa" [30 ..= 30],
        Lk = "lk" [31 ..= 31],
        Oe = "oe" [21 ..= 21],
        Rc = "rc" [31 ..= 31],
        Xo1 = "xo1" [21 ..= 30],
        Xo2 = "xo2" [22 ..= 30],
        Xo3 = "xo3" [25 ..= 30],
        Xo4 = "xo4" [26 ..= 30],
        Spr = "spr" [11 ..= 20],
        Tbr = "tbr" [11 ..= 20],
        Kcn = "kcn" [6 ..= 30],
        W = "w" [16 ..= 16],
        I = "i" [17 ..= 19],
        Qd = "qd" [20 ..= 31],
        Qw = "qw" [21 ..= 21],
        Qi = "qi" [22 ..= 24],
        Bit6 = "_6" [6 ..= 6],
        Bits6_9 = "_6_9" [6 ..= 9],
        Bits6_10 = "_6_10" [6 ..= 10],
        Bit9 = "_9" [9 ..= 9],
        Bits9_10 = "_9_10" [9 ..= 10],
        Bit11 = "_11" [11 ..= 11],
        Bits11_15 = "_11_15" [11 ..= 15],
        Bits14_15 = "_14_15" [14 ..= 15],
        Bit15 = "_15" [15 ..= 15],
        Bits16_20 = "_16_20" [16 ..= 20],
        Bits16_29 = "_16_29" [16 ..= 29],
        Bit20 = "_20" [20 ..= 20],
        Bits21_25 = "_21_25" [21 ..= 25],
        Bit30 = "_30" [30 ..= 30],
        Bit31 = "_31" [31 ..= 31],
    }
    markers {
        XerCa = "XERC",
        XerOv = "XERO",
        XerSo = "XERSO",
        Cr = "CR",
        Lr = "LR",
        Ctr = "CTR",
        Fpscr = "FPSCR",
        Msr = "MSR",
        Rsrv = "RSRV",
    }
}

impl Field {
    /// Whether the field is a marker with no bits
    pub const fn is_marker(self) -> bool {
        self.bits().is_none()
    }

    /// LSB-0 position of the lowest bit
    pub const fn start(self) -> u32 {
        match self.bits() {
            Some((_, last)) => 31 - last,
            None => 0,
        }
    }

    /// LSB-0 position of the highest bit
    pub const fn end(self) -> u32 {
        match self.bits() {
            Some((first, _)) => 31 - first,
            None => 0,
        }
    }

    /// Width in bits, 0 for markers
    pub const fn width(self) -> u32 {
        match self.bits() {
            Some((first, last)) => last - first + 1,
            None => 0,
        }
    }

    /// Absolute mask of the field inside an instruction word
    pub const fn mask(self) -> u32 {
        if self.is_marker() {
            0
        } else {
            make_bitmask(self.start(), self.end())
        }
    }

    /// Raw value of this field in `word`
    #[inline]
    pub const fn extract(self, word: u32) -> u32 {
        (word & self.mask()) >> self.start()
    }

    /// `word` with this field replaced by `value`
    #[inline]
    pub const fn insert(self, word: u32, value: u32) -> u32 {
        (word & !self.mask()) | ((value << self.start()) & self.mask())
    }
}

/// A 32-bit instruction word
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Instruction(pub u32);

impl Instruction {
    /// Raw instruction word
    #[inline]
    pub const fn word(self) -> u32 {
        self.0
    }

    /// Raw value of `field`
    #[inline]
    pub const fn get(self, field: Field) -> u32 {
        field.extract(self.0)
    }

    /// Copy of the instruction with `field` set to `value`
    #[inline]
    pub const fn with(self, field: Field, value: u32) -> Self {
        Self(field.insert(self.0, value))
    }

    #[inline]
    pub const fn opcd(self) -> u32 {
        self.get(Field::Opcd)
    }

    #[inline]
    pub const fn rd(self) -> usize {
        self.get(Field::Rd) as usize
    }

    #[inline]
    pub const fn rs(self) -> usize {
        self.get(Field::Rs) as usize
    }

    #[inline]
    pub const fn ra(self) -> usize {
        self.get(Field::Ra) as usize
    }

    #[inline]
    pub const fn rb(self) -> usize {
        self.get(Field::Rb) as usize
    }

    #[inline]
    pub const fn frd(self) -> usize {
        self.get(Field::FrD) as usize
    }

    #[inline]
    pub const fn frs(self) -> usize {
        self.get(Field::FrS) as usize
    }

    #[inline]
    pub const fn fra(self) -> usize {
        self.get(Field::FrA) as usize
    }

    #[inline]
    pub const fn frb(self) -> usize {
        self.get(Field::FrB) as usize
    }

    #[inline]
    pub const fn frc(self) -> usize {
        self.get(Field::FrC) as usize
    }

    /// Sign-extended 16-bit immediate
    #[inline]
    pub const fn simm(self) -> u32 {
        sign_extend(self.get(Field::Simm), 16)
    }

    #[inline]
    pub const fn uimm(self) -> u32 {
        self.get(Field::Uimm)
    }

    /// Sign-extended load/store displacement
    #[inline]
    pub const fn d(self) -> u32 {
        sign_extend(self.get(Field::D), 16)
    }

    /// Sign-extended branch displacement in bytes
    #[inline]
    pub const fn li(self) -> u32 {
        sign_extend(self.get(Field::Li) << 2, 26)
    }

    /// Sign-extended conditional branch displacement in bytes
    #[inline]
    pub const fn bd(self) -> u32 {
        sign_extend(self.get(Field::Bd) << 2, 16)
    }

    #[inline]
    pub const fn bo(self) -> u32 {
        self.get(Field::Bo)
    }

    #[inline]
    pub const fn bi(self) -> u32 {
        self.get(Field::Bi)
    }

    #[inline]
    pub const fn aa(self) -> bool {
        self.get(Field::Aa) != 0
    }

    #[inline]
    pub const fn lk(self) -> bool {
        self.get(Field::Lk) != 0
    }

    #[inline]
    pub const fn oe(self) -> bool {
        self.get(Field::Oe) != 0
    }

    #[inline]
    pub const fn rc(self) -> bool {
        self.get(Field::Rc) != 0
    }

    #[inline]
    pub const fn crfd(self) -> u32 {
        self.get(Field::CrfD)
    }

    #[inline]
    pub const fn crfs(self) -> u32 {
        self.get(Field::CrfS)
    }

    #[inline]
    pub const fn crbd(self) -> u32 {
        self.get(Field::CrbD)
    }

    #[inline]
    pub const fn crba(self) -> u32 {
        self.get(Field::CrbA)
    }

    #[inline]
    pub const fn crbb(self) -> u32 {
        self.get(Field::CrbB)
    }

    #[inline]
    pub const fn sh(self) -> u32 {
        self.get(Field::Sh)
    }

    #[inline]
    pub const fn mb(self) -> u32 {
        self.get(Field::Mb)
    }

    #[inline]
    pub const fn me(self) -> u32 {
        self.get(Field::Me)
    }

    #[inline]
    pub const fn nb(self) -> u32 {
        self.get(Field::Nb)
    }

    #[inline]
    pub const fn crm(self) -> u32 {
        self.get(Field::Crm)
    }

    #[inline]
    pub const fn sr(self) -> usize {
        self.get(Field::Sr) as usize
    }

    #[inline]
    pub const fn kcn(self) -> u32 {
        self.get(Field::Kcn)
    }

    /// Special purpose register number, with the encoded halves swapped back
    #[inline]
    pub const fn spr(self) -> u32 {
        decode_spr(self.get(Field::Spr))
    }

    /// Time base register number
    #[inline]
    pub const fn tbr(self) -> u32 {
        decode_spr(self.get(Field::Tbr))
    }

    /// Copy of the instruction with an SPR number encoded into `spr`
    #[inline]
    pub const fn with_spr(self, spr: u32) -> Self {
        self.with(Field::Spr, encode_spr(spr))
    }
}

/// Swap the two 5-bit halves of an encoded SPR field
#[inline]
pub const fn decode_spr(raw: u32) -> u32 {
    ((raw << 5) & 0x3E0) | ((raw >> 5) & 0x1F)
}

/// Encode an SPR number into its swapped field representation
#[inline]
pub const fn encode_spr(spr: u32) -> u32 {
    decode_spr(spr)
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Instruction(0x{:08X})", self.0)
    }
}

impl From<u32> for Instruction {
    fn from(word: u32) -> Self {
        Self(word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_geometry() {
        assert_eq!(Field::Opcd.start(), 26);
        assert_eq!(Field::Opcd.width(), 6);
        assert_eq!(Field::Opcd.mask(), 0xFC00_0000);
        assert_eq!(Field::Rd.mask(), 0x03E0_0000);
        assert_eq!(Field::Simm.mask(), 0x0000_FFFF);
        assert_eq!(Field::Rc.mask(), 0x0000_0001);
        assert_eq!(Field::Xo1.mask(), 0x0000_07FE);
        assert!(Field::Lr.is_marker());
        assert_eq!(Field::Lr.mask(), 0);
    }

    #[test]
    fn test_instruction_fields() {
        // addi r3, r1, -8
        let instr = Instruction(0x3861_FFF8);
        assert_eq!(instr.opcd(), 14);
        assert_eq!(instr.rd(), 3);
        assert_eq!(instr.ra(), 1);
        assert_eq!(instr.simm(), (-8i32) as u32);
    }

    #[test]
    fn test_spr_swap() {
        // mflr r0 is mfspr r0, 8
        let instr = Instruction(0x7C08_02A6);
        assert_eq!(instr.spr(), 8);
        assert_eq!(Instruction(0x7C00_02A6).with_spr(8), instr);
        assert_eq!(decode_spr(encode_spr(912)), 912);
    }

    #[test]
    fn test_branch_displacements() {
        // b -4
        let instr = Instruction(0x4BFF_FFFC);
        assert_eq!(instr.li(), (-4i32) as u32);
        // bne cr0, +8
        let instr = Instruction(0x4082_0008);
        assert_eq!(instr.bo(), 4);
        assert_eq!(instr.bi(), 2);
        assert_eq!(instr.bd(), 8);
    }
}
