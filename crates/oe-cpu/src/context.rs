//! Guest thread register context

use std::fmt;
use std::sync::Arc;

use oe_memory::Reservation;
use parking_lot::Mutex;

use crate::trace::Tracer;

/// Return sentinel: reaching this address ends a host to guest call
pub const CALLBACK_ADDR: u32 = 0xFBAD_CDE0;

/// XER summary overflow
pub const XER_SO: u32 = 0x8000_0000;
/// XER overflow
pub const XER_OV: u32 = 0x4000_0000;
/// XER carry
pub const XER_CA: u32 = 0x2000_0000;
/// XER byte count used by the string instructions
pub const XER_BYTE_COUNT: u32 = 0x7F;

/// Condition register field bits
pub mod cr {
    pub const LT: u32 = 0b1000;
    pub const GT: u32 = 0b0100;
    pub const EQ: u32 = 0b0010;
    pub const SO: u32 = 0b0001;
}

/// Special purpose register numbers
pub mod spr {
    pub const XER: u32 = 1;
    pub const LR: u32 = 8;
    pub const CTR: u32 = 9;
    pub const SRR0: u32 = 26;
    pub const SRR1: u32 = 27;
    pub const TBL: u32 = 268;
    pub const TBU: u32 = 269;
    pub const GQR0: u32 = 912;
    pub const GQR7: u32 = 919;
    pub const HID2: u32 = 920;
    pub const UPIR: u32 = 1007;
}

/// A paired-single floating point register
///
/// Both slots hold raw IEEE-754 double bit patterns. Double precision
/// instructions use `ps0`; single precision results are written to both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FloatRegister {
    pub ps0: u64,
    pub ps1: u64,
}

impl FloatRegister {
    /// Slot 0 as a double
    #[inline]
    pub fn f64(self) -> f64 {
        f64::from_bits(self.ps0)
    }

    /// Set slot 0 from a double, leaving slot 1 alone
    #[inline]
    pub fn set_f64(&mut self, value: f64) {
        self.ps0 = value.to_bits();
    }

    /// Raw bits of slot 0
    #[inline]
    pub fn bits(self) -> u64 {
        self.ps0
    }

    #[inline]
    pub fn set_bits(&mut self, bits: u64) {
        self.ps0 = bits;
    }

    #[inline]
    pub fn ps0(self) -> f64 {
        f64::from_bits(self.ps0)
    }

    #[inline]
    pub fn ps1(self) -> f64 {
        f64::from_bits(self.ps1)
    }

    #[inline]
    pub fn set_ps0(&mut self, value: f64) {
        self.ps0 = value.to_bits();
    }

    #[inline]
    pub fn set_ps1(&mut self, value: f64) {
        self.ps1 = value.to_bits();
    }

    /// Write a single precision result into both slots
    #[inline]
    pub fn set_single(&mut self, value: f32) {
        let bits = (value as f64).to_bits();
        self.ps0 = bits;
        self.ps1 = bits;
    }
}

/// Architectural state named by a diff or a trace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Cia,
    Nia,
    Gpr(u8),
    Fpr(u8),
    Ps1(u8),
    Gqr(u8),
    Cr,
    Xer,
    Lr,
    Ctr,
    Fpscr,
    Msr,
    Sr(u8),
    Reserve,
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateField::Cia => write!(f, "cia"),
            StateField::Nia => write!(f, "nia"),
            StateField::Gpr(n) => write!(f, "r{}", n),
            StateField::Fpr(n) => write!(f, "f{}", n),
            StateField::Ps1(n) => write!(f, "f{}.ps1", n),
            StateField::Gqr(n) => write!(f, "gqr{}", n),
            StateField::Cr => write!(f, "cr"),
            StateField::Xer => write!(f, "xer"),
            StateField::Lr => write!(f, "lr"),
            StateField::Ctr => write!(f, "ctr"),
            StateField::Fpscr => write!(f, "fpscr"),
            StateField::Msr => write!(f, "msr"),
            StateField::Sr(n) => write!(f, "sr{}", n),
            StateField::Reserve => write!(f, "reserve"),
        }
    }
}

/// One differing field between two contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDiff {
    pub field: StateField,
    pub found: u64,
    pub expected: u64,
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>8}: 0x{:016X} expected 0x{:016X}",
            self.field.to_string(),
            self.found,
            self.expected
        )
    }
}

/// Register state of one guest thread
#[derive(Clone)]
pub struct ThreadContext {
    /// General purpose registers
    pub gpr: [u32; 32],
    /// Floating point / paired single registers
    pub fpr: [FloatRegister; 32],
    /// Condition register
    pub cr: u32,
    /// Fixed point exception register
    pub xer: u32,
    /// Link register
    pub lr: u32,
    /// Count register
    pub ctr: u32,
    /// Floating point status and control register
    pub fpscr: u32,
    /// Machine state register
    pub msr: u32,
    /// Segment registers
    pub sr: [u32; 16],
    /// Graphics quantization registers
    pub gqr: [u32; 8],
    /// Time base, advanced by the scheduler
    pub tb: u64,
    /// Save/restore registers for `rfi`
    pub srr0: u32,
    pub srr1: u32,
    /// Current instruction address
    pub cia: u32,
    /// Next instruction address
    pub nia: u32,
    /// Reservation held by `lwarx`
    pub reserve: Option<Reservation>,
    /// Virtual core this context currently runs on
    pub core_id: usize,
    /// Guest thread owning this context
    pub thread_id: u32,
    /// Trace ring buffer shared with the debugger
    pub tracer: Option<Arc<Mutex<Tracer>>>,
}

impl Default for ThreadContext {
    fn default() -> Self {
        Self {
            gpr: [0; 32],
            fpr: [FloatRegister::default(); 32],
            cr: 0,
            xer: 0,
            lr: 0,
            ctr: 0,
            fpscr: 0,
            msr: 0,
            sr: [0; 16],
            gqr: [0; 8],
            tb: 0,
            srr0: 0,
            srr1: 0,
            cia: 0,
            nia: CALLBACK_ADDR,
            reserve: None,
            core_id: 0,
            thread_id: 0,
            tracer: None,
        }
    }
}

impl ThreadContext {
    /// Create a context with all registers cleared
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with a tracer of `capacity` entries (0 disables)
    pub fn with_tracer(capacity: usize) -> Self {
        Self {
            tracer: (capacity > 0).then(|| Arc::new(Mutex::new(Tracer::new(capacity)))),
            ..Self::default()
        }
    }

    /// Condition register field `n` (0..=7)
    #[inline]
    pub fn cr_field(&self, n: u32) -> u32 {
        (self.cr >> ((7 - n) * 4)) & 0xF
    }

    /// Set condition register field `n` (0..=7)
    #[inline]
    pub fn set_cr_field(&mut self, n: u32, value: u32) {
        let shift = (7 - n) * 4;
        self.cr = (self.cr & !(0xF << shift)) | ((value & 0xF) << shift);
    }

    /// Condition register bit in big-endian numbering (0..=31)
    #[inline]
    pub fn cr_bit(&self, bit: u32) -> bool {
        (self.cr >> (31 - bit)) & 1 != 0
    }

    #[inline]
    pub fn set_cr_bit(&mut self, bit: u32, value: bool) {
        let mask = 1 << (31 - bit);
        if value {
            self.cr |= mask;
        } else {
            self.cr &= !mask;
        }
    }

    #[inline]
    pub fn xer_so(&self) -> bool {
        self.xer & XER_SO != 0
    }

    #[inline]
    pub fn xer_ov(&self) -> bool {
        self.xer & XER_OV != 0
    }

    #[inline]
    pub fn xer_ca(&self) -> bool {
        self.xer & XER_CA != 0
    }

    #[inline]
    pub fn set_xer_ca(&mut self, value: bool) {
        if value {
            self.xer |= XER_CA;
        } else {
            self.xer &= !XER_CA;
        }
    }

    /// Set OV, and SO along with it when overflowing
    #[inline]
    pub fn set_xer_ov(&mut self, value: bool) {
        if value {
            self.xer |= XER_OV | XER_SO;
        } else {
            self.xer &= !XER_OV;
        }
    }

    /// Write LT/GT/EQ/SO of cr0 from a signed result
    #[inline]
    pub fn update_cr0(&mut self, value: u32) {
        let value = value as i32;
        let flags = if value < 0 {
            cr::LT
        } else if value > 0 {
            cr::GT
        } else {
            cr::EQ
        };
        let so = if self.xer_so() { cr::SO } else { 0 };
        self.set_cr_field(0, flags | so);
    }

    /// Copy the FPSCR exception summary bits into cr1
    #[inline]
    pub fn update_cr1(&mut self) {
        self.set_cr_field(1, self.fpscr >> 28);
    }

    /// Base register or zero when `ra` is r0
    #[inline]
    pub fn gpr_or_zero(&self, ra: usize) -> u32 {
        if ra == 0 {
            0
        } else {
            self.gpr[ra]
        }
    }

    /// Read a special purpose register
    pub fn spr(&self, n: u32) -> Option<u32> {
        Some(match n {
            spr::XER => self.xer,
            spr::LR => self.lr,
            spr::CTR => self.ctr,
            spr::SRR0 => self.srr0,
            spr::SRR1 => self.srr1,
            spr::TBL => self.tb as u32,
            spr::TBU => (self.tb >> 32) as u32,
            spr::GQR0..=spr::GQR7 => self.gqr[(n - spr::GQR0) as usize],
            spr::UPIR => self.core_id as u32,
            spr::HID2 => 0,
            _ => return None,
        })
    }

    /// Write a special purpose register, returning false for unknown numbers
    pub fn set_spr(&mut self, n: u32, value: u32) -> bool {
        match n {
            spr::XER => self.xer = value,
            spr::LR => self.lr = value,
            spr::CTR => self.ctr = value,
            spr::SRR0 => self.srr0 = value,
            spr::SRR1 => self.srr1 = value,
            spr::GQR0..=spr::GQR7 => self.gqr[(n - spr::GQR0) as usize] = value,
            spr::HID2 => {}
            _ => return false,
        }
        true
    }

    /// Every field of `self` that differs from `expected`
    ///
    /// Covers the state an instruction may change. The time base and the
    /// reservation are left out.
    pub fn diff(&self, expected: &ThreadContext) -> Vec<FieldDiff> {
        let mut diffs = Vec::new();
        let mut check = |field, found: u64, expected: u64| {
            if found != expected {
                diffs.push(FieldDiff {
                    field,
                    found,
                    expected,
                });
            }
        };

        check(StateField::Nia, self.nia as u64, expected.nia as u64);
        for i in 0..32 {
            check(StateField::Gpr(i as u8), self.gpr[i] as u64, expected.gpr[i] as u64);
        }
        for i in 0..32 {
            check(StateField::Fpr(i as u8), self.fpr[i].ps0, expected.fpr[i].ps0);
            check(StateField::Ps1(i as u8), self.fpr[i].ps1, expected.fpr[i].ps1);
        }
        for i in 0..8 {
            check(StateField::Gqr(i as u8), self.gqr[i] as u64, expected.gqr[i] as u64);
        }
        check(StateField::Lr, self.lr as u64, expected.lr as u64);
        check(StateField::Ctr, self.ctr as u64, expected.ctr as u64);
        check(StateField::Cr, self.cr as u64, expected.cr as u64);
        check(StateField::Xer, self.xer as u64, expected.xer as u64);
        check(StateField::Fpscr, self.fpscr as u64, expected.fpscr as u64);
        check(StateField::Msr, self.msr as u64, expected.msr as u64);
        for i in 0..16 {
            check(StateField::Sr(i as u8), self.sr[i] as u64, expected.sr[i] as u64);
        }
        diffs
    }

    /// Current value of a state field
    pub fn value(&self, field: StateField) -> u64 {
        match field {
            StateField::Cia => self.cia as u64,
            StateField::Nia => self.nia as u64,
            StateField::Gpr(n) => self.gpr[n as usize] as u64,
            StateField::Fpr(n) => self.fpr[n as usize].ps0,
            StateField::Ps1(n) => self.fpr[n as usize].ps1,
            StateField::Gqr(n) => self.gqr[n as usize] as u64,
            StateField::Cr => self.cr as u64,
            StateField::Xer => self.xer as u64,
            StateField::Lr => self.lr as u64,
            StateField::Ctr => self.ctr as u64,
            StateField::Fpscr => self.fpscr as u64,
            StateField::Msr => self.msr as u64,
            StateField::Sr(n) => self.sr[n as usize] as u64,
            StateField::Reserve => self.reserve.map(|r| r.address as u64).unwrap_or(u64::MAX),
        }
    }
}

impl fmt::Debug for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadContext")
            .field("thread_id", &self.thread_id)
            .field("core_id", &self.core_id)
            .field("cia", &format_args!("0x{:08X}", self.cia))
            .field("nia", &format_args!("0x{:08X}", self.nia))
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ThreadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "thread {} core {} cia 0x{:08X} nia 0x{:08X}",
            self.thread_id, self.core_id, self.cia, self.nia
        )?;
        for row in 0..8 {
            for col in 0..4 {
                let n = row * 4 + col;
                write!(f, "r{:<2} 0x{:08X}  ", n, self.gpr[n])?;
            }
            writeln!(f)?;
        }
        writeln!(
            f,
            "lr  0x{:08X}  ctr 0x{:08X}  cr  0x{:08X}  xer 0x{:08X}",
            self.lr, self.ctr, self.cr, self.xer
        )?;
        write!(f, "msr 0x{:08X}  fpscr 0x{:08X}", self.msr, self.fpscr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cr_fields() {
        let mut ctx = ThreadContext::new();
        ctx.set_cr_field(0, 0b1010);
        ctx.set_cr_field(7, 0b0101);
        assert_eq!(ctx.cr, 0xA000_0005);
        assert_eq!(ctx.cr_field(0), 0b1010);
        assert!(ctx.cr_bit(0));
        assert!(!ctx.cr_bit(1));
        assert!(ctx.cr_bit(31));
    }

    #[test]
    fn test_cr0_includes_summary_overflow() {
        let mut ctx = ThreadContext::new();
        ctx.update_cr0((-5i32) as u32);
        assert_eq!(ctx.cr_field(0), cr::LT);

        ctx.set_xer_ov(true);
        assert!(ctx.xer_so());
        ctx.set_xer_ov(false);
        assert!(ctx.xer_so());

        ctx.update_cr0(0);
        assert_eq!(ctx.cr_field(0), cr::EQ | cr::SO);
    }

    #[test]
    fn test_float_register_reinterpretation() {
        let mut reg = FloatRegister::default();
        reg.set_f64(1.5);
        assert_eq!(reg.bits(), 1.5f64.to_bits());
        assert_eq!(reg.ps1, 0);

        reg.set_single(2.0);
        assert_eq!(reg.ps0(), 2.0);
        assert_eq!(reg.ps1(), 2.0);
    }

    #[test]
    fn test_spr_access() {
        let mut ctx = ThreadContext::new();
        assert!(ctx.set_spr(spr::LR, 0x1234));
        assert!(ctx.set_spr(spr::GQR0 + 3, 0x0004_0004));
        assert_eq!(ctx.lr, 0x1234);
        assert_eq!(ctx.spr(spr::GQR0 + 3), Some(0x0004_0004));
        assert!(!ctx.set_spr(1234, 0));
        assert_eq!(ctx.spr(1234), None);
    }

    #[test]
    fn test_diff() {
        let a = ThreadContext::new();
        let mut b = a.clone();
        assert!(a.diff(&b).is_empty());

        b.gpr[3] = 7;
        b.fpr[1].ps1 = 1;
        let diffs = b.diff(&a);
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].field, StateField::Gpr(3));
        assert_eq!(diffs[0].found, 7);
        assert_eq!(diffs[1].field, StateField::Ps1(1));
    }
}
