//! Region protection flags

use bitflags::bitflags;

bitflags! {
    /// Protection flags of a mapped guest region
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        /// Region is readable
        const READ    = 0b0001;
        /// Region is writable
        const WRITE   = 0b0010;
        /// Instructions may be fetched from the region
        const EXECUTE = 0b0100;

        /// Read and write access
        const RW  = Self::READ.bits() | Self::WRITE.bits();
        /// Read, write, and execute access
        const RWX = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
        /// Read and execute access
        const RX  = Self::READ.bits() | Self::EXECUTE.bits();
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Round `value` up to a multiple of `align` (a power of two)
#[inline]
pub const fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// Round `value` down to a multiple of `align` (a power of two)
#[inline]
pub const fn align_down(value: u32, align: u32) -> u32 {
    value & !(align - 1)
}
