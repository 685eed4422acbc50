//! Bitfield helpers over fixed-width integers
//!
//! Bit positions here use LSB-0 numbering. Instruction fields are described
//! in the big-endian numbering of the PowerPC manuals and converted by the
//! decoder before they reach these helpers.

/// Mask with bits `start..=end` set (LSB-0, inclusive)
#[inline]
pub const fn make_bitmask(start: u32, end: u32) -> u32 {
    let width = end - start + 1;
    if width >= 32 {
        u32::MAX
    } else {
        ((1u32 << width) - 1) << start
    }
}

/// Mask with the low `width` bits set
#[inline]
pub const fn width_mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

/// Sign extend the low `bits` bits of `value` to 32 bits
#[inline]
pub const fn sign_extend(value: u32, bits: u32) -> u32 {
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as u32
}

/// Sign extend the low `bits` bits of `value` to 64 bits
#[inline]
pub const fn sign_extend_64(value: u64, bits: u32) -> u64 {
    let shift = 64 - bits;
    (((value << shift) as i64) >> shift) as u64
}

/// Rotate mask used by `rlwinm` and friends (big-endian bit numbers, wraps
/// when `mb > me`)
#[inline]
pub const fn ppc_mask(mb: u32, me: u32) -> u32 {
    let begin = u32::MAX >> mb;
    let end = u32::MAX << (31 - me);
    if mb <= me {
        begin & end
    } else {
        begin | end
    }
}

/// Generic bit access on fixed-width unsigned integers
pub trait BitField: Copy {
    /// Width of the type in bits
    const BITS: u32;

    /// Extract `width` bits starting at `start`
    fn get_bits(self, start: u32, width: u32) -> Self;

    /// Replace `width` bits starting at `start` with the low bits of `value`
    fn set_bits(self, start: u32, width: u32, value: Self) -> Self;

    /// Test bit `n`
    fn get_bit(self, n: u32) -> bool;

    /// Set or clear bit `n`
    fn set_bit(self, n: u32, value: bool) -> Self;
}

macro_rules! impl_bitfield {
    ($($ty:ty),*) => {
        $(
            impl BitField for $ty {
                const BITS: u32 = <$ty>::BITS;

                #[inline]
                fn get_bits(self, start: u32, width: u32) -> Self {
                    if width == 0 {
                        return 0;
                    }
                    let mask = <$ty>::MAX >> (Self::BITS - width);
                    (self >> start) & mask
                }

                #[inline]
                fn set_bits(self, start: u32, width: u32, value: Self) -> Self {
                    if width == 0 {
                        return self;
                    }
                    let mask = (<$ty>::MAX >> (Self::BITS - width)) << start;
                    (self & !mask) | ((value << start) & mask)
                }

                #[inline]
                fn get_bit(self, n: u32) -> bool {
                    (self >> n) & 1 != 0
                }

                #[inline]
                fn set_bit(self, n: u32, value: bool) -> Self {
                    if value {
                        self | (1 << n)
                    } else {
                        self & !(1 << n)
                    }
                }
            }
        )*
    };
}

impl_bitfield!(u8, u16, u32, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_bitmask() {
        assert_eq!(make_bitmask(0, 0), 0x1);
        assert_eq!(make_bitmask(26, 31), 0xFC00_0000);
        assert_eq!(make_bitmask(0, 31), 0xFFFF_FFFF);
        assert_eq!(make_bitmask(1, 10), 0x7FE);
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0xFFFF, 16), 0xFFFF_FFFF);
        assert_eq!(sign_extend(0x7FFF, 16), 0x7FFF);
        assert_eq!(sign_extend(0x0200_0000, 26), 0xFE00_0000);
        assert_eq!(sign_extend_64(0x8000_0000, 32), 0xFFFF_FFFF_8000_0000);
    }

    #[test]
    fn test_ppc_mask() {
        assert_eq!(ppc_mask(0, 31), 0xFFFF_FFFF);
        assert_eq!(ppc_mask(16, 31), 0x0000_FFFF);
        assert_eq!(ppc_mask(0, 15), 0xFFFF_0000);
        // Wrapping mask
        assert_eq!(ppc_mask(28, 3), 0xF000_000F);
    }

    #[test]
    fn test_bitfield_trait() {
        let value = 0xABCD_1234u32;
        assert_eq!(value.get_bits(16, 16), 0xABCD);
        assert_eq!(value.get_bits(0, 4), 0x4);
        assert_eq!(value.set_bits(0, 16, 0xFFFF), 0xABCD_FFFF);
        assert_eq!(0u8.set_bit(7, true), 0x80);
        assert!(0x8000_0000_0000_0000u64.get_bit(63));
        assert_eq!(0xFFu16.set_bits(4, 4, 0), 0x0F);
    }
}
