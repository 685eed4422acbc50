//! Guest byte order conversion
//!
//! The guest is big-endian. Every typed access to guest memory goes through
//! [`GuestValue`], which swaps to and from host order, so nothing outside
//! this module cares what the host byte order is.

use bytemuck::Pod;

/// A plain value that can be stored in guest memory
pub trait GuestValue: Pod + Copy + PartialEq + std::fmt::Debug {
    /// Size in bytes
    const SIZE: usize = std::mem::size_of::<Self>();

    /// Reverse the byte order of the value
    fn byte_swap(self) -> Self;

    /// Convert a value read in guest (big-endian) order to host order
    #[inline]
    fn from_guest(raw: Self) -> Self {
        if cfg!(target_endian = "little") {
            raw.byte_swap()
        } else {
            raw
        }
    }

    /// Convert a host value to guest (big-endian) order
    #[inline]
    fn to_guest(self) -> Self {
        Self::from_guest(self)
    }

    /// Decode from big-endian guest bytes, `bytes.len()` must equal `SIZE`
    #[inline]
    fn read_guest_bytes(bytes: &[u8]) -> Self {
        Self::from_guest(bytemuck::pod_read_unaligned(bytes))
    }

    /// Encode into big-endian guest bytes, `out.len()` must equal `SIZE`
    #[inline]
    fn write_guest_bytes(self, out: &mut [u8]) {
        out.copy_from_slice(bytemuck::bytes_of(&self.to_guest()));
    }
}

macro_rules! impl_guest_int {
    ($($ty:ty),*) => {
        $(
            impl GuestValue for $ty {
                #[inline]
                fn byte_swap(self) -> Self {
                    self.swap_bytes()
                }
            }
        )*
    };
}

impl_guest_int!(u8, u16, u32, u64, i8, i16, i32, i64);

impl GuestValue for f32 {
    #[inline]
    fn byte_swap(self) -> Self {
        f32::from_bits(self.to_bits().swap_bytes())
    }
}

impl GuestValue for f64 {
    #[inline]
    fn byte_swap(self) -> Self {
        f64::from_bits(self.to_bits().swap_bytes())
    }
}

/// A value kept in guest byte order, converted on every access
#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct Be<T: GuestValue>(T);

impl<T: GuestValue> Be<T> {
    /// Wrap a host-order value
    pub fn new(value: T) -> Self {
        Self(value.to_guest())
    }

    /// Wrap a value that is already in guest order
    pub fn from_raw(raw: T) -> Self {
        Self(raw)
    }

    /// Host-order value
    pub fn get(self) -> T {
        T::from_guest(self.0)
    }

    /// Store a host-order value
    pub fn set(&mut self, value: T) {
        self.0 = value.to_guest();
    }

    /// Guest-order representation
    pub fn raw(self) -> T {
        self.0
    }
}

impl<T: GuestValue> std::fmt::Debug for Be<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Be({:?})", self.get())
    }
}

impl<T: GuestValue> From<T> for Be<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_bytes_are_big_endian() {
        let mut buf = [0u8; 4];
        0x1234_5678u32.write_guest_bytes(&mut buf);
        assert_eq!(buf, [0x12, 0x34, 0x56, 0x78]);
        assert_eq!(u32::read_guest_bytes(&buf), 0x1234_5678);
    }

    #[test]
    fn test_float_round_trip() {
        let mut buf = [0u8; 8];
        1.5f64.write_guest_bytes(&mut buf);
        assert_eq!(buf, [0x3F, 0xF8, 0, 0, 0, 0, 0, 0]);
        assert_eq!(f64::read_guest_bytes(&buf), 1.5);
    }

    #[test]
    fn test_be_wrapper() {
        let mut value = Be::new(0xAABBu16);
        assert_eq!(value.get(), 0xAABB);
        assert_eq!(bytemuck::bytes_of(&value.raw()), &[0xAA, 0xBB]);

        value.set(0x0102);
        assert_eq!(value.get(), 0x0102);
    }

    #[test]
    fn test_single_byte_unchanged() {
        assert_eq!(0x7Fu8.byte_swap(), 0x7F);
        assert_eq!((-2i8).to_guest(), -2);
    }
}
