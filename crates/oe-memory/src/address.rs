//! Guest virtual addresses

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// A 32-bit guest virtual address
///
/// Guest addresses are never host pointers. Data behind an address is only
/// reachable through [`MemoryManager`](crate::MemoryManager).
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(pub u32);

impl Address {
    /// The null guest address
    pub const NULL: Address = Address(0);

    /// Create an address
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw address value
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this is the null address
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Add a signed displacement, wrapping at 4 GB
    pub const fn offset(self, displacement: i32) -> Self {
        Self(self.0.wrapping_add(displacement as u32))
    }

    /// Round down to `align` (a power of two)
    pub const fn align_down(self, align: u32) -> Self {
        Self(crate::pages::align_down(self.0, align))
    }

    /// Round up to `align` (a power of two)
    pub const fn align_up(self, align: u32) -> Self {
        Self(crate::pages::align_up(self.0, align))
    }

    /// Whether the address is a multiple of `align`
    pub const fn is_aligned(self, align: u32) -> bool {
        self.0 & (align - 1) == 0
    }
}

impl From<u32> for Address {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Address> for u32 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl Add<u32> for Address {
    type Output = Address;

    fn add(self, rhs: u32) -> Self::Output {
        Address(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for Address {
    fn add_assign(&mut self, rhs: u32) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub<Address> for Address {
    type Output = u32;

    fn sub(self, rhs: Address) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

impl Sub<u32> for Address {
    type Output = Address;

    fn sub(self, rhs: u32) -> Self::Output {
        Address(self.0.wrapping_sub(rhs))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{:08X})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}
