//! Guest memory map constants

/// Code and static data, loaded images start here
pub const CODE_BASE: u32 = 0x0000_0000;
/// Code region size (32 MB)
pub const CODE_SIZE: u32 = 0x0200_0000;

/// Heap region base, served by the bump allocator
pub const HEAP_BASE: u32 = 0x1000_0000;
/// Default heap size (64 MB)
pub const DEFAULT_HEAP_SIZE: u32 = 0x0400_0000;

/// Guest thread stacks
pub const STACK_BASE: u32 = 0x2000_0000;
/// Stack region size (16 MB)
pub const STACK_SIZE: u32 = 0x0100_0000;

/// Synthesized kernel-call thunks
pub const THUNK_BASE: u32 = 0xFF00_0000;
/// Thunk region size (64 KB)
pub const THUNK_SIZE: u32 = 0x0001_0000;

/// Standard page size (4 KB)
pub const PAGE_SIZE: u32 = 0x1000;

/// Reservation granule for lwarx/stwcx. (one cache line)
pub const RESERVATION_GRANULE: u32 = 32;

/// Number of hashed reservation slots
pub const NUM_RESERVATION_SLOTS: usize = 4096;
