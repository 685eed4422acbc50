//! Guest memory manager
//!
//! Guest memory is a list of mapped regions, each backed by a zero-filled
//! host buffer. All typed access converts to guest byte order through
//! [`GuestValue`], and raw host memory never leaves this module: callers get
//! an opaque [`HostPtr`] from [`MemoryManager::translate`] at most.

use std::sync::Arc;

use oe_core::config::MemoryConfig;
use oe_core::endian::GuestValue;
use oe_core::error::MemoryError;
use parking_lot::{Mutex, RwLock};

use crate::address::Address;
use crate::constants::*;
use crate::pages::{align_up, PageFlags};
use crate::reservation::{Reservation, ReservationTable};

/// One mapped guest region
struct Region {
    name: &'static str,
    base: u32,
    size: u32,
    flags: PageFlags,
    data: RwLock<Box<[u8]>>,
}

impl Region {
    fn contains(&self, address: u32, size: u32) -> bool {
        address >= self.base
            && (address - self.base) as u64 + size as u64 <= self.size as u64
    }
}

/// Opaque translation of a guest address
///
/// Identifies a byte inside a mapped region without exposing a host pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPtr {
    region: u32,
    offset: u32,
}

/// Bump allocator state for one region
#[derive(Debug)]
struct Arena {
    base: u32,
    end: u32,
    next: u32,
}

impl Arena {
    fn new(base: u32, size: u32) -> Self {
        Self {
            base,
            end: base + size,
            next: base,
        }
    }

    fn allocate(&mut self, size: u32, align: u32) -> Option<u32> {
        let start = align_up(self.next, align.max(1));
        let end = start.checked_add(size)?;
        if end > self.end {
            return None;
        }
        self.next = end;
        Some(start)
    }
}

/// Guest memory manager
pub struct MemoryManager {
    regions: RwLock<Vec<Arc<Region>>>,
    heap: Mutex<Arena>,
    stacks: Mutex<Arena>,
    thunks: Mutex<Arena>,
    reservations: ReservationTable,
}

impl MemoryManager {
    /// Create guest memory with the default layout
    pub fn new() -> Result<Arc<Self>, MemoryError> {
        Self::with_config(&MemoryConfig::default())
    }

    /// Create guest memory using the configured heap size
    pub fn with_config(config: &MemoryConfig) -> Result<Arc<Self>, MemoryError> {
        let heap_size = align_up(config.heap_size.max(PAGE_SIZE), PAGE_SIZE);
        let manager = Self {
            regions: RwLock::new(Vec::new()),
            heap: Mutex::new(Arena::new(HEAP_BASE, heap_size)),
            stacks: Mutex::new(Arena::new(STACK_BASE, STACK_SIZE)),
            thunks: Mutex::new(Arena::new(THUNK_BASE, THUNK_SIZE)),
            reservations: ReservationTable::new(),
        };

        manager.map("code", Address(CODE_BASE), CODE_SIZE, PageFlags::RWX)?;
        manager.map("heap", Address(HEAP_BASE), heap_size, PageFlags::RW)?;
        manager.map("stack", Address(STACK_BASE), STACK_SIZE, PageFlags::RW)?;
        manager.map("thunks", Address(THUNK_BASE), THUNK_SIZE, PageFlags::RWX)?;

        tracing::debug!(
            "Guest memory initialized: code 0x{:X}, heap 0x{:X}, stack 0x{:X}",
            CODE_SIZE,
            heap_size,
            STACK_SIZE
        );

        Ok(Arc::new(manager))
    }

    /// Map a new zero-filled region
    pub fn map(
        &self,
        name: &'static str,
        base: Address,
        size: u32,
        flags: PageFlags,
    ) -> Result<(), MemoryError> {
        let base = base.get();
        if size == 0 || base.checked_add(size - 1).is_none() {
            return Err(MemoryError::Overlap { base, size });
        }

        let mut regions = self.regions.write();
        let end = base as u64 + size as u64;
        let overlaps = regions
            .iter()
            .any(|r| (base as u64) < r.base as u64 + r.size as u64 && end > r.base as u64);
        if overlaps {
            return Err(MemoryError::Overlap { base, size });
        }

        regions.push(Arc::new(Region {
            name,
            base,
            size,
            flags,
            data: RwLock::new(vec![0u8; size as usize].into_boxed_slice()),
        }));
        tracing::trace!("Mapped {} at 0x{:08X}+0x{:X} ({:?})", name, base, size, flags);
        Ok(())
    }

    /// Remove the region starting at `base`
    pub fn unmap(&self, base: Address) -> Result<(), MemoryError> {
        let mut regions = self.regions.write();
        match regions.iter().position(|r| r.base == base.get()) {
            Some(index) => {
                let region = regions.remove(index);
                tracing::trace!("Unmapped {} at 0x{:08X}", region.name, region.base);
                Ok(())
            }
            None => Err(MemoryError::Unmapped {
                address: base.get(),
                size: 0,
            }),
        }
    }

    /// Whether `address..address + size` is entirely mapped by one region
    pub fn is_mapped(&self, address: Address, size: u32) -> bool {
        self.find(address.get(), size).is_ok()
    }

    fn find(&self, address: u32, size: u32) -> Result<(usize, Arc<Region>), MemoryError> {
        let regions = self.regions.read();
        regions
            .iter()
            .enumerate()
            .find(|(_, r)| r.contains(address, size))
            .map(|(index, r)| (index, Arc::clone(r)))
            .ok_or(MemoryError::Unmapped { address, size })
    }

    fn find_with(
        &self,
        address: u32,
        size: u32,
        required: PageFlags,
        access: &'static str,
    ) -> Result<Arc<Region>, MemoryError> {
        let (_, region) = self.find(address, size)?;
        if !region.flags.contains(required) {
            return Err(MemoryError::AccessViolation { address, access });
        }
        Ok(region)
    }

    /// Read a typed value in guest byte order
    pub fn read<T: GuestValue>(&self, address: Address) -> Result<T, MemoryError> {
        let size = T::SIZE as u32;
        let region = self.find_with(address.get(), size, PageFlags::READ, "Read")?;
        let offset = (address.get() - region.base) as usize;
        let data = region.data.read();
        Ok(T::read_guest_bytes(&data[offset..offset + T::SIZE]))
    }

    /// Write a typed value in guest byte order
    pub fn write<T: GuestValue>(&self, address: Address, value: T) -> Result<(), MemoryError> {
        let size = T::SIZE as u32;
        let region = self.find_with(address.get(), size, PageFlags::WRITE, "Write")?;
        let offset = (address.get() - region.base) as usize;
        {
            let mut data = region.data.write();
            value.write_guest_bytes(&mut data[offset..offset + T::SIZE]);
        }
        self.reservations.invalidate(address.get(), size);
        Ok(())
    }

    /// Fetch an instruction word, the region must be executable
    pub fn fetch_instruction(&self, address: Address) -> Result<u32, MemoryError> {
        let region = self.find_with(address.get(), 4, PageFlags::EXECUTE, "Execute")?;
        let offset = (address.get() - region.base) as usize;
        let data = region.data.read();
        Ok(u32::read_guest_bytes(&data[offset..offset + 4]))
    }

    /// Read a 16-bit big-endian value
    pub fn read_be16(&self, address: Address) -> Result<u16, MemoryError> {
        self.read(address)
    }

    /// Read a 32-bit big-endian value
    pub fn read_be32(&self, address: Address) -> Result<u32, MemoryError> {
        self.read(address)
    }

    /// Read a 64-bit big-endian value
    pub fn read_be64(&self, address: Address) -> Result<u64, MemoryError> {
        self.read(address)
    }

    /// Write a 32-bit big-endian value
    pub fn write_be32(&self, address: Address, value: u32) -> Result<(), MemoryError> {
        self.write(address, value)
    }

    /// Copy raw bytes out of guest memory
    pub fn read_bytes(&self, address: Address, out: &mut [u8]) -> Result<(), MemoryError> {
        let size = out.len() as u32;
        if size == 0 {
            return Ok(());
        }
        let region = self.find_with(address.get(), size, PageFlags::READ, "Read")?;
        let offset = (address.get() - region.base) as usize;
        let data = region.data.read();
        out.copy_from_slice(&data[offset..offset + out.len()]);
        Ok(())
    }

    /// Copy raw bytes into guest memory
    pub fn write_bytes(&self, address: Address, bytes: &[u8]) -> Result<(), MemoryError> {
        let size = bytes.len() as u32;
        if size == 0 {
            return Ok(());
        }
        let region = self.find_with(address.get(), size, PageFlags::WRITE, "Write")?;
        let offset = (address.get() - region.base) as usize;
        {
            let mut data = region.data.write();
            data[offset..offset + bytes.len()].copy_from_slice(bytes);
        }
        self.reservations.invalidate(address.get(), size);
        Ok(())
    }

    /// Fill `size` bytes with `value`
    pub fn fill(&self, address: Address, value: u8, size: u32) -> Result<(), MemoryError> {
        if size == 0 {
            return Ok(());
        }
        let region = self.find_with(address.get(), size, PageFlags::WRITE, "Write")?;
        let offset = (address.get() - region.base) as usize;
        {
            let mut data = region.data.write();
            data[offset..offset + size as usize].fill(value);
        }
        self.reservations.invalidate(address.get(), size);
        Ok(())
    }

    /// Translate a guest address into an opaque host location
    pub fn translate(&self, address: Address) -> Result<HostPtr, MemoryError> {
        let (index, region) = self.find(address.get(), 1)?;
        Ok(HostPtr {
            region: index as u32,
            offset: address.get() - region.base,
        })
    }

    /// Turn a host location back into the guest address it came from
    pub fn untranslate(&self, ptr: HostPtr) -> Result<Address, MemoryError> {
        let regions = self.regions.read();
        let region = regions
            .get(ptr.region as usize)
            .ok_or(MemoryError::InvalidHostPointer)?;
        if ptr.offset >= region.size {
            return Err(MemoryError::InvalidHostPointer);
        }
        Ok(Address(region.base + ptr.offset))
    }

    /// Allocate from the guest heap
    pub fn allocate(&self, size: u32, align: u32, flags: PageFlags) -> Result<Address, MemoryError> {
        if !PageFlags::RW.contains(flags) {
            return Err(MemoryError::AccessViolation {
                address: HEAP_BASE,
                access: "Allocate",
            });
        }
        let size = align_up(size.max(1), PAGE_SIZE);
        self.heap
            .lock()
            .allocate(size, align.max(PAGE_SIZE))
            .map(Address)
            .ok_or(MemoryError::OutOfMemory { size })
    }

    /// Allocate a guest stack, returns the (exclusive) top of the stack
    pub fn allocate_stack(&self, size: u32) -> Result<Address, MemoryError> {
        let size = align_up(size.max(PAGE_SIZE), PAGE_SIZE);
        let base = self
            .stacks
            .lock()
            .allocate(size, PAGE_SIZE)
            .ok_or(MemoryError::OutOfMemory { size })?;
        Ok(Address(base + size))
    }

    /// Allocate space for synthesized thunk code
    pub fn allocate_thunk(&self, size: u32) -> Result<Address, MemoryError> {
        self.thunks
            .lock()
            .allocate(size, 8)
            .map(Address)
            .ok_or(MemoryError::OutOfMemory { size })
    }

    /// Load a word and take a reservation on it (`lwarx`)
    pub fn load_reserved(&self, address: Address) -> Result<(u32, Reservation), MemoryError> {
        let reservation = self.reservations.reserve(address.get());
        let value = self.read::<u32>(address)?;
        Ok((value, reservation))
    }

    /// Store a word if the reservation still holds (`stwcx.`)
    pub fn store_conditional(
        &self,
        reservation: Reservation,
        address: Address,
        value: u32,
    ) -> Result<bool, MemoryError> {
        if reservation.address / RESERVATION_GRANULE != address.get() / RESERVATION_GRANULE {
            return Ok(false);
        }
        let region = self.find_with(address.get(), 4, PageFlags::WRITE, "Write")?;
        let offset = (address.get() - region.base) as usize;
        self.reservations.store_conditional(reservation, || {
            let mut data = region.data.write();
            value.write_guest_bytes(&mut data[offset..offset + 4]);
            Ok(())
        })
    }

    /// Names and extents of all mapped regions
    pub fn regions(&self) -> Vec<(&'static str, Address, u32, PageFlags)> {
        self.regions
            .read()
            .iter()
            .map(|r| (r.name, Address(r.base), r.size, r.flags))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_round_trip() {
        let mem = MemoryManager::new().unwrap();
        for addr in [CODE_BASE + 0x40, HEAP_BASE + 0x1234, STACK_BASE] {
            let ptr = mem.translate(Address(addr)).unwrap();
            assert_eq!(mem.untranslate(ptr).unwrap(), Address(addr));
        }
        assert!(mem.translate(Address(0xFBAD_CDE0)).is_err());
    }

    #[test]
    fn test_fetch_requires_execute() {
        let mem = MemoryManager::new().unwrap();
        mem.write::<u32>(Address(CODE_BASE), 0x3860_0005).unwrap();
        assert_eq!(mem.fetch_instruction(Address(CODE_BASE)).unwrap(), 0x3860_0005);

        let err = mem.fetch_instruction(Address(HEAP_BASE)).unwrap_err();
        assert!(matches!(err, MemoryError::AccessViolation { .. }));
    }

    #[test]
    fn test_load_reserved_store_conditional() {
        let mem = MemoryManager::new().unwrap();
        let addr = Address(HEAP_BASE + 0x100);
        mem.write::<u32>(addr, 10).unwrap();

        let (value, reservation) = mem.load_reserved(addr).unwrap();
        assert_eq!(value, 10);
        assert!(mem.store_conditional(reservation, addr, 11).unwrap());
        assert_eq!(mem.read::<u32>(addr).unwrap(), 11);

        let (_, reservation) = mem.load_reserved(addr).unwrap();
        mem.write::<u32>(addr, 99).unwrap();
        assert!(!mem.store_conditional(reservation, addr, 12).unwrap());
        assert_eq!(mem.read::<u32>(addr).unwrap(), 99);
    }

    #[test]
    fn test_map_rejects_overlap() {
        let mem = MemoryManager::new().unwrap();
        let err = mem
            .map("dup", Address(CODE_BASE + 0x1000), 0x1000, PageFlags::RW)
            .unwrap_err();
        assert!(matches!(err, MemoryError::Overlap { .. }));

        mem.map("extra", Address(0x8000_0000), 0x1000, PageFlags::RW).unwrap();
        mem.write::<u16>(Address(0x8000_0FFE), 0xBEEF).unwrap();
        mem.unmap(Address(0x8000_0000)).unwrap();
        assert!(!mem.is_mapped(Address(0x8000_0000), 4));
    }
}
