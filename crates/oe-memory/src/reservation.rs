//! Reservations backing `lwarx` / `stwcx.`
//!
//! Each reservation granule hashes to a slot holding a version counter with
//! a lock bit in the LSB. Any store to a granule bumps its slot's version, so
//! a conditional store only succeeds when nothing touched the granule since
//! the matching load. Two granules sharing a slot can make a conditional
//! store fail spuriously, which the architecture allows.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::{NUM_RESERVATION_SLOTS, RESERVATION_GRANULE};

/// Version step per invalidation
const VERSION_STEP: u64 = 2;

#[repr(C, align(64))]
struct Slot {
    /// Version counter with lock bit in LSB
    version: AtomicU64,
}

impl Slot {
    const LOCK_BIT: u64 = 1;

    const fn new() -> Self {
        Self {
            version: AtomicU64::new(0),
        }
    }

    fn acquire(&self) -> u64 {
        loop {
            let value = self.version.load(Ordering::Acquire);
            if value & Self::LOCK_BIT == 0 {
                return value;
            }
            std::hint::spin_loop();
        }
    }

    fn try_lock(&self, expected: u64) -> bool {
        self.version
            .compare_exchange(
                expected,
                expected | Self::LOCK_BIT,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    fn unlock_and_increment(&self) {
        let current = self.version.load(Ordering::Relaxed);
        let next = (current & !Self::LOCK_BIT) + VERSION_STEP;
        self.version.store(next, Ordering::Release);
    }

    fn invalidate(&self) {
        self.version.fetch_add(VERSION_STEP, Ordering::AcqRel);
    }
}

/// A reservation taken by `lwarx`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Reserved address
    pub address: u32,
    /// Slot version observed when the reservation was taken
    pub version: u64,
}

/// Hashed table of reservation slots shared by all cores
pub struct ReservationTable {
    slots: Box<[Slot]>,
}

impl ReservationTable {
    /// Create an empty table
    pub fn new() -> Self {
        let slots = (0..NUM_RESERVATION_SLOTS).map(|_| Slot::new()).collect();
        Self { slots }
    }

    fn slot(&self, address: u32) -> &Slot {
        let index = (address / RESERVATION_GRANULE) as usize % self.slots.len();
        &self.slots[index]
    }

    /// Take a reservation on `address`
    pub fn reserve(&self, address: u32) -> Reservation {
        Reservation {
            address,
            version: self.slot(address).acquire(),
        }
    }

    /// Run `store` if the reservation is still valid, returning whether it ran
    pub fn store_conditional<E>(
        &self,
        reservation: Reservation,
        store: impl FnOnce() -> Result<(), E>,
    ) -> Result<bool, E> {
        let slot = self.slot(reservation.address);
        if !slot.try_lock(reservation.version) {
            return Ok(false);
        }

        let result = store();
        slot.unlock_and_increment();
        result.map(|_| true)
    }

    /// Invalidate reservations covering `address..address + size`
    pub fn invalidate(&self, address: u32, size: u32) {
        if size == 0 {
            return;
        }
        let first = address / RESERVATION_GRANULE;
        let last = address.wrapping_add(size - 1) / RESERVATION_GRANULE;
        if last < first || (last - first) as usize >= self.slots.len() {
            for slot in self.slots.iter() {
                slot.invalidate();
            }
            return;
        }
        for granule in first..=last {
            self.slot(granule * RESERVATION_GRANULE).invalidate();
        }
    }
}

impl Default for ReservationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conditional_succeeds_once() {
        let table = ReservationTable::new();
        let reservation = table.reserve(0x1000);

        let stored = table.store_conditional::<()>(reservation, || Ok(())).unwrap();
        assert!(stored);

        // The version moved on, the same reservation is now stale
        let stored = table.store_conditional::<()>(reservation, || Ok(())).unwrap();
        assert!(!stored);
    }

    #[test]
    fn test_plain_store_breaks_reservation() {
        let table = ReservationTable::new();
        let reservation = table.reserve(0x2000);

        table.invalidate(0x2004, 4);

        let stored = table.store_conditional::<()>(reservation, || Ok(())).unwrap();
        assert!(!stored);
    }

    #[test]
    fn test_unrelated_store_keeps_reservation() {
        let table = ReservationTable::new();
        let reservation = table.reserve(0x3000);

        table.invalidate(0x3000 + RESERVATION_GRANULE, 4);

        let stored = table.store_conditional::<()>(reservation, || Ok(())).unwrap();
        assert!(stored);
    }

    #[test]
    fn test_failed_store_propagates_error() {
        let table = ReservationTable::new();
        let reservation = table.reserve(0x4000);

        let result = table.store_conditional(reservation, || Err("unmapped"));
        assert_eq!(result, Err("unmapped"));

        // The slot was unlocked again
        let reservation = table.reserve(0x4000);
        assert!(table.store_conditional::<()>(reservation, || Ok(())).unwrap());
    }
}
