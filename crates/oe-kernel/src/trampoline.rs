//! Kernel call trampolines
//!
//! A trampoline is two instructions, `kc id; blr`, that turn a guest call
//! into a host kernel call. Imports the loader cannot resolve are pointed at
//! trampolines whose handler only logs the call and returns 0.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use oe_core::error::MemoryError;
use oe_core::kernel_debug;
use oe_cpu::decoder::{Decoder, Field, OperationId};
use oe_cpu::{KernelCallOutcome, KernelCallTable};
use oe_memory::{Address, MemoryManager};
use parking_lot::Mutex;
use tracing::warn;

/// Bytes taken by one trampoline
pub const TRAMPOLINE_SIZE: u32 = 8;

/// First kernel call id handed out for unresolved imports
pub const STUB_KC_BASE: u32 = 0x1000;

/// Write `kc kc_id; bclr 20,0` at `address`
pub fn write_trampoline(
    memory: &MemoryManager,
    decoder: &Decoder,
    address: Address,
    kc_id: u32,
) -> Result<(), MemoryError> {
    let kc = decoder.encode(OperationId::Kc).with(Field::Kcn, kc_id);
    let blr = decoder.encode(OperationId::Bclr).with(Field::Bo, 20);
    memory.write_be32(address, kc.word())?;
    memory.write_be32(address + 4, blr.word())
}

/// Hands out trampolines from the thunk region
pub struct TrampolineAllocator {
    memory: Arc<MemoryManager>,
    decoder: Arc<Decoder>,
    table: Arc<KernelCallTable>,
    next_stub: AtomicU32,
    symbols: Mutex<Vec<(Address, String)>>,
}

impl TrampolineAllocator {
    pub fn new(memory: Arc<MemoryManager>, decoder: Arc<Decoder>, table: Arc<KernelCallTable>) -> Self {
        Self {
            memory,
            decoder,
            table,
            next_stub: AtomicU32::new(STUB_KC_BASE),
            symbols: Mutex::new(Vec::new()),
        }
    }

    /// Allocate a trampoline for an already registered kernel call
    pub fn thunk(&self, name: &str, kc_id: u32) -> Result<Address, MemoryError> {
        let address = self.memory.allocate_thunk(TRAMPOLINE_SIZE)?;
        write_trampoline(&self.memory, &self.decoder, address, kc_id)?;
        self.symbols.lock().push((address, name.to_string()));
        kernel_debug!("Trampoline {} -> kc 0x{:X} at {}", name, kc_id, address);
        Ok(address)
    }

    /// Point each unresolved import at a logging stub returning 0
    pub fn stub_imports(&self, names: &[&str]) -> Result<Vec<(String, Address)>, MemoryError> {
        names
            .iter()
            .map(|&name| {
                let id = self.next_stub.fetch_add(1, Ordering::Relaxed);
                let import = name.to_string();
                self.table.register(id, "unresolved_import", move |call| {
                    warn!(
                        target: "kernel",
                        "Unimplemented import {} called from 0x{:08X}", import, call.ctx.lr
                    );
                    call.set_return(0);
                    Ok(KernelCallOutcome::Continue)
                });
                Ok((name.to_string(), self.thunk(name, id)?))
            })
            .collect()
    }

    /// Name of the trampoline at `address`
    pub fn lookup(&self, address: Address) -> Option<String> {
        self.symbols
            .lock()
            .iter()
            .find(|(start, _)| *start == address)
            .map(|(_, name)| name.clone())
    }

    /// Every trampoline handed out, in allocation order
    pub fn symbols(&self) -> Vec<(Address, String)> {
        self.symbols.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trampoline_encoding() {
        let memory = MemoryManager::new().unwrap();
        let decoder = Decoder::new();
        let address = memory.allocate_thunk(TRAMPOLINE_SIZE).unwrap();
        write_trampoline(&memory, &decoder, address, 0x123).unwrap();

        let kc = oe_cpu::Instruction(memory.fetch_instruction(address).unwrap());
        assert_eq!(decoder.decode_id(kc), Some(OperationId::Kc));
        assert_eq!(kc.get(Field::Kcn), 0x123);
        let blr = oe_cpu::Instruction(memory.fetch_instruction(address + 4).unwrap());
        assert_eq!(decoder.decode_id(blr), Some(OperationId::Bclr));
        assert_eq!(blr.get(Field::Bo), 20);
    }

    #[test]
    fn test_stub_imports() {
        let memory = MemoryManager::new().unwrap();
        let table = Arc::new(KernelCallTable::new());
        let trampolines = TrampolineAllocator::new(memory, Arc::new(Decoder::new()), table.clone());
        let stubs = trampolines.stub_imports(&["OSReport", "GX2Init"]).unwrap();
        assert_eq!(stubs.len(), 2);
        assert_ne!(stubs[0].1, stubs[1].1);
        assert!(table.contains(STUB_KC_BASE));
        assert!(table.contains(STUB_KC_BASE + 1));
        assert_eq!(trampolines.lookup(stubs[1].1).as_deref(), Some("GX2Init"));
    }
}
