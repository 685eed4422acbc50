//! Kernel call dispatch
//!
//! The `kc` instruction transfers control from guest code to host code. The
//! execution engine only knows the [`KernelCallDispatch`] trait; the guest OS
//! layer registers handlers by id in a [`KernelCallTable`].

use std::collections::HashMap;
use std::sync::Arc;

use oe_core::error::CpuError;
use oe_memory::{Address, MemoryManager};
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::context::{ThreadContext, CALLBACK_ADDR};

/// Kernel call id that ends a host to guest call
pub const KC_HALT: u32 = 0;

/// Arguments passed in r3..r10 before spilling to the stack
const GPR_ARGS: usize = 8;
/// Floating point arguments passed in f1..f8
const FPR_ARGS: usize = 8;

/// What the guest thread does after a kernel call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelCallOutcome {
    /// Keep executing at NIA
    Continue,
    /// Leave the execution loop so the scheduler can act
    Yield,
}

/// State handed to a kernel call handler
pub struct KernelCall<'a> {
    pub ctx: &'a mut ThreadContext,
    pub memory: &'a MemoryManager,
    pub core_id: usize,
}

impl KernelCall<'_> {
    /// Integer argument `n`, counting from r3
    ///
    /// Arguments past the eighth are read from the caller's parameter save
    /// area at `r1 + 8`.
    pub fn arg(&self, n: usize) -> Result<u32, CpuError> {
        if n < GPR_ARGS {
            return Ok(self.ctx.gpr[3 + n]);
        }
        let offset = 8 + 4 * (n - GPR_ARGS) as u32;
        Ok(self.memory.read_be32(Address(self.ctx.gpr[1]) + offset)?)
    }

    /// Floating point argument `n`, counting from f1
    pub fn arg_f64(&self, n: usize) -> Option<f64> {
        (n < FPR_ARGS).then(|| self.ctx.fpr[1 + n].f64())
    }

    pub fn set_return(&mut self, value: u32) {
        self.ctx.gpr[3] = value;
    }

    pub fn set_return_u64(&mut self, value: u64) {
        self.ctx.gpr[3] = (value >> 32) as u32;
        self.ctx.gpr[4] = value as u32;
    }

    pub fn set_return_f64(&mut self, value: f64) {
        self.ctx.fpr[1].set_f64(value);
    }
}

/// Routes kernel call ids to host code
pub trait KernelCallDispatch: Send + Sync {
    fn dispatch(&self, id: u32, call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, CpuError>;
}

/// Boxed kernel call handler
pub type KernelCallHandler =
    Box<dyn Fn(&mut KernelCall<'_>) -> Result<KernelCallOutcome, CpuError> + Send + Sync>;

struct Entry {
    name: &'static str,
    handler: KernelCallHandler,
}

/// Table of registered kernel calls
///
/// `KC_HALT` is always present and returns to the host by jumping to the
/// callback sentinel.
pub struct KernelCallTable {
    entries: RwLock<HashMap<u32, Arc<Entry>>>,
}

impl KernelCallTable {
    pub fn new() -> Self {
        let table = Self {
            entries: RwLock::new(HashMap::new()),
        };
        table.register(KC_HALT, "halt", |call| {
            call.ctx.nia = CALLBACK_ADDR;
            Ok(KernelCallOutcome::Continue)
        });
        table
    }

    /// Register `handler` under `id`, replacing any previous handler
    pub fn register<F>(&self, id: u32, name: &'static str, handler: F)
    where
        F: Fn(&mut KernelCall<'_>) -> Result<KernelCallOutcome, CpuError> + Send + Sync + 'static,
    {
        let entry = Arc::new(Entry {
            name,
            handler: Box::new(handler),
        });
        if let Some(previous) = self.entries.write().insert(id, entry) {
            warn!("Kernel call {} ({}) replaced by {}", id, previous.name, name);
        } else {
            debug!("Registered kernel call {} ({})", id, name);
        }
    }

    pub fn unregister(&self, id: u32) -> bool {
        self.entries.write().remove(&id).is_some()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.read().contains_key(&id)
    }

    pub fn name(&self, id: u32) -> Option<&'static str> {
        self.entries.read().get(&id).map(|e| e.name)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.entries.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for KernelCallTable {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelCallDispatch for KernelCallTable {
    fn dispatch(&self, id: u32, call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, CpuError> {
        // Handlers may register other calls, so the lock is not held across them
        let entry = self.entries.read().get(&id).cloned();
        let Some(entry) = entry else {
            return Err(CpuError::UnknownKernelCall {
                address: call.ctx.cia,
                id,
            });
        };
        trace!(target: "kernel", "kc {} ({}) from 0x{:08X}", id, entry.name, call.ctx.cia);
        (entry.handler)(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oe_memory::constants::STACK_BASE;

    #[test]
    fn test_halt_is_registered() {
        let table = KernelCallTable::new();
        let memory = MemoryManager::new().unwrap();
        let mut ctx = ThreadContext::new();
        ctx.nia = 0x1004;

        let mut call = KernelCall {
            ctx: &mut ctx,
            memory: &memory,
            core_id: 0,
        };
        let outcome = table.dispatch(KC_HALT, &mut call).unwrap();
        assert_eq!(outcome, KernelCallOutcome::Continue);
        assert_eq!(ctx.nia, CALLBACK_ADDR);
    }

    #[test]
    fn test_unknown_call() {
        let table = KernelCallTable::new();
        let memory = MemoryManager::new().unwrap();
        let mut ctx = ThreadContext::new();
        ctx.cia = 0x2000;
        let mut call = KernelCall {
            ctx: &mut ctx,
            memory: &memory,
            core_id: 0,
        };
        assert_eq!(
            table.dispatch(99, &mut call),
            Err(CpuError::UnknownKernelCall { address: 0x2000, id: 99 })
        );
    }

    #[test]
    fn test_argument_marshalling() {
        let table = KernelCallTable::new();
        table.register(7, "sum", |call| {
            let mut total = 0u32;
            for n in 0..10 {
                total += call.arg(n)?;
            }
            call.set_return(total);
            Ok(KernelCallOutcome::Continue)
        });

        let memory = MemoryManager::new().unwrap();
        let sp = Address(STACK_BASE + 0x100);
        memory.write_be32(sp + 8, 100).unwrap();
        memory.write_be32(sp + 12, 200).unwrap();

        let mut ctx = ThreadContext::new();
        ctx.gpr[1] = sp.get();
        for n in 0..8 {
            ctx.gpr[3 + n] = 1;
        }

        let mut call = KernelCall {
            ctx: &mut ctx,
            memory: &memory,
            core_id: 0,
        };
        table.dispatch(7, &mut call).unwrap();
        assert_eq!(ctx.gpr[3], 308);
    }
}
