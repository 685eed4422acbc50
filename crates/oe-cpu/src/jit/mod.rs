//! Block compiler
//!
//! Guest code is compiled one basic block at a time into a chain of host
//! closures (see [`block`]). A block starts at the requested address and
//! runs until the first instruction that never falls through. Conditional
//! branches stay inside the block; their in-block targets become local
//! jumps. Blocks that would exceed the instruction ceiling, or that start
//! with an instruction without a generator, are recorded as not compilable
//! and left to the interpreter.

pub mod block;
pub mod cache;
pub mod codegen;

pub use block::{BlockExit, CompiledBlock, Op, OpExit};
pub use cache::{CacheEntry, CacheStats, CodeCache, GenerationFailure};

use std::sync::Arc;

use oe_core::{jit_debug, jit_trace};
use oe_memory::{Address, MemoryManager};

use crate::decoder::{Decoder, Instruction, OperationId};
use codegen::BlockLayout;

/// Default block instruction ceiling
pub const DEFAULT_MAX_INSTRUCTIONS: u32 = 3000;

/// Closure JIT with its code cache
pub struct Jit {
    decoder: Arc<Decoder>,
    cache: CodeCache,
    max_instructions: u32,
}

impl Jit {
    pub fn new(decoder: Arc<Decoder>, max_instructions: u32) -> Self {
        Self {
            decoder,
            cache: CodeCache::new(),
            max_instructions: max_instructions.max(1),
        }
    }

    pub fn cache(&self) -> &CodeCache {
        &self.cache
    }

    pub fn max_instructions(&self) -> u32 {
        self.max_instructions
    }

    /// Compiled block for `address`, compiling it on first use
    ///
    /// Returns `None` when the address is known not to be compilable; the
    /// caller interprets instead.
    pub fn lookup(&self, address: u32, memory: &MemoryManager) -> Option<Arc<CompiledBlock>> {
        match self.cache.get(address) {
            Some(CacheEntry::Compiled(block)) => return Some(block),
            Some(CacheEntry::NotCompilable(_)) => return None,
            None => {}
        }

        match self.compile(address, memory) {
            Ok(block) => {
                jit_debug!(
                    "Compiled block 0x{:08X}..0x{:08X} ({} instructions)",
                    block.start(),
                    block.end(),
                    block.len()
                );
                Some(self.cache.insert(block))
            }
            Err(failure) => {
                jit_debug!("Block 0x{:08X} not compilable: {}", address, failure);
                self.cache.mark_not_compilable(address, failure);
                None
            }
        }
    }

    /// Scan and compile the block starting at `start`
    pub fn compile(&self, start: u32, memory: &MemoryManager) -> Result<CompiledBlock, GenerationFailure> {
        let mut scanned: Vec<(Instruction, OperationId)> = Vec::new();
        let mut address = start;
        loop {
            if scanned.len() as u32 >= self.max_instructions {
                return Err(GenerationFailure::CeilingReached {
                    address: start,
                    limit: self.max_instructions,
                });
            }
            let word = memory
                .fetch_instruction(Address(address))
                .map_err(|_| GenerationFailure::Fetch { address })?;
            let instr = Instruction(word);
            let id = self
                .decoder
                .decode_id(instr)
                .ok_or(GenerationFailure::Decode { address, word })?;

            // Without a generator the block stops short and the interpreter
            // takes over at this instruction
            if !codegen::has_generator(id) {
                if scanned.is_empty() {
                    return Err(GenerationFailure::MissingHandler {
                        address,
                        name: id.name(),
                    });
                }
                jit_trace!("Block 0x{:08X} truncated before {} at 0x{:08X}", start, id.name(), address);
                break;
            }

            scanned.push((instr, id));
            if codegen::ends_block(id, instr) {
                break;
            }
            address = address.wrapping_add(4);
        }

        self.generate(start, &scanned, BlockLayout::new(start, scanned.len()))
    }

    /// Compile a single instruction as its own block
    ///
    /// Branches always leave such a block, so running it executes exactly
    /// one instruction. Used by the compliance checker.
    pub fn compile_instruction(&self, address: u32, instr: Instruction) -> Result<CompiledBlock, GenerationFailure> {
        let id = self.decoder.decode_id(instr).ok_or(GenerationFailure::Decode {
            address,
            word: instr.word(),
        })?;
        self.generate(address, &[(instr, id)], BlockLayout::single(address))
    }

    fn generate(
        &self,
        start: u32,
        scanned: &[(Instruction, OperationId)],
        layout: BlockLayout,
    ) -> Result<CompiledBlock, GenerationFailure> {
        let mut ops = Vec::with_capacity(scanned.len());
        let mut ids = Vec::with_capacity(scanned.len());
        for (index, &(instr, id)) in scanned.iter().enumerate() {
            let address = start.wrapping_add(4 * index as u32);
            let op = codegen::emit(id, instr, address, &layout).ok_or(GenerationFailure::MissingHandler {
                address,
                name: id.name(),
            })?;
            ops.push(op);
            ids.push(id);
        }
        Ok(CompiledBlock::new(start, ops, ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ThreadContext;
    use crate::decoder::Field;
    use crate::interpreter::ExecEnv;
    use crate::kernel::KernelCallTable;
    use oe_memory::PageFlags;

    fn write_program(memory: &MemoryManager, base: u32, program: &[Instruction]) {
        for (i, instr) in program.iter().enumerate() {
            memory
                .write_be32(Address(base + 4 * i as u32), instr.word())
                .unwrap();
        }
    }

    #[test]
    fn test_block_ends_at_unconditional_branch() {
        let decoder = Arc::new(Decoder::new());
        let memory = MemoryManager::new().unwrap();
        let jit = Jit::new(decoder.clone(), 16);
        write_program(
            &memory,
            0x100,
            &[
                decoder.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Simm, 1),
                decoder.encode(OperationId::Bc).with(Field::Bo, 12).with(Field::Bd, 2),
                decoder.encode(OperationId::Bclr).with(Field::Bo, 20),
                decoder.encode(OperationId::Addi).with(Field::Rd, 4).with(Field::Simm, 1),
            ],
        );

        let block = jit.compile(0x100, &memory).unwrap();
        assert_eq!(block.len(), 3);
        assert_eq!(block.end(), 0x10C);
        assert_eq!(block.operations()[2], OperationId::Bclr);
    }

    #[test]
    fn test_ceiling_is_a_generation_failure() {
        let decoder = Arc::new(Decoder::new());
        let memory = MemoryManager::new().unwrap();
        let jit = Jit::new(decoder.clone(), 4);
        let nop = decoder.encode(OperationId::Ori);
        write_program(&memory, 0, &[nop; 8]);

        assert_eq!(
            jit.compile(0, &memory).unwrap_err(),
            GenerationFailure::CeilingReached { address: 0, limit: 4 }
        );
        assert!(jit.lookup(0, &memory).is_none());
        assert_eq!(jit.cache().stats().not_compilable, 1);
        // Second lookup is answered from the cache
        assert!(jit.lookup(0, &memory).is_none());
        assert_eq!(jit.cache().stats().not_compilable, 1);
    }

    #[test]
    fn test_missing_generator_truncates_block() {
        let decoder = Arc::new(Decoder::new());
        let memory = MemoryManager::new().unwrap();
        let jit = Jit::new(decoder.clone(), 16);
        let sc = decoder.encode(OperationId::Sc);
        write_program(&memory, 0x200, &[decoder.encode(OperationId::Ori), sc]);

        let block = jit.compile(0x200, &memory).unwrap();
        assert_eq!(block.len(), 1);
        assert!(matches!(
            jit.compile(0x204, &memory),
            Err(GenerationFailure::MissingHandler { address: 0x204, name: "sc" })
        ));
    }

    #[test]
    fn test_fetch_failure() {
        let decoder = Arc::new(Decoder::new());
        let memory = MemoryManager::new().unwrap();
        let jit = Jit::new(decoder, 16);
        let heap = memory.allocate(0x1000, 0x1000, PageFlags::RW).unwrap();
        assert_eq!(
            jit.compile(heap.get(), &memory).unwrap_err(),
            GenerationFailure::Fetch { address: heap.get() }
        );
    }

    #[test]
    fn test_local_loop() {
        let decoder = Arc::new(Decoder::new());
        let memory = MemoryManager::new().unwrap();
        let kernel = KernelCallTable::new();
        let jit = Jit::new(decoder.clone(), 16);
        // r3 = 0; ctr = 5; loop: r3 += 2; bdnz loop; kc 0
        write_program(
            &memory,
            0x300,
            &[
                decoder.encode(OperationId::Addi).with(Field::Rd, 3),
                decoder.encode(OperationId::Addi).with(Field::Rd, 4).with(Field::Simm, 5),
                decoder.encode(OperationId::Mtspr).with(Field::Rs, 4).with_spr(crate::context::spr::CTR),
                decoder.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Ra, 3).with(Field::Simm, 2),
                decoder.encode(OperationId::Bc).with(Field::Bo, 16).with(Field::Bd, (-4i32 >> 2) as u32 & 0x3FFF),
                decoder.encode(OperationId::Kc),
            ],
        );

        let block = jit.lookup(0x300, &memory).unwrap();
        assert_eq!(block.len(), 6);

        let mut ctx = ThreadContext::new();
        let env = ExecEnv {
            memory: &memory,
            kernel: &kernel,
            core_id: 0,
            interrupt: None,
        };
        assert_eq!(block.run(&mut ctx, &env).unwrap(), BlockExit::Exit);
        assert_eq!(ctx.gpr[3], 10);
        assert_eq!(ctx.ctr, 0);
        assert_eq!(ctx.nia, crate::context::CALLBACK_ADDR);
        assert_eq!(ctx.cia, 0x314);

        assert!(jit.lookup(0x300, &memory).is_some());
        assert_eq!(jit.cache().stats().hits, 1);
    }

    #[test]
    fn test_local_loop_leaves_on_interrupt() {
        let decoder = Arc::new(Decoder::new());
        let memory = MemoryManager::new().unwrap();
        let kernel = KernelCallTable::new();
        let jit = Jit::new(decoder.clone(), 16);
        // ctr = 5; loop: r3 += 2; bdnz loop; kc 0
        write_program(
            &memory,
            0x400,
            &[
                decoder.encode(OperationId::Addi).with(Field::Rd, 4).with(Field::Simm, 5),
                decoder.encode(OperationId::Mtspr).with(Field::Rs, 4).with_spr(crate::context::spr::CTR),
                decoder.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Ra, 3).with(Field::Simm, 2),
                decoder.encode(OperationId::Bc).with(Field::Bo, 16).with(Field::Bd, (-4i32 >> 2) as u32 & 0x3FFF),
                decoder.encode(OperationId::Kc),
            ],
        );
        let block = jit.lookup(0x400, &memory).unwrap();

        let pending = std::sync::atomic::AtomicBool::new(true);
        let env = ExecEnv {
            memory: &memory,
            kernel: &kernel,
            core_id: 0,
            interrupt: Some(&pending),
        };
        let mut ctx = ThreadContext::new();
        assert_eq!(block.run(&mut ctx, &env).unwrap(), BlockExit::Exit);
        // One pass through the loop body, then out at the back edge
        assert_eq!(ctx.gpr[3], 2);
        assert_eq!(ctx.ctr, 4);
        assert_eq!(ctx.nia, 0x408);
        // The request is left for the engine to consume
        assert!(env.interrupt_pending());
    }
}
