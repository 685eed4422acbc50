//! Code cache
//!
//! Maps guest block addresses to compiled blocks. Addresses that failed to
//! compile are remembered as not compilable so they go straight to the
//! interpreter. There is no per-block invalidation: loading new code clears
//! the whole cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use super::block::CompiledBlock;

/// Why a block could not be compiled
///
/// Never fatal, the interpreter runs the code instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationFailure {
    #[error("no code generator for {name} at 0x{address:08X}")]
    MissingHandler { address: u32, name: &'static str },

    #[error("block at 0x{address:08X} exceeds {limit} instructions")]
    CeilingReached { address: u32, limit: u32 },

    #[error("undecodable word 0x{word:08X} at 0x{address:08X}")]
    Decode { address: u32, word: u32 },

    #[error("cannot fetch code at 0x{address:08X}")]
    Fetch { address: u32 },
}

/// Cache slot for one guest address
#[derive(Debug, Clone)]
pub enum CacheEntry {
    Compiled(Arc<CompiledBlock>),
    NotCompilable(GenerationFailure),
}

/// Code cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Blocks compiled since the last clear
    pub compiled: u64,
    /// Addresses recorded as not compilable since the last clear
    pub not_compilable: u64,
    /// Lookups answered with a compiled block
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
}

#[derive(Default)]
struct Counters {
    compiled: AtomicU64,
    not_compilable: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Compiled code shared by every virtual core
#[derive(Default)]
pub struct CodeCache {
    entries: RwLock<HashMap<u32, CacheEntry>>,
    counters: Counters,
}

impl CodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the entry for `address`
    pub fn get(&self, address: u32) -> Option<CacheEntry> {
        let entry = self.entries.read().get(&address).cloned();
        match &entry {
            Some(CacheEntry::Compiled(_)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
            }
            Some(CacheEntry::NotCompilable(_)) => {}
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        entry
    }

    /// Store a compiled block, returning the shared handle
    pub fn insert(&self, block: CompiledBlock) -> Arc<CompiledBlock> {
        let block = Arc::new(block);
        self.entries
            .write()
            .insert(block.start(), CacheEntry::Compiled(Arc::clone(&block)));
        self.counters.compiled.fetch_add(1, Ordering::Relaxed);
        block
    }

    /// Remember that `address` cannot be compiled
    pub fn mark_not_compilable(&self, address: u32, failure: GenerationFailure) {
        self.entries
            .write()
            .insert(address, CacheEntry::NotCompilable(failure));
        self.counters.not_compilable.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop every entry and reset the statistics
    pub fn clear(&self) {
        self.entries.write().clear();
        self.counters.compiled.store(0, Ordering::Relaxed);
        self.counters.not_compilable.store(0, Ordering::Relaxed);
        self.counters.hits.store(0, Ordering::Relaxed);
        self.counters.misses.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            compiled: self.counters.compiled.load(Ordering::Relaxed),
            not_compilable: self.counters.not_compilable.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
        }
    }
}
