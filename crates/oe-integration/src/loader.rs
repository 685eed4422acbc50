//! Flat big-endian code images
//!
//! An image is a raw dump of guest code and data, loaded unchanged at a base
//! address inside the code region. There are no headers: the entry point is
//! the base unless given explicitly.

use std::fs;
use std::path::Path;

use oe_core::error::LoaderError;
use oe_memory::constants::{CODE_BASE, CODE_SIZE};
use oe_memory::{Address, MemoryManager};
use tracing::{debug, info};

/// A flat image ready to be copied into guest memory
#[derive(Debug, Clone)]
pub struct FlatImage {
    pub name: String,
    pub base: u32,
    pub entry: u32,
    pub bytes: Vec<u8>,
}

impl FlatImage {
    pub fn new(name: impl Into<String>, base: u32, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            base,
            entry: base,
            bytes,
        }
    }

    pub fn with_entry(mut self, entry: u32) -> Self {
        self.entry = entry;
        self
    }

    /// Read an image file to be loaded at `base`
    pub fn from_file(path: &Path, base: u32) -> Result<Self, LoaderError> {
        let bytes = fs::read(path).map_err(|source| LoaderError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        debug!("Read {} bytes from {:?}", bytes.len(), path);
        Ok(Self::new(name, base, bytes))
    }

    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Check the image against the code region
    pub fn validate(&self) -> Result<(), LoaderError> {
        let size = self.bytes.len();
        if size == 0 {
            return Err(LoaderError::Empty);
        }
        if size % 4 != 0 {
            return Err(LoaderError::Unaligned { size });
        }
        let end = u64::from(self.base) + size as u64;
        let region_end = u64::from(CODE_BASE) + u64::from(CODE_SIZE);
        if !(CODE_BASE..CODE_BASE + CODE_SIZE).contains(&self.base) || end > region_end {
            return Err(LoaderError::OutOfRange { base: self.base, size });
        }
        if self.entry % 4 != 0 || self.entry < self.base || u64::from(self.entry) >= end {
            return Err(LoaderError::BadEntry { entry: self.entry });
        }
        Ok(())
    }

    /// Copy the image into guest memory
    pub fn load(&self, memory: &MemoryManager) -> Result<(), LoaderError> {
        self.validate()?;
        memory.write_bytes(Address(self.base), &self.bytes)?;
        info!(
            "Loaded {} at 0x{:08X} ({} bytes, entry 0x{:08X})",
            self.name,
            self.base,
            self.bytes.len(),
            self.entry
        );
        Ok(())
    }
}
