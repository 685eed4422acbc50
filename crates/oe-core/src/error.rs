//! Error types for oxidized-espresso

use thiserror::Error;

/// Top level emulator error
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("CPU error: {0}")]
    Cpu(#[from] CpuError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Emulator is not running")]
    NotRunning,

    #[error("Timed out waiting for guest threads")]
    Timeout,
}

/// Guest memory access errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Access to unmapped memory at 0x{address:08X} (size {size})")]
    Unmapped { address: u32, size: u32 },

    #[error("{access} access violation at 0x{address:08X}")]
    AccessViolation { address: u32, access: &'static str },

    #[error("Out of guest memory (requested 0x{size:X} bytes)")]
    OutOfMemory { size: u32 },

    #[error("Region 0x{base:08X}+0x{size:X} overlaps an existing mapping")]
    Overlap { base: u32, size: u32 },

    #[error("Host pointer does not belong to guest memory")]
    InvalidHostPointer,
}

/// Guest instruction execution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CpuError {
    #[error("Could not decode instruction 0x{word:08X} at 0x{address:08X}")]
    Decode { address: u32, word: u32 },

    #[error("Unimplemented instruction {name} (0x{word:08X}) at 0x{address:08X}")]
    Unimplemented {
        address: u32,
        word: u32,
        name: &'static str,
    },

    #[error("JIT/interpreter mismatch at 0x{address:08X} (0x{word:08X}):\n{diff}")]
    ComplianceMismatch {
        address: u32,
        word: u32,
        diff: String,
    },

    #[error("Unknown kernel call {id} at 0x{address:08X}")]
    UnknownKernelCall { address: u32, id: u32 },

    #[error("Kernel call {id} failed: {message}")]
    KernelCall { id: u32, message: String },

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// Scheduler / guest kernel errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Invalid thread id {0}")]
    InvalidThread(u32),

    #[error("Invalid wait queue id {0}")]
    InvalidQueue(u32),

    #[error("Invalid mutex id {0}")]
    InvalidMutex(u32),

    #[error("Thread {thread} does not own mutex {mutex}")]
    NotOwner { thread: u32, mutex: u32 },

    #[error("Thread {0} cannot join itself")]
    JoinSelf(u32),

    #[error("No guest thread is running on core {0}")]
    NoCurrentThread(usize),

    #[error("Invalid affinity mask 0x{0:X}")]
    InvalidAffinity(u32),

    #[error("Invalid priority {0}")]
    InvalidPriority(u32),

    #[error("Failed to start virtual core {core}: {message}")]
    CoreStart { core: usize, message: String },

    #[error("Failed to start the alarm thread: {0}")]
    AlarmThread(String),

    #[error("Scheduler has been shut down")]
    ShutDown,

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// Image loading errors
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Failed to read image {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Image is empty")]
    Empty,

    #[error("Image size 0x{size:X} is not a multiple of 4")]
    Unaligned { size: usize },

    #[error("Image 0x{base:08X}+0x{size:X} does not fit the code region")]
    OutOfRange { base: u32, size: usize },

    #[error("Entry point 0x{entry:08X} lies outside the image")]
    BadEntry { entry: u32 },

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;
