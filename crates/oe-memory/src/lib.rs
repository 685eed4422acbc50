//! Guest memory for oxidized-espresso
//!
//! A 32-bit big-endian guest address space made of mapped regions. All
//! access goes through [`MemoryManager`]; guest addresses are [`Address`]
//! values and never host pointers.

pub mod address;
pub mod constants;
pub mod manager;
pub mod pages;
pub mod reservation;

pub use address::Address;
pub use manager::{HostPtr, MemoryManager};
pub use pages::PageFlags;
pub use reservation::Reservation;
