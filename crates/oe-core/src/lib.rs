//! Core infrastructure for oxidized-espresso
//!
//! Shared error types, configuration, logging setup and the low level
//! bitfield / byte-order helpers used wherever data crosses the guest/host
//! boundary.

pub mod bits;
pub mod config;
pub mod endian;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::{EmulatorError, Result};
