//! Emulator root for oxidized-espresso
//!
//! Ties guest memory, the execution engine, the scheduler and the debugger
//! together and loads flat code images.

pub mod emulator;
pub mod loader;
pub mod threads;

pub use emulator::{Emulator, EmulatorState};
pub use loader::FlatImage;
pub use threads::SchedulerThreads;
