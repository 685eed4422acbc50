//! Guest kernel layer for oxidized-espresso
//!
//! Cooperative scheduling of guest threads over virtual cores, wait queues,
//! alarms, guest mutexes and the kernel calls that expose them to guest code.

pub mod alarm;
pub mod calls;
pub mod cores;
pub mod mutex;
pub mod queue;
pub mod scheduler;
pub mod thread;
pub mod trampoline;

pub use alarm::{AlarmAction, AlarmId, AlarmManager, InterruptHandler, TIMEBASE_FREQUENCY};
pub use calls::register_kernel_calls;
pub use cores::VirtualCores;
pub use mutex::{GuestMutex, MutexId};
pub use queue::{QueueId, QueueOrder, ThreadQueue};
pub use scheduler::{Scheduler, Slice, EXIT_ABNORMAL, MAX_CORES};
pub use thread::{
    Affinity, ThreadId, ThreadInfo, ThreadParams, ThreadState, WaitResult, DEFAULT_PRIORITY, HIGHEST_PRIORITY,
    LOWEST_PRIORITY,
};
pub use trampoline::{write_trampoline, TrampolineAllocator};
