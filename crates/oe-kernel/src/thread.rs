//! Guest threads

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;
use oe_cpu::ThreadContext;

use crate::alarm::AlarmId;
use crate::mutex::MutexId;
use crate::queue::QueueId;

/// Guest thread handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Most urgent priority
pub const HIGHEST_PRIORITY: u32 = 0;
/// Least urgent priority
pub const LOWEST_PRIORITY: u32 = 31;
pub const DEFAULT_PRIORITY: u32 = 16;

bitflags! {
    /// Cores a thread may run on
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Affinity: u32 {
        const CORE0 = 1 << 0;
        const CORE1 = 1 << 1;
        const CORE2 = 1 << 2;
        const ANY = Self::CORE0.bits() | Self::CORE1.bits() | Self::CORE2.bits();
    }
}

impl Affinity {
    /// Affinity of a single core
    pub fn core(core: usize) -> Self {
        Self::from_bits_truncate(1 << core)
    }

    pub fn allows(self, core: usize) -> bool {
        core < 32 && self.bits() & (1 << core) != 0
    }
}

impl Default for Affinity {
    fn default() -> Self {
        Self::ANY
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Not started, or exited and already joined
    None,
    /// Runnable, waiting for a core
    Ready,
    /// Bound to a virtual core
    Running,
    /// Parked on a wait queue or a timer
    Waiting,
    /// Exited, waiting to be joined
    Moribund,
}

/// Request another thread left for the running thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRequest {
    None,
    Suspend,
    Cancel,
}

/// Why a waiting thread became ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    None,
    Woken,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct ThreadStats {
    /// Times the thread left a wait queue
    pub wake_count: u64,
    /// Host time spent running guest code
    pub core_time: Duration,
    /// Slices run on a virtual core
    pub slices: u64,
}

/// Everything needed to create a guest thread
#[derive(Debug, Clone)]
pub struct ThreadParams {
    pub name: String,
    pub entry: u32,
    /// Passed in r3 onwards
    pub args: Vec<u32>,
    pub priority: u32,
    pub affinity: Affinity,
    /// Defaults to the configured stack size
    pub stack_size: Option<u32>,
    pub detached: bool,
}

impl ThreadParams {
    pub fn new(name: impl Into<String>, entry: u32) -> Self {
        Self {
            name: name.into(),
            entry,
            args: Vec::new(),
            priority: DEFAULT_PRIORITY,
            affinity: Affinity::ANY,
            stack_size: None,
            detached: false,
        }
    }

    pub fn args(mut self, args: &[u32]) -> Self {
        self.args = args.to_vec();
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn stack_size(mut self, size: u32) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }
}

/// Scheduler bookkeeping for one guest thread
///
/// Only touched with the scheduler lock held. The register context is moved
/// out while the thread runs on a core and moved back afterwards.
#[derive(Debug)]
pub struct GuestThread {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    pub base_priority: u32,
    /// Effective priority, boosted while owning contended mutexes
    pub priority: u32,
    pub affinity: Affinity,
    pub suspend_counter: i32,
    pub need_suspend: i32,
    pub request: ThreadRequest,
    pub cancel_enabled: bool,
    pub detached: bool,
    pub exit_value: i32,
    pub wait_result: WaitResult,
    pub wait_queue: Option<QueueId>,
    pub join_queue: QueueId,
    pub suspend_queue: QueueId,
    pub owned_mutexes: Vec<MutexId>,
    pub waiting_mutex: Option<MutexId>,
    pub timeout_alarm: Option<AlarmId>,
    /// Report the wait result in r3 when the current wait ends
    pub deliver_wait_result: bool,
    /// Written to r3 the next time the thread is dispatched
    pub resume_value: Option<u32>,
    pub entry: u32,
    pub stack_top: u32,
    pub stats: ThreadStats,
    pub(crate) context: Option<Box<ThreadContext>>,
}

impl GuestThread {
    pub(crate) fn new(
        id: ThreadId,
        params: &ThreadParams,
        join_queue: QueueId,
        suspend_queue: QueueId,
        context: ThreadContext,
        stack_top: u32,
    ) -> Self {
        Self {
            id,
            name: params.name.clone(),
            state: ThreadState::Ready,
            base_priority: params.priority,
            priority: params.priority,
            affinity: params.affinity,
            suspend_counter: 1,
            need_suspend: 0,
            request: ThreadRequest::None,
            cancel_enabled: true,
            detached: params.detached,
            exit_value: 0,
            wait_result: WaitResult::None,
            wait_queue: None,
            join_queue,
            suspend_queue,
            owned_mutexes: Vec::new(),
            waiting_mutex: None,
            timeout_alarm: None,
            deliver_wait_result: false,
            resume_value: None,
            entry: params.entry,
            stack_top,
            stats: ThreadStats::default(),
            context: Some(Box::new(context)),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_counter > 0
    }

    /// Exited, whether or not it has been joined
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, ThreadState::Moribund | ThreadState::None)
    }

    /// Register context, unless the thread is on a core right now
    pub fn context(&self) -> Option<&ThreadContext> {
        self.context.as_deref()
    }

    pub fn info(&self, core: Option<usize>) -> ThreadInfo {
        ThreadInfo {
            id: self.id,
            name: self.name.clone(),
            state: self.state,
            priority: self.priority,
            base_priority: self.base_priority,
            affinity: self.affinity,
            suspend_counter: self.suspend_counter,
            core,
            nia: self.context.as_ref().map(|ctx| ctx.nia),
            stats: self.stats.clone(),
        }
    }
}

/// Point in time copy of a thread's scheduler state
#[derive(Debug, Clone)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    pub priority: u32,
    pub base_priority: u32,
    pub affinity: Affinity,
    pub suspend_counter: i32,
    /// Core the thread is bound to
    pub core: Option<usize>,
    /// Resume address, unknown while running
    pub nia: Option<u32>,
    pub stats: ThreadStats,
}

impl fmt::Display for ThreadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>4} {:<24} {:?} prio {} ({}) suspend {}",
            self.id, self.name, self.state, self.priority, self.base_priority, self.suspend_counter
        )?;
        if let Some(core) = self.core {
            write!(f, " core {}", core)?;
        }
        if let Some(nia) = self.nia {
            write!(f, " nia 0x{:08X}", nia)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affinity() {
        assert!(Affinity::ANY.allows(2));
        assert!(!Affinity::CORE1.allows(0));
        assert_eq!(Affinity::core(1), Affinity::CORE1);
        assert!(!Affinity::ANY.allows(40));
    }

    #[test]
    fn test_new_thread_starts_suspended() {
        let params = ThreadParams::new("worker", 0x100).priority(3);
        let thread = GuestThread::new(
            ThreadId(7),
            &params,
            QueueId(1),
            QueueId(2),
            ThreadContext::new(),
            0x2000_8000,
        );
        assert_eq!(thread.state, ThreadState::Ready);
        assert!(thread.is_suspended());
        assert_eq!(thread.priority, 3);
        assert!(thread.context().is_some());
        assert_eq!(thread.info(None).nia, Some(oe_cpu::CALLBACK_ADDR));
    }
}
