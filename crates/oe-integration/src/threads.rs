//! Scheduler view for the debugger

use std::sync::Arc;

use oe_debug::{ThreadSource, ThreadSummary};
use oe_kernel::Scheduler;

/// Lists the scheduler's guest threads for debugger snapshots
pub struct SchedulerThreads {
    scheduler: Arc<Scheduler>,
}

impl SchedulerThreads {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

impl ThreadSource for SchedulerThreads {
    fn threads(&self) -> Vec<ThreadSummary> {
        self.scheduler
            .threads()
            .into_iter()
            .map(|info| ThreadSummary {
                id: info.id.0,
                name: info.name,
                state: format!("{:?}", info.state),
                priority: info.priority,
                core: info.core,
                nia: info.nia,
            })
            .collect()
    }
}
