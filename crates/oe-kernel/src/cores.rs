//! Virtual cores
//!
//! One host thread per core. Each loops over the scheduler: take the next
//! slice, run it through the execution engine without the scheduler lock,
//! hand the outcome back.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use oe_core::error::KernelError;
use oe_core::sched_debug;

use crate::scheduler::Scheduler;

/// Host threads driving the scheduler's cores
pub struct VirtualCores {
    scheduler: Arc<Scheduler>,
    handles: Vec<JoinHandle<()>>,
}

impl VirtualCores {
    /// Spawn one host thread per core
    pub fn start(scheduler: Arc<Scheduler>) -> Result<Self, KernelError> {
        let mut cores = Self {
            scheduler: scheduler.clone(),
            handles: Vec::with_capacity(scheduler.core_count()),
        };
        for core in 0..scheduler.core_count() {
            let scheduler = scheduler.clone();
            let handle = std::thread::Builder::new()
                .name(format!("core-{}", core))
                .spawn(move || run_core(&scheduler, core))
                .map_err(|e| KernelError::CoreStart {
                    core,
                    message: e.to_string(),
                });
            match handle {
                Ok(handle) => cores.handles.push(handle),
                Err(err) => {
                    cores.shutdown();
                    return Err(err);
                }
            }
        }
        Ok(cores)
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Shut the scheduler down and wait for every core to stop
    pub fn shutdown(&mut self) {
        self.scheduler.shutdown();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for VirtualCores {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_core(scheduler: &Scheduler, core: usize) {
    sched_debug!("Core {} started", core);
    while let Some(mut slice) = scheduler.next_slice(core) {
        slice.context.tb = scheduler.timebase();
        let started = Instant::now();
        let result = scheduler.engine().run(&mut slice.context, core);
        scheduler.finish_slice(core, slice.thread, slice.context, result, started.elapsed());
    }
    sched_debug!("Core {} stopped", core);
}
