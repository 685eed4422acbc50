//! Cooperative scheduler
//!
//! Guest threads are multiplexed onto a fixed number of virtual cores. Every
//! thread, wait queue and mutex lives behind one lock. A core takes the next
//! runnable thread for itself with [`Scheduler::next_slice`], runs it through
//! the execution engine with the lock released and hands the outcome back
//! with [`Scheduler::finish_slice`].
//!
//! Guest code only leaves the engine at reschedule points: a kernel call that
//! yields, a return through the callback sentinel, or a core interrupt. A
//! thread that goes to sleep is fully inserted into its wait queue before the
//! kernel call returns, so a wake that races with the end of the slice is
//! never lost; the thread is queued again when its context comes back.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use oe_core::config::Config;
use oe_core::error::{CpuError, KernelError};
use oe_core::{sched_debug, sched_trace};
use oe_cpu::{ExecutionEngine, ExitReason, ThreadContext, CALLBACK_ADDR};
use oe_memory::Address;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::warn;

use crate::alarm::{duration_to_ticks, AlarmAction, AlarmHandle, AlarmId, AlarmManager, InterruptHandler};
use crate::mutex::{GuestMutex, MutexId};
use crate::queue::{QueueId, QueueOrder, ThreadQueue};
use crate::thread::{
    Affinity, GuestThread, ThreadId, ThreadInfo, ThreadParams, ThreadRequest, ThreadState, WaitResult,
    LOWEST_PRIORITY,
};

/// Virtual cores of the console
pub const MAX_CORES: usize = 3;

/// Exit value of a cancelled thread or one stopped by a fatal error
pub const EXIT_ABNORMAL: i32 = -1;

/// A thread bound to a core for one run of the execution engine
pub struct Slice {
    pub thread: ThreadId,
    pub context: Box<ThreadContext>,
}

/// Everything protected by the scheduler lock
pub(crate) struct SchedulerState {
    pub(crate) threads: BTreeMap<ThreadId, GuestThread>,
    pub(crate) queues: HashMap<QueueId, ThreadQueue>,
    pub(crate) mutexes: HashMap<MutexId, GuestMutex>,
    /// Per core, every runnable thread whose affinity allows the core
    run_queues: Vec<ThreadQueue>,
    current: Vec<Option<ThreadId>>,
    /// Last thread dispatched on each core, for switch logging
    last: Vec<Option<ThreadId>>,
    enabled: Vec<bool>,
    interrupts: Vec<Vec<InterruptHandler>>,
    alarms: AlarmHandle,
    next_thread: u32,
    next_queue: u32,
    pub(crate) next_mutex: u32,
}

impl SchedulerState {
    fn new(core_count: usize, alarms: AlarmHandle) -> Self {
        Self {
            threads: BTreeMap::new(),
            queues: HashMap::new(),
            mutexes: HashMap::new(),
            run_queues: (0..core_count).map(|_| ThreadQueue::new(QueueOrder::Priority)).collect(),
            current: vec![None; core_count],
            last: vec![None; core_count],
            enabled: vec![true; core_count],
            interrupts: (0..core_count).map(|_| Vec::new()).collect(),
            alarms,
            next_thread: 1,
            next_queue: 1,
            next_mutex: 1,
        }
    }

    pub(crate) fn thread(&self, id: ThreadId) -> Result<&GuestThread, KernelError> {
        self.threads.get(&id).ok_or(KernelError::InvalidThread(id.0))
    }

    pub(crate) fn thread_mut(&mut self, id: ThreadId) -> Result<&mut GuestThread, KernelError> {
        self.threads.get_mut(&id).ok_or(KernelError::InvalidThread(id.0))
    }

    pub(crate) fn new_queue(&mut self, order: QueueOrder) -> QueueId {
        let id = QueueId(self.next_queue);
        self.next_queue += 1;
        self.queues.insert(id, ThreadQueue::new(order));
        id
    }

    /// Core the thread currently runs on
    pub(crate) fn running_core(&self, id: ThreadId) -> Option<usize> {
        self.current.iter().position(|current| *current == Some(id))
    }

    fn core_count(&self) -> usize {
        self.current.len()
    }

    /// Put a ready thread on the run queue of every core it may run on
    ///
    /// Suspended threads and threads whose context is still out on a core
    /// are left alone.
    pub(crate) fn enqueue(&mut self, id: ThreadId) {
        let Some(thread) = self.threads.get(&id) else {
            return;
        };
        if thread.state != ThreadState::Ready || thread.is_suspended() || thread.context.is_none() {
            return;
        }
        let (priority, affinity) = (thread.priority, thread.affinity);
        for (core, queue) in self.run_queues.iter_mut().enumerate() {
            queue.remove(id);
            if affinity.allows(core) {
                queue.insert(id, priority);
            }
        }
    }

    pub(crate) fn dequeue(&mut self, id: ThreadId) {
        for queue in &mut self.run_queues {
            queue.remove(id);
        }
    }

    fn is_queued(&self, id: ThreadId) -> bool {
        self.run_queues.iter().any(|queue| queue.contains(id))
    }

    /// Put a thread to sleep, optionally on a wait queue and with a timeout
    pub(crate) fn park(
        &mut self,
        id: ThreadId,
        queue: Option<QueueId>,
        timeout: Option<Duration>,
        deliver_result: bool,
    ) -> Result<(), KernelError> {
        if let Some(queue) = queue {
            if !self.queues.contains_key(&queue) {
                return Err(KernelError::InvalidQueue(queue.0));
            }
        }

        let alarm = timeout.map(|timeout| self.alarms.set(timeout, None, AlarmAction::WakeThread(id)));
        let thread = self.thread_mut(id)?;
        thread.state = ThreadState::Waiting;
        thread.wait_queue = queue;
        thread.wait_result = WaitResult::None;
        thread.deliver_wait_result = deliver_result;
        thread.timeout_alarm = alarm;
        let priority = thread.priority;

        if let Some(queue) = queue.and_then(|queue| self.queues.get_mut(&queue)) {
            queue.insert(id, priority);
        }
        self.dequeue(id);
        sched_trace!("Thread {} waiting on queue {:?} timeout {:?}", id, queue, timeout);
        Ok(())
    }

    /// End the wait of a sleeping thread
    pub(crate) fn make_ready(&mut self, id: ThreadId, result: WaitResult) {
        let alarms = self.alarms.clone();
        let Some(thread) = self.threads.get_mut(&id) else {
            return;
        };
        if thread.state != ThreadState::Waiting {
            return;
        }
        let queue = thread.wait_queue.take();
        if let Some(alarm) = thread.timeout_alarm.take() {
            alarms.cancel(alarm);
        }
        let waiting_mutex = thread.waiting_mutex.take();
        thread.wait_result = result;
        thread.stats.wake_count += 1;
        if std::mem::take(&mut thread.deliver_wait_result) {
            thread.resume_value = Some(u32::from(result == WaitResult::Woken));
        }
        thread.state = ThreadState::Ready;

        if let Some(queue) = queue.and_then(|queue| self.queues.get_mut(&queue)) {
            queue.remove(id);
        }
        // The owner no longer inherits this thread's priority
        if let Some(owner) = waiting_mutex.and_then(|mutex| self.mutexes.get(&mutex)).and_then(|m| m.owner) {
            self.update_priority(owner);
        }
        self.enqueue(id);
    }

    /// Wake every thread on a queue, in queue order
    pub(crate) fn wake_all(&mut self, queue: QueueId) -> Result<usize, KernelError> {
        let woken = self
            .queues
            .get_mut(&queue)
            .ok_or(KernelError::InvalidQueue(queue.0))?
            .drain();
        for &id in &woken {
            self.make_ready(id, WaitResult::Woken);
        }
        Ok(woken.len())
    }

    /// Recalculate effective priority, following the chain of mutex owners
    ///
    /// A thread runs at the better of its base priority and the best
    /// priority waiting on any mutex it owns.
    pub(crate) fn update_priority(&mut self, start: ThreadId) {
        let mut id = start;
        // Bounded walk, a lock cycle must not hang the scheduler
        for _ in 0..=self.threads.len() {
            let Some(thread) = self.threads.get(&id) else {
                return;
            };
            let mut priority = thread.base_priority;
            for mutex in &thread.owned_mutexes {
                let best = self
                    .mutexes
                    .get(mutex)
                    .and_then(|mutex| self.queues.get(&mutex.queue))
                    .and_then(|queue| queue.head_priority());
                if let Some(best) = best {
                    priority = priority.min(best);
                }
            }
            if priority == thread.priority {
                return;
            }

            let (wait_queue, waiting_mutex) = (thread.wait_queue, thread.waiting_mutex);
            if let Some(thread) = self.threads.get_mut(&id) {
                sched_trace!("Thread {} priority {} -> {}", id, thread.priority, priority);
                thread.priority = priority;
            }
            for queue in &mut self.run_queues {
                queue.reposition(id, priority);
            }
            if let Some(queue) = wait_queue.and_then(|queue| self.queues.get_mut(&queue)) {
                queue.reposition(id, priority);
            }

            match waiting_mutex.and_then(|mutex| self.mutexes.get(&mutex)).and_then(|m| m.owner) {
                Some(owner) => id = owner,
                None => return,
            }
        }
    }

    /// Apply a pending suspend or cancel request at a check point
    fn honor_requests(&mut self, id: ThreadId) {
        let Some(thread) = self.threads.get_mut(&id) else {
            return;
        };
        match thread.request {
            ThreadRequest::Suspend => {
                thread.suspend_counter += thread.need_suspend;
                thread.need_suspend = 0;
                thread.request = ThreadRequest::None;
                let suspend_queue = thread.suspend_queue;
                sched_trace!("Thread {} suspended ({})", id, thread.suspend_counter);
                self.dequeue(id);
                let _ = self.wake_all(suspend_queue);
            }
            ThreadRequest::Cancel if thread.cancel_enabled => {
                sched_debug!("Thread {} cancelled", id);
                self.exit_thread(id, EXIT_ABNORMAL);
            }
            _ => {}
        }
    }

    /// Move a thread to `Moribund`, releasing everything it holds
    pub(crate) fn exit_thread(&mut self, id: ThreadId, value: i32) {
        let alarms = self.alarms.clone();
        let Some(thread) = self.threads.get_mut(&id) else {
            return;
        };
        if thread.is_terminated() {
            return;
        }
        let wait_queue = thread.wait_queue.take();
        if let Some(alarm) = thread.timeout_alarm.take() {
            alarms.cancel(alarm);
        }
        let waiting_mutex = thread.waiting_mutex.take();
        let owned = std::mem::take(&mut thread.owned_mutexes);
        thread.state = ThreadState::Moribund;
        thread.exit_value = value;
        thread.request = ThreadRequest::None;
        thread.priority = thread.base_priority;
        let (join_queue, suspend_queue, detached) = (thread.join_queue, thread.suspend_queue, thread.detached);
        sched_debug!("Thread {} [{}] exited with {}", id, thread.name, value);

        self.dequeue(id);
        if let Some(queue) = wait_queue.and_then(|queue| self.queues.get_mut(&queue)) {
            queue.remove(id);
        }
        if let Some(owner) = waiting_mutex.and_then(|mutex| self.mutexes.get(&mutex)).and_then(|m| m.owner) {
            self.update_priority(owner);
        }
        for mutex in owned {
            warn!(target: "scheduler", "Thread {} exited while holding mutex {}", id, mutex);
            self.release_mutex(mutex);
        }
        let _ = self.wake_all(join_queue);
        let _ = self.wake_all(suspend_queue);

        if detached {
            self.remove_thread(id);
        }
    }

    /// Forget a terminated thread and its private queues
    pub(crate) fn remove_thread(&mut self, id: ThreadId) {
        if let Some(thread) = self.threads.remove(&id) {
            self.queues.remove(&thread.join_queue);
            self.queues.remove(&thread.suspend_queue);
        }
    }

    fn is_idle(&self) -> bool {
        self.current.iter().all(Option::is_none)
            && self.run_queues.iter().all(ThreadQueue::is_empty)
            && self.interrupts.iter().all(Vec::is_empty)
    }

    fn thread_name(&self, id: ThreadId) -> &str {
        self.threads.get(&id).map(|t| t.name.as_str()).unwrap_or("?")
    }

    fn log_switch(&mut self, core: usize, next: Option<ThreadId>) {
        let previous = std::mem::replace(&mut self.last[core], next);
        if previous == next {
            return;
        }
        match (previous, next) {
            (Some(from), Some(to)) => sched_trace!(
                "Core {} leaving thread {} [{}] to thread {} [{}]",
                core,
                from,
                self.thread_name(from),
                to,
                self.thread_name(to)
            ),
            (None, Some(to)) => sched_trace!("Core {} leaving idle to thread {} [{}]", core, to, self.thread_name(to)),
            (Some(from), None) => sched_trace!("Core {} leaving thread {} [{}] to idle", core, from, self.thread_name(from)),
            (None, None) => {}
        }
    }
}

/// Guest thread scheduler for a fixed set of virtual cores
pub struct Scheduler {
    pub(crate) state: Mutex<SchedulerState>,
    /// Signalled when a core may find new work
    work: Condvar,
    /// Signalled at the end of every slice
    idle: Condvar,
    engine: Arc<ExecutionEngine>,
    alarms: AlarmManager,
    core_count: usize,
    stack_size: u32,
    trace_buffer_size: usize,
    running: AtomicBool,
    epoch: Instant,
}

impl Scheduler {
    /// Create the scheduler and its alarm thread
    pub fn new(engine: Arc<ExecutionEngine>, config: &Config) -> Result<Arc<Self>, KernelError> {
        let core_count = config.cpu.core_count.clamp(1, MAX_CORES);
        if core_count != config.cpu.core_count {
            warn!(
                target: "scheduler",
                "Core count {} out of range, using {}", config.cpu.core_count, core_count
            );
        }

        let target: Arc<OnceLock<Weak<Scheduler>>> = Arc::new(OnceLock::new());
        let alarms = {
            let target = target.clone();
            AlarmManager::spawn(move |id, action| {
                if let Some(scheduler) = target.get().and_then(Weak::upgrade) {
                    scheduler.alarm_fired(id, action);
                }
            })
            .map_err(|e| KernelError::AlarmThread(e.to_string()))?
        };

        let scheduler = Arc::new(Self {
            state: Mutex::new(SchedulerState::new(core_count, alarms.handle())),
            work: Condvar::new(),
            idle: Condvar::new(),
            engine,
            alarms,
            core_count,
            stack_size: config.memory.stack_size,
            trace_buffer_size: config.cpu.trace_buffer_size,
            running: AtomicBool::new(true),
            epoch: Instant::now(),
        });
        let _ = target.set(Arc::downgrade(&scheduler));
        sched_debug!("Scheduler created with {} cores", core_count);
        Ok(scheduler)
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn core_count(&self) -> usize {
        self.core_count
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Guest time base derived from host time since creation
    pub fn timebase(&self) -> u64 {
        duration_to_ticks(self.epoch.elapsed())
    }

    /// Interrupt every core that should re-evaluate its current thread and
    /// wake idle cores
    pub(crate) fn reschedule_all(&self, state: &SchedulerState) {
        for core in 0..state.core_count() {
            let Some(thread) = state.current[core].and_then(|id| state.threads.get(&id)) else {
                continue;
            };
            let preempt = thread.request != ThreadRequest::None
                || !thread.affinity.allows(core)
                || !state.enabled[core]
                || state.run_queues[core]
                    .head_priority()
                    .is_some_and(|best| best < thread.priority);
            if preempt {
                sched_trace!("Core {} rescheduling thread {}", core, thread.id);
                self.engine.interrupt(core);
            }
        }
        self.work.notify_all();
    }

    /// Create a guest thread
    ///
    /// The thread starts suspended with a suspend counter of one; it first
    /// runs after [`resume`](Self::resume).
    pub fn create_thread(&self, params: ThreadParams) -> Result<ThreadId, KernelError> {
        if !self.is_running() {
            return Err(KernelError::ShutDown);
        }
        if params.priority > LOWEST_PRIORITY {
            return Err(KernelError::InvalidPriority(params.priority));
        }
        self.check_affinity(params.affinity)?;

        let memory = self.engine.memory();
        let stack_size = params.stack_size.unwrap_or(self.stack_size);
        let stack_top = memory.allocate_stack(stack_size)?.get();
        let sp = stack_top.wrapping_sub(16) & !0xF;
        memory.write_be32(Address(sp), 0)?;

        let mut ctx = ThreadContext::with_tracer(self.trace_buffer_size);
        ctx.gpr[1] = sp;
        for (i, &arg) in params.args.iter().enumerate() {
            if i < 8 {
                ctx.gpr[3 + i] = arg;
            } else {
                memory.write_be32(Address(sp.wrapping_add(8 + 4 * (i as u32 - 8))), arg)?;
            }
        }
        ctx.nia = params.entry;
        ctx.lr = CALLBACK_ADDR;

        let mut state = self.state.lock();
        let id = ThreadId(state.next_thread);
        state.next_thread += 1;
        ctx.thread_id = id.0;
        let join_queue = state.new_queue(QueueOrder::Fifo);
        let suspend_queue = state.new_queue(QueueOrder::Fifo);
        state.threads.insert(
            id,
            GuestThread::new(id, &params, join_queue, suspend_queue, ctx, stack_top),
        );

        sched_debug!(
            "Created thread {} [{}] entry 0x{:08X} priority {} affinity {:?}",
            id,
            params.name,
            params.entry,
            params.priority,
            params.affinity
        );
        Ok(id)
    }

    /// Create a thread and make it runnable right away
    pub fn spawn_thread(&self, params: ThreadParams) -> Result<ThreadId, KernelError> {
        let id = self.create_thread(params)?;
        self.resume(id, 1)?;
        Ok(id)
    }

    fn check_affinity(&self, affinity: Affinity) -> Result<(), KernelError> {
        if (0..self.core_count).any(|core| affinity.allows(core)) {
            Ok(())
        } else {
            Err(KernelError::InvalidAffinity(affinity.bits()))
        }
    }

    /// Lower the suspend counter by `count`, returns the previous value
    ///
    /// The counter never drops below zero. The thread becomes runnable when
    /// the counter reaches zero.
    pub fn resume(&self, id: ThreadId, count: i32) -> Result<i32, KernelError> {
        let mut state = self.state.lock();
        let thread = state.thread_mut(id)?;
        let previous = thread.suspend_counter;
        let mut count = count.max(0);

        // Cancel suspend requests that have not been honored yet
        let pending = count.min(thread.need_suspend);
        thread.need_suspend -= pending;
        count -= pending;
        if thread.need_suspend == 0 && thread.request == ThreadRequest::Suspend {
            thread.request = ThreadRequest::None;
        }

        thread.suspend_counter = (thread.suspend_counter - count).max(0);
        if previous > 0 && thread.suspend_counter == 0 {
            sched_trace!("Thread {} resumed", id);
            state.enqueue(id);
            self.reschedule_all(&state);
        }
        Ok(previous)
    }

    /// Raise the suspend counter, returns the previous value
    ///
    /// A thread running on a core is suspended at its next reschedule point.
    pub fn suspend(&self, id: ThreadId) -> Result<i32, KernelError> {
        let mut state = self.state.lock();
        let core = state.running_core(id);
        let thread = state.thread_mut(id)?;
        if thread.is_terminated() {
            return Ok(thread.suspend_counter);
        }
        let previous = thread.suspend_counter;

        if let Some(core) = core {
            thread.need_suspend += 1;
            thread.request = ThreadRequest::Suspend;
            self.engine.interrupt(core);
            return Ok(previous);
        }

        thread.suspend_counter += 1;
        if previous == 0 {
            state.dequeue(id);
        }
        Ok(previous)
    }

    /// Ask a running thread to give up its core
    ///
    /// The thread goes back to the run queue behind threads of equal
    /// priority, so equal priorities take turns.
    pub fn yield_thread(&self, id: ThreadId) -> Result<(), KernelError> {
        let state = self.state.lock();
        state.thread(id)?;
        if let Some(core) = state.running_core(id) {
            self.engine.interrupt(core);
        }
        Ok(())
    }

    /// Put `id` to sleep on `queue` until woken
    ///
    /// Must be called for the thread running the current kernel call, which
    /// then yields.
    pub fn sleep(&self, id: ThreadId, queue: QueueId) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        state.park(id, Some(queue), None, false)?;
        self.reschedule_all(&state);
        Ok(())
    }

    /// Sleep with a timeout, on a queue or just for `timeout`
    ///
    /// When the wait ends r3 is 1 if the thread was woken and 0 if it timed
    /// out.
    pub fn sleep_timeout(&self, id: ThreadId, queue: Option<QueueId>, timeout: Duration) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        state.park(id, queue, Some(timeout), true)?;
        self.reschedule_all(&state);
        Ok(())
    }

    pub fn create_queue(&self, order: QueueOrder) -> QueueId {
        self.state.lock().new_queue(order)
    }

    /// Wake every thread on `queue`, returns how many were woken
    pub fn wake(&self, queue: QueueId) -> Result<usize, KernelError> {
        let mut state = self.state.lock();
        let count = state.wake_all(queue)?;
        if count > 0 {
            sched_trace!("Woke {} threads from queue {}", count, queue);
            self.reschedule_all(&state);
        }
        Ok(count)
    }

    /// Wake the first thread on `queue`
    pub fn wake_one(&self, queue: QueueId) -> Result<Option<ThreadId>, KernelError> {
        let mut state = self.state.lock();
        let head = state
            .queues
            .get_mut(&queue)
            .ok_or(KernelError::InvalidQueue(queue.0))?
            .pop_front();
        if let Some(id) = head {
            state.make_ready(id, WaitResult::Woken);
            self.reschedule_all(&state);
        }
        Ok(head)
    }

    pub fn set_priority(&self, id: ThreadId, priority: u32) -> Result<(), KernelError> {
        if priority > LOWEST_PRIORITY {
            return Err(KernelError::InvalidPriority(priority));
        }
        let mut state = self.state.lock();
        state.thread_mut(id)?.base_priority = priority;
        state.update_priority(id);
        self.reschedule_all(&state);
        Ok(())
    }

    pub fn set_affinity(&self, id: ThreadId, affinity: Affinity) -> Result<(), KernelError> {
        self.check_affinity(affinity)?;
        let mut state = self.state.lock();
        state.thread_mut(id)?.affinity = affinity;
        if state.is_queued(id) {
            state.enqueue(id);
        }
        self.reschedule_all(&state);
        Ok(())
    }

    /// Collect the exit value of a terminated thread
    ///
    /// Returns `None` after putting `joiner` to sleep on the target's join
    /// queue; the kernel call retries once the target exits.
    pub fn join(&self, joiner: ThreadId, target: ThreadId) -> Result<Option<i32>, KernelError> {
        if joiner == target {
            return Err(KernelError::JoinSelf(joiner.0));
        }
        let mut state = self.state.lock();
        let thread = state.thread(target)?;
        if thread.detached {
            return Err(KernelError::InvalidThread(target.0));
        }
        if thread.state == ThreadState::Moribund {
            let value = thread.exit_value;
            state.remove_thread(target);
            return Ok(Some(value));
        }
        let join_queue = thread.join_queue;
        state.park(joiner, Some(join_queue), None, false)?;
        Ok(None)
    }

    /// Let a thread clean up after itself when it exits
    pub fn detach(&self, id: ThreadId) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        let thread = state.thread_mut(id)?;
        thread.detached = true;
        if thread.state == ThreadState::Moribund {
            state.remove_thread(id);
        } else {
            // Joiners would wait forever
            let join_queue = thread.join_queue;
            let _ = state.wake_all(join_queue);
            self.reschedule_all(&state);
        }
        Ok(())
    }

    /// Request cancellation
    ///
    /// A thread that is not on a core and has cancellation enabled exits at
    /// once. Otherwise the request waits for the next check point.
    pub fn cancel(&self, id: ThreadId) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        let core = state.running_core(id);
        let thread = state.thread_mut(id)?;
        if thread.is_terminated() {
            return Ok(());
        }
        if core.is_some() || !thread.cancel_enabled {
            thread.request = ThreadRequest::Cancel;
            if let Some(core) = core {
                self.engine.interrupt(core);
            }
            return Ok(());
        }
        thread.wait_result = WaitResult::Cancelled;
        state.exit_thread(id, EXIT_ABNORMAL);
        self.reschedule_all(&state);
        Ok(())
    }

    /// Enable or disable cancellation, returns the previous state
    pub fn set_cancel_state(&self, id: ThreadId, enabled: bool) -> Result<bool, KernelError> {
        let mut state = self.state.lock();
        let thread = state.thread_mut(id)?;
        Ok(std::mem::replace(&mut thread.cancel_enabled, enabled))
    }

    /// Whether the thread should exit at this check point
    pub fn test_cancel(&self, id: ThreadId) -> Result<bool, KernelError> {
        let state = self.state.lock();
        let thread = state.thread(id)?;
        Ok(thread.request == ThreadRequest::Cancel && thread.cancel_enabled)
    }

    /// Stop or restart dispatching on one core
    ///
    /// A disabled core finishes its current slice and then idles.
    pub fn set_core_enabled(&self, core: usize, enabled: bool) {
        let mut state = self.state.lock();
        if let Some(slot) = state.enabled.get_mut(core) {
            *slot = enabled;
            sched_debug!("Core {} scheduling {}", core, if enabled { "enabled" } else { "disabled" });
        }
        self.reschedule_all(&state);
    }

    pub fn is_core_enabled(&self, core: usize) -> bool {
        self.state.lock().enabled.get(core).copied().unwrap_or(false)
    }

    /// Thread running on `core`
    pub fn current_thread(&self, core: usize) -> Option<ThreadId> {
        self.state.lock().current.get(core).copied().flatten()
    }

    /// Snapshot of every known thread
    pub fn threads(&self) -> Vec<ThreadInfo> {
        let state = self.state.lock();
        state
            .threads
            .values()
            .map(|thread| thread.info(state.running_core(thread.id)))
            .collect()
    }

    pub fn thread_info(&self, id: ThreadId) -> Option<ThreadInfo> {
        let state = self.state.lock();
        state.threads.get(&id).map(|thread| thread.info(state.running_core(id)))
    }

    /// Copy of a thread's registers, unless it is on a core right now
    pub fn thread_context(&self, id: ThreadId) -> Option<ThreadContext> {
        self.state.lock().threads.get(&id).and_then(|t| t.context().cloned())
    }

    /// Arm an alarm on the host timer
    pub fn set_alarm(&self, delay: Duration, period: Option<Duration>, action: AlarmAction) -> AlarmId {
        self.alarms.set(delay, period, action)
    }

    pub fn cancel_alarm(&self, id: AlarmId) {
        self.alarms.cancel(id)
    }

    /// Run `handler` on `core` at its next reschedule point
    pub fn post_interrupt(&self, core: usize, handler: InterruptHandler) {
        let mut state = self.state.lock();
        if let Some(pending) = state.interrupts.get_mut(core) {
            pending.push(handler);
            self.engine.interrupt(core);
            self.work.notify_all();
        }
    }

    fn alarm_fired(&self, id: AlarmId, action: &AlarmAction) {
        match action {
            AlarmAction::WakeThread(thread) => {
                let mut state = self.state.lock();
                let Some(guest) = state.threads.get_mut(thread) else {
                    return;
                };
                if guest.timeout_alarm != Some(id) || guest.state != ThreadState::Waiting {
                    return;
                }
                guest.timeout_alarm = None;
                sched_trace!("Thread {} timed out", thread);
                state.make_ready(*thread, WaitResult::TimedOut);
                self.reschedule_all(&state);
            }
            AlarmAction::Interrupt { core, handler } => self.post_interrupt(*core, handler.clone()),
        }
    }

    /// Block until a thread can be dispatched on `core`
    ///
    /// Pending interrupts for the core run first, on the calling host thread
    /// and without the lock. Returns `None` once the scheduler shuts down.
    pub fn next_slice(&self, core: usize) -> Option<Slice> {
        let mut state = self.state.lock();
        loop {
            if !self.is_running() || core >= state.core_count() {
                return None;
            }

            let pending = std::mem::take(&mut state.interrupts[core]);
            if !pending.is_empty() {
                MutexGuard::unlocked(&mut state, || {
                    for handler in pending {
                        handler(self, core);
                    }
                });
                continue;
            }

            if state.enabled[core] {
                if let Some(id) = state.run_queues[core].head() {
                    state.dequeue(id);
                    if let Some(slice) = Self::dispatch(&mut state, core, id) {
                        return Some(slice);
                    }
                    continue;
                }
            }

            state.log_switch(core, None);
            self.idle.notify_all();
            self.work.wait(&mut state);
        }
    }

    fn dispatch(state: &mut SchedulerState, core: usize, id: ThreadId) -> Option<Slice> {
        let thread = state.threads.get_mut(&id)?;
        let mut context = thread.context.take()?;
        thread.state = ThreadState::Running;
        thread.stats.slices += 1;
        if let Some(value) = thread.resume_value.take() {
            context.gpr[3] = value;
        }
        context.core_id = core;
        state.current[core] = Some(id);
        state.log_switch(core, Some(id));
        Some(Slice { thread: id, context })
    }

    /// Hand a slice back after the engine returned
    ///
    /// Returning through the sentinel exits the thread with r3 as its exit
    /// value; a fatal error exits it abnormally. Otherwise pending requests
    /// are honored and the thread goes back to the run queue.
    pub fn finish_slice(
        &self,
        core: usize,
        id: ThreadId,
        context: Box<ThreadContext>,
        result: Result<ExitReason, CpuError>,
        elapsed: Duration,
    ) {
        let mut state = self.state.lock();
        if let Some(current) = state.current.get_mut(core) {
            *current = None;
        }

        let exit = match &result {
            Ok(ExitReason::Returned) => Some(context.gpr[3] as i32),
            Ok(ExitReason::Yield | ExitReason::Interrupted) => None,
            Err(_) => Some(EXIT_ABNORMAL),
        };

        if let Some(thread) = state.threads.get_mut(&id) {
            thread.stats.core_time += elapsed;
            thread.context = Some(context);
            if !thread.is_terminated() {
                match exit {
                    Some(value) => state.exit_thread(id, value),
                    None => {
                        state.honor_requests(id);
                        if let Some(thread) = state.threads.get_mut(&id) {
                            if thread.state == ThreadState::Running {
                                thread.state = ThreadState::Ready;
                            }
                        }
                        state.enqueue(id);
                    }
                }
            }
        }

        self.reschedule_all(&state);
        self.idle.notify_all();
    }

    /// Wait until no core has work, returns false on timeout
    ///
    /// Threads sleeping on queues or timers do not count as work.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.is_idle() {
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }

    /// Wait for a thread to exit and return its exit value
    ///
    /// Returns `None` on timeout or when the thread no longer exists.
    pub fn wait_for_exit(&self, id: ThreadId, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let thread = state.threads.get(&id)?;
            if thread.state == ThreadState::Moribund {
                return Some(thread.exit_value);
            }
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return None;
            }
        }
    }

    /// Stop dispatching and the alarm thread
    ///
    /// Running slices are interrupted at their next block boundary.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        sched_debug!("Scheduler shutting down");
        self.engine.interrupt_all();
        {
            let _state = self.state.lock();
            self.work.notify_all();
            self.idle.notify_all();
        }
        self.alarms.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oe_cpu::{Decoder, KernelCallTable};
    use oe_memory::MemoryManager;

    fn scheduler() -> Arc<Scheduler> {
        let config = Config::default();
        let memory = MemoryManager::new().unwrap();
        let kernel = Arc::new(KernelCallTable::new());
        let engine = Arc::new(ExecutionEngine::new(
            &config.cpu,
            Arc::new(Decoder::new()),
            memory,
            kernel,
        ));
        Scheduler::new(engine, &config).unwrap()
    }

    #[test]
    fn test_create_thread_sets_up_context() {
        let scheduler = scheduler();
        let id = scheduler
            .create_thread(ThreadParams::new("main", 0x1000).args(&[7, 9]))
            .unwrap();
        let ctx = scheduler.thread_context(id).unwrap();
        assert_eq!(ctx.nia, 0x1000);
        assert_eq!(ctx.lr, CALLBACK_ADDR);
        assert_eq!((ctx.gpr[3], ctx.gpr[4]), (7, 9));
        assert_eq!(ctx.gpr[1] & 0xF, 0);
        assert_eq!(ctx.thread_id, id.0);
        assert_eq!(scheduler.thread_info(id).unwrap().suspend_counter, 1);
        scheduler.shutdown();
    }

    #[test]
    fn test_invalid_parameters() {
        let scheduler = scheduler();
        assert_eq!(
            scheduler.create_thread(ThreadParams::new("bad", 0).priority(32)),
            Err(KernelError::InvalidPriority(32))
        );
        assert_eq!(
            scheduler.create_thread(ThreadParams::new("bad", 0).affinity(Affinity::empty())),
            Err(KernelError::InvalidAffinity(0))
        );
        assert_eq!(scheduler.resume(ThreadId(99), 1), Err(KernelError::InvalidThread(99)));
        scheduler.shutdown();
    }

    #[test]
    fn test_resume_clamps_at_zero() {
        let scheduler = scheduler();
        let id = scheduler.create_thread(ThreadParams::new("t", 0)).unwrap();
        assert_eq!(scheduler.resume(id, 5).unwrap(), 1);
        assert_eq!(scheduler.thread_info(id).unwrap().suspend_counter, 0);
        assert_eq!(scheduler.suspend(id).unwrap(), 0);
        assert_eq!(scheduler.thread_info(id).unwrap().suspend_counter, 1);
        scheduler.shutdown();
    }

    #[test]
    fn test_next_slice_returns_none_after_shutdown() {
        let scheduler = scheduler();
        scheduler.shutdown();
        assert!(scheduler.next_slice(0).is_none());
        assert_eq!(
            scheduler.create_thread(ThreadParams::new("late", 0)),
            Err(KernelError::ShutDown)
        );
    }
}
