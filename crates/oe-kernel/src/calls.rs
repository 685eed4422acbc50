//! Scheduler kernel calls
//!
//! Guest code reaches the scheduler through `kc` with one of the ids below.
//! Arguments come in r3 onwards and the result goes back in r3. A call on
//! an invalid handle logs a warning and returns -1.
//!
//! Calls that have to wait put the thread to sleep and yield. Those that
//! must see the outcome of the wait (join, mutex lock) rewind NIA to the
//! `kc` itself so the call runs again when the thread is dispatched.

use std::sync::Arc;

use oe_core::error::{CpuError, KernelError};
use oe_core::kernel_trace;
use oe_cpu::{KernelCall, KernelCallOutcome, KernelCallTable, CALLBACK_ADDR};
use oe_memory::Address;
use tracing::warn;

use crate::alarm::ticks_to_duration;
use crate::mutex::MutexId;
use crate::queue::{QueueId, QueueOrder};
use crate::scheduler::{Scheduler, EXIT_ABNORMAL};
use crate::thread::{Affinity, ThreadId, ThreadParams};

/// Give the core to the next thread of equal or better priority
pub const YIELD: u32 = 0x100;
/// `exit(value)`
pub const EXIT: u32 = 0x101;
pub const GET_THREAD_ID: u32 = 0x102;
pub const GET_CORE_ID: u32 = 0x103;
/// `sleep_ticks(hi, lo)` in time base ticks
pub const SLEEP_TICKS: u32 = 0x104;
/// `create_thread(entry, arg, priority, affinity, stack_size)`, suspended
pub const CREATE_THREAD: u32 = 0x105;
pub const RESUME: u32 = 0x106;
pub const SUSPEND: u32 = 0x107;
pub const SET_PRIORITY: u32 = 0x108;
pub const SET_AFFINITY: u32 = 0x109;
/// `join(thread, exit_value_ptr)`
pub const JOIN: u32 = 0x10A;
pub const DETACH: u32 = 0x10B;
pub const CANCEL: u32 = 0x10C;
pub const SET_CANCEL_STATE: u32 = 0x10D;
pub const TEST_CANCEL: u32 = 0x10E;
/// `queue_create(priority_ordered)`
pub const QUEUE_CREATE: u32 = 0x110;
pub const SLEEP_QUEUE: u32 = 0x111;
/// `sleep_queue_timeout(queue, hi, lo)`, returns 1 if woken, 0 on timeout
pub const SLEEP_QUEUE_TIMEOUT: u32 = 0x112;
pub const WAKE_QUEUE: u32 = 0x113;
pub const WAKE_ONE: u32 = 0x114;
pub const MUTEX_CREATE: u32 = 0x120;
pub const MUTEX_LOCK: u32 = 0x121;
pub const MUTEX_TRY_LOCK: u32 = 0x122;
pub const MUTEX_UNLOCK: u32 = 0x123;
/// Time base as a 64 bit value in r3:r4
pub const GET_TIME: u32 = 0x130;

const FAILURE: u32 = u32::MAX;

type Handler = fn(&Scheduler, &mut KernelCall<'_>) -> Result<KernelCallOutcome, KernelError>;

/// Register every scheduler kernel call in `table`
///
/// Handlers hold a weak reference, so the table does not keep the scheduler
/// alive.
pub fn register_kernel_calls(table: &KernelCallTable, scheduler: &Arc<Scheduler>) {
    let calls: &[(u32, &'static str, Handler)] = &[
        (YIELD, "yield", |_, _| Ok(KernelCallOutcome::Yield)),
        (EXIT, "exit", exit),
        (GET_THREAD_ID, "get_thread_id", |_, call| {
            call.set_return(call.ctx.thread_id);
            Ok(KernelCallOutcome::Continue)
        }),
        (GET_CORE_ID, "get_core_id", |_, call| {
            call.set_return(call.core_id as u32);
            Ok(KernelCallOutcome::Continue)
        }),
        (SLEEP_TICKS, "sleep_ticks", sleep_ticks),
        (CREATE_THREAD, "create_thread", create_thread),
        (RESUME, "resume", resume),
        (SUSPEND, "suspend", suspend),
        (SET_PRIORITY, "set_priority", set_priority),
        (SET_AFFINITY, "set_affinity", set_affinity),
        (JOIN, "join", join),
        (DETACH, "detach", |scheduler, call| {
            scheduler.detach(ThreadId(arg(call, 0)))?;
            success(call)
        }),
        (CANCEL, "cancel", cancel),
        (SET_CANCEL_STATE, "set_cancel_state", |scheduler, call| {
            let enabled = arg(call, 0) != 0;
            let previous = scheduler.set_cancel_state(current(call), enabled)?;
            call.set_return(previous as u32);
            Ok(KernelCallOutcome::Continue)
        }),
        (TEST_CANCEL, "test_cancel", |scheduler, call| {
            if scheduler.test_cancel(current(call))? {
                return Ok(exit_with(call, EXIT_ABNORMAL));
            }
            Ok(KernelCallOutcome::Continue)
        }),
        (QUEUE_CREATE, "queue_create", |scheduler, call| {
            let order = if arg(call, 0) != 0 {
                QueueOrder::Priority
            } else {
                QueueOrder::Fifo
            };
            call.set_return(scheduler.create_queue(order).0);
            Ok(KernelCallOutcome::Continue)
        }),
        (SLEEP_QUEUE, "sleep_queue", |scheduler, call| {
            scheduler.sleep(current(call), QueueId(arg(call, 0)))?;
            Ok(KernelCallOutcome::Yield)
        }),
        (SLEEP_QUEUE_TIMEOUT, "sleep_queue_timeout", |scheduler, call| {
            let ticks = (u64::from(arg(call, 1)) << 32) | u64::from(arg(call, 2));
            scheduler.sleep_timeout(current(call), Some(QueueId(arg(call, 0))), ticks_to_duration(ticks))?;
            Ok(KernelCallOutcome::Yield)
        }),
        (WAKE_QUEUE, "wake_queue", |scheduler, call| {
            let woken = scheduler.wake(QueueId(arg(call, 0)))?;
            call.set_return(woken as u32);
            Ok(KernelCallOutcome::Continue)
        }),
        (WAKE_ONE, "wake_one", |scheduler, call| {
            let woken = scheduler.wake_one(QueueId(arg(call, 0)))?;
            call.set_return(woken.map_or(0, |id| id.0));
            Ok(KernelCallOutcome::Continue)
        }),
        (MUTEX_CREATE, "mutex_create", |scheduler, call| {
            let id = scheduler.create_mutex(format!("mutex@0x{:08X}", call.ctx.cia));
            call.set_return(id.0);
            Ok(KernelCallOutcome::Continue)
        }),
        (MUTEX_LOCK, "mutex_lock", mutex_lock),
        (MUTEX_TRY_LOCK, "mutex_try_lock", |scheduler, call| {
            let locked = scheduler.try_lock_mutex(current(call), MutexId(arg(call, 0)))?;
            call.set_return(locked as u32);
            Ok(KernelCallOutcome::Continue)
        }),
        (MUTEX_UNLOCK, "mutex_unlock", |scheduler, call| {
            scheduler.unlock_mutex(current(call), MutexId(arg(call, 0)))?;
            success(call)
        }),
        (GET_TIME, "get_time", |scheduler, call| {
            call.set_return_u64(scheduler.timebase());
            Ok(KernelCallOutcome::Continue)
        }),
    ];

    for &(id, name, handler) in calls {
        let scheduler = Arc::downgrade(scheduler);
        table.register(id, name, move |call| {
            let Some(scheduler) = scheduler.upgrade() else {
                return Err(CpuError::KernelCall {
                    id,
                    message: "scheduler has shut down".into(),
                });
            };
            kernel_trace!("{} from thread {} on core {}", name, call.ctx.thread_id, call.core_id);
            match handler(&scheduler, call) {
                Ok(outcome) => Ok(outcome),
                Err(KernelError::Memory(err)) => Err(CpuError::Memory(err)),
                Err(err) => {
                    warn!(target: "kernel", "{} failed on thread {}: {}", name, call.ctx.thread_id, err);
                    call.set_return(FAILURE);
                    Ok(KernelCallOutcome::Continue)
                }
            }
        });
    }
}

fn arg(call: &KernelCall<'_>, n: usize) -> u32 {
    call.ctx.gpr[3 + n]
}

fn current(call: &KernelCall<'_>) -> ThreadId {
    ThreadId(call.ctx.thread_id)
}

fn success(call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, KernelError> {
    call.set_return(0);
    Ok(KernelCallOutcome::Continue)
}

/// Leave guest code through the sentinel with `value` as exit value
fn exit_with(call: &mut KernelCall<'_>, value: i32) -> KernelCallOutcome {
    call.set_return(value as u32);
    call.ctx.nia = CALLBACK_ADDR;
    KernelCallOutcome::Continue
}

/// Run the same `kc` again when the thread is next dispatched
fn retry(call: &mut KernelCall<'_>) -> KernelCallOutcome {
    call.ctx.nia = call.ctx.cia;
    KernelCallOutcome::Yield
}

fn exit(_: &Scheduler, call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, KernelError> {
    let value = arg(call, 0) as i32;
    Ok(exit_with(call, value))
}

fn sleep_ticks(scheduler: &Scheduler, call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, KernelError> {
    let ticks = (u64::from(arg(call, 0)) << 32) | u64::from(arg(call, 1));
    scheduler.sleep_timeout(current(call), None, ticks_to_duration(ticks))?;
    Ok(KernelCallOutcome::Yield)
}

fn create_thread(scheduler: &Scheduler, call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, KernelError> {
    let entry = arg(call, 0);
    let mut params = ThreadParams::new(format!("thread@0x{:08X}", entry), entry)
        .args(&[arg(call, 1)])
        .priority(arg(call, 2))
        .affinity(Affinity::from_bits_truncate(arg(call, 3)));
    if arg(call, 4) != 0 {
        params = params.stack_size(arg(call, 4));
    }
    let id = scheduler.create_thread(params)?;
    call.set_return(id.0);
    Ok(KernelCallOutcome::Continue)
}

fn resume(scheduler: &Scheduler, call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, KernelError> {
    let previous = scheduler.resume(ThreadId(arg(call, 0)), 1)?;
    call.set_return(previous as u32);
    Ok(KernelCallOutcome::Continue)
}

fn suspend(scheduler: &Scheduler, call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, KernelError> {
    let target = ThreadId(arg(call, 0));
    let previous = scheduler.suspend(target)?;
    call.set_return(previous as u32);
    if target == current(call) {
        return Ok(KernelCallOutcome::Yield);
    }
    Ok(KernelCallOutcome::Continue)
}

fn set_priority(scheduler: &Scheduler, call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, KernelError> {
    scheduler.set_priority(ThreadId(arg(call, 0)), arg(call, 1))?;
    success(call)
}

fn set_affinity(scheduler: &Scheduler, call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, KernelError> {
    let affinity = Affinity::from_bits(arg(call, 1)).ok_or(KernelError::InvalidAffinity(arg(call, 1)))?;
    scheduler.set_affinity(ThreadId(arg(call, 0)), affinity)?;
    success(call)
}

fn join(scheduler: &Scheduler, call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, KernelError> {
    let (target, out) = (ThreadId(arg(call, 0)), arg(call, 1));
    match scheduler.join(current(call), target)? {
        Some(value) => {
            if out != 0 {
                call.memory.write_be32(Address(out), value as u32)?;
            }
            call.set_return(1);
            Ok(KernelCallOutcome::Continue)
        }
        None => Ok(retry(call)),
    }
}

fn cancel(scheduler: &Scheduler, call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, KernelError> {
    let target = ThreadId(arg(call, 0));
    scheduler.cancel(target)?;
    if target == current(call) {
        return Ok(KernelCallOutcome::Yield);
    }
    success(call)
}

fn mutex_lock(scheduler: &Scheduler, call: &mut KernelCall<'_>) -> Result<KernelCallOutcome, KernelError> {
    if scheduler.lock_mutex(current(call), MutexId(arg(call, 0)))? {
        return success(call);
    }
    Ok(retry(call))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oe_core::config::Config;
    use oe_cpu::{Decoder, ExecutionEngine, KernelCallDispatch, ThreadContext};
    use oe_memory::MemoryManager;

    fn setup() -> (Arc<Scheduler>, Arc<KernelCallTable>, Arc<MemoryManager>) {
        let config = Config::default();
        let memory = MemoryManager::new().unwrap();
        let table = Arc::new(KernelCallTable::new());
        let engine = Arc::new(ExecutionEngine::new(
            &config.cpu,
            Arc::new(Decoder::new()),
            memory.clone(),
            table.clone(),
        ));
        let scheduler = Scheduler::new(engine, &config).unwrap();
        register_kernel_calls(&table, &scheduler);
        (scheduler, table, memory)
    }

    fn invoke(
        table: &KernelCallTable,
        memory: &MemoryManager,
        ctx: &mut ThreadContext,
        id: u32,
        args: &[u32],
    ) -> KernelCallOutcome {
        for (i, &value) in args.iter().enumerate() {
            ctx.gpr[3 + i] = value;
        }
        let mut call = KernelCall {
            ctx,
            memory,
            core_id: 1,
        };
        table.dispatch(id, &mut call).unwrap()
    }

    #[test]
    fn test_registered() {
        let (scheduler, table, _) = setup();
        for id in [YIELD, EXIT, JOIN, MUTEX_LOCK, GET_TIME] {
            assert!(table.contains(id), "0x{:X}", id);
        }
        scheduler.shutdown();
    }

    #[test]
    fn test_identity_calls() {
        let (scheduler, table, memory) = setup();
        let mut ctx = ThreadContext::new();
        ctx.thread_id = 42;
        invoke(&table, &memory, &mut ctx, GET_THREAD_ID, &[]);
        assert_eq!(ctx.gpr[3], 42);
        invoke(&table, &memory, &mut ctx, GET_CORE_ID, &[]);
        assert_eq!(ctx.gpr[3], 1);
        scheduler.shutdown();
    }

    #[test]
    fn test_exit_returns_through_sentinel() {
        let (scheduler, table, memory) = setup();
        let mut ctx = ThreadContext::new();
        ctx.nia = 0x104;
        let outcome = invoke(&table, &memory, &mut ctx, EXIT, &[7]);
        assert_eq!(outcome, KernelCallOutcome::Continue);
        assert_eq!(ctx.nia, CALLBACK_ADDR);
        assert_eq!(ctx.gpr[3], 7);
        scheduler.shutdown();
    }

    #[test]
    fn test_invalid_handle_returns_failure() {
        let (scheduler, table, memory) = setup();
        let mut ctx = ThreadContext::new();
        let outcome = invoke(&table, &memory, &mut ctx, RESUME, &[1234]);
        assert_eq!(outcome, KernelCallOutcome::Continue);
        assert_eq!(ctx.gpr[3], FAILURE);
        scheduler.shutdown();
    }

    #[test]
    fn test_create_and_resume_thread() {
        let (scheduler, table, memory) = setup();
        let mut ctx = ThreadContext::new();
        invoke(&table, &memory, &mut ctx, CREATE_THREAD, &[0x2000, 5, 10, Affinity::CORE1.bits(), 0]);
        let id = ThreadId(ctx.gpr[3]);
        let info = scheduler.thread_info(id).unwrap();
        assert_eq!(info.priority, 10);
        assert_eq!(info.affinity, Affinity::CORE1);
        assert_eq!(scheduler.thread_context(id).unwrap().gpr[3], 5);

        invoke(&table, &memory, &mut ctx, RESUME, &[id.0]);
        assert_eq!(ctx.gpr[3], 1);
        assert_eq!(scheduler.thread_info(id).unwrap().suspend_counter, 0);
        scheduler.shutdown();
    }

    #[test]
    fn test_contended_lock_rewinds_to_kc() {
        let (scheduler, table, memory) = setup();
        let owner = scheduler.create_thread(ThreadParams::new("owner", 0)).unwrap();
        let waiter = scheduler.create_thread(ThreadParams::new("waiter", 0)).unwrap();
        let mutex = scheduler.create_mutex("m");
        assert!(scheduler.lock_mutex(owner, mutex).unwrap());

        let mut ctx = ThreadContext::new();
        ctx.thread_id = waiter.0;
        ctx.cia = 0x300;
        ctx.nia = 0x304;
        let outcome = invoke(&table, &memory, &mut ctx, MUTEX_LOCK, &[mutex.0]);
        assert_eq!(outcome, KernelCallOutcome::Yield);
        assert_eq!(ctx.nia, 0x300);
        assert_eq!(ctx.gpr[3], mutex.0);
        scheduler.shutdown();
    }
}
