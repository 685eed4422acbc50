//! Scheduler behavior, driven by hand and on real virtual cores

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use oe_core::config::{Config, CpuBackend};
use oe_cpu::decoder::{Decoder, Field, Instruction, OperationId};
use oe_cpu::{ExecutionEngine, ExitReason, KernelCallTable};
use oe_kernel::calls::{EXIT, JOIN, MUTEX_LOCK, MUTEX_UNLOCK, RESUME, YIELD};
use oe_kernel::{
    register_kernel_calls, AlarmAction, Affinity, Scheduler, ThreadId, ThreadParams, ThreadState, VirtualCores,
    EXIT_ABNORMAL, LOWEST_PRIORITY,
};
use oe_memory::{Address, MemoryManager, PageFlags};
use proptest::prelude::*;
use tracing_subscriber::EnvFilter;

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    scheduler: Arc<Scheduler>,
    memory: Arc<MemoryManager>,
    decoder: Arc<Decoder>,
}

impl Harness {
    fn new(backend: CpuBackend) -> Self {
        let mut config = Config::default();
        config.cpu.backend = backend;
        Self::with_config(config)
    }

    fn with_config(config: Config) -> Self {
        init_logging();
        let memory = MemoryManager::new().unwrap();
        let decoder = Arc::new(Decoder::new());
        let table = Arc::new(KernelCallTable::new());
        let engine = Arc::new(ExecutionEngine::new(&config.cpu, decoder.clone(), memory.clone(), table.clone()));
        let scheduler = Scheduler::new(engine, &config).unwrap();
        register_kernel_calls(&table, &scheduler);
        Self {
            scheduler,
            memory,
            decoder,
        }
    }

    fn load(&self, base: u32, program: &[Instruction]) {
        for (i, instr) in program.iter().enumerate() {
            self.memory.write_be32(Address(base + 4 * i as u32), instr.word()).unwrap();
        }
    }

    fn spawn(&self, name: &str, priority: u32) -> ThreadId {
        self.scheduler
            .spawn_thread(ThreadParams::new(name, 0).priority(priority))
            .unwrap()
    }

    /// Dispatch on `core` and immediately hand the thread back as yielded
    fn dispatch_and_yield(&self, core: usize) -> ThreadId {
        let slice = self.scheduler.next_slice(core).unwrap();
        let id = slice.thread;
        self.scheduler
            .finish_slice(core, id, slice.context, Ok(ExitReason::Yield), Duration::ZERO);
        id
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_best_priority_dispatched_first() {
    let h = Harness::new(CpuBackend::Interpreter);
    let low = h.spawn("low", 20);
    let high = h.spawn("high", 5);
    let mid = h.spawn("mid", 12);

    let slice = h.scheduler.next_slice(0).unwrap();
    assert_eq!(slice.thread, high);
    assert_eq!(h.scheduler.thread_info(high).unwrap().state, ThreadState::Running);
    assert_eq!(h.scheduler.current_thread(0), Some(high));

    // While `high` is on core 0 the next best goes to core 1
    let second = h.scheduler.next_slice(1).unwrap();
    assert_eq!(second.thread, mid);
    h.scheduler
        .finish_slice(0, slice.thread, slice.context, Ok(ExitReason::Yield), Duration::ZERO);
    h.scheduler
        .finish_slice(1, second.thread, second.context, Ok(ExitReason::Yield), Duration::ZERO);

    assert_eq!(h.dispatch_and_yield(2), high);
    h.scheduler.set_priority(low, 1).unwrap();
    assert_eq!(h.dispatch_and_yield(2), low);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_dispatch_follows_priority_for_any_set(
        priorities in prop::collection::btree_set(0..=LOWEST_PRIORITY, 1..8)
            .prop_map(|set| set.into_iter().collect::<Vec<_>>())
            .prop_shuffle(),
    ) {
        let h = Harness::new(CpuBackend::Interpreter);
        let mut ready: Vec<(u32, ThreadId)> = priorities
            .iter()
            .map(|&priority| (priority, h.spawn(&format!("p{}", priority), priority)))
            .collect();
        ready.sort();

        // Each dispatched thread exits, so the next slice must be the next best
        for (_, expected) in ready {
            let slice = h.scheduler.next_slice(0).unwrap();
            prop_assert_eq!(slice.thread, expected);
            h.scheduler
                .finish_slice(0, slice.thread, slice.context, Ok(ExitReason::Returned), Duration::ZERO);
        }
    }
}

#[test]
fn test_equal_priorities_round_robin() {
    let h = Harness::new(CpuBackend::Interpreter);
    let threads: Vec<_> = ["a", "b", "c"].iter().map(|name| h.spawn(name, 16)).collect();

    let order: Vec<_> = (0..6).map(|_| h.dispatch_and_yield(0)).collect();
    assert_eq!(order[..3], threads[..]);
    assert_eq!(order[3..], threads[..]);
}

#[test]
fn test_suspend_resume_counter() {
    let h = Harness::new(CpuBackend::Interpreter);
    let id = h.scheduler.create_thread(ThreadParams::new("t", 0)).unwrap();
    for _ in 0..3 {
        h.scheduler.suspend(id).unwrap();
    }
    let before = h.scheduler.thread_info(id).unwrap().suspend_counter;
    assert_eq!(before, 4);

    for n in 1..=4 {
        h.scheduler.resume(id, n).unwrap();
        for _ in 0..n {
            h.scheduler.suspend(id).unwrap();
        }
        assert_eq!(h.scheduler.thread_info(id).unwrap().suspend_counter, before);
    }
}

#[test]
fn test_suspended_thread_never_selected() {
    let h = Harness::new(CpuBackend::Interpreter);
    let best = h.spawn("best", 1);
    let other = h.spawn("other", 30);
    h.scheduler.suspend(best).unwrap();

    for _ in 0..3 {
        assert_eq!(h.dispatch_and_yield(0), other);
    }
    h.scheduler.resume(best, 1).unwrap();
    assert_eq!(h.dispatch_and_yield(0), best);
}

#[test]
fn test_affinity_restricts_cores() {
    let h = Harness::new(CpuBackend::Interpreter);
    let pinned = h
        .scheduler
        .spawn_thread(ThreadParams::new("pinned", 0).priority(0).affinity(Affinity::CORE1))
        .unwrap();
    let anywhere = h.spawn("anywhere", 31);

    assert_eq!(h.dispatch_and_yield(0), anywhere);
    assert_eq!(h.dispatch_and_yield(1), pinned);

    h.scheduler.set_affinity(pinned, Affinity::CORE0).unwrap();
    assert_eq!(h.dispatch_and_yield(0), pinned);
    assert!(h.scheduler.set_affinity(pinned, Affinity::empty()).is_err());
}

#[test]
fn test_mutex_priority_inheritance() {
    let h = Harness::new(CpuBackend::Interpreter);
    let owner = h.spawn("owner", 20);
    let middle = h.spawn("middle", 15);
    let urgent = h.spawn("urgent", 2);
    let outer = h.scheduler.create_mutex("outer");
    let inner = h.scheduler.create_mutex("inner");

    assert!(h.scheduler.lock_mutex(owner, outer).unwrap());
    assert!(h.scheduler.lock_mutex(owner, outer).unwrap());
    assert_eq!(h.scheduler.mutex_owner(outer), Some((owner, 2)));
    assert!(h.scheduler.lock_mutex(middle, inner).unwrap());

    // middle waits for owner, urgent waits for middle
    assert!(!h.scheduler.lock_mutex(middle, outer).unwrap());
    assert_eq!(h.scheduler.thread_info(owner).unwrap().priority, 15);
    assert!(!h.scheduler.lock_mutex(urgent, inner).unwrap());
    assert_eq!(h.scheduler.thread_info(middle).unwrap().priority, 2);
    assert_eq!(h.scheduler.thread_info(owner).unwrap().priority, 2);
    assert_eq!(h.scheduler.thread_info(owner).unwrap().base_priority, 20);

    assert!(h.scheduler.unlock_mutex(middle, outer).is_err());
    h.scheduler.unlock_mutex(owner, outer).unwrap();
    assert_eq!(h.scheduler.thread_info(owner).unwrap().priority, 2);
    h.scheduler.unlock_mutex(owner, outer).unwrap();
    assert_eq!(h.scheduler.thread_info(owner).unwrap().priority, 20);

    let woken = h.scheduler.thread_info(middle).unwrap();
    assert_eq!(woken.state, ThreadState::Ready);
    assert!(h.scheduler.lock_mutex(middle, outer).unwrap());
    assert_eq!(h.scheduler.mutex_owner(outer), Some((middle, 1)));
}

#[test]
fn test_timed_sleep_reports_timeout() {
    let h = Harness::new(CpuBackend::Interpreter);
    let sleeper = h.spawn("sleeper", 16);
    let queue = h.scheduler.create_queue(oe_kernel::QueueOrder::Fifo);
    h.scheduler
        .sleep_timeout(sleeper, Some(queue), Duration::from_millis(10))
        .unwrap();
    assert_eq!(h.scheduler.thread_info(sleeper).unwrap().state, ThreadState::Waiting);

    assert!(wait_for(|| h.scheduler.thread_info(sleeper).unwrap().state == ThreadState::Ready));
    let slice = h.scheduler.next_slice(0).unwrap();
    assert_eq!(slice.thread, sleeper);
    assert_eq!(slice.context.gpr[3], 0);
    // Timing out removed it from the queue
    assert_eq!(h.scheduler.wake(queue).unwrap(), 0);
    h.scheduler
        .finish_slice(0, slice.thread, slice.context, Ok(ExitReason::Yield), Duration::ZERO);
}

#[test]
fn test_wake_before_timeout() {
    let h = Harness::new(CpuBackend::Interpreter);
    let sleeper = h.spawn("sleeper", 16);
    let queue = h.scheduler.create_queue(oe_kernel::QueueOrder::Priority);
    h.scheduler.sleep_timeout(sleeper, Some(queue), TIMEOUT).unwrap();
    assert_eq!(h.scheduler.wake_one(queue).unwrap(), Some(sleeper));

    let slice = h.scheduler.next_slice(0).unwrap();
    assert_eq!(slice.context.gpr[3], 1);
    h.scheduler
        .finish_slice(0, slice.thread, slice.context, Ok(ExitReason::Yield), Duration::ZERO);
}

#[test]
fn test_cancel_waiting_thread() {
    let h = Harness::new(CpuBackend::Interpreter);
    let waiter = h.spawn("waiter", 16);
    let queue = h.scheduler.create_queue(oe_kernel::QueueOrder::Fifo);
    h.scheduler.sleep(waiter, queue).unwrap();

    h.scheduler.set_cancel_state(waiter, false).unwrap();
    h.scheduler.cancel(waiter).unwrap();
    assert_eq!(h.scheduler.thread_info(waiter).unwrap().state, ThreadState::Waiting);
    assert!(!h.scheduler.test_cancel(waiter).unwrap());

    h.scheduler.set_cancel_state(waiter, true).unwrap();
    assert!(h.scheduler.test_cancel(waiter).unwrap());
    h.scheduler.set_cancel_state(waiter, false).unwrap();
    h.scheduler.set_cancel_state(waiter, true).unwrap();

    let other = h.spawn("other", 16);
    let queue2 = h.scheduler.create_queue(oe_kernel::QueueOrder::Fifo);
    h.scheduler.sleep(other, queue2).unwrap();
    h.scheduler.cancel(other).unwrap();
    let info = h.scheduler.thread_info(other).unwrap();
    assert_eq!(info.state, ThreadState::Moribund);
    assert_eq!(h.scheduler.wait_for_exit(other, TIMEOUT), Some(EXIT_ABNORMAL));
    assert_eq!(h.scheduler.wake(queue2).unwrap(), 0);
}

#[test]
fn test_guest_threads_on_virtual_cores() {
    let h = Harness::new(CpuBackend::Jit);
    let d = h.decoder.clone();
    // r3 += 1; yield; r3 += 1; exit(r3)
    h.load(
        0x1000,
        &[
            d.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Ra, 3).with(Field::Simm, 1),
            d.encode(OperationId::Kc).with(Field::Kcn, YIELD),
            d.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Ra, 3).with(Field::Simm, 1),
            d.encode(OperationId::Kc).with(Field::Kcn, EXIT),
        ],
    );

    let ids: Vec<_> = (0..6)
        .map(|i| {
            h.scheduler
                .spawn_thread(ThreadParams::new(format!("worker{}", i), 0x1000).args(&[i * 10]))
                .unwrap()
        })
        .collect();
    let mut cores = VirtualCores::start(h.scheduler.clone()).unwrap();
    assert_eq!(cores.len(), 3);

    for (i, &id) in ids.iter().enumerate() {
        assert_eq!(h.scheduler.wait_for_exit(id, TIMEOUT), Some(i as i32 * 10 + 2));
    }
    assert!(h.scheduler.wait_idle(TIMEOUT));
    let stats = h.scheduler.thread_info(ids[0]).unwrap().stats;
    assert_eq!(stats.slices, 2);
    cores.shutdown();
}

#[test]
fn test_guest_join() {
    let h = Harness::new(CpuBackend::Interpreter);
    let d = h.decoder.clone();
    h.load(
        0x2000,
        &[
            d.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Simm, 77),
            d.encode(OperationId::Kc).with(Field::Kcn, EXIT),
        ],
    );
    h.load(
        0x1000,
        &[
            d.encode(OperationId::Addi).with(Field::Rd, 31).with(Field::Ra, 3),
            d.encode(OperationId::Kc).with(Field::Kcn, RESUME),
            d.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Ra, 31),
            d.encode(OperationId::Addi).with(Field::Rd, 4).with(Field::Ra, 1).with(Field::Simm, 8),
            d.encode(OperationId::Kc).with(Field::Kcn, JOIN),
            d.encode(OperationId::Lwz).with(Field::Rd, 3).with(Field::Ra, 1).with(Field::D, 8),
            d.encode(OperationId::Kc).with(Field::Kcn, EXIT),
        ],
    );

    // Main either waits in the join or collects a worker that already exited
    let worker = h
        .scheduler
        .create_thread(ThreadParams::new("worker", 0x2000).priority(20))
        .unwrap();
    let main = h
        .scheduler
        .spawn_thread(ThreadParams::new("main", 0x1000).args(&[worker.0]).priority(10))
        .unwrap();

    let mut cores = VirtualCores::start(h.scheduler.clone()).unwrap();
    assert_eq!(h.scheduler.wait_for_exit(main, TIMEOUT), Some(77));
    // Joined threads are gone
    assert!(h.scheduler.thread_info(worker).is_none());
    cores.shutdown();
}

#[test]
fn test_guest_mutex_serializes_cores() {
    let h = Harness::new(CpuBackend::Jit);
    let d = h.decoder.clone();
    let program = [
        d.encode(OperationId::Addi).with(Field::Rd, 30).with(Field::Ra, 3),
        d.encode(OperationId::Addi).with(Field::Rd, 31).with(Field::Ra, 4),
        d.encode(OperationId::Addi).with(Field::Rd, 29).with(Field::Simm, 5),
        // loop:
        d.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Ra, 30),
        d.encode(OperationId::Kc).with(Field::Kcn, MUTEX_LOCK),
        d.encode(OperationId::Lwz).with(Field::Rd, 5).with(Field::Ra, 31),
        d.encode(OperationId::Kc).with(Field::Kcn, YIELD),
        d.encode(OperationId::Addi).with(Field::Rd, 5).with(Field::Ra, 5).with(Field::Simm, 1),
        d.encode(OperationId::Stw).with(Field::Rs, 5).with(Field::Ra, 31),
        d.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Ra, 30),
        d.encode(OperationId::Kc).with(Field::Kcn, MUTEX_UNLOCK),
        d.encode(OperationId::Addi).with(Field::Rd, 29).with(Field::Ra, 29).with(Field::Simm, 0xFFFF),
        d.encode(OperationId::Cmpi).with(Field::Ra, 29),
        // bne loop
        d.encode(OperationId::Bc).with(Field::Bo, 4).with(Field::Bi, 2).with(Field::Bd, 0x3FF6),
        d.encode(OperationId::Addi).with(Field::Rd, 3),
        d.encode(OperationId::Kc).with(Field::Kcn, EXIT),
    ];
    h.load(0x1000, &program);

    let counter = h.memory.allocate(4, 4, PageFlags::RW).unwrap();
    h.memory.write_be32(counter, 0).unwrap();
    let mutex = h.scheduler.create_mutex("counter");

    let ids: Vec<_> = (0..3)
        .map(|i| {
            h.scheduler
                .spawn_thread(ThreadParams::new(format!("adder{}", i), 0x1000).args(&[mutex.0, counter.get()]))
                .unwrap()
        })
        .collect();
    let mut cores = VirtualCores::start(h.scheduler.clone()).unwrap();
    for id in ids {
        assert_eq!(h.scheduler.wait_for_exit(id, TIMEOUT), Some(0));
    }
    assert_eq!(h.memory.read_be32(counter).unwrap(), 15);
    assert_eq!(h.scheduler.mutex_owner(mutex), None);
    cores.shutdown();
}

#[test]
fn test_periodic_interrupt_reaches_core() {
    let h = Harness::new(CpuBackend::Interpreter);
    let fired = Arc::new(AtomicU32::new(0));
    let cores_seen = Arc::new(AtomicU32::new(0));
    let handler = {
        let fired = fired.clone();
        let cores_seen = cores_seen.clone();
        Arc::new(move |_: &Scheduler, core: usize| {
            fired.fetch_add(1, Ordering::SeqCst);
            cores_seen.fetch_or(1 << core, Ordering::SeqCst);
        })
    };
    let mut cores = VirtualCores::start(h.scheduler.clone()).unwrap();
    let alarm = h.scheduler.set_alarm(
        Duration::from_millis(1),
        Some(Duration::from_millis(2)),
        AlarmAction::Interrupt { core: 2, handler },
    );

    assert!(wait_for(|| fired.load(Ordering::SeqCst) >= 3));
    h.scheduler.cancel_alarm(alarm);
    assert_eq!(cores_seen.load(Ordering::SeqCst), 1 << 2);
    cores.shutdown();
}

#[test]
fn test_wait_result_of_woken_thread() {
    let h = Harness::new(CpuBackend::Interpreter);
    let id = h.spawn("t", 16);
    let queue = h.scheduler.create_queue(oe_kernel::QueueOrder::Fifo);
    h.scheduler.sleep(id, queue).unwrap();
    assert_eq!(h.scheduler.wake(queue).unwrap(), 1);
    let info = h.scheduler.thread_info(id).unwrap();
    assert_eq!(info.state, ThreadState::Ready);
    assert_eq!(info.stats.wake_count, 1);
}

#[test]
fn test_spinning_compiled_thread_preempted() {
    let mut config = Config::default();
    config.cpu.backend = CpuBackend::Jit;
    config.cpu.core_count = 1;
    let h = Harness::with_config(config);
    let d = h.decoder.clone();
    // b .
    h.load(0x3000, &[d.encode(OperationId::B)]);
    h.load(
        0x3100,
        &[
            d.encode(OperationId::Addi).with(Field::Rd, 3).with(Field::Simm, 9),
            d.encode(OperationId::Kc),
        ],
    );

    let spinner = h
        .scheduler
        .spawn_thread(ThreadParams::new("spinner", 0x3000).priority(20))
        .unwrap();
    let mut cores = VirtualCores::start(h.scheduler.clone()).unwrap();
    assert!(wait_for(|| h.scheduler.current_thread(0) == Some(spinner)));

    let urgent = h
        .scheduler
        .spawn_thread(ThreadParams::new("urgent", 0x3100).priority(1))
        .unwrap();
    assert_eq!(h.scheduler.wait_for_exit(urgent, TIMEOUT), Some(9));

    // The spinner gets the core back and still has to stop for shutdown
    assert!(wait_for(|| h.scheduler.current_thread(0) == Some(spinner)));
    let (done, finished) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        cores.shutdown();
        let _ = done.send(());
    });
    assert!(finished.recv_timeout(TIMEOUT).is_ok());
}
