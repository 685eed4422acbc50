//! Alarms on a host timer thread
//!
//! One host thread keeps every pending alarm in a deadline heap and sleeps on
//! its command channel until the earliest deadline. Expired alarms are handed
//! to the callback given to [`AlarmManager::spawn`]; periodic alarms are
//! re-armed from their previous deadline so they do not drift.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use oe_core::{sched_debug, sched_trace};
use parking_lot::Mutex;

use crate::scheduler::Scheduler;
use crate::thread::ThreadId;

/// Guest time base ticks per second
pub const TIMEBASE_FREQUENCY: u64 = 62_156_250;

pub fn ticks_to_duration(ticks: u64) -> Duration {
    let nanos = ticks as u128 * 1_000_000_000 / TIMEBASE_FREQUENCY as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

pub fn duration_to_ticks(duration: Duration) -> u64 {
    let ticks = duration.as_nanos() * TIMEBASE_FREQUENCY as u128 / 1_000_000_000;
    ticks.min(u64::MAX as u128) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlarmId(pub u64);

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host code run on a virtual core at its next reschedule point
pub type InterruptHandler = Arc<dyn Fn(&Scheduler, usize) + Send + Sync>;

/// What happens when an alarm expires
#[derive(Clone)]
pub enum AlarmAction {
    /// End a timed wait with [`WaitResult::TimedOut`](crate::WaitResult::TimedOut)
    WakeThread(ThreadId),
    /// Deliver an interrupt to a virtual core
    Interrupt { core: usize, handler: InterruptHandler },
}

impl fmt::Debug for AlarmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmAction::WakeThread(id) => f.debug_tuple("WakeThread").field(id).finish(),
            AlarmAction::Interrupt { core, .. } => f.debug_struct("Interrupt").field("core", core).finish(),
        }
    }
}

enum Command {
    Set {
        id: AlarmId,
        deadline: Instant,
        period: Option<Duration>,
        action: AlarmAction,
    },
    Cancel(AlarmId),
    Shutdown,
}

/// Cheap handle for arming and cancelling alarms
///
/// Only sends on the command channel, so it is safe to use with the
/// scheduler lock held.
#[derive(Clone)]
pub struct AlarmHandle {
    commands: Sender<Command>,
    next_id: Arc<AtomicU64>,
}

impl AlarmHandle {
    /// Arm an alarm `delay` from now, repeating every `period` if given
    pub fn set(&self, delay: Duration, period: Option<Duration>, action: AlarmAction) -> AlarmId {
        let id = AlarmId(self.next_id.fetch_add(1, Ordering::Relaxed));
        sched_trace!("Alarm {} set in {:?} ({:?})", id, delay, action);
        let _ = self.commands.send(Command::Set {
            id,
            deadline: Instant::now() + delay,
            period: period.filter(|p| !p.is_zero()),
            action,
        });
        id
    }

    pub fn cancel(&self, id: AlarmId) {
        let _ = self.commands.send(Command::Cancel(id));
    }
}

/// Owner of the timer thread
pub struct AlarmManager {
    handle: AlarmHandle,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AlarmManager {
    /// Start the timer thread; `fire` runs on it for every expiry
    pub fn spawn<F>(fire: F) -> std::io::Result<Self>
    where
        F: Fn(AlarmId, &AlarmAction) + Send + 'static,
    {
        let (commands, receiver) = channel::unbounded();
        let thread = std::thread::Builder::new()
            .name("alarms".into())
            .spawn(move || timer_loop(receiver, fire))?;
        Ok(Self {
            handle: AlarmHandle {
                commands,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn handle(&self) -> AlarmHandle {
        self.handle.clone()
    }

    pub fn set(&self, delay: Duration, period: Option<Duration>, action: AlarmAction) -> AlarmId {
        self.handle.set(delay, period, action)
    }

    pub fn cancel(&self, id: AlarmId) {
        self.handle.cancel(id)
    }

    /// Stop the timer thread; pending alarms never fire
    pub fn shutdown(&self) {
        let _ = self.handle.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.lock().take() {
            // The last scheduler reference can be dropped from inside an
            // alarm callback
            if thread.thread().id() != std::thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for AlarmManager {
    fn drop(&mut self) {
        let _ = self.handle.commands.send(Command::Shutdown);
    }
}

struct Pending {
    deadline: Instant,
    period: Option<Duration>,
    action: AlarmAction,
}

fn timer_loop<F>(receiver: Receiver<Command>, fire: F)
where
    F: Fn(AlarmId, &AlarmAction),
{
    let mut heap: BinaryHeap<Reverse<(Instant, AlarmId)>> = BinaryHeap::new();
    let mut pending: HashMap<AlarmId, Pending> = HashMap::new();

    loop {
        let command = match heap.peek() {
            Some(Reverse((deadline, _))) => receiver.recv_deadline(*deadline),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(Command::Set {
                id,
                deadline,
                period,
                action,
            }) => {
                heap.push(Reverse((deadline, id)));
                pending.insert(
                    id,
                    Pending {
                        deadline,
                        period,
                        action,
                    },
                );
            }
            Ok(Command::Cancel(id)) => {
                // The heap entry goes stale and is skipped when it expires
                pending.remove(&id);
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while let Some(&Reverse((deadline, id))) = heap.peek() {
            if deadline > now {
                break;
            }
            heap.pop();

            let Some(alarm) = pending.get_mut(&id) else {
                continue;
            };
            if alarm.deadline != deadline {
                continue;
            }

            fire(id, &alarm.action);

            match alarm.period {
                Some(period) => {
                    alarm.deadline += period;
                    heap.push(Reverse((alarm.deadline, id)));
                }
                None => {
                    pending.remove(&id);
                }
            }
        }
    }

    sched_debug!("Alarm thread stopped with {} alarms pending", pending.len());
}
