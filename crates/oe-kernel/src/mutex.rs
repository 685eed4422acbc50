//! Guest mutexes with priority inheritance
//!
//! A mutex is recursive. Contending threads sleep on a priority ordered wait
//! queue and the owner runs at the best priority waiting on any mutex it
//! owns. Unlocking wakes every waiter; they retry the lock when they run
//! again, so the best ready waiter wins.

use std::fmt;

use oe_core::error::KernelError;
use oe_core::sched_trace;

use crate::queue::{QueueId, QueueOrder};
use crate::scheduler::{Scheduler, SchedulerState};
use crate::thread::{ThreadId, WaitResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutexId(pub u32);

impl fmt::Display for MutexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct GuestMutex {
    pub id: MutexId,
    pub name: String,
    pub owner: Option<ThreadId>,
    /// Recursion depth of the owner
    pub count: u32,
    pub queue: QueueId,
}

impl SchedulerState {
    fn mutex_mut(&mut self, id: MutexId) -> Result<&mut GuestMutex, KernelError> {
        self.mutexes.get_mut(&id).ok_or(KernelError::InvalidMutex(id.0))
    }

    /// Try to take the mutex for `thread`, true when it is now the owner
    fn acquire(&mut self, thread: ThreadId, id: MutexId) -> Result<bool, KernelError> {
        self.thread(thread)?;
        let mutex = self.mutex_mut(id)?;
        match mutex.owner {
            None => {
                mutex.owner = Some(thread);
                mutex.count = 1;
                if let Some(owner) = self.threads.get_mut(&thread) {
                    owner.owned_mutexes.push(id);
                    owner.waiting_mutex = None;
                }
                // Remaining waiters now boost the new owner
                self.update_priority(thread);
                Ok(true)
            }
            Some(owner) if owner == thread => {
                mutex.count += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Drop ownership completely and wake every waiter
    pub(crate) fn release_mutex(&mut self, id: MutexId) {
        let Some(mutex) = self.mutexes.get_mut(&id) else {
            return;
        };
        let (owner, queue) = (mutex.owner.take(), mutex.queue);
        mutex.count = 0;

        if let Some(owner) = owner {
            if let Some(thread) = self.threads.get_mut(&owner) {
                thread.owned_mutexes.retain(|&owned| owned != id);
            }
        }
        let waiters = self.queues.get_mut(&queue).map(|q| q.drain()).unwrap_or_default();
        for waiter in waiters {
            self.make_ready(waiter, WaitResult::Woken);
        }
        if let Some(owner) = owner {
            self.update_priority(owner);
        }
    }
}

impl Scheduler {
    pub fn create_mutex(&self, name: impl Into<String>) -> MutexId {
        let mut state = self.state.lock();
        let id = MutexId(state.next_mutex);
        state.next_mutex += 1;
        let queue = state.new_queue(QueueOrder::Priority);
        state.mutexes.insert(
            id,
            GuestMutex {
                id,
                name: name.into(),
                owner: None,
                count: 0,
                queue,
            },
        );
        id
    }

    /// Lock `mutex` for `thread`
    ///
    /// Returns false after putting the thread to sleep on the mutex; the
    /// caller yields and retries the lock once the thread runs again.
    pub fn lock_mutex(&self, thread: ThreadId, mutex: MutexId) -> Result<bool, KernelError> {
        let mut state = self.state.lock();
        if state.acquire(thread, mutex)? {
            return Ok(true);
        }

        let (queue, owner) = {
            let guest = state.mutex_mut(mutex)?;
            (guest.queue, guest.owner)
        };
        sched_trace!("Thread {} blocked on mutex {} held by {:?}", thread, mutex, owner);
        state.park(thread, Some(queue), None, false)?;
        state.thread_mut(thread)?.waiting_mutex = Some(mutex);
        if let Some(owner) = owner {
            state.update_priority(owner);
        }
        self.reschedule_all(&state);
        Ok(false)
    }

    /// Lock without waiting, true on success
    pub fn try_lock_mutex(&self, thread: ThreadId, mutex: MutexId) -> Result<bool, KernelError> {
        self.state.lock().acquire(thread, mutex)
    }

    pub fn unlock_mutex(&self, thread: ThreadId, mutex: MutexId) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        let guest = state.mutex_mut(mutex)?;
        if guest.owner != Some(thread) {
            return Err(KernelError::NotOwner {
                thread: thread.0,
                mutex: mutex.0,
            });
        }
        guest.count -= 1;
        if guest.count == 0 {
            state.release_mutex(mutex);
            self.reschedule_all(&state);
        }
        Ok(())
    }

    /// Owner and recursion depth
    pub fn mutex_owner(&self, mutex: MutexId) -> Option<(ThreadId, u32)> {
        let state = self.state.lock();
        let guest = state.mutexes.get(&mutex)?;
        guest.owner.map(|owner| (owner, guest.count))
    }
}
